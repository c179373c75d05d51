use anyhow::{Context, Result};
use itertools::Itertools;
use std::collections::BTreeMap;

/// Kubelet flags keyed by name without the leading dashes. An empty value is rendered as a flag
/// with an empty value, e.g. `--resolv-conf=""`.
#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize)]
pub(crate) struct KubeletArgs(BTreeMap<String, String>);

impl KubeletArgs {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Last writer wins
    pub(crate) fn insert(&mut self, flag: impl Into<String>, value: impl Into<String>) {
        self.0.insert(flag.into(), value.into());
    }

    pub(crate) fn get(&self, flag: &str) -> Option<&str> {
        self.0.get(flag).map(String::as_str)
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Renders the flags in key order, separated by single spaces
    pub(crate) fn render(&self) -> String {
        self.0.iter().map(|(flag, value)| render_flag(flag, value)).join(" ")
    }
}

pub(crate) fn render_flag(flag: &str, value: &str) -> String {
    format!("--{flag}={}", quote(value))
}

/// Double quotes empty values and values containing whitespace so that `tokenize` reads them back
/// as a single token
pub(crate) fn quote(value: &str) -> String {
    if value.is_empty() || value.chars().any(char::is_whitespace) {
        format!("\"{value}\"")
    } else {
        value.to_string()
    }
}

/// Splits a command line on whitespace, except whitespace enclosed in double quotes. Quotes are
/// kept as part of the token so that re-joining the tokens reproduces the command line.
pub(crate) fn tokenize(command_line: &str) -> Vec<String> {
    let mut tokens = vec![];
    let mut current = String::new();
    let mut quoted = false;

    for c in command_line.chars() {
        match c {
            '"' => {
                quoted = !quoted;
                current.push(c);
            }
            c if c.is_whitespace() && !quoted => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }

    if !current.is_empty() {
        tokens.push(current);
    }

    tokens
}

/// Splits a `--flag[=value]` token into its name and value. Returns None for tokens that aren't
/// long flags, such as the executable path.
pub(crate) fn parse_flag(token: &str) -> Option<(String, String)> {
    let flag = token.strip_prefix("--")?;

    if flag.is_empty() {
        return None;
    }

    Some(match flag.split_once('=') {
        Some((name, value)) => (name.to_string(), trim_quotes(value).to_string()),
        None => (flag.to_string(), String::new()),
    })
}

fn trim_quotes(s: &str) -> &str {
    s.strip_prefix('"').and_then(|s| s.strip_suffix('"')).unwrap_or(s)
}

/// Extracts the `ExecStart=` command of a systemd unit, joining its backslash continuation lines
pub(crate) fn unit_exec_start(unit_contents: &str) -> Option<String> {
    let mut lines = unit_contents.lines().skip_while(|line| !line.trim_start().starts_with("ExecStart="));

    let mut command = lines.next()?.trim_start().strip_prefix("ExecStart=")?.trim().to_string();

    while let Some(stripped) = command.strip_suffix('\\') {
        command = stripped.trim_end().to_string();

        match lines.next() {
            Some(line) => {
                command.push(' ');
                command.push_str(line.trim());
            }
            None => break,
        }
    }

    Some(command)
}

/// All `--flag[=value]` arguments of a unit's `ExecStart=` command, in order of appearance
pub(crate) fn unit_flags(unit_contents: &str) -> Result<Vec<(String, String)>> {
    let exec_start = unit_exec_start(unit_contents).context("no ExecStart in unit")?;

    Ok(tokenize(&exec_start).iter().filter_map(|token| parse_flag(token)).collect())
}
