use crate::bootstrapper;
use anyhow::{bail, ensure, Context, Result};
use clap::Parser;
use clio::ClioPath;
use log::LevelFilter;
use serde_json::Value;
use std::{env, path::PathBuf};

pub(crate) use self::path::ConfigPath;
use self::cli::{Cli, Command};

mod cli;
mod path;

/// Environment variable naming a YAML config file to use instead of CLI arguments
const CONFIG_ENV_VAR: &str = "WMCB_CONFIG";

#[derive(Clone, Debug, serde::Serialize)]
#[serde(tag = "command", rename_all = "kebab-case")]
pub(crate) enum WmcbCommand {
    InitializeKubelet {
        ignition_file: ConfigPath,
        kubelet_path: ConfigPath,
    },
    ConfigureCni {
        cni_path: PathBuf,
        cni_config: PathBuf,
    },
}

/// All parsed CLI arguments, coalesced into a single struct for convenience
#[derive(Clone, Debug, serde::Serialize)]
pub(crate) struct WmcbConfig {
    #[serde(flatten)]
    pub(crate) command: WmcbCommand,
    pub(crate) install_dir: PathBuf,
    #[serde(serialize_with = "serialize_level_filter")]
    pub(crate) log_level: LevelFilter,
    pub(crate) summary_file: Option<ConfigPath>,

    pub(crate) config_file_raw: Option<String>,
    pub(crate) cli_raw: Option<String>,
}

fn serialize_level_filter<S: serde::Serializer>(level: &LevelFilter, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(level)
}

pub(crate) fn parse_log_level(value: &str) -> Result<LevelFilter> {
    match value.parse() {
        Ok(level) => Ok(level),
        Err(_) => bail!("invalid log level {value:?}, expected one of off, error, warn, info, debug, trace"),
    }
}

fn existing_file(key: &str, value: Value) -> Result<ConfigPath> {
    let path = value.as_str().context(format!("{key} must be a string"))?;
    let clio_path = ClioPath::new(path).context(format!("{key} {path}"))?;

    ensure!(clio_path.try_exists()?, format!("{key} must exist: {clio_path}"));
    ensure!(clio_path.is_file(), format!("{key} must be a file: {clio_path}"));

    Ok(ConfigPath::from(clio_path))
}

fn plain_path(key: &str, value: Value) -> Result<PathBuf> {
    Ok(PathBuf::from(value.as_str().context(format!("{key} must be a string"))?))
}

impl WmcbConfig {
    pub(crate) fn parse_from_config_file(config_bytes: &[u8]) -> Result<Self> {
        let value: Value = serde_yaml::from_slice(config_bytes)?;

        let mut value = value.as_object().context("config file must be a YAML object")?.clone();

        let command = value
            .remove("command")
            .context("command is required")?
            .as_str()
            .context("command must be a string")?
            .to_string();

        let command = match command.as_str() {
            "initialize-kubelet" => WmcbCommand::InitializeKubelet {
                ignition_file: existing_file("ignition_file", value.remove("ignition_file").context("ignition_file is required")?)?,
                kubelet_path: existing_file("kubelet_path", value.remove("kubelet_path").context("kubelet_path is required")?)?,
            },
            "configure-cni" => WmcbCommand::ConfigureCni {
                cni_path: plain_path("cni_path", value.remove("cni_path").context("cni_path is required")?)?,
                cni_config: plain_path("cni_config", value.remove("cni_config").context("cni_config is required")?)?,
            },
            command => bail!("unknown command {command:?}, expected initialize-kubelet or configure-cni"),
        };

        let install_dir = match value.remove("install_dir") {
            Some(value) => plain_path("install_dir", value)?,
            None => bootstrapper::default_install_dir().to_path_buf(),
        };

        let log_level = match value.remove("log_level") {
            Some(value) => parse_log_level(value.as_str().context("log_level must be a string")?)?,
            None => LevelFilter::Info,
        };

        let summary_file = match value.remove("summary_file") {
            Some(value) => Some(ConfigPath::from(
                ClioPath::new(value.as_str().context("summary_file must be a string")?)
                    .context(format!("summary_file {value}"))?,
            )),
            None => None,
        };

        ensure!(
            value.is_empty(),
            "unknown keys {:?} in config file",
            value.keys().map(|key| key.to_string()).collect::<Vec<String>>().join(", ")
        );

        Ok(Self {
            command,
            install_dir,
            log_level,
            summary_file,

            cli_raw: None,
            config_file_raw: Some(String::from_utf8_lossy(config_bytes).to_string()),
        })
    }

    pub(crate) fn parse_from_cli(cli: Cli) -> Result<Self> {
        let (command, install_dir) = match cli.command {
            Command::InitializeKubelet {
                ignition_file,
                kubelet_path,
                install_dir,
            } => (
                WmcbCommand::InitializeKubelet {
                    ignition_file: ConfigPath::from(ignition_file),
                    kubelet_path: ConfigPath::from(kubelet_path),
                },
                install_dir,
            ),
            Command::ConfigureCni {
                cni_path,
                cni_config,
                install_dir,
            } => (WmcbCommand::ConfigureCni { cni_path, cni_config }, install_dir),
        };

        Ok(Self {
            command,
            install_dir,
            log_level: cli.log_level,
            summary_file: cli.summary_file.map(ConfigPath::from),

            config_file_raw: None,
            cli_raw: Some(serde_json::to_string(&env::args().collect::<Vec<String>>())?),
        })
    }

    pub(crate) fn new() -> Result<WmcbConfig> {
        Ok(match env::var(CONFIG_ENV_VAR) {
            Ok(var) => {
                let num_args = env::args().len();

                ensure!(
                    num_args == 1,
                    "{CONFIG_ENV_VAR} is set, but there are {num_args} CLI arguments. {CONFIG_ENV_VAR} is meant to be used with no arguments."
                );

                WmcbConfig::parse_from_config_file(&std::fs::read(&var).context(format!("reading {CONFIG_ENV_VAR} file {var}"))?)
                    .context(format!("parsing {CONFIG_ENV_VAR} file {var}"))?
            }
            Err(_) => WmcbConfig::parse_from_cli(Cli::parse()).context("CLI parsing")?,
        })
    }
}
