use super::{ServiceManager, ServiceState};
use anyhow::{bail, ensure, Context, Result};
use async_trait::async_trait;
use std::process::Output;
use tokio::process::Command;

const SC_EXE: &str = "sc.exe";

/// sc.exe exit code for ERROR_SERVICE_DOES_NOT_EXIST
const SERVICE_DOES_NOT_EXIST: i32 = 1060;

/// Buffer size for `sc qc`, the default one is too small for a kubelet command line
const QUERY_CONFIG_BUFFER_SIZE: &str = "8192";

/// Drives the Windows service control manager through sc.exe
#[derive(Default)]
pub(crate) struct ScServiceManager;

impl ScServiceManager {
    async fn sc(&self, args: &[&str]) -> Result<Output> {
        log::debug!("running {SC_EXE} {}", args.join(" "));

        Command::new(SC_EXE)
            .args(args)
            .output()
            .await
            .context(format!("running {SC_EXE} {}", args.first().unwrap_or(&"")))
    }

    async fn sc_checked(&self, args: &[&str]) -> Result<String> {
        let output = self.sc(args).await?;

        ensure!(
            output.status.success(),
            "{SC_EXE} {} failed with {}: {}",
            args.join(" "),
            output.status,
            String::from_utf8_lossy(&output.stdout).trim()
        );

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

#[async_trait]
impl ServiceManager for ScServiceManager {
    async fn get(&self, name: &str) -> Result<Option<String>> {
        let output = self.sc(&["qc", name, QUERY_CONFIG_BUFFER_SIZE]).await?;

        if output.status.code() == Some(SERVICE_DOES_NOT_EXIST) {
            return Ok(None);
        }

        ensure!(
            output.status.success(),
            "querying {name} service configuration failed with {}",
            output.status
        );

        Ok(Some(parse_binary_path_name(&String::from_utf8_lossy(&output.stdout))?))
    }

    async fn set_start_command(&self, name: &str, command: &str) -> Result<()> {
        self.sc_checked(&["config", name, "binPath=", command]).await?;

        Ok(())
    }

    async fn create(&self, name: &str, command: &str, description: &str, dependencies: &[&str]) -> Result<()> {
        let dependencies = dependencies.join("/");

        let mut args = vec!["create", name, "binPath=", command, "start=", "auto"];
        if !dependencies.is_empty() {
            args.extend(["depend=", dependencies.as_str()]);
        }

        self.sc_checked(&args).await?;
        self.sc_checked(&["description", name, description]).await?;

        Ok(())
    }

    async fn start(&self, name: &str) -> Result<()> {
        self.sc_checked(&["start", name]).await?;

        Ok(())
    }

    async fn stop(&self, name: &str) -> Result<()> {
        self.sc_checked(&["stop", name]).await?;

        Ok(())
    }

    async fn state(&self, name: &str) -> Result<ServiceState> {
        parse_state(&self.sc_checked(&["query", name]).await?)
    }
}

fn parse_binary_path_name(qc_output: &str) -> Result<String> {
    match lazy_regex::regex_captures!(r"(?m)^\s*BINARY_PATH_NAME\s*:\s*(.*?)\s*$", qc_output) {
        Some((_, binary_path_name)) => Ok(binary_path_name.to_string()),
        None => bail!("no BINARY_PATH_NAME in service configuration"),
    }
}

fn parse_state(query_output: &str) -> Result<ServiceState> {
    let (_, state) =
        lazy_regex::regex_captures!(r"(?m)^\s*STATE\s*:\s*\d+\s+(\w+)", query_output).context("no STATE in service query output")?;

    state.parse().context(format!("unknown service state {state}"))
}
