use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::time::Duration;
use strum_macros::{Display, EnumString};

pub(crate) mod sc;

/// How long a stop request may take before we give up on the service
const STOP_TIMEOUT: Duration = Duration::from_secs(60);
const STOP_POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Clone, Copy, Debug, PartialEq, Eq, EnumString, Display)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub(crate) enum ServiceState {
    Stopped,
    StartPending,
    StopPending,
    Running,
    ContinuePending,
    PausePending,
    Paused,
}

/// The parts of the host service manager we need to install and reconfigure the kubelet
#[async_trait]
pub(crate) trait ServiceManager: Send + Sync {
    /// The start command of the service, or None if no such service is installed
    async fn get(&self, name: &str) -> Result<Option<String>>;

    async fn set_start_command(&self, name: &str, command: &str) -> Result<()>;

    async fn create(&self, name: &str, command: &str, description: &str, dependencies: &[&str]) -> Result<()>;

    async fn start(&self, name: &str) -> Result<()>;

    async fn stop(&self, name: &str) -> Result<()>;

    async fn state(&self, name: &str) -> Result<ServiceState>;
}

/// Stops the service if it isn't stopped already and polls until the service manager reports it
/// as stopped
pub(crate) async fn stop_and_wait(services: &dyn ServiceManager, name: &str) -> Result<()> {
    if services.state(name).await? == ServiceState::Stopped {
        return Ok(());
    }

    services.stop(name).await.context(format!("stopping {name} service"))?;

    let wait = async {
        loop {
            let state = services.state(name).await?;
            if state == ServiceState::Stopped {
                break;
            }

            log::debug!("waiting for {name} service to stop, currently {state}");
            tokio::time::sleep(STOP_POLL_INTERVAL).await;
        }

        Ok::<(), anyhow::Error>(())
    };

    match tokio::time::timeout(STOP_TIMEOUT, wait).await {
        Ok(result) => result,
        Err(_) => bail!("timed out after {STOP_TIMEOUT:?} waiting for {name} service to stop"),
    }
}

/// Replaces the start command of an existing service and (re)starts it
pub(crate) async fn apply_start_command(services: &dyn ServiceManager, name: &str, command: &str) -> Result<()> {
    stop_and_wait(services, name).await?;

    services
        .set_start_command(name, command)
        .await
        .context(format!("updating {name} service start command"))?;

    services.start(name).await.context(format!("starting {name} service"))?;

    log::info!("{name} service restarted with updated start command");

    Ok(())
}
