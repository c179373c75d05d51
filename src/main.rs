use anyhow::{Context, Result};
use bootstrapper::WinNodeBootstrapper;
use config::WmcbConfig;
use service::sc::ScServiceManager;

mod bootstrapper;
mod config;
mod error;
mod file_utils;
mod logging;
mod service;


#[tokio::main]
async fn main() -> Result<()> {
    let wmcb_config = WmcbConfig::new()?;

    logging::init(wmcb_config.log_level)?;

    main_internal(wmcb_config).await
}

async fn main_internal(wmcb_config: WmcbConfig) -> Result<()> {
    let mut bootstrapper = WinNodeBootstrapper::from_config(&wmcb_config);

    let run_result = bootstrapper.run(&wmcb_config.command, &ScServiceManager).await;

    if let Err(err) = &run_result {
        log::error!("{err:#}");
    }

    logging::generate_summary(&wmcb_config, &bootstrapper.kubelet_args, run_result.as_ref().err()).context("generating summary")?;

    run_result
}
