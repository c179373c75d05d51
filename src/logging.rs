use crate::{bootstrapper::kubelet_args::KubeletArgs, config::WmcbConfig};
use anyhow::{bail, Context, Result};
use lazy_static::lazy_static;
use log::{LevelFilter, Metadata, Record};
use std::sync::{Arc, Mutex};

struct WmcbLogger;

static LOGGER: WmcbLogger = WmcbLogger;

pub fn init(level: LevelFilter) -> Result<()> {
    match log::set_logger(&LOGGER) {
        Ok(_) => log::set_max_level(level),
        Err(_) => bail!("Logger initalization failed"),
    };

    Ok(())
}

lazy_static! {
    pub(crate) static ref LOG_RECORDS: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
}

impl log::Log for WmcbLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            let log_string = format!(
                "{} - {} - {}:{}: {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                record.file().unwrap_or("unknown"),
                record.line().unwrap_or(0),
                record.args()
            );

            {
                let mut log_records = match LOG_RECORDS.lock() {
                    Ok(log_records) => log_records,
                    Err(err) => {
                        println!("Failed to lock log records: {}", err);
                        return;
                    }
                };
                log_records.push(log_string.clone());
            }

            println!("{}", log_string);
        }
    }

    fn flush(&self) {}
}

#[derive(serde::Serialize)]
struct Summary<'a> {
    wmcb_config: &'a WmcbConfig,
    kubelet_args: &'a KubeletArgs,
    error: Option<String>,
    logs: Vec<String>,
}

/// Writes the run summary to the configured summary file, if any. Called whether the run
/// succeeded or not.
pub(crate) fn generate_summary(wmcb_config: &WmcbConfig, kubelet_args: &KubeletArgs, run_result: Option<&anyhow::Error>) -> Result<()> {
    let Some(summary_file) = &wmcb_config.summary_file else {
        return Ok(());
    };

    let logs = match LOG_RECORDS.lock() {
        Ok(logs) => logs.clone(),
        Err(err) => {
            vec![format!("Failed to lock log records: {}", err)]
        }
    };

    let summary = Summary {
        wmcb_config,
        kubelet_args,
        error: run_result.map(|err| format!("{err:#}")),
        logs,
    };

    serde_yaml::to_writer(summary_file.create()?, &summary).context("serializing summary into summary file")?;

    Ok(())
}
