use clap::{Parser, Subcommand};
use clio::ClioPath;
use log::LevelFilter;
use std::path::PathBuf;

/// Bootstraps a Windows instance into an OpenShift worker node
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub(crate) struct Cli {
    #[clap(subcommand)]
    pub(crate) command: Command,

    /// Log verbosity, one of off, error, warn, info, debug, trace
    #[clap(long, global = true, default_value = "info", value_parser = super::parse_log_level)]
    pub(crate) log_level: LevelFilter,

    /// Write a YAML summary of the run (configuration, resulting kubelet arguments and logs) to
    /// this file
    #[clap(long, global = true, value_parser = clap::value_parser!(ClioPath))]
    pub(crate) summary_file: Option<ClioPath>,
}

#[derive(Subcommand)]
pub(crate) enum Command {
    /// Install the kubelet from the worker ignition and register it as a Windows service
    InitializeKubelet {
        /// Worker ignition config, as served by the machine config server
        #[clap(long, value_parser = clap::value_parser!(ClioPath).exists().is_file())]
        ignition_file: ClioPath,

        /// Windows kubelet binary to install
        #[clap(long, value_parser = clap::value_parser!(ClioPath).exists().is_file())]
        kubelet_path: ClioPath,

        /// Directory kubelet and its configuration get installed to
        #[clap(long, default_value = r"C:\k")]
        install_dir: PathBuf,
    },

    /// Install the CNI plugins and configure the kubelet service to use them. Must be re-run
    /// whenever the kubelet service is reinstalled.
    ConfigureCni {
        /// Directory containing the CNI plugin binaries
        #[clap(long)]
        cni_path: PathBuf,

        /// CNI configuration file
        #[clap(long)]
        cni_config: PathBuf,

        /// Directory kubelet was installed to
        #[clap(long, default_value = r"C:\k")]
        install_dir: PathBuf,
    },
}
