use super::{
    kubelet_args::{self, render_flag},
    WinNodeBootstrapper,
};
use crate::{error::BootstrapError, file_utils};
use anyhow::{ensure, Context, Result};
use itertools::Itertools;

const RESOLV_CONF_ARG: &str = "resolv-conf";
const NETWORK_PLUGIN_ARG: &str = "network-plugin";
const CNI_BIN_DIR_ARG: &str = "cni-bin-dir";
const CNI_CONF_DIR_ARG: &str = "cni-conf-dir";

/// The kubelet flags owned by the CNI reconciliation, in the order they're appended
const CNI_ARGS: [&str; 4] = [RESOLV_CONF_ARG, NETWORK_PLUGIN_ARG, CNI_BIN_DIR_ARG, CNI_CONF_DIR_ARG];

impl WinNodeBootstrapper {
    /// Fails fast on unusable inputs before anything on disk is touched
    pub(crate) fn check_cni_inputs(&self) -> Result<()> {
        let install_dir = &self.layout.install_dir;
        let metadata = std::fs::metadata(install_dir).with_context(|| BootstrapError::InstallDir(install_dir.display().to_string()))?;
        ensure!(
            metadata.is_dir(),
            BootstrapError::InstallDir(format!("{}: not a directory", install_dir.display()))
        );

        let cni_path = self
            .cni_path
            .as_deref()
            .context(BootstrapError::CniPath("error accessing CNI path: none given".to_string()))?;
        let metadata =
            std::fs::metadata(cni_path).with_context(|| BootstrapError::CniPath(format!("error accessing CNI path {}", cni_path.display())))?;
        ensure!(
            metadata.is_dir(),
            BootstrapError::CniPath(format!("CNI path cannot be a file: {}", cni_path.display()))
        );

        let cni_config = self
            .cni_config
            .as_deref()
            .context(BootstrapError::CniConfig("error accessing CNI config: none given".to_string()))?;
        let metadata = std::fs::metadata(cni_config)
            .with_context(|| BootstrapError::CniConfig(format!("error accessing CNI config {}", cni_config.display())))?;
        ensure!(
            !metadata.is_dir(),
            BootstrapError::CniConfig(format!("CNI config cannot be a directory: {}", cni_config.display()))
        );

        Ok(())
    }

    /// Creates the CNI install directory and its config subdirectory
    pub(crate) fn ensure_cni_dir_is_present(&self) -> Result<()> {
        let cni_config_install_path = &self.layout.cni_config_install_path;

        std::fs::create_dir_all(cni_config_install_path)
            .with_context(|| BootstrapError::DirCreation(cni_config_install_path.display().to_string()))?;

        Ok(())
    }

    /// Copies the files directly under the CNI path into the CNI install directory, and the CNI
    /// config into its config subdirectory. Subdirectories of the CNI path are skipped.
    pub(crate) fn copy_cni_files(&self) -> Result<()> {
        let cni_path = self
            .cni_path
            .as_deref()
            .context(BootstrapError::Copy("error reading CNI path: none given".to_string()))?;

        let cni_files = std::fs::read_dir(cni_path)
            .with_context(|| BootstrapError::Copy(format!("error reading CNI path {}", cni_path.display())))?
            .map(|entry| entry.map(|entry| entry.path()))
            .collect::<std::io::Result<Vec<_>>>()
            .with_context(|| BootstrapError::Copy(format!("error reading CNI path {}", cni_path.display())))?
            .into_iter()
            .filter(|path| path.is_file())
            .collect::<Vec<_>>();

        ensure!(
            !cni_files.is_empty(),
            BootstrapError::Copy(format!("no files present in CNI path {}", cni_path.display()))
        );

        for cni_file in &cni_files {
            file_utils::copy_into_dir(cni_file, &self.layout.cni_install_dir)
                .context(BootstrapError::Copy(format!("error copying CNI binary {}", cni_file.display())))?;
        }

        let cni_config = self
            .cni_config
            .as_deref()
            .context(BootstrapError::Copy("error copying CNI config: none given".to_string()))?;
        file_utils::copy_into_dir(cni_config, &self.layout.cni_config_install_path)
            .context(BootstrapError::Copy(format!("error copying CNI config {}", cni_config.display())))?;

        log::info!(
            "copied {} CNI files to {} and {} to {}",
            cni_files.len(),
            self.layout.cni_install_dir.display(),
            cni_config.display(),
            self.layout.cni_config_install_path.display()
        );

        Ok(())
    }

    /// Returns `command_line` with any existing CNI flags replaced by the canonical ones. Flags
    /// are stripped before being appended, so applying this to its own output changes nothing.
    pub(crate) fn update_kubelet_args_for_cni(&mut self, command_line: &str) -> String {
        let cni_values = [
            String::new(),
            "cni".to_string(),
            self.layout.cni_install_dir.display().to_string(),
            self.layout.cni_config_install_path.display().to_string(),
        ];

        for (flag, value) in CNI_ARGS.iter().zip(&cni_values) {
            self.kubelet_args.insert(*flag, value.clone());
        }

        kubelet_args::tokenize(command_line)
            .into_iter()
            .filter(|token| !kubelet_args::parse_flag(token).is_some_and(|(flag, _)| CNI_ARGS.contains(&flag.as_str())))
            .chain(CNI_ARGS.iter().zip(&cni_values).map(|(flag, value)| render_flag(flag, value)))
            .join(" ")
    }
}
