use crate::{
    config::{WmcbCommand, WmcbConfig},
    error::BootstrapError,
    service::{self, ServiceManager},
};
use anyhow::{ensure, Context, Result};
use fn_error_context::context;
use ignition::Ignition;
use kubelet_args::{quote, render_flag, KubeletArgs};
use kubelet_config::windows_path_join;
use std::path::{Path, PathBuf};
use translation::{standard_rules, BOOTSTRAP_KUBECONFIG_FILE_NAME, KUBELET_CONF_FILE_NAME};

mod cloud_config;
mod cni;
mod ignition;
pub(crate) mod kubelet_args;
mod kubelet_config;
mod translation;

pub(crate) const KUBELET_SERVICE_NAME: &str = "kubelet";
const KUBELET_SERVICE_DESCRIPTION: &str = "OpenShift Kubelet";
const KUBELET_SERVICE_DEPENDENCIES: [&str; 1] = ["docker"];

/// Name of the kubelet unit in the ignition, we take kubelet arguments from its ExecStart
pub(crate) const KUBELET_SYSTEMD_UNIT_NAME: &str = "kubelet.service";

const KUBELET_EXE_FILE_NAME: &str = "kubelet.exe";
const KUBECONFIG_FILE_NAME: &str = "kubeconfig";
const KUBELET_LOG_FILE_NAME: &str = "kubelet.log";
const PAUSE_CONTAINER_IMAGE: &str = "mcr.microsoft.com/k8s/core/pause:1.2.0";
const KUBELET_CERT_DIR: &str = "c:/var/lib/kubelet/pki/";
const NODE_TAINTS: &str = "os=Windows:NoSchedule";
const NODE_LABELS: &str = "node.openshift.io/os_id=Windows";

const CNI_DIR_NAME: &str = "cni";
const CNI_CONFIG_DIR_NAME: &str = "config";

/// Where everything we install ends up
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct InstallLayout {
    pub(crate) install_dir: PathBuf,
    pub(crate) cni_install_dir: PathBuf,
    pub(crate) cni_config_install_path: PathBuf,
}

impl InstallLayout {
    pub(crate) fn new(install_dir: impl Into<PathBuf>) -> Self {
        let install_dir = install_dir.into();
        let cni_install_dir = install_dir.join(CNI_DIR_NAME);
        let cni_config_install_path = cni_install_dir.join(CNI_CONFIG_DIR_NAME);

        Self {
            install_dir,
            cni_install_dir,
            cni_config_install_path,
        }
    }
}

/// State of a single bootstrap or CNI reconfiguration run. The kubelet arguments accumulate over
/// the run (unit flags, then the cloud config, then CNI) and are thrown away with it.
#[derive(Debug)]
pub(crate) struct WinNodeBootstrapper {
    pub(crate) layout: InstallLayout,
    pub(crate) kubelet_args: KubeletArgs,
    pub(crate) ignition_file: Option<PathBuf>,
    pub(crate) kubelet_path: Option<PathBuf>,
    pub(crate) cni_path: Option<PathBuf>,
    pub(crate) cni_config: Option<PathBuf>,
}

impl WinNodeBootstrapper {
    pub(crate) fn new(install_dir: impl Into<PathBuf>) -> Self {
        Self {
            layout: InstallLayout::new(install_dir),
            kubelet_args: KubeletArgs::new(),
            ignition_file: None,
            kubelet_path: None,
            cni_path: None,
            cni_config: None,
        }
    }

    pub(crate) fn from_config(config: &WmcbConfig) -> Self {
        let mut bootstrapper = Self::new(&config.install_dir);

        match &config.command {
            WmcbCommand::InitializeKubelet {
                ignition_file,
                kubelet_path,
            } => {
                bootstrapper.ignition_file = Some(ignition_file.to_path_buf());
                bootstrapper.kubelet_path = Some(kubelet_path.to_path_buf());
            }
            WmcbCommand::ConfigureCni { cni_path, cni_config } => {
                bootstrapper.cni_path = Some(cni_path.clone());
                bootstrapper.cni_config = Some(cni_config.clone());
            }
        }

        bootstrapper
    }

    pub(crate) async fn run(&mut self, command: &WmcbCommand, services: &dyn ServiceManager) -> Result<()> {
        match command {
            WmcbCommand::InitializeKubelet { .. } => self.initialize_kubelet(services).await.context("initializing kubelet"),
            WmcbCommand::ConfigureCni { .. } => self.configure_cni(services).await.context("configuring CNI"),
        }
    }

    /// Installs the kubelet binary and its configuration from the ignition and registers it as a
    /// service, or points the existing service at the new configuration
    pub(crate) async fn initialize_kubelet(&mut self, services: &dyn ServiceManager) -> Result<()> {
        self.check_kubelet_inputs()?;

        // A malformed ignition must not leave a stopped kubelet behind
        let ignition_file = self.ignition_file.clone().context("no ignition file")?;
        let ignition_contents = std::fs::read(&ignition_file).context(format!("reading ignition file {}", ignition_file.display()))?;
        let ignition = Ignition::parse(&ignition_contents).context(format!("parsing ignition file {}", ignition_file.display()))?;

        let service_exists = services.get(KUBELET_SERVICE_NAME).await?.is_some();

        // The binary can't be replaced while the service is running it
        if service_exists {
            service::stop_and_wait(services, KUBELET_SERVICE_NAME).await?;
        }

        self.copy_kubelet_binary()?;

        self.apply_ignition(&ignition, standard_rules())?;

        let start_command = self.kubelet_start_command();

        if service_exists {
            service::apply_start_command(services, KUBELET_SERVICE_NAME, &start_command).await?;
        } else {
            services
                .create(
                    KUBELET_SERVICE_NAME,
                    &start_command,
                    KUBELET_SERVICE_DESCRIPTION,
                    &KUBELET_SERVICE_DEPENDENCIES,
                )
                .await
                .context("creating kubelet service")?;
            services.start(KUBELET_SERVICE_NAME).await.context("starting kubelet service")?;
        }

        log::info!("kubelet service running with: {start_command}");

        Ok(())
    }

    /// Installs the CNI plugins and points the existing kubelet service at them
    pub(crate) async fn configure_cni(&mut self, services: &dyn ServiceManager) -> Result<()> {
        let start_command = services
            .get(KUBELET_SERVICE_NAME)
            .await?
            .ok_or_else(|| BootstrapError::ServicePrecondition(KUBELET_SERVICE_NAME.to_string()))?;

        self.check_cni_inputs()?;
        self.ensure_cni_dir_is_present()?;
        self.copy_cni_files()?;

        let start_command = self.update_kubelet_args_for_cni(&start_command);

        service::apply_start_command(services, KUBELET_SERVICE_NAME, &start_command).await?;

        log::info!("kubelet service running with: {start_command}");

        Ok(())
    }

    #[context("checking kubelet inputs")]
    fn check_kubelet_inputs(&self) -> Result<()> {
        for (description, path) in [("ignition file", &self.ignition_file), ("kubelet binary", &self.kubelet_path)] {
            let path = path.as_deref().context(format!("no {description} given"))?;
            ensure!(path.is_file(), "{description} {} is not a file", path.display());
        }

        let install_dir = &self.layout.install_dir;
        std::fs::create_dir_all(install_dir).with_context(|| BootstrapError::DirCreation(install_dir.display().to_string()))?;

        Ok(())
    }

    fn copy_kubelet_binary(&self) -> Result<()> {
        let kubelet_path = self.kubelet_path.as_deref().context("no kubelet binary")?;
        let destination = self.layout.install_dir.join(KUBELET_EXE_FILE_NAME);

        std::fs::copy(kubelet_path, &destination).with_context(|| {
            BootstrapError::Copy(format!(
                "error copying kubelet binary {} to {}",
                kubelet_path.display(),
                destination.display()
            ))
        })?;

        Ok(())
    }

    /// The kubelet service command line: fixed Windows flags followed by the accumulated
    /// kubelet arguments
    pub(crate) fn kubelet_start_command(&self) -> String {
        let install_file = |file_name: &str| windows_path_join(&self.layout.install_dir, file_name);

        let mut command = [
            quote(&install_file(KUBELET_EXE_FILE_NAME)),
            render_flag("config", &install_file(KUBELET_CONF_FILE_NAME)),
            render_flag("bootstrap-kubeconfig", &install_file(BOOTSTRAP_KUBECONFIG_FILE_NAME)),
            render_flag("kubeconfig", &install_file(KUBECONFIG_FILE_NAME)),
            render_flag("pod-infra-container-image", PAUSE_CONTAINER_IMAGE),
            render_flag("cert-dir", KUBELET_CERT_DIR),
            "--windows-service".to_string(),
            "--logtostderr=false".to_string(),
            render_flag("log-file", &install_file(KUBELET_LOG_FILE_NAME)),
            render_flag("register-with-taints", NODE_TAINTS),
            render_flag("node-labels", NODE_LABELS),
        ]
        .join(" ");

        if !self.kubelet_args.is_empty() {
            command.push(' ');
            command.push_str(&self.kubelet_args.render());
        }

        command
    }
}

pub(crate) fn default_install_dir() -> &'static Path {
    Path::new(r"C:\k")
}
