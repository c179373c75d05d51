use super::{
    cloud_config::{CLOUD_CONFIG_ARG, CLOUD_CONF_FILE_NAME},
    kubelet_args,
    translation::{Transform, TranslationRule, TranslationRules},
    WinNodeBootstrapper, KUBELET_SYSTEMD_UNIT_NAME,
};
use crate::{error::BootstrapError, file_utils};
use anyhow::{bail, ensure, Context, Result};
use fn_error_context::context;
use serde::Deserialize;
use std::{collections::BTreeSet, path::Path};

/// Kubelet unit flags that mean the same thing on Windows and get carried over as is
const PORTABLE_UNIT_FLAGS: [&str; 2] = ["cloud-provider", "v"];

/// The subset of an ignition config we consume. Everything else (users, networkd, ignition
/// metadata) is ignored.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct Ignition {
    pub(crate) storage: Storage,
    pub(crate) systemd: Systemd,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct Storage {
    pub(crate) files: Vec<FileEntry>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct FileEntry {
    pub(crate) path: String,
    #[serde(default)]
    pub(crate) filesystem: String,
    #[serde(default)]
    pub(crate) contents: FileContents,
    #[serde(default)]
    pub(crate) mode: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct FileContents {
    #[serde(default)]
    pub(crate) source: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct Systemd {
    pub(crate) units: Vec<UnitEntry>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct UnitEntry {
    pub(crate) name: String,
    #[serde(default)]
    pub(crate) enabled: Option<bool>,
    #[serde(default)]
    pub(crate) contents: String,
}

impl Ignition {
    pub(crate) fn parse(contents: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(contents).map_err(|err| BootstrapError::DocumentParse(format!("ignition: {err}")))?)
    }

    fn kubelet_unit(&self) -> Option<&UnitEntry> {
        self.systemd.units.iter().find(|unit| unit.name == KUBELET_SYSTEMD_UNIT_NAME)
    }
}

impl WinNodeBootstrapper {
    #[cfg(test)]
    #[context("parsing ignition file contents")]
    pub(crate) fn parse_ignition_file_contents(&mut self, contents: &[u8], rules: TranslationRules) -> Result<()> {
        self.apply_ignition(&Ignition::parse(contents)?, rules)
    }

    /// Walks the ignition document: picks up the kubelet arguments declared by the kubelet unit,
    /// then writes every file matched by `rules` into the install directory. Cloud configs
    /// the unit doesn't declare are skipped.
    #[context("applying ignition")]
    pub(crate) fn apply_ignition(&mut self, ignition: &Ignition, mut rules: TranslationRules) -> Result<()> {
        let kubelet_unit = ignition.kubelet_unit();
        let declared_cloud_configs = match kubelet_unit {
            Some(unit) => self.parse_kubelet_unit(unit, &mut rules)?,
            None => {
                log::warn!("no {} unit found in ignition", KUBELET_SYSTEMD_UNIT_NAME);
                BTreeSet::new()
            }
        };

        for file in &ignition.storage.files {
            let Some(rule) = rules.get(&file.path) else {
                log::debug!("ignoring ignition file {} on {} filesystem", file.path, file.filesystem);
                continue;
            };

            if matches!(rule.transform, Some(Transform::CloudConfig)) {
                if kubelet_unit.is_none() {
                    bail!(BootstrapError::InvalidArgument(format!(
                        "{} is embedded but there is no {} unit declaring --{}",
                        file.path, KUBELET_SYSTEMD_UNIT_NAME, CLOUD_CONFIG_ARG
                    )));
                }

                if !declared_cloud_configs.contains(&file.path) {
                    log::warn!(
                        "ignoring embedded cloud config {}, {} does not declare it with --{}",
                        file.path,
                        KUBELET_SYSTEMD_UNIT_NAME,
                        CLOUD_CONFIG_ARG
                    );
                    continue;
                }
            }

            let translated = self
                .translate_file(&file.contents.source, rule.transform.map(Transform::translation_fn))
                .with_context(|| format!("translating ignition file {}", file.path))?;

            let destination = self.layout.install_dir.join(&rule.target);
            file_utils::commit_file(&destination, translated, file.mode)
                .with_context(|| format!("writing {}", destination.display()))?;

            log::info!("wrote {} from ignition file {}", destination.display(), file.path);
        }

        Ok(())
    }

    /// Carries the portable unit flags over and returns the cloud config paths the unit declares
    fn parse_kubelet_unit(&mut self, unit: &UnitEntry, rules: &mut TranslationRules) -> Result<BTreeSet<String>> {
        if unit.enabled == Some(false) {
            log::warn!("{} is disabled in ignition, its arguments are used regardless", unit.name);
        }

        let flags = kubelet_args::unit_flags(&unit.contents)
            .context(BootstrapError::DocumentParse(format!("{} has no ExecStart command", unit.name)))?;

        let mut declared_cloud_configs = BTreeSet::new();

        for (flag, value) in flags {
            if PORTABLE_UNIT_FLAGS.contains(&flag.as_str()) {
                self.kubelet_args.insert(flag, value);
            } else if flag == CLOUD_CONFIG_ARG {
                ensure!(
                    Path::new(&value).file_name().is_some_and(|file_name| !file_name.is_empty()),
                    BootstrapError::InvalidArgument(format!("could not get cloud config filename from --{CLOUD_CONFIG_ARG}={value}"))
                );

                // The cloud config ends up in the install directory, the path the unit declares
                // only tells us where to find it in the ignition
                rules
                    .entry(value.clone())
                    .or_insert_with(|| TranslationRule::new(CLOUD_CONF_FILE_NAME, Some(Transform::CloudConfig)));

                declared_cloud_configs.insert(value);
            }
        }

        Ok(declared_cloud_configs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bootstrapper::translation::{self, KUBELET_CA_FILE_NAME};

    const CLOUD_CONF_SOURCE: &str = "data:,%7B%0A%09%22cloud%22%3A%20%22AzurePublicCloud%22%2C%0A%09%22tenantId%22%3A%20%221234a1b2-a1bc-123a-123a-ab1c2de3afgh%22%2C%0A%09%22aadClientId%22%3A%20%22%22%2C%0A%09%22aadClientSecret%22%3A%20%22%22%2C%0A%09%22aadClientCertPath%22%3A%20%22%22%2C%0A%09%22aadClientCertPassword%22%3A%20%22%22%2C%0A%09%22useManagedIdentityExtension%22%3A%20true%2C%0A%09%22userAssignedIdentityID%22%3A%20%22%22%2C%0A%09%22subscriptionId%22%3A%20%221a123456-12ab-123a-1234-abc1d1ab01c0%22%2C%0A%09%22resourceGroup%22%3A%20%22winc-test-rg%22%2C%0A%09%22location%22%3A%20%22centralus%22%2C%0A%09%22vnetName%22%3A%20%22winc-test-vnet%22%2C%0A%09%22vnetResourceGroup%22%3A%20%22winc-test-rg%22%2C%0A%09%22subnetName%22%3A%20%22winc-test-node-subnet%22%2C%0A%09%22securityGroupName%22%3A%20%22winc-test-node-nsg%22%2C%0A%09%22routeTableName%22%3A%20%22winc-test-node-routetable%22%2C%0A%09%22primaryAvailabilitySetName%22%3A%20%22%22%2C%0A%09%22vmType%22%3A%20%22%22%2C%0A%09%22primaryScaleSetName%22%3A%20%22%22%2C%0A%09%22cloudProviderBackoff%22%3A%20true%2C%0A%09%22cloudProviderBackoffRetries%22%3A%200%2C%0A%09%22cloudProviderBackoffExponent%22%3A%200%2C%0A%09%22cloudProviderBackoffDuration%22%3A%206%2C%0A%09%22cloudProviderBackoffJitter%22%3A%200%2C%0A%09%22cloudProviderRateLimit%22%3A%20true%2C%0A%09%22cloudProviderRateLimitQPS%22%3A%206%2C%0A%09%22cloudProviderRateLimitBucket%22%3A%2010%2C%0A%09%22cloudProviderRateLimitQPSWrite%22%3A%206%2C%0A%09%22cloudProviderRateLimitBucketWrite%22%3A%2010%2C%0A%09%22useInstanceMetadata%22%3A%20true%2C%0A%09%22loadBalancerSku%22%3A%20%22standard%22%2C%0A%09%22excludeMasterFromStandardLB%22%3A%20null%2C%0A%09%22disableOutboundSNAT%22%3A%20null%2C%0A%09%22maximumLoadBalancerRuleCount%22%3A%200%0A%7D";

    fn kubelet_unit(cloud_provider: &str, cloud_config: Option<&str>) -> String {
        let cloud_config = cloud_config
            .map(|cloud_config| format!("      --cloud-config={cloud_config} \\\n"))
            .unwrap_or_default();

        format!("[Unit]\nDescription=Kubernetes Kubelet\nWants=rpc-statd.service crio.service\nAfter=crio.service\n\n[Service]\nType=notify\nExecStartPre=/bin/mkdir --parents /etc/kubernetes/manifests\nExecStartPre=/bin/rm -f /var/lib/kubelet/cpu_manager_state\nEnvironmentFile=/etc/os-release\nEnvironmentFile=-/etc/kubernetes/kubelet-workaround\nEnvironmentFile=-/etc/kubernetes/kubelet-env\n\nExecStart=/usr/bin/hyperkube \\\n    kubelet \\\n      --config=/etc/kubernetes/kubelet.conf \\\n      --bootstrap-kubeconfig=/etc/kubernetes/kubeconfig \\\n      --kubeconfig=/var/lib/kubelet/kubeconfig \\\n      --container-runtime=remote \\\n      --container-runtime-endpoint=/var/run/crio/crio.sock \\\n      --node-labels=node-role.kubernetes.io/worker,node.openshift.io/os_id=${{ID}} \\\n      --minimum-container-ttl-duration=6m0s \\\n      --volume-plugin-dir=/etc/kubernetes/kubelet-plugins/volume/exec \\\n      --cloud-provider={cloud_provider} \\\n{cloud_config}      --v=3\n\nRestart=always\nRestartSec=10\n\n[Install]\nWantedBy=multi-user.target\n")
    }

    fn ignition(files: serde_json::Value, units: serde_json::Value) -> Vec<u8> {
        serde_json::json!({
            "ignition": {"config": {}, "security": {"tls": {}}, "timeouts": {}, "version": "2.2.0"},
            "networkd": {},
            "passwd": {"users": [{"name": "core", "sshAuthorizedKeys": ["ssh-rsa dummy"]}]},
            "storage": {"files": files},
            "systemd": {"units": units},
        })
        .to_string()
        .into_bytes()
    }

    fn file(path: &str, source: &str) -> serde_json::Value {
        serde_json::json!({"filesystem": "root", "path": path, "contents": {"source": source, "verification": {}}, "mode": 420})
    }

    fn unit(contents: &str) -> serde_json::Value {
        serde_json::json!([{"contents": contents, "enabled": true, "name": "kubelet.service"}])
    }

    #[test]
    fn test_cloud_conf_extraction() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut bootstrapper = WinNodeBootstrapper::new(dir.path());

        let contents = ignition(
            serde_json::json!([file("/etc/kubernetes/cloud.conf", CLOUD_CONF_SOURCE)]),
            unit(&kubelet_unit("azure", Some("/etc/kubernetes/cloud.conf"))),
        );

        bootstrapper.parse_ignition_file_contents(&contents, TranslationRules::new())?;

        let cloud_conf = std::fs::read_to_string(dir.path().join("cloud.conf")).context("cloud.conf was not created")?;
        assert!(cloud_conf.starts_with('{'));
        assert!(cloud_conf.ends_with('}'));

        let entries = cloud_conf
            .trim_start_matches("{\n\t")
            .trim_end_matches("\n}")
            .split(",\n\t")
            .map(|entry| entry.split_once(": ").context("entry is not a key value pair"))
            .collect::<Result<Vec<_>>>()?;

        for expected in [
            ("cloud", "AzurePublicCloud"),
            ("tenantId", "1234a1b2-a1bc-123a-123a-ab1c2de3afgh"),
            ("subscriptionId", "1a123456-12ab-123a-1234-abc1d1ab01c0"),
            ("resourceGroup", "winc-test-rg"),
            ("location", "centralus"),
            ("vnetName", "winc-test-vnet"),
            ("vnetResourceGroup", "winc-test-rg"),
            ("subnetName", "winc-test-node-subnet"),
            ("securityGroupName", "winc-test-node-nsg"),
            ("routeTableName", "winc-test-node-routetable"),
        ] {
            assert!(entries.contains(&expected), "missing {expected:?} in {cloud_conf}");
        }
        assert!(cloud_conf.contains("\tresourceGroup: winc-test-rg,\n"));
        assert_eq!(entries.len(), 34);

        assert_eq!(
            bootstrapper.kubelet_args.get(CLOUD_CONFIG_ARG),
            Some(dir.path().join("cloud.conf").display().to_string().as_str())
        );
        assert_eq!(bootstrapper.kubelet_args.get("cloud-provider"), Some("azure"));
        assert_eq!(bootstrapper.kubelet_args.get("v"), Some("3"));
        assert_eq!(bootstrapper.kubelet_args.get("container-runtime-endpoint"), None);

        Ok(())
    }

    #[test]
    fn test_cloud_conf_extraction_through_standard_rules() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut bootstrapper = WinNodeBootstrapper::new(dir.path());

        let contents = ignition(
            serde_json::json!([
                file("/etc/kubernetes/cloud.conf", CLOUD_CONF_SOURCE),
                file("/etc/kubernetes/kubelet-ca.crt", "data:,ca%20bundle"),
                file("/etc/containers/registries.conf", "data:,ignored"),
            ]),
            unit(&kubelet_unit("azure", Some("/etc/kubernetes/cloud.conf"))),
        );

        bootstrapper.parse_ignition_file_contents(&contents, translation::standard_rules())?;

        assert!(dir.path().join("cloud.conf").exists());
        assert_eq!(std::fs::read_to_string(dir.path().join(KUBELET_CA_FILE_NAME))?, "ca bundle");
        assert!(!dir.path().join("registries.conf").exists());
        assert!(bootstrapper.kubelet_args.get(CLOUD_CONFIG_ARG).is_some());

        Ok(())
    }

    #[test]
    fn test_cloud_conf_not_declared_by_unit() -> Result<()> {
        for cloud_config in [None, Some("/etc/kubernetes/other-cloud.conf")] {
            let dir = tempfile::tempdir()?;
            let mut bootstrapper = WinNodeBootstrapper::new(dir.path());

            let contents = ignition(
                serde_json::json!([file("/etc/kubernetes/cloud.conf", CLOUD_CONF_SOURCE)]),
                unit(&kubelet_unit("aws", cloud_config)),
            );

            bootstrapper.parse_ignition_file_contents(&contents, translation::standard_rules())?;

            assert!(!dir.path().join("cloud.conf").exists(), "cloud.conf was created for {cloud_config:?}");
            assert_eq!(bootstrapper.kubelet_args.get(CLOUD_CONFIG_ARG), None);
            assert_eq!(bootstrapper.kubelet_args.get("cloud-provider"), Some("aws"));
        }

        Ok(())
    }

    #[test]
    fn test_cloud_conf_not_present() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut bootstrapper = WinNodeBootstrapper::new(dir.path());

        let contents = ignition(serde_json::json!([]), unit(&kubelet_unit("aws", None)));

        bootstrapper.parse_ignition_file_contents(&contents, translation::standard_rules())?;

        assert!(!dir.path().join("cloud.conf").exists(), "cloud.conf was created");
        assert_eq!(bootstrapper.kubelet_args.get(CLOUD_CONFIG_ARG), None);
        assert_eq!(bootstrapper.kubelet_args.get("cloud-provider"), Some("aws"));

        Ok(())
    }

    #[test]
    fn test_cloud_conf_declared_but_not_embedded() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut bootstrapper = WinNodeBootstrapper::new(dir.path());

        let contents = ignition(
            serde_json::json!([]),
            unit(&kubelet_unit("azure", Some("/etc/kubernetes/cloud.conf"))),
        );

        bootstrapper.parse_ignition_file_contents(&contents, TranslationRules::new())?;

        assert!(!dir.path().join("cloud.conf").exists());
        assert_eq!(bootstrapper.kubelet_args.get(CLOUD_CONFIG_ARG), None);

        Ok(())
    }

    #[test]
    fn test_cloud_conf_invalid_names() -> Result<()> {
        let dir = tempfile::tempdir()?;

        for invalid in ["/", "/etc/kubernetes/..", "."] {
            let mut bootstrapper = WinNodeBootstrapper::new(dir.path());

            let contents = ignition(
                serde_json::json!([file("/etc/kubernetes/cloud.conf", "data:,not needed")]),
                unit(&kubelet_unit("azure", Some(invalid))),
            );

            let err = bootstrapper
                .parse_ignition_file_contents(&contents, TranslationRules::new())
                .unwrap_err();

            assert!(
                matches!(err.downcast_ref::<BootstrapError>(), Some(BootstrapError::InvalidArgument(_))),
                "unexpected error for {invalid}: {err:#}"
            );
            assert!(format!("{err:#}").contains("could not get cloud config filename"));
        }

        assert!(!dir.path().join("cloud.conf").exists());

        Ok(())
    }

    #[test]
    fn test_cloud_conf_requires_kubelet_unit() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut bootstrapper = WinNodeBootstrapper::new(dir.path());

        let contents = ignition(
            serde_json::json!([file("/etc/kubernetes/cloud.conf", CLOUD_CONF_SOURCE)]),
            serde_json::json!([]),
        );

        let err = bootstrapper
            .parse_ignition_file_contents(&contents, translation::standard_rules())
            .unwrap_err();

        assert!(matches!(err.downcast_ref::<BootstrapError>(), Some(BootstrapError::InvalidArgument(_))));

        Ok(())
    }

    #[test]
    fn test_missing_kubelet_unit_is_tolerated_without_cloud_conf() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut bootstrapper = WinNodeBootstrapper::new(dir.path());

        let contents = ignition(
            serde_json::json!([file("/etc/kubernetes/kubeconfig", "data:,apiVersion%3A%20v1")]),
            serde_json::json!([]),
        );

        bootstrapper.parse_ignition_file_contents(&contents, translation::standard_rules())?;

        assert_eq!(std::fs::read_to_string(dir.path().join("bootstrap-kubeconfig"))?, "apiVersion: v1");
        assert!(bootstrapper.kubelet_args.is_empty());

        Ok(())
    }

    #[test]
    fn test_malformed_ignition() {
        let mut bootstrapper = WinNodeBootstrapper::new("unused");

        let inputs: [&[u8]; 2] = [b"{", br#"{"storage": {"files": "nope"}}"#];

        for contents in inputs {
            let err = bootstrapper
                .parse_ignition_file_contents(contents, TranslationRules::new())
                .unwrap_err();

            assert!(matches!(err.downcast_ref::<BootstrapError>(), Some(BootstrapError::DocumentParse(_))));
        }
    }
}
