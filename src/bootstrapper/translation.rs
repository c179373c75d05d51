use super::{
    cloud_config::{self, CLOUD_CONFIG_ARG, CLOUD_CONF_FILE_NAME},
    kubelet_config, WinNodeBootstrapper,
};
use crate::{error::BootstrapError, file_utils};
use anyhow::{Context, Result};
use std::collections::BTreeMap;

/// A transformation applied to a decoded ignition file before it's written to the install
/// directory. It gets the bootstrapper so it can make install-dir relative decisions and record
/// kubelet arguments.
pub(crate) type TranslationFn = fn(&mut WinNodeBootstrapper, Vec<u8>) -> Result<Vec<u8>>;

#[derive(Clone, Copy, Debug)]
pub(crate) enum Transform {
    KubeletConfig,
    CloudConfig,
    Custom(TranslationFn),
}

impl Transform {
    pub(crate) fn translation_fn(self) -> TranslationFn {
        match self {
            Transform::KubeletConfig => translate_kubelet_config,
            Transform::CloudConfig => translate_cloud_config,
            Transform::Custom(translation_fn) => translation_fn,
        }
    }
}

#[derive(Clone, Debug)]
pub(crate) struct TranslationRule {
    /// Destination file name, relative to the install directory
    pub(crate) target: String,
    pub(crate) transform: Option<Transform>,
}

impl TranslationRule {
    pub(crate) fn new(target: &str, transform: Option<Transform>) -> Self {
        Self {
            target: target.to_string(),
            transform,
        }
    }
}

/// Ignition file path to the rule that applies to it
pub(crate) type TranslationRules = BTreeMap<String, TranslationRule>;

pub(crate) const KUBELET_CONF_IGNITION_PATH: &str = "/etc/kubernetes/kubelet.conf";
pub(crate) const KUBELET_CA_IGNITION_PATH: &str = "/etc/kubernetes/kubelet-ca.crt";
pub(crate) const BOOTSTRAP_KUBECONFIG_IGNITION_PATH: &str = "/etc/kubernetes/kubeconfig";
pub(crate) const CLOUD_CONF_IGNITION_PATH: &str = "/etc/kubernetes/cloud.conf";

pub(crate) const KUBELET_CONF_FILE_NAME: &str = "kubelet.conf";
pub(crate) const KUBELET_CA_FILE_NAME: &str = "kubelet-ca.crt";
pub(crate) const BOOTSTRAP_KUBECONFIG_FILE_NAME: &str = "bootstrap-kubeconfig";

/// The ignition files a Windows worker needs, and how to make them usable on Windows
pub(crate) fn standard_rules() -> TranslationRules {
    TranslationRules::from([
        (
            KUBELET_CONF_IGNITION_PATH.to_string(),
            TranslationRule::new(KUBELET_CONF_FILE_NAME, Some(Transform::KubeletConfig)),
        ),
        (
            KUBELET_CA_IGNITION_PATH.to_string(),
            TranslationRule::new(KUBELET_CA_FILE_NAME, None),
        ),
        (
            BOOTSTRAP_KUBECONFIG_IGNITION_PATH.to_string(),
            TranslationRule::new(BOOTSTRAP_KUBECONFIG_FILE_NAME, None),
        ),
        (
            CLOUD_CONF_IGNITION_PATH.to_string(),
            TranslationRule::new(CLOUD_CONF_FILE_NAME, Some(Transform::CloudConfig)),
        ),
    ])
}

impl WinNodeBootstrapper {
    /// Decodes an ignition file source and runs the optional transformation over it
    pub(crate) fn translate_file(&mut self, source: &str, transform: Option<TranslationFn>) -> Result<Vec<u8>> {
        let decoded = file_utils::decode_data_url(source)?;

        match transform {
            Some(transform) => {
                transform(self, decoded).context(BootstrapError::Translation("decoded file contents".to_string()))
            }
            None => Ok(decoded),
        }
    }
}

fn translate_kubelet_config(bootstrapper: &mut WinNodeBootstrapper, contents: Vec<u8>) -> Result<Vec<u8>> {
    kubelet_config::prep_kubelet_conf_for_windows(&bootstrapper.layout.install_dir, &contents)
}

fn translate_cloud_config(bootstrapper: &mut WinNodeBootstrapper, contents: Vec<u8>) -> Result<Vec<u8>> {
    let rendered = cloud_config::render_cloud_config(&contents)?;

    bootstrapper.kubelet_args.insert(
        CLOUD_CONFIG_ARG,
        bootstrapper.layout.install_dir.join(CLOUD_CONF_FILE_NAME).display().to_string(),
    );

    Ok(rendered)
}

#[cfg(test)]
mod tests {
    use super::*;

    const CERT_SOURCE: &str = "data:,-----BEGIN%20CERTIFICATE-----%0AMIIDEDCCAfigAwIBAgIIKH9ePWRYTs9wDQYJKoZIhvcNAQELBQAwJjESMBAGA1UE%0A%2Fy73wzKEMtWPjNA%2BJaJdNf4n7Mh57fwO9IMrmMQWZP7d%2B8kFMnfQygXPopqFQR%0A-----END%20CERTIFICATE-----";

    const CERT: &str = "-----BEGIN CERTIFICATE-----
MIIDEDCCAfigAwIBAgIIKH9ePWRYTs9wDQYJKoZIhvcNAQELBQAwJjESMBAGA1UE
/y73wzKEMtWPjNA+JaJdNf4n7Mh57fwO9IMrmMQWZP7d+8kFMnfQygXPopqFQR
-----END CERTIFICATE-----";

    fn suffix(_: &mut WinNodeBootstrapper, contents: Vec<u8>) -> Result<Vec<u8>> {
        Ok([contents, b"suffix".to_vec()].concat())
    }

    fn identity(_: &mut WinNodeBootstrapper, contents: Vec<u8>) -> Result<Vec<u8>> {
        Ok(contents)
    }

    fn failing(_: &mut WinNodeBootstrapper, _: Vec<u8>) -> Result<Vec<u8>> {
        anyhow::bail!("transform failed")
    }

    #[test]
    fn test_translate_file_without_transform() -> Result<()> {
        let mut bootstrapper = WinNodeBootstrapper::new("tmp");

        assert_eq!(bootstrapper.translate_file(CERT_SOURCE, None)?, CERT.as_bytes());

        Ok(())
    }

    #[test]
    fn test_translate_file_with_transform() -> Result<()> {
        let mut bootstrapper = WinNodeBootstrapper::new("tmp");

        assert_eq!(
            String::from_utf8(bootstrapper.translate_file(CERT_SOURCE, Some(suffix))?)?,
            format!("{CERT}suffix")
        );

        assert_eq!(
            bootstrapper.translate_file(CERT_SOURCE, Some(identity))?,
            file_utils::decode_data_url(CERT_SOURCE)?
        );

        Ok(())
    }

    #[test]
    fn test_translate_file_wraps_transform_errors() {
        let mut bootstrapper = WinNodeBootstrapper::new("tmp");

        let err = bootstrapper.translate_file(CERT_SOURCE, Some(failing)).unwrap_err();
        assert!(matches!(err.downcast_ref::<BootstrapError>(), Some(BootstrapError::Translation(_))));
        assert!(format!("{err:#}").contains("transform failed"));

        let err = bootstrapper.translate_file("data:,%G0", Some(suffix)).unwrap_err();
        assert!(matches!(err.downcast_ref::<BootstrapError>(), Some(BootstrapError::Decode(_))));
    }

    #[test]
    fn test_cloud_config_transform_records_kubelet_arg() -> Result<()> {
        let mut bootstrapper = WinNodeBootstrapper::new("install");

        let rendered = bootstrapper.translate_file(
            &file_utils::dataurl_encode(br#"{"cloud": "AzurePublicCloud", "location": "centralus"}"#),
            Some(Transform::CloudConfig.translation_fn()),
        )?;

        assert_eq!(rendered, b"{\n\tcloud: AzurePublicCloud,\n\tlocation: centralus\n}");
        assert_eq!(
            bootstrapper.kubelet_args.get(CLOUD_CONFIG_ARG),
            Some(std::path::Path::new("install").join("cloud.conf").display().to_string().as_str())
        );

        Ok(())
    }

    #[test]
    fn test_standard_rules() {
        let rules = standard_rules();

        assert_eq!(rules.len(), 4);
        assert!(matches!(
            rules[KUBELET_CONF_IGNITION_PATH].transform,
            Some(Transform::KubeletConfig)
        ));
        assert!(matches!(rules[CLOUD_CONF_IGNITION_PATH].transform, Some(Transform::CloudConfig)));
        assert!(rules[KUBELET_CA_IGNITION_PATH].transform.is_none());
        assert_eq!(rules[BOOTSTRAP_KUBECONFIG_IGNITION_PATH].target, "bootstrap-kubeconfig");
    }
}
