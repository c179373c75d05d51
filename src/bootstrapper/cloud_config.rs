use crate::error::BootstrapError;
use anyhow::Result;
use itertools::Itertools;
use serde_json::{Map, Value};

pub(crate) const CLOUD_CONF_FILE_NAME: &str = "cloud.conf";
pub(crate) const CLOUD_CONFIG_ARG: &str = "cloud-config";

/// Parses the cloud provider configuration embedded in the ignition (a JSON object) and renders
/// it in the brace-delimited `key: value` form the in-tree cloud provider reads on Windows
pub(crate) fn render_cloud_config(input: &[u8]) -> Result<Vec<u8>> {
    let config: Map<String, Value> = serde_json::from_slice(input)
        .map_err(|err| BootstrapError::DocumentParse(format!("cloud config is not a JSON object: {err}")))?;

    if config.is_empty() {
        return Ok(b"{\n}".to_vec());
    }

    Ok(format!(
        "{{\n\t{}\n}}",
        config.iter().map(|(key, value)| format!("{key}: {}", render_value(value))).join(",\n\t")
    )
    .into_bytes())
}

fn render_value(value: &Value) -> String {
    match value {
        Value::String(value) => value.clone(),
        value => value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_cloud_config_keeps_source_order() -> Result<()> {
        let input = r#"{
	"cloud": "AzurePublicCloud",
	"useManagedIdentityExtension": true,
	"resourceGroup": "winc-test-rg",
	"cloudProviderBackoffDuration": 6,
	"excludeMasterFromStandardLB": null,
	"zones": ["1", "2"]
}"#;

        assert_eq!(
            String::from_utf8(render_cloud_config(input.as_bytes())?)?,
            "{\n\tcloud: AzurePublicCloud,\n\tuseManagedIdentityExtension: true,\n\tresourceGroup: winc-test-rg,\n\tcloudProviderBackoffDuration: 6,\n\texcludeMasterFromStandardLB: null,\n\tzones: [\"1\",\"2\"]\n}"
        );

        Ok(())
    }

    #[test]
    fn test_render_cloud_config_empty() -> Result<()> {
        assert_eq!(render_cloud_config(b"{}")?, b"{\n}");

        Ok(())
    }

    #[test]
    fn test_render_cloud_config_rejects_non_objects() {
        for input in ["not needed", "[]", "\"cloud\""] {
            let err = render_cloud_config(input.as_bytes()).unwrap_err();

            assert!(matches!(err.downcast_ref::<BootstrapError>(), Some(BootstrapError::DocumentParse(_))));
        }
    }
}
