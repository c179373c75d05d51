use crate::error::BootstrapError;
use anyhow::{Context, Result};
use fn_error_context::context;
use serde_json::{Map, Value};
use std::path::Path;

const CLIENT_CA_FILE_POINTER: &str = "/authentication/x509/clientCAFile";
const CGROUP_DRIVER: &str = "cgroupDriver";
const CGROUPS_PER_QOS: &str = "cgroupsPerQOS";
const VOLUME_STATS_AGG_PERIOD: &str = "volumeStatsAggPeriod";
const ENFORCE_NODE_ALLOCATABLE: &str = "enforceNodeAllocatable";

/// Rewrites a Linux worker kubelet configuration so that the Windows kubelet accepts it.
///
/// serde_json is built with preserve_order, so the document keeps its original key order and the
/// output is reproducible byte for byte. Re-running on already rewritten input is a no-op.
#[context("preparing kubelet configuration for windows")]
pub(crate) fn prep_kubelet_conf_for_windows(install_dir: &Path, input: &[u8]) -> Result<Vec<u8>> {
    let config: Value =
        serde_json::from_slice(input).map_err(|err| BootstrapError::ConfigRewrite(format!("kubelet configuration is not valid JSON: {err}")))?;

    let Value::Object(config) = config else {
        return Err(BootstrapError::ConfigRewrite("kubelet configuration is not a JSON object".to_string()).into());
    };

    let mut config = rewrite_cgroups(config)?;

    rewrite_client_ca_file(&mut config, install_dir)?;

    serde_json::to_vec(&config).context("serializing kubelet configuration")
}

fn rewrite_cgroups(config: Map<String, Value>) -> Result<Value> {
    for required in [CGROUP_DRIVER, VOLUME_STATS_AGG_PERIOD] {
        if !config.contains_key(required) {
            return Err(BootstrapError::ConfigRewrite(format!("missing {required}")).into());
        }
    }

    // Rebuild the object instead of inserting in place, the map has no positional insert
    let mut rewritten = Map::with_capacity(config.len() + 2);
    for (key, value) in config {
        match key.as_str() {
            CGROUPS_PER_QOS | ENFORCE_NODE_ALLOCATABLE => continue,
            CGROUP_DRIVER => {
                rewritten.insert(key, Value::String("cgroupfs".to_string()));
            }
            VOLUME_STATS_AGG_PERIOD => {
                rewritten.insert(key, value);
                rewritten.insert(CGROUPS_PER_QOS.to_string(), Value::Bool(false));
            }
            _ => {
                rewritten.insert(key, value);
            }
        }
    }
    rewritten.insert(ENFORCE_NODE_ALLOCATABLE.to_string(), Value::Array(vec![]));

    Ok(Value::Object(rewritten))
}

fn rewrite_client_ca_file(config: &mut Value, install_dir: &Path) -> Result<()> {
    let client_ca_file = config
        .pointer_mut(CLIENT_CA_FILE_POINTER)
        .ok_or_else(|| BootstrapError::ConfigRewrite(format!("missing {CLIENT_CA_FILE_POINTER}")))?;

    let file_name = client_ca_file
        .as_str()
        .and_then(windows_or_posix_file_name)
        .ok_or_else(|| BootstrapError::ConfigRewrite("clientCAFile is not a file path".to_string()))?
        .to_string();

    *client_ca_file = Value::String(windows_path_join(install_dir, &file_name));

    Ok(())
}

fn windows_or_posix_file_name(path: &str) -> Option<&str> {
    path.rsplit(['/', '\\']).next().filter(|name| !name.is_empty())
}

/// Joins with a backslash no matter what platform we're running on, the result is consumed by the
/// Windows kubelet
pub(crate) fn windows_path_join(dir: &Path, file_name: &str) -> String {
    format!("{}\\{}", dir.display().to_string().trim_end_matches(['\\', '/']), file_name)
}
