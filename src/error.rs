use thiserror::Error;

/// Failure classes of a bootstrap or CNI reconfiguration run. None of these are retried
/// internally, the whole operation is meant to be re-invoked instead.
#[derive(Debug, Error)]
pub(crate) enum BootstrapError {
    #[error("malformed data URI: {0}")]
    Decode(String),

    #[error("malformed document: {0}")]
    DocumentParse(String),

    #[error("kubelet configuration cannot be rewritten: {0}")]
    ConfigRewrite(String),

    #[error("invalid kubelet argument: {0}")]
    InvalidArgument(String),

    #[error("error translating {0}")]
    Translation(String),

    #[error("error accessing install directory {0}")]
    InstallDir(String),

    #[error("{0}")]
    CniPath(String),

    #[error("{0}")]
    CniConfig(String),

    #[error("error creating directory {0}")]
    DirCreation(String),

    #[error("{0}")]
    Copy(String),

    #[error("{0} service is not present")]
    ServicePrecondition(String),
}
