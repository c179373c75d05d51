use anyhow::{Context, Result};
use clio::ClioPath;
use std::{ops::Deref, path::Path};

/// A user supplied path, kept as clio gave it to us so it can be reported back verbatim in the
/// summary
#[derive(Clone, Debug)]
pub(crate) struct ConfigPath(pub(crate) ClioPath);

impl ConfigPath {
    /// Opens the path for writing, truncating whatever is there
    pub(crate) fn create(&self) -> Result<clio::Output> {
        self.0.clone().create().context(format!("opening {self} for writing"))
    }
}

impl std::fmt::Display for ConfigPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.to_string_lossy().fmt(f)
    }
}

impl Deref for ConfigPath {
    type Target = Path;

    fn deref(&self) -> &Self::Target {
        self.0.path()
    }
}

impl From<ClioPath> for ConfigPath {
    fn from(clio_path: ClioPath) -> Self {
        Self(clio_path)
    }
}

impl serde::Serialize for ConfigPath {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}
