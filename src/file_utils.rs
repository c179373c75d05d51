use crate::error::BootstrapError;
use anyhow::{ensure, Context, Result};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC};
use std::{
    io::Write,
    path::{Path, PathBuf},
};

/// The only data URI flavour found in ignition file sources: no media type, no base64 marker
const DATA_URL_PREFIX: &str = "data:,";

/// Everything but RFC 3986 unreserved characters gets escaped, matching what the machine config
/// server produces
const DATA_URL_ESCAPE_SET: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'.').remove(b'_').remove(b'~');

pub(crate) fn decode_data_url(source: &str) -> Result<Vec<u8>> {
    let payload = source
        .strip_prefix(DATA_URL_PREFIX)
        .with_context(|| BootstrapError::Decode(format!("expected source to start with {DATA_URL_PREFIX:?}")))?;

    validate_percent_escapes(payload)?;

    let (decoded, _fragment) = data_url::DataUrl::process(source)
        .ok()
        .context(BootstrapError::Decode("dataurl processing".to_string()))?
        .decode_to_vec()
        .ok()
        .context(BootstrapError::Decode("dataurl decoding".to_string()))?;

    Ok(decoded)
}

pub(crate) fn dataurl_encode(data: &[u8]) -> String {
    format!("{DATA_URL_PREFIX}{}", percent_encoding::percent_encode(data, DATA_URL_ESCAPE_SET))
}

// The data-url crate passes malformed escapes through verbatim, we'd rather refuse them
fn validate_percent_escapes(payload: &str) -> Result<()> {
    let bytes = payload.as_bytes();

    for (index, _) in bytes.iter().enumerate().filter(|(_, byte)| **byte == b'%') {
        let escape = bytes.get(index + 1..index + 3);

        ensure!(
            escape.is_some_and(|escape| escape.iter().all(u8::is_ascii_hexdigit)),
            BootstrapError::Decode(format!("invalid percent escape at offset {index}"))
        );
    }

    Ok(())
}

/// Atomically replace the file at `path` with `contents`. The parent directory must exist.
pub(crate) fn commit_file(path: &Path, contents: impl AsRef<[u8]>, mode: Option<u32>) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("{} has no parent directory", path.display()))?;

    let mut temp_file = tempfile::NamedTempFile::new_in(parent).context("creating temporary file")?;
    temp_file.write_all(contents.as_ref()).context("writing temporary file")?;
    temp_file.flush().context("flushing temporary file")?;

    #[cfg(unix)]
    if let Some(mode) = mode {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(temp_file.path(), std::fs::Permissions::from_mode(mode)).context("setting file mode")?;
    }
    #[cfg(not(unix))]
    let _ = mode;

    temp_file
        .persist(path)
        .with_context(|| format!("moving temporary file into {}", path.display()))?;

    Ok(())
}

/// Copy `file` into `dir`, keeping its file name. Returns the destination path.
pub(crate) fn copy_into_dir(file: &Path, dir: &Path) -> Result<PathBuf> {
    let destination = dir.join(file.file_name().context("no file component")?);

    std::fs::copy(file, &destination)
        .with_context(|| format!("failed to copy {} to {}", file.display(), dir.display()))?;

    Ok(destination)
}
