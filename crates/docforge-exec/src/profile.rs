//! Per-invocation converter profile directory.
//!
//! LibreOffice keeps a lock inside its user profile, so two `soffice`
//! processes sharing one profile serialize or fail. Each conversion gets its
//! own [`ProfileDir`] beneath the output directory, and the directory is
//! removed when the guard drops, whichever way the conversion ended.

use std::path::Path;

use tempfile::TempDir;

use docforge_common::{Error, Result};

/// Scoped converter state directory.
///
/// # Example
///
/// ```no_run
/// use docforge_exec::ProfileDir;
///
/// let profile = ProfileDir::create(std::path::Path::new("/data/job")).unwrap();
/// let arg = format!("-env:UserInstallation={}", profile.uri());
/// // ... run the converter ...
/// drop(profile); // directory removed
/// ```
#[derive(Debug)]
pub struct ProfileDir {
    temp_dir: TempDir,
}

impl ProfileDir {
    /// Directory name used beneath the output directory.
    pub const DIR_NAME: &'static str = "lo_profile";

    /// Create a fresh profile directory under `parent`, replacing any stale
    /// one a previous attempt left behind.
    ///
    /// Fails if the stale directory cannot be removed, so two attempts never
    /// share converter state.
    pub fn create(parent: &Path) -> Result<Self> {
        let parent = std::path::absolute(parent)?;
        let stale = parent.join(Self::DIR_NAME);

        if stale.exists() {
            std::fs::remove_dir_all(&stale).map_err(|e| {
                Error::tool(
                    "profile",
                    format!("failed to remove stale {}: {e}", stale.display()),
                )
            })?;
        }

        let temp_dir = tempfile::Builder::new()
            .prefix(Self::DIR_NAME)
            .rand_bytes(0)
            .tempdir_in(&parent)
            .map_err(|e| {
                Error::tool(
                    "profile",
                    format!("failed to create {}: {e}", stale.display()),
                )
            })?;

        Ok(Self { temp_dir })
    }

    /// Absolute path of the directory.
    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// `file://` URI of the directory, as `-env:UserInstallation` expects.
    pub fn uri(&self) -> String {
        file_uri(self.path())
    }
}

/// Percent-encode an absolute path as a `file://` URI.
fn file_uri(path: &Path) -> String {
    let raw = path.to_string_lossy().replace('\\', "/");
    let mut uri = String::with_capacity(raw.len() + 8);
    uri.push_str("file://");
    if !raw.starts_with('/') {
        uri.push('/');
    }
    for byte in raw.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' | b'/' | b':' => {
                uri.push(byte as char)
            }
            other => uri.push_str(&format!("%{other:02X}")),
        }
    }
    uri
}
