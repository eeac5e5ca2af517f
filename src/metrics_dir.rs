//! # Scratch directory for multi-process metric aggregation.
//!
//! Replicated workers (`run <name> --workers N`) write their metric files into a
//! shared directory named by [`MULTIPROC_DIR_ENV`]. Before the children start:
//!
//! - configured and present (or creatable, writable) → used as is;
//! - configured but unusable → the variable is removed for the children, with a warning;
//! - not configured → a private `prometheus_multiproc_*` directory is created and
//!   exported; it is deleted when the [`ScratchDir`] is dropped.
//!
//! The current process environment is never modified; the result is applied to
//! each child through [`ScratchDir::child_env`].

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::{info, warn};

/// Environment variable naming the scratch directory.
pub const MULTIPROC_DIR_ENV: &str = "PROMETHEUS_MULTIPROC_DIR";

/// Outcome of preparing the scratch directory.
#[derive(Debug)]
pub enum ScratchDir {
    /// The configured directory, ready for use.
    Configured(PathBuf),
    /// The configured directory could not be used.
    Unusable(PathBuf),
    /// A private directory owned by this process.
    Private(TempDir),
    /// Neither configured nor creatable; children run without the variable.
    Unavailable,
}

impl ScratchDir {
    /// Reads [`MULTIPROC_DIR_ENV`] from the process environment and prepares it.
    pub fn prepare() -> Self {
        Self::prepare_from(std::env::var_os(MULTIPROC_DIR_ENV).map(PathBuf::from))
    }

    /// Prepares `configured`, or a private directory when `None`.
    pub fn prepare_from(configured: Option<PathBuf>) -> Self {
        match configured {
            Some(dir) => match ensure_writable(&dir) {
                Ok(()) => Self::Configured(dir),
                Err(e) => {
                    warn!(
                        dir = %dir.display(),
                        error = %e,
                        "metrics scratch directory is unusable; unsetting {MULTIPROC_DIR_ENV}"
                    );
                    Self::Unusable(dir)
                }
            },
            None => match tempfile::Builder::new()
                .prefix("prometheus_multiproc_")
                .tempdir()
            {
                Ok(tmp) => {
                    info!(dir = %tmp.path().display(), "created metrics scratch directory");
                    Self::Private(tmp)
                }
                Err(e) => {
                    warn!(error = %e, "cannot create metrics scratch directory");
                    Self::Unavailable
                }
            },
        }
    }

    /// Directory children should use, if any.
    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::Configured(dir) => Some(dir),
            Self::Private(tmp) => Some(tmp.path()),
            Self::Unusable(_) | Self::Unavailable => None,
        }
    }

    /// Environment override for child processes: set to [`ScratchDir::path`] or removed.
    pub fn child_env(&self) -> (OsString, Option<OsString>) {
        (
            OsString::from(MULTIPROC_DIR_ENV),
            self.path().map(|p| p.as_os_str().to_owned()),
        )
    }
}

fn ensure_writable(dir: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(dir)?;
    tempfile::tempfile_in(dir).map(drop)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_configured_directory_is_created() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("nested").join("metrics");

        let scratch = ScratchDir::prepare_from(Some(dir.clone()));
        assert_eq!(scratch.path(), Some(dir.as_path()));
        assert!(dir.is_dir());
    }

    #[test]
    fn uncreatable_directory_unsets_the_variable() {
        let root = tempfile::tempdir().unwrap();
        let file = root.path().join("plain-file");
        std::fs::write(&file, b"x").unwrap();

        let scratch = ScratchDir::prepare_from(Some(file.join("metrics")));
        assert!(matches!(scratch, ScratchDir::Unusable(_)));
        assert_eq!(scratch.child_env(), (OsString::from(MULTIPROC_DIR_ENV), None));
    }

    #[test]
    fn private_directory_is_removed_on_drop() {
        let scratch = ScratchDir::prepare_from(None);
        let dir = scratch.path().unwrap().to_path_buf();
        assert!(dir.is_dir());
        assert!(
            dir.file_name()
                .unwrap()
                .to_string_lossy()
                .starts_with("prometheus_multiproc_")
        );

        let (_, value) = scratch.child_env();
        assert_eq!(value, Some(dir.as_os_str().to_owned()));

        drop(scratch);
        assert!(!dir.exists());
    }
}
