//! Typed errors for the failure modes callers need to tell apart.
//!
//! Most of the crate reports through `anyhow`; these types are the ones that
//! carry a policy decision (a traversal attempt is never downgraded, an
//! unknown analyzer is rejected before any work starts) and can be recovered
//! with `downcast_ref` from an `anyhow::Error`.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while applying layers onto an extraction root.
#[derive(Error, Debug)]
pub enum ExtractError {
    /// A tar entry name, hard link or symlink target resolves outside the root.
    #[error("Path escape in layer entry '{entry}': '{target}' resolves outside the extraction root")]
    PathEscape { entry: String, target: String },

    /// Filesystem error while materializing an entry.
    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The layer stream itself could not be read as a tar archive.
    #[error("Failed to read layer archive: {source}")]
    Archive {
        #[source]
        source: io::Error,
    },
}

impl ExtractError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        ExtractError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn is_path_escape(&self) -> bool {
        matches!(self, ExtractError::PathEscape { .. })
    }
}

/// Errors in the configuration handed to the pipeline.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Argument {0} is not a valid analyzer (expected one of: apt, apk, rpm)")]
    UnknownAnalyzer(String),
}
