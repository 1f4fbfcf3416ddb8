//! Error kinds surfaced by the bucket manager and the command handlers.

use std::{io, path::PathBuf};
use thiserror::Error;

/// Boxed error produced by the underlying storage client.
pub type BackendError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, Error)]
pub enum HcpError {
    /// An object-level operation was requested before a bucket was attached.
    #[error("attempted work on unattached bucket, aborting")]
    UnattachedBucket,

    /// Download target exists and overwriting was not requested.
    #[error("local file already exists: {}", .0.display())]
    LocalFileExists(PathBuf),

    /// Remote entity tag disagrees with the locally computed one. The remote
    /// object has already been removed when this is returned.
    #[error(
        "local and remote checksums differ for `{key}` (local {local}, remote {}), remote object removed",
        .remote.as_deref().unwrap_or("<missing>")
    )]
    MismatchChecksum {
        key: String,
        local: String,
        remote: Option<String>,
    },

    /// The progress reporter could not determine a transfer size.
    #[error("unknown source format: {0}")]
    UnknownSourceType(String),

    #[error("object `{0}` not found")]
    ObjectNotFound(String),

    /// The key names a folder placeholder, which has no content to save.
    #[error("`{0}` is a directory marker, not a file")]
    DirectoryMarker(String),

    #[error("store refused to delete `{key}`: {reason}")]
    DeleteRejected { key: String, reason: String },

    #[error("invalid upload file `{}`: {reason}", .path.display())]
    InvalidUploadFile { path: PathBuf, reason: String },

    #[error(transparent)]
    Backend(BackendError),

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl HcpError {
    /// Wrap a storage-client error without altering it.
    pub fn backend<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        HcpError::Backend(Box::new(err))
    }
}

pub type HcpResult<T> = Result<T, HcpError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mismatch_message_names_both_checksums() {
        let err = HcpError::MismatchChecksum {
            key: "run1/a.fastq".into(),
            local: "abc".into(),
            remote: Some("def".into()),
        };
        let msg = err.to_string();
        assert!(msg.contains("abc"));
        assert!(msg.contains("def"));
        assert!(msg.contains("run1/a.fastq"));
    }

    #[test]
    fn backend_errors_keep_their_message() {
        let err = HcpError::backend(io::Error::new(io::ErrorKind::TimedOut, "slow store"));
        assert_eq!(err.to_string(), "slow store");
    }
}
