//! Transfer provider abstraction trait
//!
//! This module defines the TransferProvider trait that all transports must implement.

use async_trait::async_trait;
use exparc_core::models::{Experiment, Replica};
use std::path::{Path, PathBuf};
use std::pin::Pin;
use thiserror::Error;
use tokio::io::AsyncRead;

/// Transfer operation errors
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("No command found for {0}")]
    MissingCommand(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("command {command} failed: rc {}", display_status(.status))]
    CommandFailed {
        command: String,
        status: Option<i32>,
        output: String,
    },

    #[error("command {command} could not be run: {source}")]
    Channel {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Unexpected command output: {0}")]
    InvalidOutput(String),

    #[error("File not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn display_status(status: &Option<i32>) -> String {
    match status {
        Some(code) => code.to_string(),
        None => "killed by signal".to_string(),
    }
}

impl TransferError {
    /// The source of a transfer could not be reached: the remote command
    /// failed, the channel could not be opened, or the file is gone.
    pub fn is_unreachable(&self) -> bool {
        matches!(
            self,
            TransferError::CommandFailed { .. }
                | TransferError::Channel { .. }
                | TransferError::NotFound(_)
        )
    }

    /// Errors raised by provider construction or command lookup.
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            TransferError::Config(_) | TransferError::MissingCommand(_) | TransferError::InvalidUrl(_)
        )
    }
}

/// Result type for transfer operations
pub type TransferResult<T> = Result<T, TransferError>;

/// Content to push with [`TransferProvider::put_file`].
pub enum FileSource {
    /// A stable local file that can be handed to the transport as is.
    Path(PathBuf),
    /// A stream without a backing file; providers spool it locally first.
    Reader(Pin<Box<dyn AsyncRead + Send + Unpin>>),
}

/// A remote file fetched into a local temporary file.
///
/// The temporary file is removed when this value is dropped, on every exit
/// path of the caller.
#[derive(Debug)]
pub struct FetchedFile {
    path: tempfile::TempPath,
}

impl FetchedFile {
    /// Create an empty spool file for a fetch, in `dir` when given and in the
    /// system temporary directory otherwise.
    pub fn spool(dir: Option<&Path>) -> TransferResult<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("exparc_fetch_");
        let file = match dir {
            Some(dir) => builder.tempfile_in(dir)?,
            None => builder.tempfile()?,
        };
        Ok(Self {
            path: file.into_temp_path(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

}

/// Transfer provider abstraction trait
///
/// A location is bound to exactly one provider. Callers never look behind the
/// trait, so a new transport only needs a new implementation plus a factory arm.
///
/// Providers hold no locks and their state is immutable after construction.
/// Concurrent calls against independent replicas are safe; concurrent
/// `put_archive` calls for the same experiment may collide on the generated URL.
#[async_trait]
pub trait TransferProvider: Send + Sync {
    /// Name of the location this provider serves.
    fn name(&self) -> &str;

    fn base_url(&self) -> &str;

    /// Whether declared lengths may be trusted without verification.
    fn trusts_length(&self) -> bool;

    /// Liveness check. Never fails: any error collapses to `false`.
    async fn is_alive(&self) -> bool;

    /// Length in bytes of the file behind `replica`.
    async fn length(&self, replica: &Replica) -> TransferResult<u64>;

    /// Fetch the file behind `replica` into a local temporary file created in
    /// `spool_dir` (the system temporary directory when `None`).
    async fn open_for_read(
        &self,
        replica: &Replica,
        spool_dir: Option<&Path>,
    ) -> TransferResult<FetchedFile>;

    /// Push `source` to `target_url`, creating the remote directory when needed.
    async fn put_file(&self, source: FileSource, target_url: &str) -> TransferResult<()>;

    /// Push an archive bundle for `experiment` and return the URL it was stored at.
    async fn put_archive(&self, archive: &Path, experiment: &Experiment)
        -> TransferResult<String>;

    /// Physically remove the file behind `replica`. Failures always propagate.
    async fn remove_file(&self, replica: &Replica) -> TransferResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_failures_are_unreachable() {
        let err = TransferError::CommandFailed {
            command: "scp a b".into(),
            status: Some(1),
            output: String::new(),
        };
        assert!(err.is_unreachable());
        assert!(!err.is_config());
        assert_eq!(err.to_string(), "command scp a b failed: rc 1");
    }

    #[test]
    fn io_errors_are_not_unreachable() {
        let err = TransferError::Io(std::io::Error::new(std::io::ErrorKind::Other, "disk full"));
        assert!(!err.is_unreachable());
    }

    #[test]
    fn signal_termination_is_reported() {
        let err = TransferError::CommandFailed {
            command: "ssh".into(),
            status: None,
            output: String::new(),
        };
        assert!(err.to_string().contains("killed by signal"));
    }

    #[tokio::test]
    async fn fetched_file_is_removed_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let fetched = FetchedFile::spool(Some(dir.path())).unwrap();
        let path = fetched.path().to_path_buf();
        assert!(path.exists());
        assert_eq!(path.parent(), Some(dir.path()));
        drop(fetched);
        assert!(!path.exists());
    }
}
