//! Service layer error type.

use exparc_core::{AppError, ErrorKind, LogLevel};
use exparc_transfer::TransferError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error(transparent)]
    Transfer(#[from] TransferError),

    #[error(transparent)]
    Store(#[from] AppError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Manifest export failed: {0}")]
    Manifest(#[source] anyhow::Error),
}

impl WorkflowError {
    /// Classification used to drive the archive state machine.
    pub fn kind(&self) -> ErrorKind {
        match self {
            WorkflowError::Transfer(e) if e.is_config() => ErrorKind::Configuration,
            WorkflowError::Transfer(TransferError::Io(_)) => ErrorKind::Io,
            WorkflowError::Transfer(_) => ErrorKind::Transport,
            WorkflowError::Store(AppError::Config(_)) => ErrorKind::Configuration,
            WorkflowError::Store(_) => ErrorKind::Store,
            WorkflowError::Io(_) | WorkflowError::Manifest(_) => ErrorKind::Io,
        }
    }

    pub fn log_level(&self) -> LogLevel {
        match self {
            WorkflowError::Store(e) => e.log_level(),
            WorkflowError::Transfer(e) if e.is_config() => LogLevel::Warn,
            _ => LogLevel::Error,
        }
    }
}

pub type WorkflowResult<T> = Result<T, WorkflowError>;
