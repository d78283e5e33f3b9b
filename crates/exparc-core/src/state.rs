//! Archive workflow state machine.
//!
//! The workflow moves through a closed set of states. Every move goes through
//! [`transition`], which evaluates the `(state, event)` table below; pairs not
//! in the table leave the state unchanged. Failures are mapped to states by
//! [`state_for_error`].

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArchiveState {
    Pending,
    Building,
    Transferring,
    Purging,
    Recording,
    Complete,
    Failed,
}

impl ArchiveState {
    pub fn is_final(&self) -> bool {
        matches!(self, ArchiveState::Complete | ArchiveState::Failed)
    }
}

impl Display for ArchiveState {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        let name = match self {
            ArchiveState::Pending => "pending",
            ArchiveState::Building => "building",
            ArchiveState::Transferring => "transferring",
            ArchiveState::Purging => "purging",
            ArchiveState::Recording => "recording",
            ArchiveState::Complete => "complete",
            ArchiveState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Classes of failure a workflow step can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Bad endpoint URL, missing parameter or command template.
    Configuration,
    /// Remote command failure or unreachable endpoint.
    Transport,
    /// Metadata store failure.
    Store,
    /// Local I/O failure.
    Io,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArchiveEvent {
    Start,
    BundleBuilt,
    BundlePushed,
    ReplicasPurged,
    PurgeSkipped,
    RecordCreated,
    Error(ErrorKind),
}

/// Single dispatcher for every state change.
pub fn transition(state: ArchiveState, event: ArchiveEvent) -> ArchiveState {
    use ArchiveEvent as E;
    use ArchiveState as S;

    if state.is_final() {
        return state;
    }

    match (state, event) {
        (S::Pending, E::Start) => S::Building,
        (S::Building, E::BundleBuilt) => S::Transferring,
        (S::Transferring, E::BundlePushed) => S::Purging,
        (S::Purging, E::ReplicasPurged) => S::Recording,
        (S::Purging, E::PurgeSkipped) => S::Recording,
        (S::Recording, E::RecordCreated) => S::Complete,
        (current, E::Error(kind)) => state_for_error(current, kind),
        (current, _) => current,
    }
}

/// Error-kind-to-state table. Configuration errors cannot succeed on retry;
/// every other kind leaves the workflow where it stopped.
pub fn state_for_error(current: ArchiveState, kind: ErrorKind) -> ArchiveState {
    match kind {
        ErrorKind::Configuration => ArchiveState::Failed,
        ErrorKind::Transport | ErrorKind::Store | ErrorKind::Io => current,
    }
}
