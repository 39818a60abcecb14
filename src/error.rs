//! Custom error types for the recorder.
//!
//! This module defines the primary error type, `RecorderError`, shared by every layer
//! of the acquisition pipeline. Using the `thiserror` crate, it provides a centralized
//! and consistent way to report failures, from a full acquisition queue to a storage
//! medium that refuses to open.
//!
//! ## Error Hierarchy
//!
//! - **`QueueFull` / `QueueEmpty`**: Timeouts on the acquisition boundary. Recoverable;
//!   the caller decides whether to skip, retry or flag data loss.
//! - **`QueueClosed`**: The queue was shut down. Producers and the consumer exit.
//! - **`Io`**: Wraps `std::io::Error` from the storage medium. Aborts the transition in
//!   progress and is surfaced to the control path.
//! - **`NotOpen`**: A log operation was attempted while the log is closed. This is a
//!   sequencing error and should not happen given the coordinator's ordering.
//! - **`ProtocolViolation`**: The remote controller sent something outside the closed
//!   command set. Fatal for the link.
//! - **`StopIncomplete`**: A stop sequence that reached `Idle` but hit one or more
//!   failures on the way.
//!
//! By using `#[from]`, `RecorderError` can be created from the underlying I/O and
//! configuration errors with the `?` operator.

use thiserror::Error;

/// Convenience alias for results using the recorder error type.
pub type AppResult<T> = std::result::Result<T, RecorderError>;

#[derive(Error, Debug)]
pub enum RecorderError {
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    #[error("Configuration validation error: {0}")]
    Configuration(String),

    #[error("Acquisition queue full")]
    QueueFull,

    #[error("Acquisition queue empty")]
    QueueEmpty,

    #[error("Acquisition queue closed")]
    QueueClosed,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Persistent log is not open")]
    NotOpen,

    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("A recording session is already active")]
    AlreadyRecording,

    #[error("No record metadata stored")]
    NoRecord,

    #[error("Sample source error: {0}")]
    SampleSource(String),

    #[error("Queue not drained within {timeout_ms} ms ({pending} samples pending)")]
    DrainTimeout { pending: usize, timeout_ms: u64 },

    #[error("Stop completed with errors")]
    StopIncomplete(Vec<RecorderError>),
}

impl From<figment::Error> for RecorderError {
    fn from(value: figment::Error) -> Self {
        RecorderError::Config(Box::new(value))
    }
}

impl RecorderError {
    /// Whether the caller can carry on after this error without restarting
    /// the session or the link.
    pub fn is_recoverable(&self) -> bool {
        match self {
            RecorderError::QueueFull
            | RecorderError::QueueEmpty
            | RecorderError::AlreadyRecording
            | RecorderError::NoRecord
            | RecorderError::DrainTimeout { .. } => true,
            RecorderError::StopIncomplete(errors) => errors.iter().all(Self::is_recoverable),
            RecorderError::Config(_)
            | RecorderError::Configuration(_)
            | RecorderError::QueueClosed
            | RecorderError::Io(_)
            | RecorderError::NotOpen
            | RecorderError::ProtocolViolation(_)
            | RecorderError::SampleSource(_) => false,
        }
    }

    /// Folds the failures collected by a best-effort sequence into a single result.
    pub fn collect(mut errors: Vec<RecorderError>) -> AppResult<()> {
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(RecorderError::StopIncomplete(errors)),
        }
    }
}

/// Display adapter listing every failure of a `StopIncomplete`.
pub struct StopErrors<'a>(pub &'a [RecorderError]);

impl std::fmt::Display for StopErrors<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let combined = self
            .0
            .iter()
            .map(|err| err.to_string())
            .collect::<Vec<_>>()
            .join("; ");
        write!(f, "{combined}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_timeouts_are_recoverable() {
        assert!(RecorderError::QueueFull.is_recoverable());
        assert!(RecorderError::QueueEmpty.is_recoverable());
        assert!(!RecorderError::QueueClosed.is_recoverable());
    }

    #[test]
    fn protocol_violation_is_fatal() {
        let err = RecorderError::ProtocolViolation("unknown command code 0x07".into());
        assert!(!err.is_recoverable());
        assert!(err.to_string().contains("0x07"));
    }

    #[test]
    fn stop_incomplete_inherits_recoverability() {
        let soft = RecorderError::StopIncomplete(vec![RecorderError::DrainTimeout {
            pending: 3,
            timeout_ms: 1000,
        }]);
        assert!(soft.is_recoverable());

        let hard = RecorderError::StopIncomplete(vec![
            RecorderError::NoRecord,
            RecorderError::Io(std::io::Error::other("card removed")),
        ]);
        assert!(!hard.is_recoverable());
    }

    #[test]
    fn collect_folds_errors() {
        assert!(RecorderError::collect(vec![]).is_ok());

        match RecorderError::collect(vec![RecorderError::NotOpen]) {
            Err(RecorderError::NotOpen) => {}
            other => panic!("unexpected result: {:?}", other),
        }

        match RecorderError::collect(vec![RecorderError::NotOpen, RecorderError::NoRecord]) {
            Err(RecorderError::StopIncomplete(errors)) => {
                assert_eq!(errors.len(), 2);
                let listed = StopErrors(&errors).to_string();
                assert!(listed.contains("not open"));
                assert!(listed.contains("No record"));
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }
}
