//! Error taxonomy for session and propagation operations.
//!
//! Every failure carries a machine-distinguishable [`ErrorKind`] plus a
//! human-readable message. Admission refusals and consumer-driven aborts are
//! not faults: they never move a session to the `Error` state.

use crate::types::SessionId;
use thiserror::Error;

/// Machine-readable classification of a [`TrackError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Admission refused; the caller should retry later.
    CapacityExceeded,
    /// Unknown session or object identifier.
    NotFound,
    /// A propagation is already in flight for this session.
    SessionBusy,
    /// Malformed direction, range, or prompt.
    InvalidRequest,
    /// The inference engine failed for a frame; the session moved to `Error`.
    InferenceFailure,
    /// Caller-imposed deadline exceeded mid-propagation.
    Timeout,
    /// Subscriber disconnected or caller aborted.
    Cancelled,
}

impl ErrorKind {
    /// Stable wire identifier for this kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CapacityExceeded => "capacity_exceeded",
            Self::NotFound => "not_found",
            Self::SessionBusy => "session_busy",
            Self::InvalidRequest => "invalid_request",
            Self::InferenceFailure => "inference_failure",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Errors surfaced by the session store, propagation engine, and consumers.
#[derive(Debug, Error)]
pub enum TrackError {
    /// The store is at its configured session capacity.
    #[error("session capacity exceeded: {active} of {capacity} slots in use, retry later")]
    CapacityExceeded { active: usize, capacity: usize },

    /// No live session with this identifier.
    #[error("session not found: {id}")]
    NotFound { id: SessionId },

    /// The session exists but the object does not.
    #[error("object {object_id} not found in session {id}")]
    ObjectNotFound { id: SessionId, object_id: u32 },

    /// At most one propagation may run per session; this one lost the race.
    #[error("session {id} already has a propagation in flight")]
    SessionBusy { id: SessionId },

    /// The request was malformed before any work started.
    #[error("invalid request: {reason}")]
    InvalidRequest { reason: String },

    /// The engine raised an error for a frame; the session is now in `Error`.
    #[error("inference failed at frame {frame_index}: {detail}")]
    InferenceFailure {
        frame_index: u32,
        detail: String,
        /// Frames produced before the fault, kept for diagnostics only.
        frames_completed: usize,
    },

    /// The caller's deadline elapsed between frames.
    #[error("propagation timed out after {elapsed_ms}ms ({frames_completed} frames completed)")]
    Timeout {
        elapsed_ms: u64,
        frames_completed: usize,
    },

    /// The consumer went away; the run stopped at the next checkpoint.
    #[error("propagation cancelled after {frames_completed} frames")]
    Cancelled { frames_completed: usize },
}

impl TrackError {
    /// Classifies this error for transport mapping and retry policy.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::CapacityExceeded { .. } => ErrorKind::CapacityExceeded,
            Self::NotFound { .. } | Self::ObjectNotFound { .. } => ErrorKind::NotFound,
            Self::SessionBusy { .. } => ErrorKind::SessionBusy,
            Self::InvalidRequest { .. } => ErrorKind::InvalidRequest,
            Self::InferenceFailure { .. } => ErrorKind::InferenceFailure,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Cancelled { .. } => ErrorKind::Cancelled,
        }
    }

    /// Convenience constructor for boundary validation failures.
    #[must_use]
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidRequest {
            reason: reason.into(),
        }
    }
}

/// Errors raised by a [`crate::engine::TrackingEngine`] implementation.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The video source could not be opened or decoded.
    #[error("failed to open video source: {detail}")]
    Open { detail: String },

    /// Inference failed for the current frame.
    #[error("{detail}")]
    Inference { detail: String },

    /// The engine has no state for this session.
    #[error("engine has no session {id}")]
    UnknownSession { id: SessionId },

    /// The session has no such tracked object.
    #[error("unknown object {object_id}")]
    UnknownObject { object_id: u32 },
}
