//! Live session records and the session state machine.
//!
//! A [`Session`] is owned by the [`crate::store::SessionStore`] and shared as
//! an `Arc`. Identity and video metadata are immutable; activity and progress
//! counters are atomics so status queries never contend with a running
//! propagation; status, the object set, and error detail sit behind one small
//! mutex that is only ever held for pure metadata mutation.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::error::TrackError;
use crate::types::{DeviceId, SessionId, VideoInfo};

/// Lifecycle state of one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Accepts prompts and propagation requests.
    Ready,
    /// A propagation is executing; further mutating requests are rejected.
    Processing,
    /// A propagation failed; inspectable and closable, reset returns to Ready.
    Error,
    /// Terminal; the record is removed from the store.
    Closed,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ready => f.write_str("ready"),
            Self::Processing => f.write_str("processing"),
            Self::Error => f.write_str("error"),
            Self::Closed => f.write_str("closed"),
        }
    }
}

#[derive(Debug)]
struct SessionInner {
    status: SessionStatus,
    objects: BTreeSet<u32>,
    error_detail: Option<String>,
}

/// One tracking job bound to a video and a set of tracked objects.
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    video: VideoInfo,
    devices: Vec<DeviceId>,
    created_at: DateTime<Utc>,
    /// Anchor for the atomic activity clock.
    created_instant: Instant,
    /// Nanoseconds since `created_instant` at the last touch.
    last_activity: AtomicU64,
    /// High-water mark of frames produced by a propagation run.
    frames_processed: AtomicU64,
    inner: Mutex<SessionInner>,
}

/// One-instant view of a session, safe to serialize after the record moved on.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub session_id: SessionId,
    pub status: SessionStatus,
    pub video_info: VideoInfo,
    pub objects: Vec<u32>,
    pub frames_processed: u64,
    pub created_at: DateTime<Utc>,
    pub assigned_devices: Vec<DeviceId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Session {
    #[must_use]
    pub fn new(id: SessionId, video: VideoInfo, devices: Vec<DeviceId>) -> Self {
        Self {
            id,
            video,
            devices,
            created_at: Utc::now(),
            created_instant: Instant::now(),
            last_activity: AtomicU64::new(0),
            frames_processed: AtomicU64::new(0),
            inner: Mutex::new(SessionInner {
                status: SessionStatus::Ready,
                objects: BTreeSet::new(),
                error_detail: None,
            }),
        }
    }

    #[must_use]
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    #[must_use]
    pub const fn video(&self) -> &VideoInfo {
        &self.video
    }

    #[must_use]
    pub fn devices(&self) -> &[DeviceId] {
        &self.devices
    }

    #[must_use]
    pub fn status(&self) -> SessionStatus {
        self.inner.lock().status
    }

    #[must_use]
    pub fn frames_processed(&self) -> u64 {
        self.frames_processed.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn object_count(&self) -> usize {
        self.inner.lock().objects.len()
    }

    /// Records activity now; called on every session-scoped operation.
    pub fn touch(&self) {
        let elapsed = self.created_instant.elapsed().as_nanos();
        self.last_activity
            .store(elapsed.try_into().unwrap_or(u64::MAX), Ordering::SeqCst);
    }

    /// Whether the session has been untouched for longer than `timeout`.
    #[must_use]
    pub fn is_idle(&self, timeout: Duration) -> bool {
        let last = Duration::from_nanos(self.last_activity.load(Ordering::SeqCst));
        self.created_instant.elapsed().saturating_sub(last) > timeout
    }

    /// Claims the session for a propagation run: `Ready -> Processing`.
    ///
    /// # Errors
    ///
    /// `SessionBusy` when a propagation is already in flight, `InvalidRequest`
    /// when the session is in `Error` and needs a reset first.
    pub fn begin_propagation(&self) -> Result<(), TrackError> {
        let mut inner = self.inner.lock();
        match inner.status {
            SessionStatus::Ready => {
                inner.status = SessionStatus::Processing;
                Ok(())
            }
            SessionStatus::Processing => Err(TrackError::SessionBusy {
                id: self.id.clone(),
            }),
            SessionStatus::Error => Err(TrackError::invalid(format!(
                "session {} is in error state; reset it before propagating",
                self.id
            ))),
            SessionStatus::Closed => Err(TrackError::NotFound {
                id: self.id.clone(),
            }),
        }
    }

    /// Ends a run without fault: `Processing -> Ready`. Used for success,
    /// timeout, and cancellation alike — partial progress is preserved.
    pub fn finish_propagation(&self) {
        let mut inner = self.inner.lock();
        if inner.status == SessionStatus::Processing {
            inner.status = SessionStatus::Ready;
        }
        drop(inner);
        self.touch();
    }

    /// Records a propagation fault: `Processing -> Error` with detail.
    pub fn fail(&self, detail: impl Into<String>) {
        let mut inner = self.inner.lock();
        inner.status = SessionStatus::Error;
        inner.error_detail = Some(detail.into());
        drop(inner);
        self.touch();
    }

    /// Clears objects and error state, returning to `Ready`.
    ///
    /// Returns the number of objects cleared.
    pub fn reset(&self) -> usize {
        let mut inner = self.inner.lock();
        let cleared = inner.objects.len();
        inner.objects.clear();
        inner.error_detail = None;
        inner.status = SessionStatus::Ready;
        drop(inner);
        self.frames_processed.store(0, Ordering::SeqCst);
        self.touch();
        cleared
    }

    /// Replaces the tracked-object set after a prompt or removal operation.
    pub fn set_objects(&self, objects: impl IntoIterator<Item = u32>) {
        let mut inner = self.inner.lock();
        inner.objects = objects.into_iter().collect();
        drop(inner);
        self.touch();
    }

    /// Adds newly created objects to the tracked set.
    pub fn add_objects(&self, objects: &[u32]) {
        let mut inner = self.inner.lock();
        inner.objects.extend(objects.iter().copied());
        drop(inner);
        self.touch();
    }

    /// Drops one object from the tracked set; false when it was not tracked.
    pub fn remove_object(&self, object_id: u32) -> bool {
        let mut inner = self.inner.lock();
        let removed = inner.objects.remove(&object_id);
        drop(inner);
        self.touch();
        removed
    }

    /// Guard for prompt/removal operations, which only a `Ready` session
    /// accepts.
    ///
    /// # Errors
    ///
    /// `SessionBusy` while a propagation runs, `InvalidRequest` in `Error`
    /// state, `NotFound` once closed.
    pub fn require_ready(&self) -> Result<(), TrackError> {
        match self.inner.lock().status {
            SessionStatus::Ready => Ok(()),
            SessionStatus::Processing => Err(TrackError::SessionBusy {
                id: self.id.clone(),
            }),
            SessionStatus::Error => Err(TrackError::invalid(format!(
                "session {} is in error state; reset it first",
                self.id
            ))),
            SessionStatus::Closed => Err(TrackError::NotFound {
                id: self.id.clone(),
            }),
        }
    }

    /// Raises the frames-processed high-water mark. Monotone and bounded by
    /// the video's frame count; safe against concurrent touches and sweeps.
    pub fn record_progress(&self, frames: u64) {
        let bounded = frames.min(u64::from(self.video.total_frames));
        self.frames_processed.fetch_max(bounded, Ordering::SeqCst);
        self.touch();
    }

    /// Marks the record closed. The store removes it in the same step; nothing
    /// may observe the record afterwards.
    pub(crate) fn mark_closed(&self) {
        self.inner.lock().status = SessionStatus::Closed;
    }

    /// Consistent one-instant view for list/status responses.
    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        let inner = self.inner.lock();
        SessionSnapshot {
            session_id: self.id.clone(),
            status: inner.status,
            video_info: self.video,
            objects: inner.objects.iter().copied().collect(),
            frames_processed: self.frames_processed.load(Ordering::SeqCst),
            created_at: self.created_at,
            assigned_devices: self.devices.clone(),
            error: inner.error_detail.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Resolution;
    use std::thread;

    fn test_video(total_frames: u32) -> VideoInfo {
        VideoInfo {
            total_frames,
            fps: 30.0,
            resolution: Resolution {
                width: 640,
                height: 360,
            },
            duration_seconds: total_frames as f32 / 30.0,
        }
    }

    fn test_session() -> Session {
        Session::new(
            SessionId::new("s1"),
            test_video(20),
            vec![DeviceId::new("cuda:0")],
        )
    }

    #[test]
    fn new_session_starts_ready() {
        let session = test_session();
        assert_eq!(session.status(), SessionStatus::Ready);
        assert_eq!(session.frames_processed(), 0);
        assert_eq!(session.object_count(), 0);
    }

    #[test]
    fn propagation_claim_is_exclusive() {
        let session = test_session();
        session.begin_propagation().unwrap();
        let err = session.begin_propagation().unwrap_err();
        assert!(matches!(err, TrackError::SessionBusy { .. }));

        session.finish_propagation();
        assert_eq!(session.status(), SessionStatus::Ready);
        session.begin_propagation().unwrap();
    }

    #[test]
    fn error_state_requires_reset_before_propagating() {
        let session = test_session();
        session.begin_propagation().unwrap();
        session.fail("model exploded");
        assert_eq!(session.status(), SessionStatus::Error);

        let err = session.begin_propagation().unwrap_err();
        assert!(matches!(err, TrackError::InvalidRequest { .. }));

        let snapshot = session.snapshot();
        assert_eq!(snapshot.error.as_deref(), Some("model exploded"));

        session.reset();
        assert_eq!(session.status(), SessionStatus::Ready);
        assert!(session.snapshot().error.is_none());
        session.begin_propagation().unwrap();
    }

    #[test]
    fn reset_reports_cleared_objects() {
        let session = test_session();
        session.set_objects([1, 2, 3]);
        assert_eq!(session.reset(), 3);
        assert_eq!(session.object_count(), 0);
        assert_eq!(session.frames_processed(), 0);
    }

    #[test]
    fn progress_is_monotone_and_bounded() {
        let session = test_session();
        session.record_progress(5);
        session.record_progress(3);
        assert_eq!(session.frames_processed(), 5);

        session.record_progress(500);
        assert_eq!(session.frames_processed(), 20);
    }

    #[test]
    fn object_deltas_accumulate() {
        let session = test_session();
        session.add_objects(&[1, 2]);
        session.add_objects(&[2, 3]);
        assert_eq!(session.object_count(), 3);

        assert!(session.remove_object(2));
        assert!(!session.remove_object(2));
        assert_eq!(session.object_count(), 2);
    }

    #[test]
    fn only_ready_sessions_accept_prompt_operations() {
        let session = test_session();
        session.require_ready().unwrap();

        session.begin_propagation().unwrap();
        assert!(matches!(
            session.require_ready().unwrap_err(),
            TrackError::SessionBusy { .. }
        ));

        session.fail("boom");
        assert!(matches!(
            session.require_ready().unwrap_err(),
            TrackError::InvalidRequest { .. }
        ));
    }

    #[test]
    fn idle_detection_follows_touches() {
        let session = test_session();
        assert!(!session.is_idle(Duration::from_millis(50)));

        thread::sleep(Duration::from_millis(80));
        assert!(session.is_idle(Duration::from_millis(50)));

        session.touch();
        assert!(!session.is_idle(Duration::from_millis(50)));
    }

    #[test]
    fn concurrent_progress_updates_keep_the_maximum() {
        let session = std::sync::Arc::new(test_session());
        let handles: Vec<_> = (1..=8)
            .map(|n| {
                let session = std::sync::Arc::clone(&session);
                thread::spawn(move || session.record_progress(n))
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(session.frames_processed(), 8);
    }
}
