//! Concurrency-safe session registry with admission control and expiry.
//!
//! The store is the single source of truth for session existence. Sessions
//! live in a sharded map so operations on different ids never block each
//! other; a creation lock makes the capacity check, device reservation, and
//! insert one atomic step. Close removes the record and releases engine state
//! and devices in one place — the reaper reuses the same path.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::CoreConfig;
use crate::devices::DevicePool;
use crate::engine::TrackingEngine;
use crate::error::{EngineError, TrackError};
use crate::session::{Session, SessionSnapshot, SessionStatus};
use crate::types::{DeviceId, SessionId, VideoSource};

/// Registry of live [`Session`] records.
pub struct SessionStore {
    sessions: DashMap<SessionId, Arc<Session>>,
    devices: DevicePool,
    engine: Arc<dyn TrackingEngine>,
    max_sessions: usize,
    idle_timeout: Duration,
    /// Serializes the admission check against concurrent creates.
    create_lock: Mutex<()>,
}

impl SessionStore {
    #[must_use]
    pub fn new(config: CoreConfig, engine: Arc<dyn TrackingEngine>) -> Self {
        Self {
            sessions: DashMap::new(),
            devices: DevicePool::new(config.devices),
            engine,
            max_sessions: config.max_sessions,
            idle_timeout: config.idle_timeout,
            create_lock: Mutex::new(()),
        }
    }

    /// The engine collaborator shared with the propagation layer.
    #[must_use]
    pub fn engine(&self) -> Arc<dyn TrackingEngine> {
        Arc::clone(&self.engine)
    }

    /// Number of live (non-closed) sessions.
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Devices currently free in the pool.
    #[must_use]
    pub fn devices_available(&self) -> usize {
        self.devices.available()
    }

    /// Creates a session: admission check, device reservation, engine
    /// initialization, registration — atomically with respect to other
    /// creates.
    ///
    /// # Errors
    ///
    /// `CapacityExceeded` when the store is full or the requested devices are
    /// taken; `InvalidRequest` for a duplicate id, an unknown device, or a
    /// source the engine cannot open.
    pub fn create(
        &self,
        id: Option<SessionId>,
        source: &VideoSource,
        requested_devices: Option<&[DeviceId]>,
    ) -> Result<Arc<Session>, TrackError> {
        let _guard = self.create_lock.lock();

        if self.sessions.len() >= self.max_sessions {
            return Err(TrackError::CapacityExceeded {
                active: self.sessions.len(),
                capacity: self.max_sessions,
            });
        }

        let id = id.unwrap_or_else(SessionId::generate);
        if self.sessions.contains_key(&id) {
            return Err(TrackError::invalid(format!(
                "session id {id} is already in use"
            )));
        }

        let devices = self.devices.reserve(requested_devices)?;

        let video = match self.engine.begin_session(&id, source, &devices) {
            Ok(video) => video,
            Err(err) => {
                self.devices.release(&devices);
                return Err(match err {
                    EngineError::Open { detail } => TrackError::invalid(format!(
                        "unable to open video source ({}): {detail}",
                        source.describe()
                    )),
                    other => TrackError::invalid(other.to_string()),
                });
            }
        };

        let session = Arc::new(Session::new(id.clone(), video, devices));
        session.touch();
        self.sessions.insert(id.clone(), Arc::clone(&session));

        info!(
            session = %id,
            frames = video.total_frames,
            devices = ?session.devices(),
            "created session"
        );
        Ok(session)
    }

    /// Looks up a session and records the access.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown id.
    pub fn get(&self, id: &SessionId) -> Result<Arc<Session>, TrackError> {
        let session = self
            .sessions
            .get(id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| TrackError::NotFound { id: id.clone() })?;
        session.touch();
        Ok(session)
    }

    /// Refreshes a session's activity timestamp.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown id.
    pub fn touch(&self, id: &SessionId) -> Result<(), TrackError> {
        self.get(id).map(|_| ())
    }

    /// Merges propagation/prompt progress into the record. Safe to call
    /// concurrently with `touch` and the reaper's sweep.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown id.
    pub fn update_stats(
        &self,
        id: &SessionId,
        objects: Option<Vec<u32>>,
        frames_processed: Option<u64>,
    ) -> Result<(), TrackError> {
        let session = self.get(id)?;
        if let Some(objects) = objects {
            session.set_objects(objects);
        }
        if let Some(frames) = frames_processed {
            session.record_progress(frames);
        }
        Ok(())
    }

    /// Closes a session: removes the record, releases engine state, and
    /// returns the reserved devices to the pool. Nothing observes the record
    /// after removal; the released count is returned.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown id; in that case no state changes.
    pub fn close(&self, id: &SessionId) -> Result<usize, TrackError> {
        let (_, session) = self
            .sessions
            .remove(id)
            .ok_or_else(|| TrackError::NotFound { id: id.clone() })?;

        session.mark_closed();

        if let Err(err) = self.engine.release(id) {
            // Device reservations are still returned below; engine state for
            // an unknown session has nothing left to free.
            warn!(session = %id, error = %err, "engine release failed during close");
        }

        let released = session.devices().len();
        self.devices.release(session.devices());

        info!(session = %id, devices_released = released, "closed session");
        Ok(released)
    }

    /// One-instant snapshot of all live sessions, ordered by id.
    #[must_use]
    pub fn list(&self) -> Vec<SessionSnapshot> {
        let mut sessions: Vec<_> = self
            .sessions
            .iter()
            .map(|entry| entry.value().snapshot())
            .collect();
        sessions.sort_by(|a, b| a.session_id.cmp(&b.session_id));
        sessions
    }

    /// Closes every session idle past the configured timeout, skipping any
    /// session that is actively processing. Returns the reaped ids.
    pub fn sweep_expired(&self) -> Vec<SessionId> {
        let expired: Vec<SessionId> = self
            .sessions
            .iter()
            .filter(|entry| {
                let session = entry.value();
                session.is_idle(self.idle_timeout)
                    && session.status() != SessionStatus::Processing
            })
            .map(|entry| entry.key().clone())
            .collect();

        let mut reaped = Vec::with_capacity(expired.len());
        for id in expired {
            // A concurrent explicit close may win the race; that is fine.
            if self.close(&id).is_ok() {
                reaped.push(id);
            }
        }
        reaped
    }
}
