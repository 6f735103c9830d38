//! Drives the tracking engine across a frame range in a chosen direction.
//!
//! A propagation run claims its session (`Ready -> Processing`), computes the
//! frame plan up front, then produces [`FrameResult`]s through a bounded
//! channel from a spawned task. Each inference call runs on the blocking
//! thread pool and is treated as atomic; cancellation is observed between
//! frames as channel closure — when the consumer drops the stream, the
//! producer stops before issuing the next inference call. Every exit path
//! moves the session out of `Processing`.

use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::TrackError;
use crate::session::Session;
use crate::store::SessionStore;
use crate::types::{Direction, FrameResult, SessionId};

/// Buffered frames between producer and consumer. Small enough that a gone
/// subscriber is noticed quickly, large enough to ride out transport jitter.
const FRAME_CHANNEL_DEPTH: usize = 16;

/// Parameters of one propagation run.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct PropagateRequest {
    #[serde(default = "PropagateRequest::default_direction")]
    pub direction: Direction,
    #[serde(default)]
    pub start_frame_index: u32,
    #[serde(default)]
    pub max_frames: Option<u32>,
}

impl Default for PropagateRequest {
    fn default() -> Self {
        Self {
            direction: Direction::Both,
            start_frame_index: 0,
            max_frames: None,
        }
    }
}

impl PropagateRequest {
    const fn default_direction() -> Direction {
        Direction::Both
    }

    /// Boundary validation against the session's video.
    ///
    /// # Errors
    ///
    /// `InvalidRequest` for an out-of-range start frame or a zero bound.
    pub fn validate(&self, total_frames: u32) -> Result<(), TrackError> {
        if self.start_frame_index >= total_frames {
            return Err(TrackError::invalid(format!(
                "start_frame_index {} out of range for {total_frames}-frame video",
                self.start_frame_index
            )));
        }
        if self.max_frames == Some(0) {
            return Err(TrackError::invalid("max_frames must be greater than zero"));
        }
        Ok(())
    }
}

/// Ordered frame indices a run will visit. Strictly monotonic within a pass;
/// for `both`, the complete backward pass precedes the forward pass and the
/// start frame appears exactly once, in the forward pass.
#[must_use]
pub fn frame_plan(
    direction: Direction,
    start: u32,
    max_frames: Option<u32>,
    total_frames: u32,
) -> Vec<u32> {
    let budget = max_frames.map_or(usize::MAX, |m| m as usize);
    match direction {
        Direction::Forward => (start..total_frames).take(budget).collect(),
        Direction::Backward => (0..=start).rev().take(budget).collect(),
        Direction::Both => {
            // Bounded runs give the backward pass half the budget and the
            // forward pass whatever remains of the total.
            let backward_budget = max_frames.map_or(usize::MAX, |m| (m / 2) as usize);
            let mut plan: Vec<u32> = (0..start).rev().take(backward_budget).collect();
            let remaining = budget.saturating_sub(plan.len());
            plan.extend((start..total_frames).take(remaining));
            plan
        }
    }
}

/// Consumer handle over a running propagation.
///
/// Yields frames in plan order, then either `None` (successful exhaustion) or
/// a terminal error. Dropping the stream cancels the run at the producer's
/// next checkpoint.
#[derive(Debug)]
pub struct PropagationStream {
    rx: mpsc::Receiver<Result<FrameResult, TrackError>>,
    planned: usize,
}

impl PropagationStream {
    /// Next frame, terminal error, or end of the sequence.
    pub async fn next(&mut self) -> Option<Result<FrameResult, TrackError>> {
        self.rx.recv().await
    }

    /// Number of frames the run will produce if nothing interrupts it.
    #[must_use]
    pub const fn planned_frames(&self) -> usize {
        self.planned
    }
}

/// Claims the session and starts a propagation run.
///
/// # Errors
///
/// `NotFound` for an unknown session, `SessionBusy` when a run is already in
/// flight, `InvalidRequest` for a malformed range or an errored session.
pub fn start(
    store: &Arc<SessionStore>,
    id: &SessionId,
    request: PropagateRequest,
) -> Result<PropagationStream, TrackError> {
    let session = store.get(id)?;
    request.validate(session.video().total_frames)?;
    session.begin_propagation()?;

    let plan = frame_plan(
        request.direction,
        request.start_frame_index,
        request.max_frames,
        session.video().total_frames,
    );
    debug!(
        session = %id,
        direction = %request.direction,
        frames = plan.len(),
        "starting propagation"
    );

    let (tx, rx) = mpsc::channel(FRAME_CHANNEL_DEPTH);
    let planned = plan.len();
    let engine = store.engine();
    let session_id = id.clone();
    tokio::spawn(run_propagation(engine, session, session_id, plan, tx));

    Ok(PropagationStream { rx, planned })
}

async fn run_propagation(
    engine: Arc<dyn crate::engine::TrackingEngine>,
    session: Arc<Session>,
    id: SessionId,
    plan: Vec<u32>,
    tx: mpsc::Sender<Result<FrameResult, TrackError>>,
) {
    let mut produced = 0_usize;

    for frame_index in plan {
        // Inter-frame cancellation checkpoint: a dropped consumer closes the
        // channel and no further inference call is issued.
        if tx.is_closed() {
            session.finish_propagation();
            debug!(session = %id, frames = produced, "propagation cancelled by consumer");
            return;
        }

        let step_engine = Arc::clone(&engine);
        let step_id = id.clone();
        let step = tokio::task::spawn_blocking(move || {
            step_engine.track_frame(&step_id, frame_index)
        })
        .await;

        let objects = match step {
            Ok(Ok(objects)) => objects,
            Ok(Err(engine_err)) => {
                let detail = engine_err.to_string();
                session.fail(&detail);
                warn!(session = %id, frame = frame_index, error = %detail, "propagation failed");
                let _ = tx
                    .send(Err(TrackError::InferenceFailure {
                        frame_index,
                        detail,
                        frames_completed: produced,
                    }))
                    .await;
                return;
            }
            Err(join_err) => {
                let detail = format!("inference task aborted: {join_err}");
                session.fail(&detail);
                let _ = tx
                    .send(Err(TrackError::InferenceFailure {
                        frame_index,
                        detail,
                        frames_completed: produced,
                    }))
                    .await;
                return;
            }
        };

        produced += 1;
        session.record_progress(produced as u64);

        let frame = FrameResult {
            frame_index,
            objects,
        };
        if tx.send(Ok(frame)).await.is_err() {
            session.finish_propagation();
            debug!(session = %id, frames = produced, "propagation cancelled by consumer");
            return;
        }
    }

    session.finish_propagation();
    debug!(session = %id, frames = produced, "propagation complete");
}
