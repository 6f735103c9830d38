//! Batch consumption of a propagation run.
//!
//! Drains the frame stream to exhaustion or to the first terminal error and
//! assembles one aggregate response. A failed run yields no partial success
//! payload: the frames computed before the fault travel only inside the error
//! for diagnostics. A caller-imposed deadline aborts at the next inter-frame
//! checkpoint by dropping the stream, which cancels the producer.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::error::TrackError;
use crate::propagation::{self, PropagateRequest};
use crate::store::SessionStore;
use crate::types::{FrameResult, SessionId};

/// Aggregate result of a completed batch propagation.
#[derive(Debug)]
pub struct BatchOutcome {
    pub session_id: SessionId,
    /// Frame results keyed by frame index.
    pub results: BTreeMap<u32, FrameResult>,
    pub total_frames: usize,
    pub processing_time_ms: f64,
}

/// Runs a propagation to completion, optionally bounded by a deadline.
///
/// # Errors
///
/// Any error from [`propagation::start`]; `InferenceFailure` when the engine
/// faults mid-run; `Timeout` when the deadline elapses first — the session
/// returns to `Ready` with its partial progress preserved.
pub async fn run(
    store: &Arc<SessionStore>,
    id: &SessionId,
    request: PropagateRequest,
    deadline: Option<Duration>,
) -> Result<BatchOutcome, TrackError> {
    let started = Instant::now();
    let deadline_at = deadline.map(|d| tokio::time::Instant::now() + d);

    let mut stream = propagation::start(store, id, request)?;
    let mut results: BTreeMap<u32, FrameResult> = BTreeMap::new();

    loop {
        let item = match deadline_at {
            Some(at) => match tokio::time::timeout_at(at, stream.next()).await {
                Ok(item) => item,
                Err(_) => {
                    // Dropping the stream closes the channel; the producer
                    // stops at its next checkpoint and frees the session.
                    drop(stream);
                    return Err(TrackError::Timeout {
                        elapsed_ms: started.elapsed().as_millis() as u64,
                        frames_completed: results.len(),
                    });
                }
            },
            None => stream.next().await,
        };

        match item {
            Some(Ok(frame)) => {
                results.insert(frame.frame_index, frame);
            }
            Some(Err(err)) => {
                // The partial aggregate never reaches the caller as a success
                // payload; keep it reachable for diagnostics.
                debug!(
                    session = %id,
                    frames_computed = results.len(),
                    frame_indices = ?results.keys().collect::<Vec<_>>(),
                    "batch propagation failed with partial results"
                );
                return Err(err);
            }
            None => break,
        }
    }

    let total_frames = results.len();
    Ok(BatchOutcome {
        session_id: id.clone(),
        results,
        total_frames,
        processing_time_ms: started.elapsed().as_secs_f64() * 1000.0,
    })
}
