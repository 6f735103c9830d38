//! The inference-engine boundary.
//!
//! The core treats the segmentation/tracking model as an opaque collaborator:
//! stateful per session, slow per frame (tens of milliseconds), bound to the
//! devices reserved at session creation. Everything behind this trait — model
//! weights, media decoding, mask encoding — is out of the core's hands.

pub mod synthetic;

use crate::error::EngineError;
use crate::types::{DeviceId, ObjectResult, Prompt, SessionId, VideoInfo, VideoSource};

/// Result of attaching prompts to a frame: the engine's initial tracking
/// output for the affected objects.
#[derive(Debug, Clone)]
pub struct PromptOutcome {
    pub frame_index: u32,
    /// Identifiers of the objects created or refined by this call.
    pub object_ids: Vec<u32>,
    /// Initial per-object results on the prompted frame.
    pub results: Vec<ObjectResult>,
}

/// Stateful per-session tracking engine.
///
/// A single inference call is atomic and uninterruptible; the core only
/// cancels between calls. Implementations must be safe to share across
/// threads — the propagation engine invokes [`TrackingEngine::track_frame`]
/// from the blocking thread pool.
pub trait TrackingEngine: Send + Sync {
    /// Opens the video and allocates per-session engine state on the given
    /// devices, returning the video metadata.
    fn begin_session(
        &self,
        id: &SessionId,
        source: &VideoSource,
        devices: &[DeviceId],
    ) -> Result<VideoInfo, EngineError>;

    /// Attaches prompts to one frame, creating a new object per prompt or
    /// refining `object_id` when given.
    fn add_prompt(
        &self,
        id: &SessionId,
        frame_index: u32,
        prompts: &[Prompt],
        object_id: Option<u32>,
    ) -> Result<PromptOutcome, EngineError>;

    /// Drops one tracked object from the session.
    fn remove_object(&self, id: &SessionId, object_id: u32) -> Result<(), EngineError>;

    /// Clears all prompts and objects, returning the session to its initial
    /// tracking state.
    fn reset(&self, id: &SessionId) -> Result<(), EngineError>;

    /// Runs one inference step: all currently tracked objects on one frame.
    fn track_frame(&self, id: &SessionId, frame_index: u32)
        -> Result<Vec<ObjectResult>, EngineError>;

    /// Releases all engine state held for the session.
    fn release(&self, id: &SessionId) -> Result<(), EngineError>;

    /// Current device memory attributed to the session, in megabytes.
    fn memory_usage_mb(&self, id: &SessionId) -> f64;
}
