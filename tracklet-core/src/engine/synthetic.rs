//! Deterministic in-process tracking engine.
//!
//! Stands in for the external GPU model during tests and local development:
//! objects follow fixed trajectories derived from their identifiers, masks are
//! run-length-encoded rectangles, and every output is reproducible. Per-frame
//! latency and a failing frame can be injected to exercise timeout,
//! cancellation, and error paths.

use dashmap::DashMap;
use std::collections::BTreeSet;
use std::time::Duration;

use crate::error::EngineError;
use crate::types::{
    DeviceId, ObjectResult, Prompt, Resolution, SessionId, VideoInfo, VideoSource,
};

use super::{PromptOutcome, TrackingEngine};

const DEFAULT_TOTAL_FRAMES: u32 = 120;
const DEFAULT_FPS: f32 = 30.0;
const DEFAULT_RESOLUTION: Resolution = Resolution {
    width: 640,
    height: 360,
};

#[derive(Debug)]
struct SyntheticSession {
    info: VideoInfo,
    objects: BTreeSet<u32>,
    next_object_id: u32,
}

/// Deterministic [`TrackingEngine`] implementation.
pub struct SyntheticEngine {
    sessions: DashMap<SessionId, SyntheticSession>,
    total_frames: u32,
    frame_latency: Duration,
    fail_at_frame: Option<u32>,
}

impl SyntheticEngine {
    #[must_use]
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
            total_frames: DEFAULT_TOTAL_FRAMES,
            frame_latency: Duration::ZERO,
            fail_at_frame: None,
        }
    }

    /// Overrides the frame count reported for every opened video.
    #[must_use]
    pub fn with_total_frames(mut self, total_frames: u32) -> Self {
        self.total_frames = total_frames;
        self
    }

    /// Simulated inference cost per frame.
    #[must_use]
    pub fn with_frame_latency(mut self, latency: Duration) -> Self {
        self.frame_latency = latency;
        self
    }

    /// Makes `track_frame` fail when it reaches the given frame index.
    #[must_use]
    pub fn with_failure_at(mut self, frame_index: u32) -> Self {
        self.fail_at_frame = Some(frame_index);
        self
    }

    fn synthesize(&self, object_id: u32, frame_index: u32, resolution: Resolution) -> ObjectResult {
        let t = frame_index as f32;
        let phase = object_id as f32 * 0.37;
        let w = 0.18;
        let h = 0.24;
        let cx = (0.5 + 0.3 * (0.05 * t + phase).sin()).clamp(w / 2.0, 1.0 - w / 2.0);
        let cy = (0.5 + 0.2 * (0.04 * t + phase).cos()).clamp(h / 2.0, 1.0 - h / 2.0);
        let bbox = [cx, cy, w, h];
        ObjectResult {
            id: object_id,
            mask: rect_rle(resolution, bbox),
            bbox,
            score: (0.97 - 0.0008 * t).clamp(0.5, 1.0),
        }
    }
}

impl Default for SyntheticEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl TrackingEngine for SyntheticEngine {
    fn begin_session(
        &self,
        id: &SessionId,
        _source: &VideoSource,
        _devices: &[DeviceId],
    ) -> Result<VideoInfo, EngineError> {
        let info = VideoInfo {
            total_frames: self.total_frames,
            fps: DEFAULT_FPS,
            resolution: DEFAULT_RESOLUTION,
            duration_seconds: self.total_frames as f32 / DEFAULT_FPS,
        };
        self.sessions.insert(
            id.clone(),
            SyntheticSession {
                info,
                objects: BTreeSet::new(),
                next_object_id: 1,
            },
        );
        Ok(info)
    }

    fn add_prompt(
        &self,
        id: &SessionId,
        frame_index: u32,
        prompts: &[Prompt],
        object_id: Option<u32>,
    ) -> Result<PromptOutcome, EngineError> {
        let mut session = self
            .sessions
            .get_mut(id)
            .ok_or_else(|| EngineError::UnknownSession { id: id.clone() })?;

        if frame_index >= session.info.total_frames {
            return Err(EngineError::Inference {
                detail: format!(
                    "frame {frame_index} out of range for {}-frame video",
                    session.info.total_frames
                ),
            });
        }

        let affected = match object_id {
            Some(existing) => {
                if !session.objects.contains(&existing) {
                    return Err(EngineError::UnknownObject {
                        object_id: existing,
                    });
                }
                vec![existing]
            }
            None => {
                let mut created = Vec::with_capacity(prompts.len());
                for _ in prompts {
                    let next = session.next_object_id;
                    session.next_object_id += 1;
                    session.objects.insert(next);
                    created.push(next);
                }
                created
            }
        };

        let resolution = session.info.resolution;
        let results = affected
            .iter()
            .map(|obj| self.synthesize(*obj, frame_index, resolution))
            .collect();

        Ok(PromptOutcome {
            frame_index,
            object_ids: affected,
            results,
        })
    }

    fn remove_object(&self, id: &SessionId, object_id: u32) -> Result<(), EngineError> {
        let mut session = self
            .sessions
            .get_mut(id)
            .ok_or_else(|| EngineError::UnknownSession { id: id.clone() })?;
        if !session.objects.remove(&object_id) {
            return Err(EngineError::UnknownObject { object_id });
        }
        Ok(())
    }

    fn reset(&self, id: &SessionId) -> Result<(), EngineError> {
        let mut session = self
            .sessions
            .get_mut(id)
            .ok_or_else(|| EngineError::UnknownSession { id: id.clone() })?;
        session.objects.clear();
        session.next_object_id = 1;
        Ok(())
    }

    fn track_frame(
        &self,
        id: &SessionId,
        frame_index: u32,
    ) -> Result<Vec<ObjectResult>, EngineError> {
        if !self.frame_latency.is_zero() {
            std::thread::sleep(self.frame_latency);
        }

        if self.fail_at_frame == Some(frame_index) {
            return Err(EngineError::Inference {
                detail: format!("synthetic failure injected at frame {frame_index}"),
            });
        }

        let session = self
            .sessions
            .get(id)
            .ok_or_else(|| EngineError::UnknownSession { id: id.clone() })?;

        let resolution = session.info.resolution;
        Ok(session
            .objects
            .iter()
            .map(|obj| self.synthesize(*obj, frame_index, resolution))
            .collect())
    }

    fn release(&self, id: &SessionId) -> Result<(), EngineError> {
        self.sessions
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| EngineError::UnknownSession { id: id.clone() })
    }

    fn memory_usage_mb(&self, id: &SessionId) -> f64 {
        self.sessions.get(id).map_or(0.0, |session| {
            512.0
                + 96.0 * session.objects.len() as f64
                + 0.25 * f64::from(session.info.total_frames)
        })
    }
}

/// Uncompressed COCO-style run-length counts (column-major, starting with a
/// zero run) for an axis-aligned rectangle in a `width x height` grid.
fn rect_rle(resolution: Resolution, bbox: [f32; 4]) -> String {
    let (width, height) = (resolution.width, resolution.height);
    let [cx, cy, w, h] = bbox;

    let x0 = (((cx - w / 2.0) * width as f32) as u32).min(width.saturating_sub(1));
    let y0 = (((cy - h / 2.0) * height as f32) as u32).min(height.saturating_sub(1));
    let x1 = (((cx + w / 2.0) * width as f32).ceil() as u32).clamp(x0 + 1, width);
    let y1 = (((cy + h / 2.0) * height as f32).ceil() as u32).clamp(y0 + 1, height);
    let rect_h = y1 - y0;

    let mut counts: Vec<u32> = Vec::with_capacity(2 * (x1 - x0) as usize + 2);
    counts.push(x0 * height + y0);
    for column in x0..x1 {
        counts.push(rect_h);
        if column + 1 < x1 {
            counts.push(height - rect_h);
        }
    }
    counts.push((height - y1) + (width - x1) * height);

    counts
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" ")
}
