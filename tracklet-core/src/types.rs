//! Core data types shared across the session store, propagation engine, and
//! transport layers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque session identifier.
///
/// Caller-supplied at creation or generated as a UUID v4. The store guarantees
/// at most one live record per identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a fresh collision-free identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for SessionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Identifier of one worker/GPU in the device pool (e.g. `cuda:0`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Frame traversal direction for a propagation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Forward,
    Backward,
    Both,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Forward => f.write_str("forward"),
            Self::Backward => f.write_str("backward"),
            Self::Both => f.write_str("both"),
        }
    }
}

/// Where the session's video comes from. Decoding is the engine's concern;
/// the core only carries the descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VideoSource {
    /// Local filesystem path.
    Path(String),
    /// Remote http/https URL.
    Url(String),
    /// Raw video bytes already delivered by the caller.
    Bytes(Vec<u8>),
}

impl VideoSource {
    /// Short human-readable descriptor for logging.
    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Self::Path(p) => format!("path:{p}"),
            Self::Url(u) => format!("url:{u}"),
            Self::Bytes(b) => format!("bytes:{}", b.len()),
        }
    }
}

/// Frame dimensions in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

/// Immutable metadata of the session's video, established at session start.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VideoInfo {
    pub total_frames: u32,
    pub fps: f32,
    pub resolution: Resolution,
    pub duration_seconds: f32,
}

/// Per-object tracking output for one frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectResult {
    /// Engine-assigned object identifier, stable across frames.
    pub id: u32,
    /// Run-length-encoded binary mask (opaque counts string).
    pub mask: String,
    /// Bounding box `[cx, cy, w, h]`, normalized to `[0, 1]`.
    #[serde(rename = "box")]
    pub bbox: [f32; 4],
    /// Confidence score in `[0, 1]`.
    pub score: f32,
}

/// All tracked objects for one frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameResult {
    pub frame_index: u32,
    pub objects: Vec<ObjectResult>,
}

/// A single prompt attached to one frame to seed or refine tracking.
///
/// Coordinates are normalized to `[0, 1]`. Unknown fields are rejected at the
/// boundary rather than silently accumulated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase", deny_unknown_fields)]
pub enum Prompt {
    /// Free-text description of the object to track.
    Text { text: String },
    /// Positive/negative click points; labels are 1 (foreground) or 0.
    Point {
        points: Vec<[f32; 2]>,
        point_labels: Vec<u8>,
    },
    /// Bounding box exemplar; `label` false marks a negative exemplar.
    Box {
        #[serde(rename = "box")]
        bbox: [f32; 4],
        #[serde(default = "default_box_label")]
        label: bool,
    },
}

const fn default_box_label() -> bool {
    true
}

impl Prompt {
    /// Validates coordinate ranges and label arities.
    ///
    /// # Errors
    ///
    /// Returns a human-readable reason when the prompt is malformed.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            Self::Text { text } => {
                if text.trim().is_empty() {
                    return Err("text prompt must not be empty".to_string());
                }
            }
            Self::Point {
                points,
                point_labels,
            } => {
                if points.is_empty() {
                    return Err("point prompt requires at least one point".to_string());
                }
                if points.len() != point_labels.len() {
                    return Err(format!(
                        "point prompt has {} points but {} labels",
                        points.len(),
                        point_labels.len()
                    ));
                }
                if point_labels.iter().any(|l| *l > 1) {
                    return Err("point labels must be 0 or 1".to_string());
                }
                if points.iter().flatten().any(|c| !(0.0..=1.0).contains(c)) {
                    return Err("point coordinates must be normalized to [0, 1]".to_string());
                }
            }
            Self::Box { bbox, .. } => {
                if bbox.iter().any(|c| !(0.0..=1.0).contains(c)) {
                    return Err("box coordinates must be normalized to [0, 1]".to_string());
                }
            }
        }
        Ok(())
    }
}
