//! Core data types for Proctor Flux
//!
//! This module defines the observation bundle consumed by the scorer, the per-frame
//! result it produces, violation records, and the session summary emitted at stop.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Head orientation in degrees, as produced by the landmark pose solver
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HeadPose {
    pub yaw: f64,
    pub pitch: f64,
    #[serde(default)]
    pub roll: f64,
}

/// Coarse gaze direction from the iris-position estimator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GazeDirection {
    Left,
    Right,
    Center,
}

/// Gaze estimate for the primary face
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Gaze {
    pub direction: GazeDirection,
    /// Estimator confidence (0.0 - 1.0)
    #[serde(default)]
    pub confidence: f64,
}

impl Gaze {
    pub fn is_off_center(&self) -> bool {
        self.direction != GazeDirection::Center
    }
}

/// Handheld device detection result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceDetection {
    /// Whether a device was spotted in the frame.
    ///
    /// Older detector builds report this as `phone_detected`.
    #[serde(alias = "phone_detected")]
    pub present: bool,
    /// Bounding box as `[x, y, width, height]` in pixels
    #[serde(default)]
    pub bbox: Option<[i32; 4]>,
    /// Detector confidence (0.0 - 1.0)
    #[serde(default)]
    pub confidence: f64,
}

/// A single frame's fused signal bundle.
///
/// Every signal is independently optional: `None` means the producer had nothing
/// for this frame, which is never treated as a negative reading. Absent signals
/// serialize as explicit `null`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    #[serde(default)]
    pub head_pose: Option<HeadPose>,
    #[serde(default)]
    pub gaze: Option<Gaze>,
    #[serde(default)]
    pub device: Option<DeviceDetection>,
    /// Number of faces found in the frame
    pub face_count: u32,
}

impl Observation {
    /// Observation with a single face and no other signal
    pub fn single_face() -> Self {
        Self {
            head_pose: None,
            gaze: None,
            device: None,
            face_count: 1,
        }
    }

    pub fn device_present(&self) -> bool {
        self.device.as_ref().is_some_and(|d| d.present)
    }
}

/// An observation stamped with its capture time (used for replay and streaming input)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimedObservation {
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub observation: Observation,
}

/// Discrete behavioral state assigned to a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttentionState {
    Focused,
    Away,
    Distracted,
    MultipleFacesDetected,
    DeviceDetected,
}

impl AttentionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttentionState::Focused => "focused",
            AttentionState::Away => "away",
            AttentionState::Distracted => "distracted",
            AttentionState::MultipleFacesDetected => "multiple_faces_detected",
            AttentionState::DeviceDetected => "device_detected",
        }
    }
}

impl fmt::Display for AttentionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-frame scoring result
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FrameResult {
    /// Smoothed attention score (0-100, two decimal places)
    pub score: f64,
    pub state: AttentionState,
}

/// A frame result together with the frame facts the aggregator needs
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoredFrame {
    pub timestamp: DateTime<Utc>,
    pub face_count: u32,
    #[serde(flatten)]
    pub result: FrameResult,
}

/// Producer provenance stamped on emitted records
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Producer {
    pub name: String,
    pub version: String,
    /// Identifies one running processor
    pub instance_id: String,
}

impl Producer {
    /// Provenance for a new processor instance
    pub fn new() -> Self {
        Self {
            name: crate::PRODUCER_NAME.to_string(),
            version: crate::PROCTOR_VERSION.to_string(),
            instance_id: Uuid::new_v4().to_string(),
        }
    }
}

impl Default for Producer {
    fn default() -> Self {
        Self::new()
    }
}

/// Record emitted to the result sink for every scored frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameEvent {
    pub producer: Producer,
    pub session_id: String,
    pub roll_no: String,
    #[serde(flatten)]
    pub frame: ScoredFrame,
}

/// Client-reported integrity violation types
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationType {
    /// Pointer left the exam window
    MouseOut,
    /// Exam tab lost visibility
    TabSwitch,
    /// For client-defined violation kinds
    #[serde(untagged)]
    Other(String),
}

impl ViolationType {
    pub fn as_str(&self) -> &str {
        match self {
            ViolationType::MouseOut => "mouse_out",
            ViolationType::TabSwitch => "tab_switch",
            ViolationType::Other(name) => name.as_str(),
        }
    }
}

impl From<&str> for ViolationType {
    fn from(value: &str) -> Self {
        match value {
            "mouse_out" => ViolationType::MouseOut,
            "tab_switch" => ViolationType::TabSwitch,
            other => ViolationType::Other(other.to_string()),
        }
    }
}

impl fmt::Display for ViolationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One immutable entry in the violation log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViolationRecord {
    /// Unique id; re-appending a record with a known id is a no-op
    pub record_id: Uuid,
    pub session_id: String,
    pub roll_no: String,
    pub violation_type: ViolationType,
    pub timestamp: DateTime<Utc>,
}

impl ViolationRecord {
    /// Create a record with a fresh id
    pub fn new(
        session_id: impl Into<String>,
        roll_no: impl Into<String>,
        violation_type: ViolationType,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            record_id: Uuid::new_v4(),
            session_id: session_id.into(),
            roll_no: roll_no.into(),
            violation_type,
            timestamp,
        }
    }

    pub fn belongs_to(&self, session_id: &str, roll_no: &str) -> bool {
        self.session_id == session_id && self.roll_no == roll_no
    }
}

/// Violation counts keyed by violation type name
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViolationCounts {
    pub counts: BTreeMap<String, u32>,
}

impl ViolationCounts {
    /// Count records by type
    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a ViolationRecord>) -> Self {
        let mut counts = BTreeMap::new();
        for record in records {
            *counts
                .entry(record.violation_type.as_str().to_string())
                .or_insert(0) += 1;
        }
        Self { counts }
    }

    pub fn get(&self, violation_type: &ViolationType) -> u32 {
        self.counts
            .get(violation_type.as_str())
            .copied()
            .unwrap_or(0)
    }

    pub fn mouse_out(&self) -> u32 {
        self.get(&ViolationType::MouseOut)
    }

    pub fn tab_switch(&self) -> u32 {
        self.get(&ViolationType::TabSwitch)
    }

    pub fn total(&self) -> u32 {
        self.counts.values().sum()
    }

    /// Counts for types other than the standard `mouse_out` / `tab_switch`
    pub fn others(&self) -> BTreeMap<String, u32> {
        self.counts
            .iter()
            .filter(|(name, _)| {
                name.as_str() != ViolationType::MouseOut.as_str()
                    && name.as_str() != ViolationType::TabSwitch.as_str()
            })
            .map(|(name, count)| (name.clone(), *count))
            .collect()
    }
}

/// Terminal integrity summary for one student's session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub roll_no: String,
    /// Mean frame score (two decimal places), 0 when no frame was scored
    pub average_attention_score: f64,
    /// Frames in the `away` or `distracted` state
    pub distracted_count: u32,
    pub multiple_faces_count: u32,
    /// Frames where no face was found
    pub no_face_count: u32,
    pub device_detected_count: u32,
    pub mouse_out_count: u32,
    pub tab_switch_count: u32,
    /// Violation counts for non-standard types
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub other_violation_counts: BTreeMap<String, u32>,
    /// Number of scored frames
    pub total_events: u32,
    /// Session length in seconds, from the recorded start/stop timestamps
    pub session_duration: f64,
}

/// Round to two decimal places, the precision used at every output boundary
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
