//! Session aggregation
//!
//! Rolls the ordered per-frame results of one student's session into the terminal
//! [`SessionSummary`]. Frames can be pushed as they are scored, or a complete
//! sequence can be summarized in one call; both paths produce the same summary.

use crate::types::{round2, AttentionState, ScoredFrame, SessionSummary, ViolationCounts};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Running per-session frame statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionAggregator {
    session_id: String,
    roll_no: String,
    score_sum: f64,
    frame_count: u32,
    distracted_count: u32,
    multiple_faces_count: u32,
    no_face_count: u32,
    device_detected_count: u32,
}

impl SessionAggregator {
    pub fn new(session_id: impl Into<String>, roll_no: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            roll_no: roll_no.into(),
            score_sum: 0.0,
            frame_count: 0,
            distracted_count: 0,
            multiple_faces_count: 0,
            no_face_count: 0,
            device_detected_count: 0,
        }
    }

    /// Summarize a complete, ordered frame sequence
    pub fn summarize(
        session_id: &str,
        roll_no: &str,
        frames: &[ScoredFrame],
        violations: &ViolationCounts,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
    ) -> SessionSummary {
        let mut aggregator = Self::new(session_id, roll_no);
        for frame in frames {
            aggregator.push(frame);
        }
        aggregator.finish(violations, start_time, end_time)
    }

    /// Accumulate one scored frame
    pub fn push(&mut self, frame: &ScoredFrame) {
        self.score_sum += frame.result.score;
        self.frame_count += 1;

        match frame.result.state {
            AttentionState::Away | AttentionState::Distracted => self.distracted_count += 1,
            AttentionState::MultipleFacesDetected => self.multiple_faces_count += 1,
            AttentionState::DeviceDetected => self.device_detected_count += 1,
            AttentionState::Focused => {}
        }

        if frame.face_count == 0 {
            self.no_face_count += 1;
        }
    }

    /// Number of frames accumulated so far
    pub fn frame_count(&self) -> u32 {
        self.frame_count
    }

    /// Mean score so far (two decimal places), 0 before any frame
    pub fn average_score(&self) -> f64 {
        if self.frame_count == 0 {
            return 0.0;
        }
        round2(self.score_sum / self.frame_count as f64)
    }

    /// Build the summary.
    ///
    /// Duration comes from the recorded session window, not from the frames, so a
    /// session with no scored frames can still report a non-zero duration.
    pub fn finish(
        &self,
        violations: &ViolationCounts,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
    ) -> SessionSummary {
        SessionSummary {
            session_id: self.session_id.clone(),
            roll_no: self.roll_no.clone(),
            average_attention_score: self.average_score(),
            distracted_count: self.distracted_count,
            multiple_faces_count: self.multiple_faces_count,
            no_face_count: self.no_face_count,
            device_detected_count: self.device_detected_count,
            mouse_out_count: violations.mouse_out(),
            tab_switch_count: violations.tab_switch(),
            other_violation_counts: violations.others(),
            total_events: self.frame_count,
            session_duration: session_duration(start_time, end_time),
        }
    }
}

/// Seconds between start and stop; an inverted window yields 0
fn session_duration(start_time: DateTime<Utc>, end_time: DateTime<Utc>) -> f64 {
    let seconds = (end_time - start_time).num_milliseconds() as f64 / 1000.0;
    if seconds < 0.0 {
        warn!(%start_time, %end_time, "session stop precedes start, reporting zero duration");
        return 0.0;
    }
    seconds
}
