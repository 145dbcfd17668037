//! Per-student proctoring session
//!
//! A [`ProctorSession`] owns the scorer context and running aggregate for one student
//! in one exam session. It is created when the student starts and consumed when the
//! student stops, so scorer state never outlives or leaks across sessions.

use crate::aggregator::SessionAggregator;
use crate::scorer::{AttentionScorer, ScorerContext};
use crate::types::{AttentionState, Observation, ScoredFrame, SessionSummary, ViolationCounts};
use chrono::{DateTime, Utc};
use tracing::debug;

/// Identifies one student within one exam session
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionKey {
    pub session_id: String,
    pub roll_no: String,
}

impl SessionKey {
    pub fn new(session_id: impl Into<String>, roll_no: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            roll_no: roll_no.into(),
        }
    }
}

/// Scoring state and running aggregate for one active student
#[derive(Debug, Clone)]
pub struct ProctorSession {
    key: SessionKey,
    started_at: DateTime<Utc>,
    context: ScorerContext,
    aggregator: SessionAggregator,
    last_state: Option<AttentionState>,
}

impl ProctorSession {
    pub fn start(key: SessionKey, started_at: DateTime<Utc>) -> Self {
        let aggregator = SessionAggregator::new(&key.session_id, &key.roll_no);
        Self {
            key,
            started_at,
            context: ScorerContext::new(),
            aggregator,
            last_state: None,
        }
    }

    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn context(&self) -> &ScorerContext {
        &self.context
    }

    pub fn frames_scored(&self) -> u32 {
        self.aggregator.frame_count()
    }

    /// Score one frame and fold it into the running aggregate
    pub fn observe(
        &mut self,
        scorer: &AttentionScorer,
        observation: &Observation,
        observed_at: DateTime<Utc>,
    ) -> ScoredFrame {
        let result = scorer.score_at(observation, &mut self.context, observed_at);

        if self.last_state != Some(result.state) {
            debug!(
                session_id = %self.key.session_id,
                roll_no = %self.key.roll_no,
                state = %result.state,
                score = result.score,
                "attention state changed"
            );
            self.last_state = Some(result.state);
        }

        let frame = ScoredFrame {
            timestamp: observed_at,
            face_count: observation.face_count,
            result,
        };
        self.aggregator.push(&frame);
        frame
    }

    /// Close the session and produce its summary; the scorer context is dropped
    pub fn finish(self, violations: &ViolationCounts, ended_at: DateTime<Utc>) -> SessionSummary {
        self.aggregator.finish(violations, self.started_at, ended_at)
    }
}
