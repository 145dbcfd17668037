//! Proctoring pipeline orchestration
//!
//! This module provides the public API for scoring exam sessions. It offers a
//! stateless one-shot replay of a recorded observation sequence and a stateful
//! [`ProctorProcessor`] that tracks many live students at once.

use crate::config::ScorerConfig;
use crate::error::ProctorError;
use crate::scorer::AttentionScorer;
use crate::session::{ProctorSession, SessionKey};
use crate::sink::{NullSink, ResultSink};
use crate::types::{
    FrameEvent, FrameResult, Observation, Producer, ScoredFrame, SessionSummary,
    TimedObservation, ViolationCounts, ViolationType,
};
use crate::violations::ViolationTracker;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Scored frames and summary produced by a replay
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionReplay {
    pub frames: Vec<ScoredFrame>,
    pub summary: SessionSummary,
}

/// Parse newline-delimited timestamped observations; blank lines are skipped
pub fn parse_observations_ndjson(input: &str) -> Result<Vec<TimedObservation>, ProctorError> {
    input
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(index, line)| {
            serde_json::from_str(line.trim()).map_err(|e| {
                ProctorError::ParseError(format!("observation on line {}: {}", index + 1, e))
            })
        })
        .collect()
}

/// Score a recorded observation sequence with a fresh context and summarize it
/// (stateless, one-shot).
///
/// Observations are scored in the order given, using each one's own timestamp for
/// the gaze timer.
pub fn replay_session(
    config: ScorerConfig,
    session_id: &str,
    roll_no: &str,
    observations: &[TimedObservation],
    violations: &ViolationCounts,
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
) -> Result<SessionReplay, ProctorError> {
    let scorer = AttentionScorer::new(config)?;
    let mut session = ProctorSession::start(SessionKey::new(session_id, roll_no), start_time);

    let frames = observations
        .iter()
        .map(|timed| session.observe(&scorer, &timed.observation, timed.timestamp))
        .collect();

    let summary = session.finish(violations, end_time);
    Ok(SessionReplay { frames, summary })
}

/// Stateful processor for live sessions.
///
/// Each started student gets an exclusive scorer context. Calls for the same student
/// are serialized; different students are scored in parallel.
pub struct ProctorProcessor {
    scorer: AttentionScorer,
    tracker: ViolationTracker,
    sink: Arc<dyn ResultSink>,
    sessions: RwLock<HashMap<SessionKey, Mutex<ProctorSession>>>,
    producer: Producer,
}

impl ProctorProcessor {
    /// Create a processor with an in-memory violation log and no result sink
    pub fn new(config: ScorerConfig) -> Result<Self, ProctorError> {
        Ok(Self {
            scorer: AttentionScorer::new(config)?,
            tracker: ViolationTracker::in_memory(),
            sink: Arc::new(NullSink),
            sessions: RwLock::new(HashMap::new()),
            producer: Producer::new(),
        })
    }

    /// Use a specific violation tracker
    pub fn with_tracker(mut self, tracker: ViolationTracker) -> Self {
        self.tracker = tracker;
        self
    }

    /// Emit every scored frame to `sink`
    pub fn with_sink(mut self, sink: Arc<dyn ResultSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn config(&self) -> &ScorerConfig {
        self.scorer.config()
    }

    pub fn tracker(&self) -> &ViolationTracker {
        &self.tracker
    }

    /// Provenance stamped on every emitted frame event
    pub fn producer(&self) -> &Producer {
        &self.producer
    }

    pub fn instance_id(&self) -> &str {
        &self.producer.instance_id
    }

    /// Number of students currently being proctored
    pub fn active_students(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_active(&self, session_id: &str, roll_no: &str) -> bool {
        self.sessions.read().contains_key(&SessionKey::new(session_id, roll_no))
    }

    /// Start proctoring a student now
    pub fn start_student(&self, session_id: &str, roll_no: &str) -> Result<(), ProctorError> {
        self.start_student_at(session_id, roll_no, Utc::now())
    }

    /// Start proctoring a student at `started_at`
    pub fn start_student_at(
        &self,
        session_id: &str,
        roll_no: &str,
        started_at: DateTime<Utc>,
    ) -> Result<(), ProctorError> {
        let key = SessionKey::new(session_id, roll_no);
        let mut sessions = self.sessions.write();
        if sessions.contains_key(&key) {
            return Err(ProctorError::SessionAlreadyActive {
                session_id: key.session_id,
                roll_no: key.roll_no,
            });
        }

        sessions.insert(key.clone(), Mutex::new(ProctorSession::start(key, started_at)));
        info!(session_id, roll_no, %started_at, "student session started");
        Ok(())
    }

    /// Score a frame observed now
    pub fn submit_frame(
        &self,
        session_id: &str,
        roll_no: &str,
        observation: &Observation,
    ) -> Result<FrameResult, ProctorError> {
        self.submit_frame_at(session_id, roll_no, observation, Utc::now())
    }

    /// Score a frame observed at `observed_at`.
    ///
    /// The result is emitted to the sink after scoring; a sink failure is logged and
    /// does not fail the call.
    pub fn submit_frame_at(
        &self,
        session_id: &str,
        roll_no: &str,
        observation: &Observation,
        observed_at: DateTime<Utc>,
    ) -> Result<FrameResult, ProctorError> {
        let key = SessionKey::new(session_id, roll_no);

        // Holding the read guard keeps stop_student from removing the session mid-call
        let frame = {
            let sessions = self.sessions.read();
            let session = sessions
                .get(&key)
                .ok_or_else(|| ProctorError::SessionNotActive {
                    session_id: session_id.to_string(),
                    roll_no: roll_no.to_string(),
                })?;
            let mut session = session.lock();
            session.observe(&self.scorer, observation, observed_at)
        };

        let event = FrameEvent {
            producer: self.producer.clone(),
            session_id: key.session_id,
            roll_no: key.roll_no,
            frame,
        };
        if let Err(e) = self.sink.emit(&event) {
            warn!(session_id, roll_no, error = %e, "failed to emit frame result");
        }

        Ok(frame.result)
    }

    /// Record a violation now and return the student's updated counts.
    ///
    /// Reports are accepted whether or not the student is being scored. A report that
    /// overlaps `stop_student` either lands in that summary or after the session closed.
    pub fn report_violation(
        &self,
        session_id: &str,
        roll_no: &str,
        violation_type: ViolationType,
    ) -> Result<ViolationCounts, ProctorError> {
        // Excludes a concurrent stop between the append and its summary read
        let _sessions = self.sessions.read();
        self.tracker.record(session_id, roll_no, violation_type, Utc::now())?;
        self.tracker.counts(session_id, roll_no)
    }

    /// Current violation counts for a student
    pub fn violation_counts(
        &self,
        session_id: &str,
        roll_no: &str,
    ) -> Result<ViolationCounts, ProctorError> {
        self.tracker.counts(session_id, roll_no)
    }

    /// Stop proctoring a student now and return the session summary
    pub fn stop_student(
        &self,
        session_id: &str,
        roll_no: &str,
    ) -> Result<SessionSummary, ProctorError> {
        self.stop_student_at(session_id, roll_no, Utc::now())
    }

    /// Stop proctoring a student at `ended_at`.
    ///
    /// Violation counts are read under the registry write lock, before the session is
    /// closed: no report can slip in between, and a storage error leaves the student
    /// active so the call can be retried.
    pub fn stop_student_at(
        &self,
        session_id: &str,
        roll_no: &str,
        ended_at: DateTime<Utc>,
    ) -> Result<SessionSummary, ProctorError> {
        let key = SessionKey::new(session_id, roll_no);
        let mut sessions = self.sessions.write();
        if !sessions.contains_key(&key) {
            return Err(ProctorError::SessionNotActive {
                session_id: key.session_id,
                roll_no: key.roll_no,
            });
        }

        let violations = self.tracker.counts(session_id, roll_no)?;

        let session = sessions
            .remove(&key)
            .ok_or_else(|| ProctorError::SessionNotActive {
                session_id: session_id.to_string(),
                roll_no: roll_no.to_string(),
            })?;
        drop(sessions);

        let summary = session.into_inner().finish(&violations, ended_at);
        info!(
            session_id,
            roll_no,
            total_events = summary.total_events,
            average = summary.average_attention_score,
            "student session stopped"
        );
        Ok(summary)
    }
}
