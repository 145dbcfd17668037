//! Proctor Flux - Signal-fusion attention scoring for remote proctoring
//!
//! Proctor Flux turns per-frame visual observations (head pose, gaze direction, device
//! detection, face count) into a smoothed attention score and categorical state, and
//! rolls a student's session into an integrity summary:
//! observation → attention scoring → session aggregation → summary.
//!
//! ## Modules
//!
//! - **Scorer**: Priority-ordered penalties, gaze hysteresis and EMA smoothing
//! - **Violations**: Append-only log of client-reported integrity events
//! - **Aggregator**: Per-session summary with a fixed set of counts
//! - **Slot**: Single-slot, overwrite-oldest frame handoff between capture and scoring
//! - **Pipeline**: Multi-student processor and one-shot session replay

pub mod aggregator;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod scorer;
pub mod session;
pub mod sink;
pub mod slot;
pub mod types;
pub mod violations;

pub use aggregator::SessionAggregator;
pub use config::{GazeStatePolicy, ScorerConfig};
pub use error::ProctorError;
pub use pipeline::{parse_observations_ndjson, replay_session, ProctorProcessor, SessionReplay};
pub use scorer::{AttentionScorer, ScorerContext};
pub use session::{ProctorSession, SessionKey};
pub use sink::{JsonlSink, MemorySink, NullSink, ResultSink};
pub use slot::FrameSlot;
pub use types::{
    AttentionState, FrameResult, Observation, Producer, SessionSummary, TimedObservation,
    ViolationCounts, ViolationRecord, ViolationType,
};
pub use violations::{JsonlViolationLog, MemoryViolationLog, ViolationLog, ViolationTracker};

/// Proctor Flux version
pub const PROCTOR_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name stamped on emitted records
pub const PRODUCER_NAME: &str = "proctor-flux";
