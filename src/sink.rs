//! Result sinks
//!
//! Every scored frame is handed to a sink for storage or live broadcast. Emission is
//! fire-and-forget from the scorer's point of view: a failing sink is reported but
//! never alters scoring or aggregation.

use crate::error::ProctorError;
use crate::types::FrameEvent;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;

/// Destination for per-frame results
pub trait ResultSink: Send + Sync {
    fn emit(&self, event: &FrameEvent) -> Result<(), ProctorError>;
}

/// Sink that discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl ResultSink for NullSink {
    fn emit(&self, _event: &FrameEvent) -> Result<(), ProctorError> {
        Ok(())
    }
}

/// Sink that keeps events in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<FrameEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all emitted events
    pub fn events(&self) -> Vec<FrameEvent> {
        self.events.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ResultSink for MemorySink {
    fn emit(&self, event: &FrameEvent) -> Result<(), ProctorError> {
        self.events.lock().push(event.clone());
        Ok(())
    }
}

/// Sink writing one JSON record per line to any writer
pub struct JsonlSink<W: Write + Send> {
    writer: Mutex<W>,
}

impl<W: Write + Send> JsonlSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }
}

impl JsonlSink<File> {
    /// Append to an event log file, creating it if needed
    pub fn append_to(path: impl AsRef<Path>) -> Result<Self, ProctorError> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self::new(file))
    }
}

impl<W: Write + Send> ResultSink for JsonlSink<W> {
    fn emit(&self, event: &FrameEvent) -> Result<(), ProctorError> {
        let mut line = serde_json::to_string(event)?;
        line.push('\n');

        let mut writer = self.writer.lock();
        writer.write_all(line.as_bytes())?;
        writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AttentionState, FrameResult, Producer, ScoredFrame};
    use chrono::{TimeZone, Utc};

    fn event(score: f64) -> FrameEvent {
        FrameEvent {
            producer: Producer::new(),
            session_id: "sess-1".to_string(),
            roll_no: "CS001".to_string(),
            frame: ScoredFrame {
                timestamp: Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap(),
                face_count: 1,
                result: FrameResult {
                    score,
                    state: AttentionState::Focused,
                },
            },
        }
    }

    #[test]
    fn test_memory_sink_collects() {
        let sink = MemorySink::new();
        sink.emit(&event(90.0)).unwrap();
        sink.emit(&event(80.0)).unwrap();

        let events = sink.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].frame.result.score, 80.0);
    }

    #[test]
    fn test_jsonl_sink_writes_flat_records() {
        let sink = JsonlSink::new(Vec::new());
        sink.emit(&event(73.13)).unwrap();
        sink.emit(&event(75.0)).unwrap();

        let output = String::from_utf8(sink.into_inner()).unwrap();
        let lines: Vec<&str> = output.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["session_id"], "sess-1");
        assert_eq!(first["roll_no"], "CS001");
        assert_eq!(first["score"], 73.13);
        assert_eq!(first["state"], "focused");
        assert_eq!(first["face_count"], 1);
        assert_eq!(first["timestamp"], "2024-03-01T09:00:00Z");
        assert_eq!(first["producer"]["name"], "proctor-flux");
    }

    #[test]
    fn test_jsonl_sink_appends_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.jsonl");

        JsonlSink::<File>::append_to(&path).unwrap().emit(&event(90.0)).unwrap();
        JsonlSink::<File>::append_to(&path).unwrap().emit(&event(91.0)).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 2);
    }
}
