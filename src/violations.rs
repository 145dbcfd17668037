//! Violation tracking
//!
//! Integrity violations (pointer leaving the window, tab switches, ...) arrive as
//! discrete client reports, independent of the frame cadence. Every report is appended
//! to a log and counts are always recomputed from that log, so concurrent reporters
//! and restarts can't make the counts drift.

use crate::error::ProctorError;
use crate::types::{ViolationCounts, ViolationRecord, ViolationType};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Append-only storage for violation records
pub trait ViolationLog: Send + Sync {
    /// Append a record.
    ///
    /// Returns `Ok(false)` without writing when a record with the same id is
    /// already stored, so retried appends never double count.
    fn append(&self, record: &ViolationRecord) -> Result<bool, ProctorError>;

    /// All records for one student in one session, in append order
    fn records(
        &self,
        session_id: &str,
        roll_no: &str,
    ) -> Result<Vec<ViolationRecord>, ProctorError>;

    /// Remove every record of a session; returns how many were removed
    fn delete_session(&self, session_id: &str) -> Result<usize, ProctorError>;
}

#[derive(Debug, Default)]
struct LogEntries {
    records: Vec<ViolationRecord>,
    ids: HashSet<Uuid>,
}

impl LogEntries {
    fn contains(&self, record: &ViolationRecord) -> bool {
        self.ids.contains(&record.record_id)
    }

    fn push(&mut self, record: ViolationRecord) {
        self.ids.insert(record.record_id);
        self.records.push(record);
    }

    fn for_student(&self, session_id: &str, roll_no: &str) -> Vec<ViolationRecord> {
        self.records
            .iter()
            .filter(|r| r.belongs_to(session_id, roll_no))
            .cloned()
            .collect()
    }

    fn remove_session(&mut self, session_id: &str) -> usize {
        let before = self.records.len();
        self.records.retain(|r| r.session_id != session_id);
        self.ids = self.records.iter().map(|r| r.record_id).collect();
        before - self.records.len()
    }
}

/// In-process violation log
#[derive(Debug, Default)]
pub struct MemoryViolationLog {
    entries: RwLock<LogEntries>,
}

impl MemoryViolationLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of stored records across all sessions
    pub fn len(&self) -> usize {
        self.entries.read().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ViolationLog for MemoryViolationLog {
    fn append(&self, record: &ViolationRecord) -> Result<bool, ProctorError> {
        let mut entries = self.entries.write();
        if entries.contains(record) {
            return Ok(false);
        }
        entries.push(record.clone());
        Ok(true)
    }

    fn records(
        &self,
        session_id: &str,
        roll_no: &str,
    ) -> Result<Vec<ViolationRecord>, ProctorError> {
        Ok(self.entries.read().for_student(session_id, roll_no))
    }

    fn delete_session(&self, session_id: &str) -> Result<usize, ProctorError> {
        Ok(self.entries.write().remove_session(session_id))
    }
}

/// File handle the log appends to
trait LogFile: Write {
    fn len(&self) -> io::Result<u64>;
    fn truncate_to(&mut self, len: u64) -> io::Result<()>;
    fn sync(&mut self) -> io::Result<()>;
}

impl LogFile for File {
    fn len(&self) -> io::Result<u64> {
        Ok(self.metadata()?.len())
    }

    fn truncate_to(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len)
    }

    fn sync(&mut self) -> io::Result<()> {
        self.sync_data()
    }
}

/// Append one line and sync it; on failure the file is cut back to its previous length
fn write_line<F: LogFile>(file: &mut F, line: &[u8]) -> io::Result<()> {
    let committed = file.len()?;
    let written = file.write_all(line).and_then(|_| file.sync());

    if let Err(e) = written {
        if let Err(rollback) = file.truncate_to(committed) {
            warn!(error = %rollback, committed, "failed to roll back partial violation write");
        }
        return Err(e);
    }
    Ok(())
}

fn record_line(record: &ViolationRecord) -> Result<Vec<u8>, ProctorError> {
    let mut line = serde_json::to_vec(record)?;
    line.push(b'\n');
    Ok(line)
}

struct JsonlState {
    file: File,
    entries: LogEntries,
}

/// Violation log persisted as newline-delimited JSON.
///
/// The file is replayed on open, and each append is synced to disk before it is
/// acknowledged. A failed append is rolled back, so a retry starts on a fresh line.
pub struct JsonlViolationLog {
    path: PathBuf,
    state: Mutex<JsonlState>,
}

impl JsonlViolationLog {
    /// Open (or create) a log file and replay its contents
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ProctorError> {
        let path = path.as_ref().to_path_buf();
        let entries = if path.exists() {
            replay(&path)?
        } else {
            LogEntries::default()
        };

        info!(
            path = %path.display(),
            records = entries.records.len(),
            "violation log opened"
        );

        let file = open_append(&path)?;
        Ok(Self {
            path,
            state: Mutex::new(JsonlState { file, entries }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Total number of stored records across all sessions
    pub fn len(&self) -> usize {
        self.state.lock().entries.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn open_append(path: &Path) -> Result<File, ProctorError> {
    Ok(OpenOptions::new().create(true).append(true).open(path)?)
}

/// Load every record from the log.
///
/// Corruption on a terminated line is an error. An unterminated last line is what an
/// interrupted append leaves behind: it is kept if it parses and cut off otherwise.
fn replay(path: &Path) -> Result<LogEntries, ProctorError> {
    let contents = fs::read(path)?;
    let complete_len = contents
        .iter()
        .rposition(|&b| b == b'\n')
        .map_or(0, |i| i + 1);
    let (complete, tail) = contents.split_at(complete_len);

    let mut entries = LogEntries::default();
    let mut line_no = 0;
    for line in complete.split(|&b| b == b'\n') {
        line_no += 1;
        if is_blank(line) {
            continue;
        }
        let record = parse_line(path, line_no, line)?;
        if !entries.contains(&record) {
            entries.push(record);
        }
    }

    if !is_blank(tail) {
        match serde_json::from_slice::<ViolationRecord>(tail) {
            Ok(record) => {
                open_append(path)?.write_all(b"\n")?;
                if !entries.contains(&record) {
                    entries.push(record);
                }
            }
            Err(e) => {
                warn!(
                    path = %path.display(),
                    bytes = tail.len(),
                    error = %e,
                    "dropping incomplete trailing violation record"
                );
                OpenOptions::new()
                    .write(true)
                    .open(path)?
                    .set_len(complete_len as u64)?;
            }
        }
    }

    Ok(entries)
}

fn is_blank(line: &[u8]) -> bool {
    line.iter().all(u8::is_ascii_whitespace)
}

fn parse_line(path: &Path, line_no: usize, line: &[u8]) -> Result<ViolationRecord, ProctorError> {
    serde_json::from_slice(line).map_err(|e| {
        ProctorError::ParseError(format!("{} line {}: {}", path.display(), line_no, e))
    })
}

impl ViolationLog for JsonlViolationLog {
    fn append(&self, record: &ViolationRecord) -> Result<bool, ProctorError> {
        let mut state = self.state.lock();
        if state.entries.contains(record) {
            return Ok(false);
        }

        write_line(&mut state.file, &record_line(record)?)?;

        state.entries.push(record.clone());
        Ok(true)
    }

    fn records(
        &self,
        session_id: &str,
        roll_no: &str,
    ) -> Result<Vec<ViolationRecord>, ProctorError> {
        Ok(self.state.lock().entries.for_student(session_id, roll_no))
    }

    fn delete_session(&self, session_id: &str) -> Result<usize, ProctorError> {
        let mut state = self.state.lock();

        let kept: Vec<&ViolationRecord> = state
            .entries
            .records
            .iter()
            .filter(|r| r.session_id != session_id)
            .collect();
        let removed = state.entries.records.len() - kept.len();
        if removed == 0 {
            return Ok(0);
        }

        // The append handle is opened on the sibling before the rename, so it always
        // names the live log
        let tmp_path = self.path.with_extension("jsonl.tmp");
        let mut tmp = File::create(&tmp_path)?;
        for record in &kept {
            tmp.write_all(&record_line(record)?)?;
        }
        tmp.sync_all()?;
        let file = open_append(&tmp_path)?;
        fs::rename(&tmp_path, &self.path)?;

        state.file = file;
        state.entries.remove_session(session_id);
        Ok(removed)
    }
}

/// Records violations and reports per-student counts derived from the log
#[derive(Clone)]
pub struct ViolationTracker {
    log: Arc<dyn ViolationLog>,
}

impl Default for ViolationTracker {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl ViolationTracker {
    pub fn new(log: Arc<dyn ViolationLog>) -> Self {
        Self { log }
    }

    /// Tracker backed by a fresh in-memory log
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryViolationLog::new()))
    }

    /// Tracker backed by an NDJSON file
    pub fn open_jsonl(path: impl AsRef<Path>) -> Result<Self, ProctorError> {
        Ok(Self::new(Arc::new(JsonlViolationLog::open(path)?)))
    }

    /// Append a new violation and return the stored record
    pub fn record(
        &self,
        session_id: &str,
        roll_no: &str,
        violation_type: ViolationType,
        timestamp: DateTime<Utc>,
    ) -> Result<ViolationRecord, ProctorError> {
        let record = ViolationRecord::new(session_id, roll_no, violation_type, timestamp);
        self.record_entry(&record)?;
        Ok(record)
    }

    /// Append a caller-built record; returns `false` if it was already stored
    pub fn record_entry(&self, record: &ViolationRecord) -> Result<bool, ProctorError> {
        let appended = self.log.append(record)?;
        debug!(
            session_id = %record.session_id,
            roll_no = %record.roll_no,
            violation = %record.violation_type,
            appended,
            "violation reported"
        );
        Ok(appended)
    }

    /// Counts by violation type, recomputed from the log
    pub fn counts(&self, session_id: &str, roll_no: &str) -> Result<ViolationCounts, ProctorError> {
        let records = self.log.records(session_id, roll_no)?;
        Ok(ViolationCounts::from_records(&records))
    }

    pub fn records(
        &self,
        session_id: &str,
        roll_no: &str,
    ) -> Result<Vec<ViolationRecord>, ProctorError> {
        self.log.records(session_id, roll_no)
    }

    /// Drop every record for a deleted session
    pub fn delete_session(&self, session_id: &str) -> Result<usize, ProctorError> {
        let removed = self.log.delete_session(session_id)?;
        info!(session_id, removed, "violation records deleted");
        Ok(removed)
    }
}
