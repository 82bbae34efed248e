//! Exam Proctoring Kernel
//!
//! This crate implements the proctoring core of an exam-taking page,
//! independent of any UI framework.
//!
//! # Architecture
//!
//! A `ProctoringSession` owns one attempt `(test_id, student_id)` and keeps
//! these invariants by construction:
//!
//! 1. **Count is history**: the violation count is the history length.
//! 2. **Terminal auto-submit**: once raised, the auto-submit signal stays raised.
//! 3. **Monotonic time away**: away time only grows, and only while the tab is hidden.
//! 4. **One warning**: a new violation replaces the visible warning and its timer.
//! 5. **Logging never blocks**: persistence runs behind a bounded queue and
//!    its failures never reach the exam flow.
//! 6. **Submit once**: `ExamAttempt` turns the auto-submit signal into
//!    exactly one submission.
//!
//! # Module Structure
//!
//! - `detector`: environment events to violations, time-away tracking
//! - `accumulator`: count, history, warning text, auto-submit latch
//! - `warning`: warning slot and the presentation snapshot
//! - `session`: lifecycle and timer polling
//! - `sink`, `storage`, `chain`: append-only, hash-chained violation log
//! - `exam`: submission integration
//! - `report`: per-test violation summary

use anyhow::{anyhow, Result};
use rand::RngCore;
use rusqlite::{Connection, OpenFlags};
use std::sync::OnceLock;
use std::time::Duration;

pub mod accumulator;
pub mod chain;
pub mod clock;
pub mod config;
pub mod detector;
pub mod environment;
pub mod exam;
pub mod report;
pub mod session;
pub mod sink;
pub mod storage;
pub mod timer;
pub mod violation;
pub mod warning;

pub use accumulator::{Verdict, ViolationAccumulator};
pub use chain::{hash_entry, verify_chain, ChainStatus};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ProctordConfig, ProctoringConfig};
pub use detector::{
    EnvironmentEvent, TabState, TimeAwayTracker, TimedEvent, ViolationDetector,
};
pub use environment::{ExamEnvironment, HeadlessEnvironment};
pub use exam::{ExamAttempt, SubmissionRequest, SubmissionState, SubmitReason, Submitter};
pub use report::{load_report, StudentSummary, ViolationDetail, ViolationReport};
pub use session::{EventOutcome, ProctoringSession, SessionPhase};
pub use sink::{BackgroundSink, SinkCounters, ViolationLogEntry, ViolationSink};
pub use storage::{InMemoryViolationStore, SqliteViolationStore, StudentIdentity, ViolationStore};
pub use violation::{ViolationRecord, ViolationType};
pub use warning::{Severity, Warning, WarningView};

pub fn shared_memory_uri() -> String {
    let mut bytes = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!(
        "file:exam_proctor_{:x}?mode=memory&cache=shared",
        u64::from_le_bytes(bytes)
    )
}

/// How long a writer waits for another process's lock on the shared log.
pub const DB_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

pub(crate) fn open_db_connection(db_path: &str) -> Result<Connection> {
    let conn = if db_path.starts_with("file:") {
        Connection::open_with_flags(
            db_path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_URI,
        )?
    } else {
        Connection::open(db_path)?
    };
    conn.busy_timeout(DB_BUSY_TIMEOUT)?;
    Ok(conn)
}

// -------------------- Attempt Identity --------------------

/// Test and student identifiers are opaque backend keys (UUIDs, slugs).
/// We enforce a positive allowlist so they are safe in logs and file names.
pub fn validate_attempt_id(field: &str, value: &str) -> Result<()> {
    static ATTEMPT_ID_RE: OnceLock<Result<regex::Regex, regex::Error>> = OnceLock::new();
    let re = ATTEMPT_ID_RE
        .get_or_init(|| regex::Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.:-]{0,127}$"))
        .as_ref()
        .map_err(|e| anyhow!("attempt id pattern: {}", e))?;
    if !re.is_match(value) {
        return Err(anyhow!(
            "{} must match ^[A-Za-z0-9][A-Za-z0-9_.:-]{{0,127}}$",
            field
        ));
    }
    Ok(())
}

/// The `(test_id, student_id)` pair scoping a session and its log rows.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct AttemptId {
    test_id: String,
    student_id: String,
}

impl AttemptId {
    pub fn new(test_id: &str, student_id: &str) -> Result<Self> {
        validate_attempt_id("test_id", test_id)?;
        validate_attempt_id("student_id", student_id)?;
        Ok(Self {
            test_id: test_id.to_string(),
            student_id: student_id.to_string(),
        })
    }

    pub fn test_id(&self) -> &str {
        &self.test_id
    }

    pub fn student_id(&self) -> &str {
        &self.student_id
    }
}

/// Loads what earlier sessions of this attempt logged, oldest first.
pub fn load_prior_violations(
    store: &mut dyn ViolationStore,
    attempt: &AttemptId,
) -> Result<Vec<ViolationRecord>> {
    Ok(store
        .violations_for_attempt(attempt.test_id(), attempt.student_id())?
        .iter()
        .map(ViolationLogEntry::to_record)
        .collect())
}

// -------------------- Conformance Tests --------------------
