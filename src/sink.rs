//! Violation log sink.
//!
//! Persistence runs on its own worker thread behind a bounded queue. The
//! session only ever enqueues: a full queue, a dead worker, or a failing
//! store is logged and the entry dropped. None of it reaches the exam flow.

use anyhow::{anyhow, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread::JoinHandle;

use crate::storage::ViolationStore;
use crate::violation::{ViolationRecord, ViolationType};

/// One row of the append-only violation store.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ViolationLogEntry {
    pub test_id: String,
    pub student_id: String,
    pub violation_type: ViolationType,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub duration_seconds: Option<u64>,
}

impl ViolationLogEntry {
    pub fn from_record(test_id: &str, student_id: &str, record: &ViolationRecord) -> Self {
        Self {
            test_id: test_id.to_string(),
            student_id: student_id.to_string(),
            violation_type: record.violation_type,
            timestamp: record.timestamp,
            duration_seconds: record.duration_seconds,
        }
    }

    /// ISO 8601 timestamp as written to the store.
    pub fn timestamp_iso(&self) -> String {
        self.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
    }

    pub fn to_record(&self) -> ViolationRecord {
        ViolationRecord {
            timestamp: self.timestamp,
            violation_type: self.violation_type,
            duration_seconds: self.duration_seconds,
        }
    }
}

pub trait ViolationSink: Send {
    /// Hands an entry off for persistence. Must not block or fail.
    fn record(&mut self, entry: ViolationLogEntry);

    /// Flushes pending entries and releases resources. Idempotent.
    fn close(&mut self) {}
}

#[derive(Debug, Default)]
pub struct SinkStats {
    enqueued: AtomicU64,
    persisted: AtomicU64,
    dropped: AtomicU64,
    failed: AtomicU64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SinkCounters {
    pub enqueued: u64,
    pub persisted: u64,
    pub dropped: u64,
    pub failed: u64,
}

impl SinkStats {
    pub fn snapshot(&self) -> SinkCounters {
        SinkCounters {
            enqueued: self.enqueued.load(Ordering::SeqCst),
            persisted: self.persisted.load(Ordering::SeqCst),
            dropped: self.dropped.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
        }
    }
}

/// Bounded queue plus a single writer thread that owns the store.
pub struct BackgroundSink {
    tx: Option<SyncSender<ViolationLogEntry>>,
    join: Option<JoinHandle<()>>,
    stats: Arc<SinkStats>,
}

impl BackgroundSink {
    pub fn spawn(mut store: Box<dyn ViolationStore>, capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(anyhow!("violation sink capacity must be greater than zero"));
        }
        let (tx, rx) = mpsc::sync_channel::<ViolationLogEntry>(capacity);
        let stats = Arc::new(SinkStats::default());
        let worker_stats = stats.clone();
        let join = std::thread::Builder::new()
            .name("violation-sink".to_string())
            .spawn(move || {
                for entry in rx {
                    match store.append_violation(&entry) {
                        Ok(()) => {
                            worker_stats.persisted.fetch_add(1, Ordering::SeqCst);
                        }
                        Err(e) => {
                            worker_stats.failed.fetch_add(1, Ordering::SeqCst);
                            log::error!(
                                "failed to persist {} violation for test={} student={}: {}",
                                entry.violation_type,
                                entry.test_id,
                                entry.student_id,
                                e
                            );
                        }
                    }
                }
                log::debug!("violation sink worker drained");
            })?;
        Ok(Self {
            tx: Some(tx),
            join: Some(join),
            stats,
        })
    }

    pub fn stats(&self) -> Arc<SinkStats> {
        self.stats.clone()
    }
}

impl ViolationSink for BackgroundSink {
    fn record(&mut self, entry: ViolationLogEntry) {
        let Some(tx) = self.tx.as_ref() else {
            self.stats.dropped.fetch_add(1, Ordering::SeqCst);
            log::warn!(
                "violation sink closed; dropping {} violation",
                entry.violation_type
            );
            return;
        };
        match tx.try_send(entry) {
            Ok(()) => {
                self.stats.enqueued.fetch_add(1, Ordering::SeqCst);
            }
            Err(TrySendError::Full(entry)) => {
                self.stats.dropped.fetch_add(1, Ordering::SeqCst);
                log::warn!(
                    "violation sink queue full; dropping {} violation for student={}",
                    entry.violation_type,
                    entry.student_id
                );
            }
            Err(TrySendError::Disconnected(entry)) => {
                self.stats.dropped.fetch_add(1, Ordering::SeqCst);
                log::error!(
                    "violation sink worker gone; dropping {} violation for student={}",
                    entry.violation_type,
                    entry.student_id
                );
            }
        }
    }

    fn close(&mut self) {
        // dropping the sender ends the worker loop once the queue drains
        self.tx.take();
        if let Some(join) = self.join.take() {
            if join.join().is_err() {
                log::error!("violation sink worker panicked");
            }
        }
    }
}

impl Drop for BackgroundSink {
    fn drop(&mut self) {
        self.close();
    }
}
