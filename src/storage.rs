use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

use crate::chain::{blob32, hash_entry, verify_chain, ChainStatus, GENESIS_HASH};
use crate::sink::ViolationLogEntry;
use crate::violation::ViolationType;

/// Display identity joined onto violation rows by the reporting view.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct StudentIdentity {
    pub student_id: String,
    pub full_name: String,
    pub email: Option<String>,
}

/// Append-only violation store shared by every session and student.
pub trait ViolationStore: Send {
    fn append_violation(&mut self, entry: &ViolationLogEntry) -> Result<()>;

    /// All rows for a test, in insertion order.
    fn violations_for_test(&mut self, test_id: &str) -> Result<Vec<ViolationLogEntry>>;

    fn violations_for_attempt(
        &mut self,
        test_id: &str,
        student_id: &str,
    ) -> Result<Vec<ViolationLogEntry>> {
        Ok(self
            .violations_for_test(test_id)?
            .into_iter()
            .filter(|entry| entry.student_id == student_id)
            .collect())
    }

    fn student_identity(&mut self, student_id: &str) -> Result<Option<StudentIdentity>>;
}

pub struct SqliteViolationStore {
    conn: Connection,
}

impl SqliteViolationStore {
    pub fn open(db_path: &str) -> Result<Self> {
        let conn = crate::open_db_connection(db_path)
            .with_context(|| format!("failed to open violation store {}", db_path))?;
        let mut store = Self { conn };
        store.ensure_schema()?;
        Ok(store)
    }

    fn ensure_schema(&mut self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;

            CREATE TABLE IF NOT EXISTS exam_violations (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              test_id TEXT NOT NULL,
              student_id TEXT NOT NULL,
              violation_type TEXT NOT NULL,
              occurred_at TEXT NOT NULL,
              duration_seconds INTEGER,
              payload_json TEXT NOT NULL,
              prev_hash BLOB NOT NULL,
              entry_hash BLOB NOT NULL
            );

            CREATE TABLE IF NOT EXISTS students (
              id TEXT PRIMARY KEY,
              full_name TEXT NOT NULL,
              email TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_violations_attempt
              ON exam_violations(test_id, student_id);
            "#,
        )?;
        Ok(())
    }

    pub fn upsert_student(&mut self, identity: &StudentIdentity) -> Result<()> {
        crate::validate_attempt_id("student_id", &identity.student_id)?;
        self.conn.execute(
            r#"
            INSERT INTO students(id, full_name, email) VALUES (?1, ?2, ?3)
            ON CONFLICT(id) DO UPDATE SET full_name = excluded.full_name, email = excluded.email
            "#,
            params![identity.student_id, identity.full_name, identity.email],
        )?;
        Ok(())
    }

    pub fn verify_chain(&self) -> Result<ChainStatus> {
        verify_chain(&self.conn)
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    fn query_entries(
        &self,
        sql: &str,
        args: &[&dyn rusqlite::ToSql],
    ) -> Result<Vec<ViolationLogEntry>> {
        let mut stmt = self.conn.prepare(sql)?;
        let mut rows = stmt.query(args)?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let test_id: String = row.get(0)?;
            let student_id: String = row.get(1)?;
            let kind: String = row.get(2)?;
            let occurred_at: String = row.get(3)?;
            let duration: Option<i64> = row.get(4)?;
            out.push(ViolationLogEntry {
                test_id,
                student_id,
                violation_type: ViolationType::parse(&kind)?,
                timestamp: parse_timestamp(&occurred_at)?,
                duration_seconds: duration
                    .map(|d| u64::try_from(d).map_err(|_| anyhow!("negative duration_seconds")))
                    .transpose()?,
            });
        }
        Ok(out)
    }
}

impl ViolationStore for SqliteViolationStore {
    fn append_violation(&mut self, entry: &ViolationLogEntry) -> Result<()> {
        let payload_json = serde_json::to_string(entry)?;
        let duration = entry
            .duration_seconds
            .map(|d| i64::try_from(d).map_err(|_| anyhow!("duration_seconds exceeds i64 range")))
            .transpose()?;

        // Other processes append to the same file; the write lock is taken
        // before the chain head is read so two writers never share a parent.
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let prev_hash = last_entry_hash(&tx)?;
        let entry_hash = hash_entry(&prev_hash, payload_json.as_bytes());
        tx.execute(
            r#"
            INSERT INTO exam_violations(
              test_id, student_id, violation_type, occurred_at, duration_seconds,
              payload_json, prev_hash, entry_hash
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
            params![
                entry.test_id,
                entry.student_id,
                entry.violation_type.as_str(),
                entry.timestamp_iso(),
                duration,
                payload_json,
                prev_hash.to_vec(),
                entry_hash.to_vec()
            ],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn violations_for_test(&mut self, test_id: &str) -> Result<Vec<ViolationLogEntry>> {
        self.query_entries(
            r#"
            SELECT test_id, student_id, violation_type, occurred_at, duration_seconds
            FROM exam_violations WHERE test_id = ?1 ORDER BY id ASC
            "#,
            params![test_id],
        )
    }

    fn violations_for_attempt(
        &mut self,
        test_id: &str,
        student_id: &str,
    ) -> Result<Vec<ViolationLogEntry>> {
        self.query_entries(
            r#"
            SELECT test_id, student_id, violation_type, occurred_at, duration_seconds
            FROM exam_violations WHERE test_id = ?1 AND student_id = ?2 ORDER BY id ASC
            "#,
            params![test_id, student_id],
        )
    }

    fn student_identity(&mut self, student_id: &str) -> Result<Option<StudentIdentity>> {
        let identity = self
            .conn
            .query_row(
                "SELECT id, full_name, email FROM students WHERE id = ?1",
                params![student_id],
                |row| {
                    Ok(StudentIdentity {
                        student_id: row.get(0)?,
                        full_name: row.get(1)?,
                        email: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(identity)
    }
}

fn last_entry_hash(conn: &Connection) -> Result<[u8; 32]> {
    let bytes: Option<Vec<u8>> = conn
        .query_row(
            "SELECT entry_hash FROM exam_violations ORDER BY id DESC LIMIT 1",
            [],
            |row| row.get(0),
        )
        .optional()?;
    match bytes {
        Some(bytes) => blob32(bytes, "entry_hash"),
        None => Ok(GENESIS_HASH),
    }
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| anyhow!("corrupt violation log: bad occurred_at '{}': {}", value, e))
}

#[derive(Debug, Default)]
struct InMemoryState {
    entries: Vec<ViolationLogEntry>,
    students: Vec<StudentIdentity>,
}

/// Process-local store. Clones share the same rows.
#[derive(Clone, Debug, Default)]
pub struct InMemoryViolationStore {
    state: Arc<Mutex<InMemoryState>>,
}

impl InMemoryViolationStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, InMemoryState>> {
        self.state
            .lock()
            .map_err(|_| anyhow!("in-memory violation store lock poisoned"))
    }

    pub fn add_student(&self, identity: StudentIdentity) -> Result<()> {
        let mut state = self.lock()?;
        state
            .students
            .retain(|existing| existing.student_id != identity.student_id);
        state.students.push(identity);
        Ok(())
    }

    pub fn entries(&self) -> Vec<ViolationLogEntry> {
        self.lock().map(|state| state.entries.clone()).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.lock().map(|state| state.entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ViolationStore for InMemoryViolationStore {
    fn append_violation(&mut self, entry: &ViolationLogEntry) -> Result<()> {
        self.lock()?.entries.push(entry.clone());
        Ok(())
    }

    fn violations_for_test(&mut self, test_id: &str) -> Result<Vec<ViolationLogEntry>> {
        Ok(self
            .lock()?
            .entries
            .iter()
            .filter(|entry| entry.test_id == test_id)
            .cloned()
            .collect())
    }

    fn student_identity(&mut self, student_id: &str) -> Result<Option<StudentIdentity>> {
        Ok(self
            .lock()?
            .students
            .iter()
            .find(|identity| identity.student_id == student_id)
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(test_id: &str, student_id: &str, kind: ViolationType) -> ViolationLogEntry {
        ViolationLogEntry {
            test_id: test_id.into(),
            student_id: student_id.into(),
            violation_type: kind,
            timestamp: Utc::now(),
            duration_seconds: None,
        }
    }

    #[test]
    fn sqlite_round_trips_rows_and_chains_them() -> Result<()> {
        let mut store = SqliteViolationStore::open(&crate::shared_memory_uri())?;
        let mut tab = entry("t1", "s1", ViolationType::TabSwitch);
        tab.duration_seconds = Some(12);
        store.append_violation(&tab)?;
        store.append_violation(&entry("t1", "s2", ViolationType::CopyAttempt))?;
        store.append_violation(&entry("t2", "s1", ViolationType::RightClick))?;

        let rows = store.violations_for_test("t1")?;
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].duration_seconds, Some(12));
        assert_eq!(rows[0].violation_type, ViolationType::TabSwitch);

        let attempt = store.violations_for_attempt("t1", "s2")?;
        assert_eq!(attempt.len(), 1);

        let status = store.verify_chain()?;
        assert_eq!(status.rows, 3);
        assert_ne!(status.head, GENESIS_HASH);
        Ok(())
    }

    #[test]
    fn tampering_breaks_chain_verification() -> Result<()> {
        let mut store = SqliteViolationStore::open(&crate::shared_memory_uri())?;
        store.append_violation(&entry("t1", "s1", ViolationType::PasteAttempt))?;
        store.append_violation(&entry("t1", "s1", ViolationType::CopyAttempt))?;
        store.connection().execute(
            "UPDATE exam_violations SET payload_json = replace(payload_json, 'copy_attempt', 'right_click') WHERE id = 2",
            [],
        )?;
        assert!(store.verify_chain().is_err());
        Ok(())
    }

    #[test]
    fn editing_queried_columns_breaks_verification() -> Result<()> {
        let mut store = SqliteViolationStore::open(&crate::shared_memory_uri())?;
        store.append_violation(&entry("t1", "s1", ViolationType::CopyAttempt))?;
        store.append_violation(&entry("t1", "s1", ViolationType::PasteAttempt))?;
        assert_eq!(store.verify_chain()?.rows, 2);

        store.connection().execute(
            "UPDATE exam_violations SET student_id = 's2', violation_type = 'right_click'",
            [],
        )?;
        let err = store.verify_chain().unwrap_err().to_string();
        assert!(err.contains("row 1"), "{}", err);
        assert!(err.contains("student_id"), "{}", err);
        Ok(())
    }

    #[test]
    fn editing_duration_column_breaks_verification() -> Result<()> {
        let mut store = SqliteViolationStore::open(&crate::shared_memory_uri())?;
        let mut tab = entry("t1", "s1", ViolationType::TabSwitch);
        tab.duration_seconds = Some(40);
        store.append_violation(&tab)?;
        store.connection().execute(
            "UPDATE exam_violations SET duration_seconds = 2 WHERE id = 1",
            [],
        )?;
        let err = store.verify_chain().unwrap_err().to_string();
        assert!(err.contains("duration_seconds"), "{}", err);
        Ok(())
    }

    #[test]
    fn students_upsert_and_join() -> Result<()> {
        let mut store = SqliteViolationStore::open(&crate::shared_memory_uri())?;
        assert!(store.student_identity("s1")?.is_none());
        let mut identity = StudentIdentity {
            student_id: "s1".into(),
            full_name: "Ada Lovelace".into(),
            email: None,
        };
        store.upsert_student(&identity)?;
        identity.email = Some("ada@example.edu".into());
        store.upsert_student(&identity)?;
        assert_eq!(store.student_identity("s1")?, Some(identity));
        Ok(())
    }

    #[test]
    fn in_memory_clones_share_rows() -> Result<()> {
        let store = InMemoryViolationStore::new();
        let mut writer = store.clone();
        writer.append_violation(&entry("t1", "s1", ViolationType::RightClick))?;
        assert_eq!(store.len(), 1);
        assert!(writer.violations_for_test("other")?.is_empty());
        Ok(())
    }
}
