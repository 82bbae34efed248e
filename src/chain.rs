//! Hash chaining for the violation log.
//!
//! Every stored row commits to the previous row's hash, so deleting or
//! editing a row breaks every hash after it. Only `payload_json` is hashed;
//! the queryable columns must agree with it or the row is rejected.

use anyhow::{anyhow, Result};
use rusqlite::Connection;
use sha2::{Digest, Sha256};

use crate::sink::ViolationLogEntry;

pub const GENESIS_HASH: [u8; 32] = [0u8; 32];

/// Hashes a log entry payload with the previous chain hash.
pub fn hash_entry(prev_hash: &[u8; 32], payload: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(prev_hash);
    hasher.update(payload);
    hasher.finalize().into()
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChainStatus {
    pub rows: u64,
    pub head: [u8; 32],
}

impl ChainStatus {
    pub fn head_hex(&self) -> String {
        hex::encode(self.head)
    }
}

pub(crate) fn blob32(bytes: Vec<u8>, context: &str) -> Result<[u8; 32]> {
    if bytes.len() != 32 {
        return Err(anyhow!(
            "corrupt violation log: {} has {} bytes, expected 32",
            context,
            bytes.len()
        ));
    }
    let mut out = [0u8; 32];
    out.copy_from_slice(&bytes);
    Ok(out)
}

/// Walks `exam_violations` in insertion order and re-derives every hash.
pub fn verify_chain(conn: &Connection) -> Result<ChainStatus> {
    let mut stmt = conn.prepare(
        r#"
        SELECT id, test_id, student_id, violation_type, occurred_at, duration_seconds,
               payload_json, prev_hash, entry_hash
        FROM exam_violations ORDER BY id ASC
        "#,
    )?;
    let mut rows = stmt.query([])?;
    let mut expected_prev = GENESIS_HASH;
    let mut count = 0u64;
    while let Some(row) = rows.next()? {
        let id: i64 = row.get(0)?;
        let columns = RowColumns {
            test_id: row.get(1)?,
            student_id: row.get(2)?,
            violation_type: row.get(3)?,
            occurred_at: row.get(4)?,
            duration_seconds: row.get(5)?,
        };
        let payload: String = row.get(6)?;
        let prev_hash = blob32(row.get(7)?, "prev_hash")?;
        let entry_hash = blob32(row.get(8)?, "entry_hash")?;

        if prev_hash != expected_prev {
            return Err(anyhow!("violation log chain broken at row {}: prev_hash mismatch", id));
        }
        let recomputed = hash_entry(&prev_hash, payload.as_bytes());
        if recomputed != entry_hash {
            return Err(anyhow!("violation log chain broken at row {}: entry_hash mismatch", id));
        }
        let entry: ViolationLogEntry = serde_json::from_str(&payload)
            .map_err(|e| anyhow!("violation log row {}: unreadable payload: {}", id, e))?;
        if let Some(field) = columns.first_mismatch(&entry) {
            return Err(anyhow!(
                "violation log row {}: column {} disagrees with hashed payload",
                id,
                field
            ));
        }
        expected_prev = entry_hash;
        count += 1;
    }
    Ok(ChainStatus {
        rows: count,
        head: expected_prev,
    })
}

/// The denormalized columns that reads and reports select on.
struct RowColumns {
    test_id: String,
    student_id: String,
    violation_type: String,
    occurred_at: String,
    duration_seconds: Option<i64>,
}

impl RowColumns {
    fn first_mismatch(&self, entry: &ViolationLogEntry) -> Option<&'static str> {
        let duration = entry.duration_seconds.and_then(|d| i64::try_from(d).ok());
        if self.test_id != entry.test_id {
            Some("test_id")
        } else if self.student_id != entry.student_id {
            Some("student_id")
        } else if self.violation_type != entry.violation_type.as_str() {
            Some("violation_type")
        } else if self.occurred_at != entry.timestamp_iso() {
            Some("occurred_at")
        } else if self.duration_seconds != duration {
            Some("duration_seconds")
        } else {
            None
        }
    }
}
