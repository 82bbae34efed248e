//! Violation summary for the reporting view.
//!
//! Pure read and aggregate over the violation store: one fetch per test,
//! identities joined per student, no interaction with live sessions.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::sink::ViolationLogEntry;
use crate::storage::{StudentIdentity, ViolationStore};
use crate::violation::ViolationType;

const UNKNOWN_STUDENT: &str = "Unknown student";

#[derive(Clone, Debug, Default, Serialize, PartialEq, Eq)]
pub struct StudentSummary {
    pub student_id: String,
    pub student_name: String,
    pub email: Option<String>,
    pub tab_switches: u64,
    pub fullscreen_exits: u64,
    pub copy_attempts: u64,
    pub paste_attempts: u64,
    pub right_clicks: u64,
    pub total_violations: u64,
    pub total_time_away_seconds: u64,
}

impl StudentSummary {
    fn count(&mut self, entry: &ViolationLogEntry) {
        let slot = match entry.violation_type {
            ViolationType::TabSwitch => &mut self.tab_switches,
            ViolationType::FullscreenExit => &mut self.fullscreen_exits,
            ViolationType::CopyAttempt => &mut self.copy_attempts,
            ViolationType::PasteAttempt => &mut self.paste_attempts,
            ViolationType::RightClick => &mut self.right_clicks,
        };
        *slot += 1;
        self.total_violations += 1;
        self.total_time_away_seconds = self
            .total_time_away_seconds
            .saturating_add(entry.duration_seconds.unwrap_or(0));
    }
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct ViolationDetail {
    pub student_id: String,
    pub student_name: String,
    pub violation_type: ViolationType,
    pub timestamp: DateTime<Utc>,
    pub duration_seconds: Option<u64>,
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct ViolationReport {
    pub test_id: String,
    /// Sorted by total violations, most first.
    pub summaries: Vec<StudentSummary>,
    /// Newest first.
    pub details: Vec<ViolationDetail>,
}

impl ViolationReport {
    pub fn total_violations(&self) -> u64 {
        self.summaries.iter().map(|s| s.total_violations).sum()
    }
}

pub fn load_report(store: &mut dyn ViolationStore, test_id: &str) -> Result<ViolationReport> {
    let entries = store.violations_for_test(test_id)?;
    let mut identities = BTreeMap::new();
    for entry in &entries {
        if !identities.contains_key(&entry.student_id) {
            let identity = store.student_identity(&entry.student_id)?;
            identities.insert(entry.student_id.clone(), identity);
        }
    }
    Ok(summarize(test_id, &entries, &identities))
}

pub fn summarize(
    test_id: &str,
    entries: &[ViolationLogEntry],
    identities: &BTreeMap<String, Option<StudentIdentity>>,
) -> ViolationReport {
    let name_of = |student_id: &str| -> (String, Option<String>) {
        match identities.get(student_id).and_then(|i| i.as_ref()) {
            Some(identity) => (identity.full_name.clone(), identity.email.clone()),
            None => (UNKNOWN_STUDENT.to_string(), None),
        }
    };

    let mut per_student: BTreeMap<&str, StudentSummary> = BTreeMap::new();
    let mut details = Vec::with_capacity(entries.len());
    for entry in entries.iter().filter(|e| e.test_id == test_id) {
        let summary = per_student
            .entry(entry.student_id.as_str())
            .or_insert_with(|| {
                let (student_name, email) = name_of(&entry.student_id);
                StudentSummary {
                    student_id: entry.student_id.clone(),
                    student_name,
                    email,
                    ..StudentSummary::default()
                }
            });
        summary.count(entry);
        details.push(ViolationDetail {
            student_id: entry.student_id.clone(),
            student_name: summary.student_name.clone(),
            violation_type: entry.violation_type,
            timestamp: entry.timestamp,
            duration_seconds: entry.duration_seconds,
        });
    }

    let mut summaries: Vec<StudentSummary> = per_student.into_values().collect();
    // BTreeMap order makes ties fall back to student id ascending
    summaries.sort_by(|a, b| b.total_violations.cmp(&a.total_violations));
    details.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

    ViolationReport {
        test_id: test_id.to_string(),
        summaries,
        details,
    }
}

/// Fixed-width table for terminals.
pub fn render_table(report: &ViolationReport) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "violations for test {} ({} total)\n",
        report.test_id,
        report.total_violations()
    ));
    out.push_str(&format!(
        "{:<24} {:>5} {:>5} {:>5} {:>5} {:>5} {:>6} {:>9}\n",
        "student", "tab", "fs", "copy", "paste", "rclk", "total", "away_s"
    ));
    for s in &report.summaries {
        out.push_str(&format!(
            "{:<24} {:>5} {:>5} {:>5} {:>5} {:>5} {:>6} {:>9}\n",
            truncate(&s.student_name, 24),
            s.tab_switches,
            s.fullscreen_exits,
            s.copy_attempts,
            s.paste_attempts,
            s.right_clicks,
            s.total_violations,
            s.total_time_away_seconds
        ));
    }
    out
}

fn truncate(value: &str, width: usize) -> String {
    if value.chars().count() <= width {
        return value.to_string();
    }
    let mut cut: String = value.chars().take(width.saturating_sub(1)).collect();
    cut.push('…');
    cut
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn entry(student: &str, kind: ViolationType, at: DateTime<Utc>) -> ViolationLogEntry {
        ViolationLogEntry {
            test_id: "t1".into(),
            student_id: student.into(),
            violation_type: kind,
            timestamp: at,
            duration_seconds: (kind == ViolationType::TabSwitch).then_some(10),
        }
    }

    #[test]
    fn summary_sorts_by_total_then_student_id() {
        let t0 = Utc::now();
        let entries = vec![
            entry("b", ViolationType::CopyAttempt, t0),
            entry("a", ViolationType::TabSwitch, t0 + Duration::seconds(1)),
            entry("c", ViolationType::TabSwitch, t0 + Duration::seconds(2)),
            entry("c", ViolationType::RightClick, t0 + Duration::seconds(3)),
        ];
        let report = summarize("t1", &entries, &BTreeMap::new());
        let order: Vec<&str> = report
            .summaries
            .iter()
            .map(|s| s.student_id.as_str())
            .collect();
        assert_eq!(order, vec!["c", "a", "b"]);
        assert_eq!(report.summaries[0].total_time_away_seconds, 10);
        assert_eq!(report.summaries[0].right_clicks, 1);
        assert_eq!(report.summaries[2].student_name, UNKNOWN_STUDENT);
    }

    #[test]
    fn details_are_newest_first() {
        let t0 = Utc::now();
        let entries = vec![
            entry("a", ViolationType::PasteAttempt, t0),
            entry("a", ViolationType::CopyAttempt, t0 + Duration::seconds(30)),
        ];
        let report = summarize("t1", &entries, &BTreeMap::new());
        assert_eq!(report.details[0].violation_type, ViolationType::CopyAttempt);
        assert_eq!(report.details[1].violation_type, ViolationType::PasteAttempt);
    }

    #[test]
    fn table_lists_every_student() {
        let entries = vec![entry("a", ViolationType::PasteAttempt, Utc::now())];
        let mut identities = BTreeMap::new();
        identities.insert(
            "a".to_string(),
            Some(StudentIdentity {
                student_id: "a".into(),
                full_name: "Grace Hopper".into(),
                email: None,
            }),
        );
        let table = render_table(&summarize("t1", &entries, &identities));
        assert!(table.contains("Grace Hopper"));
        assert!(table.contains("(1 total)"));
    }
}
