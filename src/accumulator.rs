use crate::config::ProctoringConfig;
use crate::violation::ViolationRecord;

/// Outcome of accumulating one violation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Verdict {
    pub violation_count: usize,
    pub remaining: i64,
    pub message: String,
    /// True only for the violation that crossed the threshold.
    pub auto_submit_triggered: bool,
}

/// Owns the violation count, the history, and the auto-submit latch.
///
/// The count is always the history length; there is no separate counter to
/// drift out of step.
#[derive(Clone, Debug)]
pub struct ViolationAccumulator {
    max_violations: i32,
    auto_submit_enabled: bool,
    history: Vec<ViolationRecord>,
    should_auto_submit: bool,
}

impl ViolationAccumulator {
    pub fn new(config: &ProctoringConfig) -> Self {
        Self {
            max_violations: config.max_violations,
            auto_submit_enabled: config.auto_submit_on_max_violations,
            history: Vec::new(),
            should_auto_submit: false,
        }
    }

    pub fn violation_count(&self) -> usize {
        self.history.len()
    }

    pub fn history(&self) -> &[ViolationRecord] {
        &self.history
    }

    pub fn should_auto_submit(&self) -> bool {
        self.should_auto_submit
    }

    pub fn max_violations(&self) -> i32 {
        self.max_violations
    }

    pub fn remaining(&self) -> i64 {
        i64::from(self.max_violations) - count_i64(self.history.len())
    }

    pub fn record(&mut self, record: ViolationRecord) -> Verdict {
        let kind = record.violation_type;
        self.history.push(record);
        let count = self.history.len();
        let remaining = self.remaining();

        let threshold_reached = count_i64(count) >= i64::from(self.max_violations);
        let mut auto_submit_triggered = false;
        let message = if threshold_reached && self.auto_submit_enabled {
            auto_submit_triggered = !self.should_auto_submit;
            self.should_auto_submit = true;
            format!(
                "{} Maximum violations reached ({} of {}). Your test is being submitted automatically.",
                kind.describe(),
                count,
                self.max_violations
            )
        } else if remaining == 1 {
            format!(
                "{} Final warning: you have 1 chance remaining before your test is submitted automatically.",
                kind.describe()
            )
        } else if remaining == 2 {
            format!(
                "{} Second warning: you have 2 chances remaining before your test is submitted automatically.",
                kind.describe()
            )
        } else {
            format!(
                "{} Warning: violation {} recorded. You have {} chances remaining.",
                kind.describe(),
                count,
                remaining.max(0)
            )
        };

        Verdict {
            violation_count: count,
            remaining,
            message,
            auto_submit_triggered,
        }
    }

    /// Seeds history with violations logged before this session started,
    /// without producing warnings. The latch is re-evaluated afterward.
    pub fn rehydrate(&mut self, prior: Vec<ViolationRecord>) {
        self.history.extend(prior);
        if self.auto_submit_enabled
            && count_i64(self.history.len()) >= i64::from(self.max_violations)
            && !self.history.is_empty()
        {
            self.should_auto_submit = true;
        }
    }
}

fn count_i64(count: usize) -> i64 {
    i64::try_from(count).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::violation::ViolationType;
    use chrono::Utc;

    fn record(kind: ViolationType) -> ViolationRecord {
        ViolationRecord::new(kind, Utc::now())
    }

    #[test]
    fn messages_follow_severity_priority() {
        let mut acc = ViolationAccumulator::new(&ProctoringConfig::default());

        let first = acc.record(record(ViolationType::TabSwitch));
        assert_eq!(first.remaining, 2);
        assert!(first.message.contains("Second warning"));
        assert!(first.message.contains("2 chances"));

        let second = acc.record(record(ViolationType::RightClick));
        assert!(second.message.contains("Final warning"));
        assert!(second.message.contains("1 chance"));
        assert!(!acc.should_auto_submit());

        let third = acc.record(record(ViolationType::PasteAttempt));
        assert!(third.auto_submit_triggered);
        assert!(third.message.contains("submitted automatically"));
        assert!(acc.should_auto_submit());
    }

    #[test]
    fn generic_message_names_remaining_chances() {
        let mut acc = ViolationAccumulator::new(&ProctoringConfig {
            max_violations: 10,
            ..ProctoringConfig::default()
        });
        let verdict = acc.record(record(ViolationType::CopyAttempt));
        assert_eq!(verdict.remaining, 9);
        assert!(verdict.message.contains("9 chances"));
    }

    #[test]
    fn latch_fires_once_and_history_keeps_growing() {
        let mut acc = ViolationAccumulator::new(&ProctoringConfig {
            max_violations: 1,
            ..ProctoringConfig::default()
        });
        assert!(acc.record(record(ViolationType::CopyAttempt)).auto_submit_triggered);
        let again = acc.record(record(ViolationType::CopyAttempt));
        assert!(!again.auto_submit_triggered);
        assert!(acc.should_auto_submit());
        assert_eq!(acc.violation_count(), 2);
        assert_eq!(acc.history().len(), 2);
    }

    #[test]
    fn disabled_auto_submit_never_latches() {
        let mut acc = ViolationAccumulator::new(&ProctoringConfig {
            auto_submit_on_max_violations: false,
            ..ProctoringConfig::default()
        });
        for _ in 0..5 {
            let verdict = acc.record(record(ViolationType::RightClick));
            assert!(!verdict.auto_submit_triggered);
        }
        assert!(!acc.should_auto_submit());
        let last = acc.record(record(ViolationType::RightClick));
        assert!(last.message.contains("0 chances"));
    }

    #[test]
    fn non_positive_threshold_latches_on_first_violation() {
        for max in [0, -4] {
            let mut acc = ViolationAccumulator::new(&ProctoringConfig {
                max_violations: max,
                ..ProctoringConfig::default()
            });
            assert!(!acc.should_auto_submit());
            assert!(acc.record(record(ViolationType::TabSwitch)).auto_submit_triggered);
        }
    }

    #[test]
    fn rehydrate_restores_count_and_latch() {
        let mut acc = ViolationAccumulator::new(&ProctoringConfig::default());
        acc.rehydrate(vec![
            record(ViolationType::TabSwitch),
            record(ViolationType::CopyAttempt),
        ]);
        assert_eq!(acc.violation_count(), 2);
        assert!(!acc.should_auto_submit());
        acc.rehydrate(vec![record(ViolationType::RightClick)]);
        assert!(acc.should_auto_submit());
    }
}
