//! Live proctoring session for one student attempting one test.
//!
//! The session owns its detector, accumulator, warning slot, environment
//! handle and sink. It is driven by a single event loop: `handle_event` for
//! environment signals and `poll_timers` for the tick and auto-hide
//! deadlines. Timers that came due are always applied before an event
//! observed at the same instant.

use anyhow::Result;
use std::sync::Arc;

use crate::accumulator::{Verdict, ViolationAccumulator};
use crate::clock::Clock;
use crate::config::ProctoringConfig;
use crate::detector::{EnvironmentEvent, ViolationDetector};
use crate::environment::ExamEnvironment;
use crate::sink::{ViolationLogEntry, ViolationSink};
use crate::violation::ViolationRecord;
use crate::warning::{Severity, Warning, WarningSlot, WarningView};
use crate::AttemptId;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionPhase {
    Running,
    Stopped,
}

/// What the host should do with the event it just forwarded.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EventOutcome {
    pub prevent_default: bool,
    pub verdict: Option<Verdict>,
}

pub struct ProctoringSession {
    attempt: AttemptId,
    config: ProctoringConfig,
    clock: Arc<dyn Clock>,
    environment: Box<dyn ExamEnvironment>,
    sink: Box<dyn ViolationSink>,
    detector: ViolationDetector,
    accumulator: ViolationAccumulator,
    warning: WarningSlot,
    phase: SessionPhase,
}

impl ProctoringSession {
    pub fn start(
        attempt: AttemptId,
        config: ProctoringConfig,
        clock: Arc<dyn Clock>,
        environment: Box<dyn ExamEnvironment>,
        sink: Box<dyn ViolationSink>,
    ) -> Result<Self> {
        Self::start_with_history(attempt, config, clock, environment, sink, Vec::new())
    }

    /// Starts a session seeded with violations logged by earlier sessions of
    /// the same attempt. `prior` is ignored unless `resume_from_log` is set.
    pub fn start_with_history(
        attempt: AttemptId,
        config: ProctoringConfig,
        clock: Arc<dyn Clock>,
        environment: Box<dyn ExamEnvironment>,
        sink: Box<dyn ViolationSink>,
        prior: Vec<ViolationRecord>,
    ) -> Result<Self> {
        config.validate()?;
        let mut session = Self {
            detector: ViolationDetector::new(&config),
            accumulator: ViolationAccumulator::new(&config),
            warning: WarningSlot::new(),
            phase: SessionPhase::Running,
            attempt,
            config,
            clock,
            environment,
            sink,
        };

        if session.config.resume_from_log && !prior.is_empty() {
            log::info!(
                "resuming proctoring for test={} student={} with {} prior violations",
                session.attempt.test_id(),
                session.attempt.student_id(),
                prior.len()
            );
            session.accumulator.rehydrate(prior);
        }

        if session.config.enable_fullscreen {
            match session.environment.request_fullscreen() {
                Ok(()) => session.detector.set_fullscreen_active(true),
                Err(e) => log::warn!(
                    "fullscreen request failed for test={} student={}: {}",
                    session.attempt.test_id(),
                    session.attempt.student_id(),
                    e
                ),
            }
        }

        log::info!(
            "proctoring started test={} student={} max_violations={}",
            session.attempt.test_id(),
            session.attempt.student_id(),
            session.config.max_violations
        );
        Ok(session)
    }

    pub fn attempt(&self) -> &AttemptId {
        &self.attempt
    }

    pub fn config(&self) -> &ProctoringConfig {
        &self.config
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn handle_event(&mut self, event: EnvironmentEvent) -> EventOutcome {
        if self.phase == SessionPhase::Stopped {
            return EventOutcome::default();
        }
        let now_ms = self.clock.now_ms();
        self.apply_timers(now_ms);

        let detection = self
            .detector
            .observe(event, now_ms, self.clock.wall_now());
        let verdict = detection
            .violation
            .map(|record| self.register_violation(record, now_ms));
        EventOutcome {
            prevent_default: detection.prevent_default,
            verdict,
        }
    }

    /// Applies every timer that is due at the current clock reading.
    pub fn poll_timers(&mut self) {
        if self.phase == SessionPhase::Stopped {
            return;
        }
        let now_ms = self.clock.now_ms();
        self.apply_timers(now_ms);
    }

    /// Earliest pending deadline, for hosts that sleep between polls.
    pub fn next_deadline_ms(&self) -> Option<u64> {
        if self.phase == SessionPhase::Stopped {
            return None;
        }
        match (
            self.detector.time_away().next_due_ms(),
            self.warning.hide_due_ms(),
        ) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    fn apply_timers(&mut self, now_ms: u64) {
        self.detector.poll(now_ms);
        if self.warning.poll(now_ms) {
            log::debug!("warning auto-hidden for student={}", self.attempt.student_id());
        }
    }

    fn register_violation(&mut self, record: ViolationRecord, now_ms: u64) -> Verdict {
        let entry = ViolationLogEntry::from_record(
            self.attempt.test_id(),
            self.attempt.student_id(),
            &record,
        );
        let kind = record.violation_type;
        let verdict = self.accumulator.record(record);
        self.warning
            .show(verdict.message.clone(), now_ms, self.config.warning_duration_ms);

        log::warn!(
            "violation {} test={} student={} count={}/{}",
            kind,
            self.attempt.test_id(),
            self.attempt.student_id(),
            verdict.violation_count,
            self.config.max_violations
        );
        if verdict.auto_submit_triggered {
            log::warn!(
                "auto-submit threshold reached test={} student={}",
                self.attempt.test_id(),
                self.attempt.student_id()
            );
        }

        self.sink.record(entry);
        verdict
    }

    /// Hides the current warning. Refused once auto-submit has fired.
    pub fn dismiss(&mut self) -> bool {
        if self.accumulator.should_auto_submit() {
            return false;
        }
        self.warning.hide()
    }

    pub fn violation_count(&self) -> usize {
        self.accumulator.violation_count()
    }

    pub fn violation_history(&self) -> &[ViolationRecord] {
        self.accumulator.history()
    }

    pub fn is_tab_active(&self) -> bool {
        self.detector.is_tab_active()
    }

    pub fn is_fullscreen_active(&self) -> bool {
        self.detector.is_fullscreen_active()
    }

    pub fn time_away_seconds(&self) -> u64 {
        self.detector.time_away_seconds()
    }

    pub fn is_tracking_time_away(&self) -> bool {
        self.detector.time_away().is_running()
    }

    pub fn should_auto_submit(&self) -> bool {
        self.accumulator.should_auto_submit()
    }

    pub fn current_warning(&self) -> Option<&Warning> {
        self.warning.current()
    }

    pub fn warning_view(&self) -> WarningView {
        let violations = self.accumulator.violation_count();
        let should_auto_submit = self.accumulator.should_auto_submit();
        WarningView {
            is_open: self.warning.is_visible(),
            violations,
            max_violations: self.config.max_violations,
            message: self
                .warning
                .current()
                .map(|w| w.message.clone())
                .unwrap_or_default(),
            time_away_seconds: self.detector.time_away_seconds(),
            should_auto_submit,
            severity: Severity::classify(violations, self.config.max_violations),
            dismissible: !should_auto_submit,
        }
    }

    /// Tears the session down: events are ignored from here on, timers are
    /// cleared, fullscreen is left, and the sink is flushed. Idempotent.
    pub fn stop(&mut self) {
        if self.phase == SessionPhase::Stopped {
            return;
        }
        self.phase = SessionPhase::Stopped;
        self.detector.reset();
        self.warning.clear_timer();

        if self.detector.is_fullscreen_active() {
            if let Err(e) = self.environment.exit_fullscreen() {
                log::warn!("failed to exit fullscreen on teardown: {}", e);
            }
            self.detector.set_fullscreen_active(false);
        }
        self.sink.close();
        log::info!(
            "proctoring stopped test={} student={} violations={} time_away_s={}",
            self.attempt.test_id(),
            self.attempt.student_id(),
            self.accumulator.violation_count(),
            self.detector.time_away_seconds()
        );
    }
}

impl Drop for ProctoringSession {
    fn drop(&mut self) {
        self.stop();
    }
}
