//! Exam attempt: the host side of the auto-submit signal.
//!
//! `should_auto_submit` stays true for the rest of a session, so whoever
//! watches it must turn it into exactly one submission. `ExamAttempt` does
//! that with a local submission state machine and re-checks the signal after
//! every state change it drives.

use anyhow::{anyhow, Result};
use serde::Serialize;

use crate::detector::EnvironmentEvent;
use crate::session::{EventOutcome, ProctoringSession};
use crate::warning::WarningView;

#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SubmitReason {
    Manual,
    AutoSubmit,
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct SubmissionRequest {
    pub test_id: String,
    pub student_id: String,
    pub reason: SubmitReason,
    pub violation_count: usize,
    pub time_away_seconds: u64,
}

pub trait Submitter {
    fn submit(&mut self, request: &SubmissionRequest) -> Result<()>;
}

impl<F> Submitter for F
where
    F: FnMut(&SubmissionRequest) -> Result<()>,
{
    fn submit(&mut self, request: &SubmissionRequest) -> Result<()> {
        self(request)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubmissionState {
    Idle,
    Submitting,
    Submitted,
}

pub struct ExamAttempt<S: Submitter> {
    session: ProctoringSession,
    submitter: S,
    state: SubmissionState,
    auto_submit_attempted: bool,
}

impl<S: Submitter> ExamAttempt<S> {
    pub fn new(session: ProctoringSession, submitter: S) -> Self {
        let mut attempt = Self {
            session,
            submitter,
            state: SubmissionState::Idle,
            auto_submit_attempted: false,
        };
        // a resumed session may already be over the threshold
        if let Err(e) = attempt.observe() {
            log::error!("auto-submit on resume failed: {}", e);
        }
        attempt
    }

    pub fn session(&self) -> &ProctoringSession {
        &self.session
    }

    pub fn submitter(&self) -> &S {
        &self.submitter
    }

    pub fn submission_state(&self) -> SubmissionState {
        self.state
    }

    pub fn is_submitted(&self) -> bool {
        self.state == SubmissionState::Submitted
    }

    pub fn warning_view(&self) -> WarningView {
        self.session.warning_view()
    }

    /// Forwards an environment event, then reacts to the auto-submit signal.
    /// Submission errors are logged; the event outcome is always returned.
    pub fn handle_event(&mut self, event: EnvironmentEvent) -> EventOutcome {
        if self.is_submitted() {
            return EventOutcome::default();
        }
        let outcome = self.session.handle_event(event);
        if let Err(e) = self.observe() {
            log::error!("auto-submit failed: {}", e);
        }
        outcome
    }

    pub fn poll_timers(&mut self) {
        self.session.poll_timers();
    }

    pub fn dismiss_warning(&mut self) -> bool {
        self.session.dismiss()
    }

    /// Checks the auto-submit signal. Submits at most once per attempt,
    /// however often it is called.
    pub fn observe(&mut self) -> Result<bool> {
        if !self.session.should_auto_submit() || self.auto_submit_attempted {
            return Ok(false);
        }
        if self.state != SubmissionState::Idle {
            return Ok(false);
        }
        self.auto_submit_attempted = true;
        self.run_submission(SubmitReason::AutoSubmit)?;
        Ok(true)
    }

    /// Student-initiated submission. Also the retry path after a failed
    /// auto-submit.
    pub fn submit(&mut self) -> Result<()> {
        match self.state {
            SubmissionState::Submitting => Err(anyhow!("submission already in progress")),
            SubmissionState::Submitted => Err(anyhow!("test already submitted")),
            SubmissionState::Idle => self.run_submission(SubmitReason::Manual),
        }
    }

    fn run_submission(&mut self, reason: SubmitReason) -> Result<()> {
        self.state = SubmissionState::Submitting;
        let attempt = self.session.attempt();
        let request = SubmissionRequest {
            test_id: attempt.test_id().to_string(),
            student_id: attempt.student_id().to_string(),
            reason,
            violation_count: self.session.violation_count(),
            time_away_seconds: self.session.time_away_seconds(),
        };
        match self.submitter.submit(&request) {
            Ok(()) => {
                self.state = SubmissionState::Submitted;
                log::info!(
                    "test submitted test={} student={} reason={:?}",
                    request.test_id,
                    request.student_id,
                    reason
                );
                Ok(())
            }
            Err(e) => {
                self.state = SubmissionState::Idle;
                Err(e)
            }
        }
    }

    /// Tears down the proctoring session and returns the submitter.
    pub fn finish(mut self) -> S {
        self.session.stop();
        self.submitter
    }
}
