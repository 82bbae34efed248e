//! Warning presentation contract.
//!
//! A session holds at most one warning. A new violation replaces it and
//! re-arms the auto-hide timer; nothing is queued.

use serde::Serialize;

use crate::timer::OneShotTimer;

#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Warning,
    Severe,
    Critical,
}

impl Severity {
    pub fn classify(violations: usize, max_violations: i32) -> Self {
        let count = i64::try_from(violations).unwrap_or(i64::MAX);
        let max = i64::from(max_violations);
        if count >= max {
            Severity::Critical
        } else if max - count == 1 {
            Severity::Severe
        } else {
            Severity::Warning
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Warning {
    pub message: String,
    pub visible: bool,
}

/// The single active warning and its auto-hide deadline.
#[derive(Clone, Debug, Default)]
pub struct WarningSlot {
    current: Option<Warning>,
    auto_hide: OneShotTimer,
}

impl WarningSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn show(&mut self, message: String, now_ms: u64, duration_ms: u64) {
        self.current = Some(Warning {
            message,
            visible: true,
        });
        self.auto_hide.schedule(now_ms, duration_ms);
    }

    /// Hides the warning and cancels its timer. Returns true if something
    /// was visible.
    pub fn hide(&mut self) -> bool {
        self.auto_hide.cancel();
        match self.current.as_mut() {
            Some(warning) if warning.visible => {
                warning.visible = false;
                true
            }
            _ => false,
        }
    }

    /// Applies the auto-hide deadline. Returns true when it fired.
    pub fn poll(&mut self, now_ms: u64) -> bool {
        if !self.auto_hide.fire_if_due(now_ms) {
            return false;
        }
        if let Some(warning) = self.current.as_mut() {
            warning.visible = false;
        }
        true
    }

    pub fn clear_timer(&mut self) {
        self.auto_hide.cancel();
    }

    pub fn current(&self) -> Option<&Warning> {
        self.current.as_ref()
    }

    pub fn is_visible(&self) -> bool {
        self.current.as_ref().is_some_and(|w| w.visible)
    }

    pub fn hide_due_ms(&self) -> Option<u64> {
        self.auto_hide.due_ms()
    }
}

/// Snapshot consumed by the presentation layer (modal or banner).
#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct WarningView {
    pub is_open: bool,
    pub violations: usize,
    pub max_violations: i32,
    pub message: String,
    pub time_away_seconds: u64,
    pub should_auto_submit: bool,
    pub severity: Severity,
    /// False once auto-submit has fired; the flow is non-interactive then.
    pub dismissible: bool,
}
