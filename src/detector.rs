//! Violation detection.
//!
//! Raw environment signals come in as `EnvironmentEvent`s and leave as at
//! most one `ViolationRecord` each. The detector is a two-state machine:
//!
//! - `Active`: the exam view is visible.
//! - `Away { since_ms }`: the exam view is hidden; a tab switch is pending
//!   and is only emitted once the student returns, carrying its duration.
//!
//! Config gating happens here. A disabled signal produces neither a
//! violation nor a request to suppress the default action.

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::ProctoringConfig;
use crate::timer::IntervalTimer;
use crate::violation::{ViolationRecord, ViolationType};

const TIME_AWAY_TICK_MS: u64 = 1000;

/// Signals sourced from the browser environment.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EnvironmentEvent {
    VisibilityHidden,
    VisibilityVisible,
    FullscreenEntered,
    FullscreenExited,
    Copy,
    Paste,
    ContextMenu,
}

/// One line of an event stream. Recorded streams stamp each signal with
/// `at_ms`, the session's monotonic time when it was observed; live streams
/// leave it out and take the time of arrival.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimedEvent {
    pub at_ms: Option<u64>,
    pub event: EnvironmentEvent,
}

impl TimedEvent {
    /// Parses `{"event":"copy","at_ms":1500}`; `at_ms` may be absent or null.
    pub fn parse_line(line: &str) -> Result<Self> {
        let mut value: serde_json::Value = serde_json::from_str(line)?;
        let at_ms = match value.as_object_mut().and_then(|obj| obj.remove("at_ms")) {
            None | Some(serde_json::Value::Null) => None,
            Some(raw) => Some(
                raw.as_u64()
                    .ok_or_else(|| anyhow!("at_ms must be a non-negative integer, got {}", raw))?,
            ),
        };
        let event = serde_json::from_value(value)?;
        Ok(Self { at_ms, event })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TabState {
    Active,
    Away { since_ms: u64 },
}

/// Result of feeding one event to the detector.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Detection {
    pub violation: Option<ViolationRecord>,
    /// The host should suppress the browser's default action (clipboard,
    /// context menu).
    pub prevent_default: bool,
}

impl Detection {
    fn none() -> Self {
        Self::default()
    }

    fn violation(record: ViolationRecord) -> Self {
        Self {
            violation: Some(record),
            prevent_default: false,
        }
    }

    fn intercepted(record: ViolationRecord) -> Self {
        Self {
            violation: Some(record),
            prevent_default: true,
        }
    }
}

/// Accumulates whole seconds spent away from the exam view.
#[derive(Clone, Debug)]
pub struct TimeAwayTracker {
    enabled: bool,
    ticker: IntervalTimer,
    seconds: u64,
}

impl TimeAwayTracker {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            ticker: IntervalTimer::new(TIME_AWAY_TICK_MS),
            seconds: 0,
        }
    }

    /// Starts the per-second tick. A second call during the same absence
    /// is ignored.
    pub fn begin(&mut self, now_ms: u64) -> bool {
        if !self.enabled {
            return false;
        }
        self.ticker.start(now_ms)
    }

    pub fn end(&mut self) {
        self.ticker.stop();
    }

    pub fn poll(&mut self, now_ms: u64) -> u64 {
        let ticks = self.ticker.take_due_ticks(now_ms);
        self.seconds = self.seconds.saturating_add(ticks);
        ticks
    }

    pub fn seconds(&self) -> u64 {
        self.seconds
    }

    pub fn is_running(&self) -> bool {
        self.ticker.is_running()
    }

    pub fn next_due_ms(&self) -> Option<u64> {
        self.ticker.next_due_ms()
    }
}

#[derive(Clone, Debug)]
pub struct ViolationDetector {
    enable_fullscreen: bool,
    prevent_copy_paste: bool,
    prevent_right_click: bool,
    state: TabState,
    fullscreen_active: bool,
    time_away: TimeAwayTracker,
}

impl ViolationDetector {
    pub fn new(config: &ProctoringConfig) -> Self {
        Self {
            enable_fullscreen: config.enable_fullscreen,
            prevent_copy_paste: config.prevent_copy_paste,
            prevent_right_click: config.prevent_right_click,
            state: TabState::Active,
            fullscreen_active: false,
            time_away: TimeAwayTracker::new(config.track_time_away),
        }
    }

    pub fn state(&self) -> TabState {
        self.state
    }

    pub fn is_tab_active(&self) -> bool {
        matches!(self.state, TabState::Active)
    }

    pub fn is_fullscreen_active(&self) -> bool {
        self.fullscreen_active
    }

    pub fn set_fullscreen_active(&mut self, active: bool) {
        self.fullscreen_active = active;
    }

    pub fn time_away_seconds(&self) -> u64 {
        self.time_away.seconds()
    }

    pub fn time_away(&self) -> &TimeAwayTracker {
        &self.time_away
    }

    /// Advances the time-away tick to `now_ms`.
    pub fn poll(&mut self, now_ms: u64) {
        self.time_away.poll(now_ms);
    }

    pub fn observe(
        &mut self,
        event: EnvironmentEvent,
        now_ms: u64,
        wall_now: DateTime<Utc>,
    ) -> Detection {
        match event {
            EnvironmentEvent::VisibilityHidden => {
                if let TabState::Active = self.state {
                    self.state = TabState::Away { since_ms: now_ms };
                }
                self.time_away.begin(now_ms);
                Detection::none()
            }
            EnvironmentEvent::VisibilityVisible => {
                let TabState::Away { since_ms } = self.state else {
                    return Detection::none();
                };
                self.time_away.poll(now_ms);
                self.time_away.end();
                self.state = TabState::Active;
                let elapsed_s = now_ms.saturating_sub(since_ms) / 1000;
                Detection::violation(ViolationRecord::tab_switch(wall_now, elapsed_s))
            }
            EnvironmentEvent::FullscreenEntered => {
                self.fullscreen_active = true;
                Detection::none()
            }
            EnvironmentEvent::FullscreenExited => {
                self.fullscreen_active = false;
                if !self.enable_fullscreen {
                    return Detection::none();
                }
                Detection::violation(ViolationRecord::new(
                    ViolationType::FullscreenExit,
                    wall_now,
                ))
            }
            EnvironmentEvent::Copy if self.prevent_copy_paste => Detection::intercepted(
                ViolationRecord::new(ViolationType::CopyAttempt, wall_now),
            ),
            EnvironmentEvent::Paste if self.prevent_copy_paste => Detection::intercepted(
                ViolationRecord::new(ViolationType::PasteAttempt, wall_now),
            ),
            EnvironmentEvent::ContextMenu if self.prevent_right_click => Detection::intercepted(
                ViolationRecord::new(ViolationType::RightClick, wall_now),
            ),
            EnvironmentEvent::Copy | EnvironmentEvent::Paste | EnvironmentEvent::ContextMenu => {
                Detection::none()
            }
        }
    }

    /// Stops the tick and drops any pending absence without emitting it.
    pub fn reset(&mut self) {
        self.time_away.end();
        self.state = TabState::Active;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detector(config: ProctoringConfig) -> ViolationDetector {
        ViolationDetector::new(&config)
    }

    #[test]
    fn return_without_leaving_is_ignored() {
        let mut det = detector(ProctoringConfig::default());
        let out = det.observe(EnvironmentEvent::VisibilityVisible, 500, Utc::now());
        assert_eq!(out, Detection::none());
        assert!(det.is_tab_active());
    }

    #[test]
    fn tab_switch_is_emitted_on_return_with_floor_duration() {
        let mut det = detector(ProctoringConfig::default());
        assert!(det
            .observe(EnvironmentEvent::VisibilityHidden, 1_000, Utc::now())
            .violation
            .is_none());
        assert_eq!(det.state(), TabState::Away { since_ms: 1_000 });

        let out = det.observe(EnvironmentEvent::VisibilityVisible, 8_900, Utc::now());
        let record = out.violation.expect("tab switch");
        assert_eq!(record.violation_type, ViolationType::TabSwitch);
        assert_eq!(record.duration_seconds, Some(7));
        assert_eq!(det.time_away_seconds(), 7);
        assert!(!det.time_away().is_running());
    }

    #[test]
    fn duplicate_hidden_keeps_first_start_and_single_tick() {
        let mut det = detector(ProctoringConfig::default());
        det.observe(EnvironmentEvent::VisibilityHidden, 0, Utc::now());
        det.poll(1_500);
        det.observe(EnvironmentEvent::VisibilityHidden, 1_500, Utc::now());
        det.poll(3_000);
        assert_eq!(det.time_away_seconds(), 3);
        assert_eq!(det.state(), TabState::Away { since_ms: 0 });
    }

    #[test]
    fn time_away_disabled_still_reports_duration() {
        let mut det = detector(ProctoringConfig {
            track_time_away: false,
            ..ProctoringConfig::default()
        });
        det.observe(EnvironmentEvent::VisibilityHidden, 0, Utc::now());
        let out = det.observe(EnvironmentEvent::VisibilityVisible, 4_000, Utc::now());
        assert_eq!(out.violation.unwrap().duration_seconds, Some(4));
        assert_eq!(det.time_away_seconds(), 0);
    }

    #[test]
    fn gated_signals_are_not_intercepted() {
        let mut det = detector(ProctoringConfig {
            prevent_copy_paste: false,
            prevent_right_click: false,
            ..ProctoringConfig::default()
        });
        for event in [
            EnvironmentEvent::Copy,
            EnvironmentEvent::Paste,
            EnvironmentEvent::ContextMenu,
            EnvironmentEvent::FullscreenExited,
        ] {
            assert_eq!(det.observe(event, 0, Utc::now()), Detection::none());
        }
    }

    #[test]
    fn enabled_clipboard_signals_are_intercepted() {
        let mut det = detector(ProctoringConfig::default());
        let out = det.observe(EnvironmentEvent::Paste, 0, Utc::now());
        assert!(out.prevent_default);
        assert_eq!(
            out.violation.unwrap().violation_type,
            ViolationType::PasteAttempt
        );
    }

    #[test]
    fn fullscreen_exit_counts_only_when_enforced() {
        let mut det = detector(ProctoringConfig {
            enable_fullscreen: true,
            ..ProctoringConfig::default()
        });
        det.observe(EnvironmentEvent::FullscreenEntered, 0, Utc::now());
        assert!(det.is_fullscreen_active());
        let out = det.observe(EnvironmentEvent::FullscreenExited, 10, Utc::now());
        assert!(!out.prevent_default);
        assert_eq!(
            out.violation.unwrap().violation_type,
            ViolationType::FullscreenExit
        );
        assert!(!det.is_fullscreen_active());
    }

    #[test]
    fn events_parse_from_json_lines() {
        let event: EnvironmentEvent =
            serde_json::from_str(r#"{"event":"context_menu"}"#).unwrap();
        assert_eq!(event, EnvironmentEvent::ContextMenu);
    }

    #[test]
    fn timed_lines_carry_optional_observation_time() {
        let timed = TimedEvent::parse_line(r#"{"event":"visibility_hidden","at_ms":4200}"#).unwrap();
        assert_eq!(timed.at_ms, Some(4200));
        assert_eq!(timed.event, EnvironmentEvent::VisibilityHidden);

        let live = TimedEvent::parse_line(r#"{"event":"paste"}"#).unwrap();
        assert_eq!(live.at_ms, None);

        assert!(TimedEvent::parse_line(r#"{"event":"paste","at_ms":-5}"#).is_err());
        assert!(TimedEvent::parse_line(r#"{"event":"teleport","at_ms":1}"#).is_err());
    }
}
