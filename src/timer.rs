//! Owned timer handles.
//!
//! Timers are plain deadlines held by the session. Nothing fires on its own:
//! the owner polls with the current time and acts on what came due. Clearing
//! a handle is therefore enough to guarantee it never fires afterward.

/// One-shot deadline (warning auto-hide).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct OneShotTimer {
    due_ms: Option<u64>,
}

impl OneShotTimer {
    pub fn new() -> Self {
        Self { due_ms: None }
    }

    /// Arms the timer, replacing any pending deadline.
    pub fn schedule(&mut self, now_ms: u64, delay_ms: u64) {
        self.due_ms = Some(now_ms.saturating_add(delay_ms));
    }

    pub fn cancel(&mut self) {
        self.due_ms = None;
    }

    pub fn is_armed(&self) -> bool {
        self.due_ms.is_some()
    }

    pub fn due_ms(&self) -> Option<u64> {
        self.due_ms
    }

    /// Returns true once when the deadline has passed, then disarms.
    pub fn fire_if_due(&mut self, now_ms: u64) -> bool {
        match self.due_ms {
            Some(due) if now_ms >= due => {
                self.due_ms = None;
                true
            }
            _ => false,
        }
    }
}

/// Recurring tick (time-away accumulation).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IntervalTimer {
    period_ms: u64,
    next_ms: Option<u64>,
}

impl IntervalTimer {
    pub fn new(period_ms: u64) -> Self {
        Self {
            period_ms: period_ms.max(1),
            next_ms: None,
        }
    }

    /// Starts ticking from `now_ms`. Returns false if already running.
    pub fn start(&mut self, now_ms: u64) -> bool {
        if self.next_ms.is_some() {
            return false;
        }
        self.next_ms = Some(now_ms.saturating_add(self.period_ms));
        true
    }

    pub fn stop(&mut self) {
        self.next_ms = None;
    }

    pub fn is_running(&self) -> bool {
        self.next_ms.is_some()
    }

    pub fn next_due_ms(&self) -> Option<u64> {
        self.next_ms
    }

    /// Number of whole periods elapsed up to `now_ms`; advances the schedule.
    pub fn take_due_ticks(&mut self, now_ms: u64) -> u64 {
        let Some(next) = self.next_ms else {
            return 0;
        };
        if now_ms < next {
            return 0;
        }
        let ticks = (now_ms - next) / self.period_ms + 1;
        self.next_ms = Some(next.saturating_add(ticks.saturating_mul(self.period_ms)));
        ticks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_shot_fires_once_and_reschedule_replaces() {
        let mut timer = OneShotTimer::new();
        timer.schedule(0, 5000);
        timer.schedule(3000, 5000);
        assert!(!timer.fire_if_due(5000));
        assert!(timer.fire_if_due(8000));
        assert!(!timer.fire_if_due(9000));
    }

    #[test]
    fn cancelled_one_shot_never_fires() {
        let mut timer = OneShotTimer::new();
        timer.schedule(0, 10);
        timer.cancel();
        assert!(!timer.fire_if_due(1_000_000));
    }

    #[test]
    fn interval_counts_whole_periods_only() {
        let mut ticker = IntervalTimer::new(1000);
        assert!(ticker.start(0));
        assert!(!ticker.start(10));
        assert_eq!(ticker.take_due_ticks(999), 0);
        assert_eq!(ticker.take_due_ticks(3500), 3);
        assert_eq!(ticker.take_due_ticks(3999), 0);
        assert_eq!(ticker.take_due_ticks(4000), 1);
        ticker.stop();
        assert_eq!(ticker.take_due_ticks(60_000), 0);
    }
}
