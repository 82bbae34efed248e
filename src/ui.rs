//! Stderr progress for operator tools. Report output owns stdout, so every
//! line here goes to stderr and spinners back off when stdout is piped.

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::time::{Duration, Instant};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UiMode {
    Auto,
    Plain,
    Pretty,
}

impl UiMode {
    pub fn parse(flag: &str) -> Self {
        match flag {
            "plain" => UiMode::Plain,
            "pretty" => UiMode::Pretty,
            _ => UiMode::Auto,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Ui {
    spinners: bool,
}

impl Ui {
    pub fn new(mode: UiMode, stderr_is_tty: bool, stdout_is_tty: bool) -> Self {
        let spinners = stderr_is_tty
            && match mode {
                UiMode::Pretty => true,
                UiMode::Auto => stdout_is_tty,
                UiMode::Plain => false,
            };
        Self { spinners }
    }

    pub fn step(&self, name: &str) -> StepGuard {
        let spinner = self.spinners.then(|| {
            let spinner = ProgressBar::new_spinner();
            spinner.set_draw_target(ProgressDrawTarget::stderr());
            spinner.enable_steady_tick(Duration::from_millis(120));
            spinner.set_style(
                ProgressStyle::with_template("{spinner} {msg}")
                    .unwrap_or_else(|_| ProgressStyle::default_spinner()),
            );
            spinner.set_message(format!("{name}…"));
            spinner
        });
        if spinner.is_none() {
            eprintln!("==> {}", name);
        }
        StepGuard {
            name: name.to_string(),
            started: Instant::now(),
            outcome: None,
            spinner,
        }
    }
}

/// One operator step. Reports its outcome and elapsed time when dropped.
pub struct StepGuard {
    name: String,
    started: Instant,
    outcome: Option<String>,
    spinner: Option<ProgressBar>,
}

impl StepGuard {
    /// Short result shown on the completion line, e.g. `"42 rows"`.
    pub fn note(&mut self, outcome: impl Into<String>) {
        self.outcome = Some(outcome.into());
    }
}

impl Drop for StepGuard {
    fn drop(&mut self) {
        let line = completion_line(&self.name, self.outcome.as_deref(), self.started.elapsed());
        match &self.spinner {
            Some(spinner) => spinner.finish_with_message(line),
            None => eprintln!("{line}"),
        }
    }
}

fn completion_line(name: &str, outcome: Option<&str>, elapsed: Duration) -> String {
    let elapsed = if elapsed.as_secs() >= 1 {
        format!("{:.2}s", elapsed.as_secs_f64())
    } else {
        format!("{}ms", elapsed.as_millis())
    };
    match outcome {
        Some(outcome) => format!("✔ {}: {} ({})", name, outcome, elapsed),
        None => format!("✔ {} ({})", name, elapsed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spinners_need_a_terminal_and_a_clean_stdout_in_auto() {
        assert!(Ui::new(UiMode::Auto, true, true).spinners);
        assert!(!Ui::new(UiMode::Auto, true, false).spinners);
        assert!(Ui::new(UiMode::Pretty, true, false).spinners);
        assert!(!Ui::new(UiMode::Pretty, false, true).spinners);
        assert!(!Ui::new(UiMode::Plain, true, true).spinners);
        assert_eq!(UiMode::parse("fancy"), UiMode::Auto);
    }

    #[test]
    fn completion_line_includes_outcome() {
        assert_eq!(
            completion_line("Verify hash chain", Some("12 rows"), Duration::from_millis(7)),
            "✔ Verify hash chain: 12 rows (7ms)"
        );
        assert_eq!(
            completion_line("Open violation store", None, Duration::from_millis(1500)),
            "✔ Open violation store (1.50s)"
        );
    }
}
