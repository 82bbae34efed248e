//! proctord - drive one proctoring session from an environment event stream
//!
//! This daemon:
//! 1. Loads config (file, env, flags) and opens the violation store
//! 2. Starts a proctoring session for one (test, student) attempt
//! 3. Reads JSON-lines environment events from a file or stdin
//! 4. Polls session timers between events (wall time, or the events' own
//!    `at_ms` stamps with `--replay`)
//! 5. Prints warning and submission transitions as JSON lines on stdout
//! 6. Stops on end of input, Ctrl-C, or submission

use anyhow::{anyhow, Result};
use clap::Parser;
use serde_json::json;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::time::Duration;

use exam_proctor::{
    load_prior_violations, AttemptId, BackgroundSink, Clock, ExamAttempt, HeadlessEnvironment,
    ManualClock, ProctordConfig, ProctoringSession, SqliteViolationStore, StudentIdentity,
    SubmissionRequest, SystemClock, TimedEvent,
};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Config file (JSON, or TOML with a .toml extension).
    #[arg(long, env = "PROCTOR_CONFIG")]
    config: Option<PathBuf>,
    /// Overrides the violation database path.
    #[arg(long)]
    db_path: Option<String>,
    #[arg(long)]
    test_id: Option<String>,
    #[arg(long)]
    student_id: Option<String>,
    /// Registers the student's display name for reports.
    #[arg(long)]
    student_name: Option<String>,
    /// Event input; `-` reads stdin.
    #[arg(long, default_value = "-")]
    input: String,
    /// Pretend the host can enter fullscreen.
    #[arg(long, default_value_t = false)]
    allow_fullscreen: bool,
    /// Drive session time from each event's `at_ms` instead of the wall clock.
    #[arg(long, default_value_t = false)]
    replay: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut cfg = ProctordConfig::load_from(args.config.as_deref())?;
    if let Some(db_path) = args.db_path {
        cfg.db_path = db_path;
    }
    let test_id = args
        .test_id
        .or(cfg.test_id.clone())
        .ok_or_else(|| anyhow!("test id must be set (--test-id or PROCTOR_TEST_ID)"))?;
    let student_id = args
        .student_id
        .or(cfg.student_id.clone())
        .ok_or_else(|| anyhow!("student id must be set (--student-id or PROCTOR_STUDENT_ID)"))?;
    let attempt = AttemptId::new(&test_id, &student_id)?;

    let mut store = SqliteViolationStore::open(&cfg.db_path)?;
    if let Some(name) = args.student_name {
        store.upsert_student(&StudentIdentity {
            student_id: student_id.clone(),
            full_name: name,
            email: None,
        })?;
    }
    let prior = if cfg.proctoring.resume_from_log {
        load_prior_violations(&mut store, &attempt)?
    } else {
        Vec::new()
    };
    let sink = BackgroundSink::spawn(Box::new(store), cfg.sink_capacity)?;
    let stats = sink.stats();

    let replay_clock = args.replay.then(|| Arc::new(ManualClock::starting_now()));
    let clock: Arc<dyn Clock> = match &replay_clock {
        Some(manual) => manual.clone() as Arc<dyn Clock>,
        None => Arc::new(SystemClock::new()),
    };

    let session = ProctoringSession::start_with_history(
        attempt,
        cfg.proctoring.clone(),
        clock,
        Box::new(HeadlessEnvironment::new(args.allow_fullscreen)),
        Box::new(sink),
        prior,
    )?;
    let submitter = |request: &SubmissionRequest| -> Result<()> {
        println!("{}", json!({ "kind": "submission", "request": request }));
        Ok(())
    };
    let mut exam = ExamAttempt::new(session, submitter);

    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_handler = shutdown.clone();
    ctrlc::set_handler(move || shutdown_handler.store(true, Ordering::SeqCst))?;

    let events = spawn_reader(&args.input)?;
    let poll_interval = Duration::from_millis(cfg.poll_interval_ms);
    log::info!(
        "proctord reading events from {} ({} time)",
        args.input,
        if args.replay { "recorded" } else { "wall" }
    );

    let mut was_open = false;
    loop {
        if shutdown.load(Ordering::SeqCst) {
            log::info!("interrupted; stopping session");
            break;
        }
        match events.recv_timeout(poll_interval) {
            Ok(timed) => {
                if let Some(manual) = &replay_clock {
                    match timed.at_ms {
                        Some(at_ms) if at_ms < manual.now_ms() => log::warn!(
                            "event at_ms={} is earlier than session time {}; using session time",
                            at_ms,
                            manual.now_ms()
                        ),
                        Some(at_ms) => manual.set_ms(at_ms),
                        None => {}
                    }
                }
                let outcome = exam.handle_event(timed.event);
                if outcome.verdict.is_some() {
                    let view = exam.warning_view();
                    println!(
                        "{}",
                        json!({
                            "kind": "warning",
                            "prevent_default": outcome.prevent_default,
                            "view": view
                        })
                    );
                    was_open = view.is_open;
                }
            }
            Err(RecvTimeoutError::Timeout) => exam.poll_timers(),
            Err(RecvTimeoutError::Disconnected) => {
                log::info!("event input closed");
                break;
            }
        }

        let is_open = exam.warning_view().is_open;
        if was_open && !is_open {
            println!("{}", json!({ "kind": "warning_hidden" }));
        }
        was_open = is_open;

        if exam.is_submitted() {
            break;
        }
    }

    let session = exam.session();
    let violations = session.violation_count();
    let time_away = session.time_away_seconds();
    exam.finish();
    let counters = stats.snapshot();
    log::info!(
        "session closed: violations={} time_away_s={} persisted={} dropped={} failed={}",
        violations,
        time_away,
        counters.persisted,
        counters.dropped,
        counters.failed
    );
    Ok(())
}

fn spawn_reader(input: &str) -> Result<mpsc::Receiver<TimedEvent>> {
    let reader: Box<dyn BufRead + Send> = if input == "-" {
        Box::new(BufReader::new(std::io::stdin()))
    } else {
        let file = std::fs::File::open(input)
            .map_err(|e| anyhow!("failed to open event input {}: {}", input, e))?;
        Box::new(BufReader::new(file))
    };
    let (tx, rx) = mpsc::channel();
    std::thread::Builder::new()
        .name("event-reader".to_string())
        .spawn(move || {
            for (lineno, line) in reader.lines().enumerate() {
                let line = match line {
                    Ok(line) => line,
                    Err(e) => {
                        log::error!("event input read failed: {}", e);
                        break;
                    }
                };
                if line.trim().is_empty() {
                    continue;
                }
                match TimedEvent::parse_line(&line) {
                    Ok(event) => {
                        if tx.send(event).is_err() {
                            break;
                        }
                    }
                    Err(e) => log::warn!("skipping line {}: {}", lineno + 1, e),
                }
            }
        })?;
    Ok(rx)
}
