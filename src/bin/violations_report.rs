//! violations_report - per-student violation summary for one test

use anyhow::{anyhow, Result};
use clap::Parser;
use std::io::IsTerminal;

use exam_proctor::{load_report, report::render_table, validate_attempt_id, SqliteViolationStore};

#[path = "../ui.rs"]
mod ui;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Path to the violation database.
    #[arg(long, env = "PROCTOR_DB_PATH", default_value = "proctor.db")]
    db_path: String,
    /// Test whose violations are summarized.
    #[arg(long)]
    test_id: String,
    /// Output format (table|json).
    #[arg(long, default_value = "table")]
    format: String,
    /// Re-derive the violation log hash chain before reporting.
    #[arg(long, default_value_t = false)]
    verify_chain: bool,
    /// UI mode for stderr progress (auto|plain|pretty)
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: String,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();
    validate_attempt_id("test_id", &args.test_id)?;
    if args.format != "table" && args.format != "json" {
        return Err(anyhow!("--format must be table or json"));
    }
    let ui = ui::Ui::new(
        ui::UiMode::parse(&args.ui),
        std::io::stderr().is_terminal(),
        std::io::stdout().is_terminal(),
    );

    let mut store = {
        let _step = ui.step("Open violation store");
        SqliteViolationStore::open(&args.db_path)?
    };
    if args.verify_chain {
        let mut step = ui.step("Verify hash chain");
        let status = store.verify_chain()?;
        step.note(format!("{} rows, head {}", status.rows, status.head_hex()));
    }
    let report = {
        let mut step = ui.step("Summarize violations");
        let report = load_report(&mut store, &args.test_id)?;
        step.note(format!(
            "{} students, {} violations",
            report.summaries.len(),
            report.total_violations()
        ));
        report
    };

    if args.format == "json" {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", render_table(&report));
    }
    Ok(())
}
