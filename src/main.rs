//! Replay a schedule file and print the resulting trace.
//!
//! ```text
//! lockstep [--json] [--locks] <schedule-file>
//! ```
//!
//! `--json` prints one JSON object per trace event instead of the human
//! rendering; `--locks` dumps the final lock table, which is non-empty only
//! if the schedule left transactions unfinished.

use anyhow::{bail, Context, Result};
use lockstep::Scheduler;
use std::env;
use std::fs;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

const USAGE: &str = "usage: lockstep [--json] [--locks] <schedule-file>";

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let mut json = false;
    let mut show_locks = false;
    let mut path: Option<PathBuf> = None;
    for arg in env::args().skip(1) {
        match arg.as_str() {
            "--json" => json = true,
            "--locks" => show_locks = true,
            "-h" | "--help" => {
                println!("{USAGE}");
                return Ok(());
            }
            flag if flag.starts_with('-') => bail!("unknown flag {flag:?}\n{USAGE}"),
            file => {
                if path.replace(PathBuf::from(file)).is_some() {
                    bail!("exactly one schedule file expected\n{USAGE}");
                }
            }
        }
    }
    let path = path.with_context(|| USAGE.to_string())?;

    let script = fs::read_to_string(&path)
        .with_context(|| format!("reading schedule {}", path.display()))?;

    let mut scheduler = Scheduler::new();
    let stats = scheduler
        .run_script(&script)
        .context("replay aborted on an internal invariant violation")?;

    for event in scheduler.trace() {
        if json {
            println!("{}", serde_json::to_string(event)?);
        } else {
            println!("{event}");
        }
    }

    if show_locks {
        let snapshot = scheduler.manager().locks().snapshot();
        if snapshot.is_empty() {
            println!("Lock table: empty");
        } else {
            println!("Lock table:");
            for view in snapshot {
                println!("  {view}");
            }
        }
    }

    info!(
        target: "lockstep",
        statements = stats.statements,
        malformed = stats.malformed,
        unknown = stats.unknown,
        discarded = stats.discarded,
        "replay finished"
    );
    Ok(())
}
