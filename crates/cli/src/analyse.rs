//! `mc3d analyse`: read-only views of the store.

use std::path::PathBuf;

use clap::Subcommand;
use mc3d_recon::model::UpdateSummary;
use mc3d_recon::{DeprecationLedger, DeprecationReason, RecordStore, Round};
use serde::Serialize;

use crate::util::{open_store, read_json_file, to_json_pretty, write_output};
use crate::CliError;

#[derive(Subcommand)]
pub enum AnalyseCommands {
    /// Summarize deprecation reasons across all source records
    #[command(after_help = "\
Examples:
  mc3d analyse deprecation
  mc3d analyse deprecation --json
  mc3d analyse deprecation --output deprecation.json")]
    Deprecation {
        /// Output JSON to stdout instead of human summary
        #[arg(long)]
        json: bool,

        /// Merge the ledger into this JSON file (created if missing)
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// List stored rounds and whether they were committed
    #[command(after_help = "\
Examples:
  mc3d analyse rounds
  mc3d analyse rounds --json")]
    Rounds {
        /// Output JSON to stdout instead of human summary
        #[arg(long)]
        json: bool,
    },
}

pub fn cmd_analyse(store: Option<PathBuf>, cmd: AnalyseCommands) -> Result<(), CliError> {
    match cmd {
        AnalyseCommands::Deprecation { json, output } => cmd_deprecation(store, json, output),
        AnalyseCommands::Rounds { json } => cmd_rounds(store, json),
    }
}

// ============================================================================
// deprecation
// ============================================================================

#[derive(Serialize)]
struct ReasonLine {
    reason: DeprecationReason,
    count: usize,
    help: &'static str,
}

#[derive(Serialize)]
struct DeprecationReport {
    deprecated_records: usize,
    reasons: Vec<ReasonLine>,
}

fn cmd_deprecation(
    store: Option<PathBuf>,
    json_output: bool,
    output_file: Option<PathBuf>,
) -> Result<(), CliError> {
    let store = open_store(store)?;
    let ledger = store.ledger()?;

    let counts = ledger.reason_counts();
    let report = DeprecationReport {
        deprecated_records: ledger.len(),
        reasons: DeprecationReason::ALL
            .iter()
            .map(|reason| ReasonLine {
                reason: *reason,
                count: counts.get(reason).copied().unwrap_or(0),
                help: reason.help(),
            })
            .collect(),
    };

    if let Some(ref path) = output_file {
        let mut merged = if path.exists() {
            read_json_file::<DeprecationLedger>(path)?
        } else {
            DeprecationLedger::new()
        };
        merged.merge(&ledger);
        write_output(path, &to_json_pretty(&merged)?)?;
    }

    if json_output {
        println!("{}", to_json_pretty(&report)?);
    }

    eprintln!("{} deprecated source record(s)", report.deprecated_records);
    for line in &report.reasons {
        eprintln!("  {:<18} {:>6}  {}", line.reason.to_string(), line.count, line.help);
    }
    Ok(())
}

// ============================================================================
// rounds
// ============================================================================

#[derive(Serialize)]
struct RoundLine {
    round: Round,
    committed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<UpdateSummary>,
}

fn cmd_rounds(store: Option<PathBuf>, json_output: bool) -> Result<(), CliError> {
    let store = open_store(store)?;
    let mut lines = Vec::new();
    for round in store.rounds()? {
        let summary = store.committed(&round)?;
        lines.push(RoundLine {
            committed: summary.is_some(),
            round,
            summary,
        });
    }

    if json_output {
        println!("{}", to_json_pretty(&lines)?);
    }

    for line in &lines {
        match &line.summary {
            Some(s) => eprintln!(
                "{}: committed, {} final entries ({} new, {} updated, {} removed)",
                line.round, s.final_entries, s.new, s.updated, s.removed
            ),
            None => eprintln!("{}: not committed", line.round),
        }
    }
    Ok(())
}
