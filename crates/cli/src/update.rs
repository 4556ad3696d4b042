//! `mc3d update`: reconcile a curated round against the previous final set.

use std::path::PathBuf;

use mc3d_recon::{run_round, LatticeOracle, Reconciler, Round};

use crate::exit_codes::EXIT_PARTIAL;
use crate::util::{load_config, open_store, to_json_pretty, write_output};
use crate::CliError;

pub fn cmd_update(
    store: Option<PathBuf>,
    previous: Option<String>,
    round: String,
    config_path: Option<PathBuf>,
    json_output: bool,
    output_file: Option<PathBuf>,
) -> Result<(), CliError> {
    let config = load_config(config_path.as_deref())?;
    let output_file = output_file.or_else(|| config.output.json.as_ref().map(PathBuf::from));
    let mut store = open_store(store)?;

    let round = Round::new(round);
    let previous = previous.map(Round::new);
    if previous.as_ref() == Some(&round) {
        return Err(CliError::args("--previous and --round must differ"));
    }

    let oracle = LatticeOracle::from_config(&config.matcher);
    let mut reconciler = Reconciler::new(&oracle);
    let result = run_round(&config, &mut store, &mut reconciler, previous.as_ref(), &round)?;

    // Output
    let json_str = to_json_pretty(&result)?;

    if let Some(ref path) = output_file {
        write_output(path, &json_str)?;
    }

    if json_output {
        println!("{json_str}");
    }

    // Human summary to stderr
    let s = &result.summary;
    eprintln!(
        "update {} -> {}: {} IDs: {} new, {} kept, {} updated, \
         {} carried forward, {} removed, {} failed",
        previous.as_ref().map(Round::as_str).unwrap_or("(none)"),
        round,
        s.total_ids,
        s.new,
        s.kept_previous,
        s.updated,
        s.carried_forward,
        s.removed,
        s.failed,
    );
    eprintln!(
        "final set: {} entries ({} already written); {} deprecation reason(s) recorded",
        s.final_entries,
        s.already_applied,
        result.deprecations.len(),
    );

    if !result.is_complete() {
        for failure in &result.failures {
            eprintln!("  {}: {}", failure.external_id, failure.message);
        }
        return Err(CliError::new(
            EXIT_PARTIAL,
            format!("{} IDs failed; round {round} not committed", result.failures.len()),
        )
        .with_hint("rerun the same command to retry the failed IDs"));
    }

    Ok(())
}
