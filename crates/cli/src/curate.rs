//! `mc3d curate`: annotate a cleaned raw import and store it as a round.

use std::path::PathBuf;

use mc3d_recon::curate::{CleanedEntry, CurationSummary, Curator};
use mc3d_recon::{RecordStore, Round};
use serde::Serialize;

use crate::exit_codes::EXIT_PARTIAL;
use crate::util::{load_config, open_store, read_json_file, to_json_pretty};
use crate::CliError;

#[derive(Serialize)]
struct CurateReport<'a> {
    round: &'a Round,
    database: &'a str,
    summary: &'a CurationSummary,
}

pub fn cmd_curate(
    store: Option<PathBuf>,
    input: PathBuf,
    round: String,
    config_path: Option<PathBuf>,
    json_output: bool,
) -> Result<(), CliError> {
    let config = load_config(config_path.as_deref())?;
    let entries: Vec<CleanedEntry> = read_json_file(&input)?;
    let round = Round::new(round);

    let curator = Curator::new(&config);
    let (import, summary) = curator.curate_batch(&round, &entries);

    let mut store = open_store(store)?;
    store.put_import(&import)?;

    if json_output {
        let report = CurateReport {
            round: &round,
            database: &config.database,
            summary: &summary,
        };
        println!("{}", to_json_pretty(&report)?);
    }

    eprintln!(
        "curated {} round {}: {} IDs: {} curated, {} partial occupancies, \
         {} incorrect formula, {} not cleaned",
        config.database,
        round,
        summary.total,
        summary.curated,
        summary.partial_occupancies,
        summary.incorrect_formula,
        summary.not_cleaned,
    );

    if !summary.errors.is_empty() {
        for failure in &summary.errors {
            eprintln!("  {}: {}", failure.external_id, failure.message);
        }
        return Err(CliError::new(
            EXIT_PARTIAL,
            format!("{} entries could not be curated", summary.errors.len()),
        ));
    }

    Ok(())
}
