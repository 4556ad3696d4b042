//! `mc3d uniq`: group a round's final set into structure families.

use std::path::PathBuf;

use mc3d_recon::{
    FamilyGrouper, FirstReferenceGrouper, LatticeOracle, ReconError, RecordStore, Round,
};

use crate::util::{load_config, open_store, to_json_pretty, write_output};
use crate::CliError;

pub fn cmd_uniq(
    store: Option<PathBuf>,
    round: String,
    config_path: Option<PathBuf>,
    output_file: Option<PathBuf>,
    json_output: bool,
) -> Result<(), CliError> {
    let config = load_config(config_path.as_deref())?;
    let store = open_store(store)?;
    let round = Round::new(round);

    let generation = store
        .final_generation(&round)?
        .ok_or_else(|| ReconError::MissingRound(round.clone()))?;
    let entries: Vec<_> = generation.entries().cloned().collect();

    let oracle = LatticeOracle::from_config(&config.matcher);
    let grouper = FirstReferenceGrouper::new(&oracle, &config.grouping);
    let families = grouper.group(&entries).map_err(ReconError::from)?;

    let json_str = to_json_pretty(&families)?;
    if let Some(ref path) = output_file {
        write_output(path, &json_str)?;
    }
    if json_output {
        println!("{json_str}");
    }

    let grouped: usize = families.iter().map(|(_, members)| members.len()).sum();
    eprintln!(
        "round {}: {} entries grouped into {} families ({} left out)",
        round,
        grouped,
        families.len(),
        entries.len() - grouped,
    );
    Ok(())
}
