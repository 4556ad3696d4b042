//! `mc3d status`: family status rollup from the deprecation ledger.

use std::path::{Path, PathBuf};

use mc3d_recon::family::FamilyReport;
use mc3d_recon::{FamilyMap, GroupStatus, RecordStore};
use serde::Serialize;

use crate::exit_codes::EXIT_RUNTIME;
use crate::util::{open_store, read_json_file, to_json_pretty};
use crate::CliError;

pub fn cmd_status(
    store: Option<PathBuf>,
    families_path: PathBuf,
    json_output: bool,
    csv_path: Option<PathBuf>,
) -> Result<(), CliError> {
    let families: FamilyMap = read_json_file(&families_path)?;
    let store = open_store(store)?;
    let ledger = store.ledger()?;
    let report = families.report(&ledger);

    if let Some(ref path) = csv_path {
        write_csv(path, &report)?;
    }

    if json_output {
        println!("{}", to_json_pretty(&report)?);
    }

    eprintln!(
        "{} families: {} active, {} warned, {} deprecated",
        report.families.len(),
        report.active,
        report.warned,
        report.deprecated,
    );
    for family in report.families.iter().filter(|f| f.status != GroupStatus::Active) {
        eprintln!(
            "  {} {}: {}/{} members deprecated",
            family.group_id,
            family.status,
            family.deprecated_members.len(),
            family.members,
        );
    }
    Ok(())
}

#[derive(Serialize)]
struct CsvRow<'a> {
    group_id: &'a str,
    status: GroupStatus,
    members: usize,
    deprecated_members: usize,
    golden: String,
}

fn write_csv(path: &Path, report: &FamilyReport) -> Result<(), CliError> {
    let csv_err = |e: csv::Error| CliError::new(EXIT_RUNTIME, format!("CSV write error: {}", e));

    let mut writer = csv::WriterBuilder::new()
        .terminator(csv::Terminator::Any(b'\n'))
        .from_path(path)
        .map_err(csv_err)?;

    // Always write header, even with zero rows
    if report.families.is_empty() {
        writer
            .write_record(["group_id", "status", "members", "deprecated_members", "golden"])
            .map_err(csv_err)?;
    }

    for family in &report.families {
        writer
            .serialize(CsvRow {
                group_id: family.group_id.as_str(),
                status: family.status,
                members: family.members,
                deprecated_members: family.deprecated_members.len(),
                golden: family.golden.as_ref().map(ToString::to_string).unwrap_or_default(),
            })
            .map_err(csv_err)?;
    }
    writer
        .flush()
        .map_err(|e| CliError::new(EXIT_RUNTIME, format!("CSV write error: {}", e)))?;
    eprintln!("wrote {}", path.display());
    Ok(())
}
