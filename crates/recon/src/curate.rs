//! Curation: annotate cleaned records and decide which ones are eligible.
//!
//! A record is curated when it has no partial occupancies and the cleaning
//! workflow did not flag a formula mismatch. Curation never deletes or
//! deprecates anything; it only sets extras.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::ReconConfig;
use crate::error::ReconError;
use crate::model::{ExternalId, ImportRound, Round, SourceInfo, SourceRecord, Structure};

// ---------------------------------------------------------------------------
// Input
// ---------------------------------------------------------------------------

/// Provenance as recorded on the raw CIF.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawSource {
    pub db_name: String,
    pub version: String,
    pub id: String,
}

/// Outcome of the cleaning workflow that the curator looks at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleaningResult {
    pub exit_status: u32,
    pub source: RawSource,
    /// Spacegroup numbers reported by the cleaned CIF.
    #[serde(default)]
    pub spacegroup_numbers: Vec<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleaningOutcome {
    pub exit_status: u32,
    #[serde(default)]
    pub spacegroup_numbers: Vec<u32>,
}

/// One raw import entry as handed over by the cleaning step.
///
/// `cleaning` is absent when the workflow did not finish; `structure` is
/// absent when nothing could be parsed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CleanedEntry {
    pub source: RawSource,
    #[serde(default)]
    pub cleaning: Option<CleaningOutcome>,
    #[serde(default)]
    pub structure: Option<Structure>,
}

// ---------------------------------------------------------------------------
// Occupancy predicate
// ---------------------------------------------------------------------------

pub trait OccupancyCheck {
    fn has_partial_occupancies(&self, structure: &Structure) -> bool;
}

/// Flags alloy sites (several elements on one site) and vacancies (total
/// site occupancy below one).
#[derive(Debug, Clone, Copy)]
pub struct SiteOccupancyCheck {
    pub tolerance: f64,
}

impl Default for SiteOccupancyCheck {
    fn default() -> Self {
        Self { tolerance: 1e-4 }
    }
}

impl OccupancyCheck for SiteOccupancyCheck {
    fn has_partial_occupancies(&self, structure: &Structure) -> bool {
        structure
            .sites
            .iter()
            .any(|site| site.is_alloy() || site.total_occupancy() < 1.0 - self.tolerance)
    }
}

// ---------------------------------------------------------------------------
// Curator
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CurationSummary {
    pub total: usize,
    pub curated: usize,
    pub partial_occupancies: usize,
    pub incorrect_formula: usize,
    pub not_cleaned: usize,
    pub errors: Vec<CurationFailure>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CurationFailure {
    pub external_id: ExternalId,
    pub message: String,
}

pub struct Curator<'a, C: OccupancyCheck> {
    config: &'a ReconConfig,
    occupancy: C,
}

impl<'a> Curator<'a, SiteOccupancyCheck> {
    pub fn new(config: &'a ReconConfig) -> Self {
        Self::with_check(config, SiteOccupancyCheck::default())
    }
}

impl<'a, C: OccupancyCheck> Curator<'a, C> {
    pub fn with_check(config: &'a ReconConfig, occupancy: C) -> Self {
        Self { config, occupancy }
    }

    /// Annotate `record` from its cleaning result.
    pub fn curate(
        &self,
        mut record: SourceRecord,
        cleaning: &CleaningResult,
    ) -> Result<SourceRecord, ReconError> {
        let database = self.config.short_database_name(&cleaning.source.db_name)?;
        let extras = &mut record.extras;

        extras.source = Some(SourceInfo {
            database,
            version: cleaning.source.version.clone(),
            id: cleaning.source.id.clone(),
        });

        // Ambiguous spacegroups are left unset.
        if let [number] = cleaning.spacegroup_numbers.as_slice() {
            extras.cif_spacegroup_number = Some(*number);
        }

        let partial = self.occupancy.has_partial_occupancies(&record.structure);
        extras.partial_occupancies = Some(partial);

        let issue = self.config.curation.formula_issue(cleaning.exit_status);
        extras.incorrect_formula = issue.is_some();
        extras.formula_issue = issue.map(str::to_string);

        extras.curated = !partial && !extras.incorrect_formula;

        Ok(record)
    }

    /// Curate a whole raw import. IDs whose cleaning did not finish map to
    /// `None`. Entries that fail curation are reported and left out, so a
    /// stray record cannot mark an ID as present in this database.
    pub fn curate_batch(
        &self,
        round: &Round,
        entries: &[CleanedEntry],
    ) -> (ImportRound, CurationSummary) {
        let mut import = ImportRound::new(round.clone(), self.config.database.clone());
        let mut summary = CurationSummary::default();

        for entry in entries {
            let id = ExternalId::new(entry.source.id.clone());
            if import.contains(&id) {
                summary.errors.push(CurationFailure {
                    external_id: id,
                    message: "duplicate ID in raw import; keeping the first entry".into(),
                });
                continue;
            }
            summary.total += 1;

            let record = match self.curate_entry(round, &id, entry) {
                Ok(record) => record,
                Err(e) => {
                    warn!(id = %id, error = %e, "curation failed");
                    summary.errors.push(CurationFailure {
                        external_id: id.clone(),
                        message: e.to_string(),
                    });
                    continue;
                }
            };

            match &record {
                None => summary.not_cleaned += 1,
                Some(r) => {
                    if r.extras.partial_occupancies == Some(true) {
                        summary.partial_occupancies += 1;
                    }
                    if r.extras.incorrect_formula {
                        summary.incorrect_formula += 1;
                    }
                    if r.is_curated() {
                        summary.curated += 1;
                    }
                }
            }

            import.entries.insert(id, record);
        }

        debug!(
            round = %round,
            total = summary.total,
            curated = summary.curated,
            "curated raw import"
        );
        (import, summary)
    }

    fn curate_entry(
        &self,
        round: &Round,
        id: &ExternalId,
        entry: &CleanedEntry,
    ) -> Result<Option<SourceRecord>, ReconError> {
        let database = self.config.short_database_name(&entry.source.db_name)?;
        if database != self.config.database {
            return Err(ReconError::DatabaseMismatch {
                found: database,
                expected: self.config.database.clone(),
            });
        }

        let (Some(outcome), Some(structure)) = (&entry.cleaning, &entry.structure) else {
            return Ok(None);
        };

        let record = SourceRecord {
            database,
            round: round.clone(),
            external_id: id.clone(),
            structure: structure.clone(),
            extras: Default::default(),
            deprecation_reasons: Default::default(),
        };
        let cleaning = CleaningResult {
            exit_status: outcome.exit_status,
            source: entry.source.clone(),
            spacegroup_numbers: outcome.spacegroup_numbers.clone(),
        };
        self.curate(record, &cleaning).map(Some)
    }
}
