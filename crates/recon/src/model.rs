use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::ReconError;

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// Identifier assigned by the source database. Stable across import rounds.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExternalId(String);

impl ExternalId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ExternalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ExternalId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Import generation tag (`v1`, `2024.1`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Round(String);

impl Round {
    pub fn new(round: impl Into<String>) -> Self {
        Self(round.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Round {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Round {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Address of one source record: `database|round|external_id`.
///
/// Serialized as the pipe-joined string so it can key JSON maps.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceKey {
    pub database: String,
    pub round: Round,
    pub external_id: ExternalId,
}

impl SourceKey {
    pub fn new(database: impl Into<String>, round: Round, external_id: ExternalId) -> Self {
        Self {
            database: database.into(),
            round,
            external_id,
        }
    }
}

impl fmt::Display for SourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}|{}", self.database, self.round, self.external_id)
    }
}

impl FromStr for SourceKey {
    type Err = ReconError;

    /// Database and round never contain `|`; the external ID may.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(3, '|');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(db), Some(round), Some(id))
                if !db.is_empty() && !round.is_empty() && !id.is_empty() =>
            {
                Ok(Self::new(db, Round::from(round), ExternalId::from(id)))
            }
            _ => Err(ReconError::InvalidSourceKey(s.to_string())),
        }
    }
}

impl Serialize for SourceKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for SourceKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// Structure payload
// ---------------------------------------------------------------------------

/// Cell parameters. Lengths in Å, angles in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Lattice {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub alpha: f64,
    pub beta: f64,
    pub gamma: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeciesOccupancy {
    pub element: String,
    #[serde(default = "full_occupancy")]
    pub occupancy: f64,
}

fn full_occupancy() -> f64 {
    1.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Site {
    pub species: Vec<SpeciesOccupancy>,
    /// Fractional coordinates.
    pub position: [f64; 3],
}

impl Site {
    /// More than one element shares the site.
    pub fn is_alloy(&self) -> bool {
        self.species.len() > 1
    }

    pub fn total_occupancy(&self) -> f64 {
        self.species.iter().map(|s| s.occupancy).sum()
    }
}

/// Crystallographic payload. Only the similarity oracle looks inside.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Structure {
    /// Hill-compact formula, e.g. `Cl2Mg`.
    pub formula: String,
    pub lattice: Lattice,
    #[serde(default)]
    pub sites: Vec<Site>,
}

// ---------------------------------------------------------------------------
// Extras
// ---------------------------------------------------------------------------

/// Provenance copied from the raw file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceInfo {
    pub database: String,
    pub version: String,
    pub id: String,
}

/// Metadata attached to a record. Unrecognized keys are kept in `other`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Extras {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<SourceInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cif_spacegroup_number: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partial_occupancies: Option<bool>,
    #[serde(default)]
    pub incorrect_formula: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub formula_issue: Option<String>,
    #[serde(default)]
    pub curated: bool,
    #[serde(flatten)]
    pub other: BTreeMap<String, serde_json::Value>,
}

impl Extras {
    /// Return a copy with `update` applied key by key. Existing keys not in
    /// `update` are untouched; recognized keys must keep their types.
    ///
    /// `curated` cannot be set directly. It is recomputed from
    /// `partial_occupancies` and `incorrect_formula` once the record has
    /// been through curation.
    pub fn merged(
        &self,
        update: &BTreeMap<String, serde_json::Value>,
    ) -> Result<Extras, ReconError> {
        if update.contains_key("curated") {
            return Err(ReconError::DerivedExtra("curated".into()));
        }
        let mut value = serde_json::to_value(self)?;
        if let Some(map) = value.as_object_mut() {
            for (k, v) in update {
                map.insert(k.clone(), v.clone());
            }
        }
        let mut merged: Extras = serde_json::from_value(value)?;
        if let Some(partial) = merged.partial_occupancies {
            merged.curated = !partial && !merged.incorrect_formula;
        }
        Ok(merged)
    }
}

// ---------------------------------------------------------------------------
// Deprecation reasons
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeprecationReason {
    IdRemoved,
    StructureUpdated,
    IncorrectFormula,
}

impl DeprecationReason {
    pub const ALL: [DeprecationReason; 3] = [
        Self::IdRemoved,
        Self::StructureUpdated,
        Self::IncorrectFormula,
    ];

    pub fn help(&self) -> &'static str {
        match self {
            Self::IdRemoved => "The corresponding ID has been removed from the source database.",
            Self::StructureUpdated => {
                "The corresponding ID has a different structure in a newer version of the database"
            }
            Self::IncorrectFormula => {
                "The structure of the corresponding ID had a formula mismatch between the \
                 cleaned CIF and the parsed structure."
            }
        }
    }
}

impl fmt::Display for DeprecationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::IdRemoved => write!(f, "id_removed"),
            Self::StructureUpdated => write!(f, "structure_updated"),
            Self::IncorrectFormula => write!(f, "incorrect_formula"),
        }
    }
}

pub type ReasonSet = BTreeSet<DeprecationReason>;

/// One ledger line produced by a reconciliation round.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Deprecation {
    pub source: SourceKey,
    pub reason: DeprecationReason,
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// One structure as imported from one database at one round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRecord {
    pub database: String,
    pub round: Round,
    pub external_id: ExternalId,
    pub structure: Structure,
    #[serde(default)]
    pub extras: Extras,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub deprecation_reasons: ReasonSet,
}

impl SourceRecord {
    pub fn key(&self) -> SourceKey {
        SourceKey::new(self.database.clone(), self.round.clone(), self.external_id.clone())
    }

    pub fn is_curated(&self) -> bool {
        self.extras.curated
    }

    pub fn is_deprecated(&self) -> bool {
        !self.deprecation_reasons.is_empty()
    }
}

/// The authoritative record for an ID in a round's final set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalEntry {
    pub external_id: ExternalId,
    pub database: String,
    /// Round whose record was selected. May lag the generation's round.
    pub chosen_round: Round,
    pub structure: Structure,
    #[serde(default)]
    pub extras: Extras,
}

impl CanonicalEntry {
    pub fn from_record(record: &SourceRecord) -> Self {
        Self {
            external_id: record.external_id.clone(),
            database: record.database.clone(),
            chosen_round: record.round.clone(),
            structure: record.structure.clone(),
            extras: record.extras.clone(),
        }
    }

    pub fn source_key(&self) -> SourceKey {
        SourceKey::new(
            self.database.clone(),
            self.chosen_round.clone(),
            self.external_id.clone(),
        )
    }
}

// ---------------------------------------------------------------------------
// Generations + import rounds
// ---------------------------------------------------------------------------

/// The final set of one round. Built once, never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Generation {
    pub round: Round,
    entries: BTreeMap<ExternalId, CanonicalEntry>,
}

impl Generation {
    pub fn new(round: Round, entries: BTreeMap<ExternalId, CanonicalEntry>) -> Self {
        Self { round, entries }
    }

    pub fn empty(round: Round) -> Self {
        Self::new(round, BTreeMap::new())
    }

    pub fn get(&self, id: &ExternalId) -> Option<&CanonicalEntry> {
        self.entries.get(id)
    }

    pub fn contains(&self, id: &ExternalId) -> bool {
        self.entries.contains_key(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &ExternalId> {
        self.entries.keys()
    }

    pub fn entries(&self) -> impl Iterator<Item = &CanonicalEntry> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Everything the raw import of a round contained, curated or not.
///
/// `None` marks a raw ID whose cleaning never completed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportRound {
    pub round: Round,
    pub database: String,
    pub entries: BTreeMap<ExternalId, Option<SourceRecord>>,
}

impl ImportRound {
    pub fn new(round: Round, database: impl Into<String>) -> Self {
        Self {
            round,
            database: database.into(),
            entries: BTreeMap::new(),
        }
    }

    /// Raw presence, regardless of curation status.
    pub fn contains(&self, id: &ExternalId) -> bool {
        self.entries.contains_key(id)
    }

    pub fn record(&self, id: &ExternalId) -> Option<&SourceRecord> {
        self.entries.get(id).and_then(|r| r.as_ref())
    }

    /// The record for `id` if it passed curation.
    pub fn curated(&self, id: &ExternalId) -> Option<&SourceRecord> {
        self.record(id).filter(|r| r.is_curated())
    }

    pub fn curated_records(&self) -> impl Iterator<Item = &SourceRecord> {
        self.entries.values().flatten().filter(|r| r.is_curated())
    }

    pub fn ids(&self) -> impl Iterator<Item = &ExternalId> {
        self.entries.keys()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Per-ID decisions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateDecision {
    /// First time this ID made it into a final set.
    New,
    /// Oracle said similar; the previous entry was kept.
    KeptPrevious,
    /// Oracle said different; the new record replaced the previous one.
    Updated,
    /// Present upstream but not curated this round; previous entry kept.
    CarriedForward,
    /// Gone upstream; dropped from the final set.
    Removed,
    /// The oracle failed; no decision was made.
    Failed,
}

impl fmt::Display for UpdateDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::New => write!(f, "new"),
            Self::KeptPrevious => write!(f, "kept_previous"),
            Self::Updated => write!(f, "updated"),
            Self::CarriedForward => write!(f, "carried_forward"),
            Self::Removed => write!(f, "removed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdDecision {
    pub external_id: ExternalId,
    pub decision: UpdateDecision,
    /// Round of the entry that ended up in the final set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chosen_round: Option<Round>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdFailure {
    pub external_id: ExternalId,
    pub message: String,
}

// ---------------------------------------------------------------------------
// Summary + Output
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateSummary {
    pub total_ids: usize,
    pub final_entries: usize,
    pub new: usize,
    pub kept_previous: usize,
    pub updated: usize,
    pub carried_forward: usize,
    pub removed: usize,
    pub incorrect_formula: usize,
    pub failed: usize,
    /// Entries a previous, interrupted run had already written.
    #[serde(default)]
    pub already_applied: usize,
    pub decision_counts: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundMeta {
    pub config_name: String,
    pub database: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_round: Option<Round>,
    pub round: Round,
    pub engine_version: String,
    pub run_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RoundResult {
    pub meta: RoundMeta,
    pub summary: UpdateSummary,
    pub decisions: Vec<IdDecision>,
    pub deprecations: Vec<Deprecation>,
    pub failures: Vec<IdFailure>,
    #[serde(skip)]
    pub next_final: Option<Generation>,
}

impl RoundResult {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn source_key_roundtrips_through_string() {
        let key: SourceKey = "cod|v2|1000041".parse().unwrap();
        assert_eq!(key.database, "cod");
        assert_eq!(key.round, Round::from("v2"));
        assert_eq!(key.external_id, ExternalId::from("1000041"));
        assert_eq!(key.to_string(), "cod|v2|1000041");
    }

    #[test]
    fn source_key_rejects_bad_shapes() {
        assert!("cod|v2".parse::<SourceKey>().is_err());
        assert!("cod||1".parse::<SourceKey>().is_err());
        assert!("cod|v2|".parse::<SourceKey>().is_err());
    }

    #[test]
    fn source_key_id_may_contain_pipes() {
        let key = SourceKey::new("cod", Round::from("v1"), ExternalId::from("a|b"));
        assert_eq!(key.to_string(), "cod|v1|a|b");
        let back: SourceKey = key.to_string().parse().unwrap();
        assert_eq!(back, key);
        assert_eq!(back.external_id.as_str(), "a|b");
    }

    #[test]
    fn source_key_as_json_map_key() {
        let mut map = BTreeMap::new();
        map.insert(SourceKey::from_str("icsd|2023|55").unwrap(), 1);
        let s = serde_json::to_string(&map).unwrap();
        assert_eq!(s, r#"{"icsd|2023|55":1}"#);
        let back: BTreeMap<SourceKey, i32> = serde_json::from_str(&s).unwrap();
        assert_eq!(back, map);
    }

    #[test]
    fn reasons_serialize_snake_case() {
        let v = serde_json::to_value(DeprecationReason::StructureUpdated).unwrap();
        assert_eq!(v, json!("structure_updated"));
        assert_eq!(DeprecationReason::IdRemoved.to_string(), "id_removed");
    }

    #[test]
    fn extras_keep_unknown_keys() {
        let extras: Extras = serde_json::from_value(json!({
            "curated": true,
            "chemical_system": "-Cl-Mg-",
        }))
        .unwrap();
        assert!(extras.curated);
        assert_eq!(extras.other["chemical_system"], json!("-Cl-Mg-"));
        let back = serde_json::to_value(&extras).unwrap();
        assert_eq!(back["chemical_system"], json!("-Cl-Mg-"));
    }

    #[test]
    fn extras_merge_is_additive() {
        let extras = Extras {
            cif_spacegroup_number: Some(225),
            ..Default::default()
        };
        let mut update = BTreeMap::new();
        update.insert("duplicates".to_string(), json!(["cod|v1|2"]));
        update.insert("partial_occupancies".to_string(), json!(false));
        let merged = extras.merged(&update).unwrap();
        assert_eq!(merged.cif_spacegroup_number, Some(225));
        assert_eq!(merged.partial_occupancies, Some(false));
        assert_eq!(merged.other["duplicates"], json!(["cod|v1|2"]));
    }

    #[test]
    fn extras_merge_keeps_curated_derived() {
        let extras = Extras {
            partial_occupancies: Some(false),
            incorrect_formula: true,
            ..Default::default()
        };
        let mut update = BTreeMap::new();
        update.insert("curated".to_string(), json!(true));
        assert!(matches!(
            extras.merged(&update),
            Err(ReconError::DerivedExtra(key)) if key == "curated"
        ));

        let mut update = BTreeMap::new();
        update.insert("incorrect_formula".to_string(), json!(false));
        assert!(extras.merged(&update).unwrap().curated);

        let mut update = BTreeMap::new();
        update.insert("partial_occupancies".to_string(), json!(true));
        let flagged = Extras {
            incorrect_formula: false,
            ..extras
        }
        .merged(&update)
        .unwrap();
        assert!(!flagged.curated);
    }

    #[test]
    fn extras_merge_rejects_wrong_type() {
        let mut update = BTreeMap::new();
        update.insert("cif_spacegroup_number".to_string(), json!("not a number"));
        assert!(Extras::default().merged(&update).is_err());
    }
}
