//! Structure families: groups of source records believed to be the same
//! physical structure, across databases and rounds.
//!
//! Family status is always computed from member deprecation reasons; nothing
//! about it is stored.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::GroupingConfig;
use crate::deprecation::{DeprecationLedger, GroupStatus};
use crate::error::GroupError;
use crate::model::{CanonicalEntry, ReasonSet, SourceKey, Structure};
use crate::oracle::SimilarityOracle;

/// Databases in golden-source order, most preferred first.
pub const GOLDEN_PRIORITY: [&str; 3] = ["mpds", "icsd", "cod"];

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupId(String);

impl GroupId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Family map
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FamilyMap {
    families: BTreeMap<GroupId, BTreeSet<SourceKey>>,
}

impl FamilyMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, group: GroupId, members: BTreeSet<SourceKey>) {
        self.families.insert(group, members);
    }

    pub fn members(&self, group: &GroupId) -> Option<&BTreeSet<SourceKey>> {
        self.families.get(group)
    }

    pub fn group_of(&self, key: &SourceKey) -> Option<&GroupId> {
        self.families
            .iter()
            .find(|(_, members)| members.contains(key))
            .map(|(id, _)| id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&GroupId, &BTreeSet<SourceKey>)> {
        self.families.iter()
    }

    pub fn len(&self) -> usize {
        self.families.len()
    }

    pub fn is_empty(&self) -> bool {
        self.families.is_empty()
    }

    /// `None` if the group is unknown.
    pub fn status(&self, ledger: &DeprecationLedger, group: &GroupId) -> Option<GroupStatus> {
        self.members(group).map(|m| ledger.group_status(m))
    }

    pub fn report(&self, ledger: &DeprecationLedger) -> FamilyReport {
        let mut report = FamilyReport::default();
        for (group_id, members) in &self.families {
            let status = family_status(ledger, group_id, members);
            match status.status {
                GroupStatus::Active => report.active += 1,
                GroupStatus::Warned => report.warned += 1,
                GroupStatus::Deprecated => report.deprecated += 1,
            }
            report.families.push(status);
        }
        report
    }
}

// ---------------------------------------------------------------------------
// Status rollup
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FamilyStatus {
    pub group_id: GroupId,
    pub status: GroupStatus,
    pub members: usize,
    pub deprecated_members: BTreeMap<SourceKey, ReasonSet>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub golden: Option<SourceKey>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FamilyReport {
    pub active: usize,
    pub warned: usize,
    pub deprecated: usize,
    pub families: Vec<FamilyStatus>,
}

pub fn family_status(
    ledger: &DeprecationLedger,
    group_id: &GroupId,
    members: &BTreeSet<SourceKey>,
) -> FamilyStatus {
    let deprecated_members: BTreeMap<SourceKey, ReasonSet> = members
        .iter()
        .filter_map(|k| ledger.reasons(k).map(|r| (k.clone(), r.clone())))
        .collect();
    FamilyStatus {
        group_id: group_id.clone(),
        status: GroupStatus::from_counts(deprecated_members.len(), members.len()),
        members: members.len(),
        deprecated_members,
        golden: select_golden(members, ledger),
    }
}

/// Preferred non-deprecated member: `mpds`, then `icsd`, then `cod`, then
/// anything else. Ties go to the first member in key order.
pub fn select_golden<'a, I>(members: I, ledger: &DeprecationLedger) -> Option<SourceKey>
where
    I: IntoIterator<Item = &'a SourceKey>,
{
    members
        .into_iter()
        .filter(|k| !ledger.is_deprecated(k))
        .min_by_key(|k| {
            GOLDEN_PRIORITY
                .iter()
                .position(|db| *db == k.database)
                .unwrap_or(GOLDEN_PRIORITY.len())
        })
        .cloned()
}

// ---------------------------------------------------------------------------
// Grouping
// ---------------------------------------------------------------------------

pub trait FamilyGrouper {
    fn group(&self, entries: &[CanonicalEntry]) -> Result<FamilyMap, GroupError>;
}

/// Buckets entries by formula (and spacegroup, if enabled), then within a
/// bucket assigns each entry to the first family whose reference structure
/// it matches. The reference is the first member of the family.
///
/// Entries flagged `incorrect_formula` are left out.
pub struct FirstReferenceGrouper<'o, O: SimilarityOracle + ?Sized> {
    oracle: &'o O,
    sort_by_spacegroup: bool,
    id_prefix: String,
}

impl<'o, O: SimilarityOracle + ?Sized> FirstReferenceGrouper<'o, O> {
    pub fn new(oracle: &'o O, config: &GroupingConfig) -> Self {
        Self {
            oracle,
            sort_by_spacegroup: config.sort_by_spacegroup,
            id_prefix: config.id_prefix.clone(),
        }
    }

    fn bucket_key(&self, entry: &CanonicalEntry) -> String {
        let formula = &entry.structure.formula;
        if !self.sort_by_spacegroup {
            return formula.clone();
        }
        match entry.extras.cif_spacegroup_number {
            Some(n) => format!("{formula}|{n}"),
            None => format!("{formula}|unknown"),
        }
    }
}

impl<O: SimilarityOracle + ?Sized> FamilyGrouper for FirstReferenceGrouper<'_, O> {
    fn group(&self, entries: &[CanonicalEntry]) -> Result<FamilyMap, GroupError> {
        let mut buckets: BTreeMap<String, Vec<&CanonicalEntry>> = BTreeMap::new();
        for entry in entries.iter().filter(|e| !e.extras.incorrect_formula) {
            buckets.entry(self.bucket_key(entry)).or_default().push(entry);
        }

        let mut map = FamilyMap::new();
        let mut counter = 0usize;
        for (bucket, mut members) in buckets {
            members.sort_by_key(|e| e.source_key());

            // (reference key, reference structure, members)
            let mut families: Vec<(SourceKey, &Structure, BTreeSet<SourceKey>)> = Vec::new();
            'entries: for entry in members {
                let key = entry.source_key();
                for (ref_key, reference, family) in families.iter_mut() {
                    let similar = self
                        .oracle
                        .similar(*reference, &entry.structure)
                        .map_err(|source| GroupError::Oracle {
                            left: ref_key.clone(),
                            right: key.clone(),
                            source,
                        })?;
                    if similar {
                        family.insert(key);
                        continue 'entries;
                    }
                }
                families.push((key.clone(), &entry.structure, BTreeSet::from([key])));
            }

            debug!(bucket = %bucket, families = families.len(), "grouped bucket");
            for (_, _, family) in families {
                counter += 1;
                map.insert(GroupId::new(format!("{}-{counter:05}", self.id_prefix)), family);
            }
        }
        Ok(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::OracleError;
    use crate::model::{DeprecationReason, ExternalId, Lattice, Round};

    struct FormulaOracle;

    impl SimilarityOracle for FormulaOracle {
        fn similar(&self, a: &Structure, b: &Structure) -> Result<bool, OracleError> {
            if a.lattice.a <= 0.0 || b.lattice.a <= 0.0 {
                return Err(OracleError::Malformed("zero cell".into()));
            }
            Ok((a.lattice.a - b.lattice.a).abs() < 0.5)
        }
    }

    fn key(s: &str) -> SourceKey {
        s.parse().unwrap()
    }

    fn entry(db: &str, id: &str, formula: &str, a: f64, spg: Option<u32>) -> CanonicalEntry {
        let mut e = CanonicalEntry {
            external_id: ExternalId::from(id),
            database: db.into(),
            chosen_round: Round::from("v1"),
            structure: Structure {
                formula: formula.into(),
                lattice: Lattice {
                    a,
                    b: a,
                    c: a,
                    alpha: 90.0,
                    beta: 90.0,
                    gamma: 90.0,
                },
                sites: vec![],
            },
            extras: Default::default(),
        };
        e.extras.cif_spacegroup_number = spg;
        e
    }

    #[test]
    fn golden_prefers_mpds_then_icsd_then_cod() {
        let ledger = DeprecationLedger::new();
        let members = [key("cod|v1|1"), key("icsd|2023|5"), key("mpds|1|9")];
        assert_eq!(select_golden(&members, &ledger), Some(key("mpds|1|9")));
        assert_eq!(select_golden(&members[..2], &ledger), Some(key("icsd|2023|5")));
        assert_eq!(select_golden(&members[..1], &ledger), Some(key("cod|v1|1")));
    }

    #[test]
    fn golden_skips_deprecated_members() {
        let mut ledger = DeprecationLedger::new();
        ledger.add_reason(key("mpds|1|9"), DeprecationReason::IdRemoved);
        let members = [key("cod|v1|1"), key("mpds|1|9")];
        assert_eq!(select_golden(&members, &ledger), Some(key("cod|v1|1")));
        ledger.add_reason(key("cod|v1|1"), DeprecationReason::IdRemoved);
        assert_eq!(select_golden(&members, &ledger), None);
    }

    #[test]
    fn unknown_database_ranks_last() {
        let ledger = DeprecationLedger::new();
        let members = [key("aaa|1|1"), key("cod|v1|1")];
        assert_eq!(select_golden(&members, &ledger), Some(key("cod|v1|1")));
    }

    #[test]
    fn status_tracks_member_reasons() {
        let mut map = FamilyMap::new();
        let group = GroupId::new("mc3d-00001");
        map.insert(group.clone(), BTreeSet::from([key("cod|v1|1"), key("icsd|2023|5")]));

        let mut ledger = DeprecationLedger::new();
        assert_eq!(map.status(&ledger, &group), Some(GroupStatus::Active));
        ledger.add_reason(key("cod|v1|1"), DeprecationReason::StructureUpdated);
        assert_eq!(map.status(&ledger, &group), Some(GroupStatus::Warned));
        ledger.add_reason(key("icsd|2023|5"), DeprecationReason::IdRemoved);
        assert_eq!(map.status(&ledger, &group), Some(GroupStatus::Deprecated));

        let report = map.report(&ledger);
        assert_eq!(report.deprecated, 1);
        assert_eq!(report.families[0].deprecated_members.len(), 2);
        assert_eq!(report.families[0].golden, None);
        assert_eq!(map.status(&ledger, &GroupId::new("nope")), None);
    }

    #[test]
    fn groups_by_bucket_and_first_reference() {
        let config = GroupingConfig::default();
        let grouper = FirstReferenceGrouper::new(&FormulaOracle, &config);
        let entries = vec![
            entry("cod", "1", "NaCl", 5.6, Some(225)),
            entry("icsd", "2", "NaCl", 5.7, Some(225)),
            entry("cod", "3", "NaCl", 7.0, Some(225)),
            entry("cod", "4", "NaCl", 5.6, Some(221)),
            entry("cod", "5", "KCl", 6.3, Some(225)),
        ];
        let map = grouper.group(&entries).unwrap();
        assert_eq!(map.len(), 4);
        let g = map.group_of(&key("cod|v1|1")).unwrap();
        assert_eq!(map.group_of(&key("icsd|v1|2")), Some(g));
        assert_ne!(map.group_of(&key("cod|v1|3")), Some(g));
        assert_ne!(map.group_of(&key("cod|v1|4")), Some(g));
        assert!(map.iter().all(|(id, _)| id.as_str().starts_with("mc3d-")));
    }

    #[test]
    fn spacegroup_bucketing_can_be_disabled() {
        let config = GroupingConfig {
            sort_by_spacegroup: false,
            id_prefix: "fam".into(),
        };
        let grouper = FirstReferenceGrouper::new(&FormulaOracle, &config);
        let entries = vec![
            entry("cod", "1", "NaCl", 5.6, Some(225)),
            entry("cod", "4", "NaCl", 5.6, Some(221)),
        ];
        let map = grouper.group(&entries).unwrap();
        assert_eq!(map.len(), 1);
        assert!(map.members(&GroupId::new("fam-00001")).is_some());
    }

    #[test]
    fn incorrect_formula_entries_are_excluded() {
        let config = GroupingConfig::default();
        let grouper = FirstReferenceGrouper::new(&FormulaOracle, &config);
        let mut bad = entry("cod", "1", "NaCl", 5.6, Some(225));
        bad.extras.incorrect_formula = true;
        let map = grouper.group(&[bad]).unwrap();
        assert!(map.is_empty());
    }

    #[test]
    fn oracle_failure_names_both_records() {
        let config = GroupingConfig::default();
        let grouper = FirstReferenceGrouper::new(&FormulaOracle, &config);
        let entries = vec![
            entry("cod", "1", "NaCl", 5.6, Some(225)),
            entry("cod", "2", "NaCl", 0.0, Some(225)),
        ];
        let GroupError::Oracle { left, right, .. } = grouper.group(&entries).unwrap_err();
        assert_eq!(left, key("cod|v1|1"));
        assert_eq!(right, key("cod|v1|2"));
    }
}
