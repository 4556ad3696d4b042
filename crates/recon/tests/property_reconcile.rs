// Property-based tests for round reconciliation.
// CI: 256 cases (default). Soak: PROPTEST_CASES=10000 cargo test --release

use std::collections::{BTreeMap, BTreeSet};

use mc3d_recon::deprecation::{DeprecationLedger, GroupStatus};
use mc3d_recon::model::{
    CanonicalEntry, DeprecationReason, ExternalId, Generation, ImportRound, Lattice, Round,
    SourceKey, SourceRecord, Structure, UpdateDecision,
};
use mc3d_recon::{reconcile, OracleError, SimilarityOracle};
use proptest::prelude::*;

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

fn config_256() -> ProptestConfig {
    ProptestConfig {
        cases: std::env::var("PROPTEST_CASES")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(256),
        failure_persistence: None,
        ..ProptestConfig::default()
    }
}

// ---------------------------------------------------------------------------
// Oracle
// ---------------------------------------------------------------------------

/// Similar iff formulas match; formula `X` makes the oracle fail.
struct FormulaOracle;

impl SimilarityOracle for FormulaOracle {
    fn similar(&self, a: &Structure, b: &Structure) -> Result<bool, OracleError> {
        if a.formula == "X" || b.formula == "X" {
            return Err(OracleError::Unavailable("X".into()));
        }
        Ok(a.formula == b.formula)
    }
}

// ---------------------------------------------------------------------------
// Generators
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum Raw {
    /// Present upstream, cleaning did not finish.
    Uncleaned,
    Curated(String),
    Partial(String),
    WrongFormula(String),
}

fn arb_formula() -> impl Strategy<Value = String> {
    prop_oneof![
        4 => Just("A".to_string()),
        4 => Just("B".to_string()),
        1 => Just("X".to_string()),
    ]
}

fn arb_raw() -> impl Strategy<Value = Raw> {
    prop_oneof![
        1 => Just(Raw::Uncleaned),
        4 => arb_formula().prop_map(Raw::Curated),
        1 => arb_formula().prop_map(Raw::Partial),
        1 => arb_formula().prop_map(Raw::WrongFormula),
    ]
}

fn arb_previous() -> impl Strategy<Value = BTreeMap<u8, String>> {
    proptest::collection::btree_map(0u8..16, arb_formula(), 0..12)
}

fn arb_import() -> impl Strategy<Value = BTreeMap<u8, Raw>> {
    proptest::collection::btree_map(0u8..16, arb_raw(), 0..12)
}

fn structure(formula: &str) -> Structure {
    Structure {
        formula: formula.to_string(),
        lattice: Lattice {
            a: 4.0,
            b: 4.0,
            c: 4.0,
            alpha: 90.0,
            beta: 90.0,
            gamma: 90.0,
        },
        sites: vec![],
    }
}

fn record(round: &str, id: u8, formula: &str) -> SourceRecord {
    let mut r = SourceRecord {
        database: "cod".into(),
        round: Round::from(round),
        external_id: ExternalId::new(id.to_string()),
        structure: structure(formula),
        extras: Default::default(),
        deprecation_reasons: Default::default(),
    };
    r.extras.partial_occupancies = Some(false);
    r.extras.curated = true;
    r
}

fn build_previous(round: &str, layout: &BTreeMap<u8, String>) -> Generation {
    let entries = layout
        .iter()
        .map(|(id, formula)| {
            let entry = CanonicalEntry::from_record(&record(round, *id, formula));
            (entry.external_id.clone(), entry)
        })
        .collect();
    Generation::new(Round::from(round), entries)
}

fn build_import(round: &str, layout: &BTreeMap<u8, Raw>) -> ImportRound {
    let mut import = ImportRound::new(Round::from(round), "cod");
    for (id, raw) in layout {
        let entry = match raw {
            Raw::Uncleaned => None,
            Raw::Curated(f) => Some(record(round, *id, f)),
            Raw::Partial(f) => {
                let mut r = record(round, *id, f);
                r.extras.partial_occupancies = Some(true);
                r.extras.curated = false;
                Some(r)
            }
            Raw::WrongFormula(f) => {
                let mut r = record(round, *id, f);
                r.extras.incorrect_formula = true;
                r.extras.curated = false;
                Some(r)
            }
        };
        import.entries.insert(ExternalId::new(id.to_string()), entry);
    }
    import
}

fn eligible(raw: &Raw) -> bool {
    matches!(raw, Raw::Curated(_))
}

// ===========================================================================
// Properties
// ===========================================================================

// Same inputs, same outputs, regardless of how often they are run.
proptest! {
    #![proptest_config(config_256())]
    #[test]
    fn idempotence(prev in arb_previous(), new in arb_import()) {
        let previous = build_previous("v1", &prev);
        let import = build_import("v2", &new);

        let first = reconcile(&FormulaOracle, &previous, &import);
        let second = reconcile(&FormulaOracle, &previous, &import);
        prop_assert_eq!(&first, &second);

        let mut once = DeprecationLedger::new();
        once.extend(&first.deprecations);
        let mut twice = once.clone();
        prop_assert_eq!(twice.extend(&second.deprecations), 0);
        prop_assert_eq!(once, twice);
    }
}

// Final membership: kept if still upstream with history, or newly eligible.
proptest! {
    #![proptest_config(config_256())]
    #[test]
    fn conservation(prev in arb_previous(), new in arb_import()) {
        let previous = build_previous("v1", &prev);
        let import = build_import("v2", &new);
        let out = reconcile(&FormulaOracle, &previous, &import);

        let failed: BTreeSet<ExternalId> =
            out.failures.iter().map(|f| f.external_id.clone()).collect();

        for id in 0u8..16 {
            let ext = ExternalId::new(id.to_string());
            if failed.contains(&ext) {
                prop_assert!(!out.next_final.contains(&ext));
                continue;
            }
            let expected = match (prev.contains_key(&id), new.get(&id)) {
                (true, Some(_)) => true,
                (false, Some(raw)) => eligible(raw),
                (_, None) => false,
            };
            prop_assert_eq!(out.next_final.contains(&ext), expected, "id {}", id);
        }
    }
}

// Every previous ID is still final, deprecated as removed, or failed.
proptest! {
    #![proptest_config(config_256())]
    #[test]
    fn no_silent_loss(prev in arb_previous(), new in arb_import()) {
        let previous = build_previous("v1", &prev);
        let import = build_import("v2", &new);
        let out = reconcile(&FormulaOracle, &previous, &import);

        for entry in previous.entries() {
            let id = &entry.external_id;
            let kept = out.next_final.contains(id);
            let removed = out.deprecations.iter().any(|d| {
                d.source == entry.source_key() && d.reason == DeprecationReason::IdRemoved
            });
            let failed = out.failures.iter().any(|f| &f.external_id == id);
            prop_assert_eq!(
                [kept, removed, failed].iter().filter(|b| **b).count(),
                1,
                "id {} kept={} removed={} failed={}", id, kept, removed, failed
            );
        }
    }
}

// A failed ID never leaves a decision other than `failed`, and no reasons.
proptest! {
    #![proptest_config(config_256())]
    #[test]
    fn failures_are_isolated(prev in arb_previous(), new in arb_import()) {
        let previous = build_previous("v1", &prev);
        let import = build_import("v2", &new);
        let out = reconcile(&FormulaOracle, &previous, &import);

        for failure in &out.failures {
            let decisions: Vec<UpdateDecision> = out
                .decisions
                .iter()
                .filter(|d| d.external_id == failure.external_id)
                .map(|d| d.decision)
                .collect();
            prop_assert_eq!(decisions, vec![UpdateDecision::Failed]);
            prop_assert!(!out
                .deprecations
                .iter()
                .any(|d| d.source.external_id == failure.external_id
                    && d.reason != DeprecationReason::IncorrectFormula));
        }
    }
}

// Reasons only accumulate over successive rounds.
proptest! {
    #![proptest_config(config_256())]
    #[test]
    fn monotonic_deprecation(
        prev in arb_previous(),
        rounds in proptest::collection::vec(arb_import(), 1..4),
    ) {
        let mut ledger = DeprecationLedger::new();
        let mut generation = build_previous("r0", &prev);

        for (i, layout) in rounds.iter().enumerate() {
            let import = build_import(&format!("r{}", i + 1), layout);
            let out = reconcile(&FormulaOracle, &generation, &import);

            let before = ledger.clone();
            ledger.extend(&out.deprecations);
            for (key, reasons) in before.iter() {
                let now = ledger.reasons(key).cloned().unwrap_or_default();
                prop_assert!(reasons.is_subset(&now), "{} lost reasons", key);
            }
            generation = out.next_final;
        }
    }
}

// Group status matches a direct count over members.
proptest! {
    #![proptest_config(config_256())]
    #[test]
    fn rollup_correctness(
        members in proptest::collection::btree_set(0u8..20, 0..8),
        deprecated in proptest::collection::btree_set(0u8..20, 0..8),
    ) {
        let key = |i: &u8| SourceKey::new("cod", Round::from("v1"), ExternalId::new(i.to_string()));
        let mut ledger = DeprecationLedger::new();
        for i in &deprecated {
            ledger.add_reason(key(i), DeprecationReason::IdRemoved);
        }
        let keys: Vec<SourceKey> = members.iter().map(key).collect();
        let hits = members.intersection(&deprecated).count();

        let expected = if hits == 0 {
            GroupStatus::Active
        } else if hits == members.len() {
            GroupStatus::Deprecated
        } else {
            GroupStatus::Warned
        };
        prop_assert_eq!(ledger.group_status(&keys), expected);
    }
}
