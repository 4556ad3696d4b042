//! Update reconciliation: merge a new import round into the previous final
//! generation.
//!
//! Per external ID:
//! - new curated record, no previous entry → `New`
//! - both present, oracle says similar → `KeptPrevious` (old entry kept)
//! - both present, oracle says different → `Updated`, previous record gets
//!   `structure_updated`
//! - previous only, ID gone upstream → `Removed`, previous record gets
//!   `id_removed`
//! - previous only, ID still upstream but not curated → `CarriedForward`
//!
//! A new record flagged `incorrect_formula` counts as not curated; if the ID
//! had a previous entry, the new record gets `incorrect_formula`.
//!
//! Each ID is decided on its own, so the output does not depend on iteration
//! order. An oracle failure only affects its own ID.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, warn};

use crate::error::{OracleError, ReconError};
use crate::model::{
    CanonicalEntry, Deprecation, DeprecationReason, ExternalId, Generation, IdDecision, IdFailure,
    ImportRound, UpdateDecision,
};
use crate::oracle::{SimilarityCache, SimilarityOracle};

/// Result of reconciling one round, before anything is persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct RoundOutcome {
    pub next_final: Generation,
    pub decisions: Vec<IdDecision>,
    /// Sorted and deduplicated.
    pub deprecations: Vec<Deprecation>,
    pub failures: Vec<IdFailure>,
}

struct IdOutcome {
    decision: UpdateDecision,
    entry: Option<CanonicalEntry>,
    deprecations: Vec<Deprecation>,
}

pub struct Reconciler<'o, O: SimilarityOracle + ?Sized> {
    oracle: &'o O,
    cache: SimilarityCache,
}

impl<'o, O: SimilarityOracle + ?Sized> Reconciler<'o, O> {
    pub fn new(oracle: &'o O) -> Self {
        Self {
            oracle,
            cache: SimilarityCache::new(),
        }
    }

    pub fn cache(&self) -> &SimilarityCache {
        &self.cache
    }

    pub fn reconcile(&mut self, previous: &Generation, import: &ImportRound) -> RoundOutcome {
        let ids: BTreeSet<&ExternalId> = previous.ids().chain(import.ids()).collect();

        let mut entries = BTreeMap::new();
        let mut decisions = Vec::new();
        let mut deprecations = BTreeSet::new();
        let mut failures = Vec::new();

        for id in ids {
            match self.decide(id, previous, import) {
                Ok(None) => {}
                Ok(Some(outcome)) => {
                    debug!(id = %id, decision = %outcome.decision, "reconciled");
                    if outcome.decision == UpdateDecision::CarriedForward {
                        warn!(
                            id = %id,
                            round = %import.round,
                            "not curated this round, keeping previous entry"
                        );
                    }
                    decisions.push(IdDecision {
                        external_id: id.clone(),
                        decision: outcome.decision,
                        chosen_round: outcome.entry.as_ref().map(|e| e.chosen_round.clone()),
                    });
                    if let Some(entry) = outcome.entry {
                        entries.insert(id.clone(), entry);
                    }
                    deprecations.extend(outcome.deprecations);
                }
                Err(e) => {
                    warn!(id = %id, error = %e, "similarity check failed");
                    decisions.push(IdDecision {
                        external_id: id.clone(),
                        decision: UpdateDecision::Failed,
                        chosen_round: None,
                    });
                    let err = ReconError::Oracle {
                        id: id.clone(),
                        source: e,
                    };
                    failures.push(IdFailure {
                        external_id: id.clone(),
                        message: err.to_string(),
                    });
                }
            }
        }

        RoundOutcome {
            next_final: Generation::new(import.round.clone(), entries),
            decisions,
            deprecations: deprecations.into_iter().collect(),
            failures,
        }
    }

    fn decide(
        &mut self,
        id: &ExternalId,
        previous: &Generation,
        import: &ImportRound,
    ) -> Result<Option<IdOutcome>, OracleError> {
        let old = previous.get(id);
        let mut deprecations = Vec::new();

        if let (Some(record), Some(_)) = (import.record(id), old) {
            if record.extras.incorrect_formula {
                deprecations.push(Deprecation {
                    source: record.key(),
                    reason: DeprecationReason::IncorrectFormula,
                });
            }
        }

        let candidate = import.curated(id).filter(|r| !r.extras.incorrect_formula);

        let (decision, entry) = match (old, candidate) {
            (None, None) => return Ok(None),
            (None, Some(new)) => (UpdateDecision::New, CanonicalEntry::from_record(new)),
            (Some(old), Some(new)) => {
                if self.cache.check(self.oracle, old, new)? {
                    (UpdateDecision::KeptPrevious, old.clone())
                } else {
                    deprecations.push(Deprecation {
                        source: old.source_key(),
                        reason: DeprecationReason::StructureUpdated,
                    });
                    (UpdateDecision::Updated, CanonicalEntry::from_record(new))
                }
            }
            (Some(old), None) => {
                if import.contains(id) {
                    (UpdateDecision::CarriedForward, old.clone())
                } else {
                    deprecations.push(Deprecation {
                        source: old.source_key(),
                        reason: DeprecationReason::IdRemoved,
                    });
                    return Ok(Some(IdOutcome {
                        decision: UpdateDecision::Removed,
                        entry: None,
                        deprecations,
                    }));
                }
            }
        };

        Ok(Some(IdOutcome {
            decision,
            entry: Some(entry),
            deprecations,
        }))
    }
}

/// One-shot convenience wrapper around [`Reconciler`].
pub fn reconcile<O: SimilarityOracle + ?Sized>(
    oracle: &O,
    previous: &Generation,
    import: &ImportRound,
) -> RoundOutcome {
    Reconciler::new(oracle).reconcile(previous, import)
}
