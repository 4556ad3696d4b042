use tracing::{info, warn};

use crate::config::ReconConfig;
use crate::error::ReconError;
use crate::model::{Generation, Round, RoundMeta, RoundResult};
use crate::oracle::SimilarityOracle;
use crate::reconcile::Reconciler;
use crate::store::RecordStore;
use crate::summary::compute_summary;

/// Reconcile `round` against the final set of `previous` and persist the
/// result. Without `previous` every curated record of the round is new.
///
/// Entries already written by an earlier run are left alone; reasons are a
/// set-union, so a rerun with the same inputs is safe. The round is marked
/// committed only when every ID was decided, and `previous` must be
/// committed before anything is built on it.
pub fn run_round<S, O>(
    config: &ReconConfig,
    store: &mut S,
    reconciler: &mut Reconciler<'_, O>,
    previous: Option<&Round>,
    round: &Round,
) -> Result<RoundResult, ReconError>
where
    S: RecordStore + ?Sized,
    O: SimilarityOracle + ?Sized,
{
    let import = store
        .import_round(round)?
        .ok_or_else(|| ReconError::MissingRound(round.clone()))?;
    if import.database != config.database {
        return Err(ReconError::Conflict(format!(
            "round '{round}' holds '{}' records, config is for '{}'",
            import.database, config.database
        )));
    }

    let previous_final = match previous {
        Some(prev) => {
            // A partial final set would hide IDs whose decision failed.
            if !store.is_committed(prev)? {
                if store.rounds()?.contains(prev) {
                    return Err(ReconError::UncommittedRound(prev.clone()));
                }
                return Err(ReconError::MissingRound(prev.clone()));
            }
            store
                .final_generation(prev)?
                .ok_or_else(|| ReconError::MissingRound(prev.clone()))?
        }
        None => Generation::empty(round.clone()),
    };

    let outcome = reconciler.reconcile(&previous_final, &import);

    let mut already_applied = 0;
    for entry in outcome.next_final.entries() {
        if store.final_entry(round, &entry.external_id)?.as_ref() == Some(entry) {
            already_applied += 1;
            continue;
        }
        store.put_final(round, entry)?;
    }
    store.add_reasons(&outcome.deprecations)?;

    let summary = compute_summary(&outcome, already_applied);
    if outcome.failures.is_empty() {
        store.mark_committed(round, &summary)?;
    } else {
        warn!(
            round = %round,
            failed = outcome.failures.len(),
            "round not committed, rerun to retry failed IDs"
        );
    }

    info!(
        round = %round,
        previous = previous.map(Round::as_str).unwrap_or("-"),
        final_entries = summary.final_entries,
        new = summary.new,
        updated = summary.updated,
        removed = summary.removed,
        failed = summary.failed,
        "round reconciled"
    );

    Ok(RoundResult {
        meta: RoundMeta {
            config_name: config.name.clone(),
            database: config.database.clone(),
            previous_round: previous.cloned(),
            round: round.clone(),
            engine_version: env!("CARGO_PKG_VERSION").to_string(),
            run_at: chrono::Utc::now().to_rfc3339(),
        },
        summary,
        decisions: outcome.decisions,
        deprecations: outcome.deprecations,
        failures: outcome.failures,
        next_final: Some(outcome.next_final),
    })
}
