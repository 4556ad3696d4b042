use std::collections::BTreeMap;

use crate::model::{DeprecationReason, UpdateDecision, UpdateSummary};
use crate::reconcile::RoundOutcome;

/// Compute summary statistics from a reconciliation outcome.
pub fn compute_summary(outcome: &RoundOutcome, already_applied: usize) -> UpdateSummary {
    let mut decision_counts: BTreeMap<String, usize> = BTreeMap::new();
    let mut summary = UpdateSummary {
        total_ids: outcome.decisions.len(),
        final_entries: outcome.next_final.len(),
        already_applied,
        ..Default::default()
    };

    for d in &outcome.decisions {
        *decision_counts.entry(d.decision.to_string()).or_insert(0) += 1;

        match d.decision {
            UpdateDecision::New => summary.new += 1,
            UpdateDecision::KeptPrevious => summary.kept_previous += 1,
            UpdateDecision::Updated => summary.updated += 1,
            UpdateDecision::CarriedForward => summary.carried_forward += 1,
            UpdateDecision::Removed => summary.removed += 1,
            UpdateDecision::Failed => summary.failed += 1,
        }
    }

    summary.incorrect_formula = outcome
        .deprecations
        .iter()
        .filter(|d| d.reason == DeprecationReason::IncorrectFormula)
        .count();
    summary.decision_counts = decision_counts;
    summary
}
