//! Deprecation tracking.
//!
//! Reasons attach to individual source records and only ever accumulate.
//! Group-level status is derived from the member reason sets on every query
//! and is never stored.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

use crate::model::{Deprecation, DeprecationReason, ReasonSet, SourceKey};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct DeprecationLedger {
    reasons: BTreeMap<SourceKey, ReasonSet>,
}

impl DeprecationLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set-union `reason` into the key's reasons. Returns `true` if it was new.
    pub fn add_reason(&mut self, key: SourceKey, reason: DeprecationReason) -> bool {
        self.reasons.entry(key).or_default().insert(reason)
    }

    /// Apply a batch of round deprecations. Returns how many were new.
    pub fn extend<'a, I>(&mut self, deprecations: I) -> usize
    where
        I: IntoIterator<Item = &'a Deprecation>,
    {
        deprecations
            .into_iter()
            .filter(|d| self.add_reason(d.source.clone(), d.reason))
            .count()
    }

    pub fn merge(&mut self, other: &DeprecationLedger) {
        for (key, reasons) in &other.reasons {
            self.reasons.entry(key.clone()).or_default().extend(reasons.iter().copied());
        }
    }

    pub fn reasons(&self, key: &SourceKey) -> Option<&ReasonSet> {
        self.reasons.get(key).filter(|r| !r.is_empty())
    }

    pub fn is_deprecated(&self, key: &SourceKey) -> bool {
        self.reasons(key).is_some()
    }

    /// True iff every member has at least one reason. An empty member list
    /// is never deprecated.
    pub fn is_fully_deprecated<'a, I>(&self, members: I) -> bool
    where
        I: IntoIterator<Item = &'a SourceKey>,
    {
        self.group_status(members) == GroupStatus::Deprecated
    }

    pub fn group_status<'a, I>(&self, members: I) -> GroupStatus
    where
        I: IntoIterator<Item = &'a SourceKey>,
    {
        let mut total = 0;
        let mut deprecated = 0;
        for key in members {
            total += 1;
            if self.is_deprecated(key) {
                deprecated += 1;
            }
        }
        GroupStatus::from_counts(deprecated, total)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&SourceKey, &ReasonSet)> {
        self.reasons.iter().filter(|(_, r)| !r.is_empty())
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Count of deprecated records per reason.
    pub fn reason_counts(&self) -> BTreeMap<DeprecationReason, usize> {
        let mut counts = BTreeMap::new();
        for reasons in self.reasons.values() {
            for reason in reasons {
                *counts.entry(*reason).or_insert(0) += 1;
            }
        }
        counts
    }
}

/// Older ledgers store one reason string per key; newer ones a list.
#[derive(Deserialize)]
#[serde(untagged)]
enum StoredReasons {
    One(DeprecationReason),
    Many(ReasonSet),
}

impl<'de> Deserialize<'de> for DeprecationLedger {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = BTreeMap::<SourceKey, StoredReasons>::deserialize(deserializer)?;
        let reasons = raw
            .into_iter()
            .map(|(key, stored)| {
                let set = match stored {
                    StoredReasons::One(reason) => ReasonSet::from([reason]),
                    StoredReasons::Many(set) => set,
                };
                (key, set)
            })
            .collect();
        Ok(Self { reasons })
    }
}

// ---------------------------------------------------------------------------
// Group status
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupStatus {
    /// No member deprecated.
    Active,
    /// Some but not all members deprecated. Still discoverable.
    Warned,
    /// Every member deprecated.
    Deprecated,
}

impl GroupStatus {
    pub fn from_counts(deprecated: usize, total: usize) -> Self {
        if total == 0 || deprecated == 0 {
            Self::Active
        } else if deprecated == total {
            Self::Deprecated
        } else {
            Self::Warned
        }
    }
}

impl fmt::Display for GroupStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Warned => write!(f, "warned"),
            Self::Deprecated => write!(f, "deprecated"),
        }
    }
}
