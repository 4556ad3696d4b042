//! `mc3d-recon`: Round-based reconciliation of crystal-structure imports.
//!
//! Pure engine crate: curates raw imports, reconciles each round against the
//! previous final set, tracks deprecation reasons and groups records into
//! families. No CLI dependencies; the only IO is the JSON directory store.

pub mod config;
pub mod curate;
pub mod deprecation;
pub mod engine;
pub mod error;
pub mod family;
pub mod model;
pub mod oracle;
pub mod reconcile;
pub mod store;
pub mod summary;

pub use config::ReconConfig;
pub use curate::{CleanedEntry, Curator};
pub use deprecation::{DeprecationLedger, GroupStatus};
pub use engine::run_round;
pub use error::{GroupError, OracleError, ReconError};
pub use family::{FamilyGrouper, FamilyMap, FirstReferenceGrouper, GroupId};
pub use model::{
    CanonicalEntry, DeprecationReason, ExternalId, Generation, ImportRound, Round, RoundResult,
    SourceKey, SourceRecord,
};
pub use oracle::{LatticeOracle, SimilarityOracle};
pub use reconcile::{reconcile, Reconciler, RoundOutcome};
pub use store::{JsonDirStore, MemoryStore, RecordStore};
