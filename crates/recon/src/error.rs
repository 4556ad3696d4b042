use thiserror::Error;

use crate::model::{ExternalId, Round, SourceKey};

#[derive(Debug, Error)]
pub enum ReconError {
    /// TOML parse / deserialization error.
    #[error("config parse error: {0}")]
    ConfigParse(String),
    /// Config validation error (bad tolerance, bad exit code, etc.).
    #[error("config validation error: {0}")]
    ConfigValidation(String),
    /// Raw `db_name` has no entry in the database mapping.
    #[error("unknown source database: '{0}'")]
    UnknownDatabase(String),
    /// No import or final generation stored for a round.
    #[error("round '{0}' not found in store")]
    MissingRound(Round),
    /// The round exists but some of its IDs were never decided.
    #[error("round '{0}' is not committed")]
    UncommittedRound(Round),
    /// Round tags end up inside source keys and must not contain `|`.
    #[error("invalid round tag: '{0}'")]
    InvalidRound(Round),
    /// A raw entry belongs to another database than the import.
    #[error("entry belongs to database '{found}', import is for '{expected}'")]
    DatabaseMismatch { found: String, expected: String },
    /// A source record already exists with different content.
    #[error("source record '{0}' already stored with different content")]
    AppendOnly(SourceKey),
    /// No source record stored under this key.
    #[error("source record '{0}' not found in store")]
    MissingRecord(SourceKey),
    /// Stored data contradicts what is being written.
    #[error("store conflict: {0}")]
    Conflict(String),
    /// Extras key computed from other extras.
    #[error("extras key '{0}' is derived and cannot be set")]
    DerivedExtra(String),
    /// Malformed source key string (expected `database|round|id`).
    #[error("invalid source key: '{0}'")]
    InvalidSourceKey(String),
    /// The oracle could not compare two structures.
    #[error("similarity check failed for '{id}': {source}")]
    Oracle {
        id: ExternalId,
        #[source]
        source: OracleError,
    },
    /// Grouping failed.
    #[error("grouping failed: {0}")]
    Group(#[from] GroupError),
    /// JSON (de)serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    /// IO error (store read/write, etc.).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OracleError {
    #[error("malformed structure: {0}")]
    Malformed(String),
    #[error("oracle unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GroupError {
    #[error("similarity check between '{left}' and '{right}' failed: {source}")]
    Oracle {
        left: SourceKey,
        right: SourceKey,
        #[source]
        source: OracleError,
    },
}
