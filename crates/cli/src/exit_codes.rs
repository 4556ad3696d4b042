//! CLI Exit Code Registry
//!
//! This is the single source of truth for all CLI exit codes.
//! Exit codes are part of the shell contract; scripts rely on them.
//!
//! # Exit Code Ranges
//!
//! | Code | Description                                         |
//! |------|-----------------------------------------------------|
//! | 0    | Success                                             |
//! | 1    | General error (unspecified)                         |
//! | 2    | CLI usage error (bad args, missing file)            |
//! | 3    | Invalid config (TOML parse or validation)           |
//! | 4    | Runtime error (store IO, missing round, conflict)   |
//! | 5    | Round completed, but some IDs failed                |
//!
//! # Adding New Exit Codes
//!
//! 1. Add the constant
//! 2. Document what triggers it
//! 3. Update the table above
//! 4. Wire it into the relevant command's error handling

use mc3d_recon::ReconError;

// =============================================================================
// Universal (0-2)
// =============================================================================

/// Success - command completed without errors.
pub const EXIT_SUCCESS: u8 = 0;

/// General error - unspecified failure.
/// Avoid using this; prefer a specific error code.
pub const EXIT_ERROR: u8 = 1;

/// Usage error - bad arguments, missing input files.
pub const EXIT_USAGE: u8 = 2;

// =============================================================================
// Reconciliation (3-5)
// =============================================================================

/// Config file could not be parsed or failed validation.
pub const EXIT_INVALID_CONFIG: u8 = 3;

/// Store read/write failed, a round is missing, or stored data conflicts.
/// The round was not committed; rerunning is safe.
pub const EXIT_RUNTIME: u8 = 4;

/// The command finished but some IDs could not be processed
/// (oracle failures during update, rejected entries during curate).
/// Rerun to retry them.
pub const EXIT_PARTIAL: u8 = 5;

/// Map a library error to its exit code.
pub fn recon_exit_code(err: &ReconError) -> u8 {
    match err {
        ReconError::ConfigParse(_) | ReconError::ConfigValidation(_) => EXIT_INVALID_CONFIG,
        ReconError::InvalidSourceKey(_) | ReconError::InvalidRound(_) => EXIT_USAGE,
        _ => EXIT_RUNTIME,
    }
}
