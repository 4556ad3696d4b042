use std::collections::BTreeMap;

use serde::Deserialize;

use crate::error::ReconError;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct ReconConfig {
    #[serde(default = "default_name")]
    pub name: String,
    /// Short name of the database being reconciled (`cod`, `icsd`, `mpds`).
    #[serde(default = "default_database")]
    pub database: String,
    /// Raw `db_name` as found in the CIF source → short database name.
    #[serde(default = "default_databases")]
    pub databases: BTreeMap<String, String>,
    #[serde(default)]
    pub curation: CurationConfig,
    #[serde(default)]
    pub matcher: MatcherConfig,
    #[serde(default)]
    pub grouping: GroupingConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

impl Default for ReconConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            database: default_database(),
            databases: default_databases(),
            curation: CurationConfig::default(),
            matcher: MatcherConfig::default(),
            grouping: GroupingConfig::default(),
            output: OutputConfig::default(),
        }
    }
}

fn default_name() -> String {
    "mc3d-source".into()
}

fn default_database() -> String {
    "cod".into()
}

fn default_databases() -> BTreeMap<String, String> {
    [
        ("Crystallography Open Database", "cod"),
        ("Icsd", "icsd"),
        ("Materials Platform for Data Science", "mpds"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

// ---------------------------------------------------------------------------
// Curation
// ---------------------------------------------------------------------------

/// Cleaning workflow exit codes that signal a formula mismatch.
///
/// TOML keys are strings, so codes are kept as strings here and checked in
/// `validate`. Use [`CurationConfig::formula_issue`] for lookups.
#[derive(Debug, Clone, Deserialize)]
pub struct CurationConfig {
    #[serde(default = "default_formula_mismatch")]
    pub formula_mismatch: BTreeMap<String, String>,
}

impl Default for CurationConfig {
    fn default() -> Self {
        Self {
            formula_mismatch: default_formula_mismatch(),
        }
    }
}

fn default_formula_mismatch() -> BTreeMap<String, String> {
    [
        ("430", "missing_elements"),
        ("431", "different_comp"),
        ("432", "check_failed"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

impl CurationConfig {
    /// Label for an exit status if it is a formula-mismatch code.
    pub fn formula_issue(&self, exit_status: u32) -> Option<&str> {
        self.formula_mismatch
            .get(&exit_status.to_string())
            .map(String::as_str)
    }
}

// ---------------------------------------------------------------------------
// Matcher
// ---------------------------------------------------------------------------

/// Tolerances for the built-in lattice oracle. Same meaning and defaults as
/// the usual structure-matcher settings: `ltol` fractional length tolerance,
/// `stol` site tolerance (fractional coordinates), `angle_tol` degrees.
#[derive(Debug, Clone, Deserialize)]
pub struct MatcherConfig {
    #[serde(default = "default_ltol")]
    pub ltol: f64,
    #[serde(default = "default_stol")]
    pub stol: f64,
    #[serde(default = "default_angle_tol")]
    pub angle_tol: f64,
    /// Multiplies all three tolerances.
    #[serde(default = "default_tol_factor")]
    pub tol_factor: f64,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            ltol: default_ltol(),
            stol: default_stol(),
            angle_tol: default_angle_tol(),
            tol_factor: default_tol_factor(),
        }
    }
}

fn default_ltol() -> f64 {
    0.2
}

fn default_stol() -> f64 {
    0.3
}

fn default_angle_tol() -> f64 {
    5.0
}

fn default_tol_factor() -> f64 {
    1.0
}

// ---------------------------------------------------------------------------
// Grouping + Output
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct GroupingConfig {
    #[serde(default = "default_true")]
    pub sort_by_spacegroup: bool,
    /// Prefix for generated group IDs.
    #[serde(default = "default_group_prefix")]
    pub id_prefix: String,
}

impl Default for GroupingConfig {
    fn default() -> Self {
        Self {
            sort_by_spacegroup: true,
            id_prefix: default_group_prefix(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_group_prefix() -> String {
    "mc3d".into()
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OutputConfig {
    #[serde(default)]
    pub json: Option<String>,
}

// ---------------------------------------------------------------------------
// Parse + Validate
// ---------------------------------------------------------------------------

impl ReconConfig {
    pub fn from_toml(input: &str) -> Result<Self, ReconError> {
        let config: ReconConfig =
            toml::from_str(input).map_err(|e| ReconError::ConfigParse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ReconError> {
        if self.database.is_empty() || self.database.contains('|') {
            return Err(ReconError::ConfigValidation(format!(
                "database must be non-empty and must not contain '|', got '{}'",
                self.database
            )));
        }

        for (raw, short) in &self.databases {
            if short.is_empty() || short.contains('|') {
                return Err(ReconError::ConfigValidation(format!(
                    "databases: '{raw}' maps to invalid short name '{short}'"
                )));
            }
        }

        for code in self.curation.formula_mismatch.keys() {
            if code.parse::<u32>().is_err() {
                return Err(ReconError::ConfigValidation(format!(
                    "curation.formula_mismatch: '{code}' is not an exit code"
                )));
            }
        }

        let m = &self.matcher;
        for (name, value) in [
            ("ltol", m.ltol),
            ("stol", m.stol),
            ("angle_tol", m.angle_tol),
            ("tol_factor", m.tol_factor),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(ReconError::ConfigValidation(format!(
                    "matcher.{name} must be a non-negative number, got {value}"
                )));
            }
        }

        if self.grouping.id_prefix.is_empty() {
            return Err(ReconError::ConfigValidation(
                "grouping.id_prefix must not be empty".into(),
            ));
        }

        Ok(())
    }

    /// Short database name for a raw `db_name`. Already-short names pass through.
    pub fn short_database_name(&self, db_name: &str) -> Result<String, ReconError> {
        if let Some(short) = self.databases.get(db_name) {
            return Ok(short.clone());
        }
        if self.databases.values().any(|v| v == db_name) {
            return Ok(db_name.to_string());
        }
        Err(ReconError::UnknownDatabase(db_name.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
