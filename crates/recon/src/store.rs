//! Record store: versioned, append-only storage of import rounds, final
//! sets and the deprecation ledger.
//!
//! Source records are never overwritten with a different structure; their
//! extras may only be updated key by key. Deprecation reasons live in the
//! ledger and are merged into records on lookup.

use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::deprecation::DeprecationLedger;
use crate::error::ReconError;
use crate::model::{
    CanonicalEntry, Deprecation, ExternalId, Generation, ImportRound, Round, SourceKey,
    SourceRecord, UpdateSummary,
};

pub trait RecordStore {
    /// All rounds with an import, a final set or a commit marker, in order.
    fn rounds(&self) -> Result<Vec<Round>, ReconError>;

    /// Merge `import` into whatever is stored for its round.
    fn put_import(&mut self, import: &ImportRound) -> Result<(), ReconError>;

    fn import_round(&self, round: &Round) -> Result<Option<ImportRound>, ReconError>;

    /// Write one final entry. Each call is atomic on its own.
    fn put_final(&mut self, round: &Round, entry: &CanonicalEntry) -> Result<(), ReconError>;

    fn final_entry(
        &self,
        round: &Round,
        id: &ExternalId,
    ) -> Result<Option<CanonicalEntry>, ReconError>;

    /// `None` if the round was never reconciled.
    fn final_generation(&self, round: &Round) -> Result<Option<Generation>, ReconError>;

    fn ledger(&self) -> Result<DeprecationLedger, ReconError>;

    /// Set-union the reasons into the ledger. Returns how many were new.
    fn add_reasons(&mut self, deprecations: &[Deprecation]) -> Result<usize, ReconError>;

    fn mark_committed(&mut self, round: &Round, summary: &UpdateSummary) -> Result<(), ReconError>;

    /// Summary of the committed round, if it was committed.
    fn committed(&self, round: &Round) -> Result<Option<UpdateSummary>, ReconError>;

    fn is_committed(&self, round: &Round) -> Result<bool, ReconError> {
        Ok(self.committed(round)?.is_some())
    }

    /// Record by key, with its ledger reasons filled in.
    fn source_record(&self, key: &SourceKey) -> Result<Option<SourceRecord>, ReconError> {
        let Some(import) = self.import_round(&key.round)? else {
            return Ok(None);
        };
        let Some(mut record) = import.record(&key.external_id).cloned() else {
            return Ok(None);
        };
        if record.database != key.database {
            return Ok(None);
        }
        if let Some(reasons) = self.ledger()?.reasons(key) {
            record.deprecation_reasons = reasons.clone();
        }
        Ok(Some(record))
    }

    /// Apply `update` to the extras of the record at `key`.
    fn update_extras(
        &mut self,
        key: &SourceKey,
        update: &BTreeMap<String, Value>,
    ) -> Result<(), ReconError> {
        let mut import = self
            .import_round(&key.round)?
            .ok_or_else(|| ReconError::MissingRecord(key.clone()))?;
        let record = import
            .entries
            .get_mut(&key.external_id)
            .and_then(Option::as_mut)
            .filter(|r| r.database == key.database)
            .ok_or_else(|| ReconError::MissingRecord(key.clone()))?;
        record.extras = record.extras.merged(update)?;
        self.replace_import(import)
    }

    /// Overwrite the stored import round as is. Used by extras updates.
    fn replace_import(&mut self, import: ImportRound) -> Result<(), ReconError>;
}

/// Merge `incoming` into `existing` without changing any stored structure.
///
/// A record whose structure differs from the stored one is rejected. A record
/// already stored is kept as is, so its extras survive a re-import.
fn merge_import(
    existing: Option<ImportRound>,
    incoming: &ImportRound,
) -> Result<ImportRound, ReconError> {
    if incoming.round.as_str().is_empty() || incoming.round.as_str().contains('|') {
        return Err(ReconError::InvalidRound(incoming.round.clone()));
    }
    let Some(mut merged) = existing else {
        let mut fresh = incoming.clone();
        for record in fresh.entries.values_mut().flatten() {
            record.deprecation_reasons.clear();
        }
        return Ok(fresh);
    };

    if merged.database != incoming.database {
        return Err(ReconError::Conflict(format!(
            "round '{}' is stored for database '{}', not '{}'",
            merged.round, merged.database, incoming.database
        )));
    }

    for (id, record) in &incoming.entries {
        if let (Some(Some(old)), Some(new)) = (merged.entries.get(id), record) {
            if old.structure != new.structure {
                return Err(ReconError::AppendOnly(new.key()));
            }
        }
    }

    for (id, record) in &incoming.entries {
        let slot = merged.entries.entry(id.clone()).or_insert(None);
        if slot.is_none() {
            *slot = record.clone().map(|mut r| {
                r.deprecation_reasons.clear();
                r
            });
        }
    }
    Ok(merged)
}

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    imports: BTreeMap<Round, ImportRound>,
    finals: BTreeMap<Round, BTreeMap<ExternalId, CanonicalEntry>>,
    ledger: DeprecationLedger,
    committed: BTreeMap<Round, UpdateSummary>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RecordStore for MemoryStore {
    fn rounds(&self) -> Result<Vec<Round>, ReconError> {
        let mut rounds: Vec<Round> = self
            .imports
            .keys()
            .chain(self.finals.keys())
            .chain(self.committed.keys())
            .cloned()
            .collect();
        rounds.sort();
        rounds.dedup();
        Ok(rounds)
    }

    fn put_import(&mut self, import: &ImportRound) -> Result<(), ReconError> {
        let merged = merge_import(self.imports.get(&import.round).cloned(), import)?;
        self.imports.insert(import.round.clone(), merged);
        Ok(())
    }

    fn import_round(&self, round: &Round) -> Result<Option<ImportRound>, ReconError> {
        Ok(self.imports.get(round).cloned())
    }

    fn replace_import(&mut self, import: ImportRound) -> Result<(), ReconError> {
        self.imports.insert(import.round.clone(), import);
        Ok(())
    }

    fn put_final(&mut self, round: &Round, entry: &CanonicalEntry) -> Result<(), ReconError> {
        self.finals
            .entry(round.clone())
            .or_default()
            .insert(entry.external_id.clone(), entry.clone());
        Ok(())
    }

    fn final_entry(
        &self,
        round: &Round,
        id: &ExternalId,
    ) -> Result<Option<CanonicalEntry>, ReconError> {
        Ok(self.finals.get(round).and_then(|f| f.get(id)).cloned())
    }

    fn final_generation(&self, round: &Round) -> Result<Option<Generation>, ReconError> {
        match self.finals.get(round) {
            Some(entries) => Ok(Some(Generation::new(round.clone(), entries.clone()))),
            None if self.committed.contains_key(round) => {
                Ok(Some(Generation::empty(round.clone())))
            }
            None => Ok(None),
        }
    }

    fn ledger(&self) -> Result<DeprecationLedger, ReconError> {
        Ok(self.ledger.clone())
    }

    fn add_reasons(&mut self, deprecations: &[Deprecation]) -> Result<usize, ReconError> {
        Ok(self.ledger.extend(deprecations))
    }

    fn mark_committed(&mut self, round: &Round, summary: &UpdateSummary) -> Result<(), ReconError> {
        self.committed.insert(round.clone(), summary.clone());
        Ok(())
    }

    fn committed(&self, round: &Round) -> Result<Option<UpdateSummary>, ReconError> {
        Ok(self.committed.get(round).cloned())
    }
}

// ---------------------------------------------------------------------------
// JSON directory store
// ---------------------------------------------------------------------------

/// Store laid out as plain JSON files:
///
/// ```text
/// <root>/rounds/<round>/import.json
/// <root>/rounds/<round>/final/<id>.json
/// <root>/rounds/<round>/COMMITTED.json
/// <root>/deprecation.json
/// ```
///
/// Round and ID path components are percent-encoded where needed.
#[derive(Debug, Clone)]
pub struct JsonDirStore {
    root: PathBuf,
}

impl JsonDirStore {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, ReconError> {
        let root = root.into();
        fs::create_dir_all(root.join("rounds"))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.root.join("deprecation.json")
    }

    fn round_dir(&self, round: &Round) -> PathBuf {
        self.root.join("rounds").join(encode_component(round.as_str()))
    }

    fn import_path(&self, round: &Round) -> PathBuf {
        self.round_dir(round).join("import.json")
    }

    fn final_dir(&self, round: &Round) -> PathBuf {
        self.round_dir(round).join("final")
    }

    fn final_path(&self, round: &Round, id: &ExternalId) -> PathBuf {
        self.final_dir(round)
            .join(format!("{}.json", encode_component(id.as_str())))
    }

    fn committed_path(&self, round: &Round) -> PathBuf {
        self.round_dir(round).join("COMMITTED.json")
    }
}

impl RecordStore for JsonDirStore {
    fn rounds(&self) -> Result<Vec<Round>, ReconError> {
        let dir = self.root.join("rounds");
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut rounds = Vec::new();
        for entry in entries {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    rounds.push(Round::new(decode_component(name)));
                }
            }
        }
        rounds.sort();
        Ok(rounds)
    }

    fn put_import(&mut self, import: &ImportRound) -> Result<(), ReconError> {
        let path = self.import_path(&import.round);
        let merged = merge_import(read_json(&path)?, import)?;
        write_json_atomic(&path, &merged)?;
        debug!(round = %import.round, ids = merged.len(), "stored import");
        Ok(())
    }

    fn import_round(&self, round: &Round) -> Result<Option<ImportRound>, ReconError> {
        read_json(&self.import_path(round))
    }

    fn replace_import(&mut self, import: ImportRound) -> Result<(), ReconError> {
        write_json_atomic(&self.import_path(&import.round), &import)
    }

    fn put_final(&mut self, round: &Round, entry: &CanonicalEntry) -> Result<(), ReconError> {
        write_json_atomic(&self.final_path(round, &entry.external_id), entry)
    }

    fn final_entry(
        &self,
        round: &Round,
        id: &ExternalId,
    ) -> Result<Option<CanonicalEntry>, ReconError> {
        read_json(&self.final_path(round, id))
    }

    fn final_generation(&self, round: &Round) -> Result<Option<Generation>, ReconError> {
        let dir = self.final_dir(round);
        let files = match fs::read_dir(&dir) {
            Ok(files) => files,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Ok(self
                    .is_committed(round)?
                    .then(|| Generation::empty(round.clone())));
            }
            Err(e) => return Err(e.into()),
        };

        let mut entries = BTreeMap::new();
        for file in files {
            let path = file?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(entry) = read_json::<CanonicalEntry>(&path)? {
                entries.insert(entry.external_id.clone(), entry);
            }
        }
        Ok(Some(Generation::new(round.clone(), entries)))
    }

    fn ledger(&self) -> Result<DeprecationLedger, ReconError> {
        Ok(read_json(&self.ledger_path())?.unwrap_or_default())
    }

    fn add_reasons(&mut self, deprecations: &[Deprecation]) -> Result<usize, ReconError> {
        let mut ledger = self.ledger()?;
        let added = ledger.extend(deprecations);
        if added > 0 {
            write_json_atomic(&self.ledger_path(), &ledger)?;
        }
        Ok(added)
    }

    fn mark_committed(&mut self, round: &Round, summary: &UpdateSummary) -> Result<(), ReconError> {
        fs::create_dir_all(self.final_dir(round))?;
        write_json_atomic(&self.committed_path(round), summary)
    }

    fn committed(&self, round: &Round) -> Result<Option<UpdateSummary>, ReconError> {
        read_json(&self.committed_path(round))
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, ReconError> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Write to a sibling `.tmp` file, then rename over the target.
fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), ReconError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp_path = path.with_extension("json.tmp");
    let bytes = serde_json::to_vec_pretty(value)?;
    fs::write(&tmp_path, bytes)?;
    fs::rename(&tmp_path, path)?;
    Ok(())
}

/// Percent-encode anything outside `[A-Za-z0-9_-]` and a leading dot.
pub fn encode_component(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for (i, b) in s.bytes().enumerate() {
        let plain = b.is_ascii_alphanumeric() || b == b'_' || b == b'-' || (b == b'.' && i > 0);
        if plain {
            out.push(b as char);
        } else {
            out.push_str(&format!("%{b:02X}"));
        }
    }
    out
}

pub fn decode_component(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok();
            if let Some(b) = hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                out.push(b);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}
