//! Cross-venue market mapping.
//!
//! A file-backed table linking a Predict market to the YES/NO token IDs of
//! the same market on peer venues, with a textual question-similarity
//! fallback for unmapped markets. Indices are rebuilt on every (re)load.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

use crate::models::Venue;

#[derive(Debug, Error)]
pub enum MappingError {
    #[error("failed to read mapping file: {0}")]
    Io(#[from] io::Error),

    #[error("failed to parse mapping file: {0}")]
    Parse(#[from] serde_json::Error),
}

/// One mapped market across venues. All fields optional; an entry is useful
/// as soon as it carries a Predict identity plus one peer token pair.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct MappingEntry {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub predict_market_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub predict_question: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub polymarket_yes_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub polymarket_no_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub opinion_yes_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub opinion_no_token: Option<String>,
}

impl MappingEntry {
    /// YES/NO token pair for the given peer venue, when fully mapped.
    pub fn peer_tokens(&self, venue: Venue) -> Option<(&str, &str)> {
        match venue {
            Venue::Polymarket => match (&self.polymarket_yes_token, &self.polymarket_no_token) {
                (Some(y), Some(n)) => Some((y.as_str(), n.as_str())),
                _ => None,
            },
            Venue::Opinion => match (&self.opinion_yes_token, &self.opinion_no_token) {
                (Some(y), Some(n)) => Some((y.as_str(), n.as_str())),
                _ => None,
            },
            Venue::Predict => None,
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct MappingFile {
    #[serde(default)]
    entries: Vec<MappingEntry>,
}

/// In-memory view of the mapping file with lookup indices.
#[derive(Debug)]
pub struct MappingTable {
    path: PathBuf,
    entries: Vec<MappingEntry>,
    by_market_id: HashMap<String, usize>,
    by_question: HashMap<String, usize>,
}

impl MappingTable {
    /// Load the table from disk. A missing file yields an empty table; a
    /// malformed file is an error.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, MappingError> {
        let path = path.into();
        let entries = match fs::read_to_string(&path) {
            Ok(raw) => serde_json::from_str::<MappingFile>(&raw)?.entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("mapping file {} not found, starting empty", path.display());
                Vec::new()
            }
            Err(e) => return Err(e.into()),
        };

        let mut table = Self {
            path,
            entries,
            by_market_id: HashMap::new(),
            by_question: HashMap::new(),
        };
        table.rebuild_indices();
        info!(
            "loaded {} mapping entries from {}",
            table.entries.len(),
            table.path.display()
        );
        Ok(table)
    }

    /// Empty table bound to a path (for first-run bootstrap).
    pub fn empty(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            entries: Vec::new(),
            by_market_id: HashMap::new(),
            by_question: HashMap::new(),
        }
    }

    fn rebuild_indices(&mut self) {
        self.by_market_id.clear();
        self.by_question.clear();
        for (i, entry) in self.entries.iter().enumerate() {
            if let Some(id) = &entry.predict_market_id {
                self.by_market_id.insert(id.clone(), i);
            }
            if let Some(q) = &entry.predict_question {
                self.by_question.insert(normalize_question(q), i);
            }
        }
    }

    /// Write the table back with a temp-file + rename so readers never see a
    /// partial file.
    pub fn save(&self) -> Result<(), MappingError> {
        let file = MappingFile {
            entries: self.entries.clone(),
        };
        crate::persist::write_json_atomic(&self.path, &file)?;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn upsert(&mut self, entry: MappingEntry) {
        let existing = entry
            .predict_market_id
            .as_ref()
            .and_then(|id| self.by_market_id.get(id).copied());
        match existing {
            Some(i) => self.entries[i] = entry,
            None => self.entries.push(entry),
        }
        self.rebuild_indices();
    }

    /// Lookup by Predict market/condition id.
    pub fn by_market_id(&self, market_id: &str) -> Option<&MappingEntry> {
        self.by_market_id.get(market_id).map(|&i| &self.entries[i])
    }

    /// Lookup by normalized question text (exact match after normalization).
    pub fn by_question(&self, question: &str) -> Option<&MappingEntry> {
        self.by_question
            .get(&normalize_question(question))
            .map(|&i| &self.entries[i])
    }

    /// Resolve the peer token pair for a Predict market: mapping first (by
    /// id, then by normalized question). Pure with respect to its inputs.
    pub fn resolve(&self, market_id: &str, question: &str, venue: Venue) -> Option<(&str, &str)> {
        self.by_market_id(market_id)
            .or_else(|| self.by_question(question))
            .and_then(|e| e.peer_tokens(venue))
    }
}

/// Lowercase, strip punctuation, collapse whitespace.
pub fn normalize_question(question: &str) -> String {
    let mut out = String::with_capacity(question.len());
    let mut last_space = true;
    for c in question.chars() {
        if c.is_alphanumeric() {
            out.extend(c.to_lowercase());
            last_space = false;
        } else if !last_space {
            out.push(' ');
            last_space = true;
        }
    }
    while out.ends_with(' ') {
        out.pop();
    }
    out
}

/// Jaccard similarity of normalized word sets, in [0, 1].
pub fn question_similarity(a: &str, b: &str) -> f64 {
    let a_norm = normalize_question(a);
    let b_norm = normalize_question(b);
    let sa: std::collections::HashSet<&str> = a_norm.split(' ').filter(|w| !w.is_empty()).collect();
    let sb: std::collections::HashSet<&str> = b_norm.split(' ').filter(|w| !w.is_empty()).collect();
    if sa.is_empty() || sb.is_empty() {
        return 0.0;
    }
    let intersection = sa.intersection(&sb).count();
    let union = sa.union(&sb).count();
    intersection as f64 / union as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str, question: &str) -> MappingEntry {
        MappingEntry {
            predict_market_id: Some(id.to_string()),
            predict_question: Some(question.to_string()),
            polymarket_yes_token: Some(format!("{id}-pm-yes")),
            polymarket_no_token: Some(format!("{id}-pm-no")),
            opinion_yes_token: None,
            opinion_no_token: None,
        }
    }

    #[test]
    fn test_normalize_question() {
        assert_eq!(
            normalize_question("Will BTC close above $100,000 on Dec 31?"),
            "will btc close above 100 000 on dec 31"
        );
        assert_eq!(normalize_question("  A  B  "), "a b");
    }

    #[test]
    fn test_question_similarity() {
        let a = "Will BTC be above $100k on December 31?";
        let b = "Will BTC be above $100k on December 31, 2026?";
        assert!(question_similarity(a, b) > 0.7);
        assert_eq!(question_similarity(a, a), 1.0);
        assert!(question_similarity(a, "Completely unrelated words here") < 0.2);
        assert_eq!(question_similarity("", "anything"), 0.0);
    }

    #[test]
    fn test_resolve_by_id_then_question() {
        let mut table = MappingTable::empty("/tmp/unused.json");
        table.upsert(entry("cond-1", "Will BTC close above $100k?"));

        let by_id = table.resolve("cond-1", "different question", Venue::Polymarket);
        assert_eq!(by_id, Some(("cond-1-pm-yes", "cond-1-pm-no")));

        let by_question =
            table.resolve("unknown", "will btc close above 100k", Venue::Polymarket);
        assert_eq!(by_question, Some(("cond-1-pm-yes", "cond-1-pm-no")));

        assert!(table.resolve("cond-1", "x", Venue::Opinion).is_none());
        assert!(table.resolve("nope", "nope", Venue::Polymarket).is_none());
    }

    #[test]
    fn test_upsert_replaces_by_id() {
        let mut table = MappingTable::empty("/tmp/unused.json");
        table.upsert(entry("cond-1", "q1"));
        let mut updated = entry("cond-1", "q1");
        updated.opinion_yes_token = Some("op-yes".into());
        updated.opinion_no_token = Some("op-no".into());
        table.upsert(updated);
        assert_eq!(table.len(), 1);
        assert_eq!(
            table.resolve("cond-1", "q1", Venue::Opinion),
            Some(("op-yes", "op-no"))
        );
    }

    #[test]
    fn test_save_and_reload_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cross-platform-mapping.json");

        let mut table = MappingTable::empty(&path);
        table.upsert(entry("cond-1", "Will BTC close above $100k?"));
        table.save().unwrap();

        let reloaded = MappingTable::load(&path).unwrap();
        assert_eq!(reloaded.len(), 1);
        assert_eq!(
            reloaded.resolve("cond-1", "", Venue::Polymarket),
            Some(("cond-1-pm-yes", "cond-1-pm-no"))
        );
    }

    #[test]
    fn test_load_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let table = MappingTable::load(dir.path().join("missing.json")).unwrap();
        assert!(table.is_empty());
    }
}
