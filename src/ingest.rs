use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::IngestError;
use crate::model::{Match, PlayerProfile};
use crate::store::DeliveryStore;

/// On-disk interchange format: player profiles plus ball-by-ball matches.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MatchDocument {
    #[serde(default)]
    pub players: Vec<PlayerProfile>,
    #[serde(default)]
    pub matches: Vec<Match>,
}

impl MatchDocument {
    pub fn from_json_str(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).context("parse match document json")
    }

    pub fn read(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("read match document {}", path.display()))?;
        Self::from_json_str(&raw).with_context(|| format!("in {}", path.display()))
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent()
            && !dir.as_os_str().is_empty()
        {
            fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
        }
        let raw = serde_json::to_string_pretty(self).context("serialize match document")?;
        fs::write(path, raw).with_context(|| format!("write {}", path.display()))
    }

    /// Appends `other`. A later profile for the same player replaces an earlier one.
    pub fn merge(&mut self, other: MatchDocument) {
        let mut players: HashMap<_, _> = self.players.drain(..).map(|p| (p.id, p)).collect();
        for p in other.players {
            players.insert(p.id, p);
        }
        let mut merged: Vec<PlayerProfile> = players.into_values().collect();
        merged.sort_by_key(|p| p.id);
        self.players = merged;
        self.matches.extend(other.matches);
    }

    pub fn into_store(self) -> Result<DeliveryStore, IngestError> {
        DeliveryStore::build(self.matches, self.players)
    }
}

/// Merges every path (a `.json` file, or a directory of them) into one document.
pub fn read_paths(paths: &[PathBuf]) -> Result<MatchDocument> {
    let mut doc = MatchDocument::default();
    let mut files = 0usize;
    for path in paths {
        for file in json_files(path)? {
            doc.merge(MatchDocument::read(&file)?);
            files += 1;
        }
    }
    debug!(files, matches = doc.matches.len(), "read match documents");
    Ok(doc)
}

/// Reads each path into one validated store.
pub fn load_store(paths: &[PathBuf]) -> Result<DeliveryStore> {
    let doc = read_paths(paths)?;
    let store = doc.into_store().context("validate ingested matches")?;
    info!(
        matches = store.matches().len(),
        deliveries = store.delivery_count(),
        version = %store.version(),
        "ingested match documents"
    );
    Ok(store)
}

fn json_files(path: &Path) -> Result<Vec<PathBuf>> {
    if path.is_file() {
        return Ok(vec![path.to_path_buf()]);
    }
    let mut out: Vec<PathBuf> = fs::read_dir(path)
        .with_context(|| format!("read dir {}", path.display()))?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
        .collect();
    out.sort();
    Ok(out)
}
