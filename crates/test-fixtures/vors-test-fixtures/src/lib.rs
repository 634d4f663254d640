//! Tracker scripts for tests and benches, listed in `fixtures/manifest.json`.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use serde::Deserialize;

mod scripted;

pub use scripted::{HypothesisScript, KeyframeScript, P3pScript, ScriptedTracker, TrackerCall, TrackerScript};

static MANIFEST: Lazy<Manifest> = Lazy::new(|| {
    let raw = include_str!("../../../../fixtures/manifest.json");
    serde_json::from_str(raw).expect("fixtures manifest should parse")
});

#[derive(Debug, Deserialize)]
struct Manifest {
    scripts: BTreeMap<String, ScriptEntry>,
}

/// A manifest entry is either the script path or `{ "path": ... }`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ScriptEntry {
    Path(String),
    Detailed { path: String },
}

impl ScriptEntry {
    fn file(&self) -> &str {
        match self {
            ScriptEntry::Path(path) | ScriptEntry::Detailed { path } => path,
        }
    }
}

pub mod scripts {
    use super::*;

    /// Script names, sorted.
    pub fn keys() -> Vec<String> {
        MANIFEST.scripts.keys().cloned().collect()
    }

    pub fn load(name: &str) -> Result<TrackerScript> {
        let entry = MANIFEST
            .scripts
            .get(name)
            .with_context(|| format!("unknown tracker script '{name}'"))?;
        let path = Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("../../../fixtures")
            .join(entry.file());
        let text = fs::read_to_string(&path)
            .with_context(|| format!("failed to read tracker script {}", path.display()))?;
        serde_json::from_str(&text).with_context(|| format!("tracker script '{name}' is malformed"))
    }

    /// Tracker playing the named script.
    pub fn tracker(name: &str) -> Result<ScriptedTracker> {
        load(name).map(ScriptedTracker::new)
    }
}
