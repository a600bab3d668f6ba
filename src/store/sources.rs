// src/store/sources.rs
//! File-backed source table. The file is re-read on every call so edits made
//! between runs are picked up by the next run without a restart.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;

use crate::error::StoreError;
use crate::ingest::types::SourceConfig;
use crate::store::SourceRepository;

pub const ENV_SOURCES_PATH: &str = "AGGREGATOR_SOURCES_PATH";
const DEFAULT_TOML: &str = "config/sources.toml";
const DEFAULT_JSON: &str = "config/sources.json";

#[derive(Debug, Clone)]
pub struct FileSourceRepository {
    path: PathBuf,
}

impl FileSourceRepository {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Resolve the sources file:
    /// 1) $AGGREGATOR_SOURCES_PATH
    /// 2) config/sources.toml
    /// 3) config/sources.json
    pub fn from_default_location() -> Result<Self> {
        if let Ok(p) = std::env::var(ENV_SOURCES_PATH) {
            let pb = PathBuf::from(p);
            if !pb.exists() {
                return Err(anyhow!("{ENV_SOURCES_PATH} points to non-existent path"));
            }
            return Ok(Self::new(pb));
        }
        let toml_p = PathBuf::from(DEFAULT_TOML);
        if toml_p.exists() {
            return Ok(Self::new(toml_p));
        }
        Ok(Self::new(DEFAULT_JSON))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait::async_trait]
impl SourceRepository for FileSourceRepository {
    async fn list_sources(&self) -> Result<Vec<SourceConfig>, StoreError> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(path = %self.path.display(), "sources file missing; no sources configured");
                return Ok(Vec::new());
            }
            Err(e) => {
                return Err(StoreError::Unavailable(format!(
                    "reading {}: {e}",
                    self.path.display()
                )))
            }
        };
        let ext = extension_of(&self.path);
        parse_sources(&content, &ext).map_err(|e| StoreError::Serialization(format!("{e:#}")))
    }
}

/// Load sources synchronously (used by tools and tests).
pub fn load_sources_from(path: &Path) -> Result<Vec<SourceConfig>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("reading sources from {}", path.display()))?;
    parse_sources(&content, &extension_of(path))
}

fn extension_of(path: &Path) -> String {
    path.extension()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase()
}

fn parse_sources(s: &str, hint_ext: &str) -> Result<Vec<SourceConfig>> {
    let try_toml = hint_ext == "toml" || s.contains("[[sources]]");
    if try_toml {
        if let Ok(v) = parse_toml(s) {
            return clean(v);
        }
    }
    if let Ok(v) = parse_json(s) {
        return clean(v);
    }
    if !try_toml {
        if let Ok(v) = parse_toml(s) {
            return clean(v);
        }
    }
    // Re-run the most likely parser to surface its error message.
    let err = if try_toml {
        parse_toml(s).err()
    } else {
        parse_json(s).err()
    };
    Err(err.unwrap_or_else(|| anyhow!("unsupported sources format")))
}

fn parse_toml(s: &str) -> Result<Vec<SourceConfig>> {
    #[derive(Deserialize)]
    struct TomlSources {
        #[serde(default)]
        sources: Vec<SourceConfig>,
    }
    let v: TomlSources = toml::from_str(s)?;
    Ok(v.sources)
}

fn parse_json(s: &str) -> Result<Vec<SourceConfig>> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum JsonSources {
        List(Vec<SourceConfig>),
        Wrapped { sources: Vec<SourceConfig> },
    }
    Ok(match serde_json::from_str::<JsonSources>(s)? {
        JsonSources::List(v) => v,
        JsonSources::Wrapped { sources } => sources,
    })
}

/// Trim ids and keywords, drop empty keywords, reject duplicate ids.
fn clean(items: Vec<SourceConfig>) -> Result<Vec<SourceConfig>> {
    let mut seen = BTreeSet::new();
    let mut out = Vec::with_capacity(items.len());
    for mut it in items {
        it.id = it.id.trim().to_string();
        if it.id.is_empty() {
            return Err(anyhow!("source with empty id"));
        }
        if !seen.insert(it.id.clone()) {
            return Err(anyhow!("duplicate source id {}", it.id));
        }
        it.keywords = it
            .keywords
            .into_iter()
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .collect();
        out.push(it);
    }
    Ok(out)
}
