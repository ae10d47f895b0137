//! Demo data the server starts with and resets to.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use super::models::{Prompt, Transaction};

const BUILTIN_SEED: &str = include_str!("seed.json");

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SeedData {
    #[serde(default)]
    pub prompts: Vec<Prompt>,
    #[serde(default)]
    pub transactions: Vec<Transaction>,
}

impl SeedData {
    pub fn parse(content: &str) -> Result<Self> {
        serde_json::from_str(content).context("Failed to parse seed data")
    }

    pub fn builtin() -> Result<Self> {
        Self::parse(BUILTIN_SEED)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read seed file: {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Invalid seed file: {}", path.display()))
    }
}

/// Where seed data comes from. Re-read on every reset so edits to a seed
/// file are picked up without a restart.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum SeedSource {
    #[default]
    Builtin,
    File(PathBuf),
}

impl SeedSource {
    pub fn from_path(path: Option<PathBuf>) -> Self {
        path.map(SeedSource::File).unwrap_or_default()
    }

    pub fn load(&self) -> Result<SeedData> {
        match self {
            SeedSource::Builtin => SeedData::builtin(),
            SeedSource::File(path) => SeedData::load(path),
        }
    }
}

impl std::fmt::Display for SeedSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SeedSource::Builtin => f.write_str("built-in"),
            SeedSource::File(path) => write!(f, "{}", path.display()),
        }
    }
}
