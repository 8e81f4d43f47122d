// src/config.rs

use std::fs;
use std::path::{Path, PathBuf};

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/* ---------------- CONSTANTES ---------------- */

// Reference sets at least this large get the spatial index under `auto`.
pub const DEFAULT_INDEX_THRESHOLD: usize = 512;
// Ranked queries return this many matches unless told otherwise.
pub const DEFAULT_RANK_SIZE: usize = 10;

/* ---------------- OPTIONS ---------------- */

/// Search strategy used by the matcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum StrategyKind {
    /// Evaluate every reference point.
    Naive,
    /// Prune candidates with an R-tree before exact evaluation.
    Indexed,
    /// Pick by reference set size.
    #[default]
    Auto,
}

/// Output shape requested by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ModeKind {
    /// Nearest reference for each query point.
    #[default]
    Nearest,
    /// Top-k references for one query point.
    Ranked,
    /// Nearest reference keyed by query label.
    Grouped,
}

/// Fully resolved matching mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchMode {
    NearestToEach,
    RankedForQuery { k: usize },
    GroupedByQueryLabel,
}

/// Caller-supplied matching options, usually read from a TOML file and
/// overridden from the command line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchOptions {
    pub mode: ModeKind,
    pub k: usize,
    pub strategy: StrategyKind,
    pub index_threshold: usize,
    pub parallel: bool,
}

impl Default for MatchOptions {
    fn default() -> Self {
        Self {
            mode: ModeKind::Nearest,
            k: DEFAULT_RANK_SIZE,
            strategy: StrategyKind::Auto,
            index_threshold: DEFAULT_INDEX_THRESHOLD,
            parallel: true,
        }
    }
}

// Errors raised while loading options.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read options file {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("cannot parse options file {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

impl MatchOptions {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    pub fn mode(&self) -> MatchMode {
        match self.mode {
            ModeKind::Nearest => MatchMode::NearestToEach,
            ModeKind::Ranked => MatchMode::RankedForQuery { k: self.k },
            ModeKind::Grouped => MatchMode::GroupedByQueryLabel,
        }
    }

    // Concrete strategy for a reference set of `reference_count` points.
    pub fn resolve_strategy(&self, reference_count: usize) -> StrategyKind {
        match self.strategy {
            StrategyKind::Auto if reference_count >= self.index_threshold => StrategyKind::Indexed,
            StrategyKind::Auto => StrategyKind::Naive,
            explicit => explicit,
        }
    }
}

/* ---------------- TEST ---------------- */
