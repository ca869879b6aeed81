//! Scoring configuration loaded from `scoring.yaml`.
//!
//! Weights, the final-score aggregation mode, and text caps all come from the
//! config document. A missing file falls back to the documented defaults; a
//! present-but-invalid file is fatal before any repository is touched.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;
use tracing::debug;

use crate::error::ConfigError;
use crate::evidence::EvidenceCaps;
use crate::scoring::checks::{
    CheckDefinition, COL_GOLD_GENERATED, COL_PIPELINE_RUNS, DIMENSIONS,
};

const DEFAULT_MAX_SCORE: f64 = 100.0;
const DEFAULT_SUMMARY_MAX_CHARS: usize = 1800;
const DEFAULT_FILE_CAP_CHARS: usize = 4000;
const DEFAULT_TRANSCRIPT_CAP_CHARS: usize = 4000;
const DEFAULT_TREE_DEPTH: usize = 3;

/// (column, default weight) pairs for the weighted aggregation.
const DEFAULT_WEIGHTS: &[(&str, f64)] = &[
    (COL_PIPELINE_RUNS, 3.0),
    (COL_GOLD_GENERATED, 2.0),
    ("medallion_architecture", 3.0),
    ("sla_logic", 3.0),
    ("pipeline_organization", 2.0),
    ("readme_clarity", 2.0),
    ("code_quality", 2.0),
    ("naming_conventions", 2.0),
    ("sensitive_data_exposure", 2.0),
];

/// How per-column scores are folded into the final score.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregation {
    /// Weighted average over the configured column weights.
    Weighted,
    /// Unweighted arithmetic mean over all score columns.
    Mean,
}

/// Validated scoring configuration.
#[derive(Debug, Clone)]
pub struct ScoringConfig {
    pub weights: BTreeMap<String, f64>,
    pub aggregation: Aggregation,
    pub max_score: f64,
    pub summary_max_chars: usize,
    pub file_cap_chars: usize,
    pub transcript_cap_chars: usize,
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    aggregation: Option<String>,
    #[serde(default)]
    weights: BTreeMap<String, f64>,
    normalization: Option<RawNormalization>,
    caps: Option<RawCaps>,
}

#[derive(Debug, Deserialize)]
struct RawNormalization {
    max_score: Option<f64>,
    summary_max_chars: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct RawCaps {
    file_chars: Option<usize>,
    transcript_chars: Option<usize>,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            weights: DEFAULT_WEIGHTS
                .iter()
                .map(|(k, v)| (k.to_string(), *v))
                .collect(),
            aggregation: Aggregation::Weighted,
            max_score: DEFAULT_MAX_SCORE,
            summary_max_chars: DEFAULT_SUMMARY_MAX_CHARS,
            file_cap_chars: DEFAULT_FILE_CAP_CHARS,
            transcript_cap_chars: DEFAULT_TRANSCRIPT_CAP_CHARS,
        }
    }
}

impl ScoringConfig {
    /// Loads and validates the config. `None` or a missing file yields the
    /// defaults; a file that exists must be fully valid.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let Some(path) = path.filter(|p| p.exists()) else {
            debug!("No scoring config file; using defaults");
            let config = Self::default();
            config.validate(crate::scoring::checks::REGISTRY)?;
            return Ok(config);
        };

        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Unreadable {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        let raw: RawConfig = serde_yaml::from_str(&text)?;

        let aggregation = match raw.aggregation.as_deref().map(str::trim) {
            None | Some("") => return Err(ConfigError::AggregationUnset),
            Some("weighted") => Aggregation::Weighted,
            Some("mean") => Aggregation::Mean,
            Some(other) => return Err(ConfigError::UnknownAggregation(other.to_string())),
        };

        // Declared weights override the defaults column by column.
        let mut weights: BTreeMap<String, f64> = DEFAULT_WEIGHTS
            .iter()
            .map(|(k, v)| (k.to_string(), *v))
            .collect();
        for (key, value) in raw.weights {
            if !weights.contains_key(&key) {
                return Err(ConfigError::InvalidValue {
                    key: "weights".to_string(),
                    message: format!("unknown score column '{key}'"),
                });
            }
            weights.insert(key, value);
        }

        let norm = raw.normalization;
        let caps = raw.caps;
        let config = Self {
            weights,
            aggregation,
            max_score: norm
                .as_ref()
                .and_then(|n| n.max_score)
                .unwrap_or(DEFAULT_MAX_SCORE),
            summary_max_chars: norm
                .as_ref()
                .and_then(|n| n.summary_max_chars)
                .unwrap_or(DEFAULT_SUMMARY_MAX_CHARS),
            file_cap_chars: caps
                .as_ref()
                .and_then(|c| c.file_chars)
                .unwrap_or(DEFAULT_FILE_CAP_CHARS),
            transcript_cap_chars: caps
                .as_ref()
                .and_then(|c| c.transcript_chars)
                .unwrap_or(DEFAULT_TRANSCRIPT_CAP_CHARS),
        };
        config.validate(crate::scoring::checks::REGISTRY)?;
        Ok(config)
    }

    /// Cross-checks the config against the check registry.
    pub fn validate(&self, registry: &[CheckDefinition]) -> Result<(), ConfigError> {
        for (key, value) in &self.weights {
            if *value <= 0.0 || !value.is_finite() {
                return Err(ConfigError::InvalidWeight {
                    key: key.clone(),
                    value: *value,
                });
            }
        }
        for column in self.score_columns() {
            if !self.weights.contains_key(column) {
                return Err(ConfigError::MissingWeight(column.to_string()));
            }
        }
        // A weighted dimension without checks would divide by zero.
        for dim in DIMENSIONS {
            if !registry.iter().any(|d| d.dimension == *dim) {
                return Err(ConfigError::EmptyDimension(dim.to_string()));
            }
        }
        if self.max_score <= 0.0 || !self.max_score.is_finite() {
            return Err(ConfigError::InvalidValue {
                key: "normalization.max_score".to_string(),
                message: format!("must be positive, got {}", self.max_score),
            });
        }
        if self.summary_max_chars == 0 {
            return Err(ConfigError::InvalidValue {
                key: "normalization.summary_max_chars".to_string(),
                message: "must be positive".to_string(),
            });
        }
        if self.file_cap_chars == 0 || self.transcript_cap_chars == 0 {
            return Err(ConfigError::InvalidValue {
                key: "caps".to_string(),
                message: "character caps must be positive".to_string(),
            });
        }
        Ok(())
    }

    /// All score columns: the two execution signals plus every dimension.
    pub fn score_columns(&self) -> impl Iterator<Item = &'static str> {
        [COL_PIPELINE_RUNS, COL_GOLD_GENERATED]
            .into_iter()
            .chain(DIMENSIONS.iter().copied())
    }

    /// Evidence caps derived from the configured text limits.
    pub fn evidence_caps(&self) -> EvidenceCaps {
        EvidenceCaps {
            file_cap: self.file_cap_chars,
            transcript_cap: self.transcript_cap_chars,
            tree_depth: DEFAULT_TREE_DEPTH,
        }
    }
}
