//! Score computation from check outcomes.
//!
//! Purely functional over its inputs: the same check results, sandbox
//! classification and config always produce byte-identical scores and
//! summaries. `BTreeMap` everywhere so iteration order is stable.

use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::scoring::checks::{CheckDefinition, CheckInput, DIM_SENSITIVE, REGISTRY};
use crate::scoring::config::{Aggregation, ScoringConfig};

/// Complete scoring outcome for one repository.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreCard {
    /// check id -> passed.
    pub check_results: BTreeMap<String, bool>,
    /// dimension -> score in `[0, max_score]`.
    pub dimension_scores: BTreeMap<String, f64>,
    pub pipeline_runs: bool,
    pub gold_generated: bool,
    pub final_score: f64,
    pub summary: String,
}

impl ScoreCard {
    /// Floor record for a repository that never reached the sandbox. Every
    /// check is recorded as failed so downstream consumers see a full row.
    pub fn floor(config: &ScoringConfig, reason: &str) -> Self {
        let check_results: BTreeMap<String, bool> =
            REGISTRY.iter().map(|d| (d.id.to_string(), false)).collect();
        let dimension_scores = dimension_scores(&check_results, config.max_score);
        let summary = crate::evidence::truncate_chars(
            &format!("Evaluation skipped: {reason}"),
            config.summary_max_chars,
        );
        Self {
            check_results,
            dimension_scores,
            pipeline_runs: false,
            gold_generated: false,
            final_score: 0.0,
            summary,
        }
    }
}

/// Runs every registered check and scores the result.
pub fn evaluate(config: &ScoringConfig, input: &CheckInput) -> ScoreCard {
    let check_results = run_checks(input);
    let dimension_scores = dimension_scores(&check_results, config.max_score);
    let pipeline_runs = input.sandbox.succeeded();
    let gold_generated = input.sandbox.gold_generated;
    let final_score = final_score(config, &dimension_scores, pipeline_runs, gold_generated);
    let summary = build_summary(
        config,
        &check_results,
        &dimension_scores,
        pipeline_runs,
        gold_generated,
        input.sandbox.error.as_deref(),
    );
    ScoreCard {
        check_results,
        dimension_scores,
        pipeline_runs,
        gold_generated,
        final_score,
        summary,
    }
}

/// Runs the static registry against one input.
pub fn run_checks(input: &CheckInput) -> BTreeMap<String, bool> {
    run_checks_with(REGISTRY, input)
}

/// A predicate that panics counts as a failed check; it never takes the
/// engine down with it.
pub(crate) fn run_checks_with(
    registry: &[CheckDefinition],
    input: &CheckInput,
) -> BTreeMap<String, bool> {
    let mut results = BTreeMap::new();
    for def in registry {
        let passed = catch_unwind(AssertUnwindSafe(|| (def.predicate)(input))).unwrap_or_else(
            |_| {
                debug!(check = def.id, "Check panicked; recording as failed");
                false
            },
        );
        results.insert(def.id.to_string(), passed);
    }
    results
}

/// Per-dimension scores: weighted pass fraction scaled to `[0, max_score]`,
/// rounded to the nearest integer step. The sensitive-data dimension is
/// all-or-nothing: any failed check zeroes it.
pub fn dimension_scores(
    check_results: &BTreeMap<String, bool>,
    max_score: f64,
) -> BTreeMap<String, f64> {
    let mut totals: BTreeMap<&str, u32> = BTreeMap::new();
    let mut earned: BTreeMap<&str, u32> = BTreeMap::new();
    let mut any_failed: BTreeMap<&str, bool> = BTreeMap::new();
    for def in REGISTRY {
        *totals.entry(def.dimension).or_insert(0) += def.weight;
        let passed = check_results.get(def.id).copied().unwrap_or(false);
        if passed {
            *earned.entry(def.dimension).or_insert(0) += def.weight;
        } else {
            any_failed.insert(def.dimension, true);
        }
    }

    let mut out = BTreeMap::new();
    for (dim, total) in totals {
        let score = if dim == DIM_SENSITIVE && any_failed.get(dim).copied().unwrap_or(false) {
            0.0
        } else if total == 0 {
            0.0
        } else {
            let fraction = f64::from(earned.get(dim).copied().unwrap_or(0)) / f64::from(total);
            (fraction * max_score).round()
        };
        out.insert(dim.to_string(), score);
    }
    out
}

/// Folds the score columns into a single number per the configured mode.
pub fn final_score(
    config: &ScoringConfig,
    dimension_scores: &BTreeMap<String, f64>,
    pipeline_runs: bool,
    gold_generated: bool,
) -> f64 {
    let column_value = |column: &str| -> f64 {
        match column {
            crate::scoring::checks::COL_PIPELINE_RUNS => {
                if pipeline_runs {
                    config.max_score
                } else {
                    0.0
                }
            }
            crate::scoring::checks::COL_GOLD_GENERATED => {
                if gold_generated {
                    config.max_score
                } else {
                    0.0
                }
            }
            dim => dimension_scores.get(dim).copied().unwrap_or(0.0),
        }
    };

    let score = match config.aggregation {
        Aggregation::Weighted => {
            let mut weighted_sum = 0.0;
            let mut total_weight = 0.0;
            for column in config.score_columns() {
                let weight = config.weights.get(column).copied().unwrap_or(0.0);
                weighted_sum += column_value(column) * weight;
                total_weight += weight;
            }
            if total_weight <= 0.0 {
                0.0
            } else {
                weighted_sum / total_weight
            }
        }
        Aggregation::Mean => {
            let columns: Vec<f64> = config.score_columns().map(column_value).collect();
            if columns.is_empty() {
                0.0
            } else {
                columns.iter().sum::<f64>() / columns.len() as f64
            }
        }
    };
    round2(score.clamp(0.0, config.max_score))
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

/// Short deterministic summary from check outcomes and the sandbox
/// classification. No free text from the candidate leaks in beyond the
/// truncated error line.
pub fn build_summary(
    config: &ScoringConfig,
    check_results: &BTreeMap<String, bool>,
    dimension_scores: &BTreeMap<String, f64>,
    pipeline_runs: bool,
    gold_generated: bool,
    run_error: Option<&str>,
) -> String {
    let mut parts = Vec::new();
    if let Some(err) = run_error.filter(|_| !pipeline_runs) {
        parts.push(format!(
            "Pipeline error: {}.",
            crate::evidence::truncate_chars(err, 200)
        ));
    }
    let passed = check_results.values().filter(|v| **v).count();
    parts.push(format!(
        "Deterministic evaluation: {passed}/{} checks passed.",
        check_results.len()
    ));
    for (dim, score) in dimension_scores {
        parts.push(format!("{dim}: {score}/{max}.", max = config.max_score));
    }
    if pipeline_runs && gold_generated {
        parts.push("Pipeline ran successfully; gold layer and reports generated.".to_string());
    } else if pipeline_runs {
        parts.push("Pipeline ran; gold/reports not verified.".to_string());
    }
    crate::evidence::truncate_chars(&parts.join(" "), config.summary_max_chars)
}
