//! Narrative reporting boundary.
//!
//! The orchestrator only ever talks to the `NarrativeReporter` trait. The
//! shipped implementation is the deterministic templated reporter built from
//! check outcomes; a richer collaborator can be slotted in behind the same
//! trait, and its absence or failure always degrades to the template.

use async_trait::async_trait;

use crate::evidence::EvidenceSnapshot;
use crate::scoring::checks::{improvement_for, DIMENSIONS, REGISTRY};
use crate::scoring::{ScoreCard, ScoringConfig};

/// Produces the free-form evaluation text for one repository. Returning
/// `None` means the caller falls back to [`TemplatedReporter`].
#[async_trait]
pub trait NarrativeReporter: Send + Sync {
    async fn report(
        &self,
        snapshot: &EvidenceSnapshot,
        card: &ScoreCard,
        config: &ScoringConfig,
    ) -> Option<String>;
}

/// Deterministic report assembled from check outcomes only. Sections are
/// added while the running total stays under the cap, so the output needs no
/// trailing truncation and identical inputs give identical text.
pub struct TemplatedReporter;

#[async_trait]
impl NarrativeReporter for TemplatedReporter {
    async fn report(
        &self,
        _snapshot: &EvidenceSnapshot,
        card: &ScoreCard,
        config: &ScoringConfig,
    ) -> Option<String> {
        Some(render(card, config))
    }
}

fn section_title(dimension: &str) -> &'static str {
    match dimension {
        "medallion_architecture" => "Medallion",
        "sla_logic" => "SLA logic",
        "pipeline_organization" => "Pipeline org",
        "readme_clarity" => "Readme",
        "code_quality" => "Code quality",
        "naming_conventions" => "Naming",
        "sensitive_data_exposure" => "Sensitive data",
        _ => "Other",
    }
}

/// Builds the compact report, keeping line breaks for readability.
pub fn render(card: &ScoreCard, config: &ScoringConfig) -> String {
    let max_chars = config.summary_max_chars;
    let mut parts: Vec<String> = Vec::new();
    let mut used = 0usize;

    // Appends when the joined total would stay within the cap.
    let mut add = |parts: &mut Vec<String>, used: &mut usize, text: String| -> bool {
        let sep = if parts.is_empty() { 0 } else { 1 };
        let next = *used + sep + text.chars().count();
        if next <= max_chars {
            parts.push(text);
            *used = next;
            true
        } else {
            false
        }
    };

    let passed = card.check_results.values().filter(|v| **v).count();
    add(
        &mut parts,
        &mut used,
        format!(
            "Final score: {}/{}. Pipeline ran: {}. Gold generated: {}.",
            card.final_score,
            config.max_score,
            if card.pipeline_runs { "Yes" } else { "No" },
            if card.gold_generated { "Yes" } else { "No" },
        ),
    );
    add(
        &mut parts,
        &mut used,
        format!("Checks: {passed}/{} passed.", card.check_results.len()),
    );

    for dim in DIMENSIONS {
        let score = card.dimension_scores.get(*dim).copied().unwrap_or(0.0);
        let outcomes: Vec<String> = REGISTRY
            .iter()
            .filter(|d| d.dimension == *dim)
            .map(|d| {
                let mark = if card.check_results.get(d.id).copied().unwrap_or(false) {
                    'P'
                } else {
                    'F'
                };
                format!("{}={mark}", d.id)
            })
            .collect();
        let line = format!(
            "{} ({score}/{}): {}",
            section_title(dim),
            config.max_score,
            outcomes.join(", ")
        );
        if !add(&mut parts, &mut used, line) {
            break;
        }
    }

    add(
        &mut parts,
        &mut used,
        "Scores from presence checks only; no subjective scoring.".to_string(),
    );

    // One suggestion per failed check, registry order, no duplicates.
    let mut suggestions: Vec<&'static str> = Vec::new();
    for def in REGISTRY {
        if card.check_results.get(def.id).copied().unwrap_or(false) {
            continue;
        }
        if let Some(text) = improvement_for(def.id) {
            if !suggestions.contains(&text) {
                suggestions.push(text);
            }
        }
    }
    if !suggestions.is_empty() && add(&mut parts, &mut used, "Suggested improvements:".to_string())
    {
        for s in suggestions {
            if !add(&mut parts, &mut used, format!("- {s}")) {
                break;
            }
        }
    }

    parts.join("\n")
}
