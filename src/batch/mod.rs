//! Batch orchestration: one result per input row, in input order.
//!
//! The per-repository pipeline sits behind the [`Evaluator`] trait so the
//! ordering and isolation guarantees can be exercised without git or Docker.
//! Concurrency is bounded by a semaphore; results travel with their input
//! index and are reassembled in order regardless of completion order.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde_json::{Map, Value};
use tokio::sync::Semaphore;
use tracing::{info, warn};

use crate::acquire::Acquirer;
use crate::report::{render, NarrativeReporter};
use crate::roster::{RepositorySpec, REPO_URL_FIELD};
use crate::sandbox::{InstructionInterpreter, Sandbox, SandboxConfig};
use crate::scoring::{CheckInput, ScoreCard, ScoringConfig};

/// Everything known about one evaluated row. Exactly one of these exists per
/// accepted input row, never a partial record.
#[derive(Debug, Clone)]
pub struct EvaluationResult {
    pub spec: RepositorySpec,
    pub repo_name: String,
    /// Sandbox classification, or `skipped` when the repo never got there.
    pub status: String,
    /// True when an unrefreshable existing copy was evaluated as-is.
    pub stale: bool,
    pub card: ScoreCard,
    pub report: String,
    pub error: Option<String>,
    pub evaluated_at: DateTime<Utc>,
    pub duration: Duration,
}

impl EvaluationResult {
    /// Output row: the input's passthrough fields first, then the computed
    /// columns. Computed columns win on a key collision.
    pub fn to_json_row(&self) -> Map<String, Value> {
        let mut row = self.spec.passthrough.clone();
        row.insert(
            REPO_URL_FIELD.to_string(),
            Value::String(self.spec.url.clone()),
        );
        row.insert(
            "repo_name".to_string(),
            Value::String(self.repo_name.clone()),
        );
        row.insert("status".to_string(), Value::String(self.status.clone()));
        row.insert("stale_copy".to_string(), Value::Bool(self.stale));
        row.insert(
            "pipeline_runs".to_string(),
            Value::Bool(self.card.pipeline_runs),
        );
        row.insert(
            "gold_generated".to_string(),
            Value::Bool(self.card.gold_generated),
        );
        for (dim, score) in &self.card.dimension_scores {
            row.insert(dim.clone(), json_number(*score));
        }
        row.insert("final_score".to_string(), json_number(self.card.final_score));
        row.insert(
            "summary".to_string(),
            Value::String(self.card.summary.clone()),
        );
        row.insert("report".to_string(), Value::String(self.report.clone()));
        row.insert(
            "error".to_string(),
            self.error
                .clone()
                .map(Value::String)
                .unwrap_or(Value::Null),
        );
        row.insert(
            "evaluated_at".to_string(),
            Value::String(self.evaluated_at.to_rfc3339()),
        );
        row.insert(
            "duration_secs".to_string(),
            json_number(self.duration.as_secs_f64()),
        );
        row
    }
}

fn json_number(x: f64) -> Value {
    serde_json::Number::from_f64(x)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

/// Evaluates one repository end to end. Implementations never fail the row:
/// every breakdown becomes a floor-scored result instead.
#[async_trait]
pub trait Evaluator: Send + Sync {
    async fn evaluate(&self, spec: RepositorySpec) -> EvaluationResult;
}

/// The real pipeline: acquire, run in the sandbox, collect evidence, score,
/// report.
pub struct PipelineEvaluator {
    acquirer: Acquirer,
    sandbox_config: SandboxConfig,
    scoring: ScoringConfig,
    interpreter: Arc<dyn InstructionInterpreter>,
    reporter: Arc<dyn NarrativeReporter>,
}

impl PipelineEvaluator {
    pub fn new(
        acquirer: Acquirer,
        sandbox_config: SandboxConfig,
        scoring: ScoringConfig,
        interpreter: Arc<dyn InstructionInterpreter>,
        reporter: Arc<dyn NarrativeReporter>,
    ) -> Self {
        Self {
            acquirer,
            sandbox_config,
            scoring,
            interpreter,
            reporter,
        }
    }

    fn skipped(&self, spec: RepositorySpec, reason: String, started: Instant) -> EvaluationResult {
        let card = ScoreCard::floor(&self.scoring, &reason);
        let report = render(&card, &self.scoring);
        EvaluationResult {
            repo_name: crate::acquire::repo_name_from_url(&spec.url),
            spec,
            status: "skipped".to_string(),
            stale: false,
            card,
            report,
            error: Some(reason),
            evaluated_at: Utc::now(),
            duration: started.elapsed(),
        }
    }
}

#[async_trait]
impl Evaluator for PipelineEvaluator {
    async fn evaluate(&self, spec: RepositorySpec) -> EvaluationResult {
        let started = Instant::now();
        info!(url = %spec.url, "Evaluating repository");

        let copy = match self.acquirer.acquire(&spec).await {
            Ok(copy) => copy,
            Err(e) => {
                warn!(url = %spec.url, error = %e, "Acquisition failed; recording floor result");
                return self.skipped(spec, format!("acquisition failed: {e}"), started);
            }
        };

        // A failed or timed-out run still gets the structural evaluation;
        // only the execution columns suffer.
        let sandbox = Sandbox::new(self.sandbox_config.clone());
        let result = sandbox.run(&copy.path, self.interpreter.as_ref()).await;
        let snapshot =
            crate::evidence::collect(&copy.path, &result, self.scoring.evidence_caps());
        let input = CheckInput {
            repo: &copy.path,
            snapshot: &snapshot,
            sandbox: &result,
        };
        let card = crate::scoring::evaluate(&self.scoring, &input);
        let report = match self.reporter.report(&snapshot, &card, &self.scoring).await {
            Some(text) => text,
            None => render(&card, &self.scoring),
        };

        info!(
            url = %spec.url,
            status = %result.status,
            final_score = card.final_score,
            "Repository evaluated"
        );
        EvaluationResult {
            repo_name: copy.name,
            spec,
            status: result.status.to_string(),
            stale: copy.stale,
            card,
            report,
            error: result.error.clone(),
            evaluated_at: Utc::now(),
            duration: started.elapsed(),
        }
    }
}

/// Fans rows out to the evaluator under a concurrency bound and returns
/// results in input order.
pub struct BatchOrchestrator {
    evaluator: Arc<dyn Evaluator>,
    concurrency: usize,
}

impl BatchOrchestrator {
    pub fn new(evaluator: Arc<dyn Evaluator>, concurrency: usize) -> Self {
        Self {
            evaluator,
            concurrency: concurrency.max(1),
        }
    }

    pub async fn run(&self, rows: Vec<RepositorySpec>) -> Vec<EvaluationResult> {
        let total = rows.len();
        info!(total, concurrency = self.concurrency, "Starting batch evaluation");
        let semaphore = Arc::new(Semaphore::new(self.concurrency));

        let tasks = rows.into_iter().enumerate().map(|(index, spec)| {
            let evaluator = Arc::clone(&self.evaluator);
            let semaphore = Arc::clone(&semaphore);
            async move {
                let _permit = semaphore.acquire_owned().await.ok();
                (index, evaluator.evaluate(spec).await)
            }
        });

        let mut indexed = join_all(tasks).await;
        indexed.sort_by_key(|(index, _)| *index);
        info!(total, "Batch evaluation finished");
        indexed.into_iter().map(|(_, result)| result).collect()
    }
}
