//! Entrypoint resolution for candidate pipelines.
//!
//! Resolution is a small state machine: probe a fixed, ordered list of
//! candidate filenames; if nothing matches (or configuration bypasses the
//! probe entirely), ask the instructions-interpreting collaborator for a
//! command derived from the README. First match wins and the decision is
//! never revisited within an evaluation attempt.

use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Root scripts, probed first, run as `python <name>`.
const ROOT_ENTRYPOINTS: &[&str] = &["main.py", "run_pipeline.py"];
/// Module entrypoints, probed second, run as `python -m <module>`.
const MODULE_ENTRYPOINTS: &[&str] = &["src/main.py", "src/run_pipeline.py"];

/// The resolved command used to run the candidate pipeline, tagged with its
/// source. Derived once per evaluation attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntrypointDecision {
    /// Found by probing the fixed candidate list.
    AutoDiscovered { command: String },
    /// Supplied by the instructions-interpreting collaborator.
    Declared { command: String },
    /// Neither probing nor the collaborator produced a command.
    NoneFound,
}

impl EntrypointDecision {
    /// The command to execute, when one was resolved.
    pub fn command(&self) -> Option<&str> {
        match self {
            EntrypointDecision::AutoDiscovered { command }
            | EntrypointDecision::Declared { command } => Some(command),
            EntrypointDecision::NoneFound => None,
        }
    }

    /// Short tag for summaries and logs.
    pub fn source(&self) -> &'static str {
        match self {
            EntrypointDecision::AutoDiscovered { .. } => "auto-discovered",
            EntrypointDecision::Declared { .. } => "declared",
            EntrypointDecision::NoneFound => "none-found",
        }
    }
}

/// Collaborator that derives a run command from a README.
///
/// The real implementation (a language model) lives outside this crate;
/// failures and absence both mean "no command". See [`Disabled`].
#[async_trait]
pub trait InstructionInterpreter: Send + Sync {
    /// Returns a single-line run command, or `None` when unknown.
    async fn run_command(&self, readme: &str) -> Option<String>;
}

/// Interpreter that never produces a command. With this implementation,
/// failed probing always resolves to `NoneFound` and nothing is executed.
pub struct Disabled;

#[async_trait]
impl InstructionInterpreter for Disabled {
    async fn run_command(&self, _readme: &str) -> Option<String> {
        None
    }
}

/// Probes the fixed candidate list in priority order.
///
/// Returns the command string for the first file that exists, or `None`.
/// Never inspects anything beyond the fixed list.
pub fn probe(repo_path: &Path) -> Option<String> {
    for name in ROOT_ENTRYPOINTS {
        if repo_path.join(name).is_file() {
            return Some(format!("python {name}"));
        }
    }
    for rel in MODULE_ENTRYPOINTS {
        if repo_path.join(rel).is_file() {
            let module = rel.trim_end_matches(".py").replace('/', ".");
            return Some(format!("python -m {module}"));
        }
    }
    None
}

/// Resolves the entrypoint for one evaluation attempt.
///
/// `bypass_probe` skips auto-discovery and goes straight to the collaborator
/// (the configuration flag from the CLI). Otherwise the collaborator is only
/// consulted after probing fails. The collaborator receives the README text;
/// an empty README short-circuits to `NoneFound`.
pub async fn resolve(
    repo_path: &Path,
    readme: &str,
    interpreter: &dyn InstructionInterpreter,
    bypass_probe: bool,
) -> EntrypointDecision {
    if !bypass_probe {
        if let Some(command) = probe(repo_path) {
            return EntrypointDecision::AutoDiscovered { command };
        }
    }
    if readme.trim().is_empty() {
        return EntrypointDecision::NoneFound;
    }
    match interpreter.run_command(readme).await {
        Some(command) if !command.trim().is_empty() => EntrypointDecision::Declared {
            command: command.trim().to_string(),
        },
        _ => EntrypointDecision::NoneFound,
    }
}
