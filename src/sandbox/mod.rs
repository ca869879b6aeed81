//! Isolated execution of candidate pipelines.
//!
//! Each evaluation attempt gets a fresh, disposable Docker container with the
//! working copy mounted at `/app`. The candidate's own dependency manifest is
//! installed inside the container, a hard wall-clock budget bounds the run,
//! and the container is force-removed on every exit path. All failure modes
//! are represented as [`SandboxResult`] variants; this boundary never raises.

pub mod entrypoint;

use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::evidence::truncate_chars;
pub use entrypoint::{Disabled, EntrypointDecision, InstructionInterpreter};

/// Environment variables forwarded verbatim into the container. Candidate
/// pipelines read their credentials and blob configuration from these;
/// absent variables are forwarded as empty so the candidate's own error
/// handling is exercised consistently.
pub const PASSTHROUGH_ENV_VARS: &[&str] = &[
    "AZURE_CLIENT_ID",
    "AZURE_TENANT_ID",
    "AZURE_CLIENT_SECRET",
    "AZURE_SUBSCRIPTION_ID",
    "AZURE_CLIENT_CERTIFICATE_PATH",
    "AZURE_USE_IDENTITY",
    "AZURE_ACCOUNT_URL",
    "AZURE_CONTAINER_NAME",
    "AZURE_BLOB_NAME",
    "AZURE_BLOB_PREFIX",
    "RAW_INPUT_FILENAME",
];

/// Image candidate pipelines run in unless overridden.
pub const DEFAULT_IMAGE: &str = "python:3.12-slim";

/// Default raw input filename expected by local-file ingestion pipelines.
const DEFAULT_RAW_INPUT_FILENAME: &str = "tickets_raw.json";

/// Minimal raw JSON so pipelines expecting a local input file can run when
/// the file is missing in the clone. Schema: must have an "issues" list.
const MINIMAL_RAW_JSON: &str = "{\"issues\": []}";

/// Markers that indicate the repo ingests from cloud storage, in which case
/// the raw-input file check is skipped.
const CLOUD_INGESTION_MARKERS: &[&str] = &[
    "azure",
    "azure_account_url",
    "blobserviceclient",
    "defaultazurecredential",
    "azure-storage-blob",
];

/// Relative directory where the pipeline's verified output is expected.
const GOLD_DIR: &str = "data/gold";

/// Classification of one execution attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SandboxStatus {
    /// Pipeline command exited zero.
    Succeeded,
    /// Pipeline command exited non-zero (or could not be started).
    Failed,
    /// Wall-clock budget exceeded; the process tree was terminated.
    TimedOut,
    /// No runnable entrypoint was resolved; nothing was executed.
    EntrypointNotFound,
}

impl std::fmt::Display for SandboxStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SandboxStatus::Succeeded => write!(f, "succeeded"),
            SandboxStatus::Failed => write!(f, "failed"),
            SandboxStatus::TimedOut => write!(f, "timed-out"),
            SandboxStatus::EntrypointNotFound => write!(f, "entrypoint-not-found"),
        }
    }
}

/// Outcome of one execution attempt. Immutable; produced exactly once per
/// repository per run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxResult {
    pub status: SandboxStatus,
    pub entrypoint: EntrypointDecision,
    /// Exit code when the command ran to completion.
    pub exit_code: Option<i32>,
    /// Captured stdout, truncated to the transcript cap.
    pub stdout: String,
    /// Captured stderr, truncated to the transcript cap.
    pub stderr: String,
    /// Wall-clock duration of the attempt.
    pub duration: Duration,
    /// Post-condition: `data/gold` contains at least one CSV. Recorded as an
    /// independent signal; does not change the status classification.
    pub gold_generated: bool,
    /// Human-readable failure description, when any.
    pub error: Option<String>,
}

impl SandboxResult {
    fn not_executed(
        status: SandboxStatus,
        entrypoint: EntrypointDecision,
        error: impl Into<String>,
    ) -> Self {
        Self {
            status,
            entrypoint,
            exit_code: None,
            stdout: String::new(),
            stderr: String::new(),
            duration: Duration::ZERO,
            gold_generated: false,
            error: Some(error.into()),
        }
    }

    pub fn succeeded(&self) -> bool {
        self.status == SandboxStatus::Succeeded
    }
}

/// Configuration for the execution sandbox.
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    /// Docker image the pipeline runs in.
    pub image: String,
    /// Hard wall-clock budget for the whole run.
    pub timeout: Duration,
    /// Per-stream cap on the captured transcript, in characters.
    pub transcript_cap: usize,
    /// Skip entrypoint auto-discovery and go straight to the collaborator.
    pub bypass_probe: bool,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            image: DEFAULT_IMAGE.to_string(),
            timeout: Duration::from_secs(180),
            transcript_cap: 4000,
            bypass_probe: false,
        }
    }
}

impl SandboxConfig {
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            ..Default::default()
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_transcript_cap(mut self, cap: usize) -> Self {
        self.transcript_cap = cap;
        self
    }

    pub fn with_bypass_probe(mut self, bypass: bool) -> Self {
        self.bypass_probe = bypass;
        self
    }
}

/// One disposable execution environment.
pub struct Sandbox {
    id: String,
    config: SandboxConfig,
}

impl Sandbox {
    pub fn new(config: SandboxConfig) -> Self {
        Self {
            id: format!("floweval-{}", Uuid::new_v4()),
            config,
        }
    }

    /// Container name; unique per sandbox instance.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Runs the candidate pipeline in the working copy at `repo_path`.
    ///
    /// Resolution failures, execution failures and timeouts all come back as
    /// [`SandboxResult`] variants; the container is removed on every path.
    pub async fn run(
        &self,
        repo_path: &Path,
        interpreter: &dyn InstructionInterpreter,
    ) -> SandboxResult {
        let readme = std::fs::read_to_string(repo_path.join("README.md")).unwrap_or_default();
        let decision =
            entrypoint::resolve(repo_path, &readme, interpreter, self.config.bypass_probe).await;

        let Some(command) = decision.command().map(str::to_string) else {
            return SandboxResult::not_executed(
                SandboxStatus::EntrypointNotFound,
                decision,
                "No main.py, run_pipeline.py, or src/main.py found (and no run command from README)",
            );
        };

        if let Err(message) = ensure_raw_input(repo_path) {
            warn!(repo = %repo_path.display(), "Skipping pipeline run: {message}");
            return SandboxResult::not_executed(SandboxStatus::Failed, decision, message);
        }

        let args = self.docker_run_args(repo_path, &command);
        debug!(container = %self.id, %command, "Starting sandboxed pipeline");
        let started = Instant::now();

        let mut cmd = Command::new("docker");
        cmd.args(&args).kill_on_drop(true);
        let outcome = tokio::time::timeout(self.config.timeout, cmd.output()).await;
        let duration = started.elapsed();

        // Teardown runs on every path: with `--rm` a finished container is
        // already gone, and a timed-out one must have its tree terminated.
        self.force_remove().await;

        let mut result = match outcome {
            Ok(Ok(output)) => {
                let code = output.status.code();
                let stdout =
                    truncate_chars(&String::from_utf8_lossy(&output.stdout), self.config.transcript_cap);
                let stderr =
                    truncate_chars(&String::from_utf8_lossy(&output.stderr), self.config.transcript_cap);
                if output.status.success() {
                    SandboxResult {
                        status: SandboxStatus::Succeeded,
                        entrypoint: decision,
                        exit_code: code,
                        stdout,
                        stderr,
                        duration,
                        gold_generated: false,
                        error: None,
                    }
                } else {
                    let error = if stderr.trim().is_empty() {
                        format!("Exit code {}", code.unwrap_or(-1))
                    } else {
                        stderr.clone()
                    };
                    SandboxResult {
                        status: SandboxStatus::Failed,
                        entrypoint: decision,
                        exit_code: code,
                        stdout,
                        stderr,
                        duration,
                        gold_generated: false,
                        error: Some(error),
                    }
                }
            }
            Ok(Err(e)) => SandboxResult {
                status: SandboxStatus::Failed,
                entrypoint: decision,
                exit_code: None,
                stdout: String::new(),
                stderr: String::new(),
                duration,
                gold_generated: false,
                error: Some(format!(
                    "Docker not available to run candidate pipelines: {e}"
                )),
            },
            Err(_) => SandboxResult {
                status: SandboxStatus::TimedOut,
                entrypoint: decision,
                exit_code: None,
                stdout: String::new(),
                stderr: String::new(),
                duration,
                gold_generated: false,
                error: Some(format!(
                    "Pipeline execution timed out ({}s)",
                    self.config.timeout.as_secs()
                )),
            },
        };

        result.gold_generated = gold_has_csv(repo_path);
        info!(
            container = %self.id,
            status = %result.status,
            gold = result.gold_generated,
            duration_ms = duration.as_millis(),
            "Sandbox run finished"
        );
        result
    }

    /// Builds the `docker run` argument vector for a resolved command.
    ///
    /// The repo is mounted read-write at `/app` (pipelines write their
    /// medallion layers under `data/`), dependencies come from the repo's own
    /// `requirements.txt`, and the passthrough variables are forwarded.
    fn docker_run_args(&self, repo_path: &Path, command: &str) -> Vec<String> {
        let mut args = vec![
            "run".to_string(),
            "--rm".to_string(),
            "--name".to_string(),
            self.id.clone(),
            "-v".to_string(),
            format!("{}:/app", repo_path.display()),
            "-w".to_string(),
            "/app".to_string(),
            "-e".to_string(),
            "PYTHONUNBUFFERED=1".to_string(),
        ];
        for (key, value) in passthrough_env() {
            args.push("-e".to_string());
            args.push(format!("{key}={value}"));
        }
        args.push(self.config.image.clone());
        args.push("bash".to_string());
        args.push("-c".to_string());
        args.push(format!(
            "pip install -q -r requirements.txt 2>/dev/null; {command}"
        ));
        args
    }

    /// Removes the container if it is still around. Errors are ignored: the
    /// common case is that `--rm` already cleaned up.
    async fn force_remove(&self) {
        let _ = Command::new("docker")
            .args(["rm", "-f", &self.id])
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .status()
            .await;
    }
}

/// Passthrough variables with their current values; absent variables yield
/// empty strings rather than being omitted.
pub fn passthrough_env() -> Vec<(String, String)> {
    PASSTHROUGH_ENV_VARS
        .iter()
        .map(|name| {
            (
                name.to_string(),
                std::env::var(name).unwrap_or_default(),
            )
        })
        .collect()
}

/// Checks the designated output location for at least one CSV file.
pub fn gold_has_csv(repo_path: &Path) -> bool {
    let gold = repo_path.join(GOLD_DIR);
    if !gold.is_dir() {
        return false;
    }
    walkdir::WalkDir::new(&gold)
        .into_iter()
        .filter_map(Result::ok)
        .any(|e| {
            e.file_type().is_file()
                && e.path()
                    .extension()
                    .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"))
        })
}

/// True if the repo appears to ingest from cloud storage, in which case no
/// local raw-input file is required.
fn repo_uses_cloud_ingestion(repo_path: &Path) -> bool {
    let mut candidates: Vec<PathBuf> = Vec::new();
    for dir in ["src/ingestion", "ingestion", "src"] {
        let base = repo_path.join(dir);
        if base.is_dir() {
            for entry in walkdir::WalkDir::new(&base)
                .into_iter()
                .filter_map(Result::ok)
            {
                if entry.file_type().is_file()
                    && entry.path().extension().is_some_and(|e| e == "py")
                {
                    candidates.push(entry.into_path());
                }
            }
        }
    }
    for file in [".env.example", "config.py", "src/utils/config.py"] {
        let p = repo_path.join(file);
        if p.is_file() {
            candidates.push(p);
        }
    }
    candidates.iter().any(|path| {
        let Ok(text) = std::fs::read_to_string(path) else {
            return false;
        };
        let lower = text.to_lowercase();
        CLOUD_INGESTION_MARKERS.iter().any(|m| lower.contains(m))
    })
}

/// Resolves the raw input filename the candidate expects: `.env.example`
/// declaration, then a `getenv("RAW_INPUT_FILENAME", ...)` default in the
/// candidate's code, then the evaluator's own environment, then the default.
fn raw_input_filename(repo_path: &Path) -> String {
    for env_name in [".env.example", ".env.sample"] {
        let p = repo_path.join(env_name);
        let Ok(text) = std::fs::read_to_string(&p) else {
            continue;
        };
        for line in text.lines() {
            let line = line.trim();
            if let Some(rest) = line.strip_prefix("RAW_INPUT_FILENAME=") {
                let value = rest
                    .split('#')
                    .next()
                    .unwrap_or_default()
                    .trim()
                    .trim_matches(|c| c == '\'' || c == '"');
                if !value.is_empty() {
                    return value.to_string();
                }
            }
        }
    }

    static GETENV_RE: OnceLock<Regex> = OnceLock::new();
    let getenv_re = GETENV_RE.get_or_init(|| {
        Regex::new(
            r#"(?i)getenv\s*\(\s*["']RAW_INPUT_FILENAME["']\s*,\s*["']([^"']+)["']\s*\)"#,
        )
        .expect("static regex")
    });
    for dir in ["src", "ingestion", "."] {
        let base = repo_path.join(dir);
        if !base.is_dir() {
            continue;
        }
        for entry in walkdir::WalkDir::new(&base)
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !crate::evidence::is_noise_dir(e.file_name()))
            .filter_map(Result::ok)
        {
            if !entry.file_type().is_file()
                || !entry.path().extension().is_some_and(|e| e == "py")
            {
                continue;
            }
            if let Ok(text) = std::fs::read_to_string(entry.path()) {
                if let Some(caps) = getenv_re.captures(&text) {
                    return caps[1].trim().to_string();
                }
            }
        }
    }

    match std::env::var("RAW_INPUT_FILENAME") {
        Ok(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => DEFAULT_RAW_INPUT_FILENAME.to_string(),
    }
}

/// For local-file ingestion repos, makes sure the expected raw input file
/// exists, seeding a minimal one when missing (e.g. the candidate gitignored
/// it). Returns a descriptive error only when seeding also fails.
fn ensure_raw_input(repo_path: &Path) -> Result<(), String> {
    if repo_uses_cloud_ingestion(repo_path) {
        return Ok(());
    }
    let filename = raw_input_filename(repo_path);
    let raw_path = repo_path.join(&filename);
    if raw_path.is_file() {
        return Ok(());
    }
    match std::fs::write(&raw_path, MINIMAL_RAW_JSON) {
        Ok(()) => {
            info!(file = %filename, "Seeded minimal raw input (missing in clone)");
            Ok(())
        }
        Err(e) => Err(format!(
            "Repo uses local file ingestion but required input file is missing: {filename} \
             (expected at repo root), and it could not be seeded: {e}"
        )),
    }
}
