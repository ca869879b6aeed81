//! Source acquisition: materialize a repository URL as a local working copy.
//!
//! Working copies live under a configured root directory, keyed by a
//! deterministic name derived from the URL so repeated runs reuse the same
//! location. Clones are retried with backoff on transient network failures;
//! an existing copy is updated in place, falling back to the stale copy when
//! the update fails. Access to each working-copy path is serialized through
//! an explicit lock registry so concurrent attempts at the same repository
//! never race on one directory.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use regex::Regex;
use tokio::process::Command;
use tokio::sync::OwnedMutexGuard;
use tracing::{info, warn};

use crate::error::AcquisitionError;
use crate::roster::RepositorySpec;

/// Maximum clone attempts for transient failures.
const CLONE_MAX_RETRIES: u32 = 3;
/// Base delay between clone attempts; grows linearly per attempt.
const CLONE_RETRY_DELAY: Duration = Duration::from_secs(2);
/// Budget for a single `git clone` invocation.
const CLONE_TIMEOUT: Duration = Duration::from_secs(120);
/// Budget for a `git pull` refresh of an existing copy.
const PULL_TIMEOUT: Duration = Duration::from_secs(60);

/// A local, on-disk materialization of one repository.
#[derive(Debug, Clone)]
pub struct WorkingCopy {
    /// Deterministic directory name derived from the URL.
    pub name: String,
    /// Absolute path of the working copy.
    pub path: PathBuf,
    /// True when an existing copy could not be refreshed and is used as-is.
    pub stale: bool,
}

/// Registry of working-copy path -> async lock.
///
/// Keeps the per-path serialization policy explicit instead of relying on
/// filesystem locking; the registry itself is cheap and never shrinks within
/// a run (one entry per distinct repository).
#[derive(Default)]
pub struct PathLocks {
    inner: Mutex<HashMap<PathBuf, Arc<tokio::sync::Mutex<()>>>>,
}

impl PathLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquires the lock for `path`, waiting if another attempt holds it.
    pub async fn lock(&self, path: &Path) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().expect("path lock registry poisoned");
            Arc::clone(map.entry(path.to_path_buf()).or_default())
        };
        lock.lock_owned().await
    }
}

/// Derives a safe directory name from a repo URL
/// (e.g. `https://github.com/user/project` -> `user_project`).
pub fn repo_name_from_url(url: &str) -> String {
    static OWNER_REPO: OnceLock<Regex> = OnceLock::new();
    static UNSAFE: OnceLock<Regex> = OnceLock::new();
    let owner_repo = OWNER_REPO
        .get_or_init(|| Regex::new(r"(?:/|:)([^/:]+)/([^/]+?)(?:\.git)?$").expect("static regex"));
    let unsafe_chars = UNSAFE.get_or_init(|| Regex::new(r"[^\w.-]").expect("static regex"));

    let url = url.trim().trim_end_matches('/');
    if let Some(caps) = owner_repo.captures(url) {
        return format!("{}_{}", &caps[1], &caps[2]);
    }
    // Fallback: sanitize last path segment
    let last = url.rsplit('/').next().unwrap_or(url).replace(".git", "");
    let name = unsafe_chars.replace_all(&last, "_").to_string();
    if name.is_empty() {
        "repo".to_string()
    } else {
        name
    }
}

/// Classifies a git stderr transcript as terminal (not worth retrying).
fn is_terminal_failure(stderr: &str) -> bool {
    let lower = stderr.to_lowercase();
    const TERMINAL_MARKERS: &[&str] = &[
        "repository not found",
        "not found",
        "authentication failed",
        "could not read username",
        "could not read password",
        "permission denied",
        "access denied",
        "does not appear to be a git repository",
        "cannot detect a supported protocol",
    ];
    // Unresolvable hosts are usually transient DNS/VPN conditions, keep retrying.
    if lower.contains("could not resolve host") {
        return false;
    }
    TERMINAL_MARKERS.iter().any(|m| lower.contains(m))
}

/// Acquires working copies under a root directory.
///
/// This is the only component that writes under the root; clones persist
/// across runs by design and are never deleted implicitly.
pub struct Acquirer {
    root: PathBuf,
    locks: PathLocks,
}

impl Acquirer {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            locks: PathLocks::new(),
        }
    }

    /// Root directory that working copies live under.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Deterministic working-copy path for a spec, without touching disk.
    pub fn path_for(&self, spec: &RepositorySpec) -> PathBuf {
        self.root.join(repo_name_from_url(&spec.url))
    }

    /// Clones or refreshes the working copy for `spec`.
    ///
    /// Holds the per-path lock for the entire operation so a concurrent
    /// attempt at the same URL waits instead of racing on the directory.
    pub async fn acquire(&self, spec: &RepositorySpec) -> Result<WorkingCopy, AcquisitionError> {
        let url = spec.url.trim();
        if url.is_empty() {
            return Err(AcquisitionError::InvalidUrl(spec.url.clone()));
        }
        let name = repo_name_from_url(url);
        let dest = self.root.join(&name);
        let _guard = self.locks.lock(&dest).await;

        tokio::fs::create_dir_all(&self.root).await?;

        if dest.join(".git").is_dir() {
            let stale = !self.refresh(url, &dest).await;
            return Ok(WorkingCopy {
                name,
                path: dest,
                stale,
            });
        }

        self.clone_with_retry(url, &dest).await?;
        Ok(WorkingCopy {
            name,
            path: dest,
            stale: false,
        })
    }

    /// Updates an existing copy in place. Returns false when the pull failed
    /// and the stale copy will be used as-is.
    async fn refresh(&self, url: &str, dest: &Path) -> bool {
        let pull = run_git(&["pull", "--quiet"], Some(dest), PULL_TIMEOUT).await;
        match pull {
            GitOutcome::Success => true,
            GitOutcome::Failure { stderr } => {
                warn!(url, stderr = %clip(&stderr, 200), "git pull failed, using existing copy");
                false
            }
            GitOutcome::TimedOut => {
                warn!(url, "git pull timed out, using existing copy");
                false
            }
            GitOutcome::SpawnError(e) => {
                warn!(url, error = %e, "could not spawn git for pull, using existing copy");
                false
            }
        }
    }

    async fn clone_with_retry(&self, url: &str, dest: &Path) -> Result<(), AcquisitionError> {
        let mut last_stderr = String::new();
        for attempt in 1..=CLONE_MAX_RETRIES {
            let dest_str = dest.to_string_lossy();
            let outcome = run_git(
                &["clone", "--quiet", url, dest_str.as_ref()],
                None,
                CLONE_TIMEOUT,
            )
            .await;

            match outcome {
                GitOutcome::Success => {
                    info!(url, dest = %dest.display(), attempt, "Cloned repository");
                    return Ok(());
                }
                GitOutcome::Failure { stderr } => {
                    if is_terminal_failure(&stderr) {
                        return Err(AcquisitionError::Terminal {
                            url: url.to_string(),
                            stderr: clip(&stderr, 300),
                        });
                    }
                    warn!(
                        url,
                        attempt,
                        max = CLONE_MAX_RETRIES,
                        stderr = %clip(&stderr, 200),
                        "Clone attempt failed"
                    );
                    last_stderr = stderr;
                }
                GitOutcome::TimedOut => {
                    warn!(url, attempt, max = CLONE_MAX_RETRIES, "Clone timed out");
                    last_stderr = "clone timed out".to_string();
                }
                GitOutcome::SpawnError(e) => {
                    return Err(AcquisitionError::Spawn(e));
                }
            }

            // Remove a partial clone before retrying
            if dest.exists() {
                if let Err(e) = tokio::fs::remove_dir_all(dest).await {
                    warn!(dest = %dest.display(), error = %e, "Could not remove partial clone");
                }
            }
            if attempt < CLONE_MAX_RETRIES {
                tokio::time::sleep(CLONE_RETRY_DELAY * attempt).await;
            }
        }
        Err(AcquisitionError::RetriesExhausted {
            url: url.to_string(),
            attempts: CLONE_MAX_RETRIES,
            stderr: clip(&last_stderr, 300),
        })
    }
}

enum GitOutcome {
    Success,
    Failure { stderr: String },
    TimedOut,
    SpawnError(String),
}

async fn run_git(args: &[&str], cwd: Option<&Path>, budget: Duration) -> GitOutcome {
    let mut cmd = Command::new("git");
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }
    match tokio::time::timeout(budget, cmd.output()).await {
        Ok(Ok(output)) if output.status.success() => GitOutcome::Success,
        Ok(Ok(output)) => GitOutcome::Failure {
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        },
        Ok(Err(e)) => GitOutcome::SpawnError(e.to_string()),
        Err(_) => GitOutcome::TimedOut,
    }
}

fn clip(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_repo_name_from_https_url() {
        assert_eq!(
            repo_name_from_url("https://github.com/user/project1"),
            "user_project1"
        );
        assert_eq!(
            repo_name_from_url("https://github.com/user/project1.git"),
            "user_project1"
        );
        assert_eq!(
            repo_name_from_url("https://github.com/user/project1/"),
            "user_project1"
        );
    }

    #[test]
    fn test_repo_name_from_ssh_url() {
        assert_eq!(
            repo_name_from_url("git@github.com:user/repo.git"),
            "user_repo"
        );
    }

    #[test]
    fn test_repo_name_fallback_sanitized() {
        assert_eq!(repo_name_from_url("weird name!"), "weird_name_");
        assert_eq!(repo_name_from_url(""), "repo");
    }

    #[test]
    fn test_repo_name_is_deterministic() {
        let a = repo_name_from_url("https://github.com/acme/pipeline");
        let b = repo_name_from_url("https://github.com/acme/pipeline");
        assert_eq!(a, b);
    }

    #[test]
    fn test_terminal_failure_classification() {
        assert!(is_terminal_failure("fatal: repository not found"));
        assert!(is_terminal_failure("fatal: Authentication failed for ..."));
        assert!(is_terminal_failure("git@github.com: Permission denied (publickey)."));
        assert!(!is_terminal_failure("error: RPC failed; curl 56 connection reset"));
        assert!(!is_terminal_failure("fatal: unable to access: Could not resolve host"));
        assert!(!is_terminal_failure("fatal: the remote end hung up unexpectedly"));
    }

    #[tokio::test]
    async fn test_empty_url_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let acquirer = Acquirer::new(dir.path());
        let err = acquirer
            .acquire(&RepositorySpec::from_url("   "))
            .await
            .unwrap_err();
        assert!(matches!(err, AcquisitionError::InvalidUrl(_)));
    }

    #[tokio::test]
    async fn test_path_locks_serialize_same_path() {
        let locks = Arc::new(PathLocks::new());
        let concurrent = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let path = PathBuf::from("/tmp/same-working-copy");

        let mut handles = Vec::new();
        for _ in 0..8 {
            let locks = Arc::clone(&locks);
            let concurrent = Arc::clone(&concurrent);
            let peak = Arc::clone(&peak);
            let path = path.clone();
            handles.push(tokio::spawn(async move {
                let _guard = locks.lock(&path).await;
                let now = concurrent.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                concurrent.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        // Same path never held by two attempts at once
        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_path_locks_distinct_paths_do_not_contend() {
        let locks = PathLocks::new();
        let _a = locks.lock(Path::new("/tmp/a")).await;
        // Must not deadlock: a different path has its own lock
        let _b = locks.lock(Path::new("/tmp/b")).await;
    }

    #[test]
    fn test_path_for_is_stable() {
        let acquirer = Acquirer::new("/work");
        let spec = RepositorySpec::from_url("https://github.com/acme/etl.git");
        assert_eq!(acquirer.path_for(&spec), PathBuf::from("/work/acme_etl"));
        assert_eq!(acquirer.path_for(&spec), acquirer.path_for(&spec));
    }
}
