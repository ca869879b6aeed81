//! Bounded evidence collection from a working copy.
//!
//! Produces the read-only snapshot consumed by the scoring engine and the
//! narrative-report collaborator: a depth-limited tree listing, a fixed set
//! of interesting files, a naming audit, and the sandbox transcript. Every
//! artifact is truncated independently so one oversized file cannot starve
//! the others' visibility. Pure and deterministic: no external calls, stable
//! ordering everywhere.

use std::ffi::OsStr;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::sandbox::SandboxResult;

/// Interesting file roles, probed in order.
const SLA_FILE_CANDIDATES: &[&str] = &["sla_calculation.py", "src/sla/sla_calculation.py"];
const MAIN_PIPELINE_CANDIDATES: &[&str] =
    &["main.py", "run_pipeline.py", "src/main.py", "src/run_pipeline.py"];

/// Listing limits for the naming audit.
const NAMING_AUDIT_MAX_PY_FILES: usize = 80;
const NAMING_AUDIT_MAX_DATA_FILES: usize = 50;

/// Per-artifact caps applied during collection.
#[derive(Debug, Clone, Copy)]
pub struct EvidenceCaps {
    /// Character cap for each designated file's contents.
    pub file_cap: usize,
    /// Character cap for each captured output stream.
    pub transcript_cap: usize,
    /// Maximum directory depth in the tree listing.
    pub tree_depth: usize,
}

impl Default for EvidenceCaps {
    fn default() -> Self {
        Self {
            file_cap: 4000,
            transcript_cap: 4000,
            tree_depth: 3,
        }
    }
}

/// Bounded textual evidence for one repository. Read-only once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceSnapshot {
    /// Depth-limited tree listing of the repository.
    pub tree: String,
    /// README.md contents, truncated; `None` when absent.
    pub readme: Option<String>,
    /// SLA/business-logic file contents, truncated; `None` when absent.
    pub sla_file: Option<String>,
    /// Main pipeline file contents, truncated; `None` when absent.
    pub main_pipeline: Option<String>,
    /// Folder, Python-file and data-file names for naming checks.
    pub naming_audit: String,
    /// Sandbox stdout, truncated to the transcript cap.
    pub stdout_excerpt: String,
    /// Sandbox stderr, truncated to the transcript cap.
    pub stderr_excerpt: String,
}

/// Truncates to exactly `cap` characters when the input is longer.
pub fn truncate_chars(s: &str, cap: usize) -> String {
    if s.chars().count() <= cap {
        s.to_string()
    } else {
        s.chars().take(cap).collect()
    }
}

/// True for directory entries that carry no evaluation signal: hidden
/// entries, virtualenvs, caches.
pub fn is_noise_dir(name: &OsStr) -> bool {
    let Some(name) = name.to_str() else {
        return true;
    };
    name.starts_with('.')
        || matches!(name, "venv" | "env" | "__pycache__" | "node_modules")
}

/// Builds the snapshot for one working copy and its sandbox result.
pub fn collect(
    repo_path: &Path,
    sandbox: &SandboxResult,
    caps: EvidenceCaps,
) -> EvidenceSnapshot {
    let read_role = |candidates: &[&str]| -> Option<String> {
        candidates.iter().find_map(|rel| {
            let p = repo_path.join(rel);
            p.is_file()
                .then(|| fs::read_to_string(&p).ok())
                .flatten()
                .map(|text| truncate_chars(&text, caps.file_cap))
        })
    };

    EvidenceSnapshot {
        tree: tree_listing(repo_path, caps.tree_depth),
        readme: read_role(&["README.md"]),
        sla_file: read_role(SLA_FILE_CANDIDATES),
        main_pipeline: read_role(MAIN_PIPELINE_CANDIDATES),
        naming_audit: naming_audit(repo_path),
        stdout_excerpt: truncate_chars(&sandbox.stdout, caps.transcript_cap),
        stderr_excerpt: truncate_chars(&sandbox.stderr, caps.transcript_cap),
    }
}

/// Sorted directory entries: directories first, then files, each
/// case-insensitively by name. Noise entries are dropped.
fn sorted_entries(dir: &Path) -> Vec<std::path::PathBuf> {
    let Ok(read) = fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut entries: Vec<_> = read
        .filter_map(Result::ok)
        .map(|e| e.path())
        .filter(|p| !p.file_name().map(is_noise_dir).unwrap_or(true))
        .collect();
    entries.sort_by_key(|p| {
        (
            p.is_file(),
            p.file_name()
                .map(|n| n.to_string_lossy().to_lowercase())
                .unwrap_or_default(),
        )
    });
    entries
}

/// Renders a depth-bounded tree with box-drawing branches.
fn tree_listing(root: &Path, max_depth: usize) -> String {
    fn walk(dir: &Path, prefix: &str, depth: usize, max_depth: usize, out: &mut Vec<String>) {
        if depth >= max_depth {
            return;
        }
        let entries = sorted_entries(dir);
        let count = entries.len();
        for (i, path) in entries.iter().enumerate() {
            let is_last = i == count - 1;
            let branch = if is_last { "└── " } else { "├── " };
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            out.push(format!("{prefix}{branch}{name}"));
            if path.is_dir() {
                let ext = if is_last { "    " } else { "│   " };
                walk(path, &format!("{prefix}{ext}"), depth + 1, max_depth, out);
            }
        }
    }
    let mut lines = Vec::new();
    walk(root, "", 0, max_depth, &mut lines);
    lines.join("\n")
}

/// Collects folder and file names relevant to the naming-conventions checks.
fn naming_audit(repo_path: &Path) -> String {
    let mut lines = Vec::new();
    for path in sorted_entries(repo_path) {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        if path.is_dir() {
            lines.push(format!("folder: {name}/"));
            for child in sorted_entries(&path) {
                let child_name = child
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                let suffix = if child.is_dir() { "/" } else { "" };
                lines.push(format!("  {child_name}{suffix}"));
            }
        } else {
            lines.push(format!("file: {name}"));
        }
    }

    let mut py_files: Vec<String> = Vec::new();
    for base in ["src", "ingestion", "tests", "."] {
        let dir = if base == "." {
            repo_path.to_path_buf()
        } else {
            repo_path.join(base)
        };
        if !dir.is_dir() {
            continue;
        }
        for entry in walkdir::WalkDir::new(&dir)
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !is_noise_dir(e.file_name()))
            .filter_map(Result::ok)
        {
            if entry.file_type().is_file() && entry.path().extension().is_some_and(|e| e == "py") {
                if let Ok(rel) = entry.path().strip_prefix(repo_path) {
                    py_files.push(rel.to_string_lossy().replace('\\', "/"));
                }
            }
        }
    }
    py_files.sort();
    py_files.dedup();
    if !py_files.is_empty() {
        lines.push("\nPython files:".to_string());
        for f in py_files.into_iter().take(NAMING_AUDIT_MAX_PY_FILES) {
            lines.push(format!("  {f}"));
        }
    }

    let data_dir = repo_path.join("data");
    if data_dir.is_dir() {
        let mut data_files: Vec<String> = walkdir::WalkDir::new(&data_dir)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_file())
            .filter_map(|e| {
                e.path()
                    .strip_prefix(repo_path)
                    .ok()
                    .map(|rel| rel.to_string_lossy().replace('\\', "/"))
            })
            .collect();
        data_files.sort();
        if !data_files.is_empty() {
            lines.push("\nData files:".to_string());
            for f in data_files.into_iter().take(NAMING_AUDIT_MAX_DATA_FILES) {
                lines.push(format!("  {f}"));
            }
        }
    }

    if lines.is_empty() {
        "(none)".to_string()
    } else {
        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::{EntrypointDecision, SandboxStatus};
    use std::time::Duration;

    fn sandbox_result(stdout: &str, stderr: &str) -> SandboxResult {
        SandboxResult {
            status: SandboxStatus::Succeeded,
            entrypoint: EntrypointDecision::AutoDiscovered {
                command: "python main.py".to_string(),
            },
            exit_code: Some(0),
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
            duration: Duration::from_secs(1),
            gold_generated: false,
            error: None,
        }
    }

    #[test]
    fn test_truncate_chars_exact_cap() {
        let long = "x".repeat(10_000);
        let out = truncate_chars(&long, 4000);
        assert_eq!(out.chars().count(), 4000);

        let short = "hello";
        assert_eq!(truncate_chars(short, 4000), "hello");
    }

    #[test]
    fn test_truncate_chars_multibyte_boundary() {
        let s = "é".repeat(10);
        let out = truncate_chars(&s, 3);
        assert_eq!(out.chars().count(), 3);
        assert_eq!(out, "ééé");
    }

    #[test]
    fn test_collect_truncates_oversized_file_to_cap() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("README.md"), "r".repeat(9000)).unwrap();

        let caps = EvidenceCaps {
            file_cap: 100,
            transcript_cap: 50,
            tree_depth: 3,
        };
        let snapshot = collect(dir.path(), &sandbox_result(&"o".repeat(500), ""), caps);
        assert_eq!(snapshot.readme.as_ref().unwrap().chars().count(), 100);
        assert_eq!(snapshot.stdout_excerpt.chars().count(), 50);
    }

    #[test]
    fn test_collect_missing_files_are_absent() {
        let dir = tempfile::tempdir().unwrap();
        let snapshot = collect(dir.path(), &sandbox_result("", ""), EvidenceCaps::default());
        assert_eq!(snapshot.readme, None);
        assert_eq!(snapshot.sla_file, None);
        assert_eq!(snapshot.main_pipeline, None);
    }

    #[test]
    fn test_tree_depth_bounded() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("a/b/c/d")).unwrap();
        std::fs::write(dir.path().join("a/b/c/d/deep.txt"), "").unwrap();

        let tree = tree_listing(dir.path(), 3);
        assert!(tree.contains("a"));
        assert!(tree.contains("b"));
        assert!(tree.contains("c"));
        // depth 3 cuts off before d's contents, and before d itself
        assert!(!tree.contains("deep.txt"));
        assert!(!tree.contains("d"));
    }

    #[test]
    fn test_tree_skips_noise_dirs() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("__pycache__")).unwrap();
        std::fs::create_dir_all(dir.path().join(".git")).unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();

        let tree = tree_listing(dir.path(), 3);
        assert!(tree.contains("src"));
        assert!(!tree.contains("__pycache__"));
        assert!(!tree.contains(".git"));
    }

    #[test]
    fn test_naming_audit_lists_folders_and_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::create_dir_all(dir.path().join("data/gold")).unwrap();
        std::fs::write(dir.path().join("src/sla_calc.py"), "").unwrap();
        std::fs::write(dir.path().join("data/gold/report.csv"), "").unwrap();
        std::fs::write(dir.path().join("main.py"), "").unwrap();

        let audit = naming_audit(dir.path());
        assert!(audit.contains("folder: src/"));
        assert!(audit.contains("folder: data/"));
        assert!(audit.contains("file: main.py"));
        assert!(audit.contains("src/sla_calc.py"));
        assert!(audit.contains("data/gold/report.csv"));
    }

    #[test]
    fn test_collect_is_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("README.md"), "# demo").unwrap();
        std::fs::write(dir.path().join("main.py"), "print(1)").unwrap();
        std::fs::write(dir.path().join("src/util.py"), "").unwrap();

        let result = sandbox_result("out", "err");
        let a = collect(dir.path(), &result, EvidenceCaps::default());
        let b = collect(dir.path(), &result, EvidenceCaps::default());
        assert_eq!(a, b);
    }
}
