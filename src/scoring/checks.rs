//! Deterministic presence-based checks.
//!
//! Each check is a boolean predicate over the working copy, its evidence
//! snapshot and the sandbox result. The registry is plain data: a dimension
//! key, a check id, a weight, and a function pointer. Scores are computed
//! from passed checks and fixed weights, so the same repository structure
//! always earns the same score.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;

use crate::evidence::{is_noise_dir, EvidenceSnapshot};
use crate::sandbox::{self, SandboxResult};

/// Dimension keys, in report order.
pub const DIM_MEDALLION: &str = "medallion_architecture";
pub const DIM_SLA: &str = "sla_logic";
pub const DIM_ORGANIZATION: &str = "pipeline_organization";
pub const DIM_README: &str = "readme_clarity";
pub const DIM_CODE_QUALITY: &str = "code_quality";
pub const DIM_NAMING: &str = "naming_conventions";
pub const DIM_SENSITIVE: &str = "sensitive_data_exposure";

pub const DIMENSIONS: &[&str] = &[
    DIM_MEDALLION,
    DIM_SLA,
    DIM_ORGANIZATION,
    DIM_README,
    DIM_CODE_QUALITY,
    DIM_NAMING,
    DIM_SENSITIVE,
];

/// Boolean execution signals that join the dimensions as score columns.
pub const COL_PIPELINE_RUNS: &str = "pipeline_runs";
pub const COL_GOLD_GENERATED: &str = "gold_generated";

const FILE_SCAN_CAP: usize = 50_000;
const DATA_FILE_SCAN_CAP: usize = 500_000;
const DOCSTRING_SAMPLE_FILES: usize = 15;

/// Everything a predicate may look at.
pub struct CheckInput<'a> {
    pub repo: &'a Path,
    pub snapshot: &'a EvidenceSnapshot,
    pub sandbox: &'a SandboxResult,
}

/// One registered check. Weights within a dimension are normalized by the
/// engine, so they only need to be consistent relative to each other.
pub struct CheckDefinition {
    pub dimension: &'static str,
    pub id: &'static str,
    pub weight: u32,
    pub predicate: fn(&CheckInput) -> bool,
}

pub static REGISTRY: &[CheckDefinition] = &[
    CheckDefinition {
        dimension: DIM_MEDALLION,
        id: "has_raw_layer",
        weight: 20,
        predicate: has_raw_layer,
    },
    CheckDefinition {
        dimension: DIM_MEDALLION,
        id: "has_bronze_layer",
        weight: 20,
        predicate: has_bronze_layer,
    },
    CheckDefinition {
        dimension: DIM_MEDALLION,
        id: "has_silver_layer",
        weight: 20,
        predicate: has_silver_layer,
    },
    CheckDefinition {
        dimension: DIM_MEDALLION,
        id: "has_gold_layer",
        weight: 20,
        predicate: has_gold_layer,
    },
    CheckDefinition {
        dimension: DIM_MEDALLION,
        id: "pipeline_orchestrates_layers",
        weight: 20,
        predicate: pipeline_orchestrates_layers,
    },
    CheckDefinition {
        dimension: DIM_SLA,
        id: "has_sla_calculation_file",
        weight: 20,
        predicate: has_sla_calculation_file,
    },
    CheckDefinition {
        dimension: DIM_SLA,
        id: "gold_has_csv_reports",
        weight: 20,
        predicate: gold_has_csv_reports,
    },
    CheckDefinition {
        dimension: DIM_SLA,
        id: "gold_has_parquet",
        weight: 20,
        predicate: gold_has_parquet,
    },
    CheckDefinition {
        dimension: DIM_SLA,
        id: "code_references_business_hours_or_sla",
        weight: 20,
        predicate: code_references_business_hours_or_sla,
    },
    CheckDefinition {
        dimension: DIM_SLA,
        id: "gold_has_sla_related_columns",
        weight: 20,
        predicate: gold_has_sla_related_columns,
    },
    CheckDefinition {
        dimension: DIM_ORGANIZATION,
        id: "has_main_or_run_pipeline",
        weight: 25,
        predicate: has_main_or_run_pipeline,
    },
    CheckDefinition {
        dimension: DIM_ORGANIZATION,
        id: "has_requirements_txt",
        weight: 25,
        predicate: has_requirements_txt,
    },
    CheckDefinition {
        dimension: DIM_ORGANIZATION,
        id: "has_config_or_env_example",
        weight: 25,
        predicate: has_config_or_env_example,
    },
    CheckDefinition {
        dimension: DIM_ORGANIZATION,
        id: "has_clear_entrypoint",
        weight: 25,
        predicate: has_clear_entrypoint,
    },
    CheckDefinition {
        dimension: DIM_README,
        id: "has_readme",
        weight: 40,
        predicate: has_readme,
    },
    CheckDefinition {
        dimension: DIM_README,
        id: "readme_mentions_run_or_usage",
        weight: 30,
        predicate: readme_mentions_run_or_usage,
    },
    CheckDefinition {
        dimension: DIM_README,
        id: "readme_substantive",
        weight: 30,
        predicate: readme_substantive,
    },
    CheckDefinition {
        dimension: DIM_CODE_QUALITY,
        id: "has_src_or_ingestion_structure",
        weight: 20,
        predicate: has_src_or_ingestion_structure,
    },
    CheckDefinition {
        dimension: DIM_CODE_QUALITY,
        id: "has_docstrings_or_type_hints",
        weight: 20,
        predicate: has_docstrings_or_type_hints,
    },
    CheckDefinition {
        dimension: DIM_CODE_QUALITY,
        id: "no_hardcoded_credentials_in_code",
        weight: 30,
        predicate: no_hardcoded_credentials_in_code,
    },
    CheckDefinition {
        dimension: DIM_CODE_QUALITY,
        id: "uses_environment_variables",
        weight: 15,
        predicate: uses_environment_variables,
    },
    CheckDefinition {
        dimension: DIM_CODE_QUALITY,
        id: "config_files_free_of_secrets",
        weight: 15,
        predicate: config_files_free_of_secrets,
    },
    CheckDefinition {
        dimension: DIM_NAMING,
        id: "folders_lowercase_or_snake",
        weight: 25,
        predicate: folders_lowercase_or_snake,
    },
    CheckDefinition {
        dimension: DIM_NAMING,
        id: "python_files_snake_case",
        weight: 25,
        predicate: python_files_snake_case,
    },
    CheckDefinition {
        dimension: DIM_NAMING,
        id: "data_paths_use_layer_names",
        weight: 25,
        predicate: data_paths_use_layer_names,
    },
    CheckDefinition {
        dimension: DIM_NAMING,
        id: "has_common_folders",
        weight: 25,
        predicate: has_common_folders,
    },
    CheckDefinition {
        dimension: DIM_SENSITIVE,
        id: "no_pii_in_source_files",
        weight: 34,
        predicate: no_pii_in_source_files,
    },
    CheckDefinition {
        dimension: DIM_SENSITIVE,
        id: "no_pii_in_medallion_data_files",
        weight: 33,
        predicate: no_pii_in_medallion_data_files,
    },
    CheckDefinition {
        dimension: DIM_SENSITIVE,
        id: "env_file_gitignored",
        weight: 33,
        predicate: env_file_gitignored,
    },
];

/// Actionable suggestion for a failed check, for the deterministic report.
pub fn improvement_for(check_id: &str) -> Option<&'static str> {
    let text = match check_id {
        "has_raw_layer" => {
            "Add a raw layer (e.g. data/raw) to improve traceability and reprocessing capability."
        }
        "has_bronze_layer" => "Add a bronze layer (e.g. data/bronze) for normalized raw data.",
        "has_silver_layer" => "Add a silver layer (e.g. data/silver) for enriched/cleaned data.",
        "has_gold_layer" => {
            "Add a gold layer (e.g. data/gold) for business-ready outputs and reports."
        }
        "pipeline_orchestrates_layers" => {
            "Ensure the main pipeline orchestrates all medallion layers (raw, bronze, silver, gold) in sequence."
        }
        "has_sla_calculation_file" => {
            "Add an SLA calculation module (e.g. sla_calculation.py or src/sla/sla_calculation.py)."
        }
        "gold_has_csv_reports" => {
            "Produce at least one CSV report from the gold layer (e.g. average SLA by analyst or by ticket type)."
        }
        "gold_has_parquet" => {
            "Consider producing Parquet outputs from the gold layer for efficient storage and querying."
        }
        "code_references_business_hours_or_sla" => {
            "Implement or reference business-hours or SLA logic in code (e.g. resolution time in business hours)."
        }
        "gold_has_sla_related_columns" => {
            "Include SLA-related columns in gold outputs (e.g. resolution time, expected SLA, is_sla_met)."
        }
        "has_main_or_run_pipeline" => {
            "Add a clear pipeline entrypoint (main.py or run_pipeline.py)."
        }
        "has_requirements_txt" => "Add requirements.txt for reproducible dependencies.",
        "has_config_or_env_example" => {
            "Add configuration (e.g. config.py, .env.example, or config.yaml) for environment-specific settings."
        }
        "has_clear_entrypoint" => {
            "Ensure a discoverable entrypoint (main.py, run_pipeline.py, or src/main.py)."
        }
        "has_readme" => "Add a README.md with project description and usage.",
        "readme_mentions_run_or_usage" => {
            "Improve README by adding run/usage instructions (e.g. how to run the pipeline)."
        }
        "readme_substantive" => {
            "Improve README with more substantive content (e.g. pipeline architecture section and execution instructions)."
        }
        "has_src_or_ingestion_structure" => {
            "Organize code under src/ or ingestion/ for clearer structure."
        }
        "has_docstrings_or_type_hints" => {
            "Add docstrings or type hints to improve code clarity and maintainability."
        }
        "no_hardcoded_credentials_in_code" => {
            "Move hardcoded credentials from code to environment variables (e.g. .env); do not commit secrets."
        }
        "uses_environment_variables" => {
            "Read credentials and environment-specific settings via os.getenv or os.environ instead of literals."
        }
        "config_files_free_of_secrets" => {
            "Remove credential-like values from config files (config.yaml, config.json); load them from the environment instead."
        }
        "folders_lowercase_or_snake" => {
            "Use lowercase snake_case for folder names (e.g. data, src, config)."
        }
        "python_files_snake_case" => {
            "Rename Python files to snake_case to follow Python naming standards (e.g. process_data.py not ProcessData.py)."
        }
        "data_paths_use_layer_names" => {
            "Use medallion layer names in data paths (e.g. data/raw, data/bronze, data/silver, data/gold)."
        }
        "has_common_folders" => "Adopt common project folders (e.g. src, data, config, tests).",
        "no_pii_in_source_files" => {
            "Remove emails or other PII from source files; use config or environment variables for sensitive data."
        }
        "no_pii_in_medallion_data_files" => {
            "Remove emails or other PII from JSON/CSV/Parquet in data/ (raw, bronze, silver, gold), or add those files to .gitignore so they are not committed."
        }
        "env_file_gitignored" => {
            "Add .env to .gitignore so local credentials are never committed."
        }
        _ => return None,
    };
    Some(text)
}

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

fn read_file_capped(path: &Path, cap: usize) -> String {
    if !path.is_file() {
        return String::new();
    }
    match fs::read(path) {
        Ok(bytes) => {
            let text = String::from_utf8_lossy(&bytes);
            if text.len() > cap {
                text.chars().take(cap).collect()
            } else {
                text.into_owned()
            }
        }
        Err(_) => String::new(),
    }
}

/// Python files under `base`, recursive, noise directories skipped, sorted
/// for stable iteration.
fn python_files_under(base: &Path) -> Vec<PathBuf> {
    if !base.is_dir() {
        return Vec::new();
    }
    let mut files: Vec<PathBuf> = walkdir::WalkDir::new(base)
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_noise_dir(e.file_name()))
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file() && e.path().extension().is_some_and(|x| x == "py"))
        .map(|e| e.into_path())
        .collect();
    files.sort();
    files
}

fn email_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b").expect("static regex")
    })
}

// International (+prefix) or US-style (xxx) xxx-xxxx; avoids version numbers
// and IP addresses.
fn phone_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?:\+\d{1,3}[-.\s]?\d{2,}(?:[-.\s]?\d{2,}){2,}|\(\d{3}\)\s*\d{3}[-.]?\d{4})\b",
        )
        .expect("static regex")
    })
}

pub(crate) fn text_has_pii(text: &str) -> bool {
    email_re().is_match(text) || phone_re().is_match(text)
}

fn credential_res() -> &'static Vec<Regex> {
    static RES: OnceLock<Vec<Regex>> = OnceLock::new();
    RES.get_or_init(|| {
        [
            r#"(?i)\b(?:api_key|apikey)\s*=\s*["'][^"']+["']"#,
            r#"(?i)\bpassword\s*=\s*["'][^"']*["']"#,
            r#"(?i)\bclient_secret\s*=\s*["'][^"']+["']"#,
            r#"(?i)\b(?:secret_key|secret)\s*=\s*["'][^"']+["']"#,
            r#"(?i)\b(?:access_key|access_token|token)\s*=\s*["'][^"']+["']"#,
            r#"(?i)\b(?:connection_string|conn_str|connection_str)\s*=\s*["'][^"']+["']"#,
            r"(?im)^\s*ACCESS_KEY\s*=\s*.+",
            r"(?im)^\s*SECRET_KEY\s*=\s*.+",
            r"(?im)^\s*SECRET_ACCESS_KEY\s*=\s*.+",
            r"\bsk-[a-zA-Z0-9]{20,}\b",
        ]
        .iter()
        .map(|p| Regex::new(p).expect("static regex"))
        .collect()
    })
}

pub(crate) fn has_hardcoded_credentials(content: &str) -> bool {
    credential_res().iter().any(|re| re.is_match(content))
}

/// True when any path segment marks the file as outside candidate source
/// (hidden directories, virtualenvs, caches).
fn in_noise_path(repo: &Path, file: &Path) -> bool {
    let Ok(rel) = file.strip_prefix(repo) else {
        return true;
    };
    rel.iter().any(is_noise_dir)
}

fn top_level_dirs(repo: &Path) -> Vec<PathBuf> {
    let Ok(read) = fs::read_dir(repo) else {
        return Vec::new();
    };
    let mut dirs: Vec<PathBuf> = read
        .filter_map(Result::ok)
        .map(|e| e.path())
        .filter(|p| p.is_dir() && !p.file_name().map(is_noise_dir).unwrap_or(true))
        .collect();
    dirs.sort();
    dirs
}

// ---------------------------------------------------------------------------
// Medallion architecture
// ---------------------------------------------------------------------------

fn has_raw_layer(input: &CheckInput) -> bool {
    input.repo.join("data/raw").is_dir()
}

fn has_bronze_layer(input: &CheckInput) -> bool {
    input.repo.join("data/bronze").is_dir()
}

fn has_silver_layer(input: &CheckInput) -> bool {
    input.repo.join("data/silver").is_dir()
}

fn has_gold_layer(input: &CheckInput) -> bool {
    input.repo.join("data/gold").is_dir()
}

fn pipeline_orchestrates_layers(input: &CheckInput) -> bool {
    let mut content = String::new();
    for rel in ["main.py", "src/main.py", "run_pipeline.py"] {
        content.push_str(&read_file_capped(&input.repo.join(rel), FILE_SCAN_CAP));
    }
    let lower = content.to_lowercase();
    lower.contains("bronze") && lower.contains("silver") && lower.contains("gold")
}

// ---------------------------------------------------------------------------
// SLA logic
// ---------------------------------------------------------------------------

fn has_sla_calculation_file(input: &CheckInput) -> bool {
    input.repo.join("sla_calculation.py").is_file()
        || input.repo.join("src/sla/sla_calculation.py").is_file()
}

fn gold_has_csv_reports(input: &CheckInput) -> bool {
    sandbox::gold_has_csv(input.repo)
}

fn gold_has_parquet(input: &CheckInput) -> bool {
    let gold = input.repo.join("data/gold");
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
                    .is_some_and(|x| x.eq_ignore_ascii_case("parquet"))
        })
}

fn sla_reference_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)business.?hour|sla|resolution.?hour").expect("static regex"))
}

fn code_references_business_hours_or_sla(input: &CheckInput) -> bool {
    python_files_under(input.repo).iter().any(|py| {
        sla_reference_re().is_match(&read_file_capped(py, FILE_SCAN_CAP))
    })
}

fn gold_has_sla_related_columns(input: &CheckInput) -> bool {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(r"(?i)sla|resolution|business.?hour|is_sla_met").expect("static regex")
    });
    ["src/gold", "gold", "src"].iter().any(|rel| {
        python_files_under(&input.repo.join(rel))
            .iter()
            .any(|py| re.is_match(&read_file_capped(py, FILE_SCAN_CAP)))
    })
}

// ---------------------------------------------------------------------------
// Pipeline organization
// ---------------------------------------------------------------------------

fn has_main_or_run_pipeline(input: &CheckInput) -> bool {
    input.repo.join("main.py").is_file()
        || input.repo.join("run_pipeline.py").is_file()
        || input.repo.join("src/main.py").is_file()
}

fn has_requirements_txt(input: &CheckInput) -> bool {
    input.repo.join("requirements.txt").is_file()
}

fn has_config_or_env_example(input: &CheckInput) -> bool {
    [
        "config.py",
        ".env.example",
        ".env.sample",
        "config.yaml",
        "src/utils/config.py",
    ]
    .iter()
    .any(|rel| input.repo.join(rel).is_file())
}

fn has_clear_entrypoint(input: &CheckInput) -> bool {
    sandbox::entrypoint::probe(input.repo).is_some()
}

// ---------------------------------------------------------------------------
// Readme clarity
// ---------------------------------------------------------------------------

fn has_readme(input: &CheckInput) -> bool {
    input.repo.join("README.md").is_file()
}

fn readme_mentions_run_or_usage(input: &CheckInput) -> bool {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(r"(?i)run|usage|quick.?start|how to|install|setup").expect("static regex")
    });
    re.is_match(&read_file_capped(&input.repo.join("README.md"), FILE_SCAN_CAP))
}

fn readme_substantive(input: &CheckInput) -> bool {
    read_file_capped(&input.repo.join("README.md"), FILE_SCAN_CAP)
        .trim()
        .len()
        >= 200
}

// ---------------------------------------------------------------------------
// Code quality
// ---------------------------------------------------------------------------

fn has_src_or_ingestion_structure(input: &CheckInput) -> bool {
    input.repo.join("src").is_dir() || input.repo.join("ingestion").is_dir()
}

fn has_docstrings_or_type_hints(input: &CheckInput) -> bool {
    static HINT_RE: OnceLock<Regex> = OnceLock::new();
    let hint_re = HINT_RE
        .get_or_init(|| Regex::new(r"def\s+\w+\([^)]*:\s*[\w\[\]]+").expect("static regex"));
    for base in [
        input.repo.join("src"),
        input.repo.join("ingestion"),
        input.repo.to_path_buf(),
    ] {
        for py in python_files_under(&base).into_iter().take(DOCSTRING_SAMPLE_FILES) {
            let content = read_file_capped(&py, FILE_SCAN_CAP);
            if content.contains("\"\"\"") || content.contains("'''") || hint_re.is_match(&content)
            {
                return true;
            }
        }
    }
    false
}

fn no_hardcoded_credentials_in_code(input: &CheckInput) -> bool {
    !python_files_under(input.repo)
        .iter()
        .filter(|py| !in_noise_path(input.repo, py))
        .any(|py| has_hardcoded_credentials(&read_file_capped(py, FILE_SCAN_CAP)))
}

fn env_var_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\bos\.getenv\s*\(|\bos\.environ\s*\[|\bos\.environ\.get\s*\(")
            .expect("static regex")
    })
}

fn uses_environment_variables(input: &CheckInput) -> bool {
    python_files_under(input.repo)
        .iter()
        .filter(|py| !in_noise_path(input.repo, py))
        .any(|py| env_var_re().is_match(&read_file_capped(py, FILE_SCAN_CAP)))
}

const CONFIG_FILE_NAMES: &[&str] = &[
    "config.yaml",
    "config.yml",
    "config.json",
    "configuration.yaml",
    "configuration.json",
];

// key: value pairs whose value looks like a committed secret.
fn config_secret_value_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?i)(?:password|secret|api_key|token|key):\s*["']?[a-zA-Z0-9_\-]{8,}"#)
            .expect("static regex")
    })
}

fn config_files_free_of_secrets(input: &CheckInput) -> bool {
    CONFIG_FILE_NAMES.iter().all(|name| {
        let content = read_file_capped(&input.repo.join(name), FILE_SCAN_CAP);
        !has_hardcoded_credentials(&content) && !config_secret_value_re().is_match(&content)
    })
}

// ---------------------------------------------------------------------------
// Naming conventions
// ---------------------------------------------------------------------------

fn snake_case_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-z][a-z0-9_]*$").expect("static regex"))
}

fn folders_lowercase_or_snake(input: &CheckInput) -> bool {
    top_level_dirs(input.repo).iter().all(|dir| {
        dir.file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|name| snake_case_re().is_match(name))
    })
}

// File stems that are conventional despite not matching snake_case.
const PYTHON_CONVENTIONAL_STEMS: &[&str] = &["__init__", "__main__"];

fn python_files_snake_case(input: &CheckInput) -> bool {
    for base in [
        input.repo.join("src"),
        input.repo.join("ingestion"),
        input.repo.to_path_buf(),
    ] {
        for py in python_files_under(&base) {
            let Some(stem) = py.file_stem().and_then(|s| s.to_str()) else {
                return false;
            };
            if PYTHON_CONVENTIONAL_STEMS.contains(&stem) {
                continue;
            }
            if !snake_case_re().is_match(stem) {
                return false;
            }
        }
    }
    true
}

const MEDALLION_LAYERS: &[&str] = &["raw", "bronze", "silver", "gold"];

fn data_paths_use_layer_names(input: &CheckInput) -> bool {
    let data = input.repo.join("data");
    if !data.is_dir() {
        return true;
    }
    walkdir::WalkDir::new(&data)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .any(|e| {
            e.path()
                .strip_prefix(&data)
                .ok()
                .and_then(|rel| rel.iter().next())
                .and_then(|first| first.to_str())
                .is_some_and(|first| MEDALLION_LAYERS.contains(&first.to_lowercase().as_str()))
        })
}

fn has_common_folders(input: &CheckInput) -> bool {
    top_level_dirs(input.repo).iter().any(|dir| {
        dir.file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|name| {
                matches!(name.to_lowercase().as_str(), "src" | "data" | "config" | "tests")
            })
    })
}

// ---------------------------------------------------------------------------
// Sensitive data exposure
// ---------------------------------------------------------------------------

fn no_pii_in_source_files(input: &CheckInput) -> bool {
    for base in [input.repo.join("src"), input.repo.join("ingestion")] {
        for py in python_files_under(&base) {
            if text_has_pii(&read_file_capped(&py, FILE_SCAN_CAP)) {
                return false;
            }
        }
    }
    // Root-level scripts, non-recursive.
    let Ok(read) = fs::read_dir(input.repo) else {
        return true;
    };
    for entry in read.filter_map(Result::ok) {
        let path = entry.path();
        if path.is_file()
            && path.extension().is_some_and(|x| x == "py")
            && text_has_pii(&read_file_capped(&path, FILE_SCAN_CAP))
        {
            return false;
        }
    }
    true
}

/// Normalized .gitignore patterns, comments and blanks stripped.
fn gitignore_patterns(repo: &Path) -> Vec<String> {
    read_file_capped(&repo.join(".gitignore"), FILE_SCAN_CAP)
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(|l| l.replace('\\', "/"))
        .collect()
}

/// Loose gitignore matching: exact path, glob with `*`/`**`/`?`, or a
/// directory pattern covering everything beneath it.
fn is_gitignored(rel_path: &str, patterns: &[String]) -> bool {
    patterns.iter().any(|pattern| {
        let trimmed = pattern.trim_end_matches('/');
        if rel_path == trimmed || rel_path.starts_with(&format!("{trimmed}/")) {
            return true;
        }
        glob_to_regex(pattern).is_some_and(|re| {
            re.is_match(rel_path) || re.is_match(rel_path.rsplit('/').next().unwrap_or(rel_path))
        })
    })
}

fn glob_to_regex(pattern: &str) -> Option<Regex> {
    if !pattern.contains('*') && !pattern.contains('?') {
        return None;
    }
    let mut out = String::from("^");
    let mut chars = pattern.trim_end_matches('/').chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' => {
                if chars.peek() == Some(&'*') {
                    chars.next();
                    out.push_str(".*");
                } else {
                    out.push_str("[^/]*");
                }
            }
            '?' => out.push_str("[^/]"),
            other => out.push_str(&regex::escape(&other.to_string())),
        }
    }
    out.push('$');
    Regex::new(&out).ok()
}

/// PII scan over the string columns of a Parquet file. Unreadable or
/// corrupt files are treated as clean.
fn parquet_has_pii(path: &Path) -> bool {
    use arrow::array::{Array, LargeStringArray, StringArray};
    use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;

    let Ok(file) = fs::File::open(path) else {
        return false;
    };
    let Ok(builder) = ParquetRecordBatchReaderBuilder::try_new(file) else {
        return false;
    };
    let Ok(reader) = builder.build() else {
        return false;
    };
    for batch in reader.filter_map(Result::ok) {
        for column in batch.columns() {
            if let Some(arr) = column.as_any().downcast_ref::<StringArray>() {
                if (0..arr.len()).any(|i| !arr.is_null(i) && text_has_pii(arr.value(i))) {
                    return true;
                }
            } else if let Some(arr) = column.as_any().downcast_ref::<LargeStringArray>() {
                if (0..arr.len()).any(|i| !arr.is_null(i) && text_has_pii(arr.value(i))) {
                    return true;
                }
            }
        }
    }
    false
}

fn no_pii_in_medallion_data_files(input: &CheckInput) -> bool {
    let data = input.repo.join("data");
    if !data.is_dir() {
        return true;
    }
    let patterns = gitignore_patterns(input.repo);
    for layer in MEDALLION_LAYERS {
        let layer_dir = data.join(layer);
        if !layer_dir.is_dir() {
            continue;
        }
        for entry in walkdir::WalkDir::new(&layer_dir)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_file())
        {
            let ext = entry
                .path()
                .extension()
                .and_then(|x| x.to_str())
                .map(str::to_ascii_lowercase)
                .unwrap_or_default();
            let is_data_file = matches!(ext.as_str(), "json" | "csv" | "parquet");
            if !is_data_file {
                continue;
            }
            let rel = entry
                .path()
                .strip_prefix(input.repo)
                .map(|r| r.to_string_lossy().replace('\\', "/"))
                .unwrap_or_default();
            if is_gitignored(&rel, &patterns) {
                continue;
            }
            let has_pii = if ext == "parquet" {
                parquet_has_pii(entry.path())
            } else {
                text_has_pii(&read_file_capped(entry.path(), DATA_FILE_SCAN_CAP))
            };
            if has_pii {
                return false;
            }
        }
    }
    true
}

fn env_file_gitignored(input: &CheckInput) -> bool {
    if !input.repo.join(".env").exists() {
        return true;
    }
    gitignore_patterns(input.repo)
        .iter()
        .any(|line| line == ".env" || line.starts_with(".env"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evidence::{collect, EvidenceCaps};
    use crate::sandbox::{EntrypointDecision, SandboxStatus};
    use std::time::Duration;
    use tempfile::TempDir;

    fn sandbox_ok() -> SandboxResult {
        SandboxResult {
            status: SandboxStatus::Succeeded,
            entrypoint: EntrypointDecision::AutoDiscovered {
                command: "python main.py".to_string(),
            },
            exit_code: Some(0),
            stdout: String::new(),
            stderr: String::new(),
            duration: Duration::from_secs(1),
            gold_generated: true,
            error: None,
        }
    }

    fn run_check(dir: &TempDir, id: &str) -> bool {
        let sandbox = sandbox_ok();
        let snapshot = collect(dir.path(), &sandbox, EvidenceCaps::default());
        let input = CheckInput {
            repo: dir.path(),
            snapshot: &snapshot,
            sandbox: &sandbox,
        };
        let def = REGISTRY
            .iter()
            .find(|d| d.id == id)
            .unwrap_or_else(|| panic!("unknown check id {id}"));
        (def.predicate)(&input)
    }

    #[test]
    fn test_registry_ids_unique_and_dimensions_known() {
        let mut seen = std::collections::BTreeSet::new();
        for def in REGISTRY {
            assert!(seen.insert(def.id), "duplicate check id {}", def.id);
            assert!(
                DIMENSIONS.contains(&def.dimension),
                "unknown dimension {}",
                def.dimension
            );
            assert!(def.weight > 0);
        }
        // Every dimension carries at least one check.
        for dim in DIMENSIONS {
            assert!(REGISTRY.iter().any(|d| d.dimension == *dim));
        }
    }

    #[test]
    fn test_medallion_layer_checks() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("data/raw")).unwrap();
        std::fs::create_dir_all(dir.path().join("data/gold")).unwrap();

        assert!(run_check(&dir, "has_raw_layer"));
        assert!(run_check(&dir, "has_gold_layer"));
        assert!(!run_check(&dir, "has_bronze_layer"));
        assert!(!run_check(&dir, "has_silver_layer"));
    }

    #[test]
    fn test_pipeline_orchestrates_layers_needs_all_three() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("main.py"),
            "run_bronze()\nrun_silver()\nrun_gold()\n",
        )
        .unwrap();
        assert!(run_check(&dir, "pipeline_orchestrates_layers"));

        let partial = tempfile::tempdir().unwrap();
        std::fs::write(partial.path().join("main.py"), "run_bronze()\n").unwrap();
        assert!(!run_check(&partial, "pipeline_orchestrates_layers"));
    }

    #[test]
    fn test_readme_checks() {
        let dir = tempfile::tempdir().unwrap();
        let body = format!("# Pipeline\n\n## Usage\n\nRun `python main.py`.\n{}", "x".repeat(200));
        std::fs::write(dir.path().join("README.md"), body).unwrap();

        assert!(run_check(&dir, "has_readme"));
        assert!(run_check(&dir, "readme_mentions_run_or_usage"));
        assert!(run_check(&dir, "readme_substantive"));

        let thin = tempfile::tempdir().unwrap();
        std::fs::write(thin.path().join("README.md"), "# x").unwrap();
        assert!(!run_check(&thin, "readme_substantive"));
    }

    #[test]
    fn test_hardcoded_credentials_fail_the_check() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::write(
            dir.path().join("src/config.py"),
            "api_key = \"abc123secret\"\n",
        )
        .unwrap();
        assert!(!run_check(&dir, "no_hardcoded_credentials_in_code"));

        let clean = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(clean.path().join("src")).unwrap();
        std::fs::write(
            clean.path().join("src/config.py"),
            "import os\napi_key = os.getenv(\"API_KEY\")\n",
        )
        .unwrap();
        assert!(run_check(&clean, "no_hardcoded_credentials_in_code"));
    }

    #[test]
    fn test_python_files_snake_case() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("src/__init__.py"), "").unwrap();
        std::fs::write(dir.path().join("src/process_data.py"), "").unwrap();
        assert!(run_check(&dir, "python_files_snake_case"));

        std::fs::write(dir.path().join("src/ProcessData.py"), "").unwrap();
        assert!(!run_check(&dir, "python_files_snake_case"));
    }

    #[test]
    fn test_pii_in_source_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::write(
            dir.path().join("src/notify.py"),
            "CONTACT = \"jane.doe@example.com\"\n",
        )
        .unwrap();
        assert!(!run_check(&dir, "no_pii_in_source_files"));
    }

    #[test]
    fn test_phone_pattern_ignores_version_numbers() {
        assert!(!text_has_pii("version = \"1.2.3\""));
        assert!(!text_has_pii("host = \"10.0.0.1\""));
        assert!(text_has_pii("call us at +1 555 123 4567"));
        assert!(text_has_pii("call (555) 123-4567"));
    }

    fn write_parquet_column(path: &std::path::Path, name: &str, values: &[&str]) {
        use arrow::array::{ArrayRef, StringArray};
        use arrow::datatypes::{DataType, Field, Schema};
        use arrow::record_batch::RecordBatch;
        use parquet::arrow::ArrowWriter;
        use std::sync::Arc;

        let schema = Arc::new(Schema::new(vec![Field::new(name, DataType::Utf8, false)]));
        let col: ArrayRef = Arc::new(StringArray::from(values.to_vec()));
        let batch = RecordBatch::try_new(schema.clone(), vec![col]).unwrap();
        let file = std::fs::File::create(path).unwrap();
        let mut writer = ArrowWriter::try_new(file, schema, None).unwrap();
        writer.write(&batch).unwrap();
        writer.close().unwrap();
    }

    #[test]
    fn test_pii_in_parquet_data_fails_the_check() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("data/gold")).unwrap();
        write_parquet_column(
            &dir.path().join("data/gold/report.parquet"),
            "reporter_email",
            &["jane.doe@example.com"],
        );
        assert!(!run_check(&dir, "no_pii_in_medallion_data_files"));

        // Gitignored Parquet outputs are exempt, like JSON/CSV.
        std::fs::write(dir.path().join(".gitignore"), "data/gold/\n").unwrap();
        assert!(run_check(&dir, "no_pii_in_medallion_data_files"));
    }

    #[test]
    fn test_clean_parquet_data_passes_the_check() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("data/gold")).unwrap();
        write_parquet_column(
            &dir.path().join("data/gold/report.parquet"),
            "analyst_id",
            &["A-001", "A-002"],
        );
        // A corrupt parquet file is treated as clean rather than failing the run.
        std::fs::write(dir.path().join("data/gold/broken.parquet"), b"not parquet").unwrap();
        assert!(run_check(&dir, "no_pii_in_medallion_data_files"));
    }

    #[test]
    fn test_env_file_must_be_gitignored() {
        let no_env = tempfile::tempdir().unwrap();
        assert!(run_check(&no_env, "env_file_gitignored"));

        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(".env"), "API_KEY=abc123secret\n").unwrap();
        assert!(!run_check(&dir, "env_file_gitignored"));

        std::fs::write(dir.path().join(".gitignore"), "*.pyc\n.env\n").unwrap();
        assert!(run_check(&dir, "env_file_gitignored"));
    }

    #[test]
    fn test_uses_environment_variables() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("settings.py"),
            "import os\nKEY = os.getenv(\"API_KEY\")\n",
        )
        .unwrap();
        assert!(run_check(&dir, "uses_environment_variables"));

        let literal = tempfile::tempdir().unwrap();
        std::fs::write(literal.path().join("settings.py"), "KEY = \"value\"\n").unwrap();
        assert!(!run_check(&literal, "uses_environment_variables"));
    }

    #[test]
    fn test_config_files_with_secrets_fail_the_check() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("config.yaml"),
            "database:\n  password: hunter2secret\n",
        )
        .unwrap();
        assert!(!run_check(&dir, "config_files_free_of_secrets"));

        let clean = tempfile::tempdir().unwrap();
        std::fs::write(
            clean.path().join("config.yaml"),
            "database:\n  host: localhost\n  port: 5432\n",
        )
        .unwrap();
        assert!(run_check(&clean, "config_files_free_of_secrets"));
    }

    #[test]
    fn test_pii_in_data_respects_gitignore() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("data/raw")).unwrap();
        std::fs::write(
            dir.path().join("data/raw/tickets.json"),
            "{\"reporter\": \"jane.doe@example.com\"}",
        )
        .unwrap();
        assert!(!run_check(&dir, "no_pii_in_medallion_data_files"));

        std::fs::write(dir.path().join(".gitignore"), "data/raw/\n").unwrap();
        assert!(run_check(&dir, "no_pii_in_medallion_data_files"));
    }

    #[test]
    fn test_gitignore_glob_patterns() {
        let patterns = vec!["data/**/*.json".to_string(), "*.csv".to_string()];
        assert!(is_gitignored("data/raw/tickets.json", &patterns));
        assert!(is_gitignored("data/gold/report.csv", &patterns));
        assert!(!is_gitignored("data/gold/report.parquet", &patterns));
    }

    #[test]
    fn test_data_paths_use_layer_names() {
        let no_data = tempfile::tempdir().unwrap();
        assert!(run_check(&no_data, "data_paths_use_layer_names"));

        let layered = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(layered.path().join("data/bronze")).unwrap();
        std::fs::write(layered.path().join("data/bronze/t.json"), "{}").unwrap();
        assert!(run_check(&layered, "data_paths_use_layer_names"));

        let flat = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(flat.path().join("data")).unwrap();
        std::fs::write(flat.path().join("data/everything.json"), "{}").unwrap();
        assert!(!run_check(&flat, "data_paths_use_layer_names"));
    }
}
