//! Input/output boundary for evaluation rows.
//!
//! Rows are JSON Lines: one object per candidate with a `repo_url` field and
//! arbitrary passthrough fields (name, email, cohort, ...) that are preserved
//! unmodified in the output record. Rows without a usable URL are skipped
//! with a warning, not treated as errors.

use std::fs;
use std::path::Path;

use serde_json::{Map, Value};
use tracing::warn;

use crate::error::RosterError;

/// Column that must be present and non-empty for a row to be evaluated.
pub const REPO_URL_FIELD: &str = "repo_url";

/// Identity of one candidate repository: source URL plus passthrough
/// metadata. Immutable once read from input.
#[derive(Debug, Clone, PartialEq)]
pub struct RepositorySpec {
    /// Source URL of the repository.
    pub url: String,
    /// All input fields as read, including `repo_url` itself.
    pub passthrough: Map<String, Value>,
}

impl RepositorySpec {
    /// Builds a spec from a bare URL with no extra fields. Test convenience
    /// and programmatic use.
    pub fn from_url(url: impl Into<String>) -> Self {
        let url = url.into();
        let mut passthrough = Map::new();
        passthrough.insert(REPO_URL_FIELD.to_string(), Value::String(url.clone()));
        Self { url, passthrough }
    }
}

/// Reads evaluation rows from a JSON Lines file.
///
/// Blank lines are ignored. A line that is valid JSON but not an object is a
/// hard error; an object without a non-empty `repo_url` is skipped.
pub fn read_rows(path: &Path) -> Result<Vec<RepositorySpec>, RosterError> {
    if !path.is_file() {
        return Err(RosterError::NotFound(path.display().to_string()));
    }
    let text = fs::read_to_string(path)?;
    let mut rows = Vec::new();
    for (i, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let value: Value = serde_json::from_str(line)?;
        let Value::Object(object) = value else {
            return Err(RosterError::NotAnObject { line: i + 1 });
        };
        let url = object
            .get(REPO_URL_FIELD)
            .and_then(Value::as_str)
            .map(str::trim)
            .unwrap_or_default();
        if url.is_empty() {
            warn!(line = i + 1, "Skipping row without {}", REPO_URL_FIELD);
            continue;
        }
        rows.push(RepositorySpec {
            url: url.to_string(),
            passthrough: object,
        });
    }
    Ok(rows)
}

/// Writes output rows (already merged with passthrough fields) as JSON Lines,
/// creating parent directories if needed.
pub fn write_rows(rows: &[Map<String, Value>], path: &Path) -> Result<(), RosterError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let mut out = String::new();
    for row in rows {
        out.push_str(&serde_json::to_string(row)?);
        out.push('\n');
    }
    fs::write(path, out)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_rows_skips_missing_url() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rows.jsonl");
        fs::write(
            &path,
            "{\"repo_url\": \"https://github.com/a/b\", \"name\": \"Ada\"}\n\
             {\"name\": \"no url\"}\n\
             \n\
             {\"repo_url\": \"  \"}\n\
             {\"repo_url\": \"https://github.com/c/d\"}\n",
        )
        .unwrap();

        let rows = read_rows(&path).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].url, "https://github.com/a/b");
        assert_eq!(
            rows[0].passthrough.get("name").and_then(Value::as_str),
            Some("Ada")
        );
        assert_eq!(rows[1].url, "https://github.com/c/d");
    }

    #[test]
    fn test_read_rows_rejects_non_object() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rows.jsonl");
        fs::write(&path, "[1, 2, 3]\n").unwrap();

        let err = read_rows(&path).unwrap_err();
        assert!(matches!(err, RosterError::NotAnObject { line: 1 }));
    }

    #[test]
    fn test_read_rows_missing_file() {
        let err = read_rows(Path::new("/nonexistent/rows.jsonl")).unwrap_err();
        assert!(matches!(err, RosterError::NotFound(_)));
    }

    #[test]
    fn test_write_rows_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out/results.jsonl");

        let mut row = Map::new();
        row.insert("repo_url".to_string(), Value::String("u".to_string()));
        row.insert("final_score".to_string(), Value::from(42.5));
        write_rows(&[row], &path).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().count(), 1);
        assert!(text.contains("\"final_score\":42.5"));
    }
}
