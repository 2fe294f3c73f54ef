//! Loading the active workspace identifiers from arguments and files.

use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::Value;

use crate::core::active::ActiveWorkspaceSet;
use crate::infra::config::IdentifierField;

#[derive(Debug, thiserror::Error)]
pub enum WorkspaceListError {
    #[error("workspace list is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("workspace entry {index} has no usable '{field}' field")]
    MissingField { index: usize, field: &'static str },
    #[error("workspace entry {index} must be a string or an object")]
    UnexpectedEntry { index: usize },
}

#[derive(Debug, Deserialize)]
struct WorkspaceRecord {
    name: Option<String>,
    dns: Option<String>,
}

/// Parse a workspace list: JSON strings, JSON workspace objects, or lines.
pub fn parse_workspace_list(text: &str, field: IdentifierField) -> Result<Vec<String>, WorkspaceListError> {
    let trimmed = text.trim_start();
    if !trimmed.starts_with('[') {
        return Ok(text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.starts_with('#'))
            .map(str::to_string)
            .collect());
    }

    let values: Vec<Value> = serde_json::from_str(trimmed)?;
    let mut ids = Vec::with_capacity(values.len());
    for (index, value) in values.into_iter().enumerate() {
        match value {
            Value::String(s) => ids.push(s),
            obj @ Value::Object(_) => {
                let record: WorkspaceRecord = serde_json::from_value(obj)?;
                let (picked, name) = match field {
                    IdentifierField::Dns => (record.dns, "dns"),
                    IdentifierField::Name => (record.name, "name"),
                };
                match picked {
                    Some(id) if !id.trim().is_empty() => ids.push(id),
                    _ => return Err(WorkspaceListError::MissingField { index, field: name }),
                }
            }
            _ => return Err(WorkspaceListError::UnexpectedEntry { index }),
        }
    }
    Ok(ids)
}

/// Collect identifiers from positional arguments and an optional file (`-` is stdin).
pub fn load_active_set(
    positional: &[String],
    file: Option<&Path>,
    field: IdentifierField,
) -> Result<ActiveWorkspaceSet> {
    let mut ids: Vec<String> = positional.to_vec();

    if let Some(path) = file {
        let text = if path == Path::new("-") {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("read workspace list from stdin")?;
            buf
        } else {
            std::fs::read_to_string(path)
                .with_context(|| format!("read workspace list {}", path.display()))?
        };
        let parsed = parse_workspace_list(&text, field)
            .with_context(|| format!("parse workspace list {}", path.display()))?;
        ids.extend(parsed);
    }

    Ok(ActiveWorkspaceSet::new(ids))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_lines_skip_comments_and_blanks() {
        let ids = parse_workspace_list("# active\nalpha\n\n  beta  \n#gamma\n", IdentifierField::Dns).unwrap();
        assert_eq!(ids, ["alpha", "beta"]);
    }

    #[test]
    fn json_strings() {
        let ids = parse_workspace_list(r#"["a", "b"]"#, IdentifierField::Name).unwrap();
        assert_eq!(ids, ["a", "b"]);
    }

    #[test]
    fn json_objects_pick_configured_field() {
        let text = r#"[{"name": "dev", "dns": "dev-abc.brev.sh"}, {"name": "ml", "dns": "ml-xyz.brev.sh", "status": "RUNNING"}]"#;
        assert_eq!(
            parse_workspace_list(text, IdentifierField::Dns).unwrap(),
            ["dev-abc.brev.sh", "ml-xyz.brev.sh"]
        );
        assert_eq!(parse_workspace_list(text, IdentifierField::Name).unwrap(), ["dev", "ml"]);
    }

    #[test]
    fn json_object_without_field_is_rejected() {
        let err = parse_workspace_list(r#"[{"name": "dev"}]"#, IdentifierField::Dns).unwrap_err();
        assert!(matches!(err, WorkspaceListError::MissingField { index: 0, field: "dns" }));
    }

    #[test]
    fn malformed_json_is_rejected() {
        assert!(matches!(
            parse_workspace_list("[1, 2", IdentifierField::Dns),
            Err(WorkspaceListError::Json(_))
        ));
        assert!(matches!(
            parse_workspace_list("[1]", IdentifierField::Dns),
            Err(WorkspaceListError::UnexpectedEntry { index: 0 })
        ));
    }

    #[test]
    fn positional_and_file_merge_in_order() {
        let dir = tempfile::TempDir::new().unwrap();
        let file = dir.path().join("ws.txt");
        std::fs::write(&file, "b\nc\na\n").unwrap();

        let set = load_active_set(&["a".into(), "b".into()], Some(file.as_path()), IdentifierField::Dns).unwrap();
        assert_eq!(set.iter().collect::<Vec<_>>(), ["a", "b", "c"]);
    }
}
