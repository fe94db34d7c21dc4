// ⚙️ Settings - Table/column labels and insert defaults
// Loaded from a JSON file; every field has a default so a partial file is fine

use crate::record::Attributes;
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Column labels of the stored transactions table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Columns {
    pub id: String,
    pub position: String,
    pub date: String,
    pub description: String,
    pub amount: String,

    /// A record is protected while this column is NOT NULL (None = nothing protected)
    pub protected_by: Option<String>,
}

impl Default for Columns {
    fn default() -> Self {
        Columns {
            id: "id".to_string(),
            position: "position".to_string(),
            date: "date".to_string(),
            description: "description".to_string(),
            amount: "amount".to_string(),
            protected_by: Some("invoice_id".to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub table: String,
    pub columns: Columns,

    /// Applied to inserted records for attributes the target does not supply
    pub default_attributes: Attributes,

    /// Upper bound on records per side of a day; alignment is O(N·M)
    pub max_day_len: usize,

    /// Default tracing filter level (overridden by RUST_LOG)
    pub log_level: String,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            table: "transactions".to_string(),
            columns: Columns::default(),
            default_attributes: Attributes::new(),
            max_day_len: 10_000,
            log_level: "info".to_string(),
        }
    }
}

impl Settings {
    /// Load settings from a JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read settings file: {:?}", path.as_ref()))?;

        let settings: Settings =
            serde_json::from_str(&content).context("Failed to parse settings JSON")?;
        settings.validate()?;

        Ok(settings)
    }

    /// Every label ends up inside SQL, so only plain identifiers are accepted
    pub fn validate(&self) -> Result<()> {
        let mut labels = vec![
            ("table", self.table.as_str()),
            ("columns.id", self.columns.id.as_str()),
            ("columns.position", self.columns.position.as_str()),
            ("columns.date", self.columns.date.as_str()),
            ("columns.description", self.columns.description.as_str()),
            ("columns.amount", self.columns.amount.as_str()),
        ];
        if let Some(protected_by) = &self.columns.protected_by {
            labels.push(("columns.protected_by", protected_by.as_str()));
        }
        for key in self.default_attributes.keys() {
            labels.push(("default_attributes", key.as_str()));
        }

        for (setting, label) in labels {
            if !is_identifier(label) {
                bail!("Invalid identifier for {}: {:?}", setting, label);
            }
        }

        if self.max_day_len == 0 {
            bail!("max_day_len must be at least 1");
        }

        Ok(())
    }
}

/// `[A-Za-z_][A-Za-z0-9_]*`
pub fn is_identifier(label: &str) -> bool {
    let mut chars = label.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.table, "transactions");
        assert_eq!(settings.columns.protected_by.as_deref(), Some("invoice_id"));
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"table": "bank_lines", "columns": {{"position": "seq"}}, "default_attributes": {{"category": "Unreviewed"}}}}"#
        )
        .unwrap();

        let settings = Settings::from_file(file.path()).unwrap();

        assert_eq!(settings.table, "bank_lines");
        assert_eq!(settings.columns.position, "seq");
        assert_eq!(settings.columns.id, "id");
        assert_eq!(
            settings.default_attributes.get("category"),
            Some(&serde_json::json!("Unreviewed"))
        );
        assert_eq!(settings.max_day_len, 10_000);
    }

    #[test]
    fn test_rejects_unsafe_identifiers() {
        let mut settings = Settings::default();
        settings.table = "transactions; DROP TABLE x".to_string();
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings
            .default_attributes
            .insert("bad key".to_string(), serde_json::json!(1));
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_missing_file_reports_path() {
        let err = Settings::from_file("/definitely/not/here.json").unwrap_err();
        assert!(format!("{:#}", err).contains("Failed to read settings file"));
    }

    #[test]
    fn test_identifier_rules() {
        assert!(is_identifier("invoice_id"));
        assert!(is_identifier("_x1"));
        assert!(!is_identifier("1x"));
        assert!(!is_identifier(""));
        assert!(!is_identifier("a-b"));
    }
}
