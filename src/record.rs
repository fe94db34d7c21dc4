// 📒 Records - Stored and target transactions for one day
// Raw shapes come straight from JSON/CSV/SQLite; typed shapes exist only after validation

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Pass-through attributes carried by records (category, source file, ...).
/// Never used for matching.
pub type Attributes = BTreeMap<String, serde_json::Value>;

// ============================================================================
// IDENTITY
// ============================================================================

/// Stable identity of a persisted record (the database row id)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(pub i64);

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for RecordId {
    fn from(value: i64) -> Self {
        RecordId(value)
    }
}

// ============================================================================
// FINGERPRINT
// ============================================================================

/// Content key used to decide whether a stored record and a target are "the same"
///
/// The bank never exposes its own identities, only what it displays, so two
/// transactions match iff their fingerprints are equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

/// Fingerprint policy: (description, amount) -> key
pub type FingerprintFn = fn(&str, &str) -> Fingerprint;

impl Fingerprint {
    /// Default policy: `description|amount`
    pub fn of(description: &str, amount: &str) -> Self {
        Fingerprint(format!("{}|{}", description, amount))
    }

    pub fn from_key(key: impl Into<String>) -> Self {
        Fingerprint(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// RAW INPUT (unvalidated)
// ============================================================================

/// A stored record as read from the database or a JSON dump, before validation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    #[serde(default, alias = "Id")]
    pub id: Option<RecordId>,

    /// Signed on purpose so a negative position reaches the validator
    #[serde(default, alias = "Position")]
    pub position: Option<i64>,

    #[serde(default, alias = "Description")]
    pub description: Option<String>,

    #[serde(default, alias = "Amount", deserialize_with = "amount_text")]
    pub amount: Option<String>,

    #[serde(default, alias = "Date")]
    pub date: Option<String>,

    #[serde(flatten)]
    pub attributes: Attributes,
}

/// A desired record as supplied by the caller, before validation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawTarget {
    #[serde(default, alias = "Description")]
    pub description: Option<String>,

    #[serde(default, alias = "Amount", deserialize_with = "amount_text")]
    pub amount: Option<String>,

    #[serde(default, alias = "Date")]
    pub date: Option<String>,

    #[serde(flatten)]
    pub attributes: Attributes,
}

impl RawRecord {
    pub fn new(id: i64, position: i64, description: &str, amount: &str) -> Self {
        RawRecord {
            id: Some(RecordId(id)),
            position: Some(position),
            description: Some(description.to_string()),
            amount: Some(amount.to_string()),
            date: None,
            attributes: Attributes::new(),
        }
    }
}

impl RawTarget {
    pub fn new(description: &str, amount: &str) -> Self {
        RawTarget {
            description: Some(description.to_string()),
            amount: Some(amount.to_string()),
            date: None,
            attributes: Attributes::new(),
        }
    }

    /// Builder: set the date
    pub fn with_date(mut self, date: impl Into<String>) -> Self {
        self.date = Some(date.into());
        self
    }

    /// Builder: add a pass-through attribute
    pub fn with_attribute(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }
}

/// Amounts are display strings ("-2.80"), but JSON producers often emit numbers.
fn amount_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum AmountRepr {
        Text(String),
        Number(serde_json::Number),
    }

    Ok(Option::<AmountRepr>::deserialize(deserializer)?.map(|repr| match repr {
        AmountRepr::Text(text) => text,
        AmountRepr::Number(number) => number.to_string(),
    }))
}

// ============================================================================
// VALIDATED RECORDS
// ============================================================================

/// A persisted transaction with a known identity and a 1-based position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: RecordId,
    pub position: u32,
    pub description: String,
    pub amount: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: Attributes,
}

impl Record {
    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::of(&self.description, &self.amount)
    }
}

/// Desired content for one slot of the day; position comes from its place in the sequence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetRecord {
    pub description: String,
    pub amount: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: Attributes,
}

impl TargetRecord {
    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::of(&self.description, &self.amount)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_joins_description_and_amount() {
        assert_eq!(Fingerprint::of("Tx1", "15.23").as_str(), "Tx1|15.23");
        assert_ne!(Fingerprint::of("Tx1", "15.23"), Fingerprint::of("Tx1", "15.24"));
    }

    #[test]
    fn test_raw_record_collects_extra_keys_as_attributes() {
        let raw: RawRecord = serde_json::from_str(
            r#"{"id": 7, "position": 1, "description": "Coffee", "amount": "-3.50", "category": "Dining"}"#,
        )
        .unwrap();

        assert_eq!(raw.id, Some(RecordId(7)));
        assert_eq!(raw.position, Some(1));
        assert_eq!(raw.amount.as_deref(), Some("-3.50"));
        assert_eq!(raw.attributes.get("category"), Some(&serde_json::json!("Dining")));
    }

    #[test]
    fn test_numeric_amount_is_kept_as_text() {
        let raw: RawTarget = serde_json::from_str(r#"{"description": "Salary", "amount": 2000.5}"#).unwrap();
        assert_eq!(raw.amount.as_deref(), Some("2000.5"));
    }

    #[test]
    fn test_missing_fields_deserialize_as_none() {
        let raw: RawRecord = serde_json::from_str(r#"{"description": "No id"}"#).unwrap();
        assert!(raw.id.is_none());
        assert!(raw.position.is_none());
        assert!(raw.amount.is_none());
    }
}
