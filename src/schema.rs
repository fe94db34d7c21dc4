// 📐 Shape Layer - Input Validation
// Turns raw stored/target rows into typed records, rejecting malformed days before any diff work

use crate::record::{RawRecord, RawTarget, Record, RecordId, TargetRecord};
use std::collections::HashMap;
use std::fmt;

// ============================================================================
// VALIDATION ERROR
// ============================================================================

/// Which input sequence a validation error refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sequence {
    /// The day's persisted records
    Stored,
    /// The desired content
    Target,
}

impl Sequence {
    pub fn name(&self) -> &str {
        match self {
            Sequence::Stored => "stored",
            Sequence::Target => "target",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Id,
    Position,
    Description,
    Amount,
}

impl Field {
    pub fn name(&self) -> &str {
        match self {
            Field::Id => "id",
            Field::Position => "position",
            Field::Description => "description",
            Field::Amount => "amount",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Violation {
    /// Field absent, blank, or (for positions) zero
    Missing,
    /// Position does not equal the record's 1-based index
    OutOfSequence { expected: u32, found: i64 },
    /// Identity already used by an earlier record
    DuplicateId { id: RecordId, first_index: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub sequence: Sequence,
    /// 0-based index into the offending sequence
    pub index: usize,
    pub field: Field,
    pub violation: Violation,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} record #{}: {} ",
            self.sequence.name(),
            self.index,
            self.field.name()
        )?;
        match &self.violation {
            Violation::Missing => write!(f, "is missing"),
            Violation::OutOfSequence { expected, found } => {
                write!(f, "out of sequence (expected {}, found {})", expected, found)
            }
            Violation::DuplicateId { id, first_index } => {
                write!(f, "{} duplicates record #{}", id, first_index)
            }
        }
    }
}

impl std::error::Error for ValidationError {}

pub type ValidationResult<T> = Result<T, ValidationError>;

// ============================================================================
// SCHEMA VALIDATOR
// ============================================================================

/// Typed, validated input for one day-partition
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedDay {
    pub records: Vec<Record>,
    pub targets: Vec<TargetRecord>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SchemaValidator;

impl SchemaValidator {
    pub fn new() -> Self {
        SchemaValidator
    }

    /// Validate both sequences; the stored sequence is checked first
    pub fn validate_day(
        &self,
        stored: &[RawRecord],
        targets: &[RawTarget],
    ) -> ValidationResult<ValidatedDay> {
        let records = self.validate_records(stored)?;
        let targets = self.validate_targets(targets)?;
        Ok(ValidatedDay { records, targets })
    }

    /// Stored records: position first, then description, amount, identity,
    /// then identity uniqueness. The first failure wins.
    pub fn validate_records(&self, stored: &[RawRecord]) -> ValidationResult<Vec<Record>> {
        let mut seen: HashMap<RecordId, usize> = HashMap::with_capacity(stored.len());
        let mut records = Vec::with_capacity(stored.len());

        for (index, raw) in stored.iter().enumerate() {
            let fail = |field, violation| ValidationError {
                sequence: Sequence::Stored,
                index,
                field,
                violation,
            };

            let expected = index as u32 + 1;
            let position = match raw.position {
                None | Some(0) => return Err(fail(Field::Position, Violation::Missing)),
                Some(found) if found != expected as i64 => {
                    return Err(fail(
                        Field::Position,
                        Violation::OutOfSequence { expected, found },
                    ))
                }
                Some(_) => expected,
            };

            let description = present(&raw.description)
                .ok_or_else(|| fail(Field::Description, Violation::Missing))?;
            let amount =
                present(&raw.amount).ok_or_else(|| fail(Field::Amount, Violation::Missing))?;
            let id = raw.id.ok_or_else(|| fail(Field::Id, Violation::Missing))?;

            if let Some(&first_index) = seen.get(&id) {
                return Err(fail(Field::Id, Violation::DuplicateId { id, first_index }));
            }
            seen.insert(id, index);

            records.push(Record {
                id,
                position,
                description: description.to_string(),
                amount: amount.to_string(),
                date: raw.date.clone(),
                attributes: raw.attributes.clone(),
            });
        }

        Ok(records)
    }

    pub fn validate_targets(&self, targets: &[RawTarget]) -> ValidationResult<Vec<TargetRecord>> {
        targets
            .iter()
            .enumerate()
            .map(|(index, raw)| -> ValidationResult<TargetRecord> {
                let fail = |field| ValidationError {
                    sequence: Sequence::Target,
                    index,
                    field,
                    violation: Violation::Missing,
                };

                let description = present(&raw.description).ok_or_else(|| fail(Field::Description))?;
                let amount = present(&raw.amount).ok_or_else(|| fail(Field::Amount))?;

                Ok(TargetRecord {
                    description: description.to_string(),
                    amount: amount.to_string(),
                    date: raw.date.clone(),
                    attributes: raw.attributes.clone(),
                })
            })
            .collect()
    }
}

/// Blank strings count as absent
fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.trim().is_empty())
}

// ============================================================================
// TESTS
// ============================================================================
