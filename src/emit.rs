// 📤 Emitter - Apply a plan as one all-or-nothing unit
//
// Two emitters live here:
//   MemoryEmitter - replays a plan in memory, refusing any transient duplicate position
//   SqlScript     - renders a plan as an SQL script (dry run)
// The SQLite emitter lives in db.rs.

use crate::reconciliation::{Operation, Plan};
use crate::record::{Fingerprint, Record, RecordId, TargetRecord};
use crate::settings::Settings;
use anyhow::{bail, Result};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ApplyOutcome {
    /// Empty plan; nothing was touched
    NoChanges,
    Applied { operations: usize },
}

/// Applies a whole plan, in order, atomically. Either every operation lands or none does.
pub trait Emitter {
    fn apply_all(&mut self, plan: &Plan) -> Result<ApplyOutcome>;
}

// ============================================================================
// IN-MEMORY REPLAY
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryRow {
    pub id: RecordId,
    pub position: u32,
    pub fingerprint: Fingerprint,
}

/// In-memory day store. Ids for inserted rows continue after the highest stored id.
#[derive(Debug, Clone, Default)]
pub struct MemoryEmitter {
    rows: Vec<MemoryRow>,
    next_id: i64,
}

impl MemoryEmitter {
    pub fn from_records(records: &[Record]) -> Self {
        let rows: Vec<MemoryRow> = records
            .iter()
            .map(|r| MemoryRow {
                id: r.id,
                position: r.position,
                fingerprint: r.fingerprint(),
            })
            .collect();
        let next_id = rows.iter().map(|r| r.id.0).max().unwrap_or(0) + 1;
        MemoryEmitter { rows, next_id }
    }

    /// Rows ordered by position
    pub fn rows(&self) -> Vec<MemoryRow> {
        let mut rows = self.rows.clone();
        rows.sort_by_key(|r| r.position);
        rows
    }

    pub fn fingerprints(&self) -> Vec<Fingerprint> {
        self.rows().into_iter().map(|r| r.fingerprint).collect()
    }

    fn apply_one(rows: &mut Vec<MemoryRow>, next_id: &mut i64, op: &Operation) -> Result<()> {
        let taken_by = |rows: &[MemoryRow], position: u32, except: Option<RecordId>| {
            rows.iter()
                .find(|r| r.position == position && Some(r.id) != except)
                .map(|r| r.id)
        };

        match op {
            Operation::Renumber { id, position } => {
                if let Some(other) = taken_by(&rows[..], *position, Some(*id)) {
                    bail!("renumber {} -> {}: position held by {}", id, position, other);
                }
                match rows.iter_mut().find(|r| r.id == *id) {
                    Some(row) => row.position = *position,
                    None => bail!("renumber of unknown record {}", id),
                }
            }
            Operation::Insert {
                position, record, ..
            } => {
                if let Some(other) = taken_by(&rows[..], *position, None) {
                    bail!("insert @{}: position held by {}", position, other);
                }
                rows.push(MemoryRow {
                    id: RecordId(*next_id),
                    position: *position,
                    fingerprint: record.fingerprint(),
                });
                *next_id += 1;
            }
            Operation::Delete { id } => match rows.iter().position(|r| r.id == *id) {
                Some(index) => {
                    rows.remove(index);
                }
                None => bail!("delete of unknown record {}", id),
            },
        }
        Ok(())
    }
}

impl Emitter for MemoryEmitter {
    fn apply_all(&mut self, plan: &Plan) -> Result<ApplyOutcome> {
        if plan.is_empty() {
            return Ok(ApplyOutcome::NoChanges);
        }

        // Work on a copy so a failing plan leaves the store untouched.
        let mut rows = self.rows.clone();
        let mut next_id = self.next_id;
        for op in plan {
            Self::apply_one(&mut rows, &mut next_id, op)?;
        }

        let mut positions: Vec<u32> = rows.iter().map(|r| r.position).collect();
        positions.sort_unstable();
        if positions.iter().zip(1u32..).any(|(got, want)| *got != want) {
            bail!("positions not contiguous after replay: {:?}", positions);
        }

        self.rows = rows;
        self.next_id = next_id;
        Ok(ApplyOutcome::Applied {
            operations: plan.len(),
        })
    }
}

// ============================================================================
// SQL RENDERING
// ============================================================================

/// Double-quoted identifier
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// SQL literal for a JSON value; nested values are stored as JSON text
pub fn sql_literal(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Bool(b) => (if *b { "1" } else { "0" }).to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => quote_text(s),
        other => quote_text(&other.to_string()),
    }
}

fn quote_text(text: &str) -> String {
    format!("'{}'", text.replace('\'', "''"))
}

/// Fail on any insert whose target is dated outside `day`. Positions are computed
/// within the day, so such a row would leave a gap behind.
pub fn check_insert_dates(plan: &Plan, day: &str) -> Result<()> {
    for op in plan {
        if let Operation::Insert {
            position, record, ..
        } = op
        {
            if let Some(date) = record.date.as_deref().filter(|d| *d != day) {
                bail!(
                    "insert @{} ({}) is dated {}, outside the reconciled day {}",
                    position,
                    record.fingerprint(),
                    date,
                    day
                );
            }
        }
    }
    Ok(())
}

/// Column values for an inserted row: attributes, then date, then the core fields on top.
/// The reconciled day, when known, always wins over the target's own date.
pub fn insert_columns(
    settings: &Settings,
    day: Option<&str>,
    position: u32,
    record: &TargetRecord,
    attributes: &BTreeMap<String, Value>,
) -> BTreeMap<String, Value> {
    let columns = &settings.columns;
    let mut row = attributes.clone();

    if let Some(date) = day.or(record.date.as_deref()) {
        row.insert(columns.date.clone(), Value::from(date));
    }
    row.insert(columns.description.clone(), Value::from(record.description.as_str()));
    row.insert(columns.amount.clone(), Value::from(record.amount.as_str()));
    row.insert(columns.position.clone(), Value::from(position));
    row
}

/// Render one operation as SQL; `bind` turns each value into either a placeholder or a literal
pub fn render_operation(
    settings: &Settings,
    day: Option<&str>,
    op: &Operation,
    bind: &mut dyn FnMut(Value) -> String,
) -> String {
    let table = quote_ident(&settings.table);
    let columns = &settings.columns;

    match op {
        Operation::Renumber { id, position } => {
            let position = bind(Value::from(*position));
            let id = bind(Value::from(id.0));
            format!(
                "UPDATE {} SET {} = {} WHERE {} = {}",
                table,
                quote_ident(&columns.position),
                position,
                quote_ident(&columns.id),
                id
            )
        }
        Operation::Insert {
            position,
            record,
            attributes,
        } => {
            let row = insert_columns(settings, day, *position, record, attributes);
            let names: Vec<String> = row.keys().map(|k| quote_ident(k)).collect();
            let values: Vec<String> = row.into_values().map(|v| bind(v)).collect();
            format!(
                "INSERT INTO {} ({}) VALUES ({})",
                table,
                names.join(", "),
                values.join(", ")
            )
        }
        Operation::Delete { id } => {
            let id = bind(Value::from(id.0));
            format!("DELETE FROM {} WHERE {} = {}", table, quote_ident(&columns.id), id)
        }
    }
}

/// Dry-run renderer: the plan as a single SQL transaction script
pub struct SqlScript<'a> {
    settings: &'a Settings,
    day: Option<&'a str>,
}

impl<'a> SqlScript<'a> {
    pub fn new(settings: &'a Settings) -> Self {
        SqlScript { settings, day: None }
    }

    /// Date written to every inserted row
    pub fn for_day(mut self, day: &'a str) -> Self {
        self.day = Some(day);
        self
    }

    pub fn statements(&self, plan: &Plan) -> Vec<String> {
        plan.iter()
            .map(|op| {
                let sql = render_operation(self.settings, self.day, op, &mut |v| sql_literal(&v));
                format!("{};", sql)
            })
            .collect()
    }

    pub fn render(&self, plan: &Plan) -> String {
        if plan.is_empty() {
            return "-- no changes\n".to_string();
        }

        let mut script = String::from("BEGIN;\n");
        for statement in self.statements(plan) {
            script.push_str(&statement);
            script.push('\n');
        }
        script.push_str("COMMIT;\n");
        script
    }
}

// ============================================================================
// TESTS
// ============================================================================
