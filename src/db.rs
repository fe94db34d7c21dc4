// 🗄️ SQLite store - Day loading, protection lookup and transactional emission
// Table and column names come from Settings; statements are always parameterised

use crate::emit::{check_insert_dates, quote_ident, render_operation, ApplyOutcome, Emitter};
use crate::reconciliation::Plan;
use crate::record::{RawRecord, RecordId};
use crate::settings::Settings;
use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::types::{Type, Value as SqlValue, ValueRef};
use rusqlite::{params, params_from_iter, Connection, Row};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::info;

/// Event for audit trail: one row per applied plan
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Event {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub entity_type: String,
    pub entity_id: String,
    pub data: serde_json::Value,
    pub actor: String,
}

impl Event {
    pub fn new(
        event_type: &str,
        entity_type: &str,
        entity_id: &str,
        data: serde_json::Value,
        actor: &str,
    ) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event_type: event_type.to_string(),
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            data,
            actor: actor.to_string(),
        }
    }
}

pub fn setup_database(conn: &Connection, settings: &Settings) -> Result<()> {
    settings.validate()?;

    // Enable WAL mode for crash recovery
    conn.pragma_update(None, "journal_mode", "WAL")?;

    let columns = &settings.columns;
    let mut definitions = vec![
        format!("{} INTEGER PRIMARY KEY AUTOINCREMENT", quote_ident(&columns.id)),
        format!("{} TEXT NOT NULL", quote_ident(&columns.date)),
        format!("{} INTEGER", quote_ident(&columns.position)),
        format!("{} TEXT", quote_ident(&columns.description)),
        format!("{} TEXT", quote_ident(&columns.amount)),
    ];
    if let Some(protected_by) = &columns.protected_by {
        definitions.push(format!("{} TEXT", quote_ident(protected_by)));
    }
    let core = [
        &columns.id,
        &columns.date,
        &columns.position,
        &columns.description,
        &columns.amount,
    ];
    for key in settings.default_attributes.keys() {
        if !core.contains(&key) && Some(key) != columns.protected_by.as_ref() {
            definitions.push(format!("{} TEXT", quote_ident(key)));
        }
    }
    definitions.push("created_at DATETIME DEFAULT CURRENT_TIMESTAMP".to_string());

    conn.execute(
        &format!(
            "CREATE TABLE IF NOT EXISTS {} (\n    {}\n)",
            quote_ident(&settings.table),
            definitions.join(",\n    ")
        ),
        [],
    )?;

    // ==========================================================================
    // One record per (day, position): a mis-ordered renumber fails loudly
    // ==========================================================================
    conn.execute(
        &format!(
            "CREATE UNIQUE INDEX IF NOT EXISTS {} ON {}({}, {})",
            quote_ident(&format!("idx_{}_day_position", settings.table)),
            quote_ident(&settings.table),
            quote_ident(&columns.date),
            quote_ident(&columns.position)
        ),
        [],
    )?;

    // ==========================================================================
    // Events Table (audit trail)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            event_id TEXT UNIQUE NOT NULL,
            timestamp TEXT NOT NULL,
            event_type TEXT NOT NULL,
            entity_type TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            data TEXT NOT NULL,
            actor TEXT NOT NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_events_entity ON events(entity_type, entity_id)",
        [],
    )?;

    Ok(())
}

/// Text view of a column that may hold TEXT, INTEGER or REAL
fn text_column(row: &Row, idx: usize) -> rusqlite::Result<Option<String>> {
    Ok(match row.get_ref(idx)? {
        ValueRef::Null => None,
        ValueRef::Integer(i) => Some(i.to_string()),
        ValueRef::Real(f) => Some(f.to_string()),
        ValueRef::Text(bytes) => Some(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(_) => {
            return Err(rusqlite::Error::InvalidColumnType(
                idx,
                "blob".to_string(),
                Type::Blob,
            ))
        }
    })
}

/// All records stored for one day, ordered by position
pub fn load_day(conn: &Connection, settings: &Settings, date: &str) -> Result<Vec<RawRecord>> {
    let columns = &settings.columns;
    let sql = format!(
        "SELECT {id}, {position}, {description}, {amount}, {date}
         FROM {table}
         WHERE {date} = ?1
         ORDER BY {position}, {id}",
        id = quote_ident(&columns.id),
        position = quote_ident(&columns.position),
        description = quote_ident(&columns.description),
        amount = quote_ident(&columns.amount),
        date = quote_ident(&columns.date),
        table = quote_ident(&settings.table),
    );

    let mut stmt = conn.prepare(&sql)?;
    let records = stmt
        .query_map(params![date], |row| {
            Ok(RawRecord {
                id: row.get::<_, Option<i64>>(0)?.map(RecordId),
                position: row.get(1)?,
                description: text_column(row, 2)?,
                amount: text_column(row, 3)?,
                date: text_column(row, 4)?,
                attributes: Default::default(),
            })
        })?
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("Failed to load records for {}", date))?;

    Ok(records)
}

/// Ids of the day's records that must never be deleted
pub fn protected_ids(conn: &Connection, settings: &Settings, date: &str) -> Result<HashSet<RecordId>> {
    let Some(protected_by) = &settings.columns.protected_by else {
        return Ok(HashSet::new());
    };

    let sql = format!(
        "SELECT {} FROM {} WHERE {} = ?1 AND {} IS NOT NULL",
        quote_ident(&settings.columns.id),
        quote_ident(&settings.table),
        quote_ident(&settings.columns.date),
        quote_ident(protected_by)
    );

    let mut stmt = conn.prepare(&sql)?;
    let ids = stmt
        .query_map(params![date], |row| row.get::<_, i64>(0).map(RecordId))?
        .collect::<Result<HashSet<_>, _>>()?;

    Ok(ids)
}

pub fn count_day(conn: &Connection, settings: &Settings, date: &str) -> Result<i64> {
    let count: i64 = conn.query_row(
        &format!(
            "SELECT COUNT(*) FROM {} WHERE {} = ?1",
            quote_ident(&settings.table),
            quote_ident(&settings.columns.date)
        ),
        params![date],
        |row| row.get(0),
    )?;

    Ok(count)
}

/// Insert event into audit trail
pub fn insert_event(conn: &Connection, event: &Event) -> Result<()> {
    let data_json = serde_json::to_string(&event.data)?;

    conn.execute(
        "INSERT INTO events (
            event_id, timestamp, event_type, entity_type, entity_id, data, actor
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            event.event_id,
            event.timestamp.to_rfc3339(),
            event.event_type,
            event.entity_type,
            event.entity_id,
            data_json,
            event.actor,
        ],
    )?;

    Ok(())
}

/// Get events for a specific entity
pub fn get_events_for_entity(
    conn: &Connection,
    entity_type: &str,
    entity_id: &str,
) -> Result<Vec<Event>> {
    let mut stmt = conn.prepare(
        "SELECT event_id, timestamp, event_type, entity_type, entity_id, data, actor
         FROM events
         WHERE entity_type = ?1 AND entity_id = ?2
         ORDER BY timestamp DESC",
    )?;

    let events = stmt
        .query_map(params![entity_type, entity_id], |row| {
            let timestamp_str: String = row.get(1)?;
            let data_json: String = row.get(5)?;

            Ok(Event {
                event_id: row.get(0)?,
                timestamp: DateTime::parse_from_rfc3339(&timestamp_str)
                    .map_err(|e| rusqlite::Error::FromSqlConversionFailure(1, Type::Text, Box::new(e)))?
                    .with_timezone(&Utc),
                event_type: row.get(2)?,
                entity_type: row.get(3)?,
                entity_id: row.get(4)?,
                data: serde_json::from_str(&data_json)
                    .map_err(|e| rusqlite::Error::FromSqlConversionFailure(5, Type::Text, Box::new(e)))?,
                actor: row.get(6)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(events)
}

// ============================================================================
// SQLITE EMITTER
// ============================================================================

fn to_sql_value(value: serde_json::Value) -> SqlValue {
    use serde_json::Value;

    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(b as i64),
        Value::Number(n) => match (n.as_i64(), n.as_f64()) {
            (Some(i), _) => SqlValue::Integer(i),
            (None, Some(f)) => SqlValue::Real(f),
            (None, None) => SqlValue::Text(n.to_string()),
        },
        Value::String(s) => SqlValue::Text(s),
        other => SqlValue::Text(other.to_string()),
    }
}

/// Applies a plan for one day inside a single SQLite transaction
pub struct SqliteEmitter<'a> {
    conn: &'a mut Connection,
    settings: &'a Settings,
    day: String,
    actor: String,
}

impl<'a> SqliteEmitter<'a> {
    pub fn new(conn: &'a mut Connection, settings: &'a Settings, day: &str) -> Self {
        SqliteEmitter {
            conn,
            settings,
            day: day.to_string(),
            actor: "daybook-sync".to_string(),
        }
    }

    /// Builder: who is recorded in the audit event
    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = actor.into();
        self
    }
}

impl Emitter for SqliteEmitter<'_> {
    fn apply_all(&mut self, plan: &Plan) -> Result<ApplyOutcome> {
        if plan.is_empty() {
            info!(day = %self.day, "nothing to apply");
            return Ok(ApplyOutcome::NoChanges);
        }
        check_insert_dates(plan, &self.day)?;

        // Dropping the transaction on any error rolls everything back.
        let tx = self.conn.transaction()?;

        for (n, op) in plan.iter().enumerate() {
            let mut values: Vec<SqlValue> = Vec::new();
            let sql = render_operation(self.settings, Some(&self.day), op, &mut |v| {
                values.push(to_sql_value(v));
                format!("?{}", values.len())
            });

            let changed = tx
                .execute(&sql, params_from_iter(values.iter()))
                .with_context(|| format!("Operation #{} failed: {}", n, op))?;
            if changed != 1 {
                bail!("Operation #{} ({}) affected {} rows, expected 1", n, op, changed);
            }
        }

        let event = Event::new(
            "day_reconciled",
            "day",
            &self.day,
            serde_json::json!({
                "table": self.settings.table,
                "operations": plan.len(),
                "inserted": plan.inserted(),
                "deleted": plan.deleted(),
                "renumbered": plan.renumbered(),
                "digest": plan.digest(),
            }),
            &self.actor,
        );
        insert_event(&tx, &event)?;

        tx.commit().context("Failed to commit reconciliation")?;
        info!(day = %self.day, "applied {}", plan.summary());

        Ok(ApplyOutcome::Applied {
            operations: plan.len(),
        })
    }
}

// ============================================================================
// TESTS
// ============================================================================
