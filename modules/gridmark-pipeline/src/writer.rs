use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Mutex, OnceLock};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use regex::Regex;
use sqlx::postgres::PgArguments;
use sqlx::query::QueryScalar;
use sqlx::{PgPool, Postgres};

use crate::error::WriteError;
use crate::traits::UpsertWriter;
use crate::types::PersistedId;

/// Static description of a destination table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpsertTarget {
    pub table: &'static str,
    /// Columns of the unique constraint used as the conflict target.
    pub conflict_columns: &'static [&'static str],
    /// JSONB column that receives the unmodified source record.
    pub payload_column: Option<&'static str>,
    /// Timestamp column set to `NOW()` on every update.
    pub touch_column: Option<&'static str>,
}

impl UpsertTarget {
    pub const fn new(table: &'static str, conflict_columns: &'static [&'static str]) -> Self {
        Self {
            table,
            conflict_columns,
            payload_column: Some("source_payload"),
            touch_column: Some("updated_at"),
        }
    }
}

/// A column value.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Date(NaiveDate),
    Timestamp(DateTime<Utc>),
    Json(serde_json::Value),
}

impl FieldValue {
    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Null => write!(f, "NULL"),
            FieldValue::Bool(v) => write!(f, "{v}"),
            FieldValue::Int(v) => write!(f, "{v}"),
            FieldValue::Float(v) => write!(f, "{v}"),
            FieldValue::Text(v) => write!(f, "{v:?}"),
            FieldValue::Date(v) => write!(f, "{v}"),
            FieldValue::Timestamp(v) => write!(f, "{}", v.to_rfc3339()),
            FieldValue::Json(v) => write!(f, "{v}"),
        }
    }
}

macro_rules! field_value_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for FieldValue {
                fn from(v: $ty) -> Self {
                    FieldValue::$variant(v.into())
                }
            }
        )*
    };
}

field_value_from! {
    bool => Bool,
    i32 => Int,
    i64 => Int,
    u32 => Int,
    f64 => Float,
    String => Text,
    &str => Text,
    NaiveDate => Date,
    DateTime<Utc> => Timestamp,
    serde_json::Value => Json,
}

impl From<crate::types::EntityId> for FieldValue {
    fn from(v: crate::types::EntityId) -> Self {
        FieldValue::Int(v.0)
    }
}

impl From<PersistedId> for FieldValue {
    fn from(v: PersistedId) -> Self {
        FieldValue::Int(v.0)
    }
}

impl<T: Into<FieldValue>> From<Option<T>> for FieldValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(FieldValue::Null)
    }
}

/// Ordered `(column, value)` pairs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Columns(Vec<(String, FieldValue)>);

impl Columns {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, column: &str, value: impl Into<FieldValue>) -> Self {
        self.push(column, value);
        self
    }

    pub fn push(&mut self, column: &str, value: impl Into<FieldValue>) {
        self.0.push((column.to_string(), value.into()));
    }

    pub fn get(&self, column: &str) -> Option<&FieldValue> {
        self.0.iter().find(|(c, _)| c == column).map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.0.iter().map(|(c, v)| (c.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Columns {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (column, value)) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{column}={value}")?;
        }
        Ok(())
    }
}

/// Values of the conflict-target columns.
pub type NaturalKey = Columns;

/// Non-key columns to write.
pub type Fields = Columns;

impl Columns {
    /// Check that this key covers exactly the target's conflict columns, none null.
    pub fn validate(&self, target: &UpsertTarget) -> Result<(), WriteError> {
        for column in target.conflict_columns {
            match self.get(column) {
                None => {
                    return Err(WriteError::invalid_key(
                        target.table,
                        format!("missing key column {column}"),
                    ))
                }
                Some(v) if v.is_null() => {
                    return Err(WriteError::invalid_key(
                        target.table,
                        format!("key column {column} is null"),
                    ))
                }
                Some(_) => {}
            }
        }

        for (i, (column, _)) in self.0.iter().enumerate() {
            if !target.conflict_columns.iter().any(|c| *c == column.as_str()) {
                return Err(WriteError::invalid_key(
                    target.table,
                    format!("{column} is not a key column"),
                ));
            }
            if self.0[..i].iter().any(|(c, _)| c == column) {
                return Err(WriteError::invalid_key(
                    target.table,
                    format!("key column {column} given twice"),
                ));
            }
        }
        Ok(())
    }

    /// Key values in conflict-column order, for map keys and log lines.
    fn canonical(&self, target: &UpsertTarget) -> String {
        target
            .conflict_columns
            .iter()
            .map(|c| match self.get(c) {
                Some(v) => format!("{c}={v:?}"),
                None => format!("{c}=?"),
            })
            .collect::<Vec<_>>()
            .join(",")
    }
}

fn identifier_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[a-z_][a-z0-9_]*$").expect("valid identifier regex"))
}

fn check_identifier(table: &str, ident: &str) -> Result<(), WriteError> {
    if identifier_pattern().is_match(ident) {
        Ok(())
    } else {
        Err(WriteError::write_failed(
            table,
            "",
            format!("invalid SQL identifier {ident:?}"),
        ))
    }
}

/// An upsert statement and its bind values, in placeholder order.
#[derive(Debug, Clone, PartialEq)]
pub struct UpsertStatement {
    pub sql: String,
    pub binds: Vec<FieldValue>,
}

/// Build `INSERT … ON CONFLICT … DO UPDATE … RETURNING id`.
///
/// Null values are written as SQL `NULL` literals so Postgres infers the
/// column type; every other value is a numbered placeholder.
pub fn build_upsert_sql(
    target: &UpsertTarget,
    key: &NaturalKey,
    fields: &Fields,
    payload: &serde_json::Value,
) -> Result<UpsertStatement, WriteError> {
    check_identifier(target.table, target.table)?;
    for column in target.conflict_columns {
        check_identifier(target.table, column)?;
    }
    if target.conflict_columns.is_empty() {
        return Err(WriteError::invalid_key(target.table, "no conflict columns declared"));
    }
    key.validate(target)?;

    let reserved = |column: &str| {
        target.conflict_columns.iter().any(|c| *c == column)
            || target.payload_column == Some(column)
            || target.touch_column == Some(column)
    };
    for (i, (column, _)) in fields.iter().enumerate() {
        check_identifier(target.table, column)?;
        if reserved(column) || fields.iter().take(i).any(|(c, _)| c == column) {
            return Err(WriteError::write_failed(
                target.table,
                key.canonical(target),
                format!("column {column} written twice"),
            ));
        }
    }
    if let Some(column) = target.payload_column {
        check_identifier(target.table, column)?;
    }
    if let Some(column) = target.touch_column {
        check_identifier(target.table, column)?;
    }

    let payload_value = target
        .payload_column
        .map(|column| (column, FieldValue::Json(payload.clone())));
    let entries = target
        .conflict_columns
        .iter()
        .filter_map(|column| key.get(column).map(|value| (*column, value)))
        .chain(fields.iter())
        .chain(payload_value.as_ref().map(|(column, value)| (*column, value)));

    let mut columns: Vec<&str> = Vec::new();
    let mut values: Vec<String> = Vec::new();
    let mut binds: Vec<FieldValue> = Vec::new();
    for (column, value) in entries {
        columns.push(column);
        if value.is_null() {
            values.push("NULL".to_string());
        } else {
            binds.push(value.clone());
            values.push(format!("${}", binds.len()));
        }
    }

    let mut updates: Vec<String> = fields
        .iter()
        .map(|(c, _)| format!("{c} = EXCLUDED.{c}"))
        .collect();
    if let Some(column) = target.payload_column {
        updates.push(format!("{column} = EXCLUDED.{column}"));
    }
    if let Some(column) = target.touch_column {
        updates.push(format!("{column} = NOW()"));
    }
    if updates.is_empty() {
        // DO NOTHING would return no row; rewrite a key column instead.
        let column = target.conflict_columns[0];
        updates.push(format!("{column} = EXCLUDED.{column}"));
    }

    let sql = format!(
        "INSERT INTO {table} ({columns}) VALUES ({values}) ON CONFLICT ({conflict}) DO UPDATE SET {updates} RETURNING id",
        table = target.table,
        columns = columns.join(", "),
        values = values.join(", "),
        conflict = target.conflict_columns.join(", "),
        updates = updates.join(", "),
    );

    Ok(UpsertStatement { sql, binds })
}

type ScalarQuery<'q> = QueryScalar<'q, Postgres, i64, PgArguments>;

fn bind_value(query: ScalarQuery<'_>, value: FieldValue) -> ScalarQuery<'_> {
    match value {
        FieldValue::Null => query,
        FieldValue::Bool(v) => query.bind(v),
        FieldValue::Int(v) => query.bind(v),
        FieldValue::Float(v) => query.bind(v),
        FieldValue::Text(v) => query.bind(v),
        FieldValue::Date(v) => query.bind(v),
        FieldValue::Timestamp(v) => query.bind(v),
        FieldValue::Json(v) => query.bind(v),
    }
}

/// Connection-level failures mean the store is gone, not that this row is bad.
fn classify(target: &UpsertTarget, key: &NaturalKey, err: sqlx::Error) -> WriteError {
    match err {
        sqlx::Error::PoolClosed | sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => {
            WriteError::StoreUnavailable(err.to_string())
        }
        other => WriteError::write_failed(target.table, key.canonical(target), other.to_string()),
    }
}

/// Postgres writer over a shared pool. One statement per call.
#[derive(Clone)]
pub struct PgUpsertWriter {
    pool: PgPool,
}

impl PgUpsertWriter {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl UpsertWriter for PgUpsertWriter {
    async fn upsert(
        &self,
        target: &UpsertTarget,
        key: &NaturalKey,
        fields: &Fields,
        payload: &serde_json::Value,
    ) -> Result<PersistedId, WriteError> {
        let statement = build_upsert_sql(target, key, fields, payload)?;

        let mut query = sqlx::query_scalar::<_, i64>(&statement.sql);
        for value in statement.binds {
            query = bind_value(query, value);
        }

        let id = query
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| classify(target, key, e))?;

        match id {
            Some(id) => Ok(PersistedId(id)),
            None => Err(WriteError::write_failed(
                target.table,
                key.canonical(target),
                "upsert reported no row",
            )),
        }
    }
}

/// A row held by [`MemoryUpsertWriter`].
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRow {
    pub id: PersistedId,
    pub table: String,
    pub key: NaturalKey,
    pub fields: Fields,
    pub payload: Option<serde_json::Value>,
    /// Upserts that landed on this row, including the insert.
    pub writes: u32,
}

#[derive(Default)]
struct MemoryState {
    rows: BTreeMap<(String, String), StoredRow>,
    next_id: i64,
}

/// In-memory store with the same key rules as Postgres. Used for dry runs and tests.
#[derive(Default)]
pub struct MemoryUpsertWriter {
    state: Mutex<MemoryState>,
}

impl MemoryUpsertWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// All rows of a table, in key order.
    pub fn rows(&self, table: &str) -> Vec<StoredRow> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state
            .rows
            .values()
            .filter(|r| r.table == table)
            .cloned()
            .collect()
    }

    pub fn row(&self, target: &UpsertTarget, key: &NaturalKey) -> Option<StoredRow> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state
            .rows
            .get(&(target.table.to_string(), key.canonical(target)))
            .cloned()
    }

    pub fn len(&self) -> usize {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl UpsertWriter for MemoryUpsertWriter {
    async fn upsert(
        &self,
        target: &UpsertTarget,
        key: &NaturalKey,
        fields: &Fields,
        payload: &serde_json::Value,
    ) -> Result<PersistedId, WriteError> {
        build_upsert_sql(target, key, fields, payload)?;

        let payload = target.payload_column.map(|_| payload.clone());
        let map_key = (target.table.to_string(), key.canonical(target));

        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(row) = state.rows.get_mut(&map_key) {
            for (column, value) in fields.iter() {
                match row.fields.0.iter_mut().find(|(c, _)| c == column) {
                    Some(slot) => slot.1 = value.clone(),
                    None => row.fields.push(column, value.clone()),
                }
            }
            if payload.is_some() {
                row.payload = payload;
            }
            row.writes += 1;
            return Ok(row.id);
        }

        state.next_id += 1;
        let id = PersistedId(state.next_id);
        state.rows.insert(
            map_key,
            StoredRow {
                id,
                table: target.table.to_string(),
                key: key.clone(),
                fields: fields.clone(),
                payload,
                writes: 1,
            },
        );
        Ok(id)
    }
}
