use anyhow::{Result, anyhow};
use bazaar_types::query::{Filter, Order, Table};
use bazaar_types::timestamp;
use rusqlite::Connection;
use rusqlite::types::{Value as SqlValue, ValueRef};
use serde_json::{Value, json};
use uuid::Uuid;

use crate::models::{JsonRow, NewProfile};
use crate::{Database, DbError};

impl Database {
    // -- Generic table access --

    pub fn select_rows(
        &self,
        table: Table,
        filters: &[Filter],
        order: Option<&Order>,
        limit: Option<u32>,
    ) -> Result<Vec<JsonRow>> {
        self.with_conn(|conn| {
            let mut params = Vec::new();
            let mut sql = format!("SELECT * FROM {}", table.as_str());
            push_where(&mut sql, table, filters, &mut params)?;

            if let Some(order) = order {
                check_column(table, &order.column)?;
                let direction = if order.descending { "DESC" } else { "ASC" };
                sql.push_str(&format!(" ORDER BY {} {} NULLS LAST", order.column, direction));
            }
            if let Some(limit) = limit {
                sql.push_str(&format!(" LIMIT {}", limit));
            }

            query_json(conn, &sql, &params)
        })
    }

    /// Insert a row, filling server-assigned columns, and return it as stored.
    pub fn insert_row(&self, table: Table, row: &JsonRow) -> Result<JsonRow> {
        self.with_conn(|conn| {
            let row = with_server_defaults(conn, table, row)?;
            insert(conn, table, &row, false)?
                .into_iter()
                .next()
                .ok_or_else(|| anyhow!("insert into {} returned no row", table.as_str()))
        })
    }

    /// Insert unless a unique constraint already holds an equivalent row.
    /// Returns `None` when the insert was skipped.
    pub fn upsert_row(&self, table: Table, row: &JsonRow) -> Result<Option<JsonRow>> {
        self.with_conn(|conn| {
            let row = with_server_defaults(conn, table, row)?;
            Ok(insert(conn, table, &row, true)?.into_iter().next())
        })
    }

    pub fn update_rows(&self, table: Table, filters: &[Filter], set: &JsonRow) -> Result<Vec<JsonRow>> {
        if set.is_empty() {
            return Err(DbError::InvalidValue {
                column: "*".into(),
                reason: "update sets no columns".into(),
            }
            .into());
        }

        self.with_conn(|conn| {
            let mut params = Vec::with_capacity(set.len() + filters.len());
            let mut assignments = Vec::with_capacity(set.len());
            for (column, value) in set {
                check_column(table, column)?;
                params.push(to_sql(value));
                assignments.push(format!("{} = ?{}", column, params.len()));
            }

            let mut sql = format!("UPDATE {} SET {}", table.as_str(), assignments.join(", "));
            push_where(&mut sql, table, filters, &mut params)?;
            sql.push_str(" RETURNING *");

            query_json(conn, &sql, &params)
        })
    }

    // -- Profiles --

    pub fn upsert_profile(&self, profile: &NewProfile<'_>) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO profiles (id, full_name, business_name, avatar_url)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(id) DO UPDATE SET
                    full_name = excluded.full_name,
                    business_name = excluded.business_name,
                    avatar_url = excluded.avatar_url",
                (profile.id, profile.full_name, profile.business_name, profile.avatar_url),
            )?;
            Ok(())
        })
    }
}

fn check_column(table: Table, column: &str) -> Result<()> {
    if table.has_column(column) {
        Ok(())
    } else {
        Err(DbError::UnknownColumn {
            table: table.as_str(),
            column: column.to_string(),
        }
        .into())
    }
}

fn push_where(
    sql: &mut String,
    table: Table,
    filters: &[Filter],
    params: &mut Vec<SqlValue>,
) -> Result<()> {
    let mut clauses = Vec::with_capacity(filters.len());

    for filter in filters {
        check_column(table, filter.column())?;
        let clause = match filter {
            Filter::Eq { column, value } => {
                params.push(to_sql(value));
                format!("{} = ?{}", column, params.len())
            }
            Filter::Lt { column, value } => {
                params.push(to_sql(value));
                format!("{} < ?{}", column, params.len())
            }
            Filter::In { column, values } => {
                if values.is_empty() {
                    // Nothing can match an empty set
                    "0".to_string()
                } else {
                    let placeholders: Vec<String> = values
                        .iter()
                        .map(|v| {
                            params.push(to_sql(v));
                            format!("?{}", params.len())
                        })
                        .collect();
                    format!("{} IN ({})", column, placeholders.join(", "))
                }
            }
            Filter::IsNull { column } => format!("{} IS NULL", column),
        };
        clauses.push(clause);
    }

    if !clauses.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }
    Ok(())
}

fn insert(conn: &Connection, table: Table, row: &JsonRow, ignore_duplicates: bool) -> Result<Vec<JsonRow>> {
    let mut columns = Vec::with_capacity(row.len());
    let mut params = Vec::with_capacity(row.len());
    for (column, value) in row {
        check_column(table, column)?;
        columns.push(column.as_str());
        params.push(to_sql(value));
    }

    let placeholders: Vec<String> = (1..=params.len()).map(|i| format!("?{}", i)).collect();
    let sql = format!(
        "INSERT {}INTO {} ({}) VALUES ({}) RETURNING *",
        if ignore_duplicates { "OR IGNORE " } else { "" },
        table.as_str(),
        columns.join(", "),
        placeholders.join(", "),
    );

    query_json(conn, &sql, &params)
}

/// Fill columns the service assigns itself. Message timestamps are kept
/// strictly increasing per conversation so cursors never skip a row.
fn with_server_defaults(conn: &Connection, table: Table, row: &JsonRow) -> Result<JsonRow> {
    let mut row = row.clone();

    match table {
        Table::Profiles => {
            if !row.contains_key("id") {
                return Err(DbError::InvalidValue {
                    column: "id".into(),
                    reason: "profiles are keyed by account id".into(),
                }
                .into());
            }
        }
        Table::Conversations => {
            row.entry("id").or_insert_with(|| json!(Uuid::new_v4()));
        }
        Table::Messages => {
            row.entry("id").or_insert_with(|| json!(Uuid::new_v4()));
            if !row.contains_key("created_at") {
                let conversation_id = row
                    .get("conversation_id")
                    .and_then(Value::as_str)
                    .ok_or_else(|| DbError::InvalidValue {
                        column: "conversation_id".into(),
                        reason: "required".into(),
                    })?;
                let created_at = next_message_timestamp(conn, conversation_id)?;
                row.insert("created_at".into(), Value::String(created_at));
            }
        }
    }

    Ok(row)
}

fn next_message_timestamp(conn: &Connection, conversation_id: &str) -> Result<String> {
    let now = timestamp::now();
    let last: Option<String> = conn.query_row(
        "SELECT MAX(created_at) FROM messages WHERE conversation_id = ?1",
        [conversation_id],
        |row| row.get(0),
    )?;

    let ts = match last.as_deref().and_then(timestamp::parse) {
        Some(prev) if prev >= now => prev + chrono::Duration::microseconds(1),
        _ => now,
    };
    Ok(timestamp::format(ts))
}

fn to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(*b as i64),
        Value::Number(n) => n
            .as_i64()
            .map(SqlValue::Integer)
            .or_else(|| n.as_f64().map(SqlValue::Real))
            .unwrap_or(SqlValue::Null),
        Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

fn query_json(conn: &Connection, sql: &str, params: &[SqlValue]) -> Result<Vec<JsonRow>> {
    let mut stmt = conn.prepare(sql)?;
    let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();

    let rows = stmt
        .query_map(rusqlite::params_from_iter(params.iter()), |row| {
            let mut out = JsonRow::new();
            for (idx, name) in columns.iter().enumerate() {
                let value = match row.get_ref(idx)? {
                    ValueRef::Null => Value::Null,
                    ValueRef::Integer(n) => json!(n),
                    ValueRef::Real(f) => json!(f),
                    ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
                    ValueRef::Blob(b) => json!(b),
                };
                out.insert(name.clone(), value);
            }
            Ok(out)
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}

/// Extension trait for optional query results
pub(crate) trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
