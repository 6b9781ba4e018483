pub mod migrations;
pub mod models;
pub mod procedures;
pub mod queries;

use anyhow::Result;
use rusqlite::Connection;
use std::path::Path;
use std::sync::Mutex;
use tracing::info;

/// Domain failures raised by the data service itself (as opposed to SQLite).
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("column `{column}` does not exist on `{table}`")]
    UnknownColumn { table: &'static str, column: String },

    #[error("user {user_id} is not a participant of conversation {conversation_id}")]
    NotParticipant {
        conversation_id: String,
        user_id: String,
    },

    #[error("conversation {0} does not exist")]
    ConversationNotFound(String),

    #[error("invalid value for `{column}`: {reason}")]
    InvalidValue { column: String, reason: String },
}

/// Postgres-style SQLSTATE for an error coming out of this crate, so callers
/// can classify failures the same way they would against the hosted service.
pub fn sql_state(err: &anyhow::Error) -> &'static str {
    if let Some(db_err) = err.downcast_ref::<DbError>() {
        return match db_err {
            DbError::UnknownColumn { .. } => "42703",
            DbError::NotParticipant { .. } => "42501",
            DbError::ConversationNotFound(_) => "P0002",
            DbError::InvalidValue { .. } => "22023",
        };
    }

    if let Some(rusqlite::Error::SqliteFailure(failure, _)) = err.downcast_ref::<rusqlite::Error>()
    {
        return match failure.extended_code {
            rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE | rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY => {
                "23505"
            }
            _ if failure.code == rusqlite::ErrorCode::ConstraintViolation => "23514",
            _ => "XX000",
        };
    }

    "XX000"
}

pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;

        // WAL mode for concurrent readers from other processes
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;

        migrations::run(&conn)?;

        info!("Database opened at {}", path.display());
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Private in-memory database, used by tests and the demo seed.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;

        migrations::run(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("DB lock poisoned: {}", e))?;
        f(&conn)
    }

    pub fn with_conn_mut<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T>,
    {
        let mut conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("DB lock poisoned: {}", e))?;
        f(&mut conn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_unique_violations() {
        let db = Database::open_in_memory().unwrap();
        let err = db
            .with_conn(|conn| {
                conn.execute(
                    "INSERT INTO profiles (id, full_name) VALUES ('p1', 'A'), ('p1', 'B')",
                    [],
                )?;
                Ok(())
            })
            .unwrap_err();

        assert_eq!(sql_state(&err), "23505");
    }

    #[test]
    fn classifies_domain_errors() {
        let err = anyhow::Error::new(DbError::UnknownColumn {
            table: "messages",
            column: "password".into(),
        });
        assert_eq!(sql_state(&err), "42703");
        assert_eq!(sql_state(&anyhow::anyhow!("boom")), "XX000");
    }
}
