//! Postgres implementation of the storage ports.
//!
//! Every port call that writes more than one row runs inside a single `pool.begin()`
//! transaction; uniqueness constraints in the schema back every idempotency guarantee.

use sqlx::{PgConnection, PgPool};
use std::str::FromStr;

use crate::domain::AuditLogEntry;
use crate::ports::{RepositoryError, RepositoryResult};

mod coordination;
mod directory;
mod settlements;
mod transactions;

/// Postgres-backed switch store.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

pub(crate) async fn insert_audit(
    conn: &mut PgConnection,
    entry: &AuditLogEntry,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO audit_logs (
            id, entity_type, entity_id, action, actor,
            old_values, new_values, correlation_id, created_at
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        "#,
    )
    .bind(entry.id)
    .bind(&entry.entity_type)
    .bind(&entry.entity_id)
    .bind(&entry.action)
    .bind(&entry.actor)
    .bind(&entry.old_values)
    .bind(&entry.new_values)
    .bind(&entry.correlation_id)
    .bind(entry.created_at)
    .execute(conn)
    .await?;
    Ok(())
}

/// Turns unique-constraint violations into `Conflict`, everything else stays a database error.
pub(crate) fn conflict_on_unique(err: sqlx::Error, context: impl FnOnce() -> String) -> RepositoryError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => RepositoryError::Conflict(context()),
        _ => RepositoryError::Database(err),
    }
}

pub(crate) fn parse_column<T>(column: &str, raw: &str) -> RepositoryResult<T>
where
    T: FromStr<Err = String>,
{
    raw.parse()
        .map_err(|e| RepositoryError::Corrupt(format!("{}: {}", column, e)))
}
