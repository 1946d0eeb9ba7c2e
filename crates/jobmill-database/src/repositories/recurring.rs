//! Recurring job definition repository.
//!
//! Definitions are stored as field rows in the `recurring_jobs` table, one
//! row per field, so a reconciliation write touches only the fields the
//! diff names.

use sqlx::PgPool;

use jobmill_core::result::AppResult;
use jobmill_entity::recurring::snapshot::{fields, format_instant};
use jobmill_entity::recurring::{FieldDiff, FieldSnapshot};

use crate::lock::map_sqlx_error;

/// Repository for recurring job definition snapshots.
#[derive(Debug, Clone)]
pub struct RecurringRepository {
    pool: PgPool,
}

impl RecurringRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Load the field snapshot for one definition. `None` when no rows
    /// exist for the id.
    pub async fn load(&self, id: &str) -> AppResult<Option<FieldSnapshot>> {
        let rows: Vec<(String, String)> =
            sqlx::query_as("SELECT field, value FROM recurring_jobs WHERE id = $1")
                .bind(id)
                .fetch_all(&self.pool)
                .await
                .map_err(|e| map_sqlx_error(e, "Failed to load recurring job"))?;

        if rows.is_empty() {
            return Ok(None);
        }
        Ok(Some(rows.into_iter().collect()))
    }

    /// All known definition ids.
    pub async fn ids(&self) -> AppResult<Vec<String>> {
        sqlx::query_scalar("SELECT DISTINCT id FROM recurring_jobs ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error(e, "Failed to list recurring jobs"))
    }

    /// Persist a field diff atomically.
    ///
    /// Changed fields are upserted as-is; the next-execution field row is
    /// written or deleted per the diff so the stored snapshot and the
    /// in-memory one stay in step.
    pub async fn save(&self, id: &str, diff: &FieldDiff) -> AppResult<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error(e, "Failed to start transaction"))?;

        for (field, value) in &diff.fields {
            sqlx::query(
                "INSERT INTO recurring_jobs (id, field, value) VALUES ($1, $2, $3) \
                 ON CONFLICT (id, field) DO UPDATE SET value = EXCLUDED.value",
            )
            .bind(id)
            .bind(field)
            .bind(value)
            .execute(tx.as_mut())
            .await
            .map_err(|e| map_sqlx_error(e, "Failed to write recurring job field"))?;
        }

        match diff.next_execution {
            Some(next) => {
                sqlx::query(
                    "INSERT INTO recurring_jobs (id, field, value) VALUES ($1, $2, $3) \
                     ON CONFLICT (id, field) DO UPDATE SET value = EXCLUDED.value",
                )
                .bind(id)
                .bind(fields::NEXT_EXECUTION)
                .bind(format_instant(next))
                .execute(tx.as_mut())
                .await
                .map_err(|e| map_sqlx_error(e, "Failed to write next execution"))?;
            }
            None => {
                sqlx::query("DELETE FROM recurring_jobs WHERE id = $1 AND field = $2")
                    .bind(id)
                    .bind(fields::NEXT_EXECUTION)
                    .execute(tx.as_mut())
                    .await
                    .map_err(|e| map_sqlx_error(e, "Failed to clear next execution"))?;
            }
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error(e, "Failed to commit recurring job update"))
    }

    /// Delete all field rows for a definition.
    pub async fn delete(&self, id: &str) -> AppResult<()> {
        sqlx::query("DELETE FROM recurring_jobs WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error(e, "Failed to delete recurring job"))?;
        Ok(())
    }
}
