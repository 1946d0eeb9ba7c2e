//! Expiry repository: bounded-batch deletes under the advisory lock.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use jobmill_core::result::AppResult;
use jobmill_core::traits::{ExpiryCategory, ExpiryStore};

use crate::lock::{map_sqlx_error, AdvisoryLock};

/// PostgreSQL-backed implementation of the sweeper's store contract.
///
/// Batch deletes go through `ctid` subselects so `LIMIT` applies to a
/// `DELETE`, and run with the statement timeout lifted: a full batch on a
/// bloated table may legitimately exceed the server default.
#[derive(Debug)]
pub struct ExpiryRepository {
    pool: PgPool,
    lock: AdvisoryLock,
}

impl ExpiryRepository {
    pub fn new(pool: PgPool) -> Self {
        let lock = AdvisoryLock::new(pool.clone());
        Self { pool, lock }
    }

    async fn delete_batch(
        &self,
        sql: &str,
        bind: DateTime<Utc>,
        limit: u32,
        context: &str,
    ) -> AppResult<u64> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error(e, context))?;

        // SET LOCAL scopes the lifted timeout to this transaction, so the
        // connection goes back to the pool with its server default intact.
        sqlx::query("SET LOCAL statement_timeout = 0")
            .execute(tx.as_mut())
            .await
            .map_err(|e| map_sqlx_error(e, context))?;

        let result = sqlx::query(sql)
            .bind(bind)
            .bind(i64::from(limit))
            .execute(tx.as_mut())
            .await
            .map_err(|e| map_sqlx_error(e, context))?;

        tx.commit().await.map_err(|e| map_sqlx_error(e, context))?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl ExpiryStore for ExpiryRepository {
    async fn acquire_lock(&self, resource: &str, timeout: Duration) -> AppResult<()> {
        self.lock.acquire(resource, timeout).await
    }

    async fn release_lock(&self, resource: &str) -> AppResult<()> {
        self.lock.release(resource).await
    }

    async fn delete_expired(
        &self,
        category: ExpiryCategory,
        now: DateTime<Utc>,
        limit: u32,
    ) -> AppResult<u64> {
        let table = category.table();
        let sql = format!(
            "DELETE FROM {table} WHERE ctid IN ( \
             SELECT ctid FROM {table} WHERE expire_at IS NOT NULL AND expire_at < $1 LIMIT $2)"
        );
        self.delete_batch(&sql, now, limit, "Failed to delete expired rows")
            .await
    }

    async fn delete_superseded_states(
        &self,
        cutoff: DateTime<Utc>,
        limit: u32,
    ) -> AppResult<u64> {
        // A state row is superseded once the owning job points at a newer
        // state; the current state survives regardless of age.
        let sql = "DELETE FROM job_states WHERE ctid IN ( \
                   SELECT s.ctid FROM job_states s \
                   JOIN jobs j ON j.id = s.job_id \
                   WHERE s.created_at < $1 AND j.state_id IS DISTINCT FROM s.id \
                   LIMIT $2)";
        self.delete_batch(sql, cutoff, limit, "Failed to delete superseded states")
            .await
    }
}
