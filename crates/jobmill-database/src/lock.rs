//! Distributed locking on PostgreSQL session advisory locks.
//!
//! A lock is held by the database session that acquired it, so the holder
//! checks out a dedicated pool connection for the lock's lifetime and
//! releases on the same connection.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use sqlx::pool::PoolConnection;
use sqlx::{Connection, PgPool, Postgres};
use tokio::sync::Mutex;
use tokio::time;

use jobmill_core::error::{AppError, ErrorKind};
use jobmill_core::result::AppResult;

/// Poll interval between advisory-lock acquisition attempts.
const ACQUIRE_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Session-scoped distributed lock over Postgres advisory locks.
///
/// Resource keys are hashed server-side with `hashtext`, so any string key
/// works without client-side key registries. Held connections are kept out
/// of the pool until release.
#[derive(Debug)]
pub struct AdvisoryLock {
    pool: PgPool,
    held: Mutex<HashMap<String, PoolConnection<Postgres>>>,
}

impl AdvisoryLock {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            held: Mutex::new(HashMap::new()),
        }
    }

    /// Acquire the named lock, polling until `timeout` elapses.
    ///
    /// Fails with a lock-timeout error naming the resource when another
    /// session holds the lock for the whole window.
    pub async fn acquire(&self, resource: &str, timeout: Duration) -> AppResult<()> {
        let mut conn = self.pool.acquire().await.map_err(|e| {
            AppError::with_source(
                ErrorKind::Database,
                format!("Failed to check out a connection for lock '{resource}'"),
                e,
            )
        })?;

        let deadline = Instant::now() + timeout;
        loop {
            let acquired: bool =
                sqlx::query_scalar("SELECT pg_try_advisory_lock(hashtext($1))")
                    .bind(resource)
                    .fetch_one(conn.as_mut())
                    .await
                    .map_err(|e| map_sqlx_error(e, "Advisory lock acquisition failed"))?;

            if acquired {
                self.held.lock().await.insert(resource.to_string(), conn);
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(AppError::lock_timeout(resource));
            }
            time::sleep(ACQUIRE_POLL_INTERVAL).await;
        }
    }

    /// Release the named lock on the connection that acquired it.
    ///
    /// Releasing a lock this instance does not hold is an internal error;
    /// it indicates an unbalanced acquire/release pair. If the unlock
    /// statement itself fails, the connection must not go back into the
    /// pool: a pooled session would keep holding the advisory lock and
    /// block every acquirer until the connection is reaped, so it is torn
    /// down instead (the server drops session locks on disconnect).
    pub async fn release(&self, resource: &str) -> AppResult<()> {
        let mut conn = self
            .held
            .lock()
            .await
            .remove(resource)
            .ok_or_else(|| {
                AppError::internal(format!("Lock '{resource}' is not held by this process"))
            })?;

        let result: Result<bool, sqlx::Error> =
            sqlx::query_scalar("SELECT pg_advisory_unlock(hashtext($1))")
                .bind(resource)
                .fetch_one(conn.as_mut())
                .await;

        match result {
            Ok(released) => {
                if !released {
                    tracing::warn!(resource, "advisory lock was not held at the server");
                }
                Ok(())
            }
            Err(e) => {
                if let Err(close_err) = conn.detach().close().await {
                    tracing::warn!(
                        resource,
                        error = %close_err,
                        "failed to close connection after unlock failure"
                    );
                }
                Err(map_sqlx_error(e, "Advisory lock release failed"))
            }
        }
    }
}

/// Map a sqlx error onto the application taxonomy.
///
/// Server-reported lock timeouts (55P03) and cancelled statements (57014)
/// become the transient kinds the maintenance loops recover from; anything
/// else is a database error.
pub(crate) fn map_sqlx_error(err: sqlx::Error, context: &str) -> AppError {
    let code = err
        .as_database_error()
        .and_then(|e| e.code())
        .map(|c| c.to_string());
    match code.as_deref() {
        Some("55P03") => AppError::with_source(
            ErrorKind::LockTimeout,
            format!("{context}: lock not available"),
            err,
        ),
        Some("57014") => AppError::with_source(
            ErrorKind::Cancelled,
            format!("{context}: statement cancelled"),
            err,
        ),
        _ => AppError::with_source(ErrorKind::Database, format!("{context}: {err}"), err),
    }
}
