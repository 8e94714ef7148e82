//! Connection pool monitoring utilities
//!
//! Instrumented transactions that log connection acquisition and hold
//! times, for diagnosing pool saturation under parallel ingestion.

use crate::error::{CatalogError, CatalogResult};
use sqlx::{Sqlite, SqliteConnection, Transaction};
use std::time::Instant;

/// Monitored transaction wrapper that logs acquisition and release timing
pub struct MonitoredTransaction<'c> {
    tx: Option<Transaction<'c, Sqlite>>,
    caller: &'static str,
    acquired_at: Instant,
}

impl<'c> MonitoredTransaction<'c> {
    /// Commit the transaction and log release timing
    pub async fn commit(mut self) -> CatalogResult<()> {
        let held_ms = self.acquired_at.elapsed().as_millis() as u64;
        let tx = self
            .tx
            .take()
            .ok_or_else(|| CatalogError::Internal("transaction already consumed".to_string()))?;

        tx.commit().await?;

        if held_ms > 2000 {
            tracing::warn!(
                caller = self.caller,
                held_ms,
                "LONG TRANSACTION - Connection held for extended period"
            );
        } else {
            tracing::trace!(caller = self.caller, held_ms, "Connection released (commit)");
        }

        Ok(())
    }

    /// Connection for executing statements inside the transaction
    pub fn conn(&mut self) -> CatalogResult<&mut SqliteConnection> {
        self.tx
            .as_deref_mut()
            .ok_or_else(|| CatalogError::Internal("transaction already consumed".to_string()))
    }
}

impl<'c> Drop for MonitoredTransaction<'c> {
    fn drop(&mut self) {
        if self.tx.is_some() {
            // Dropping an open sqlx transaction rolls it back
            tracing::debug!(
                caller = self.caller,
                held_ms = self.acquired_at.elapsed().as_millis() as u64,
                "Connection released (rollback on drop)"
            );
        }
    }
}

/// Begin a monitored transaction with connection pool timing logs
pub async fn begin_monitored<'c>(
    pool: &'c sqlx::SqlitePool,
    caller: &'static str,
) -> CatalogResult<MonitoredTransaction<'c>> {
    let start = Instant::now();

    let tx = pool.begin().await?;

    let wait_ms = start.elapsed().as_millis() as u64;
    if wait_ms > 1000 {
        tracing::warn!(
            caller,
            wait_ms,
            "SLOW CONNECTION ACQUISITION - Pool may be saturated"
        );
    } else {
        tracing::trace!(caller, wait_ms, "Connection acquired");
    }

    Ok(MonitoredTransaction {
        tx: Some(tx),
        caller,
        acquired_at: Instant::now(),
    })
}
