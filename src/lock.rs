//! Cross-process run lock backed by a single-row lock table.
//!
//! The lock table lives next to the engine's version table, named after it
//! with a fixed suffix, and holds exactly one integer `status` row. A run
//! acquires the lock by reading that row `FOR UPDATE` inside a transaction
//! held open for the whole run; committing the transaction releases it.

use tracing::warn;

use crate::engine::{Database, EngineError, Transaction};
use crate::error::LockError;

/// Suffix appended to the version-table name to form the lock-table name.
pub const LOCK_TABLE_SUFFIX: &str = "_lock";

/// Manages the lock table serializing concurrent migration runs.
pub struct LockManager {
    table: String,
}

impl LockManager {
    /// A manager for the lock table paired with `version_table`.
    pub fn new(version_table: &str) -> Self {
        Self {
            table: format!("{version_table}{LOCK_TABLE_SUFFIX}"),
        }
    }

    /// The lock table name.
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Idempotently create the lock table, then reset it to exactly one row
    /// with status 0.
    ///
    /// The reset makes this call unsafe to run concurrently from two
    /// processes without external coordination; it is meant to run once per
    /// process before acquisition.
    pub async fn ensure_table(&self, db: &dyn Database) -> Result<(), LockError> {
        self.reset(db).await.map_err(|cause| LockError::Ensure {
            table: self.table.clone(),
            cause,
        })
    }

    async fn reset(&self, db: &dyn Database) -> Result<(), EngineError> {
        db.execute(&format!(
            "CREATE TABLE IF NOT EXISTS {} (status INTEGER NOT NULL DEFAULT 0)",
            self.table
        ))
        .await?;

        let tx = db.begin().await?;
        tx.execute(&format!("DELETE FROM {}", self.table)).await?;
        tx.execute(&format!("INSERT INTO {}(status) VALUES(0)", self.table))
            .await?;
        tx.commit().await
    }

    /// Acquire the run lock: open a transaction and read the lock row with a
    /// blocking row-level lock. The returned guard keeps the transaction
    /// open; dropping or releasing it commits and thereby releases the lock.
    pub async fn acquire(&self, db: &dyn Database) -> Result<LockGuard, LockError> {
        let tx = self.lock_row(db).await.map_err(|cause| LockError::Acquire {
            table: self.table.clone(),
            cause,
        })?;

        Ok(LockGuard { tx: Some(tx) })
    }

    async fn lock_row(&self, db: &dyn Database) -> Result<Box<dyn Transaction>, EngineError> {
        let tx = db.begin().await?;
        tx.query_row_i64(&format!(
            "SELECT status FROM {} LIMIT 1 FOR UPDATE",
            self.table
        ))
        .await?;

        Ok(tx)
    }
}

/// Holds the run lock for the duration of one migration run.
///
/// Release is unconditional: [`release`](Self::release) commits the lock
/// transaction explicitly, and dropping an unreleased guard spawns the
/// commit on the ambient runtime so an unwinding run still lets go of the
/// lock.
pub struct LockGuard {
    tx: Option<Box<dyn Transaction>>,
}

impl LockGuard {
    /// Commit the lock transaction, releasing the lock.
    pub async fn release(mut self) {
        if let Some(tx) = self.tx.take() {
            if let Err(error) = tx.commit().await {
                warn!(%error, "failed to commit the migration lock transaction");
            }
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let Some(tx) = self.tx.take() else { return };

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    let _ = tx.commit().await;
                });
            }
            Err(_) => {
                warn!(
                    "migration lock dropped outside a runtime, its transaction cannot be committed"
                );
            }
        }
    }
}
