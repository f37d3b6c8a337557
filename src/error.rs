//! Error taxonomy for the orchestrator.
//!
//! Configuration, merge, and lock errors abort before any schema mutation and
//! are safe to retry unchanged. A roll-forward failure is recovered by
//! automatic rollback and reported as [`MigrateError::RollForward`]; a
//! rollback failure on top of it is fatal and reported as
//! [`MigrateError::RollBack`].

use std::time::Duration;

use thiserror::Error;

use crate::engine::EngineError;
use crate::migration::MigrationSource;

/// Result type alias for orchestrator operations.
pub type MigrateResult<T> = Result<T, MigrateError>;

/// Errors returned by [`Migrator::migrate`](crate::Migrator::migrate).
#[derive(Debug, Error)]
pub enum MigrateError {
    /// The engine rejected the run configuration.
    #[error("engine configuration failed: {0}")]
    Configuration(#[source] EngineError),

    /// The configuration file could not be loaded or parsed.
    #[error("invalid migrator configuration: {0}")]
    InvalidConfig(String),

    /// The schema version table could not be ensured or read.
    #[error("could not ensure the schema version table: {0}")]
    VersionTable(#[source] EngineError),

    /// Merging migrations across environments failed.
    #[error("error merging migrations: {0}")]
    Merge(#[from] MergeError),

    /// The run lock could not be set up or acquired.
    #[error(transparent)]
    Lock(#[from] LockError),

    /// A forward step failed; the database has been rolled back to the
    /// version recorded before the run started.
    #[error("error rolling forward migrations; recovered: the database has been rolled back to its initial state: {0}")]
    RollForward(#[source] StepError),

    /// A backward step failed after a forward failure. This is never retried
    /// automatically: the database may sit at neither the pre-run nor a
    /// fully-migrated state.
    #[error(
        "error rolling back migrations, the database may be left in an inconsistent state: \
         rollback error: {rollback}; rollforward error: {forward}"
    )]
    RollBack {
        /// The rollback failure.
        #[source]
        rollback: StepError,
        /// The forward failure that triggered the rollback.
        forward: StepError,
    },
}

/// Errors from the environment merge step.
#[derive(Debug, Error)]
pub enum MergeError {
    /// Two distinct migrations share one version.
    #[error("duplicate versions found in migrations: {version} in {existing} and {incoming}")]
    DuplicateVersion {
        /// The shared version.
        version: i64,
        /// Source of the migration collected first.
        existing: MigrationSource,
        /// Source of the colliding migration.
        incoming: MigrationSource,
    },

    /// The engine failed to collect one environment's migrations.
    #[error("could not collect migrations for env: {env}: {cause}")]
    Collect {
        /// The offending environment.
        env: String,
        /// The underlying engine error.
        #[source]
        cause: EngineError,
    },

    /// The environment directory could not be inspected for native
    /// migration declarations.
    #[error("could not inspect migrations directory for env: {env}: {cause}")]
    Probe {
        /// The offending environment.
        env: String,
        /// The underlying I/O error.
        #[source]
        cause: std::io::Error,
    },
}

/// Errors from the run lock.
#[derive(Debug, Error)]
pub enum LockError {
    /// The lock table could not be created or reset.
    #[error("could not ensure the lock table {table}: {cause}")]
    Ensure {
        /// The lock table name.
        table: String,
        /// The underlying engine error.
        #[source]
        cause: EngineError,
    },

    /// The lock row could not be read with intent to hold it.
    #[error("could not acquire the migration lock on {table}: {cause}")]
    Acquire {
        /// The lock table name.
        table: String,
        /// The underlying engine error.
        #[source]
        cause: EngineError,
    },
}

/// A failure inside the roll-forward or roll-back loop.
#[derive(Debug, Error)]
pub enum StepError {
    /// The current schema version could not be determined.
    #[error("could not determine the current schema version: {0}")]
    Version(#[source] EngineError),

    /// One migration's up/down action failed.
    #[error("migration {migration} failed: {cause}")]
    Step {
        /// Source descriptor of the failing migration.
        migration: MigrationSource,
        /// The underlying engine error.
        #[source]
        cause: EngineError,
    },

    /// One migration exceeded the per-step timeout.
    #[error("migration {migration} timed out after {timeout:?}")]
    Timeout {
        /// Source descriptor of the timed-out migration.
        migration: MigrationSource,
        /// The configured per-step timeout.
        timeout: Duration,
    },

    /// The whole-run deadline expired.
    #[error("migration run deadline exceeded")]
    DeadlineExceeded,
}
