//! The boundary to the underlying migration engine.
//!
//! The engine is an external collaborator: it discovers migrations on disk,
//! tracks the applied schema version in a persisted table, and executes each
//! migration's up/down step. This crate only orchestrates it. The traits here
//! are the whole surface the orchestrator consumes; a database backend
//! implements [`Database`] and [`Transaction`], and the engine itself
//! implements [`MigrationEngine`].

use std::path::Path;

use async_trait::async_trait;
use thiserror::Error;

use crate::migration::Migration;

/// Default SQL dialect handed to the engine.
pub const DEFAULT_DIALECT: &str = "postgres";

/// Default name of the engine's version-tracking table.
pub const DEFAULT_VERSION_TABLE: &str = "schema_version";

/// Errors produced at the engine boundary.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A directory contains no migration files. This is a signal, not a
    /// failure: the merge step treats it as an empty collection.
    #[error("no migration files found")]
    NoMigrationFiles,

    /// The configured dialect is not supported by the engine.
    #[error("unsupported dialect: {0}")]
    UnsupportedDialect(String),

    /// Database operation error.
    #[error("database error: {0}")]
    Database(String),

    /// File system error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Any other engine-side error.
    #[error(transparent)]
    Other(Box<dyn std::error::Error + Send + Sync>),
}

impl EngineError {
    /// Create a database error.
    pub fn database(msg: impl Into<String>) -> Self {
        Self::Database(msg.into())
    }

    /// Wrap an arbitrary engine-side error.
    pub fn other(err: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::Other(err.into())
    }

    /// Whether this is the benign "directory holds no migration files" signal.
    pub fn is_no_migration_files(&self) -> bool {
        matches!(self, Self::NoMigrationFiles)
    }
}

/// Configuration injected into the engine at the start of every run.
///
/// The observed engines of this kind keep dialect and table name as
/// process-wide globals; here the configuration travels explicitly with each
/// run, so two migrators with different settings never race through shared
/// state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// SQL dialect the engine should speak.
    pub dialect: String,
    /// Name of the version-tracking table.
    pub version_table: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            dialect: DEFAULT_DIALECT.to_string(),
            version_table: DEFAULT_VERSION_TABLE.to_string(),
        }
    }
}

/// A live database handle.
///
/// The orchestrator itself only needs plain statement execution and
/// transactions (for the lock table); everything else goes through the
/// engine.
#[async_trait]
pub trait Database: Send + Sync {
    /// Execute a statement outside any transaction.
    async fn execute(&self, sql: &str) -> Result<(), EngineError>;

    /// Open a transaction.
    async fn begin(&self) -> Result<Box<dyn Transaction>, EngineError>;
}

/// An open database transaction.
#[async_trait]
pub trait Transaction: Send + Sync {
    /// Execute a statement inside the transaction.
    async fn execute(&self, sql: &str) -> Result<(), EngineError>;

    /// Read a single integer cell, honoring row-locking clauses such as
    /// `FOR UPDATE`: the call must block until the row lock is granted.
    async fn query_row_i64(&self, sql: &str) -> Result<i64, EngineError>;

    /// Commit the transaction, releasing any row locks it holds.
    async fn commit(self: Box<Self>) -> Result<(), EngineError>;
}

/// The migration engine consumed by the [`Migrator`](crate::Migrator).
#[async_trait]
pub trait MigrationEngine: Send + Sync {
    /// Database handle type the engine's migrations execute against.
    type Db: Database;

    /// Apply per-run configuration (dialect, version-table name).
    async fn apply_config(&self, config: &EngineConfig) -> Result<(), EngineError>;

    /// Collect the migrations declared in one directory, ordered by the
    /// engine's own convention.
    ///
    /// Returns [`EngineError::NoMigrationFiles`] when the directory holds
    /// nothing; the caller treats that as an empty result. Migrations that
    /// are registered programmatically are visible to every collection call,
    /// regardless of the directory that claims them.
    async fn collect_migrations(&self, dir: &Path) -> Result<Vec<Migration<Self::Db>>, EngineError>;

    /// Current schema version, ensuring the version table exists first.
    async fn current_version(&self, db: &Self::Db) -> Result<i64, EngineError>;
}
