//! Migration data model.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Timelike, Utc};

use crate::engine::EngineError;

/// Where a migration came from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MigrationSource {
    /// A migration tied to a file on disk.
    File(PathBuf),
    /// A migration registered programmatically with the engine.
    Registered(String),
}

impl fmt::Display for MigrationSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File(path) => write!(f, "{}", path.display()),
            Self::Registered(name) => write!(f, "{name}"),
        }
    }
}

/// The executable part of a migration, supplied by the engine.
///
/// The script owns the whole step: the schema change and the engine's
/// version-table bookkeeping both happen inside `up`/`down`.
#[async_trait]
pub trait MigrationScript<D>: Send + Sync {
    /// Apply the migration.
    async fn up(&self, db: &D) -> Result<(), EngineError>;

    /// Reverse the migration.
    async fn down(&self, db: &D) -> Result<(), EngineError>;
}

/// A single schema migration, immutable once collected.
pub struct Migration<D> {
    version: i64,
    source: MigrationSource,
    registered: bool,
    script: Arc<dyn MigrationScript<D>>,
}

impl<D> Migration<D> {
    /// A migration tied to a file on disk.
    pub fn file(version: i64, path: impl Into<PathBuf>, script: Arc<dyn MigrationScript<D>>) -> Self {
        Self {
            version,
            source: MigrationSource::File(path.into()),
            registered: false,
            script,
        }
    }

    /// A migration registered programmatically with the engine.
    ///
    /// Registered migrations are globally visible to the engine and may be
    /// rediscovered through several environment directories; the merge step
    /// deduplicates those rediscoveries by identity.
    pub fn registered(version: i64, name: impl Into<String>, script: Arc<dyn MigrationScript<D>>) -> Self {
        Self {
            version,
            source: MigrationSource::Registered(name.into()),
            registered: true,
            script,
        }
    }

    /// Version identifier, unique within a run and strictly ordered.
    pub fn version(&self) -> i64 {
        self.version
    }

    /// Origin descriptor, used in error messages.
    pub fn source(&self) -> &MigrationSource {
        &self.source
    }

    /// Whether this migration was registered programmatically.
    pub fn is_registered(&self) -> bool {
        self.registered
    }

    /// Whether `self` and `other` are the same registered migration
    /// rediscovered twice (identity, not structural equality).
    pub fn is_same_registered(&self, other: &Self) -> bool {
        self.registered
            && other.registered
            && self.source == other.source
            && Arc::ptr_eq(&self.script, &other.script)
    }

    /// Run the migration's forward step.
    pub async fn up(&self, db: &D) -> Result<(), EngineError> {
        self.script.up(db).await
    }

    /// Run the migration's backward step.
    pub async fn down(&self, db: &D) -> Result<(), EngineError> {
        self.script.down(db).await
    }
}

impl<D> Clone for Migration<D> {
    fn clone(&self) -> Self {
        Self {
            version: self.version,
            source: self.source.clone(),
            registered: self.registered,
            script: Arc::clone(&self.script),
        }
    }
}

impl<D> fmt::Debug for Migration<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Migration")
            .field("version", &self.version)
            .field("source", &self.source)
            .field("registered", &self.registered)
            .finish_non_exhaustive()
    }
}

/// Render an instant as a `YYYYMMDDHHMMSS` version number, the scheme
/// timestamp-versioned migrations conventionally use.
pub fn timestamp_version(at: DateTime<Utc>) -> i64 {
    i64::from(at.year()) * 10_000_000_000
        + i64::from(at.month()) * 100_000_000
        + i64::from(at.day()) * 1_000_000
        + i64::from(at.hour()) * 10_000
        + i64::from(at.minute()) * 100
        + i64::from(at.second())
}
