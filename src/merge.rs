//! Merging migrations across environment directories.
//!
//! Each configured environment maps to a subdirectory under the base path.
//! The merge walks environments in declaration order, filters out registered
//! migrations leaking into directories that declare nothing natively, rejects
//! genuine version collisions, and produces one version-ordered sequence.

use std::collections::HashMap;
use std::path::Path;

use tracing::warn;

use crate::engine::{EngineError, MigrationEngine};
use crate::error::MergeError;
use crate::migration::Migration;

/// Extension of native migration-declaration files.
const NATIVE_EXT: &str = ".rs";

/// Suffix of test-only files excluded from the native-declaration probe.
const TEST_SUFFIX: &str = "_test.rs";

/// One globally consistent, strictly version-ordered migration sequence.
///
/// Built fresh for every run and never mutated afterwards. Lookups are
/// binary searches over the sorted backing vector.
#[derive(Debug)]
pub struct MergedMigrations<D> {
    migrations: Vec<Migration<D>>,
}

impl<D> MergedMigrations<D> {
    pub(crate) fn from_unsorted(mut migrations: Vec<Migration<D>>) -> Self {
        migrations.sort_by_key(Migration::version);
        Self { migrations }
    }

    /// The first migration with a version strictly greater than `version`.
    pub fn next_after(&self, version: i64) -> Option<&Migration<D>> {
        let idx = self.migrations.partition_point(|m| m.version() <= version);
        self.migrations.get(idx)
    }

    /// The migration whose version is the closest at or below `version`.
    pub fn current_at_or_below(&self, version: i64) -> Option<&Migration<D>> {
        let idx = self.migrations.partition_point(|m| m.version() <= version);
        idx.checked_sub(1).map(|i| &self.migrations[i])
    }

    /// Number of migrations in the sequence.
    pub fn len(&self) -> usize {
        self.migrations.len()
    }

    /// Whether the sequence is empty.
    pub fn is_empty(&self) -> bool {
        self.migrations.is_empty()
    }

    /// Iterate in ascending version order.
    pub fn iter(&self) -> impl Iterator<Item = &Migration<D>> {
        self.migrations.iter()
    }
}

/// Merge the migrations of every configured environment into one sequence.
///
/// Environments whose directory does not exist are skipped; they are legal.
pub(crate) async fn merge_environments<E: MigrationEngine>(
    engine: &E,
    root: &Path,
    base: &Path,
    environments: &[String],
) -> Result<MergedMigrations<E::Db>, MergeError> {
    let mut merged: Vec<Migration<E::Db>> = Vec::new();
    let mut index: HashMap<i64, usize> = HashMap::new();

    for env in environments {
        let dir = root.join(base).join(env);

        if !dir_exists(&dir).await {
            warn!(env = %env, dir = %dir.display(), "no migrations for env");
            continue;
        }

        let has_native = declares_native_migrations(&dir).await.map_err(|cause| {
            MergeError::Probe {
                env: env.clone(),
                cause,
            }
        })?;

        let collected = match engine.collect_migrations(&dir).await {
            Ok(migrations) => migrations,
            Err(EngineError::NoMigrationFiles) => Vec::new(),
            Err(cause) => {
                return Err(MergeError::Collect {
                    env: env.clone(),
                    cause,
                });
            }
        };

        for migration in collected {
            // registered migrations are visible to the engine everywhere;
            // only keep them for directories that claim at least one natively
            if !has_native && migration.is_registered() {
                continue;
            }

            if let Some(&at) = index.get(&migration.version()) {
                let existing = &merged[at];
                if existing.is_same_registered(&migration) {
                    // the same registered migration rediscovered in another env
                    continue;
                }

                return Err(MergeError::DuplicateVersion {
                    version: migration.version(),
                    existing: existing.source().clone(),
                    incoming: migration.source().clone(),
                });
            }

            index.insert(migration.version(), merged.len());
            merged.push(migration);
        }
    }

    Ok(MergedMigrations::from_unsorted(merged))
}

async fn dir_exists(dir: &Path) -> bool {
    tokio::fs::metadata(dir)
        .await
        .map(|meta| meta.is_dir())
        .unwrap_or(false)
}

/// Whether a directory declares at least one migration natively, i.e. holds
/// a non-test native source file of its own.
async fn declares_native_migrations(dir: &Path) -> Result<bool, std::io::Error> {
    let mut entries = tokio::fs::read_dir(dir).await?;

    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_type().await?.is_file() {
            continue;
        }

        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };

        if name.ends_with(NATIVE_EXT) && !name.ends_with(TEST_SUFFIX) {
            return Ok(true);
        }
    }

    Ok(false)
}
