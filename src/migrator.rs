//! The migrator façade and its configuration.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{error, info};

use crate::engine::{EngineConfig, EngineError, MigrationEngine};
use crate::error::{LockError, MigrateError, MigrateResult, StepError};
use crate::lock::LockManager;
use crate::merge::merge_environments;
use crate::policy::{DEFAULT_RUN_TIMEOUT, DEFAULT_STEP_TIMEOUT, RunContext, TimeoutPolicy};
use crate::runner::Runner;

/// Configuration for a [`Migrator`].
///
/// Defaults match a conventional deployment: dialect `postgres`, migrations
/// under `./sql/base`, a five-minute run timeout, a one-minute per-step
/// timeout, and no cross-process locking.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct MigratorConfig {
    /// SQL dialect handed to the engine.
    pub dialect: String,

    /// Filesystem root the base path is resolved against.
    pub root: PathBuf,

    /// Directory under the root where environment folders live.
    pub base: PathBuf,

    /// Environment folders to merge, in declaration order. An empty list
    /// addresses the base path itself.
    pub environments: Vec<String>,

    /// Name of the engine's version table. Overriding it partitions version
    /// tracking, e.g. one table per migration lane.
    pub version_table: String,

    /// Timeout for the whole run; zero disables it. A deadline already
    /// carried by the caller's [`RunContext`] always takes precedence.
    #[serde(rename = "run_timeout_secs", with = "duration_secs")]
    pub run_timeout: Duration,

    /// Timeout for each individual migration step; zero disables it.
    #[serde(rename = "step_timeout_secs", with = "duration_secs")]
    pub step_timeout: Duration,

    /// Serialize concurrent runs through the single-row lock table.
    pub global_lock: bool,
}

impl Default for MigratorConfig {
    fn default() -> Self {
        Self {
            dialect: crate::engine::DEFAULT_DIALECT.to_string(),
            root: PathBuf::from("."),
            base: PathBuf::from("sql"),
            environments: vec!["base".to_string()],
            version_table: crate::engine::DEFAULT_VERSION_TABLE.to_string(),
            run_timeout: DEFAULT_RUN_TIMEOUT,
            step_timeout: DEFAULT_STEP_TIMEOUT,
            global_lock: false,
        }
    }
}

impl MigratorConfig {
    /// Create a configuration with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> MigrateResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|err| {
            MigrateError::InvalidConfig(format!("{}: {err}", path.display()))
        })?;

        Self::from_toml_str(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// ```toml
    /// dialect = "postgres"
    /// base = "sql"
    /// environments = ["base", "production"]
    /// run_timeout_secs = 300
    /// step_timeout_secs = 60
    /// global_lock = true
    /// ```
    pub fn from_toml_str(content: &str) -> MigrateResult<Self> {
        toml::from_str(content).map_err(|err| MigrateError::InvalidConfig(err.to_string()))
    }

    /// Set the SQL dialect.
    pub fn dialect(mut self, dialect: impl Into<String>) -> Self {
        self.dialect = dialect.into();
        self
    }

    /// Set the filesystem root.
    pub fn root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = root.into();
        self
    }

    /// Set the base path where environment folders live.
    pub fn base_path(mut self, base: impl Into<PathBuf>) -> Self {
        self.base = base.into();
        self
    }

    /// Append environment folders to merge with the migrations.
    pub fn environments<I, S>(mut self, envs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.environments.extend(envs.into_iter().map(Into::into));
        self
    }

    /// Replace the environment folders. An empty list disables environment
    /// partitioning: migrations are searched for in the base path only.
    pub fn set_environments<I, S>(mut self, envs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.environments = envs.into_iter().map(Into::into).collect();
        self
    }

    /// Set the whole-run timeout; zero disables it.
    pub fn run_timeout(mut self, timeout: Duration) -> Self {
        self.run_timeout = timeout;
        self
    }

    /// Set the per-step timeout; zero disables it.
    pub fn step_timeout(mut self, timeout: Duration) -> Self {
        self.step_timeout = timeout;
        self
    }

    /// Override the engine's version-table name.
    pub fn version_table(mut self, table: impl Into<String>) -> Self {
        self.version_table = table.into();
        self
    }

    /// Enable or disable the cross-process run lock.
    pub fn global_lock(mut self, enabled: bool) -> Self {
        self.global_lock = enabled;
        self
    }

    pub(crate) fn resolved_environments(&self) -> Vec<String> {
        if self.environments.is_empty() {
            // a blank name addresses the base path itself
            vec![String::new()]
        } else {
            self.environments.clone()
        }
    }

    fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            dialect: self.dialect.clone(),
            version_table: self.version_table.clone(),
        }
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(deserializer)?))
    }
}

/// Applies migrations to a versioned database schema.
///
/// By default the migrator runs migrations from the `base` environment
/// folder; extra environments are merged into one version-ordered sequence.
/// Whenever a migration fails, [`migrate`](Self::migrate) rolls the database
/// back to its initial state before returning an error.
pub struct Migrator<E: MigrationEngine> {
    db: E::Db,
    engine: E,
    config: MigratorConfig,
}

impl<E: MigrationEngine> Migrator<E> {
    /// A migrator with default configuration.
    pub fn new(db: E::Db, engine: E) -> Self {
        Self::with_config(db, engine, MigratorConfig::default())
    }

    /// A migrator with explicit configuration.
    pub fn with_config(db: E::Db, engine: E, config: MigratorConfig) -> Self {
        Self { db, engine, config }
    }

    /// The active configuration.
    pub fn config(&self) -> &MigratorConfig {
        &self.config
    }

    /// Apply the merged migration sequence.
    ///
    /// The sequence is collected across the configured environments, applied
    /// forward in version order, and rolled back to the pre-run version if
    /// any step fails. With `global_lock` enabled, concurrent runs against
    /// the same database are serialized through the lock table; the lock is
    /// released on every exit path.
    pub async fn migrate(&self, ctx: RunContext) -> MigrateResult<()> {
        self.engine
            .apply_config(&self.config.engine_config())
            .await
            .map_err(MigrateError::Configuration)?;

        let policy = TimeoutPolicy::new(self.config.run_timeout, self.config.step_timeout);
        let run_deadline = policy.run_deadline(&ctx);

        info!(dialect = %self.config.dialect, "applying db migrations");

        // captured before any mutation: the rollback target for this run
        let initial_version = bounded(run_deadline, self.engine.current_version(&self.db))
            .await
            .unwrap_or_else(|| Err(deadline_cause()))
            .map_err(MigrateError::VersionTable)?;

        let environments = self.config.resolved_environments();
        let merged = match merge_environments(
            &self.engine,
            &self.config.root,
            &self.config.base,
            &environments,
        )
        .await
        {
            Ok(merged) => merged,
            Err(err) => {
                error!(error = %err, "could not merge migrations");
                return Err(err.into());
            }
        };

        if merged.is_empty() {
            info!("no db migrations to be applied");
            return Ok(());
        }

        let mut lock = None;
        if self.config.global_lock {
            let manager = LockManager::new(&self.config.version_table);

            // both lock phases stay under the run deadline: a run queued
            // behind another process must give up when its time is spent
            let ensured = bounded(run_deadline, manager.ensure_table(&self.db))
                .await
                .unwrap_or_else(|| {
                    Err(LockError::Ensure {
                        table: manager.table().to_string(),
                        cause: deadline_cause(),
                    })
                });
            if let Err(err) = ensured {
                error!(error = %err, "could not ensure the lock table exists");
                return Err(err.into());
            }

            let acquired = bounded(run_deadline, manager.acquire(&self.db))
                .await
                .unwrap_or_else(|| {
                    Err(LockError::Acquire {
                        table: manager.table().to_string(),
                        cause: deadline_cause(),
                    })
                });
            match acquired {
                Ok(guard) => lock = Some(guard),
                Err(err) => {
                    error!(error = %err, "lock could not be acquired prior to running migrations");
                    return Err(err.into());
                }
            }
        }

        let runner = Runner::new(&self.engine, &self.db, policy, run_deadline);
        let result = runner.execute(&merged, initial_version).await;

        // unconditional release, on success and failure alike
        if let Some(guard) = lock {
            guard.release().await;
        }

        result
    }
}

/// Run a future under the whole-run deadline; `None` means it expired.
async fn bounded<T>(deadline: Option<Instant>, future: impl Future<Output = T>) -> Option<T> {
    match deadline {
        None => Some(future.await),
        Some(deadline) => tokio::time::timeout_at(deadline, future).await.ok(),
    }
}

fn deadline_cause() -> EngineError {
    EngineError::other(StepError::DeadlineExceeded)
}
