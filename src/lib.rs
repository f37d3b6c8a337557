//! # drover
//!
//! A schema-migration orchestrator layered above a lower-level migration
//! engine. The engine discovers migrations, tracks the applied version in a
//! persisted table, and executes each up/down step; drover orchestrates it:
//!
//! - **Environment merge**: migrations declared across several named
//!   environment folders are merged into one globally consistent,
//!   version-ordered sequence with duplicate detection.
//! - **Automatic rollback**: when any migration in the sequence fails, the
//!   database is rolled back to the exact version recorded before the run
//!   started.
//! - **Run locking**: an optional single-row lock table serializes
//!   concurrent runs against one database, across processes.
//! - **Two-tier timeouts**: independent whole-run and per-step deadlines,
//!   each disabled by a zero duration.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐     ┌───────────────┐     ┌──────────────────┐
//! │  Migrator  │────▶│ Merge Engine  │────▶│ MergedMigrations │
//! └────────────┘     └───────────────┘     └──────────────────┘
//!       │                                           │
//!       ▼                                           ▼
//! ┌────────────┐     ┌───────────────┐     ┌──────────────────┐
//! │ LockManager│     │ TimeoutPolicy │────▶│      Runner      │
//! └────────────┘     └───────────────┘     │ forward/rollback │
//!                                          └──────────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use drover::{Migrator, MigratorConfig, RunContext};
//!
//! async fn run_migrations(db: MyDb, engine: MyEngine) -> drover::MigrateResult<()> {
//!     let config = MigratorConfig::new()
//!         .base_path("db")
//!         .set_environments(["base", "production"])
//!         .global_lock(true);
//!
//!     let migrator = Migrator::with_config(db, engine, config);
//!     migrator.migrate(RunContext::background()).await
//! }
//! ```

pub mod engine;
pub mod error;
pub mod lock;
pub mod merge;
pub mod migration;
pub mod migrator;
pub mod policy;

mod runner;

pub use engine::{
    DEFAULT_DIALECT, DEFAULT_VERSION_TABLE, Database, EngineConfig, EngineError, MigrationEngine,
    Transaction,
};
pub use error::{LockError, MergeError, MigrateError, MigrateResult, StepError};
pub use lock::{LOCK_TABLE_SUFFIX, LockGuard, LockManager};
pub use merge::MergedMigrations;
pub use migration::{Migration, MigrationScript, MigrationSource, timestamp_version};
pub use migrator::{Migrator, MigratorConfig};
pub use policy::{DEFAULT_RUN_TIMEOUT, DEFAULT_STEP_TIMEOUT, RunContext};
