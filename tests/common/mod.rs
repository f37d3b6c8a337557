//! Shared in-memory engine and database doubles for the integration tests.
//!
//! `MemoryDb` understands just enough SQL for the lock table and the test
//! migrations, journals every applied/reverted step, and models `FOR UPDATE`
//! with a genuinely blocking per-table row lock. `MemoryEngine` mirrors the
//! behavior of a real engine: registered migrations are visible to every
//! collection call, and each step is transactional (state is restored when
//! an action fails mid-way).

#![allow(dead_code)]

use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, OwnedMutexGuard};

use drover::{
    Database, EngineConfig, EngineError, Migration, MigrationEngine, MigrationScript,
    MigratorConfig, Transaction,
};

pub const BASE: &str = "test_sql";

/// One entry in the execution journal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JournalEntry {
    Up(i64),
    Down(i64),
}

#[derive(Default, Clone)]
struct DbState {
    tables: HashSet<String>,
    rows: HashMap<String, Vec<i64>>,
    applied: BTreeSet<i64>,
    journal: Vec<JournalEntry>,
}

/// An in-memory database handle.
#[derive(Clone, Default)]
pub struct MemoryDb {
    state: Arc<Mutex<DbState>>,
    row_locks: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl MemoryDb {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn current_version(&self) -> i64 {
        let state = self.state.lock().await;
        state.applied.iter().next_back().copied().unwrap_or(0)
    }

    pub async fn has_table(&self, name: &str) -> bool {
        self.state.lock().await.tables.contains(name)
    }

    pub async fn journal(&self) -> Vec<JournalEntry> {
        self.state.lock().await.journal.clone()
    }

    /// The integer rows of a single-column table, in insertion order.
    pub async fn table_rows(&self, name: &str) -> Vec<i64> {
        self.state
            .lock()
            .await
            .rows
            .get(name)
            .cloned()
            .unwrap_or_default()
    }

    async fn snapshot(&self) -> DbState {
        self.state.lock().await.clone()
    }

    async fn restore(&self, snapshot: DbState) {
        *self.state.lock().await = snapshot;
    }

    async fn record_up(&self, version: i64) {
        let mut state = self.state.lock().await;
        state.applied.insert(version);
        state.journal.push(JournalEntry::Up(version));
    }

    async fn record_down(&self, version: i64) {
        let mut state = self.state.lock().await;
        state.applied.remove(&version);
        state.journal.push(JournalEntry::Down(version));
    }

    async fn row_lock(&self, table: &str) -> Arc<Mutex<()>> {
        let mut locks = self.row_locks.lock().await;
        Arc::clone(locks.entry(table.to_string()).or_default())
    }

    async fn apply_sql(&self, sql: &str) -> Result<(), EngineError> {
        let sql = sql.trim();

        if let Some(rest) = sql.strip_prefix("CREATE TABLE IF NOT EXISTS ") {
            let table = table_name(rest)?;
            let mut state = self.state.lock().await;
            state.rows.entry(table.clone()).or_default();
            state.tables.insert(table);
            return Ok(());
        }

        if let Some(rest) = sql.strip_prefix("CREATE TABLE ") {
            let table = table_name(rest)?;
            let mut state = self.state.lock().await;
            if !state.tables.insert(table.clone()) {
                return Err(EngineError::database(format!(
                    "table {table} already exists"
                )));
            }
            state.rows.insert(table, Vec::new());
            return Ok(());
        }

        if let Some(rest) = sql.strip_prefix("DROP TABLE IF EXISTS ") {
            let table = table_name(rest)?;
            let mut state = self.state.lock().await;
            state.tables.remove(&table);
            state.rows.remove(&table);
            return Ok(());
        }

        if let Some(rest) = sql.strip_prefix("DELETE FROM ") {
            let table = table_name(rest)?;
            self.state.lock().await.rows.entry(table).or_default().clear();
            return Ok(());
        }

        if let Some(rest) = sql.strip_prefix("INSERT INTO ") {
            let table = table_name(rest)?;
            let value = inserted_value(rest)?;
            self.state.lock().await.rows.entry(table).or_default().push(value);
            return Ok(());
        }

        Err(EngineError::database(format!("unsupported sql: {sql}")))
    }
}

fn table_name(rest: &str) -> Result<String, EngineError> {
    rest.split(|c: char| c == '(' || c.is_whitespace())
        .next()
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .ok_or_else(|| EngineError::database(format!("missing table name in: {rest}")))
}

fn inserted_value(rest: &str) -> Result<i64, EngineError> {
    rest.split("VALUES(")
        .nth(1)
        .and_then(|tail| tail.split(')').next())
        .and_then(|value| value.trim().parse().ok())
        .ok_or_else(|| EngineError::database(format!("unsupported insert: {rest}")))
}

#[async_trait]
impl Database for MemoryDb {
    async fn execute(&self, sql: &str) -> Result<(), EngineError> {
        self.apply_sql(sql).await
    }

    async fn begin(&self) -> Result<Box<dyn Transaction>, EngineError> {
        Ok(Box::new(MemoryTransaction {
            db: self.clone(),
            held: Mutex::new(Vec::new()),
        }))
    }
}

struct MemoryTransaction {
    db: MemoryDb,
    held: Mutex<Vec<OwnedMutexGuard<()>>>,
}

#[async_trait]
impl Transaction for MemoryTransaction {
    async fn execute(&self, sql: &str) -> Result<(), EngineError> {
        self.db.apply_sql(sql).await
    }

    async fn query_row_i64(&self, sql: &str) -> Result<i64, EngineError> {
        if sql.contains("FOR UPDATE") {
            let table = sql
                .split_whitespace()
                .skip_while(|word| *word != "FROM")
                .nth(1)
                .ok_or_else(|| EngineError::database(format!("missing table in: {sql}")))?;

            // blocks until any concurrent holder commits
            let lock = self.db.row_lock(table).await;
            let guard = lock.lock_owned().await;
            self.held.lock().await.push(guard);

            return Ok(self.db.table_rows(table).await.first().copied().unwrap_or(0));
        }

        Ok(0)
    }

    async fn commit(self: Box<Self>) -> Result<(), EngineError> {
        // dropping the held guards releases the row locks
        Ok(())
    }
}

/// What a test migration does when executed.
#[derive(Debug, Clone)]
pub enum StepAction {
    CreateTable(&'static str),
    DropTable(&'static str),
    Fail(&'static str),
    /// Mutates state, then fails: exercises per-step transactionality.
    CreateThenFail {
        table: &'static str,
        message: &'static str,
    },
    Sleep(Duration),
    Noop,
}

async fn run_action(action: &StepAction, db: &MemoryDb) -> Result<(), EngineError> {
    match action {
        StepAction::CreateTable(table) => {
            db.execute(&format!("CREATE TABLE {table}(x integer)")).await
        }
        StepAction::DropTable(table) => {
            db.execute(&format!("DROP TABLE IF EXISTS {table}")).await
        }
        StepAction::Fail(message) => Err(EngineError::other(*message)),
        StepAction::CreateThenFail { table, message } => {
            db.execute(&format!("CREATE TABLE {table}(x integer)")).await?;
            Err(EngineError::other(*message))
        }
        StepAction::Sleep(duration) => {
            tokio::time::sleep(*duration).await;
            Ok(())
        }
        StepAction::Noop => Ok(()),
    }
}

/// An engine-built migration step: runs the action and keeps the version
/// bookkeeping, restoring the pre-step state when the action fails.
struct TestScript {
    version: i64,
    up: StepAction,
    down: StepAction,
}

#[async_trait]
impl MigrationScript<MemoryDb> for TestScript {
    async fn up(&self, db: &MemoryDb) -> Result<(), EngineError> {
        let snapshot = db.snapshot().await;
        match run_action(&self.up, db).await {
            Ok(()) => {
                db.record_up(self.version).await;
                Ok(())
            }
            Err(err) => {
                db.restore(snapshot).await;
                Err(err)
            }
        }
    }

    async fn down(&self, db: &MemoryDb) -> Result<(), EngineError> {
        let snapshot = db.snapshot().await;
        match run_action(&self.down, db).await {
            Ok(()) => {
                db.record_down(self.version).await;
                Ok(())
            }
            Err(err) => {
                db.restore(snapshot).await;
                Err(err)
            }
        }
    }
}

/// A file-backed test migration.
pub fn sql_migration(
    version: i64,
    file: &str,
    up: StepAction,
    down: StepAction,
) -> Migration<MemoryDb> {
    Migration::file(version, PathBuf::from(file), Arc::new(TestScript { version, up, down }))
}

/// A file-backed migration creating `table` on up and dropping it on down.
pub fn table_migration(version: i64, file: &str, table: &'static str) -> Migration<MemoryDb> {
    sql_migration(
        version,
        file,
        StepAction::CreateTable(table),
        StepAction::DropTable(table),
    )
}

/// A programmatically registered test migration.
pub fn code_migration(
    version: i64,
    name: &str,
    up: StepAction,
    down: StepAction,
) -> Migration<MemoryDb> {
    Migration::registered(version, name, Arc::new(TestScript { version, up, down }))
}

/// An in-memory migration engine.
///
/// Migrations are configured per directory basename; registered migrations
/// are returned by every collection call, like a real engine's global
/// registry.
#[derive(Default)]
pub struct MemoryEngine {
    by_dir: HashMap<String, Vec<Migration<MemoryDb>>>,
    registered: Vec<Migration<MemoryDb>>,
    failing_dirs: HashSet<String>,
    seen_config: Arc<std::sync::Mutex<Option<EngineConfig>>>,
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dir(mut self, dir: &str, migrations: Vec<Migration<MemoryDb>>) -> Self {
        self.by_dir.insert(dir.to_string(), migrations);
        self
    }

    pub fn with_registered(mut self, migration: Migration<MemoryDb>) -> Self {
        self.registered.push(migration);
        self
    }

    pub fn with_failing_dir(mut self, dir: &str) -> Self {
        self.failing_dirs.insert(dir.to_string());
        self
    }

    /// A handle observing the configuration the engine last received,
    /// usable after the engine has moved into a migrator.
    pub fn config_probe(&self) -> Arc<std::sync::Mutex<Option<EngineConfig>>> {
        Arc::clone(&self.seen_config)
    }
}

#[async_trait]
impl MigrationEngine for MemoryEngine {
    type Db = MemoryDb;

    async fn apply_config(&self, config: &EngineConfig) -> Result<(), EngineError> {
        if !matches!(config.dialect.as_str(), "postgres" | "sqlite3") {
            return Err(EngineError::UnsupportedDialect(config.dialect.clone()));
        }

        *self.seen_config.lock().unwrap() = Some(config.clone());
        Ok(())
    }

    async fn collect_migrations(&self, dir: &Path) -> Result<Vec<Migration<MemoryDb>>, EngineError> {
        let key = dir
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or_default();

        if self.failing_dirs.contains(key) {
            return Err(EngineError::database(format!("collection failed for {key}")));
        }

        let mut migrations = self.by_dir.get(key).cloned().unwrap_or_default();
        if migrations.is_empty() && self.registered.is_empty() {
            return Err(EngineError::NoMigrationFiles);
        }

        migrations.extend(self.registered.iter().cloned());
        Ok(migrations)
    }

    async fn current_version(&self, db: &MemoryDb) -> Result<i64, EngineError> {
        Ok(db.current_version().await)
    }
}

/// Scaffolds environment directories under a temporary filesystem root.
pub struct TestFs {
    root: tempfile::TempDir,
}

impl TestFs {
    pub fn new() -> Self {
        Self {
            root: tempfile::tempdir().expect("tempdir"),
        }
    }

    pub fn root(&self) -> &Path {
        self.root.path()
    }

    /// Create an environment directory holding the given (empty) files.
    pub fn add_env(&self, name: &str, files: &[&str]) {
        let dir = self.root.path().join(BASE).join(name);
        std::fs::create_dir_all(&dir).expect("create env dir");
        for file in files {
            std::fs::write(dir.join(file), "").expect("write env file");
        }
    }

    /// A config rooted at this filesystem, dialect `sqlite3`, base
    /// `test_sql`, no default environments.
    pub fn config(&self) -> MigratorConfig {
        MigratorConfig::new()
            .dialect("sqlite3")
            .root(self.root.path())
            .base_path(BASE)
            .set_environments(Vec::<String>::new())
    }
}
