//! Roll-forward and rollback execution loops.
//!
//! Roll-forward applies pending migrations in ascending version order,
//! re-reading the current schema version before every step. On any failure
//! the controller rolls the database back to the version captured before the
//! run started; a failure during that rollback is fatal and reported as the
//! most severe outcome.

use std::future::Future;

use tokio::time::Instant;
use tracing::{error, info};

use crate::engine::{EngineError, MigrationEngine};
use crate::error::{MigrateError, MigrateResult, StepError};
use crate::merge::MergedMigrations;
use crate::migration::MigrationSource;
use crate::policy::{TimeoutPolicy, deadline_expired};

pub(crate) struct Runner<'a, E: MigrationEngine> {
    engine: &'a E,
    db: &'a E::Db,
    policy: TimeoutPolicy,
    run_deadline: Option<Instant>,
}

impl<'a, E: MigrationEngine> Runner<'a, E> {
    pub(crate) fn new(
        engine: &'a E,
        db: &'a E::Db,
        policy: TimeoutPolicy,
        run_deadline: Option<Instant>,
    ) -> Self {
        Self {
            engine,
            db,
            policy,
            run_deadline,
        }
    }

    /// Apply the merged sequence forward; on failure, roll back to
    /// `initial_version` and map the outcome to the error taxonomy.
    pub(crate) async fn execute(
        &self,
        migrations: &MergedMigrations<E::Db>,
        initial_version: i64,
    ) -> MigrateResult<()> {
        let forward = match self.roll_forward(migrations).await {
            Ok(applied) => {
                info!(migrations = applied, "completed");
                return Ok(());
            }
            Err(forward) => forward,
        };

        // rollback a failed run back to where the deployment started
        error!(
            error = %forward,
            target = initial_version,
            "failure during rollforward, rolling back to the initial state",
        );

        match self.roll_back_to(migrations, initial_version).await {
            Ok(rolled_back) => {
                info!(migrations = rolled_back, "rollbacked");
                Err(MigrateError::RollForward(forward))
            }
            Err(rollback) => {
                error!(
                    error = %rollback,
                    "encountered again an error while rollbacking, bailing: \
                     this might leave your database in an inconsistent state",
                );
                Err(MigrateError::RollBack { rollback, forward })
            }
        }
    }

    async fn roll_forward(&self, migrations: &MergedMigrations<E::Db>) -> Result<usize, StepError> {
        let mut applied = 0usize;

        loop {
            if deadline_expired(self.run_deadline) {
                return Err(StepError::DeadlineExceeded);
            }

            let current = self
                .engine
                .current_version(self.db)
                .await
                .map_err(StepError::Version)?;

            let Some(next) = migrations.next_after(current) else {
                return Ok(applied);
            };

            self.bounded_step(next.source(), next.up(self.db)).await?;
            applied += 1;
        }
    }

    async fn roll_back_to(
        &self,
        migrations: &MergedMigrations<E::Db>,
        target_version: i64,
    ) -> Result<usize, StepError> {
        let mut rolled_back = 0usize;

        loop {
            if deadline_expired(self.run_deadline) {
                return Err(StepError::DeadlineExceeded);
            }

            let current = self
                .engine
                .current_version(self.db)
                .await
                .map_err(StepError::Version)?;

            let Some(migration) = migrations.current_at_or_below(current) else {
                return Ok(rolled_back);
            };

            // never step below the version captured before the run
            if migration.version() <= target_version {
                return Ok(rolled_back);
            }

            self.bounded_step(migration.source(), migration.down(self.db))
                .await?;
            rolled_back += 1;
        }
    }

    /// Run one up/down action under the per-step deadline, capped by the
    /// whole-run deadline.
    async fn bounded_step<F>(&self, source: &MigrationSource, action: F) -> Result<(), StepError>
    where
        F: Future<Output = Result<(), EngineError>>,
    {
        let step_timeout = self.policy.step_timeout();
        let step_deadline = step_timeout.and_then(|timeout| Instant::now().checked_add(timeout));

        let deadline = match (step_deadline, self.run_deadline) {
            (Some(step), Some(run)) => Some(step.min(run)),
            (Some(step), None) => Some(step),
            (None, run) => run,
        };

        let Some(deadline) = deadline else {
            return action.await.map_err(|cause| StepError::Step {
                migration: source.clone(),
                cause,
            });
        };

        match tokio::time::timeout_at(deadline, action).await {
            Ok(result) => result.map_err(|cause| StepError::Step {
                migration: source.clone(),
                cause,
            }),
            Err(_elapsed) => {
                // attribute the expiry to whichever layer was binding
                if self.run_deadline.is_some_and(|run| deadline >= run) {
                    Err(StepError::DeadlineExceeded)
                } else {
                    Err(StepError::Timeout {
                        migration: source.clone(),
                        // the step layer was binding, so the timeout is set
                        timeout: step_timeout.unwrap_or_default(),
                    })
                }
            }
        }
    }
}
