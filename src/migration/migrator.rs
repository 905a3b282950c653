//! Migrator - runs resolved paths against one partition
//!
//! A run takes the partition's lock, reads the marker, resolves the path and then applies
//! each revision as its own step. A step is one transaction (when the executor supports
//! transactional DDL) holding the locking marker read, the transform, the marker update and
//! the history entry. A failing step rolls back on its own; steps committed before it stay.

use crate::config::{MigrateConfig, DEFAULT_PARTITION};
use crate::executor::{DbError, DbExecutor, ScriptExecutor};
use crate::migration::checksum::{calculate_checksum, validate_checksum};
use crate::migration::graph::RevisionGraph;
use crate::migration::lock::{holder_id, RunLockGuard};
use crate::migration::marker::MarkerStore;
use crate::migration::record::HistoryEntry;
use crate::migration::revision::{Direction, Revision};
use crate::migration::status::{MigrationStatus, RevisionSummary};
use crate::migration::target::Target;
use crate::migration::{MigrationError, SchemaManager};
use crate::transaction::Transaction;
use std::collections::HashSet;
use std::time::Instant;

#[cfg(feature = "metrics")]
use crate::metrics::METRICS;
#[cfg(feature = "tracing")]
use crate::metrics::tracing_helpers;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigratorOptions {
    pub partition: String,
    /// 0 fails at once if another run holds the lock
    pub lock_timeout_seconds: u64,
    pub transaction_per_revision: bool,
    pub backfill_batch_size: usize,
}

impl MigratorOptions {
    pub fn from_config(config: &MigrateConfig, partition: &str) -> Self {
        Self {
            partition: partition.to_string(),
            lock_timeout_seconds: config.lock_timeout_seconds,
            transaction_per_revision: config.transaction_per_revision,
            backfill_batch_size: config.backfill_batch_size,
        }
    }

    #[must_use]
    pub fn with_partition(mut self, partition: &str) -> Self {
        self.partition = partition.to_string();
        self
    }

    #[must_use]
    pub fn with_lock_timeout(mut self, seconds: u64) -> Self {
        self.lock_timeout_seconds = seconds;
        self
    }
}

impl Default for MigratorOptions {
    fn default() -> Self {
        Self::from_config(&MigrateConfig::default(), DEFAULT_PARTITION)
    }
}

/// Outcome of a successful run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub partition: String,
    pub direction: Direction,
    /// Revisions applied, in order
    pub applied: Vec<String>,
    /// Marker after the run
    pub marker: Vec<String>,
}

/// Core migration execution engine
pub struct Migrator<'a> {
    graph: &'a RevisionGraph,
    store: &'a dyn MarkerStore,
    options: MigratorOptions,
    holder: String,
}

impl<'a> Migrator<'a> {
    pub fn new(graph: &'a RevisionGraph, store: &'a dyn MarkerStore, options: MigratorOptions) -> Self {
        Self {
            graph,
            store,
            options,
            holder: holder_id(),
        }
    }

    pub fn graph(&self) -> &'a RevisionGraph {
        self.graph
    }

    pub fn options(&self) -> &MigratorOptions {
        &self.options
    }

    pub fn partition(&self) -> &str {
        &self.options.partition
    }

    /// Marker tokens of the partition (bootstraps the state tables)
    ///
    /// # Errors
    ///
    /// Returns `MigrationError::Database` if the state tables cannot be read.
    pub fn current(&self, executor: &dyn DbExecutor) -> Result<Vec<String>, MigrationError> {
        self.store.ensure(executor)?;
        self.store.current(executor, self.partition())
    }

    /// Applied vs pending revisions for the partition
    ///
    /// # Errors
    ///
    /// Database errors, or `UnknownRevision` if the marker names a revision this build
    /// doesn't know.
    pub fn status(&self, executor: &dyn DbExecutor) -> Result<MigrationStatus, MigrationError> {
        let current = self.current(executor)?;
        let applied = self.graph.applied(&current)?;

        let (applied_revs, pending): (Vec<&Revision>, Vec<&Revision>) =
            self.graph.iter().partition(|r| applied.contains(r.id()));
        let summary = |r: &Revision| RevisionSummary {
            id: r.id().to_string(),
            message: r.message().to_string(),
        };

        Ok(MigrationStatus {
            partition: self.partition().to_string(),
            current,
            applied: applied_revs.into_iter().map(summary).collect(),
            pending: pending.into_iter().map(summary).collect(),
        })
    }

    /// Recorded steps for the partition, oldest first
    ///
    /// # Errors
    ///
    /// Returns `MigrationError::Database` if the history table cannot be read.
    pub fn history(&self, executor: &dyn DbExecutor) -> Result<Vec<HistoryEntry>, MigrationError> {
        self.store.ensure(executor)?;
        self.store.history(executor, self.partition())
    }

    /// Revisions a run to `target` would apply, without applying them
    ///
    /// # Errors
    ///
    /// Graph and precondition errors from [`RevisionGraph::resolve_path`].
    pub fn plan(
        &self,
        executor: &dyn DbExecutor,
        target: &Target,
        direction: Direction,
    ) -> Result<Vec<&'a Revision>, MigrationError> {
        let current = self.current(executor)?;
        self.graph.resolve_path(&current, target, direction)
    }

    /// Upgrade the partition to `target`
    ///
    /// # Errors
    ///
    /// See [`Migrator::apply_range`]; additionally `LockTimeout` and resolution errors, both
    /// raised before any transform runs.
    pub fn upgrade(
        &self,
        executor: &dyn DbExecutor,
        target: &Target,
    ) -> Result<RunReport, MigrationError> {
        self.run(executor, target, Direction::Upgrade)
    }

    /// Downgrade the partition to `target`
    ///
    /// # Errors
    ///
    /// Same as [`Migrator::upgrade`].
    pub fn downgrade(
        &self,
        executor: &dyn DbExecutor,
        target: &Target,
    ) -> Result<RunReport, MigrationError> {
        self.run(executor, target, Direction::Downgrade)
    }

    fn run(
        &self,
        executor: &dyn DbExecutor,
        target: &Target,
        direction: Direction,
    ) -> Result<RunReport, MigrationError> {
        self.store.ensure(executor)?;
        let _lock = RunLockGuard::acquire(
            self.store,
            executor,
            self.partition(),
            &self.holder,
            self.options.lock_timeout_seconds,
        )?;

        let current = self.store.current(executor, self.partition())?;
        let steps = self.graph.resolve_path(&current, target, direction)?;

        if steps.is_empty() {
            log::info!(
                "[{}] Nothing to {}: already at {}",
                self.partition(),
                direction.as_str(),
                target
            );
        } else {
            log::info!(
                "[{}] {} {} revision(s) towards {}",
                self.partition(),
                direction,
                steps.len(),
                target
            );
        }

        self.apply_range(executor, &current, &steps, direction)
    }

    /// Apply `steps` in order starting from marker `current`, stopping at the first failure
    ///
    /// # Errors
    ///
    /// `ExecutionFailed` names the failing revision and lists the revisions committed before
    /// it; those stay committed. `MarkerChanged` if another run moved the marker.
    pub fn apply_range(
        &self,
        executor: &dyn DbExecutor,
        current: &[String],
        steps: &[&Revision],
        direction: Direction,
    ) -> Result<RunReport, MigrationError> {
        self.apply_steps(executor, current, steps, direction, false)
    }

    /// Apply one revision to a partition whose marker is `expected`; returns the new marker
    ///
    /// # Errors
    ///
    /// `InvalidTarget` if the revision cannot be applied in `direction` from `expected`,
    /// `MarkerChanged` if the stored marker is not `expected`, and `ExecutionFailed` if the
    /// step rolled back.
    pub fn apply(
        &self,
        executor: &dyn DbExecutor,
        revision: &Revision,
        direction: Direction,
        expected: &[String],
    ) -> Result<Vec<String>, MigrationError> {
        self.step(executor, revision, direction, expected, false)
    }

    fn apply_steps(
        &self,
        executor: &dyn DbExecutor,
        current: &[String],
        steps: &[&Revision],
        direction: Direction,
        offline: bool,
    ) -> Result<RunReport, MigrationError> {
        let mut marker = current.to_vec();
        let mut completed = Vec::with_capacity(steps.len());

        for revision in steps {
            match self.step(executor, revision, direction, &marker, offline) {
                Ok(next) => {
                    completed.push(revision.id().to_string());
                    marker = next;
                }
                Err(MigrationError::ExecutionFailed {
                    revision,
                    direction,
                    partition,
                    error,
                    ..
                }) => {
                    log::error!(
                        "[{partition}] {direction} of {revision} failed and was rolled back; \
                         partition left at [{}]",
                        marker.join(", ")
                    );
                    return Err(MigrationError::ExecutionFailed {
                        revision,
                        direction,
                        partition,
                        error,
                        completed,
                    });
                }
                Err(MigrationError::MarkerChanged {
                    partition,
                    expected,
                    found,
                    ..
                }) => {
                    return Err(MigrationError::MarkerChanged {
                        partition,
                        expected,
                        found,
                        completed,
                    });
                }
                Err(other) => {
                    if !completed.is_empty() {
                        log::warn!(
                            "[{}] Run stopped after committing {}",
                            self.partition(),
                            completed.join(", ")
                        );
                    }
                    return Err(other);
                }
            }
        }

        Ok(RunReport {
            partition: self.partition().to_string(),
            direction,
            applied: completed,
            marker,
        })
    }

    /// Compute the marker after one step, checking the step makes sense from `expected`
    fn next_marker(
        &self,
        revision: &Revision,
        direction: Direction,
        expected: &[String],
    ) -> Result<Vec<String>, MigrationError> {
        let mut applied = self.graph.applied(expected)?;
        let id = revision.id();

        match direction {
            Direction::Upgrade => {
                if applied.contains(id) {
                    return Err(MigrationError::InvalidTarget(format!(
                        "revision {id} is already applied"
                    )));
                }
                if let Some(parent) = revision
                    .down_revisions()
                    .iter()
                    .find(|p| !applied.contains(p.as_str()))
                {
                    return Err(MigrationError::InvalidTarget(format!(
                        "revision {id} needs {parent} applied first"
                    )));
                }
                applied.insert(id);
            }
            Direction::Downgrade => {
                if !applied.contains(id) {
                    return Err(MigrationError::InvalidTarget(format!(
                        "revision {id} is not applied"
                    )));
                }
                if let Some(child) = self
                    .graph
                    .successors(id)
                    .into_iter()
                    .find(|c| applied.contains(c.id()))
                {
                    return Err(MigrationError::InvalidTarget(format!(
                        "revision {id} has {} applied on top of it",
                        child.id()
                    )));
                }
                applied.remove(id);
            }
        }

        Ok(self.graph.heads_of(&applied))
    }

    fn step(
        &self,
        executor: &dyn DbExecutor,
        revision: &Revision,
        direction: Direction,
        expected: &[String],
        offline: bool,
    ) -> Result<Vec<String>, MigrationError> {
        let revision = self
            .graph
            .get(revision.id())
            .ok_or_else(|| MigrationError::UnknownRevision(revision.id().to_string()))?;
        let next = self.next_marker(revision, direction, expected)?;

        #[cfg(feature = "tracing")]
        let _span =
            tracing_helpers::step_span(revision.id(), direction.as_str(), self.partition()).entered();

        let start = Instant::now();
        let result = self.run_step(executor, revision, direction, expected, &next, offline, start);

        match &result {
            Ok(()) => {
                log::info!(
                    "[{}] {} {} ({}) in {:?}",
                    self.partition(),
                    direction,
                    revision.id(),
                    revision.message(),
                    start.elapsed()
                );
                #[cfg(feature = "metrics")]
                METRICS.record_step(self.partition(), direction.as_str(), start.elapsed());
            }
            Err(_) => {
                #[cfg(feature = "metrics")]
                METRICS.record_step_failure(self.partition(), direction.as_str());
            }
        }

        result.map(|()| next)
    }

    #[allow(clippy::too_many_arguments)]
    fn run_step(
        &self,
        executor: &dyn DbExecutor,
        revision: &Revision,
        direction: Direction,
        expected: &[String],
        next: &[String],
        offline: bool,
        start: Instant,
    ) -> Result<(), MigrationError> {
        let partition = self.partition();
        let failed = |error: String| MigrationError::ExecutionFailed {
            revision: revision.id().to_string(),
            direction,
            partition: partition.to_string(),
            error,
            completed: Vec::new(),
        };

        let tx = if self.options.transaction_per_revision && executor.supports_transactional_ddl() {
            Some(Transaction::begin(executor).map_err(|e| failed(e.to_string()))?)
        } else {
            None
        };
        let step_executor: &dyn DbExecutor = match &tx {
            Some(tx) => tx,
            None => executor,
        };

        if !offline {
            let found = self
                .store
                .current_for_update(step_executor, partition)
                .map_err(|e| failed(e.to_string()))?;
            if !same_marker(&found, expected) {
                return Err(MigrationError::MarkerChanged {
                    partition: partition.to_string(),
                    expected: expected.to_vec(),
                    found,
                    completed: Vec::new(),
                });
            }
        }

        let manager = SchemaManager::new(step_executor, partition)
            .with_batch_size(self.options.backfill_batch_size);
        revision
            .run(direction, &manager)
            .map_err(|e| failed(e.to_string()))?;

        let elapsed_ms = i64::try_from(start.elapsed().as_millis()).unwrap_or(i64::MAX);
        let entry = HistoryEntry::new(
            partition,
            revision.id(),
            direction,
            calculate_checksum(revision),
            Some(elapsed_ms),
        );
        self.store
            .write(step_executor, partition, next)
            .and_then(|()| self.store.record(step_executor, &entry))
            .map_err(|e| failed(e.to_string()))?;

        if let Some(tx) = tx {
            tx.commit()
                .map_err(|e| failed(format!("commit failed: {e}")))?;
        }
        Ok(())
    }

    /// Set the marker to `target` without running any transform
    ///
    /// # Errors
    ///
    /// Resolution errors, `LockTimeout`, or a database error writing the marker. Relative
    /// targets are rejected.
    pub fn stamp(
        &self,
        executor: &dyn DbExecutor,
        target: &Target,
    ) -> Result<Vec<String>, MigrationError> {
        self.store.ensure(executor)?;
        let _lock = RunLockGuard::acquire(
            self.store,
            executor,
            self.partition(),
            &self.holder,
            self.options.lock_timeout_seconds,
        )?;

        let wanted = self.graph.target_set(target)?;
        let marker = self.graph.heads_of(&wanted);

        let tx = Transaction::begin(executor).map_err(DbError::from)?;
        let previous = self.store.current_for_update(&tx, self.partition())?;
        self.store.write(&tx, self.partition(), &marker)?;
        tx.commit().map_err(DbError::from)?;

        log::info!(
            "[{}] Stamped [{}] (was [{}])",
            self.partition(),
            marker.join(", "),
            previous.join(", ")
        );
        Ok(marker)
    }

    /// Validate the chain against the partition's persisted state
    ///
    /// Checks for unmerged heads, for marker tokens this build doesn't know, and compares the
    /// checksum of every applied revision with the one recorded when it ran. Returns the
    /// number of checksums verified.
    ///
    /// # Errors
    ///
    /// `AmbiguousHead`, `UnknownRevision` or `ChecksumMismatch`.
    pub fn check(&self, executor: &dyn DbExecutor) -> Result<usize, MigrationError> {
        self.graph.head()?;
        let current = self.current(executor)?;
        let applied = self.graph.applied(&current)?;

        let mut verified = 0;
        for entry in self.store.history(executor, self.partition())? {
            if entry.direction != Direction::Upgrade || !applied.contains(entry.revision.as_str()) {
                continue;
            }
            if let Some(revision) = self.graph.get(&entry.revision) {
                validate_checksum(revision, &entry.checksum)?;
                verified += 1;
            }
        }
        Ok(verified)
    }

    /// Render the SQL of a run instead of executing it
    ///
    /// `from` is the marker to start at: comma-separated tokens, or `base`. Without it,
    /// upgrades start at base and downgrades at head. Backfills read no rows offline, so they
    /// contribute no row updates.
    ///
    /// # Errors
    ///
    /// Resolution errors, or an error raised by a transform while rendering.
    pub fn script(
        &self,
        target: &Target,
        direction: Direction,
        from: Option<&str>,
    ) -> Result<String, MigrationError> {
        let current = match from {
            Some("base") => Vec::new(),
            Some(tokens) => tokens
                .split(',')
                .map(|t| self.graph.resolve_id(t.trim()).map(|r| r.id().to_string()))
                .collect::<Result<Vec<_>, _>>()?,
            None => match direction {
                Direction::Upgrade => Vec::new(),
                Direction::Downgrade => self
                    .graph
                    .head()?
                    .map(|r| vec![r.id().to_string()])
                    .unwrap_or_default(),
            },
        };

        let script = ScriptExecutor::new();
        self.store.ensure(&script)?;
        let steps = self.graph.resolve_path(&current, target, direction)?;
        self.apply_steps(&script, &current, &steps, direction, true)?;
        Ok(script.script())
    }
}

fn same_marker(a: &[String], b: &[String]) -> bool {
    let a: HashSet<&String> = a.iter().collect();
    let b: HashSet<&String> = b.iter().collect();
    a == b
}
