//! bugsum-sim library.
//!
//! Drives seeded random bug tracker mutations through the summary
//! maintainer on an in-memory database, interleaves rollups of random batch
//! sizes, and checks the summary against a brute-force recount after every
//! step.
//!
//! # Conventions
//!
//! - **Errors**: Use `anyhow::Result` for return types.
//! - **Logging**: Use `tracing` macros (`info!`, `warn!`, `error!`, `debug!`, `trace!`).

pub mod campaign;
pub mod domain;
pub mod oracle;
pub mod rng;

use anyhow::{Context, Result, bail};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use bugsum_core::db::journal::JournalAppend;
use bugsum_core::db::open_in_memory;
use bugsum_core::db::rollup::rollup_batch;
use bugsum_core::db::store::UpsertPolicy;
use bugsum_core::model::{BugTaskImportance, BugTaskStatus, TargetColumns};
use bugsum_core::{SummaryMaintainer, SummaryObserver, TagChange, TaskChange};

use crate::domain::Domain;
use crate::oracle::{InvariantViolation, SummaryOracle};
use crate::rng::DeterministicRng;

const TAG_POOL: [&str; 5] = ["crash", "ui", "regression", "security", "easy"];
const PRODUCTS: [i64; 3] = [1, 2, 3];
const PRODUCT_SERIES: [i64; 2] = [10, 11];
const DISTRIBUTIONS: [i64; 2] = [20, 21];
const DISTRO_SERIES: [i64; 2] = [30, 31];
const PACKAGES: [i64; 3] = [40, 41, 42];
const OCI_PROJECTS: [i64; 2] = [50, 51];
const MILESTONES: [i64; 3] = [60, 61, 62];
const POLICIES: [i64; 2] = [100, 101];
const PEOPLE: [i64; 4] = [200, 201, 202, 203];

/// Parameters for one simulated run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulationConfig {
    pub seed: u64,
    /// Mutation steps to run.
    pub steps: u64,
    /// Chance of a rollup after each step (percent).
    pub rollup_percent: u8,
    /// Largest random batch size; a full drain is chosen one time in four.
    pub max_batch_size: usize,
    /// Chance that a step's transaction is rolled back instead of committed.
    pub abort_percent: u8,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            steps: 200,
            rollup_percent: 20,
            max_batch_size: 16,
            abort_percent: 5,
        }
    }
}

/// A domain mutation, as the write path would issue it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Mutation {
    FileBug { tags: Vec<String>, target: TargetColumns },
    AddTask { bug: i64, target: TargetColumns },
    Retarget { bugtask: i64, target: TargetColumns },
    SetStatus { bugtask: i64, status: BugTaskStatus },
    SetImportance { bugtask: i64, importance: BugTaskImportance },
    SetMilestone { bugtask: i64, milestone: Option<i64> },
    Assign { bugtask: i64, assignee: Option<i64> },
    Retag { bug: i64, removed: Vec<String>, added: Vec<String> },
    SetVisibility { bug: i64, access_policies: Option<Vec<i64>> },
    SetGrants { bug: i64, grants: Vec<i64> },
    MarkDuplicate { bug: i64, duplicate_of: Option<i64> },
    SetPatch { bug: i64, has_patch: bool },
    DeleteTask { bugtask: i64 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TraceEventKind {
    Committed { mutation: Mutation, entries_written: usize },
    RolledBack { mutation: Mutation },
    Rollup { batch_size: Option<usize>, consumed: usize, keys_applied: usize },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceEvent {
    pub step: u64,
    pub kind: TraceEventKind,
}

/// Outcome of one simulated run.
#[derive(Debug, Clone)]
pub struct SimulationResult {
    pub seed: u64,
    pub trace: Vec<TraceEvent>,
    pub violations: Vec<InvariantViolation>,
    /// Step at which the first violation was seen.
    pub first_violation_step: Option<u64>,
    pub journal_entries_written: usize,
    pub rollups: usize,
    pub final_tasks: usize,
}

impl SimulationResult {
    #[must_use]
    pub fn passed(&self) -> bool {
        self.violations.is_empty()
    }
}

/// Seeded simulator over one in-memory summary database.
pub struct Simulator {
    config: SimulationConfig,
    rng: DeterministicRng,
    domain: Domain,
    conn: Connection,
    maintainer: SummaryMaintainer,
    upsert: UpsertPolicy,
}

impl Simulator {
    /// # Errors
    ///
    /// Returns an error if the config is invalid or the database cannot be
    /// created.
    pub fn new(config: SimulationConfig) -> Result<Self> {
        if config.max_batch_size == 0 {
            bail!("max_batch_size must be > 0");
        }
        let conn = open_in_memory().context("open in-memory summary database")?;
        Ok(Self {
            rng: DeterministicRng::new(config.seed),
            config,
            domain: Domain::default(),
            conn,
            maintainer: SummaryMaintainer::new(),
            upsert: UpsertPolicy::default(),
        })
    }

    #[must_use]
    pub const fn domain(&self) -> &Domain {
        &self.domain
    }

    #[must_use]
    pub const fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Run every step, then drain the journal and check the final state.
    ///
    /// # Errors
    ///
    /// Returns an error on database failures; invariant violations are
    /// reported in the result instead.
    pub fn run(&mut self) -> Result<SimulationResult> {
        let mut result = SimulationResult {
            seed: self.config.seed,
            trace: Vec::new(),
            violations: Vec::new(),
            first_violation_step: None,
            journal_entries_written: 0,
            rollups: 0,
            final_tasks: 0,
        };

        for step in 0..self.config.steps {
            let mutation = self.random_mutation();
            let abort = self.rng.hit_rate_percent(self.config.abort_percent);
            let kind = match self.apply(&mutation, abort)? {
                Some(written) => {
                    result.journal_entries_written += written.entries_written;
                    TraceEventKind::Committed {
                        mutation,
                        entries_written: written.entries_written,
                    }
                }
                None => TraceEventKind::RolledBack { mutation },
            };
            result.trace.push(TraceEvent { step, kind });
            let violations =
                SummaryOracle::check_equivalence(&self.conn, &self.domain.all_images())?;
            self.record(&mut result, step, violations);

            if self.rng.hit_rate_percent(self.config.rollup_percent) {
                let batch_size = if self.rng.hit_rate_percent(25) {
                    None
                } else {
                    Some(self.rng.next_index(self.config.max_batch_size) + 1)
                };
                self.rollup(&mut result, step, batch_size)?;
            }
        }

        self.rollup(&mut result, self.config.steps, None)?;
        result.final_tasks = self.domain.tasks.len();

        tracing::debug!(
            seed = result.seed,
            rollups = result.rollups,
            entries = result.journal_entries_written,
            violations = result.violations.len(),
            "simulation finished"
        );
        Ok(result)
    }

    fn record(&self, result: &mut SimulationResult, step: u64, violations: Vec<InvariantViolation>) {
        if !violations.is_empty() && result.first_violation_step.is_none() {
            tracing::warn!(seed = self.config.seed, step, "summary invariant violated");
            result.first_violation_step = Some(step);
        }
        result.violations.extend(violations);
    }

    fn rollup(&mut self, result: &mut SimulationResult, step: u64, batch_size: Option<usize>) -> Result<()> {
        let report = rollup_batch(&mut self.conn, batch_size, &self.upsert)?;
        result.rollups += 1;
        result.trace.push(TraceEvent {
            step,
            kind: TraceEventKind::Rollup {
                batch_size,
                consumed: report.journal_rows_consumed,
                keys_applied: report.keys_applied,
            },
        });

        let mut violations = SummaryOracle::check_aggregate_rows(&self.conn, true)?;
        violations.extend(SummaryOracle::check_equivalence(
            &self.conn,
            &self.domain.all_images(),
        )?);
        if batch_size.is_none() {
            let again = rollup_batch(&mut self.conn, None, &self.upsert)?;
            violations.extend(SummaryOracle::check_idempotent(&again));
        }
        self.record(result, step, violations);
        Ok(())
    }

    fn random_target(&mut self) -> TargetColumns {
        let mut target = TargetColumns::default();
        let rng = &mut self.rng;
        match rng.next_bounded(4) {
            0 => {
                target.product = rng.pick(&PRODUCTS);
                if rng.hit_rate_percent(15) {
                    target.ociproject = rng.pick(&OCI_PROJECTS);
                }
            }
            1 => target.productseries = rng.pick(&PRODUCT_SERIES),
            kind => {
                if kind == 2 {
                    target.distribution = rng.pick(&DISTRIBUTIONS);
                } else {
                    target.distroseries = rng.pick(&DISTRO_SERIES);
                }
                match rng.next_bounded(10) {
                    0..=4 => target.sourcepackagename = rng.pick(&PACKAGES),
                    5 => target.ociproject = rng.pick(&OCI_PROJECTS),
                    _ => {}
                }
            }
        }
        target
    }

    fn random_tags(&mut self, percent: u8) -> Vec<String> {
        self.rng
            .subset(&TAG_POOL, percent)
            .into_iter()
            .map(str::to_owned)
            .collect()
    }

    fn random_mutation(&mut self) -> Mutation {
        let bugs = self.domain.bug_ids();
        let tasks = self.domain.task_ids();
        if bugs.is_empty() || tasks.is_empty() || self.rng.hit_rate_percent(10) {
            let tags = self.random_tags(30);
            return Mutation::FileBug {
                tags,
                target: self.random_target(),
            };
        }

        let bug = self.rng.pick(&bugs).unwrap_or_default();
        let bugtask = self.rng.pick(&tasks).unwrap_or_default();
        match self.rng.next_bounded(12) {
            0 => Mutation::AddTask {
                bug,
                target: self.random_target(),
            },
            1 => Mutation::Retarget {
                bugtask,
                target: self.random_target(),
            },
            2 => Mutation::SetStatus {
                bugtask,
                status: self.rng.pick(&BugTaskStatus::ALL).unwrap_or(BugTaskStatus::New),
            },
            3 => Mutation::SetImportance {
                bugtask,
                importance: self
                    .rng
                    .pick(&BugTaskImportance::ALL)
                    .unwrap_or_default(),
            },
            4 => Mutation::SetMilestone {
                bugtask,
                milestone: if self.rng.hit_rate_percent(30) {
                    None
                } else {
                    self.rng.pick(&MILESTONES)
                },
            },
            5 => Mutation::Assign {
                bugtask,
                assignee: self.rng.pick(&PEOPLE),
            },
            6 => {
                let current = self.domain.bugs.get(&bug).map(|b| b.tags.clone()).unwrap_or_default();
                let removed: Vec<String> = current
                    .into_iter()
                    .filter(|_| self.rng.hit_rate_percent(40))
                    .collect();
                let added = self.random_tags(25);
                Mutation::Retag { bug, removed, added }
            }
            7 => Mutation::SetVisibility {
                bug,
                access_policies: if self.rng.hit_rate_percent(50) {
                    None
                } else {
                    Some(self.rng.subset(&POLICIES, 60))
                },
            },
            8 => Mutation::SetGrants {
                bug,
                grants: self.rng.subset(&PEOPLE, 30),
            },
            9 => Mutation::MarkDuplicate {
                bug,
                duplicate_of: if self.rng.hit_rate_percent(50) {
                    None
                } else {
                    self.rng.pick(&bugs).filter(|other| *other != bug)
                },
            },
            10 => Mutation::SetPatch {
                bug,
                has_patch: self.rng.hit_rate_percent(50),
            },
            _ => Mutation::DeleteTask { bugtask },
        }
    }

    /// Apply `mutation` to a copy of the domain, journal it inside a
    /// transaction, and keep both only if the transaction commits.
    fn apply(&mut self, mutation: &Mutation, abort: bool) -> Result<Option<JournalAppend>> {
        let mut next = self.domain.clone();
        let change = Self::mutate(&mut next, mutation);

        let tx = self.conn.transaction()?;
        let written = match change {
            Change::Tasks(ids) => {
                let before: Vec<_> = ids.iter().map(|id| self.domain.image(*id)).collect();
                let changes: Vec<TaskChange> = ids
                    .iter()
                    .zip(before)
                    .map(|(id, before)| TaskChange {
                        before,
                        after: next.image(*id),
                    })
                    .filter(|change| change.before.is_some() || change.after.is_some())
                    .collect();
                self.maintainer.on_task_changes(&tx, &changes)?
            }
            Change::Tags { bug, removed, added } => {
                let change = TagChange {
                    tasks: next.images_of(bug),
                    removed,
                    added,
                };
                self.maintainer.on_tag_changes(&tx, &[change])?
            }
            Change::Nothing => JournalAppend::default(),
        };

        if abort {
            tx.rollback()?;
            return Ok(None);
        }
        tx.commit()?;
        self.domain = next;
        Ok(Some(written))
    }

    fn mutate(domain: &mut Domain, mutation: &Mutation) -> Change {
        match mutation {
            Mutation::FileBug { tags, target } => {
                let bug = domain.file_bug(tags.clone());
                Change::Tasks(vec![domain.add_task(bug, *target)])
            }
            Mutation::AddTask { bug, target } => Change::Tasks(vec![domain.add_task(*bug, *target)]),
            Mutation::Retarget { bugtask, target } => {
                Self::edit_task(domain, *bugtask, |task| task.target = *target)
            }
            Mutation::SetStatus { bugtask, status } => {
                Self::edit_task(domain, *bugtask, |task| task.status = *status)
            }
            Mutation::SetImportance { bugtask, importance } => {
                Self::edit_task(domain, *bugtask, |task| task.importance = *importance)
            }
            Mutation::SetMilestone { bugtask, milestone } => {
                Self::edit_task(domain, *bugtask, |task| task.milestone = *milestone)
            }
            Mutation::Assign { bugtask, assignee } => {
                Self::edit_task(domain, *bugtask, |task| task.assignee = *assignee)
            }
            Mutation::Retag { bug, removed, added } => {
                let Some(record) = domain.bugs.get_mut(bug) else {
                    return Change::Nothing;
                };
                let removed: Vec<String> = removed
                    .iter()
                    .filter(|tag| record.tags.contains(tag))
                    .cloned()
                    .collect();
                record.tags.retain(|tag| !removed.contains(tag));
                let mut fresh = Vec::new();
                for tag in added {
                    if !record.tags.contains(tag) && !fresh.contains(tag) {
                        fresh.push(tag.clone());
                    }
                }
                record.tags.extend(fresh.iter().cloned());
                Change::Tags {
                    bug: *bug,
                    removed,
                    added: fresh,
                }
            }
            Mutation::SetVisibility { bug, access_policies } => {
                Self::edit_bug(domain, *bug, |record| {
                    record.access_policies.clone_from(access_policies);
                })
            }
            Mutation::SetGrants { bug, grants } => {
                Self::edit_bug(domain, *bug, |record| record.access_grants.clone_from(grants))
            }
            Mutation::MarkDuplicate { bug, duplicate_of } => {
                Self::edit_bug(domain, *bug, |record| record.duplicate_of = *duplicate_of)
            }
            Mutation::SetPatch { bug, has_patch } => {
                Self::edit_bug(domain, *bug, |record| record.has_patch = *has_patch)
            }
            Mutation::DeleteTask { bugtask } => {
                if domain.tasks.remove(bugtask).is_some() {
                    Change::Tasks(vec![*bugtask])
                } else {
                    Change::Nothing
                }
            }
        }
    }

    fn edit_task(domain: &mut Domain, bugtask: i64, edit: impl FnOnce(&mut domain::Task)) -> Change {
        domain.tasks.get_mut(&bugtask).map_or(Change::Nothing, |task| {
            edit(task);
            Change::Tasks(vec![bugtask])
        })
    }

    fn edit_bug(domain: &mut Domain, bug: i64, edit: impl FnOnce(&mut domain::Bug)) -> Change {
        let Some(record) = domain.bugs.get_mut(&bug) else {
            return Change::Nothing;
        };
        edit(record);
        Change::Tasks(domain.tasks_of(bug))
    }
}

/// What a mutation touched, for building observer calls.
enum Change {
    Tasks(Vec<i64>),
    Tags { bug: i64, removed: Vec<String>, added: Vec<String> },
    Nothing,
}

#[cfg(test)]
mod tests {
    use super::*;
    use bugsum_core::db::journal::journal_len;

    #[test]
    fn default_run_passes() {
        let mut sim = Simulator::new(SimulationConfig::default()).unwrap();
        let result = sim.run().unwrap();
        assert!(result.passed(), "violations: {:?}", result.violations);
        assert!(result.rollups > 0);
        assert_eq!(journal_len(sim.connection()).unwrap(), 0);
    }

    #[test]
    fn same_seed_same_trace() {
        let config = SimulationConfig {
            seed: 11,
            steps: 60,
            ..SimulationConfig::default()
        };
        let first = Simulator::new(config.clone()).unwrap().run().unwrap();
        let second = Simulator::new(config).unwrap().run().unwrap();
        assert_eq!(first.trace, second.trace);
    }

    #[test]
    fn aborted_steps_leave_no_journal_entries() {
        let mut sim = Simulator::new(SimulationConfig {
            seed: 4,
            steps: 0,
            ..SimulationConfig::default()
        })
        .unwrap();
        let mutation = Mutation::FileBug {
            tags: vec!["ui".into()],
            target: TargetColumns {
                product: Some(1),
                ..TargetColumns::default()
            },
        };
        assert!(sim.apply(&mutation, true).unwrap().is_none());
        assert!(sim.domain().tasks.is_empty());
        assert_eq!(journal_len(sim.connection()).unwrap(), 0);

        let written = sim.apply(&mutation, false).unwrap().unwrap();
        assert_eq!(written.entries_written, 2);
        assert_eq!(sim.domain().tasks.len(), 1);
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        assert!(
            Simulator::new(SimulationConfig {
                max_batch_size: 0,
                ..SimulationConfig::default()
            })
            .is_err()
        );
    }

    #[test]
    fn retag_only_reports_effective_changes() {
        let mut domain = Domain::default();
        let bug = domain.file_bug(vec!["ui".into()]);
        let change = Simulator::mutate(
            &mut domain,
            &Mutation::Retag {
                bug,
                removed: vec!["ui".into(), "absent".into()],
                added: vec!["ui".into(), "crash".into(), "crash".into()],
            },
        );
        let Change::Tags { removed, added, .. } = change else {
            panic!("expected a tag change");
        };
        assert_eq!(removed, vec!["ui".to_string()]);
        assert_eq!(added, vec!["ui".to_string(), "crash".to_string()]);
        assert_eq!(domain.bugs[&bug].tags, vec!["ui".to_string(), "crash".to_string()]);
    }
}
