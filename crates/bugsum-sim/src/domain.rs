//! In-memory bug tracker the simulator mutates.
//!
//! Bugs own their tags and visibility; tasks own their target and status.
//! [`Domain::image`] joins the two into the [`BugTaskFlat`] images the
//! summary maintainer consumes.

use std::collections::BTreeMap;

use bugsum_core::model::{BugTaskFlat, BugTaskImportance, BugTaskStatus, TargetColumns};
use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Bug {
    pub tags: Vec<String>,
    pub duplicate_of: Option<i64>,
    pub has_patch: bool,
    /// `None` for public bugs.
    pub access_policies: Option<Vec<i64>>,
    pub access_grants: Vec<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Task {
    pub bug: i64,
    pub target: TargetColumns,
    pub status: BugTaskStatus,
    pub importance: BugTaskImportance,
    pub milestone: Option<i64>,
    pub assignee: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Domain {
    pub bugs: BTreeMap<i64, Bug>,
    pub tasks: BTreeMap<i64, Task>,
    next_bug: i64,
    next_task: i64,
}

impl Domain {
    pub fn file_bug(&mut self, tags: Vec<String>) -> i64 {
        self.next_bug += 1;
        self.bugs.insert(
            self.next_bug,
            Bug {
                tags,
                ..Bug::default()
            },
        );
        self.next_bug
    }

    pub fn add_task(&mut self, bug: i64, target: TargetColumns) -> i64 {
        self.next_task += 1;
        self.tasks.insert(
            self.next_task,
            Task {
                bug,
                target,
                status: BugTaskStatus::New,
                importance: BugTaskImportance::Undecided,
                milestone: None,
                assignee: None,
            },
        );
        self.next_task
    }

    #[must_use]
    pub fn bug_ids(&self) -> Vec<i64> {
        self.bugs.keys().copied().collect()
    }

    #[must_use]
    pub fn task_ids(&self) -> Vec<i64> {
        self.tasks.keys().copied().collect()
    }

    #[must_use]
    pub fn tasks_of(&self, bug: i64) -> Vec<i64> {
        self.tasks
            .iter()
            .filter(|(_, task)| task.bug == bug)
            .map(|(id, _)| *id)
            .collect()
    }

    /// Flat image of one task, or `None` if it or its bug is gone.
    #[must_use]
    pub fn image(&self, bugtask: i64) -> Option<BugTaskFlat> {
        let task = self.tasks.get(&bugtask)?;
        let bug = self.bugs.get(&task.bug)?;
        let private = bug.access_policies.is_some();
        Some(BugTaskFlat {
            bugtask,
            bug: task.bug,
            duplicate_of: bug.duplicate_of,
            target: task.target,
            status: task.status,
            importance: task.importance,
            milestone: task.milestone,
            assignee: task.assignee,
            latest_patch_uploaded: bug.has_patch.then(|| patch_uploaded_at(bugtask)),
            access_policies: bug.access_policies.clone(),
            access_grants: private.then(|| bug.access_grants.clone()),
            tags: bug.tags.clone(),
        })
    }

    #[must_use]
    pub fn images_of(&self, bug: i64) -> Vec<BugTaskFlat> {
        self.tasks_of(bug)
            .into_iter()
            .filter_map(|id| self.image(id))
            .collect()
    }

    #[must_use]
    pub fn all_images(&self) -> Vec<BugTaskFlat> {
        self.task_ids()
            .into_iter()
            .filter_map(|id| self.image(id))
            .collect()
    }
}

/// Any fixed timestamp works; only its presence matters to the summary.
fn patch_uploaded_at(seconds: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(seconds, 0).unwrap_or_default()
}
