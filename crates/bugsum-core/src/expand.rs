//! Location fan-out: turning bug task and tag changes into signed deltas.
//!
//! Every change is expanded into `(LocationKey, ±1)` pairs. One task image
//! fans out over three independent dimensions:
//!
//! - **targets**: the task's own target, plus its generalized pillar when the
//!   target is specialized to a source package or OCI project
//! - **viewers**: the public bucket, or one bucket per grantee and per
//!   access policy for private bugs
//! - **tags**: each of the bug's tags, plus the `NULL` tag meaning "any tag"
//!
//! Duplicate bugs contribute nothing; their counts belong to the master bug.
//!
//! Expansion is pure. Its only failure mode is a malformed target, which is a
//! bug in the caller and is returned rather than retried.

use std::collections::BTreeSet;

use crate::error::ErrorCode;
use crate::model::{BugTaskFlat, LocationKey, Target, TargetError};

/// Before/after images of one bug task row touched by a write statement.
///
/// `before == None` is an insert, `after == None` a delete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskChange {
    pub before: Option<BugTaskFlat>,
    pub after: Option<BugTaskFlat>,
}

impl TaskChange {
    #[must_use]
    pub const fn insert(after: BugTaskFlat) -> Self {
        Self {
            before: None,
            after: Some(after),
        }
    }

    #[must_use]
    pub const fn delete(before: BugTaskFlat) -> Self {
        Self {
            before: Some(before),
            after: None,
        }
    }

    #[must_use]
    pub const fn update(before: BugTaskFlat, after: BugTaskFlat) -> Self {
        Self {
            before: Some(before),
            after: Some(after),
        }
    }
}

/// Tags removed from and added to one bug by a write statement.
///
/// `tasks` are the bug's current task images; their own `tags` field is
/// ignored, only `removed` and `added` are fanned out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagChange {
    pub tasks: Vec<BugTaskFlat>,
    pub removed: Vec<String>,
    pub added: Vec<String>,
}

/// Errors raised while expanding a change into locations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExpandError {
    #[error("bug task {bugtask} (bug {bug}) has a malformed target: {source}")]
    MalformedTarget {
        bugtask: i64,
        bug: i64,
        #[source]
        source: TargetError,
    },

    #[error("bug {bug} carries an empty tag")]
    EmptyTag { bug: i64 },
}

impl ExpandError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        ErrorCode::MalformedLocation
    }
}

/// Full, deduplicated location set for one task image.
///
/// # Errors
///
/// Returns [`ExpandError`] if the image's target columns are malformed or a
/// tag is empty.
pub fn locations(task: &BugTaskFlat) -> Result<BTreeSet<LocationKey>, ExpandError> {
    let mut tags: Vec<Option<&str>> = Vec::with_capacity(task.tags.len() + 1);
    tags.push(None);
    for tag in &task.tags {
        tags.push(Some(checked_tag(task.bug, tag)?));
    }
    locations_for_tags(task, &tags)
}

/// Expand a batch of task row changes into signed deltas.
///
/// Updates whose [`BugTaskFlat::location_projection`] did not change emit
/// nothing; any other update is a full removal of the old image followed by
/// a full insertion of the new one.
///
/// # Errors
///
/// Returns [`ExpandError`] on the first malformed image in the batch.
pub fn expand_task_changes(changes: &[TaskChange]) -> Result<Vec<(LocationKey, i64)>, ExpandError> {
    let mut deltas = Vec::new();
    for change in changes {
        if let (Some(before), Some(after)) = (&change.before, &change.after)
            && before.location_projection() == after.location_projection()
        {
            tracing::trace!(bugtask = after.bugtask, "skipping location-irrelevant update");
            continue;
        }

        if let Some(before) = &change.before {
            deltas.extend(locations(before)?.into_iter().map(|key| (key, -1)));
        }
        if let Some(after) = &change.after {
            deltas.extend(locations(after)?.into_iter().map(|key| (key, 1)));
        }
    }
    Ok(deltas)
}

/// Expand a batch of tag changes into signed deltas.
///
/// Only locations carrying a changed tag are touched; the `NULL`-tag
/// locations of the bug are unaffected by retagging.
///
/// # Errors
///
/// Returns [`ExpandError`] if a task image is malformed or a tag is empty.
pub fn expand_tag_changes(changes: &[TagChange]) -> Result<Vec<(LocationKey, i64)>, ExpandError> {
    let mut deltas = Vec::new();
    for change in changes {
        for task in &change.tasks {
            for (tags, delta) in [(&change.removed, -1), (&change.added, 1)] {
                if tags.is_empty() {
                    continue;
                }
                let tags = tags
                    .iter()
                    .map(|tag| checked_tag(task.bug, tag).map(Some))
                    .collect::<Result<Vec<_>, _>>()?;
                deltas.extend(
                    locations_for_tags(task, &tags)?
                        .into_iter()
                        .map(|key| (key, delta)),
                );
            }
        }
    }
    Ok(deltas)
}

fn checked_tag(bug: i64, tag: &str) -> Result<&str, ExpandError> {
    if tag.trim().is_empty() {
        Err(ExpandError::EmptyTag { bug })
    } else {
        Ok(tag)
    }
}

fn locations_for_tags(
    task: &BugTaskFlat,
    tags: &[Option<&str>],
) -> Result<BTreeSet<LocationKey>, ExpandError> {
    let target = Target::from_columns(&task.target).map_err(|source| {
        ExpandError::MalformedTarget {
            bugtask: task.bugtask,
            bug: task.bug,
            source,
        }
    })?;

    let mut keys = BTreeSet::new();
    if task.is_duplicate() {
        return Ok(keys);
    }

    let targets = std::iter::once(target).chain(target.generalize());
    let viewers = task.viewers();
    let status = task.status.flatten();
    let has_patch = task.has_patch();

    for target in targets {
        for viewer in &viewers {
            for tag in tags {
                keys.insert(LocationKey {
                    target,
                    viewed_by: viewer.viewed_by,
                    access_policy: viewer.access_policy,
                    tag: tag.map(str::to_owned),
                    status,
                    milestone: task.milestone,
                    importance: task.importance,
                    has_patch,
                });
            }
        }
    }
    Ok(keys)
}
