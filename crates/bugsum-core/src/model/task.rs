use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::location::Viewer;
use super::status::{BugTaskImportance, BugTaskStatus};
use super::target::TargetColumns;

/// Denormalized image of one bug task joined with its bug.
///
/// The write path hands these to the summary maintainer as before/after
/// images. `tags` is the bug's full current tag list and the two access
/// fields are the bug's visibility computation; `access_policies == None`
/// means the bug is public.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BugTaskFlat {
    pub bugtask: i64,
    pub bug: i64,
    #[serde(default)]
    pub duplicate_of: Option<i64>,
    #[serde(flatten)]
    pub target: TargetColumns,
    pub status: BugTaskStatus,
    #[serde(default)]
    pub importance: BugTaskImportance,
    #[serde(default)]
    pub milestone: Option<i64>,
    #[serde(default)]
    pub assignee: Option<i64>,
    #[serde(default)]
    pub latest_patch_uploaded: Option<DateTime<Utc>>,
    #[serde(default)]
    pub access_policies: Option<Vec<i64>>,
    #[serde(default)]
    pub access_grants: Option<Vec<i64>>,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// The subset of a [`BugTaskFlat`] that determines its summary locations.
///
/// Two images with equal projections fan out to exactly the same location
/// set. Any column added to [`LocationKey`](super::LocationKey) or to the
/// fan-out must be added here too, or updates touching it will be skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocationProjection<'a> {
    target: TargetColumns,
    duplicate_of: Option<i64>,
    status: BugTaskStatus,
    importance: BugTaskImportance,
    milestone: Option<i64>,
    has_patch: bool,
    access_policies: Option<&'a [i64]>,
    access_grants: Option<&'a [i64]>,
    tags: &'a [String],
}

impl BugTaskFlat {
    /// Whether this task currently has a patch attached to its bug.
    #[must_use]
    pub const fn has_patch(&self) -> bool {
        self.latest_patch_uploaded.is_some()
    }

    #[must_use]
    pub const fn is_duplicate(&self) -> bool {
        self.duplicate_of.is_some()
    }

    #[must_use]
    pub const fn is_private(&self) -> bool {
        self.access_policies.is_some()
    }

    /// Location-relevant view of this image.
    #[must_use]
    pub fn location_projection(&self) -> LocationProjection<'_> {
        LocationProjection {
            target: self.target,
            duplicate_of: self.duplicate_of,
            status: self.status.flatten(),
            importance: self.importance,
            milestone: self.milestone,
            has_patch: self.has_patch(),
            access_policies: self.access_policies.as_deref(),
            access_grants: self.access_grants.as_deref(),
            tags: &self.tags,
        }
    }

    /// Viewer buckets entitled to see this task's bug, deduplicated and sorted.
    ///
    /// A private bug with neither grants nor policies has no viewers and so
    /// contributes no locations at all.
    #[must_use]
    pub fn viewers(&self) -> Vec<Viewer> {
        let Some(policies) = &self.access_policies else {
            return vec![Viewer::PUBLIC];
        };

        let mut viewers: Vec<Viewer> = self
            .access_grants
            .iter()
            .flatten()
            .copied()
            .map(Viewer::grantee)
            .chain(policies.iter().copied().map(Viewer::policy))
            .collect();
        viewers.sort_unstable();
        viewers.dedup();
        viewers
    }
}
