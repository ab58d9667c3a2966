use serde::{Deserialize, Serialize};
use std::fmt;

use super::status::{BugTaskImportance, BugTaskStatus};
use super::target::Target;

/// A principal or access-policy bucket entitled to see a bug.
///
/// Public bugs have a single viewer with both fields `None`. Private bugs
/// have one viewer per grantee (`viewed_by`) and one per access policy
/// (`access_policy`); never both fields set at once.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Viewer {
    pub viewed_by: Option<i64>,
    pub access_policy: Option<i64>,
}

impl Viewer {
    pub const PUBLIC: Self = Self {
        viewed_by: None,
        access_policy: None,
    };

    #[must_use]
    pub const fn grantee(person: i64) -> Self {
        Self {
            viewed_by: Some(person),
            access_policy: None,
        }
    }

    #[must_use]
    pub const fn policy(policy: i64) -> Self {
        Self {
            viewed_by: None,
            access_policy: Some(policy),
        }
    }
}

/// One countable bucket in the summary.
///
/// Field order defines the total order used to coalesce deltas, so two
/// batches containing the same keys always journal them in the same order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LocationKey {
    pub target: Target,
    pub viewed_by: Option<i64>,
    pub access_policy: Option<i64>,
    pub tag: Option<String>,
    pub status: BugTaskStatus,
    pub milestone: Option<i64>,
    pub importance: BugTaskImportance,
    pub has_patch: bool,
}

impl LocationKey {
    #[must_use]
    pub const fn viewer(&self) -> Viewer {
        Viewer {
            viewed_by: self.viewed_by,
            access_policy: self.access_policy,
        }
    }
}

impl fmt::Display for LocationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} status={} importance={}", self.target, self.status, self.importance)?;
        if let Some(tag) = &self.tag {
            write!(f, " tag={tag}")?;
        }
        if let Some(milestone) = self.milestone {
            write!(f, " milestone={milestone}")?;
        }
        if let Some(person) = self.viewed_by {
            write!(f, " viewed_by={person}")?;
        }
        if let Some(policy) = self.access_policy {
            write!(f, " access_policy={policy}")?;
        }
        if self.has_patch {
            f.write_str(" has_patch")?;
        }
        Ok(())
    }
}
