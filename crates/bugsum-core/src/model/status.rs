use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// Lifecycle status of a bug task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BugTaskStatus {
    New,
    Incomplete,
    IncompleteWithResponse,
    IncompleteWithoutResponse,
    Opinion,
    Invalid,
    #[serde(rename = "wontfix")]
    WontFix,
    Expired,
    Confirmed,
    Triaged,
    #[serde(rename = "inprogress")]
    InProgress,
    Deferred,
    #[serde(rename = "fixcommitted")]
    FixCommitted,
    #[serde(rename = "fixreleased")]
    FixReleased,
    #[serde(rename = "doesnotexist")]
    DoesNotExist,
    Unknown,
}

impl BugTaskStatus {
    pub const ALL: [Self; 16] = [
        Self::New,
        Self::Incomplete,
        Self::IncompleteWithResponse,
        Self::IncompleteWithoutResponse,
        Self::Opinion,
        Self::Invalid,
        Self::WontFix,
        Self::Expired,
        Self::Confirmed,
        Self::Triaged,
        Self::InProgress,
        Self::Deferred,
        Self::FixCommitted,
        Self::FixReleased,
        Self::DoesNotExist,
        Self::Unknown,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Incomplete => "incomplete",
            Self::IncompleteWithResponse => "incomplete_with_response",
            Self::IncompleteWithoutResponse => "incomplete_without_response",
            Self::Opinion => "opinion",
            Self::Invalid => "invalid",
            Self::WontFix => "wontfix",
            Self::Expired => "expired",
            Self::Confirmed => "confirmed",
            Self::Triaged => "triaged",
            Self::InProgress => "inprogress",
            Self::Deferred => "deferred",
            Self::FixCommitted => "fixcommitted",
            Self::FixReleased => "fixreleased",
            Self::DoesNotExist => "doesnotexist",
            Self::Unknown => "unknown",
        }
    }

    /// Status as stored in summary rows.
    ///
    /// The two response sub-states of `incomplete` are a search refinement
    /// only; summaries count them as plain `incomplete`.
    #[must_use]
    pub const fn flatten(self) -> Self {
        match self {
            Self::IncompleteWithResponse | Self::IncompleteWithoutResponse => Self::Incomplete,
            other => other,
        }
    }
}

/// Triage importance of a bug task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BugTaskImportance {
    Unknown,
    Undecided,
    Critical,
    High,
    Medium,
    Low,
    Wishlist,
}

impl Default for BugTaskImportance {
    fn default() -> Self {
        Self::Undecided
    }
}

impl BugTaskImportance {
    pub const ALL: [Self; 7] = [
        Self::Unknown,
        Self::Undecided,
        Self::Critical,
        Self::High,
        Self::Medium,
        Self::Low,
        Self::Wishlist,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Undecided => "undecided",
            Self::Critical => "critical",
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
            Self::Wishlist => "wishlist",
        }
    }
}

/// Error returned when parsing an enum value from text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseEnumError {
    pub expected: &'static str,
    pub got: String,
}

impl fmt::Display for ParseEnumError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid {}: '{}'", self.expected, self.got)
    }
}

impl std::error::Error for ParseEnumError {}

impl fmt::Display for BugTaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for BugTaskImportance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn normalize(input: &str) -> String {
    input.trim().to_ascii_lowercase().replace(['-', ' '], "_")
}

impl FromStr for BugTaskStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = normalize(s);
        let compact = normalized.replace('_', "");
        Self::ALL
            .into_iter()
            .find(|status| {
                let name = status.as_str();
                name == normalized || name.replace('_', "") == compact
            })
            .ok_or_else(|| ParseEnumError {
                expected: "status",
                got: s.to_string(),
            })
    }
}

impl FromStr for BugTaskImportance {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = normalize(s);
        Self::ALL
            .into_iter()
            .find(|importance| importance.as_str() == normalized)
            .ok_or_else(|| ParseEnumError {
                expected: "importance",
                got: s.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flatten_collapses_incomplete_substates() {
        assert_eq!(
            BugTaskStatus::IncompleteWithResponse.flatten(),
            BugTaskStatus::Incomplete
        );
        assert_eq!(
            BugTaskStatus::IncompleteWithoutResponse.flatten(),
            BugTaskStatus::Incomplete
        );
        assert_eq!(BugTaskStatus::Triaged.flatten(), BugTaskStatus::Triaged);
    }

    #[test]
    fn status_parses_display_form_and_spelled_out_variants() {
        for status in BugTaskStatus::ALL {
            assert_eq!(status.to_string().parse::<BugTaskStatus>(), Ok(status));
        }
        assert_eq!("In Progress".parse(), Ok(BugTaskStatus::InProgress));
        assert_eq!("fix-released".parse(), Ok(BugTaskStatus::FixReleased));
        assert!("bogus".parse::<BugTaskStatus>().is_err());
    }

    #[test]
    fn status_serde_matches_display() {
        for status in BugTaskStatus::ALL {
            let json = serde_json::to_string(&status).unwrap();
            assert_eq!(json, format!("\"{status}\""));
        }
    }

    #[test]
    fn importance_roundtrips_through_text() {
        for importance in BugTaskImportance::ALL {
            assert_eq!(
                importance.as_str().parse::<BugTaskImportance>(),
                Ok(importance)
            );
        }
        let err = "urgent".parse::<BugTaskImportance>().unwrap_err();
        assert_eq!(err.to_string(), "invalid importance: 'urgent'");
    }
}
