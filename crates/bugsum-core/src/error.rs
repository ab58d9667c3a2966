use std::fmt;

/// Machine-readable error codes for operator- and script-friendly handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    NotInitialized,
    ConfigParseError,
    MalformedLocation,
    CorruptSummary,
    UpsertRetriesExhausted,
    DatabaseWriteFailed,
    LockContention,
    InternalUnexpected,
}

impl ErrorCode {
    /// Stable code identifier (`E####`) for machine parsing.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::NotInitialized => "E1001",
            Self::ConfigParseError => "E1002",
            Self::MalformedLocation => "E2001",
            Self::CorruptSummary => "E3001",
            Self::UpsertRetriesExhausted => "E4001",
            Self::DatabaseWriteFailed => "E5001",
            Self::LockContention => "E5002",
            Self::InternalUnexpected => "E9001",
        }
    }

    /// Short human-facing summary for logs and terminal output.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::NotInitialized => "Summary database not initialized",
            Self::ConfigParseError => "Config file parse error",
            Self::MalformedLocation => "Malformed bug task target",
            Self::CorruptSummary => "Corrupt summary table",
            Self::UpsertRetriesExhausted => "Aggregate upsert retries exhausted",
            Self::DatabaseWriteFailed => "Summary database write failed",
            Self::LockContention => "Lock contention",
            Self::InternalUnexpected => "Internal unexpected error",
        }
    }

    /// Optional remediation hint that can be surfaced to operators.
    #[must_use]
    pub const fn hint(self) -> Option<&'static str> {
        match self {
            Self::NotInitialized => Some("Run `bugsum init` to create the summary database."),
            Self::ConfigParseError => Some("Fix syntax in .bugsum/config.toml and retry."),
            Self::MalformedLocation => Some(
                "A task must name exactly one of product, productseries, distribution, distroseries.",
            ),
            Self::CorruptSummary => {
                Some("Run `bugsum rebuild --tasks <snapshot>` to journal corrections.")
            }
            Self::UpsertRetriesExhausted => {
                Some("Raise [upsert] max_retries or reduce concurrent rollups on hot keys.")
            }
            Self::DatabaseWriteFailed => Some("Check disk space and write permissions."),
            Self::LockContention => Some("Another rollup is running; retry on the next cycle."),
            Self::InternalUnexpected => Some("Retry once. If persistent, report a bug with logs."),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}
