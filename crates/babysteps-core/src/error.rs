use std::fmt;

/// Machine-readable error codes shared by the library and the `bs` binary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    StoreNotFound,
    ConfigParseError,
    TaskNotFound,
    StepNotFound,
    EmptyTitle,
    InvalidReorder,
    UnsupportedSchemaVersion,
    MigrationFailed,
    CorruptStore,
    StoreWriteFailed,
    LockContention,
    DiscardNotConfirmed,
    InternalUnexpected,
}

impl ErrorCode {
    /// Stable code identifier (`E####`) for machine parsing.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::StoreNotFound => "E1001",
            Self::ConfigParseError => "E1002",
            Self::TaskNotFound => "E2001",
            Self::StepNotFound => "E2002",
            Self::EmptyTitle => "E2003",
            Self::InvalidReorder => "E2004",
            Self::UnsupportedSchemaVersion => "E3001",
            Self::MigrationFailed => "E3002",
            Self::CorruptStore => "E3003",
            Self::StoreWriteFailed => "E5001",
            Self::LockContention => "E5002",
            Self::DiscardNotConfirmed => "E5003",
            Self::InternalUnexpected => "E9001",
        }
    }

    /// Short human-facing summary for logs and terminal output.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::StoreNotFound => "Store file not found",
            Self::ConfigParseError => "Config file parse error",
            Self::TaskNotFound => "Task not found",
            Self::StepNotFound => "Step not found",
            Self::EmptyTitle => "Task title is empty",
            Self::InvalidReorder => "Reorder list does not match stored tasks",
            Self::UnsupportedSchemaVersion => "Store written by a newer schema version",
            Self::MigrationFailed => "Schema migration failed",
            Self::CorruptStore => "Corrupt store",
            Self::StoreWriteFailed => "Store write failed",
            Self::LockContention => "Lock contention",
            Self::DiscardNotConfirmed => "Store discard was not confirmed",
            Self::InternalUnexpected => "Internal unexpected error",
        }
    }

    /// Optional remediation hint that can be surfaced to the user.
    #[must_use]
    pub const fn hint(self) -> Option<&'static str> {
        match self {
            Self::StoreNotFound => Some("Run any `bs` command once to create an empty store."),
            Self::ConfigParseError => Some("Fix syntax in babysteps/config.toml and retry."),
            Self::TaskNotFound | Self::StepNotFound => None,
            Self::EmptyTitle => Some("Provide a title with at least one visible character."),
            Self::InvalidReorder => Some("Pass every stored task id exactly once."),
            Self::UnsupportedSchemaVersion => Some("Upgrade to a build that knows this schema."),
            Self::MigrationFailed | Self::CorruptStore => Some(
                "Run `bs reset --yes` to set the store aside and start empty. This discards all tasks.",
            ),
            Self::StoreWriteFailed => Some("Check disk space and write permissions."),
            Self::LockContention => Some("Retry after the other process releases the store."),
            Self::DiscardNotConfirmed => Some("Discarding requires explicit confirmation."),
            Self::InternalUnexpected => Some("Retry once. If persistent, report a bug with logs."),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::ErrorCode;
    use std::collections::HashSet;

    const ALL: [ErrorCode; 13] = [
        ErrorCode::StoreNotFound,
        ErrorCode::ConfigParseError,
        ErrorCode::TaskNotFound,
        ErrorCode::StepNotFound,
        ErrorCode::EmptyTitle,
        ErrorCode::InvalidReorder,
        ErrorCode::UnsupportedSchemaVersion,
        ErrorCode::MigrationFailed,
        ErrorCode::CorruptStore,
        ErrorCode::StoreWriteFailed,
        ErrorCode::LockContention,
        ErrorCode::DiscardNotConfirmed,
        ErrorCode::InternalUnexpected,
    ];

    #[test]
    fn all_codes_are_unique() {
        let mut seen = HashSet::new();
        for code in ALL {
            assert!(seen.insert(code.code()), "duplicate code {}", code.code());
        }
    }

    #[test]
    fn code_format_is_machine_friendly() {
        let code = ErrorCode::MigrationFailed.code();
        assert_eq!(code.len(), 5);
        assert!(code.starts_with('E'));
        assert!(code.chars().skip(1).all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn migration_failure_hint_mentions_data_loss() {
        let hint = ErrorCode::MigrationFailed.hint().expect("hint");
        assert!(hint.contains("discards"));
    }
}
