use std::fmt::Display;

use crate::descriptor::MetricKind;

/// A specialized error type for statistics operations.
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum StatsError {
    /// An I/O error occurred while writing or reading an archive.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// A schema could not be built from the supplied name and descriptors.
    #[error("invalid schema: {0}")]
    InvalidSchema(String),
    /// Two descriptors of one schema share a name.
    #[error("duplicate statistic name {name:?} in schema {schema:?}")]
    DuplicateDescriptor { schema: String, name: String },
    /// A schema with this name is already registered.
    #[error("duplicate type: {0}")]
    DuplicateSchema(String),
    /// The schema is not registered with this registry.
    #[error("unknown type: {0}")]
    UnknownSchema(String),
    /// No descriptor with this name exists in the schema.
    #[error("unknown statistic name: {0}")]
    UnknownStatistic(String),
    /// The descriptor holds a different value kind than the accessor used.
    #[error("the statistic {name} is of type {actual} and it was expected to be {expected}")]
    WrongKind {
        name: String,
        actual: MetricKind,
        expected: MetricKind,
    },
    /// A raw storage offset is outside the schema's slots for that kind.
    #[error("no such statistic: {kind} offset {offset}")]
    InvalidOffset { kind: MetricKind, offset: u32 },
    /// Configuration value was invalid.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// Invalid state transition or operation.
    #[error("invalid state: {0}")]
    InvalidState(String),
    /// An archive could not be decoded.
    #[error("archive corruption: {0}")]
    Corruption(String),
    /// The health publisher rejected a snapshot.
    #[error("health publish failed: {0}")]
    Publish(String),
    /// Internal error (thread spawn failure, etc.).
    #[error("internal error: {0}")]
    Internal(String),
}

impl StatsError {
    /// Create an invalid configuration error from a displayable value.
    pub fn invalid_config<T>(msg: T) -> Self
    where
        T: Display,
    {
        Self::InvalidConfig(msg.to_string())
    }

    /// Create an invalid schema error from a displayable value.
    pub fn invalid_schema<T>(msg: T) -> Self
    where
        T: Display,
    {
        Self::InvalidSchema(msg.to_string())
    }

    /// Create a corruption error from a displayable value.
    pub fn corruption<T>(msg: T) -> Self
    where
        T: Display,
    {
        Self::Corruption(msg.to_string())
    }

    /// Create an internal error from a displayable value.
    pub fn internal<T>(msg: T) -> Self
    where
        T: Display,
    {
        Self::Internal(msg.to_string())
    }

    /// Whether the error came from the file system rather than from the caller.
    pub fn is_io(&self) -> bool {
        matches!(self, StatsError::Io(_))
    }
}

/// A Result type alias for statistics operations.
pub type StatsResult<T> = Result<T, StatsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_config_helper() {
        let err = StatsError::invalid_config("bad path");
        assert!(matches!(err, StatsError::InvalidConfig(msg) if msg == "bad path"));
    }

    #[test]
    fn wrong_kind_message_names_both_kinds() {
        let err = StatsError::WrongKind {
            name: "puts".to_string(),
            actual: MetricKind::Int64,
            expected: MetricKind::Int32,
        };
        let msg = err.to_string();
        assert!(msg.contains("puts"));
        assert!(msg.contains("long"));
        assert!(msg.contains("int"));
    }
}
