use thiserror::Error;

/// Corvid-wide error type for the document query engine.
///
/// Every variant identifies the operation or field that failed so callers can
/// report structured failures. None of these errors leave a collection in a
/// partially modified state: operations validate before they commit.
#[derive(Error, Debug)]
pub enum CorvidError {
    /// I/O operations failed (journal files, configuration files)
    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    /// JSON serialization/deserialization failed
    #[error("JSON error: {source}")]
    Json {
        #[from]
        source: serde_json::Error,
    },

    /// A filter, update or expression used an operator outside the supported set
    #[error("Unknown operator '{operator}' in {operation}")]
    UnknownOperator {
        operation: String,
        operator:  String,
    },

    /// An operator was applied to a value of an incompatible kind
    #[error("Type mismatch in {operation} on field '{field}': expected {expected}, found {found}")]
    TypeMismatch {
        operation: String,
        field:     String,
        expected:  String,
        found:     String,
    },

    /// An aggregation stage operator is not implemented
    #[error("Unsupported aggregation stage '{stage}'")]
    UnsupportedStage {
        stage: String,
    },

    /// An insert or update would violate the uniqueness of an index
    #[error("Duplicate key {key} for index '{index}' in collection '{collection}'")]
    DuplicateKey {
        collection: String,
        index:      String,
        key:        String,
    },

    /// A field path is syntactically malformed
    #[error("Invalid field path '{path}': {reason}")]
    InvalidPath {
        path:   String,
        reason: String,
    },

    /// An update attempted to change a field that cannot change (`_id`)
    #[error("Field '{field}' is immutable")]
    ImmutableField {
        field: String,
    },

    /// A specification was well-formed JSON but semantically invalid
    #[error("Invalid argument to {operation}: {message}")]
    InvalidArgument {
        operation: String,
        message:   String,
    },

    /// An aggregation run was cancelled at a stage boundary
    #[error("Aggregation cancelled before stage '{stage}'")]
    Cancelled {
        stage: String,
    },

    /// Invalid collection name format
    #[error("Invalid collection name: {name}")]
    InvalidCollectionName {
        name: String,
    },

    /// A write reached a collection handle after the collection was dropped
    #[error("Collection '{name}' has been dropped")]
    CollectionDropped {
        name: String,
    },

    /// The persistence collaborator rejected a change or failed to load
    #[error("Persistence failure: {reason}")]
    Persistence {
        reason: String,
    },
}

impl CorvidError {
    /// Shorthand for an [`CorvidError::InvalidArgument`] error.
    pub(crate) fn invalid(operation: &str, message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            operation: operation.to_owned(),
            message:   message.into(),
        }
    }

    /// Shorthand for an [`CorvidError::UnknownOperator`] error.
    pub(crate) fn unknown_operator(operation: &str, operator: &str) -> Self {
        Self::UnknownOperator {
            operation: operation.to_owned(),
            operator:  operator.to_owned(),
        }
    }
}

/// Result type alias for Corvid operations.
pub type Result<T> = std::result::Result<T, CorvidError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages_name_the_offender() {
        let err = CorvidError::TypeMismatch {
            operation: "$inc".to_owned(),
            field:     "name".to_owned(),
            expected:  "number".to_owned(),
            found:     "string".to_owned(),
        };
        let message = err.to_string();
        assert!(message.contains("$inc"));
        assert!(message.contains("'name'"));

        let err = CorvidError::unknown_operator("filter", "$near");
        assert_eq!(err.to_string(), "Unknown operator '$near' in filter");
    }

    #[test]
    fn test_json_error_conversion() {
        let parse: std::result::Result<serde_json::Value, _> = serde_json::from_str("{not json");
        let err: CorvidError = parse.unwrap_err().into();
        assert!(matches!(err, CorvidError::Json { .. }));
    }
}
