//! Error taxonomy for schema loading, rule execution and state updates.

use thiserror::Error;

/// Fatal to schema load. Reported before a session ever starts.
#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("Duplicate section id '{0}'")]
    DuplicateSectionId(String),

    #[error("Duplicate field name '{0}'")]
    DuplicateFieldName(String),

    #[error("Field '{field}' has unknown type '{tag}'")]
    UnknownFieldType { field: String, tag: String },

    #[error("'{target}' depends on unknown field '{source_field}'")]
    UnknownDependencySource { target: String, source_field: String },

    #[error("Cyclic dependency between fields: {}", .0.join(" -> "))]
    CyclicDependency(Vec<String>),

    #[error("Field '{field}' has an invalid pattern '{pattern}': {source}")]
    InvalidPattern {
        field: String,
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("Field '{field}' has an invalid rule: {reason}")]
    InvalidRule { field: String, reason: String },

    #[error("Malformed schema definition: {0}")]
    Malformed(String),
}

/// Recoverable: contained to a single field and turned into a validation failure.
#[derive(Error, Debug)]
pub enum RuleExecutionError {
    #[error("Rule '{rule}' failed on field '{field}': {source}")]
    Failed {
        rule: String,
        field: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Rule '{rule}' referenced by field '{field}' is not registered")]
    UnknownRule { rule: String, field: String },
}

/// Programmer error: the call is rejected and state is left unchanged.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum StateError {
    #[error("Field '{0}' does not exist in the schema")]
    UnknownField(String),
}

/// User-facing, non-fatal: the previous schema and state stay in place.
#[derive(Error, Debug)]
pub enum ImportError {
    #[error("Malformed schema document: {0}")]
    Malformed(String),

    #[error("Could not read schema file: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Schema(#[from] SchemaError),
}

impl ImportError {
    /// Message suitable for showing to the person importing the document.
    pub fn user_message(&self) -> String {
        match self {
            ImportError::Malformed(detail) => {
                format!("The form definition could not be read: {detail}")
            }
            ImportError::Io(e) => format!("The form definition file could not be opened: {e}"),
            ImportError::Schema(e) => format!("The form definition is invalid: {e}"),
        }
    }
}
