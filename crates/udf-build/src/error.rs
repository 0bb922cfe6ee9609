//! Error taxonomy for the UDF build pipeline.
//!
//! Per-unit problems never escape a batch: they are described by
//! [`FailureKind`] and folded into the report. Only [`BuildError`] reaches
//! the caller, and it always replaces the whole report.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Classification of a single unit's failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Empty source, bad class name, unknown dialect or duplicate class.
    InvalidDefinition,
    /// No compiler strategy registered for the dialect.
    UnsupportedDialect,
    /// Diagnostic from the dialect's compiler or validator.
    CompileError,
    /// The unit exceeded its time budget.
    Timeout,
    /// The unit's isolated workspace could not be allocated or used.
    WorkspaceError,
    /// The compiler strategy panicked.
    Panicked,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::InvalidDefinition => "invalid_definition",
            FailureKind::UnsupportedDialect => "unsupported_dialect",
            FailureKind::CompileError => "compile_error",
            FailureKind::Timeout => "timeout",
            FailureKind::WorkspaceError => "workspace_error",
            FailureKind::Panicked => "panicked",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned by a compiler strategy for one unit.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {reason}")]
pub struct CompileFailure {
    pub kind: FailureKind,
    pub reason: String,
}

impl CompileFailure {
    pub fn new(kind: FailureKind, reason: impl Into<String>) -> Self {
        Self {
            kind,
            reason: reason.into(),
        }
    }

    /// Shorthand for a dialect diagnostic.
    pub fn compile(reason: impl Into<String>) -> Self {
        Self::new(FailureKind::CompileError, reason)
    }

    /// Shorthand for a workspace I/O problem.
    pub fn workspace(reason: impl Into<String>) -> Self {
        Self::new(FailureKind::WorkspaceError, reason)
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid build configuration: {0}")]
    Invalid(String),

    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Batch-fatal errors. A caller receiving one of these gets no report.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("failed to write archive {path}: {source}")]
    ArchiveWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("batch cancelled: {reason}")]
    Cancelled { reason: String },

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl BuildError {
    pub(crate) fn archive(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        BuildError::ArchiveWrite {
            path: path.into(),
            source,
        }
    }
}

/// Result type for batch operations.
pub type BuildResult<T> = std::result::Result<T, BuildError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_kind_serde_is_snake_case() {
        let json = serde_json::to_string(&FailureKind::InvalidDefinition).unwrap();
        assert_eq!(json, "\"invalid_definition\"");
        assert_eq!(FailureKind::Timeout.to_string(), "timeout");
    }

    #[test]
    fn test_compile_failure_display() {
        let err = CompileFailure::compile("';' expected");
        assert_eq!(err.kind, FailureKind::CompileError);
        assert_eq!(err.to_string(), "compile_error: ';' expected");
    }

    #[test]
    fn test_archive_write_error_names_path() {
        let err = BuildError::archive(
            "/tmp/udf/udf.jar",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        let msg = err.to_string();
        assert!(msg.contains("/tmp/udf/udf.jar"));
        assert!(msg.contains("denied"));
    }

    #[test]
    fn test_cancelled_error_display() {
        let err = BuildError::Cancelled {
            reason: "caller gave up".to_string(),
        };
        assert!(err.to_string().contains("caller gave up"));
    }
}
