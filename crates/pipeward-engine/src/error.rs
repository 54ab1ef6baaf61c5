//! Engine error taxonomy.
//!
//! Errors split into three retry classes: configuration errors are fatal and
//! need operator intervention, transient errors are requeued with backoff,
//! and everything else self-heals once the offending input changes.

use std::io;

use pipeward_store::StoreError;

/// Errors produced by the reconciliation engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// A required configuration binding is missing or invalid.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A store operation failed.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// A git operation against the manifest repository failed.
    #[error("Git error: {0}")]
    Git(String),

    /// No local reference matched the requested release suffix.
    #[error("Release not found: no reference matches '{release}'")]
    ReleaseNotFound {
        /// The release suffix that failed to resolve.
        release: String,
    },

    /// A dependency the engine does not create is absent.
    #[error("Missing dependency: {kind}/{name}")]
    MissingDependency {
        /// The kind of the missing dependency.
        kind: String,
        /// The name of the missing dependency.
        name: String,
    },

    /// A secret exists but does not hold usable data.
    #[error("Invalid secret {name}: {message}")]
    InvalidSecret {
        /// The secret's name.
        name: String,
        /// What is wrong with it.
        message: String,
    },

    /// A manifest file could not be parsed into its target kind.
    #[error("Invalid manifest {path}: {message}")]
    InvalidManifest {
        /// Path of the offending manifest.
        path: String,
        /// The parse failure.
        message: String,
    },

    /// The catalog index client failed.
    #[error("Catalog error: {0}")]
    Catalog(String),

    /// Filesystem access to the manifest working tree failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The reconcile pass exceeded its deadline.
    #[error("Reconcile deadline exceeded")]
    DeadlineExceeded,

    /// An internal engine error occurred.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Creates a new `Configuration` error.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Creates a new `Git` error.
    #[must_use]
    pub fn git(message: impl Into<String>) -> Self {
        Self::Git(message.into())
    }

    /// Creates a new `MissingDependency` error.
    #[must_use]
    pub fn missing_dependency(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::MissingDependency {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Creates a new `InvalidSecret` error.
    #[must_use]
    pub fn invalid_secret(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidSecret {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Creates a new `InvalidManifest` error.
    #[must_use]
    pub fn invalid_manifest(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidManifest {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Creates a new `Catalog` error.
    #[must_use]
    pub fn catalog(message: impl Into<String>) -> Self {
        Self::Catalog(message.into())
    }

    /// Creates a new `Internal` error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Returns `true` for errors that a plain retry can resolve.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Git(_) | Self::Catalog(_) | Self::Io(_) | Self::DeadlineExceeded => true,
            Self::Store(e) => e.is_version_conflict() || matches!(e, StoreError::ConnectionError { .. }),
            _ => false,
        }
    }

    /// Returns `true` for errors that require operator intervention.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }
}

impl From<git2::Error> for EngineError {
    fn from(err: git2::Error) -> Self {
        Self::Git(err.message().to_string())
    }
}
