//! Error types for the mixin pipeline.
//!
//! [`TransformError`] is always fatal for the class load that produced it.
//! Recoverable outcomes (optional bundles whose mixins failed) are not errors;
//! they come back as [`SkippedMixin`](crate::mixin::apply::SkippedMixin)
//! values inside a successful result.

use std::path::PathBuf;

use thiserror::Error;

use crate::classfile::ClassFileError;
use crate::mixin::info::Phase;

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, Error)]
pub enum TransformError {
    #[error("re-entrance detected while {target} has mixins to apply")]
    Reentrance { target: String },

    #[error("{class} is a mixin class and cannot be referenced directly (bundle {bundle})")]
    ForbiddenReference { class: String, bundle: String },

    #[error("mixin [{mixin}] from phase [{phase}] FAILED for REQUIRED bundle [{bundle}] applying to {target}")]
    RequiredMixinFailed {
        mixin: String,
        target: String,
        bundle: String,
        phase: Phase,
        #[source]
        source: MergeError,
    },

    #[error("transformer module {module} failed on {target}")]
    Module {
        module: String,
        target: String,
        #[source]
        source: ModuleError,
    },

    #[error("mixin initialization failed")]
    Initialization(#[source] ConfigError),

    #[error("class {class} could not be processed")]
    ClassFormat {
        class: String,
        #[source]
        source: ClassFileError,
    },
}

/// Misuse of the re-entrance guard. Always an internal bug.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GuardError {
    #[error("re-entrance guard popped at zero depth")]
    PopAtZeroDepth,
}

/// Failure reported by an [`Applicator`](crate::mixin::apply::Applicator).
#[derive(Debug, Error)]
#[error("{message}")]
pub struct MergeError {
    message: String,
    #[source]
    source: Option<BoxError>,
}

impl MergeError {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into(), source: None }
    }

    pub fn with_source(message: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self { message: message.into(), source: Some(source.into()) }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<ClassFileError> for MergeError {
    fn from(err: ClassFileError) -> Self {
        MergeError::with_source("class structure error during merge", err)
    }
}

/// Failure raised by a transformer module hook.
#[derive(Debug, Error)]
pub enum ModuleError {
    #[error("verification failed: {0}")]
    Verification(String),
    #[error(transparent)]
    ClassFile(#[from] ClassFileError),
}

/// Bundle declaration, initialisation and source errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("bundle {bundle}: {reason}")]
    InvalidBundle { bundle: String, reason: String },

    #[error("bundle {bundle}: mixin {mixin} is declared twice")]
    DuplicateMixin { bundle: String, mixin: String },

    #[error("bundle {bundle}: mixin {mixin} targets {target}, which is inside the mixin package")]
    TargetInMixinPackage { bundle: String, mixin: String, target: String },

    #[error("failed to read bundle file {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse bundle file {path}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Agent option string errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OptionsError {
    #[error("unknown agent option `{0}`")]
    Unknown(String),
    #[error("option `{key}` expects a value")]
    MissingValue { key: String },
    #[error("option `{key}` has invalid value `{value}`")]
    InvalidValue { key: String, value: String },
}
