//! Error taxonomy of a signature run.

use std::{fmt, io};

use thiserror::Error;

/// Hint displayed along errors caused by the source file changing under our feet.
pub const SOURCE_CHANGED_HINT: &str = "the source may have been changed during the run";

#[derive(Debug, Error)]
pub enum Error {
    #[error("source is empty")]
    EmptySource,
    #[error("unexpected count of read bytes at offset {offset}: expected {expected}, got {actual}")]
    TruncatedRead { offset: u64, expected: usize, actual: usize },
    #[error("can not {target}: {source}")]
    Access {
        target: AccessTarget,
        #[source]
        source: io::Error,
    },
    #[error("can not compute digest of block #{block}: {reason}, data may have been corrupted")]
    Transform { block: u64, reason: String },
    #[error("{0}")]
    Unknown(String),
}

impl Error {
    /// Build an [`Error::Access`] error for the source at `path` failing to open.
    pub fn open(path: impl fmt::Display, source: io::Error) -> Self {
        Self::Access {
            target: AccessTarget::Open(path.to_string()),
            source,
        }
    }

    /// Build an [`Error::Access`] error for the source at `path` failing while being read.
    pub fn read(path: impl fmt::Display, source: io::Error) -> Self {
        Self::Access {
            target: AccessTarget::Source(path.to_string()),
            source,
        }
    }

    /// Build an [`Error::Access`] error for the output.
    pub fn write(source: io::Error) -> Self {
        Self::Access {
            target: AccessTarget::Output,
            source,
        }
    }
}

/// What an I/O operation was trying to access when it failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessTarget {
    /// The source file, identified by its path, before reading started.
    Open(String),
    /// The source file, identified by its path.
    Source(String),
    /// The output stream results are written to.
    Output,
}

impl fmt::Display for AccessTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccessTarget::Open(path) => write!(f, "open `{path}`"),
            AccessTarget::Source(path) => write!(f, "read `{path}`"),
            AccessTarget::Output => f.write_str("write to output"),
        }
    }
}

/// A stage of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Source,
    Worker(usize),
    Sink,
    /// The orchestration itself, outside of any stage thread.
    Synchronizer,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Source => f.write_str("source"),
            Stage::Worker(id) => write!(f, "worker #{id}"),
            Stage::Sink => f.write_str("sink"),
            Stage::Synchronizer => f.write_str("synchronizer"),
        }
    }
}

/// The first error of a failed run, together with the stage it happened in.
#[derive(Debug, Error)]
#[error("{stage}: {error}")]
pub struct Failure {
    pub stage: Stage,
    #[source]
    pub error: Error,
}

impl Failure {
    pub fn new(stage: Stage, error: Error) -> Self {
        Self { stage, error }
    }

    /// A human hint about the likely cause, if any.
    pub fn hint(&self) -> Option<&'static str> {
        match &self.error {
            Error::TruncatedRead { .. }
            | Error::Access {
                target: AccessTarget::Source(_),
                ..
            } => Some(SOURCE_CHANGED_HINT),
            _ => None,
        }
    }
}
