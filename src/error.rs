use thiserror::Error;

use crate::job::JobId;

/// The crate's single error type.
///
/// Every variant here is, per the scheduler's error-handling design,
/// fatal: there is no local recovery path. Whoever drives a [`Session`](crate::session::Session)
/// is expected to log and abort the process on any of these.
#[derive(Error, Debug)]
pub enum Error {
    #[error("malformed protocol message: {0}")]
    Protocol(String),

    #[error("unsupported protocol version {0}, only version 0 is supported")]
    UnsupportedVersion(u32),

    #[error("reference to unknown job id {0}")]
    UnknownJob(JobId),

    #[error("job {0} in running set not found during completion")]
    RunningJobNotFound(JobId),

    #[error("assign requested {requested} resources from a free space with only {available}")]
    InsufficientResources { requested: usize, available: usize },

    #[error("job {0} can never fit in the cluster (unplaceable reservation)")]
    UnplaceableJob(JobId),

    #[error("interval operation spans more than one existing interval: {0}")]
    UnsupportedMerge(String),

    #[error("difference across multiple intervals is not supported: {0}")]
    UnsupportedMultiDifference(String),

    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    #[error("invalid workload descriptor: {0}")]
    Workload(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid JSON workload: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
