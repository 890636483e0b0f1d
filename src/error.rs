use std::path::PathBuf;

use thiserror::Error;

use crate::scheduler::RawDataId;

#[derive(Error, Debug)]
pub enum NodeError {
    #[error("Worker has stopped, job queue is closed")]
    WorkerStopped,

    #[error("Raw data {0} is not open on this node")]
    RawDataNotFound(RawDataId),

    #[error("Raw data {0} is already open on this node")]
    RawDataAlreadyOpen(RawDataId),

    #[error("Staging error: {0}")]
    Staging(#[from] StagingError),

    #[error("Dataset error: {0}")]
    Dataset(#[from] DatasetError),

    #[error("Controller error: {0}")]
    Controller(#[from] ControllerError),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, NodeError>;

/// Failures while copying a dataset into (or back out of) the work directory.
#[derive(Error, Debug)]
pub enum StagingError {
    #[error("Source file not found: {0}")]
    SourceNotFound(PathBuf),

    #[error("Chunk size must be greater than zero")]
    ZeroChunkSize,

    #[error("Copy of {path} failed: {source}")]
    Copy {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Short copy of {path}: expected {expected} bytes, wrote {written}")]
    ShortCopy {
        path: PathBuf,
        expected: u64,
        written: u64,
    },
}

/// Failures reading or writing a staged scan file.
#[derive(Error, Debug)]
pub enum DatasetError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed scan at line {line} of {path}: {message}")]
    Malformed {
        path: PathBuf,
        line: usize,
        message: String,
    },

    #[error("Dataset {0} contains no scans")]
    Empty(PathBuf),

    #[error("Scan range {first}..={last} is outside dataset with {scans} scans")]
    ScanRange {
        first: usize,
        last: usize,
        scans: usize,
    },
}

/// Failure returned by a pluggable algorithm.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{0}")]
pub struct StrategyError(pub String);

impl StrategyError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Failures delivering a call to the controller.
#[derive(Error, Debug)]
pub enum ControllerError {
    #[error("Request to controller failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Controller rejected call with status {0}")]
    Rejected(u16),

    #[error("Invalid controller URL: {0}")]
    InvalidUrl(String),
}
