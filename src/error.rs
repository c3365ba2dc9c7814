//! Structured error taxonomy for the transferase engine.
//!
//! Every fallible operation in this crate returns one of the enums below
//! rather than a boxed `dyn Error`. Each variant that is ever placed on the
//! wire (in a response header's status field) carries the numeric code used
//! by the wire protocol, so encoding a status and constructing the matching
//! [`ServerError`] round-trip exactly.

use std::io;
use thiserror::Error;

/// Errors parsing a request header off the wire (§4.4.1).
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestError {
    #[error("failed to parse request type")]
    ParseErrorRequestType,
    #[error("failed to parse index hash")]
    ParseErrorIndexHash,
    #[error("failed to parse aux value")]
    ParseErrorAuxValue,
    #[error("failed to parse methylome names")]
    ParseErrorMethylomeNames,
    #[error("request too large")]
    RequestTooLarge,
}

/// Server-side semantic errors, numbered to match the original
/// `server_error_code` enum so wire status codes are stable across
/// implementations.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ServerError {
    #[error("ok")]
    Ok = 0,
    #[error("invalid methylome name")]
    InvalidMethylomeName = 1,
    #[error("invalid request type")]
    InvalidRequestType = 2,
    #[error("too many intervals")]
    TooManyIntervals = 3,
    #[error("bin size too small")]
    BinSizeTooSmall = 4,
    #[error("window size too small")]
    WindowSizeTooSmall = 5,
    #[error("window step too small")]
    WindowStepTooSmall = 6,
    #[error("invalid index hash")]
    InvalidIndexHash = 7,
    #[error("methylome not found")]
    MethylomeNotFound = 8,
    #[error("index not found")]
    IndexNotFound = 9,
    #[error("server failure")]
    ServerFailure = 10,
    #[error("bad request")]
    BadRequest = 11,
    #[error("inconsistent genomes")]
    InconsistentGenomes = 12,
    #[error("connection timeout")]
    ConnectionTimeout = 13,
}

impl ServerError {
    /// Reconstruct a `ServerError` from its wire code. Unknown codes are
    /// mapped to `ServerFailure` rather than panicking, since this is
    /// reached while decoding data that arrived over a socket.
    #[must_use]
    pub fn from_code(code: u32) -> Self {
        match code {
            0 => Self::Ok,
            1 => Self::InvalidMethylomeName,
            2 => Self::InvalidRequestType,
            3 => Self::TooManyIntervals,
            4 => Self::BinSizeTooSmall,
            5 => Self::WindowSizeTooSmall,
            6 => Self::WindowStepTooSmall,
            7 => Self::InvalidIndexHash,
            8 => Self::MethylomeNotFound,
            9 => Self::IndexNotFound,
            10 => Self::ServerFailure,
            11 => Self::BadRequest,
            12 => Self::InconsistentGenomes,
            13 => Self::ConnectionTimeout,
            _ => Self::ServerFailure,
        }
    }

    #[must_use]
    pub fn code(self) -> u32 {
        self as u32
    }

    #[must_use]
    pub fn is_ok(self) -> bool {
        matches!(self, Self::Ok)
    }
}

/// Client-side configuration and storage errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientConfigError {
    #[error("methylome directory not configured")]
    MethylomeDirNotConfigured,
    #[error("index directory not configured")]
    IndexDirNotConfigured,
    #[error("hostname not configured")]
    HostnameNotConfigured,
    #[error("port not configured")]
    PortNotConfigured,
    #[error("inconsistent methylome metadata for '{0}'")]
    InconsistentMethylomeMetadata(String),
    #[error("invalid methylome header: {0}")]
    InvalidMethylomeHeader(String),
}

/// DEFLATE compression/decompression errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CompressionError {
    #[error("bad compressed data")]
    BadData,
    #[error("short output buffer")]
    ShortOutput,
    #[error("decompression failed: {0}")]
    DecompressionFailed(String),
}

/// Top-level error for methylome and genome-index storage operations: the
/// union of what can go wrong reading/writing/validating the on-disk forms
/// described in §6.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("JSON (de)serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Compression(#[from] CompressionError),
    #[error("methylome data length {actual} does not match metadata n_cpgs {expected}")]
    LengthMismatch { expected: u64, actual: u64 },
    #[error("index hash mismatch: methylome expects {expected:#x}, index has {actual:#x}")]
    IndexHashMismatch { expected: u64, actual: u64 },
    #[error("methylomes have different index hashes: {0:#x} vs {1:#x}")]
    InconsistentGenomes(u64, u64),
    #[error("chromosome '{0}' not found in genome index")]
    ChromNameNotFound(String),
}

impl StorageError {
    /// Map a storage-layer failure onto the wire-level [`ServerError`] a
    /// connection should report to the client.
    #[must_use]
    pub fn to_server_error(&self) -> ServerError {
        match self {
            Self::IndexHashMismatch { .. } => ServerError::InvalidIndexHash,
            Self::InconsistentGenomes(..) => ServerError::InconsistentGenomes,
            Self::Io(e) if e.kind() == io::ErrorKind::NotFound => ServerError::MethylomeNotFound,
            _ => ServerError::ServerFailure,
        }
    }
}

/// Top-level client runtime error.
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error(transparent)]
    Config(#[from] ClientConfigError),
    #[error("server returned error status: {0}")]
    ServerStatus(ServerError),
    #[error("connection timed out")]
    Timeout,
    #[error("malformed response header")]
    MalformedResponseHeader,
    #[error("address resolution failed for '{0}'")]
    ResolveFailed(String),
    #[error("request too large to encode")]
    RequestTooLarge,
}

pub type StorageResult<T> = std::result::Result<T, StorageError>;
pub type ClientResult<T> = std::result::Result<T, ClientError>;
