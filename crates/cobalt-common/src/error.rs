//! Error taxonomy for Cobalt Graph.
//!
//! One flat enum covering every error kind named in the design: fatal kinds
//! (`ConfigInvalid`, `CaptureUnavailable`) surface as a process exit code;
//! everything else is recovered locally and only logged/counted.

use thiserror::Error;

/// Cobalt Graph error type.
#[derive(Error, Debug)]
pub enum CobaltError {
    /// Malformed or contradictory configuration at startup. Fatal.
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    /// Capture source could not start (missing privileges, missing interface). Fatal at startup.
    #[error("capture source unavailable: {0}")]
    CaptureUnavailable(String),

    /// Rate-limited, timed out, auth failure, or malformed response from an intel client.
    #[error("intel client soft error ({client}): {kind}")]
    IntelSoftError {
        client: &'static str,
        kind: IntelErrorKind,
    },

    /// A scorer missed its deadline.
    #[error("scorer '{0}' timed out")]
    ScorerTimeout(String),

    /// A vote failed signature verification.
    #[error("scorer '{0}' vote signature invalid")]
    ScorerSignatureInvalid(String),

    /// A single storage write failed.
    #[error("storage write failed: {0}")]
    StorageTransient(String),

    /// A sink write or rotation failure.
    #[error("export error ({sink}): {reason}")]
    ExportError { sink: &'static str, reason: String },

    /// Ingress backpressure; oldest record dropped.
    #[error("ingress queue overflow")]
    QueueOverflow,

    /// IO error, folded in for `?` ergonomics at the edges.
    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Sub-classification for `CobaltError::IntelSoftError`, matching spec §4.2.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntelErrorKind {
    RateLimited,
    Timeout,
    NetworkError,
    AuthError,
    MalformedResponse,
}

impl std::fmt::Display for IntelErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            IntelErrorKind::RateLimited => "rate_limited",
            IntelErrorKind::Timeout => "timeout",
            IntelErrorKind::NetworkError => "network_error",
            IntelErrorKind::AuthError => "auth_error",
            IntelErrorKind::MalformedResponse => "malformed_response",
        };
        f.write_str(s)
    }
}

/// Result alias used throughout the workspace.
pub type CobaltResult<T> = Result<T, CobaltError>;

/// Process exit codes per spec §6.1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    Clean = 0,
    ConfigInvalid = 1,
    StorageFatal = 2,
    CaptureFailed = 3,
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> i32 {
        code as i32
    }
}
