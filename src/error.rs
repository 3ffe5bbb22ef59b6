use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::provider::JobStatus;

pub type Result<T> = std::result::Result<T, GenFlowError>;

#[derive(Debug, Error)]
pub enum GenFlowError {
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error("invalid input: {0}")]
    Validation(String),
    #[error("capability `{0}` not registered")]
    UnknownCapability(String),
    #[error(transparent)]
    Submission(#[from] SubmissionError),
    #[error(transparent)]
    Job(#[from] JobError),
    #[error(transparent)]
    Result(#[from] ResultError),
    #[error(transparent)]
    Extraction(#[from] ExtractionError),
    #[error(transparent)]
    Download(#[from] DownloadError),
    #[error(transparent)]
    Target(#[from] TargetError),
    #[error(transparent)]
    Upload(#[from] UploadError),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("operation cancelled")]
    Cancelled,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// 错误分类，用于统一的错误信封前缀与日志字段
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorCategory {
    Auth,
    Validation,
    Provider,
    Network,
    Storage,
    Cancelled,
    Unexpected,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auth => "auth",
            Self::Validation => "validation",
            Self::Provider => "provider",
            Self::Network => "network",
            Self::Storage => "storage",
            Self::Cancelled => "cancelled",
            Self::Unexpected => "unexpected",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl GenFlowError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Auth(_) => ErrorCategory::Auth,
            Self::Validation(_) | Self::UnknownCapability(_) => ErrorCategory::Validation,
            Self::Submission(_) | Self::Job(_) | Self::Result(_) | Self::Extraction(_) => {
                ErrorCategory::Provider
            }
            Self::Download(_) => ErrorCategory::Network,
            Self::Target(_) | Self::Upload(_) => ErrorCategory::Storage,
            Self::Cancelled => ErrorCategory::Cancelled,
            Self::Config(_) | Self::Other(_) => ErrorCategory::Unexpected,
        }
    }

    /// 可重试的瞬时错误（目前只有状态轮询的网络抖动）
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Job(JobError::Poll { transient: true, .. }))
    }

    /// 返回给调用方的错误信息
    pub fn envelope_message(&self) -> String {
        match self {
            Self::Auth(err) => format!("Authentication failed: {err}"),
            Self::Validation(message) => format!("Invalid input: {message}"),
            Self::UnknownCapability(name) => format!("Invalid input: unknown capability `{name}`"),
            Self::Submission(_) | Self::Job(_) | Self::Result(_) | Self::Extraction(_) => {
                format!("AI Processing error: {self}")
            }
            Self::Download(err) => format!("Network error: {err}"),
            Self::Target(_) | Self::Upload(_) => format!("Upload error: {self}"),
            Self::Cancelled => "Request cancelled before completion".to_string(),
            Self::Config(_) | Self::Other(_) => format!("Unexpected error: {self}"),
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("Missing Authorization header")]
    MissingHeader,
    #[error("Empty authorization token")]
    EmptyToken,
    #[error("credential rejected by storage API (HTTP {0})")]
    Rejected(u16),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SubmissionError {
    #[error("failed to submit `{job_type}`: {message}")]
    Transport { job_type: String, message: String },
    #[error("provider rejected `{job_type}` (HTTP {status}): {body}")]
    Rejected {
        job_type: String,
        status: u16,
        body: String,
    },
    #[error("provider response for `{job_type}` has no request id")]
    MissingRequestId { job_type: String },
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum JobError {
    #[error("job {request_id} ended with status {status}")]
    Terminal {
        request_id: String,
        status: JobStatus,
    },
    #[error("job {request_id} did not finish within {elapsed:?}")]
    DeadlineExceeded {
        request_id: String,
        elapsed: Duration,
    },
    #[error("status request for job {request_id} failed: {message}")]
    Poll {
        request_id: String,
        message: String,
        transient: bool,
    },
    #[error("handle for job {request_id} belongs to provider `{expected}`, not `{actual}`")]
    HandleMismatch {
        request_id: String,
        expected: String,
        actual: String,
    },
}

#[derive(Debug, Error)]
pub enum ResultError {
    #[error("result for job {request_id} requested before completion (last status: {status:?})")]
    NotReady {
        request_id: String,
        status: Option<JobStatus>,
    },
    #[error("result for job {request_id} was already fetched")]
    AlreadyFetched { request_id: String },
    #[error("failed to fetch result for job {request_id}: {message}")]
    Fetch { request_id: String, message: String },
    #[error(transparent)]
    Extraction(#[from] ExtractionError),
}

#[derive(Clone, Debug, Error, PartialEq)]
pub enum ExtractionError {
    #[error("unexpected result format, no output URL found: {payload}")]
    UnexpectedShape { payload: serde_json::Value },
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("download of {url} failed: {kind}")]
pub struct DownloadError {
    pub url: String,
    pub kind: DownloadErrorKind,
}

impl DownloadError {
    pub fn new(url: impl Into<String>, kind: DownloadErrorKind) -> Self {
        Self {
            url: url.into(),
            kind,
        }
    }

    pub fn from_reqwest(url: impl Into<String>, err: &reqwest::Error) -> Self {
        Self::new(url, DownloadErrorKind::from_reqwest(err))
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DownloadErrorKind {
    #[error("request timed out")]
    Timeout,
    #[error("connection failed")]
    Connect,
    #[error("HTTP status {0}")]
    Status(u16),
    #[error("failed to read body: {0}")]
    Body(String),
    #[error("request error: {0}")]
    Request(String),
    #[error("invalid URL: {0}")]
    InvalidUrl(String),
}

impl DownloadErrorKind {
    pub fn from_reqwest(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_connect() {
            Self::Connect
        } else if let Some(status) = err.status() {
            Self::Status(status.as_u16())
        } else if err.is_body() || err.is_decode() {
            Self::Body(err.to_string())
        } else {
            Self::Request(err.to_string())
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TargetError {
    #[error("upload target request failed{}: {message}", .status.map(|s| format!(" (HTTP {s})")).unwrap_or_default())]
    Request { status: Option<u16>, message: String },
    #[error("upload target response is missing `{0}`")]
    MissingField(&'static str),
    #[error("upload target response is not valid JSON: {0}")]
    Decode(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum UploadError {
    #[error("storage rejected upload (HTTP {status}): {body}")]
    Status { status: u16, body: String },
    #[error("upload transfer failed: {0}")]
    Transport(String),
    #[error("invalid upload form: {0}")]
    InvalidForm(String),
}
