pub mod auth;
pub mod cli;
pub mod config;
pub mod error;
pub mod extract;
pub mod fetch;
pub mod media;
pub mod provider;
pub mod storage;
pub mod tools;
pub mod utils;

pub use auth::{require_auth, AuthToken, TokenValidator};
pub use cli::{
    capability_summaries, headers_with_token, parse_args_json, render_progress, CapabilitySummary,
};
pub use config::{EnvConfig, GenFlowConfig};
pub use error::{
    AuthError, DownloadError, DownloadErrorKind, ErrorCategory, ExtractionError, GenFlowError,
    JobError, Result, ResultError, SubmissionError, TargetError, UploadError,
};
pub use extract::{ResultExtractor, ResultReference, ShapeMatcher};
pub use fetch::{Artifact, ArtifactFetcher};
pub use provider::{
    DynJobProvider, JobClient, JobHandle, JobProgress, JobProvider, JobStatus, ProgressReporter,
    QueueProvider, RecordingProgress, RetryPolicy, StatusReport, Submission, TracingProgress,
    WaitOptions,
};
pub use storage::{UploadPipeline, UploadReceipt, UploadTarget};
pub use tools::{
    parse_args, Attachment, Capability, CapabilityRegistry, DynCapability, Envelope, PreparedJob,
    Stage, ToolOrchestrator,
};
pub use utils::{logging, run_cancellable, validation, InputValidator, LoggingConfig};
