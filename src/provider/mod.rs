//! 异步生成任务：提交、轮询、取结果
//!
//! `JobProvider` 是与具体生成服务交互的接缝，`JobClient` 在其之上实现
//! 任务状态机、截止时间、取消以及轮询重试。

pub mod progress;
pub mod queue;
pub mod retry;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::{sleep, sleep_until, timeout_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub use progress::{JobProgress, ProgressReporter, RecordingProgress, TracingProgress};
pub use queue::QueueProvider;
pub use retry::RetryPolicy;

use crate::config::GenFlowConfig;
use crate::error::{GenFlowError, JobError, Result, ResultError};
use crate::extract::{ResultExtractor, ResultReference};
use crate::utils::run_cancellable;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Queued,
    InProgress,
    Completed,
    Failed,
    Unknown,
}

impl JobStatus {
    /// 解析生成服务返回的状态字符串
    pub fn from_provider(raw: &str) -> Self {
        match raw.trim() {
            "IN_QUEUE" | "QUEUED" | "Queued" => Self::Queued,
            "IN_PROGRESS" | "InProgress" => Self::InProgress,
            "COMPLETED" | "Completed" => Self::Completed,
            "FAILED" | "ERROR" | "Failed" => Self::Failed,
            _ => Self::Unknown,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// 一次状态查询的结果
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StatusReport {
    pub status: JobStatus,
    pub logs: Vec<String>,
}

impl StatusReport {
    pub fn new(status: JobStatus) -> Self {
        Self {
            status,
            logs: Vec::new(),
        }
    }
}

/// 已提交任务的句柄，只对创建它的 provider 有效
#[derive(Clone, Debug)]
pub struct JobHandle {
    request_id: String,
    job_type: String,
    provider: String,
    status_url: Option<String>,
    response_url: Option<String>,
    last_status: Option<JobStatus>,
    result_fetched: bool,
    polls: u32,
}

impl JobHandle {
    pub fn new(
        request_id: impl Into<String>,
        job_type: impl Into<String>,
        provider: impl Into<String>,
    ) -> Self {
        Self {
            request_id: request_id.into(),
            job_type: job_type.into(),
            provider: provider.into(),
            status_url: None,
            response_url: None,
            last_status: None,
            result_fetched: false,
            polls: 0,
        }
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn job_type(&self) -> &str {
        &self.job_type
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    /// 生成服务在提交时给出的状态地址（若有）
    pub fn status_url(&self) -> Option<&str> {
        self.status_url.as_deref()
    }

    pub fn response_url(&self) -> Option<&str> {
        self.response_url.as_deref()
    }

    pub fn last_status(&self) -> Option<JobStatus> {
        self.last_status
    }

    pub fn result_fetched(&self) -> bool {
        self.result_fetched
    }

    pub fn polls(&self) -> u32 {
        self.polls
    }

    /// 记录一次观测到的状态；终态一旦出现便不再改变
    pub fn observe(&mut self, status: JobStatus) -> JobStatus {
        match self.last_status {
            Some(current) if current.is_terminal() => {
                if current != status {
                    warn!(
                        request_id = %self.request_id,
                        %current,
                        reported = %status,
                        "ignoring status change after terminal state"
                    );
                }
                current
            }
            _ => {
                self.last_status = Some(status);
                status
            }
        }
    }
}

/// 提交成功后生成服务返回的信息
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Submission {
    pub request_id: String,
    pub status_url: Option<String>,
    pub response_url: Option<String>,
}

impl Submission {
    pub fn new(request_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            ..Self::default()
        }
    }

    pub fn with_urls(mut self, status_url: Option<String>, response_url: Option<String>) -> Self {
        self.status_url = status_url;
        self.response_url = response_url;
        self
    }

    fn into_handle(self, job_type: &str, provider: &str) -> JobHandle {
        let mut handle = JobHandle::new(self.request_id, job_type, provider);
        handle.status_url = self.status_url;
        handle.response_url = self.response_url;
        handle
    }
}

#[async_trait]
pub trait JobProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn submit(&self, job_type: &str, arguments: &Value) -> Result<Submission>;

    async fn status(&self, handle: &JobHandle) -> Result<StatusReport>;

    async fn result(&self, handle: &JobHandle) -> Result<Value>;
}

pub type DynJobProvider = Arc<dyn JobProvider>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WaitOptions {
    pub poll_interval: Duration,
    /// `None` 表示只受取消信号约束
    pub deadline: Option<Duration>,
}

impl Default for WaitOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            deadline: None,
        }
    }
}

impl WaitOptions {
    pub fn from_config(config: &GenFlowConfig) -> Self {
        Self {
            poll_interval: config.poll_interval,
            deadline: Some(config.job_deadline),
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

#[derive(Clone)]
pub struct JobClient {
    provider: DynJobProvider,
    extractor: ResultExtractor,
    progress: Arc<dyn ProgressReporter>,
    retry: RetryPolicy,
}

impl JobClient {
    pub fn new(provider: DynJobProvider) -> Self {
        Self {
            provider,
            extractor: ResultExtractor::default(),
            progress: Arc::new(TracingProgress),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_extractor(mut self, extractor: ResultExtractor) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    pub async fn submit(
        &self,
        job_type: &str,
        arguments: &Value,
        cancel: &CancellationToken,
    ) -> Result<JobHandle> {
        let submission =
            run_cancellable(cancel, self.provider.submit(job_type, arguments)).await??;
        info!(
            provider = self.provider.name(),
            job_type,
            request_id = %submission.request_id,
            "job submitted"
        );
        Ok(submission.into_handle(job_type, self.provider.name()))
    }

    /// 查询一次状态；句柄已处于终态时不再访问生成服务
    pub async fn poll(&self, handle: &mut JobHandle, cancel: &CancellationToken) -> Result<JobStatus> {
        self.check_handle(handle)?;
        if let Some(status) = handle.last_status.filter(JobStatus::is_terminal) {
            return Ok(status);
        }

        let report = {
            let current: &JobHandle = handle;
            self.retry
                .run(cancel, || self.provider.status(current))
                .await?
        };

        handle.polls += 1;
        let status = handle.observe(report.status);
        self.progress.report(&JobProgress {
            request_id: handle.request_id.clone(),
            job_type: handle.job_type.clone(),
            attempt: handle.polls,
            status,
            logs: report.logs,
        });
        Ok(status)
    }

    /// 取回结果并定位产物 URL；每个句柄最多一次，且只能在 `Completed` 之后
    pub async fn fetch_result(
        &self,
        handle: &mut JobHandle,
        cancel: &CancellationToken,
    ) -> Result<ResultReference> {
        self.check_handle(handle)?;
        if handle.last_status != Some(JobStatus::Completed) {
            return Err(ResultError::NotReady {
                request_id: handle.request_id.clone(),
                status: handle.last_status,
            }
            .into());
        }
        if handle.result_fetched {
            return Err(ResultError::AlreadyFetched {
                request_id: handle.request_id.clone(),
            }
            .into());
        }
        handle.result_fetched = true;

        let payload = run_cancellable(cancel, self.provider.result(handle)).await??;
        debug!(request_id = %handle.request_id, %payload, "job result received");

        self.extractor
            .extract(&payload)
            .map_err(|err| GenFlowError::Result(ResultError::Extraction(err)))
    }

    /// 轮询直到终态：`Completed` 时取结果，`Failed`/`Unknown` 时报错
    pub async fn wait_for_completion(
        &self,
        handle: &mut JobHandle,
        options: &WaitOptions,
        cancel: &CancellationToken,
    ) -> Result<ResultReference> {
        let started = Instant::now();
        // 超出 `Instant` 表示范围的截止时间等同于不设截止时间
        let deadline = options.deadline.and_then(|limit| started.checked_add(limit));

        loop {
            if cancel.is_cancelled() {
                return Err(GenFlowError::Cancelled);
            }

            let status = match deadline {
                Some(at) => match timeout_at(at, self.poll(handle, cancel)).await {
                    Ok(status) => status?,
                    Err(_) => return Err(Self::deadline_exceeded(handle, started)),
                },
                None => self.poll(handle, cancel).await?,
            };

            match status {
                JobStatus::Completed => return self.fetch_result(handle, cancel).await,
                JobStatus::Failed | JobStatus::Unknown => {
                    warn!(request_id = %handle.request_id, %status, "job did not complete");
                    return Err(JobError::Terminal {
                        request_id: handle.request_id.clone(),
                        status,
                    }
                    .into());
                }
                JobStatus::Queued | JobStatus::InProgress => {}
            }

            let pause = match deadline {
                Some(at) => sleep_until(
                    Instant::now()
                        .checked_add(options.poll_interval)
                        .map_or(at, |wake| wake.min(at)),
                ),
                None => sleep(options.poll_interval),
            };
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(GenFlowError::Cancelled),
                _ = pause => {}
            }
            if deadline.is_some_and(|at| Instant::now() >= at) {
                return Err(Self::deadline_exceeded(handle, started));
            }
        }
    }

    fn check_handle(&self, handle: &JobHandle) -> Result<()> {
        if handle.provider != self.provider.name() {
            return Err(JobError::HandleMismatch {
                request_id: handle.request_id.clone(),
                expected: handle.provider.clone(),
                actual: self.provider.name().to_string(),
            }
            .into());
        }
        Ok(())
    }

    fn deadline_exceeded(handle: &JobHandle, started: Instant) -> GenFlowError {
        let elapsed = started.elapsed();
        warn!(request_id = %handle.request_id, ?elapsed, "job deadline exceeded");
        JobError::DeadlineExceeded {
            request_id: handle.request_id.clone(),
            elapsed,
        }
        .into()
    }
}
