use std::sync::Arc;

use futures::future;
use reqwest::header::HeaderMap;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::auth::{require_auth, AuthToken};
use crate::config::GenFlowConfig;
use crate::error::{ErrorCategory, GenFlowError, Result};
use crate::fetch::ArtifactFetcher;
use crate::media;
use crate::provider::{
    DynJobProvider, JobClient, ProgressReporter, QueueProvider, RetryPolicy, WaitOptions,
};
use crate::storage::UploadPipeline;

use super::{Attachment, CapabilityRegistry, Envelope};

/// 调用所处的阶段，仅用于错误日志
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    Lookup,
    Prepare,
    Submit,
    Wait,
    Download,
    Upload,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Lookup => "lookup",
            Self::Prepare => "prepare",
            Self::Submit => "submit",
            Self::Wait => "wait",
            Self::Download => "download",
            Self::Upload => "upload",
        }
    }
}

/// 把一次能力调用串成完整流水线：鉴权 → 校验 → 提交 → 轮询 → 下载 → 上传
#[derive(Clone)]
pub struct ToolOrchestrator {
    registry: Arc<CapabilityRegistry>,
    jobs: JobClient,
    fetcher: ArtifactFetcher,
    uploads: UploadPipeline,
    wait: WaitOptions,
}

impl ToolOrchestrator {
    pub fn new(
        registry: CapabilityRegistry,
        jobs: JobClient,
        fetcher: ArtifactFetcher,
        uploads: UploadPipeline,
    ) -> Self {
        Self {
            registry: Arc::new(registry),
            jobs,
            fetcher,
            uploads,
            wait: WaitOptions::default(),
        }
    }

    /// 使用内置能力和队列式生成服务
    pub fn from_config(config: &GenFlowConfig) -> Result<Self> {
        let provider: DynJobProvider = Arc::new(QueueProvider::new(config)?);
        let jobs = JobClient::new(provider).with_retry(RetryPolicy::new(config.poll_retries));
        Ok(Self::new(
            CapabilityRegistry::with_builtins(),
            jobs,
            ArtifactFetcher::new(config)?,
            UploadPipeline::new(config)?,
        )
        .with_wait_options(WaitOptions::from_config(config)))
    }

    pub fn with_wait_options(mut self, wait: WaitOptions) -> Self {
        self.wait = wait;
        self
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressReporter>) -> Self {
        self.jobs = self.jobs.with_progress(progress);
        self
    }

    pub fn registry(&self) -> &CapabilityRegistry {
        &self.registry
    }

    pub fn wait_options(&self) -> &WaitOptions {
        &self.wait
    }

    /// 任何失败都转换成错误信封，不会向调用方抛出
    pub async fn invoke(
        &self,
        name: &str,
        headers: &HeaderMap,
        args: Value,
        cancel: &CancellationToken,
    ) -> Envelope {
        require_auth(headers, |token| async move {
            let mut stage = Stage::Lookup;
            match self.run(name, args, &token, cancel, &mut stage).await {
                Ok(envelope) => envelope,
                Err(err) => {
                    Self::log_failure(name, stage, &err);
                    Envelope::from_error(&err)
                }
            }
        })
        .await
    }

    /// 并发执行多次调用，结果顺序与输入一致
    pub async fn invoke_many(
        &self,
        headers: &HeaderMap,
        calls: Vec<(String, Value)>,
        cancel: &CancellationToken,
    ) -> Vec<Envelope> {
        let futures = calls
            .into_iter()
            .map(|(name, args)| async move { self.invoke(&name, headers, args, cancel).await });
        future::join_all(futures).await
    }

    async fn run(
        &self,
        name: &str,
        args: Value,
        token: &AuthToken,
        cancel: &CancellationToken,
        stage: &mut Stage,
    ) -> Result<Envelope> {
        let capability = self
            .registry
            .get(name)
            .ok_or_else(|| GenFlowError::UnknownCapability(name.to_string()))?;

        *stage = Stage::Prepare;
        let job = capability.prepare(args)?;

        *stage = Stage::Submit;
        let jobs = self.jobs.clone().with_extractor(capability.extractor());
        let mut handle = jobs.submit(capability.job_type(), &job.arguments, cancel).await?;

        *stage = Stage::Wait;
        let reference = jobs
            .wait_for_completion(&mut handle, &self.wait, cancel)
            .await?;

        *stage = Stage::Download;
        let artifact = self.fetcher.download(&reference.url, cancel).await?;
        let extension = reference
            .content_type
            .as_deref()
            .and_then(media::known_extension)
            .unwrap_or(artifact.extension);
        let filename = format!("{}{}", job.output_stem, extension);

        *stage = Stage::Upload;
        let receipt = self
            .uploads
            .upload(artifact.bytes, &filename, token, cancel)
            .await?;
        // 上传完成后才收到取消：不返回已上传对象的引用
        if cancel.is_cancelled() {
            return Err(GenFlowError::Cancelled);
        }

        info!(
            capability = name,
            request_id = handle.request_id(),
            key = %receipt.key,
            size = receipt.size,
            %filename,
            "capability completed"
        );

        let mut extra = job.extra;
        if let Some(field) = job.source_field {
            extra.insert(field.to_string(), Value::String(reference.url));
        }
        let summary = job
            .summary
            .unwrap_or_else(|| capability.summary().to_string());
        Ok(Envelope::success(vec![Attachment::from_receipt(receipt, filename)], summary)
            .with_extra(extra))
    }

    fn log_failure(name: &str, stage: Stage, err: &GenFlowError) {
        match err.category() {
            ErrorCategory::Validation | ErrorCategory::Auth | ErrorCategory::Cancelled => warn!(
                capability = name,
                stage = stage.as_str(),
                category = %err.category(),
                error = %err,
                "capability invocation rejected"
            ),
            _ => error!(
                capability = name,
                stage = stage.as_str(),
                category = %err.category(),
                error = %err,
                "capability invocation failed"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::{HeaderValue, AUTHORIZATION};
    use serde_json::json;

    fn orchestrator() -> ToolOrchestrator {
        let config = GenFlowConfig::default();
        ToolOrchestrator::from_config(&config).unwrap()
    }

    fn auth_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer tok"));
        headers
    }

    #[test]
    fn stage_names() {
        assert_eq!(Stage::Wait.as_str(), "wait");
        assert_eq!(Stage::Upload.as_str(), "upload");
    }

    #[tokio::test]
    async fn missing_token_is_rejected_before_lookup() {
        let envelope = orchestrator()
            .invoke("nope", &HeaderMap::new(), json!({}), &CancellationToken::new())
            .await;
        assert_eq!(
            envelope,
            Envelope::error("Authentication failed: Missing Authorization header")
        );
    }

    #[tokio::test]
    async fn unknown_capability_is_invalid_input() {
        let envelope = orchestrator()
            .invoke("nope", &auth_headers(), json!({}), &CancellationToken::new())
            .await;
        assert_eq!(
            envelope,
            Envelope::error("Invalid input: unknown capability `nope`")
        );
    }

    #[tokio::test]
    async fn validation_happens_before_any_network_call() {
        let envelope = orchestrator()
            .invoke(
                "upscale_image",
                &auth_headers(),
                json!({"file_url": "file:///etc/passwd"}),
                &CancellationToken::new(),
            )
            .await;
        assert_eq!(
            envelope,
            Envelope::error("Invalid input: file_url must be a valid HTTP(S) URL")
        );
    }

    #[test]
    fn from_config_uses_config_wait_options() {
        let config = GenFlowConfig::default().with_job_deadline(std::time::Duration::from_secs(5));
        let orchestrator = ToolOrchestrator::from_config(&config).unwrap();
        assert_eq!(
            orchestrator.wait_options().deadline,
            Some(std::time::Duration::from_secs(5))
        );
        assert_eq!(orchestrator.registry().len(), 9);
    }
}
