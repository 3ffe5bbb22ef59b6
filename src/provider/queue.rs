//! 队列式 REST 生成服务
//!
//! - `POST {base}/{job_type}` 提交，返回 `{"request_id", "status_url"?, "response_url"?}`
//! - `GET {status_url}` 查询状态，缺省为 `{base}/{owner}/{app}/requests/{id}/status`
//! - `GET {response_url}` 取结果，缺省为 `{base}/{owner}/{app}/requests/{id}`
//!
//! `{owner}/{app}` 是 job type 的前两段，例如 `fal-ai/bria/genfill` 的状态
//! 地址在 `fal-ai/bria` 之下。所有请求携带 `Authorization: Key <key>`。

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode, Url};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use super::{JobHandle, JobProvider, JobStatus, StatusReport, Submission};
use crate::config::GenFlowConfig;
use crate::error::{JobError, Result, ResultError, SubmissionError};

const PROVIDER_NAME: &str = "queue";

#[derive(Debug, Deserialize)]
struct SubmitBody {
    #[serde(default)]
    request_id: Option<String>,
    #[serde(default)]
    status_url: Option<String>,
    #[serde(default)]
    response_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StatusBody {
    status: String,
    #[serde(default)]
    logs: Option<Vec<LogLine>>,
}

#[derive(Debug, Deserialize)]
struct LogLine {
    #[serde(default)]
    message: String,
}

#[derive(Clone)]
pub struct QueueProvider {
    base_url: String,
    api_key: String,
    /// 提交和状态查询
    metadata: Client,
    /// 结果可能较大，使用长超时
    transfer: Client,
}

impl QueueProvider {
    pub fn new(config: &GenFlowConfig) -> Result<Self> {
        Ok(Self::with_clients(
            config.provider_base_url.clone(),
            config.provider_key.clone(),
            config.metadata_client()?,
            config.transfer_client()?,
        ))
    }

    pub fn with_clients(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        metadata: Client,
        transfer: Client,
    ) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            metadata,
            transfer,
        }
    }

    fn job_url(&self, job_type: &str) -> String {
        format!("{}/{}", self.base_url, job_type.trim_matches('/'))
    }

    /// 队列按 `{owner}/{app}` 归档请求，更深的路径段只用于提交
    fn app_id(job_type: &str) -> String {
        job_type
            .trim_matches('/')
            .split('/')
            .filter(|segment| !segment.is_empty())
            .take(2)
            .collect::<Vec<_>>()
            .join("/")
    }

    fn request_url(&self, job_type: &str, request_id: &str) -> String {
        format!(
            "{}/{}/requests/{}",
            self.base_url,
            Self::app_id(job_type),
            request_id
        )
    }

    fn status_url(&self, handle: &JobHandle) -> String {
        handle.status_url().map(str::to_string).unwrap_or_else(|| {
            format!("{}/status", self.request_url(handle.job_type(), handle.request_id()))
        })
    }

    fn response_url(&self, handle: &JobHandle) -> String {
        handle
            .response_url()
            .map(str::to_string)
            .unwrap_or_else(|| self.request_url(handle.job_type(), handle.request_id()))
    }

    /// 只接受 http(s) 地址，否则退回到按 job type 拼出的地址
    fn usable_url(raw: Option<String>) -> Option<String> {
        raw.filter(|url| {
            Url::parse(url).is_ok_and(|parsed| matches!(parsed.scheme(), "http" | "https"))
        })
    }

    fn authorize(&self, builder: RequestBuilder) -> RequestBuilder {
        if self.api_key.is_empty() {
            builder
        } else {
            builder.header("Authorization", format!("Key {}", self.api_key))
        }
    }

    fn is_transient_status(status: StatusCode) -> bool {
        status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS
    }
}

impl std::fmt::Debug for QueueProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueProvider")
            .field("base_url", &self.base_url)
            .field("api_key", &"[redacted]")
            .finish()
    }
}

#[async_trait]
impl JobProvider for QueueProvider {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    async fn submit(&self, job_type: &str, arguments: &Value) -> Result<Submission> {
        let url = self.job_url(job_type);
        debug!(%url, "submitting job");

        let response = self
            .authorize(self.metadata.post(&url))
            .json(arguments)
            .send()
            .await
            .map_err(|e| SubmissionError::Transport {
                job_type: job_type.to_string(),
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(job_type, status = status.as_u16(), "job submission rejected");
            return Err(SubmissionError::Rejected {
                job_type: job_type.to_string(),
                status: status.as_u16(),
                body,
            }
            .into());
        }

        let body: SubmitBody = response.json().await.map_err(|e| SubmissionError::Transport {
            job_type: job_type.to_string(),
            message: format!("invalid submission response: {e}"),
        })?;

        let request_id = body
            .request_id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| SubmissionError::MissingRequestId {
                job_type: job_type.to_string(),
            })?;
        Ok(Submission::new(request_id).with_urls(
            Self::usable_url(body.status_url),
            Self::usable_url(body.response_url),
        ))
    }

    async fn status(&self, handle: &JobHandle) -> Result<StatusReport> {
        let url = self.status_url(handle);
        let poll_error = |message: String, transient: bool| JobError::Poll {
            request_id: handle.request_id().to_string(),
            message,
            transient,
        };

        let response = self
            .authorize(self.metadata.get(&url))
            .query(&[("logs", "1")])
            .send()
            .await
            .map_err(|e| poll_error(e.to_string(), e.is_timeout() || e.is_connect()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(poll_error(
                format!("HTTP {}", status.as_u16()),
                Self::is_transient_status(status),
            )
            .into());
        }

        let body: StatusBody = response
            .json()
            .await
            .map_err(|e| poll_error(format!("invalid status response: {e}"), false))?;

        Ok(StatusReport {
            status: JobStatus::from_provider(&body.status),
            logs: body
                .logs
                .unwrap_or_default()
                .into_iter()
                .map(|line| line.message)
                .filter(|message| !message.is_empty())
                .collect(),
        })
    }

    async fn result(&self, handle: &JobHandle) -> Result<Value> {
        let url = self.response_url(handle);
        let fetch_error = |message: String| ResultError::Fetch {
            request_id: handle.request_id().to_string(),
            message,
        };

        let response = self
            .authorize(self.transfer.get(&url))
            .send()
            .await
            .map_err(|e| fetch_error(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(fetch_error(format!("HTTP {}: {body}", status.as_u16())).into());
        }

        Ok(response
            .json()
            .await
            .map_err(|e| fetch_error(format!("invalid result JSON: {e}")))?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GenFlowError;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider(server: &MockServer) -> QueueProvider {
        QueueProvider::with_clients(server.uri(), "fal-key", Client::new(), Client::new())
    }

    #[tokio::test]
    async fn submit_posts_arguments_and_returns_request_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/fal-ai/esrgan"))
            .and(header("Authorization", "Key fal-key"))
            .and(body_json(json!({"image_url": "https://x/a.png"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"request_id": "req-9"})))
            .expect(1)
            .mount(&server)
            .await;

        let submission = provider(&server)
            .submit("fal-ai/esrgan", &json!({"image_url": "https://x/a.png"}))
            .await
            .unwrap();
        assert_eq!(submission, Submission::new("req-9"));
    }

    #[tokio::test]
    async fn submit_keeps_provider_status_and_response_urls() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/fal-ai/bria/genfill"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "request_id": "req-3",
                "status_url": "https://queue.example/fal-ai/bria/requests/req-3/status",
                "response_url": "ftp://queue.example/fal-ai/bria/requests/req-3"
            })))
            .mount(&server)
            .await;

        let submission = provider(&server)
            .submit("fal-ai/bria/genfill", &json!({}))
            .await
            .unwrap();
        assert_eq!(
            submission.status_url.as_deref(),
            Some("https://queue.example/fal-ai/bria/requests/req-3/status")
        );
        assert_eq!(submission.response_url, None);
    }

    #[tokio::test]
    async fn submit_without_request_id_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "ok"})))
            .mount(&server)
            .await;

        let err = provider(&server).submit("fal-ai/esrgan", &json!({})).await.unwrap_err();
        assert!(matches!(
            err,
            GenFlowError::Submission(SubmissionError::MissingRequestId { .. })
        ));
    }

    #[tokio::test]
    async fn submit_rejection_keeps_status_and_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(422).set_body_string("bad image_url"))
            .mount(&server)
            .await;

        let err = provider(&server).submit("fal-ai/esrgan", &json!({})).await.unwrap_err();
        match err {
            GenFlowError::Submission(SubmissionError::Rejected { status, body, .. }) => {
                assert_eq!(status, 422);
                assert_eq!(body, "bad image_url");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn status_maps_provider_strings_and_logs() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/fal-ai/zonos/requests/req-1/status"))
            .and(query_param("logs", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "IN_PROGRESS",
                "logs": [{"message": "step 1/4"}, {"message": ""}]
            })))
            .mount(&server)
            .await;

        let handle = JobHandle::new("req-1", "fal-ai/zonos", "queue");
        let report = provider(&server).status(&handle).await.unwrap();
        assert_eq!(report.status, JobStatus::InProgress);
        assert_eq!(report.logs, vec!["step 1/4".to_string()]);
    }

    #[tokio::test]
    async fn server_errors_on_status_are_transient() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let handle = JobHandle::new("req-1", "fal-ai/zonos", "queue");
        let err = provider(&server).status(&handle).await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn not_found_on_status_is_permanent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let handle = JobHandle::new("req-1", "fal-ai/zonos", "queue");
        let err = provider(&server).status(&handle).await.unwrap_err();
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn result_returns_raw_payload() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/fal-ai/zonos/requests/req-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "audio": {"url": "https://cdn/x.wav"}
            })))
            .mount(&server)
            .await;

        let handle = JobHandle::new("req-1", "fal-ai/zonos", "queue");
        let payload = provider(&server).result(&handle).await.unwrap();
        assert_eq!(payload["audio"]["url"], "https://cdn/x.wav");
    }

    #[tokio::test]
    async fn nested_job_type_is_polled_under_its_app() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/fal-ai/bria/requests/req-2/status"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "COMPLETED"})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/fal-ai/bria/requests/req-2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"images": []})))
            .expect(1)
            .mount(&server)
            .await;

        let provider = provider(&server);
        let handle = JobHandle::new("req-2", "fal-ai/bria/genfill", "queue");
        let report = provider.status(&handle).await.unwrap();
        assert_eq!(report.status, JobStatus::Completed);
        let payload = provider.result(&handle).await.unwrap();
        assert_eq!(payload, json!({"images": []}));
    }

    #[tokio::test]
    async fn urls_from_submission_take_precedence() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/fal-ai/meshy/v6-preview/text-to-3d"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "request_id": "req-4",
                "status_url": format!("{}/custom/status/req-4", server.uri()),
                "response_url": format!("{}/custom/result/req-4", server.uri())
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/custom/status/req-4"))
            .and(query_param("logs", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "IN_QUEUE"})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/custom/result/req-4"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "model_glb": {"url": "https://cdn/m.glb"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let provider = provider(&server);
        let job_type = "fal-ai/meshy/v6-preview/text-to-3d";
        let submission = provider.submit(job_type, &json!({})).await.unwrap();
        let handle = JobHandle::new(submission.request_id.clone(), job_type, "queue");
        // 未携带地址的句柄只能按 job type 推出地址
        assert_eq!(
            provider.status_url(&handle),
            format!("{}/fal-ai/meshy/requests/req-4/status", server.uri())
        );

        let handle = Submission::new("req-4")
            .with_urls(submission.status_url, submission.response_url)
            .into_handle(job_type, "queue");
        let report = provider.status(&handle).await.unwrap();
        assert_eq!(report.status, JobStatus::Queued);
        let payload = provider.result(&handle).await.unwrap();
        assert_eq!(payload["model_glb"]["url"], "https://cdn/m.glb");
    }

    #[test]
    fn debug_redacts_key() {
        let provider =
            QueueProvider::with_clients("https://queue.example/", "k", Client::new(), Client::new());
        assert!(!format!("{provider:?}").contains("\"k\""));
        assert_eq!(
            provider.request_url("fal-ai/esrgan", "r1"),
            "https://queue.example/fal-ai/esrgan/requests/r1"
        );
        assert_eq!(
            provider.request_url("/bria/video/background-removal", "r1"),
            "https://queue.example/bria/video/requests/r1"
        );
    }
}
