//! 两阶段预签名上传
//!
//! 1. 携带 bearer 凭证向存储 API 申请上传目标（url + 表单字段 + file_id）
//! 2. 把表单字段和文件以 multipart 形式直接 POST 到目标地址，`file` 放在最后
//!
//! 返回的 key 就是第一阶段的 `file_id`，唯一性由存储端保证。

use std::collections::BTreeMap;

use reqwest::multipart::{Form, Part};
use reqwest::{Client, StatusCode};
use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::auth::AuthToken;
use crate::config::GenFlowConfig;
use crate::error::{AuthError, Result, TargetError, UploadError};
use crate::media;
use crate::utils::run_cancellable;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UploadTarget {
    pub url: String,
    pub fields: BTreeMap<String, String>,
    pub file_id: String,
}

impl UploadTarget {
    fn from_response(body: &Value) -> std::result::Result<Self, TargetError> {
        let url = body
            .get("url")
            .and_then(Value::as_str)
            .filter(|url| !url.is_empty())
            .ok_or(TargetError::MissingField("url"))?;
        let fields = body
            .get("fields")
            .and_then(Value::as_object)
            .ok_or(TargetError::MissingField("fields"))?;
        let file_id = match body.get("file_id") {
            Some(Value::String(id)) if !id.is_empty() => id.clone(),
            Some(Value::Number(id)) => id.to_string(),
            _ => return Err(TargetError::MissingField("file_id")),
        };

        let fields = fields
            .iter()
            .map(|(name, value)| {
                let value = match value {
                    Value::String(text) => text.clone(),
                    other => other.to_string(),
                };
                (name.clone(), value)
            })
            .collect();

        Ok(Self {
            url: url.to_string(),
            fields,
            file_id,
        })
    }
}

/// 上传成功后的回执
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UploadReceipt {
    pub key: String,
    pub size: u64,
}

#[derive(Serialize)]
struct TargetRequest<'a> {
    filename: &'a str,
    content_type: &'a str,
}

#[derive(Clone)]
pub struct UploadPipeline {
    api_base_url: String,
    /// 第一阶段：短超时
    metadata: Client,
    /// 第二阶段：长超时
    transfer: Client,
}

impl UploadPipeline {
    pub fn new(config: &GenFlowConfig) -> Result<Self> {
        Ok(Self::with_clients(
            config.api_base_url.clone(),
            config.metadata_client()?,
            config.transfer_client()?,
        ))
    }

    pub fn with_clients(api_base_url: impl Into<String>, metadata: Client, transfer: Client) -> Self {
        Self {
            api_base_url: api_base_url.into().trim_end_matches('/').to_string(),
            metadata,
            transfer,
        }
    }

    pub async fn request_upload_target(
        &self,
        filename: &str,
        content_type: &str,
        token: &AuthToken,
        cancel: &CancellationToken,
    ) -> Result<UploadTarget> {
        let endpoint = format!("{}/files/upload", self.api_base_url);
        debug!(%filename, %content_type, "requesting upload target");

        let request = self
            .metadata
            .post(&endpoint)
            .header("Authorization", token.bearer_header())
            .json(&TargetRequest {
                filename,
                content_type,
            })
            .send();
        let response = run_cancellable(cancel, request)
            .await?
            .map_err(|e| TargetError::Request {
                status: None,
                message: e.to_string(),
            })?;

        let status = response.status();
        if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
            warn!(token = %token.fingerprint(), status = status.as_u16(), "storage API rejected credential");
            return Err(AuthError::Rejected(status.as_u16()).into());
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TargetError::Request {
                status: Some(status.as_u16()),
                message: body,
            }
            .into());
        }

        let body: Value = run_cancellable(cancel, response.json())
            .await?
            .map_err(|e| TargetError::Decode(e.to_string()))?;
        let target = UploadTarget::from_response(&body)?;

        info!(url = %target.url, file_id = %target.file_id, fields = target.fields.len(), "upload target issued");
        Ok(target)
    }

    pub async fn perform_upload(
        &self,
        target: &UploadTarget,
        bytes: Vec<u8>,
        filename: &str,
        content_type: &str,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let mut form = Form::new();
        for (name, value) in &target.fields {
            form = form.text(name.clone(), value.clone());
        }
        let file = Part::bytes(bytes)
            .file_name(filename.to_string())
            .mime_str(content_type)
            .map_err(|e| UploadError::InvalidForm(format!("invalid content type `{content_type}`: {e}")))?;
        let form = form.part("file", file);

        let request = self.transfer.post(&target.url).multipart(form).send();
        let response = run_cancellable(cancel, request)
            .await?
            .map_err(|e| UploadError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(url = %target.url, status = status.as_u16(), "storage rejected upload");
            return Err(UploadError::Status {
                status: status.as_u16(),
                body,
            }
            .into());
        }
        Ok(())
    }

    /// 完整的两阶段上传；content-type 由文件名推断
    pub async fn upload(
        &self,
        bytes: Vec<u8>,
        filename: &str,
        token: &AuthToken,
        cancel: &CancellationToken,
    ) -> Result<UploadReceipt> {
        let size = bytes.len() as u64;
        let content_type = media::content_type_for_filename(filename);
        info!(%filename, size, %content_type, "uploading artifact");

        let target = self
            .request_upload_target(filename, content_type, token, cancel)
            .await?;
        self.perform_upload(&target, bytes, filename, content_type, cancel)
            .await?;

        info!(key = %target.file_id, size, "upload complete");
        Ok(UploadReceipt {
            key: target.file_id,
            size,
        })
    }
}
