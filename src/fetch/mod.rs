//! 下载生成产物
//!
//! 远程 URL 走长超时的传输客户端；`data:` URL（内联 base64 输出）直接在本地解码。

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::GenFlowConfig;
use crate::error::{DownloadError, DownloadErrorKind, GenFlowError, Result};
use crate::media;
use crate::utils::run_cancellable;

/// 下载到内存中的产物
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Artifact {
    pub bytes: Vec<u8>,
    /// 带前导点，例如 `.png`
    pub extension: &'static str,
    pub content_type: String,
    pub url: String,
}

impl Artifact {
    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }
}

#[derive(Clone)]
pub struct ArtifactFetcher {
    client: Client,
}

impl ArtifactFetcher {
    pub fn new(config: &GenFlowConfig) -> Result<Self> {
        Ok(Self::with_client(config.transfer_client()?))
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    /// 根据 content-type 推断扩展名；缺失或未知时返回 `.bin`
    pub fn infer_extension(content_type: Option<&str>) -> &'static str {
        media::extension_for_content_type(content_type)
    }

    fn resolve_extension(content_type: Option<&str>, url_path: &str) -> &'static str {
        content_type
            .and_then(media::known_extension)
            .or_else(|| media::extension_from_path(url_path))
            .unwrap_or(media::FALLBACK_EXTENSION)
    }

    pub async fn download(&self, url: &str, cancel: &CancellationToken) -> Result<Artifact> {
        if is_data_url(url) {
            return Self::decode_data_url(url);
        }

        let parsed = reqwest::Url::parse(url).map_err(|e| {
            DownloadError::new(url, DownloadErrorKind::InvalidUrl(e.to_string()))
        })?;

        debug!(%url, "downloading artifact");
        let response = run_cancellable(cancel, self.client.get(parsed.clone()).send())
            .await?
            .map_err(|e| DownloadError::from_reqwest(url, &e))?;

        let status = response.status();
        if !status.is_success() {
            warn!(%url, status = status.as_u16(), "artifact download failed");
            return Err(DownloadError::new(url, DownloadErrorKind::Status(status.as_u16())).into());
        }

        let header = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);

        let bytes = run_cancellable(cancel, response.bytes())
            .await?
            .map_err(|e| DownloadError::from_reqwest(url, &e))?;

        let extension = Self::resolve_extension(header.as_deref(), parsed.path());
        let content_type = header
            .map(|ct| media::normalize_content_type(&ct))
            .filter(|ct| !ct.is_empty())
            .unwrap_or_else(|| media::FALLBACK_CONTENT_TYPE.to_string());

        info!(%url, size = bytes.len(), extension, "artifact downloaded");
        Ok(Artifact {
            bytes: bytes.to_vec(),
            extension,
            content_type,
            url: url.to_string(),
        })
    }

    /// `data:[<mediatype>][;base64],<payload>`
    fn decode_data_url(url: &str) -> Result<Artifact> {
        let invalid = |reason: String| -> GenFlowError {
            DownloadError::new(preview(url), DownloadErrorKind::InvalidUrl(reason)).into()
        };

        let rest = &url[DATA_SCHEME.len()..];
        let (meta, payload) = rest
            .split_once(',')
            .ok_or_else(|| invalid("data URL has no payload separator".into()))?;

        let (mime, is_base64) = match meta.strip_suffix(";base64") {
            Some(mime) => (mime, true),
            None => (meta, false),
        };

        let bytes = if is_base64 {
            STANDARD
                .decode(payload.trim())
                .map_err(|e| invalid(format!("invalid base64 payload: {e}")))?
        } else {
            payload.as_bytes().to_vec()
        };

        let content_type = match media::normalize_content_type(mime) {
            ct if ct.is_empty() => media::FALLBACK_CONTENT_TYPE.to_string(),
            ct => ct,
        };
        let extension = Self::infer_extension(Some(&content_type));

        debug!(size = bytes.len(), %content_type, "decoded inline artifact");
        Ok(Artifact {
            bytes,
            extension,
            content_type,
            url: preview(url),
        })
    }
}

const DATA_SCHEME: &str = "data:";

/// URL scheme 不区分大小写
fn is_data_url(url: &str) -> bool {
    url.get(..DATA_SCHEME.len())
        .is_some_and(|scheme| scheme.eq_ignore_ascii_case(DATA_SCHEME))
}

/// data URL 可能有几 MB，日志和错误里只保留开头
fn preview(url: &str) -> String {
    const MAX: usize = 48;
    if url.len() <= MAX {
        return url.to_string();
    }
    let cut = (0..=MAX).rev().find(|i| url.is_char_boundary(*i)).unwrap_or(0);
    format!("{}…", &url[..cut])
}
