//! Bearer 凭证校验
//!
//! 从入站请求的 header 中取出 `Authorization`，去掉一次 `Bearer ` 前缀后
//! 得到不透明的 token。日志里只会出现 token 的短前缀。

use std::fmt;
use std::future::Future;

use reqwest::header::{HeaderMap, AUTHORIZATION};
use tracing::{info, warn};

use crate::error::{AuthError, GenFlowError};
use crate::tools::envelope::Envelope;

const BEARER_PREFIX: &str = "Bearer ";
const FINGERPRINT_LEN: usize = 6;

/// 单次调用内有效的 bearer 凭证，不持久化
#[derive(Clone, PartialEq, Eq)]
pub struct AuthToken(String);

impl AuthToken {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// 可以安全写入日志的短前缀
    pub fn fingerprint(&self) -> String {
        let prefix: String = self.0.chars().take(FINGERPRINT_LEN).collect();
        format!("{prefix}…")
    }

    pub fn bearer_header(&self) -> String {
        format!("{BEARER_PREFIX}{}", self.0)
    }
}

impl fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("AuthToken").field(&"[redacted]").finish()
    }
}

pub struct TokenValidator;

impl TokenValidator {
    pub fn validate(headers: &HeaderMap) -> Result<AuthToken, AuthError> {
        let raw = headers
            .get(AUTHORIZATION)
            .ok_or(AuthError::MissingHeader)?
            .to_str()
            .map_err(|_| AuthError::MissingHeader)?;

        let token = Self::strip_bearer(raw.trim_start()).trim();
        if token.is_empty() {
            warn!("empty bearer token provided");
            return Err(AuthError::EmptyToken);
        }

        let token = AuthToken::new(token);
        info!(token = %token.fingerprint(), "bearer token validated");
        Ok(token)
    }

    /// 去掉一次精确匹配（区分大小写）的 `Bearer ` 前缀
    pub fn strip_bearer(value: &str) -> &str {
        value.strip_prefix(BEARER_PREFIX).unwrap_or(value)
    }
}

/// 先校验凭证，再把 token 显式传给下一阶段；校验失败时直接返回错误信封
pub async fn require_auth<F, Fut>(headers: &HeaderMap, next: F) -> Envelope
where
    F: FnOnce(AuthToken) -> Fut,
    Fut: Future<Output = Envelope>,
{
    match TokenValidator::validate(headers) {
        Ok(token) => next(token).await,
        Err(err) => {
            warn!(error = %err, "authentication failed");
            Envelope::from_error(&GenFlowError::Auth(err))
        }
    }
}
