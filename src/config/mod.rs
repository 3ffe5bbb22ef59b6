pub mod env;

use std::time::Duration;

use reqwest::Client;

pub use env::EnvConfig;

use crate::error::{GenFlowError, Result};

pub const DEFAULT_API_BASE_URL: &str = "http://localhost:5000/api/v1";
pub const DEFAULT_PROVIDER_BASE_URL: &str = "https://queue.fal.run";
/// 单个任务等待时间上限（7 天）
pub const MAX_JOB_DEADLINE: Duration = Duration::from_secs(7 * 24 * 60 * 60);
pub const MAX_POLL_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// 进程级配置：启动时构建一次，之后只读，按引用（或 `Arc`）传给各组件
#[derive(Clone)]
pub struct GenFlowConfig {
    /// 存储 API（`/files/upload`）的基础地址
    pub api_base_url: String,
    /// 生成服务队列 API 的基础地址
    pub provider_base_url: String,
    pub provider_key: String,
    /// 元数据/状态类请求
    pub http_connect_timeout: Duration,
    pub http_read_timeout: Duration,
    /// 大文件传输（下载产物、上传到存储）
    pub ai_http_connect_timeout: Duration,
    pub ai_http_read_timeout: Duration,
    pub poll_interval: Duration,
    pub job_deadline: Duration,
    pub poll_retries: u32,
}

impl std::fmt::Debug for GenFlowConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenFlowConfig")
            .field("api_base_url", &self.api_base_url)
            .field("provider_base_url", &self.provider_base_url)
            .field("provider_key", &"[redacted]")
            .field("http_connect_timeout", &self.http_connect_timeout)
            .field("http_read_timeout", &self.http_read_timeout)
            .field("ai_http_connect_timeout", &self.ai_http_connect_timeout)
            .field("ai_http_read_timeout", &self.ai_http_read_timeout)
            .field("poll_interval", &self.poll_interval)
            .field("job_deadline", &self.job_deadline)
            .field("poll_retries", &self.poll_retries)
            .finish()
    }
}

impl Default for GenFlowConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            provider_base_url: DEFAULT_PROVIDER_BASE_URL.to_string(),
            provider_key: String::new(),
            http_connect_timeout: Duration::from_secs(15),
            http_read_timeout: Duration::from_secs(60),
            ai_http_connect_timeout: Duration::from_secs(15),
            ai_http_read_timeout: Duration::from_secs(180),
            poll_interval: Duration::from_secs(2),
            job_deadline: Duration::from_secs(900),
            poll_retries: 3,
        }
    }
}

impl GenFlowConfig {
    /// 从环境变量读取配置（`.env` 由调用方事先加载）
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        let config = Self {
            api_base_url: EnvConfig::get_string_or("API_BASE_URL", DEFAULT_API_BASE_URL),
            provider_base_url: EnvConfig::get_string_or(
                "PROVIDER_BASE_URL",
                DEFAULT_PROVIDER_BASE_URL,
            ),
            provider_key: EnvConfig::get_env_optional("FAL_KEY").unwrap_or_default(),
            http_connect_timeout: EnvConfig::get_secs_or("HTTP_CONNECT_TIMEOUT", 15)?,
            http_read_timeout: EnvConfig::get_secs_or("HTTP_READ_TIMEOUT", 60)?,
            ai_http_connect_timeout: EnvConfig::get_secs_or("AI_HTTP_CONNECT_TIMEOUT", 15)?,
            ai_http_read_timeout: EnvConfig::get_secs_or("AI_HTTP_READ_TIMEOUT", 180)?,
            poll_interval: EnvConfig::get_millis_or("POLL_INTERVAL_MS", 2_000)?,
            job_deadline: EnvConfig::get_secs_or("JOB_DEADLINE_SECS", 900)?,
            poll_retries: EnvConfig::get_parsed_or("POLL_RETRIES", defaults.poll_retries)?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn with_api_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = url.into();
        self
    }

    pub fn with_provider(mut self, base_url: impl Into<String>, key: impl Into<String>) -> Self {
        self.provider_base_url = base_url.into();
        self.provider_key = key.into();
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_job_deadline(mut self, deadline: Duration) -> Self {
        self.job_deadline = deadline;
        self
    }

    pub fn with_poll_retries(mut self, retries: u32) -> Self {
        self.poll_retries = retries;
        self
    }

    pub fn validate(&self) -> Result<()> {
        for (name, url) in [
            ("API_BASE_URL", &self.api_base_url),
            ("PROVIDER_BASE_URL", &self.provider_base_url),
        ] {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(GenFlowError::Config(format!(
                    "{name} must start with http:// or https://, got `{url}`"
                )));
            }
        }
        if self.poll_interval.is_zero() || self.poll_interval > MAX_POLL_INTERVAL {
            return Err(GenFlowError::Config(format!(
                "poll interval must be between 1ms and {}s",
                MAX_POLL_INTERVAL.as_secs()
            )));
        }
        if self.job_deadline.is_zero() || self.job_deadline > MAX_JOB_DEADLINE {
            return Err(GenFlowError::Config(format!(
                "job deadline must be between 1s and {}s",
                MAX_JOB_DEADLINE.as_secs()
            )));
        }
        Ok(())
    }

    /// 状态查询、上传握手等小请求使用的客户端
    pub fn metadata_client(&self) -> Result<Client> {
        Self::build_client(self.http_connect_timeout, self.http_read_timeout)
    }

    /// 下载生成产物、上传文件使用的客户端
    pub fn transfer_client(&self) -> Result<Client> {
        Self::build_client(self.ai_http_connect_timeout, self.ai_http_read_timeout)
    }

    fn build_client(connect_timeout: Duration, timeout: Duration) -> Result<Client> {
        Client::builder()
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .connect_timeout(connect_timeout)
            .timeout(timeout)
            .build()
            .map_err(|e| GenFlowError::Config(format!("failed to build HTTP client: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = GenFlowConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.poll_interval, Duration::from_secs(2));
        assert_eq!(config.ai_http_read_timeout, Duration::from_secs(180));
    }

    #[test]
    fn rejects_non_http_base_url() {
        let config = GenFlowConfig::default().with_api_base_url("localhost:5000");
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("API_BASE_URL"));
    }

    #[test]
    fn rejects_zero_poll_interval() {
        let config = GenFlowConfig::default().with_poll_interval(Duration::ZERO);
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_unbounded_deadline_and_interval() {
        let config = GenFlowConfig::default().with_job_deadline(Duration::from_secs(u64::MAX));
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("job deadline"));

        let config = GenFlowConfig::default().with_poll_interval(Duration::from_secs(u64::MAX));
        assert!(config.validate().is_err());

        let config = GenFlowConfig::default().with_job_deadline(MAX_JOB_DEADLINE);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn from_env_rejects_overflowing_deadline() {
        std::env::set_var("JOB_DEADLINE_SECS", u64::MAX.to_string());
        let result = GenFlowConfig::from_env();
        std::env::remove_var("JOB_DEADLINE_SECS");
        assert!(matches!(result, Err(GenFlowError::Config(_))));
    }

    #[test]
    fn debug_redacts_provider_key() {
        let config = GenFlowConfig::default().with_provider("https://queue.example", "secret-key");
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("secret-key"));
    }

    #[test]
    fn builds_http_clients() {
        let config = GenFlowConfig::default();
        assert!(config.metadata_client().is_ok());
        assert!(config.transfer_client().is_ok());
    }
}
