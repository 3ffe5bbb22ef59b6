use crate::error::{GenFlowError, Result};
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// 环境变量配置管理
pub struct EnvConfig;

impl EnvConfig {
    /// 获取可选的环境变量（空字符串视为未设置）
    pub fn get_env_optional(key: &str) -> Option<String> {
        env::var(key).ok().filter(|value| !value.trim().is_empty())
    }

    pub fn get_string_or(key: &str, default: &str) -> String {
        Self::get_env_optional(key).unwrap_or_else(|| default.to_string())
    }

    /// 解析环境变量，未设置时使用默认值；设置了但无法解析时报错
    pub fn get_parsed_or<T>(key: &str, default: T) -> Result<T>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match Self::get_env_optional(key) {
            Some(raw) => raw.trim().parse::<T>().map_err(|e| {
                GenFlowError::Config(format!("environment variable '{key}'='{raw}' is invalid: {e}"))
            }),
            None => Ok(default),
        }
    }

    pub fn get_secs_or(key: &str, default_secs: u64) -> Result<Duration> {
        Self::get_parsed_or(key, default_secs).map(Duration::from_secs)
    }

    pub fn get_millis_or(key: &str, default_millis: u64) -> Result<Duration> {
        Self::get_parsed_or(key, default_millis).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_parsed_or() {
        env::set_var("GENFLOW_TEST_TIMEOUT", "42");
        assert_eq!(
            EnvConfig::get_secs_or("GENFLOW_TEST_TIMEOUT", 5).unwrap(),
            Duration::from_secs(42)
        );
        env::set_var("GENFLOW_TEST_TIMEOUT", "forty");
        let err = EnvConfig::get_secs_or("GENFLOW_TEST_TIMEOUT", 5).unwrap_err();
        assert!(err.to_string().contains("GENFLOW_TEST_TIMEOUT"));
        env::remove_var("GENFLOW_TEST_TIMEOUT");
        assert_eq!(
            EnvConfig::get_secs_or("GENFLOW_TEST_TIMEOUT", 5).unwrap(),
            Duration::from_secs(5)
        );
    }

    #[test]
    fn test_empty_value_is_unset() {
        env::set_var("GENFLOW_TEST_EMPTY", "   ");
        assert!(EnvConfig::get_env_optional("GENFLOW_TEST_EMPTY").is_none());
        assert_eq!(EnvConfig::get_string_or("GENFLOW_TEST_EMPTY", "dflt"), "dflt");
        env::remove_var("GENFLOW_TEST_EMPTY");
    }
}
