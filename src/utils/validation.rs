use crate::error::{GenFlowError, Result};

/// 调用方输入校验，全部在发起任何网络请求之前执行
pub struct InputValidator;

impl InputValidator {
    /// 验证 URL 格式（仅接受 http/https）
    pub fn validate_http_url(field: &str, url: &str) -> Result<()> {
        if url.is_empty() || !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(GenFlowError::validation(format!(
                "{field} must be a valid HTTP(S) URL"
            )));
        }
        reqwest::Url::parse(url).map_err(|e| {
            GenFlowError::validation(format!("{field} must be a valid HTTP(S) URL: {e}"))
        })?;
        Ok(())
    }

    /// 可选 URL：空字符串视为未提供
    pub fn validate_optional_http_url(field: &str, url: Option<&str>) -> Result<()> {
        match url {
            Some(url) if !url.is_empty() => Self::validate_http_url(field, url),
            _ => Ok(()),
        }
    }

    pub fn validate_non_empty(field: &str, value: &str) -> Result<()> {
        if value.trim().is_empty() {
            return Err(GenFlowError::validation(format!("{field} is required")));
        }
        Ok(())
    }

    pub fn validate_min_len(field: &str, value: &str, min: usize) -> Result<()> {
        if value.trim().chars().count() < min {
            return Err(GenFlowError::validation(format!(
                "{field} must be at least {min} characters"
            )));
        }
        Ok(())
    }

    pub fn validate_choice(field: &str, value: &str, choices: &[&str]) -> Result<()> {
        if !choices.contains(&value) {
            let quoted: Vec<String> = choices.iter().map(|c| format!("'{c}'")).collect();
            return Err(GenFlowError::validation(format!(
                "{field} must be one of {}",
                quoted.join(", ")
            )));
        }
        Ok(())
    }

    /// 解析 `1024x768` 形式的分辨率
    pub fn parse_resolution(value: &str) -> Result<(u32, u32)> {
        let invalid = || {
            GenFlowError::validation(format!(
                "invalid resolution `{value}`, expected format like 512x512"
            ))
        };
        let (width, height) = value.split_once('x').ok_or_else(invalid)?;
        let width: u32 = width.trim().parse().map_err(|_| invalid())?;
        let height: u32 = height.trim().parse().map_err(|_| invalid())?;
        if width == 0 || height == 0 {
            return Err(invalid());
        }
        Ok((width, height))
    }
}
