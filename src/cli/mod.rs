use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde::Serialize;
use serde_json::Value;

use crate::error::{GenFlowError, Result};
use crate::provider::JobProgress;
use crate::tools::CapabilityRegistry;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CapabilitySummary {
    pub name: String,
    pub job_type: String,
    pub description: String,
}

pub fn capability_summaries(registry: &CapabilityRegistry) -> Vec<CapabilitySummary> {
    registry
        .iter()
        .map(|capability| CapabilitySummary {
            name: capability.name().to_string(),
            job_type: capability.job_type().to_string(),
            description: capability.description().to_string(),
        })
        .collect()
}

/// 构造带 bearer 凭证的请求头；已带 `Bearer ` 前缀的 token 原样使用
pub fn headers_with_token(token: &str) -> Result<HeaderMap> {
    let value = if token.starts_with("Bearer ") {
        token.to_string()
    } else {
        format!("Bearer {token}")
    };
    let value = HeaderValue::from_str(&value)
        .map_err(|_| GenFlowError::validation("token contains characters not allowed in a header"))?;
    let mut headers = HeaderMap::new();
    headers.insert(AUTHORIZATION, value);
    Ok(headers)
}

/// `--args` 必须是 JSON 对象
pub fn parse_args_json(raw: &str) -> Result<Value> {
    let value: Value = serde_json::from_str(raw)
        .map_err(|e| GenFlowError::validation(format!("--args is not valid JSON: {e}")))?;
    if !value.is_object() {
        return Err(GenFlowError::validation("--args must be a JSON object"));
    }
    Ok(value)
}

/// `--verbose` 时打印的轮询记录
pub fn render_progress(events: &[JobProgress]) -> Vec<String> {
    events
        .iter()
        .map(|event| {
            let mut line = format!(
                "#{:<3} {:<12} {}",
                event.attempt, event.status, event.request_id
            );
            if let Some(last) = event.logs.last() {
                line.push_str(&format!("  {last}"));
            }
            line
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::JobStatus;
    use serde_json::json;

    #[test]
    fn summaries_cover_registry() {
        let summaries = capability_summaries(&CapabilityRegistry::with_builtins());
        assert_eq!(summaries.len(), 9);
        let upscale = summaries
            .iter()
            .find(|summary| summary.name == "upscale_image")
            .unwrap();
        assert_eq!(upscale.job_type, "fal-ai/esrgan");
    }

    #[test]
    fn headers_add_bearer_prefix_once() {
        let headers = headers_with_token("abc").unwrap();
        assert_eq!(headers[AUTHORIZATION], "Bearer abc");
        let headers = headers_with_token("Bearer abc").unwrap();
        assert_eq!(headers[AUTHORIZATION], "Bearer abc");
        assert!(headers_with_token("bad\ntoken").is_err());
    }

    #[test]
    fn args_must_be_an_object() {
        assert_eq!(
            parse_args_json(r#"{"prompt":"wood"}"#).unwrap(),
            json!({"prompt": "wood"})
        );
        assert!(parse_args_json("[1,2]").is_err());
        assert!(parse_args_json("{oops").is_err());
    }

    #[test]
    fn progress_lines_include_last_log() {
        let lines = render_progress(&[JobProgress {
            request_id: "req-1".into(),
            job_type: "fal-ai/zonos".into(),
            attempt: 2,
            status: JobStatus::InProgress,
            logs: vec!["a".into(), "b".into()],
        }]);
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains("in_progress"));
        assert!(lines[0].ends_with("  b"));
    }
}
