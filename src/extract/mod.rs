//! 从生成服务的结果 JSON 中定位输出产物 URL
//!
//! 不同模型的返回结构各不相同，这里用一组有序的结构匹配器依次尝试，
//! 第一个找到合法 URL 的匹配器胜出，其余不再尝试。

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::ExtractionError;

/// 指向生成产物的引用
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultReference {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
}

impl ResultReference {
    pub fn new(url: impl Into<String>, content_type: Option<String>) -> Self {
        Self {
            url: url.into(),
            content_type,
        }
    }
}

pub type MatchFn = fn(&Value) -> Option<ResultReference>;

#[derive(Clone, Copy, Debug)]
pub enum ShapeMatcher {
    /// `{"<field>": {"url": "...", "content_type": "..."}}`
    Object(&'static str),
    /// `{"<field>": [{"url": "..."}, ...]}`，取第一个元素
    FirstOf(&'static str),
    /// `{"<field>": "<url>"}`
    Url(&'static str),
    Custom { name: &'static str, matcher: MatchFn },
}

impl ShapeMatcher {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Object(field) | Self::FirstOf(field) | Self::Url(field) => field,
            Self::Custom { name, .. } => name,
        }
    }

    /// 只返回 URL 语法合法的结果
    pub fn find(&self, payload: &Value) -> Option<ResultReference> {
        let candidate = match self {
            Self::Object(field) => file_object(payload.get(*field)?),
            Self::FirstOf(field) => file_object(payload.get(*field)?.as_array()?.first()?),
            Self::Url(field) => payload
                .get(*field)?
                .as_str()
                .map(|url| ResultReference::new(url, None)),
            Self::Custom { matcher, .. } => matcher(payload),
        }?;
        is_acceptable_url(&candidate.url).then_some(candidate)
    }
}

fn file_object(value: &Value) -> Option<ResultReference> {
    let object = value.as_object()?;
    let url = object.get("url")?.as_str()?;
    let content_type = object
        .get("content_type")
        .and_then(Value::as_str)
        .filter(|ct| !ct.is_empty())
        .map(str::to_string);
    Some(ResultReference::new(url, content_type))
}

/// 接受 http/https 以及内联的 data URL
pub fn is_acceptable_url(candidate: &str) -> bool {
    match reqwest::Url::parse(candidate) {
        Ok(url) => match url.scheme() {
            "http" | "https" => url.has_host(),
            "data" => true,
            _ => false,
        },
        Err(_) => false,
    }
}

pub const DEFAULT_MATCHERS: &[ShapeMatcher] = &[
    ShapeMatcher::Object("image"),
    ShapeMatcher::FirstOf("images"),
    ShapeMatcher::Object("video"),
    ShapeMatcher::Object("audio"),
    ShapeMatcher::Object("model"),
    ShapeMatcher::Object("asset"),
    ShapeMatcher::Object("model_glb"),
    ShapeMatcher::Url("image_url"),
    ShapeMatcher::Url("url"),
];

#[derive(Clone, Debug)]
pub struct ResultExtractor {
    matchers: Vec<ShapeMatcher>,
}

impl Default for ResultExtractor {
    fn default() -> Self {
        Self::new(DEFAULT_MATCHERS.to_vec())
    }
}

impl ResultExtractor {
    pub fn new(matchers: Vec<ShapeMatcher>) -> Self {
        Self { matchers }
    }

    pub fn with_matcher(mut self, matcher: ShapeMatcher) -> Self {
        self.matchers.push(matcher);
        self
    }

    pub fn matchers(&self) -> &[ShapeMatcher] {
        &self.matchers
    }

    pub fn extract(&self, payload: &Value) -> Result<ResultReference, ExtractionError> {
        for matcher in &self.matchers {
            if let Some(reference) = matcher.find(payload) {
                debug!(matcher = matcher.name(), url = %reference.url, "result shape matched");
                return Ok(reference);
            }
        }
        warn!(%payload, "no matcher recognised the provider result");
        Err(ExtractionError::UnexpectedShape {
            payload: payload.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn single_image_object() {
        let reference = ResultExtractor::default()
            .extract(&json!({"image": {"url": "http://x/a.png"}}))
            .unwrap();
        assert_eq!(reference, ResultReference::new("http://x/a.png", None));
    }

    #[test]
    fn first_entry_of_image_list() {
        let reference = ResultExtractor::default()
            .extract(&json!({
                "images": [
                    {"url": "http://x/b.webp", "content_type": "image/webp"},
                    {"url": "http://x/c.webp"}
                ]
            }))
            .unwrap();
        assert_eq!(
            reference,
            ResultReference::new("http://x/b.webp", Some("image/webp".into()))
        );
    }

    #[test]
    fn unrecognised_shape_carries_payload() {
        let payload = json!({"foo": 1});
        let err = ResultExtractor::default().extract(&payload).unwrap_err();
        assert_eq!(err, ExtractionError::UnexpectedShape { payload });
    }

    #[test]
    fn first_structural_match_wins() {
        let reference = ResultExtractor::default()
            .extract(&json!({
                "url": "http://x/top-level.bin",
                "video": {"url": "http://x/clip.mp4", "content_type": "video/mp4"}
            }))
            .unwrap();
        assert_eq!(reference.url, "http://x/clip.mp4");
    }

    #[test]
    fn invalid_url_falls_through_to_next_matcher() {
        let reference = ResultExtractor::default()
            .extract(&json!({
                "image": {"url": "not a url"},
                "url": "https://cdn.example/out.png"
            }))
            .unwrap();
        assert_eq!(reference.url, "https://cdn.example/out.png");
    }

    #[test]
    fn empty_list_and_wrong_types_do_not_match() {
        let payload = json!({"images": [], "video": "http://x/v.mp4", "url": 3});
        assert!(ResultExtractor::default().extract(&payload).is_err());
    }

    #[test]
    fn custom_matcher_order_is_respected() {
        fn nested(payload: &Value) -> Option<ResultReference> {
            payload
                .pointer("/output/file")
                .and_then(Value::as_str)
                .map(|url| ResultReference::new(url, Some("model/gltf-binary".into())))
        }

        let extractor = ResultExtractor::new(vec![ShapeMatcher::Custom {
            name: "output.file",
            matcher: nested,
        }])
        .with_matcher(ShapeMatcher::Url("url"));

        let reference = extractor
            .extract(&json!({"output": {"file": "https://x/m.glb"}, "url": "https://x/other"}))
            .unwrap();
        assert_eq!(reference.url, "https://x/m.glb");
        assert_eq!(extractor.matchers().len(), 2);
    }

    #[test]
    fn accepts_data_urls() {
        assert!(is_acceptable_url("data:image/png;base64,AAAA"));
        assert!(is_acceptable_url("https://cdn.example/a.png"));
        assert!(!is_acceptable_url("ftp://cdn.example/a.png"));
        assert!(!is_acceptable_url("/relative/path.png"));
    }
}
