pub mod builtin;
pub mod envelope;
pub mod orchestrator;

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

pub use envelope::{Attachment, Envelope};
pub use orchestrator::{Stage, ToolOrchestrator};

use crate::error::{GenFlowError, Result};
use crate::extract::ResultExtractor;

/// 一个可调用的生成能力（对应一个工具端点）
///
/// `prepare` 只做本地校验和参数转换，不能发起网络请求；
/// 其余步骤（提交、轮询、下载、上传）由 [`ToolOrchestrator`] 统一完成。
pub trait Capability: Send + Sync {
    fn name(&self) -> &'static str;

    fn description(&self) -> &'static str;

    /// 生成服务上的模型路径，例如 `fal-ai/esrgan`
    fn job_type(&self) -> &'static str;

    /// 成功信封里的默认 summary
    fn summary(&self) -> &'static str;

    fn prepare(&self, args: Value) -> Result<PreparedJob>;

    fn extractor(&self) -> ResultExtractor {
        ResultExtractor::default()
    }
}

/// 通过校验、可以直接提交的任务
#[derive(Clone, Debug, PartialEq)]
pub struct PreparedJob {
    pub arguments: Value,
    /// 上传文件名（不含扩展名）
    pub output_stem: String,
    pub extra: Map<String, Value>,
    /// 若设置，成功信封中该字段写入产物的源 URL
    pub source_field: Option<&'static str>,
    pub summary: Option<String>,
}

impl PreparedJob {
    pub fn new(arguments: Value, output_stem: impl Into<String>) -> Self {
        Self {
            arguments,
            output_stem: output_stem.into(),
            extra: Map::new(),
            source_field: None,
            summary: None,
        }
    }

    pub fn with_source_field(mut self, field: &'static str) -> Self {
        self.source_field = Some(field);
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = Some(summary.into());
        self
    }
}

pub type DynCapability = Arc<dyn Capability>;

#[derive(Clone, Default)]
pub struct CapabilityRegistry {
    capabilities: BTreeMap<&'static str, DynCapability>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册全部内置能力
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        builtin::register_builtin_capabilities(&mut registry);
        registry
    }

    /// 同名能力会被覆盖
    pub fn register(&mut self, capability: DynCapability) {
        self.capabilities.insert(capability.name(), capability);
    }

    pub fn get(&self, name: &str) -> Option<DynCapability> {
        self.capabilities.get(name).map(Arc::clone)
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.capabilities.keys().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DynCapability> {
        self.capabilities.values()
    }

    pub fn len(&self) -> usize {
        self.capabilities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.capabilities.is_empty()
    }
}

/// 把调用参数解析成能力自己的参数结构；`null` 视为空对象
pub fn parse_args<T: DeserializeOwned>(args: Value) -> Result<T> {
    let normalized = match args {
        Value::Null => Value::Object(Map::new()),
        other => other,
    };
    serde_json::from_value(normalized).map_err(|e| GenFlowError::validation(e.to_string()))
}

/// 取 URL 最后一段路径去掉扩展名后的部分，作为输出文件名
pub fn stem_from_url(url: &str, default: &str) -> String {
    let stem = reqwest::Url::parse(url)
        .ok()
        .and_then(|parsed| {
            parsed
                .path_segments()
                .and_then(|mut segments| segments.next_back().map(str::to_string))
        })
        .map(|segment| match segment.rfind('.') {
            Some(idx) if idx > 0 => segment[..idx].to_string(),
            _ => segment,
        })
        .unwrap_or_default();

    if stem.is_empty() {
        default.to_string()
    } else {
        stem
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Deserialize)]
    struct Args {
        prompt: String,
        #[serde(default)]
        seed: Option<i64>,
    }

    #[test]
    fn parse_args_maps_errors_to_validation() {
        let args: Args = parse_args(json!({"prompt": "wood"})).unwrap();
        assert_eq!(args.prompt, "wood");
        assert_eq!(args.seed, None);

        let err = parse_args::<Args>(json!({"seed": 1})).unwrap_err();
        assert!(matches!(err, GenFlowError::Validation(_)));
        assert!(err.to_string().contains("prompt"));

        let err = parse_args::<Args>(Value::Null).unwrap_err();
        assert!(matches!(err, GenFlowError::Validation(_)));
    }

    #[test]
    fn stem_from_url_strips_extension_and_query() {
        assert_eq!(stem_from_url("https://cdn/x/shoe.png?sig=1", "product"), "shoe");
        assert_eq!(stem_from_url("https://cdn/x/voice.sample.wav", "audio"), "voice.sample");
        assert_eq!(stem_from_url("https://cdn/x/", "audio"), "audio");
        assert_eq!(stem_from_url("not a url", "audio"), "audio");
        assert_eq!(stem_from_url("https://cdn/.hidden", "audio"), ".hidden");
    }

    #[test]
    fn builtin_registry_lists_every_capability() {
        let registry = CapabilityRegistry::with_builtins();
        assert_eq!(
            registry.names(),
            vec![
                "background_replace",
                "clone_audio",
                "fashion_photoshoot",
                "generate_texture",
                "genfill",
                "product_photoshoot",
                "text_to_3d",
                "upscale_image",
                "video_background_removal",
            ]
        );
        assert!(registry.get("upscale_image").is_some());
        assert!(registry.get("missing").is_none());
    }

    #[test]
    fn prepared_job_builders() {
        let job = PreparedJob::new(json!({"a": 1}), "out")
            .with_source_field("source_image_url")
            .with_extra("seed", json!(4))
            .with_summary("custom");
        assert_eq!(job.source_field, Some("source_image_url"));
        assert_eq!(job.extra["seed"], json!(4));
        assert_eq!(job.summary.as_deref(), Some("custom"));
    }
}
