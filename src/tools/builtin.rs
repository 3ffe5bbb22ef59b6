//! 内置生成能力
//!
//! 每个能力只负责：解析并校验参数、组装生成服务参数、决定输出文件名。

use std::sync::Arc;

use serde::Deserialize;
use serde_json::{json, Map, Value};

use super::{parse_args, stem_from_url, Capability, CapabilityRegistry, PreparedJob};
use crate::error::{GenFlowError, Result};
use crate::extract::{ResultExtractor, ResultReference, ShapeMatcher};
use crate::utils::InputValidator;

pub fn register_builtin_capabilities(registry: &mut CapabilityRegistry) {
    registry.register(Arc::new(UpscaleImage));
    registry.register(Arc::new(VideoBackgroundRemoval));
    registry.register(Arc::new(BackgroundReplace));
    registry.register(Arc::new(GenFill));
    registry.register(Arc::new(TextTo3d));
    registry.register(Arc::new(FashionPhotoshoot));
    registry.register(Arc::new(ProductPhotoshoot));
    registry.register(Arc::new(CloneAudio));
    registry.register(Arc::new(GenerateTexture));
}

fn default_true() -> bool {
    true
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn insert_optional(arguments: &mut Map<String, Value>, key: &str, value: Option<String>) {
    if let Some(value) = non_empty(value) {
        arguments.insert(key.to_string(), Value::String(value));
    }
}

/// 图片超分（ESRGAN）
pub struct UpscaleImage;

#[derive(Debug, Deserialize)]
struct UpscaleArgs {
    file_url: String,
}

impl Capability for UpscaleImage {
    fn name(&self) -> &'static str {
        "upscale_image"
    }

    fn description(&self) -> &'static str {
        "Upscale and enhance an image"
    }

    fn job_type(&self) -> &'static str {
        "fal-ai/esrgan"
    }

    fn summary(&self) -> &'static str {
        "The image has been successfully upscaled and enhanced."
    }

    fn prepare(&self, args: Value) -> Result<PreparedJob> {
        let args: UpscaleArgs = parse_args(args)?;
        InputValidator::validate_http_url("file_url", &args.file_url)?;
        Ok(PreparedJob::new(
            json!({ "image_url": args.file_url }),
            "upscaled_image",
        ))
    }
}

/// 视频去背景
pub struct VideoBackgroundRemoval;

#[derive(Debug, Deserialize)]
struct VideoBackgroundArgs {
    video_url: String,
    #[serde(default)]
    background_color: Option<String>,
    #[serde(default)]
    output_container_and_codec: Option<String>,
}

impl Capability for VideoBackgroundRemoval {
    fn name(&self) -> &'static str {
        "video_background_removal"
    }

    fn description(&self) -> &'static str {
        "Remove the background from a video"
    }

    fn job_type(&self) -> &'static str {
        "bria/video/background-removal"
    }

    fn summary(&self) -> &'static str {
        "Background removed from video successfully."
    }

    fn prepare(&self, args: Value) -> Result<PreparedJob> {
        let args: VideoBackgroundArgs = parse_args(args)?;
        InputValidator::validate_http_url("video_url", &args.video_url)?;

        let mut arguments = Map::new();
        arguments.insert("video_url".into(), Value::String(args.video_url));
        insert_optional(&mut arguments, "background_color", args.background_color);
        insert_optional(
            &mut arguments,
            "output_container_and_codec",
            args.output_container_and_codec,
        );

        Ok(PreparedJob::new(Value::Object(arguments), "bria_video_bg_removed")
            .with_source_field("source_video_url"))
    }

    fn extractor(&self) -> ResultExtractor {
        ResultExtractor::new(vec![
            ShapeMatcher::Object("video"),
            ShapeMatcher::Url("url"),
        ])
    }
}

/// 图片背景替换：参考图或文字描述二选一
pub struct BackgroundReplace;

#[derive(Debug, Deserialize)]
struct BackgroundReplaceArgs {
    image_url: String,
    #[serde(default)]
    ref_image_url: Option<String>,
    #[serde(default)]
    prompt: Option<String>,
    #[serde(default)]
    negative_prompt: Option<String>,
    #[serde(default = "default_true")]
    refine_prompt: bool,
    #[serde(default = "default_true")]
    fast: bool,
    #[serde(default)]
    seed: Option<i64>,
}

impl Capability for BackgroundReplace {
    fn name(&self) -> &'static str {
        "background_replace"
    }

    fn description(&self) -> &'static str {
        "Replace the background of an image from a reference image or a prompt"
    }

    fn job_type(&self) -> &'static str {
        "fal-ai/bria/background/replace"
    }

    fn summary(&self) -> &'static str {
        "Background replaced successfully."
    }

    fn prepare(&self, args: Value) -> Result<PreparedJob> {
        let args: BackgroundReplaceArgs = parse_args(args)?;
        InputValidator::validate_http_url("image_url", &args.image_url)?;
        let ref_image_url = non_empty(args.ref_image_url);
        let prompt = non_empty(args.prompt);
        InputValidator::validate_optional_http_url("ref_image_url", ref_image_url.as_deref())?;
        if ref_image_url.is_some() && prompt.is_some() {
            return Err(GenFlowError::validation(
                "provide either ref_image_url or prompt, not both",
            ));
        }

        let mut arguments = Map::new();
        arguments.insert("image_url".into(), Value::String(args.image_url));
        insert_optional(&mut arguments, "ref_image_url", ref_image_url);
        insert_optional(&mut arguments, "prompt", prompt);
        insert_optional(&mut arguments, "negative_prompt", args.negative_prompt);
        arguments.insert("refine_prompt".into(), Value::Bool(args.refine_prompt));
        arguments.insert("fast".into(), Value::Bool(args.fast));
        if let Some(seed) = args.seed {
            arguments.insert("seed".into(), json!(seed));
        }

        Ok(PreparedJob::new(Value::Object(arguments), "bria_background_replace")
            .with_source_field("source_image_url"))
    }

    fn extractor(&self) -> ResultExtractor {
        images_first_extractor()
    }
}

/// 局部重绘（图片 + 遮罩 + 提示词）
pub struct GenFill;

#[derive(Debug, Deserialize)]
struct GenFillArgs {
    image_url: String,
    mask_url: String,
    prompt: String,
    #[serde(default = "default_num_images")]
    num_images: u32,
    #[serde(default)]
    negative_prompt: String,
    #[serde(default = "default_true")]
    refine_prompt: bool,
    #[serde(default = "default_true")]
    fast: bool,
    #[serde(default)]
    seed: Option<i64>,
}

fn default_num_images() -> u32 {
    1
}

impl Capability for GenFill {
    fn name(&self) -> &'static str {
        "genfill"
    }

    fn description(&self) -> &'static str {
        "Fill a masked region of an image from a prompt"
    }

    fn job_type(&self) -> &'static str {
        "fal-ai/bria/genfill"
    }

    fn summary(&self) -> &'static str {
        "GenFill completed successfully."
    }

    fn prepare(&self, args: Value) -> Result<PreparedJob> {
        let args: GenFillArgs = parse_args(args)?;
        InputValidator::validate_http_url("image_url", &args.image_url)?;
        InputValidator::validate_http_url("mask_url", &args.mask_url)?;
        InputValidator::validate_non_empty("prompt", &args.prompt)?;
        if args.num_images == 0 {
            return Err(GenFlowError::validation("num_images must be at least 1"));
        }

        let mut arguments = json!({
            "image_url": args.image_url,
            "mask_url": args.mask_url,
            "prompt": args.prompt,
            "num_images": args.num_images,
            "negative_prompt": args.negative_prompt,
            "refine_prompt": args.refine_prompt,
            "fast": args.fast,
        });
        if let (Some(seed), Some(object)) = (args.seed, arguments.as_object_mut()) {
            object.insert("seed".into(), json!(seed));
        }

        Ok(PreparedJob::new(arguments, "bria_genfill").with_source_field("source_image_url"))
    }

    fn extractor(&self) -> ResultExtractor {
        images_first_extractor()
    }
}

/// bria 编辑类接口以 `images` 列表返回，个别版本退化为单个 `image`
fn images_first_extractor() -> ResultExtractor {
    ResultExtractor::new(vec![
        ShapeMatcher::FirstOf("images"),
        ShapeMatcher::Object("image"),
    ])
}

/// 文本生成 3D 模型
pub struct TextTo3d;

#[derive(Debug, Deserialize)]
struct TextTo3dArgs {
    prompt: String,
}

impl Capability for TextTo3d {
    fn name(&self) -> &'static str {
        "text_to_3d"
    }

    fn description(&self) -> &'static str {
        "Generate a 3D model from a text prompt"
    }

    fn job_type(&self) -> &'static str {
        "fal-ai/meshy/v6-preview/text-to-3d"
    }

    fn summary(&self) -> &'static str {
        "3D model generated from text and uploaded successfully."
    }

    fn prepare(&self, args: Value) -> Result<PreparedJob> {
        let args: TextTo3dArgs = parse_args(args)?;
        InputValidator::validate_min_len("prompt", &args.prompt, 3)?;
        Ok(PreparedJob::new(
            json!({ "prompt": args.prompt.trim() }),
            "meshy_text_to_3d",
        )
        .with_source_field("source_asset_url"))
    }

    fn extractor(&self) -> ResultExtractor {
        ResultExtractor::new(vec![
            ShapeMatcher::Object("model"),
            ShapeMatcher::Object("asset"),
            ShapeMatcher::Object("model_glb"),
            ShapeMatcher::Url("url"),
        ])
    }
}

/// 服装模特图
pub struct FashionPhotoshoot;

#[derive(Debug, Deserialize)]
struct FashionArgs {
    garment_image_url: String,
    face_image_url: String,
    gender: String,
}

impl Capability for FashionPhotoshoot {
    fn name(&self) -> &'static str {
        "fashion_photoshoot"
    }

    fn description(&self) -> &'static str {
        "Dress a model with a garment image for a fashion photoshoot"
    }

    fn job_type(&self) -> &'static str {
        "easel-ai/fashion-photoshoot"
    }

    fn summary(&self) -> &'static str {
        "The fashion photoshoot image has been successfully generated."
    }

    fn prepare(&self, args: Value) -> Result<PreparedJob> {
        let args: FashionArgs = parse_args(args)?;
        InputValidator::validate_http_url("garment_image_url", &args.garment_image_url)?;
        InputValidator::validate_http_url("face_image_url", &args.face_image_url)?;
        InputValidator::validate_choice("gender", &args.gender, &["male", "female"])?;
        Ok(PreparedJob::new(
            json!({
                "garment_image": args.garment_image_url,
                "face_image": args.face_image_url,
                "gender": args.gender,
            }),
            "fashion_photoshoot",
        ))
    }
}

/// 商品场景图；输出文件名沿用商品图的文件名
pub struct ProductPhotoshoot;

#[derive(Debug, Deserialize)]
struct ProductArgs {
    product_image_url: String,
    scene_description: String,
    product_placement_description: String,
}

impl Capability for ProductPhotoshoot {
    fn name(&self) -> &'static str {
        "product_photoshoot"
    }

    fn description(&self) -> &'static str {
        "Place a product image into a generated marketing scene"
    }

    fn job_type(&self) -> &'static str {
        "easel-ai/product-photoshoot"
    }

    fn summary(&self) -> &'static str {
        "Here is Generated Product Banner."
    }

    fn prepare(&self, args: Value) -> Result<PreparedJob> {
        let args: ProductArgs = parse_args(args)?;
        InputValidator::validate_http_url("product_image_url", &args.product_image_url)?;
        InputValidator::validate_non_empty("scene_description", &args.scene_description)?;
        InputValidator::validate_non_empty(
            "product_placement_description",
            &args.product_placement_description,
        )?;

        let stem = stem_from_url(&args.product_image_url, "product_banner");
        Ok(PreparedJob::new(
            json!({
                "product_image": args.product_image_url,
                "scene": args.scene_description,
                "product_placement": args.product_placement_description,
            }),
            stem,
        ))
    }
}

/// 声音克隆；输出文件名沿用参考音频的文件名
pub struct CloneAudio;

#[derive(Debug, Deserialize)]
struct CloneAudioArgs {
    audio_url: String,
    prompt: String,
}

impl Capability for CloneAudio {
    fn name(&self) -> &'static str {
        "clone_audio"
    }

    fn description(&self) -> &'static str {
        "Speak a prompt in the voice of a reference audio clip"
    }

    fn job_type(&self) -> &'static str {
        "fal-ai/zonos"
    }

    fn summary(&self) -> &'static str {
        "Here is Generated Audio."
    }

    fn prepare(&self, args: Value) -> Result<PreparedJob> {
        let args: CloneAudioArgs = parse_args(args)?;
        InputValidator::validate_http_url("audio_url", &args.audio_url)?;
        InputValidator::validate_non_empty("prompt", &args.prompt)?;

        let stem = stem_from_url(&args.audio_url, "cloned_audio");
        Ok(PreparedJob::new(
            json!({
                "reference_audio_url": args.audio_url,
                "prompt": args.prompt,
            }),
            stem,
        ))
    }

    fn extractor(&self) -> ResultExtractor {
        ResultExtractor::new(vec![
            ShapeMatcher::Object("audio"),
            ShapeMatcher::Url("url"),
        ])
    }
}

/// 无缝贴图；结果以 base64 内联返回
pub struct GenerateTexture;

#[derive(Debug, Deserialize)]
struct TextureArgs {
    prompt: String,
    #[serde(default = "default_style")]
    style: String,
    #[serde(default = "default_resolution")]
    resolution: String,
    #[serde(default)]
    seed: Option<i64>,
}

fn default_style() -> String {
    "seamless".to_string()
}

fn default_resolution() -> String {
    "1024x1024".to_string()
}

/// `{"images": [{"content": "<base64>", "content_type": "image/png"}]}`
fn inline_image_content(payload: &Value) -> Option<ResultReference> {
    let image = payload.get("images")?.as_array()?.first()?;
    let content = image.get("content")?.as_str()?;
    let content_type = image
        .get("content_type")
        .and_then(Value::as_str)
        .unwrap_or("image/png");
    Some(ResultReference::new(
        format!("data:{content_type};base64,{content}"),
        Some(content_type.to_string()),
    ))
}

impl Capability for GenerateTexture {
    fn name(&self) -> &'static str {
        "generate_texture"
    }

    fn description(&self) -> &'static str {
        "Generate a tileable PBR texture from a text prompt"
    }

    fn job_type(&self) -> &'static str {
        "fal-ai/fast-sdxl"
    }

    fn summary(&self) -> &'static str {
        "Seamless texture generated successfully."
    }

    fn prepare(&self, args: Value) -> Result<PreparedJob> {
        let args: TextureArgs = parse_args(args)?;
        InputValidator::validate_non_empty("prompt", &args.prompt)?;
        if args.style != "seamless" {
            return Err(GenFlowError::validation(
                "only the seamless style is currently supported",
            ));
        }
        let (width, height) = InputValidator::parse_resolution(&args.resolution)?;

        let mut arguments = json!({
            "prompt": format!("a seamless texture of {}, tileable, PBR material", args.prompt.trim()),
            "width": width,
            "height": height,
        });
        let stem = match args.seed {
            Some(seed) => {
                if let Some(object) = arguments.as_object_mut() {
                    object.insert("seed".into(), json!(seed));
                }
                format!("texture_{seed}")
            }
            None => "texture".to_string(),
        };

        Ok(PreparedJob::new(arguments, stem).with_summary(format!(
            "Generated {width}x{height} seamless texture for: {}",
            args.prompt.trim()
        )))
    }

    fn extractor(&self) -> ResultExtractor {
        ResultExtractor::new(vec![
            ShapeMatcher::Custom {
                name: "images[0].content",
                matcher: inline_image_content,
            },
            ShapeMatcher::FirstOf("images"),
        ])
    }
}
