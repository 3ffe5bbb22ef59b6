//! 内容类型与文件扩展名的双向映射表
//!
//! 下载端（content-type → 扩展名）和上传端（扩展名 → content-type）共用这一张表。

use std::collections::HashMap;

use once_cell::sync::Lazy;

/// 无法识别内容类型时使用的扩展名
pub const FALLBACK_EXTENSION: &str = ".bin";
/// 无法识别扩展名时使用的内容类型
pub const FALLBACK_CONTENT_TYPE: &str = "application/octet-stream";

#[derive(Debug)]
pub struct MediaType {
    pub mime: &'static str,
    pub extension: &'static str,
    mime_aliases: &'static [&'static str],
    extension_aliases: &'static [&'static str],
}

const fn media(
    mime: &'static str,
    extension: &'static str,
    mime_aliases: &'static [&'static str],
    extension_aliases: &'static [&'static str],
) -> MediaType {
    MediaType {
        mime,
        extension,
        mime_aliases,
        extension_aliases,
    }
}

static MEDIA_TYPES: &[MediaType] = &[
    // 图片
    media("image/jpeg", ".jpg", &["image/jpg", "image/pjpeg"], &[".jpeg", ".jpe"]),
    media("image/png", ".png", &[], &[]),
    media("image/webp", ".webp", &[], &[]),
    media("image/bmp", ".bmp", &["image/x-ms-bmp"], &[]),
    media("image/tiff", ".tiff", &[], &[".tif"]),
    media("image/gif", ".gif", &[], &[]),
    media("image/svg+xml", ".svg", &[], &[]),
    // 音频
    media("audio/mpeg", ".mp3", &["audio/mp3"], &[]),
    media("audio/wav", ".wav", &["audio/x-wav", "audio/wave", "audio/vnd.wave"], &[]),
    media("audio/ogg", ".ogg", &[], &[".oga"]),
    media("audio/aac", ".aac", &[], &[]),
    media("audio/flac", ".flac", &["audio/x-flac"], &[]),
    // 视频
    media("video/mp4", ".mp4", &[], &[".m4v"]),
    media("video/webm", ".webm", &[], &[]),
    media("video/quicktime", ".mov", &[], &[]),
    media("video/mpeg", ".mpeg", &[], &[".mpg"]),
    media("video/x-msvideo", ".avi", &[], &[]),
    // 3D 模型
    media("model/gltf-binary", ".glb", &[], &[]),
    media("model/gltf+json", ".gltf", &[], &[]),
    media("model/obj", ".obj", &[], &[]),
    media("model/stl", ".stl", &["model/x.stl-binary", "application/sla"], &[]),
    media("model/vnd.usdz+zip", ".usdz", &[], &[]),
];

static BY_MIME: Lazy<HashMap<&'static str, &'static MediaType>> = Lazy::new(|| {
    let mut index = HashMap::new();
    for media in MEDIA_TYPES {
        index.insert(media.mime, media);
        for alias in media.mime_aliases {
            index.insert(*alias, media);
        }
    }
    index
});

static BY_EXTENSION: Lazy<HashMap<&'static str, &'static MediaType>> = Lazy::new(|| {
    let mut index = HashMap::new();
    for media in MEDIA_TYPES {
        index.insert(media.extension, media);
        for alias in media.extension_aliases {
            index.insert(*alias, media);
        }
    }
    index
});

/// 去掉参数（`; charset=...`）并转成小写
pub fn normalize_content_type(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

fn normalize_extension(extension: &str) -> String {
    let lowered = extension.trim().to_ascii_lowercase();
    if lowered.starts_with('.') {
        lowered
    } else {
        format!(".{lowered}")
    }
}

pub fn lookup_content_type(content_type: &str) -> Option<&'static MediaType> {
    BY_MIME
        .get(normalize_content_type(content_type).as_str())
        .copied()
}

pub fn lookup_extension(extension: &str) -> Option<&'static MediaType> {
    BY_EXTENSION
        .get(normalize_extension(extension).as_str())
        .copied()
}

/// content-type 对应的扩展名；缺失或未知时返回 `None`
pub fn known_extension(content_type: &str) -> Option<&'static str> {
    lookup_content_type(content_type).map(|media| media.extension)
}

/// content-type 对应的扩展名，未知时回退到 [`FALLBACK_EXTENSION`]
pub fn extension_for_content_type(content_type: Option<&str>) -> &'static str {
    content_type
        .and_then(known_extension)
        .unwrap_or(FALLBACK_EXTENSION)
}

pub fn content_type_for_extension(extension: &str) -> Option<&'static str> {
    lookup_extension(extension).map(|media| media.mime)
}

/// 根据文件名推断上传时使用的 content-type
pub fn content_type_for_filename(filename: &str) -> &'static str {
    filename
        .rfind('.')
        .map(|idx| &filename[idx..])
        .and_then(content_type_for_extension)
        .unwrap_or(FALLBACK_CONTENT_TYPE)
}

/// 从路径（或 URL path）的最后一段中识别已知扩展名
pub fn extension_from_path(path: &str) -> Option<&'static str> {
    let segment = path.rsplit('/').next()?;
    let idx = segment.rfind('.')?;
    lookup_extension(&segment[idx..]).map(|media| media.extension)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn infers_extension_from_content_type() {
        assert_eq!(extension_for_content_type(Some("image/png")), ".png");
        assert_eq!(extension_for_content_type(Some("IMAGE/JPEG; charset=binary")), ".jpg");
        assert_eq!(extension_for_content_type(Some("image/jpg")), ".jpg");
        assert_eq!(extension_for_content_type(Some("video/mp4")), ".mp4");
        assert_eq!(extension_for_content_type(Some("model/gltf-binary")), ".glb");
    }

    #[test]
    fn unknown_or_missing_content_type_falls_back() {
        assert_eq!(extension_for_content_type(None), FALLBACK_EXTENSION);
        assert_eq!(
            extension_for_content_type(Some("application/unknown")),
            FALLBACK_EXTENSION
        );
        assert_eq!(extension_for_content_type(Some("")), FALLBACK_EXTENSION);
    }

    #[test]
    fn infers_content_type_from_filename() {
        assert_eq!(content_type_for_filename("result.mp4"), "video/mp4");
        assert_eq!(content_type_for_filename("photo.JPEG"), "image/jpeg");
        assert_eq!(content_type_for_filename("scan.tif"), "image/tiff");
        assert_eq!(content_type_for_filename("archive.zip"), FALLBACK_CONTENT_TYPE);
        assert_eq!(content_type_for_filename("noext"), FALLBACK_CONTENT_TYPE);
    }

    #[test]
    fn table_is_symmetric_for_canonical_entries() {
        for media in MEDIA_TYPES {
            assert_eq!(content_type_for_extension(media.extension), Some(media.mime));
            assert_eq!(known_extension(media.mime), Some(media.extension));
        }
    }

    #[test]
    fn extension_from_url_path() {
        assert_eq!(extension_from_path("/files/model.GLB"), Some(".glb"));
        assert_eq!(extension_from_path("/files/clip.mpg"), Some(".mpeg"));
        assert_eq!(extension_from_path("/files/blob"), None);
        assert_eq!(extension_from_path("/v1.2/blob"), None);
    }
}
