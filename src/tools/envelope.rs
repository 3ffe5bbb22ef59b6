use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::GenFlowError;
use crate::storage::UploadReceipt;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub s3_key: String,
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
}

impl Attachment {
    pub fn from_receipt(receipt: UploadReceipt, filename: impl Into<String>) -> Self {
        Self {
            s3_key: receipt.key,
            size: receipt.size,
            filename: Some(filename.into()),
        }
    }
}

/// 返回给调用方的统一 JSON 信封
///
/// 成功：`{"attachments": [...], "summary": "...", ...extra}`
/// 失败：`{"error": "...", "attachments": []}`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Envelope {
    Error {
        error: String,
        attachments: Vec<Attachment>,
    },
    Success {
        attachments: Vec<Attachment>,
        summary: String,
        #[serde(flatten)]
        extra: Map<String, Value>,
    },
}

impl Envelope {
    pub fn success(attachments: Vec<Attachment>, summary: impl Into<String>) -> Self {
        Self::Success {
            attachments,
            summary: summary.into(),
            extra: Map::new(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            error: message.into(),
            attachments: Vec::new(),
        }
    }

    pub fn from_error(err: &GenFlowError) -> Self {
        Self::error(err.envelope_message())
    }

    /// 附加字段；错误信封保持不变
    pub fn with_extra(mut self, extra: Map<String, Value>) -> Self {
        if let Self::Success { extra: fields, .. } = &mut self {
            for (key, value) in extra {
                if matches!(key.as_str(), "attachments" | "summary" | "error") {
                    continue;
                }
                fields.insert(key, value);
            }
        }
        self
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn attachments(&self) -> &[Attachment] {
        match self {
            Self::Error { attachments, .. } | Self::Success { attachments, .. } => attachments,
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        match self {
            Self::Error { error, .. } => Some(error),
            Self::Success { .. } => None,
        }
    }

    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|e| {
            serde_json::json!({"error": format!("Unexpected error: {e}"), "attachments": []})
        })
    }
}
