use serde_json::{Map, Value};

use crate::stream::StreamKey;

/// Full replacement content for one variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodePayload {
    pub code: String,
    /// Derived code for the secondary target platform (`arkui` on the wire).
    pub secondary: Option<String>,
}

/// One inbound message from the code-generation service.
///
/// Parsing is strict about shape: a message whose `value` does not match its
/// `type` is not representable and gets dropped by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerMessage {
    Chunk { slot: StreamKey, text: String },
    Status { slot: StreamKey, text: String },
    SetCode { slot: StreamKey, code: CodePayload },
    VariantComplete { slot: StreamKey },
    VariantError { slot: StreamKey, message: String },
    VariantCount { page: usize, count: usize },
    Error { message: String },
}

impl ServerMessage {
    pub fn parse(raw: &str) -> Option<Self> {
        let parsed: Value = serde_json::from_str(raw).ok()?;
        Self::from_value(&parsed)
    }

    pub fn from_value(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;
        let kind = obj.get("type").and_then(Value::as_str)?;
        let payload = obj.get("value").unwrap_or(&Value::Null);
        let page = page_index(obj);

        let message = match kind {
            "chunk" => Self::Chunk {
                slot: slot(obj, page)?,
                text: payload.as_str()?.to_string(),
            },
            "status" => Self::Status {
                slot: slot(obj, page)?,
                text: payload.as_str()?.to_string(),
            },
            "setCode" => Self::SetCode {
                slot: slot(obj, page)?,
                code: code_payload(payload)?,
            },
            "variantComplete" => Self::VariantComplete {
                slot: slot(obj, page)?,
            },
            "variantError" => Self::VariantError {
                slot: slot(obj, page)?,
                message: payload.as_str()?.to_string(),
            },
            "variantCount" => Self::VariantCount {
                page,
                count: variant_count(payload)?,
            },
            "error" => Self::Error {
                message: payload.as_str()?.to_string(),
            },
            _ => return None,
        };
        Some(message)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Chunk { .. } => "chunk",
            Self::Status { .. } => "status",
            Self::SetCode { .. } => "setCode",
            Self::VariantComplete { .. } => "variantComplete",
            Self::VariantError { .. } => "variantError",
            Self::VariantCount { .. } => "variantCount",
            Self::Error { .. } => "error",
        }
    }
}

fn page_index(obj: &Map<String, Value>) -> usize {
    obj.get("pageIndex")
        .and_then(Value::as_u64)
        .and_then(|value| usize::try_from(value).ok())
        .unwrap_or(0)
}

fn slot(obj: &Map<String, Value>, page: usize) -> Option<StreamKey> {
    let variant = obj
        .get("variantIndex")
        .and_then(Value::as_u64)
        .and_then(|value| usize::try_from(value).ok())?;
    Some(StreamKey::new(page, variant))
}

fn code_payload(value: &Value) -> Option<CodePayload> {
    if let Some(code) = value.as_str() {
        return Some(CodePayload {
            code: code.to_string(),
            secondary: None,
        });
    }
    let obj = value.as_object()?;
    Some(CodePayload {
        code: obj.get("html").and_then(Value::as_str)?.to_string(),
        secondary: obj.get("arkui").and_then(Value::as_str).map(str::to_string),
    })
}

/// Accepts an unsigned integer, either as a JSON number or as a numeric
/// string. Anything else is treated as a malformed message.
fn variant_count(value: &Value) -> Option<usize> {
    match value {
        Value::Number(number) => number.as_u64().and_then(|n| usize::try_from(n).ok()),
        Value::String(text) => text.trim().parse::<usize>().ok(),
        _ => None,
    }
}
