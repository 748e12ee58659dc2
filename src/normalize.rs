//! Backend output normalization.
//!
//! Claude's `--output-format json` wraps the answer in a single result record:
//! `{"type":"result","result":"...","is_error":false,...}`. The envelope is a
//! best-effort enhancement; anything that does not look like one passes
//! through untouched.

use crate::backend::BackendKind;

use serde_json::Value;

/// Text ready to be returned to the caller, plus whether the backend itself
/// declared failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedOutput {
    pub text: String,
    pub is_error: bool,
}

impl NormalizedOutput {
    fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_error: false,
        }
    }
}

/// Normalize raw process output for `backend`.
pub fn normalize(backend: BackendKind, raw: &str) -> NormalizedOutput {
    if !backend.has_envelope() {
        return NormalizedOutput::text(raw);
    }

    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return NormalizedOutput::text("");
    }

    decode_result_envelope(trimmed).unwrap_or_else(|| NormalizedOutput::text(raw))
}

fn decode_result_envelope(payload: &str) -> Option<NormalizedOutput> {
    let Value::Object(record) = serde_json::from_str::<Value>(payload).ok()? else {
        return None;
    };

    if record.get("type").and_then(Value::as_str) != Some("result") {
        return None;
    }

    let text = match record.get("result") {
        Some(Value::String(text)) => text.clone(),
        None | Some(Value::Null) => String::new(),
        Some(other) => other.to_string(),
    };
    let is_error = record.get("is_error").and_then(Value::as_bool) == Some(true);

    Some(NormalizedOutput { text, is_error })
}
