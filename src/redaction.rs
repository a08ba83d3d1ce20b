//! Secret redaction and size limiting for trace persistence.
//!
//! An ordered pipeline of regex substitutions runs over every string-valued
//! field in messages and tool arguments before anything touches disk. The
//! bearer pattern must run before the generic auth pattern so the token is
//! consumed together with the header name.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::SalvoError;
use crate::trace::Trace;
use crate::types::Message;

pub const REDACTED_PLACEHOLDER: &str = "[REDACTED]";

/// 50 KB per message content.
pub const MAX_MESSAGE_CONTENT_BYTES: usize = 50_000;
/// 100 KB per serialized tool-call blob.
pub const MAX_TOOL_CALL_BYTES: usize = 100_000;

const BUILTIN_PATTERNS: &[&str] = &[
    // Bearer tokens, before the generic auth pattern.
    r"(?i)bearer\s+[a-zA-Z0-9._\-]+",
    // Generic secret-bearing key/value pairs.
    r"(?i)(api[_-]?key|secret|password|token|authorization)\s*[:=]\s*\S+",
    // OpenAI-style API keys.
    r"sk-[a-zA-Z0-9]{20,}",
    // Anthropic-style API keys.
    r"sk-ant-[a-zA-Z0-9\-]{20,}",
    // GitHub tokens of every flavor.
    r"gh[porus]_[a-zA-Z0-9]{36}",
    // Cookie and API-key headers.
    r"(?i)cookie:\s*\S+",
    r"(?i)set-cookie:\s*\S+",
    r"(?i)x-api-key:\s*\S+",
];

static COMPILED_BUILTINS: Lazy<Vec<Regex>> = Lazy::new(|| {
    BUILTIN_PATTERNS
        .iter()
        .map(|p| Regex::new(p).expect("builtin redaction pattern must compile"))
        .collect()
});

/// An ordered redaction pipeline: the built-in patterns plus any custom
/// patterns from project config. Custom patterns are additive.
pub struct Redactor {
    custom: Vec<Regex>,
}

impl Redactor {
    pub fn new() -> Self {
        Self { custom: Vec::new() }
    }

    pub fn with_custom_patterns(patterns: &[String]) -> Result<Self, SalvoError> {
        let custom = patterns
            .iter()
            .map(|p| {
                Regex::new(p).map_err(|err| {
                    SalvoError::ScenarioInvalid(format!(
                        "invalid custom redaction pattern '{p}': {err}"
                    ))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { custom })
    }

    /// Apply every pattern in order, replacing matches with `[REDACTED]`.
    pub fn redact(&self, content: &str) -> String {
        let mut content = content.to_string();
        for pattern in COMPILED_BUILTINS.iter().chain(self.custom.iter()) {
            content = pattern
                .replace_all(&content, REDACTED_PLACEHOLDER)
                .into_owned();
        }
        content
    }

    /// Redact all string content in a trace: message bodies, the final
    /// response, and string-valued tool-call arguments.
    pub fn redact_trace(&self, trace: &Trace) -> Trace {
        let mut out = trace.clone();
        for msg in &mut out.messages {
            if let Some(content) = &msg.content {
                msg.content = Some(self.redact(content));
            }
            for call in &mut msg.tool_calls {
                redact_json_strings(&mut call.arguments, self);
            }
        }
        for call in &mut out.tool_calls {
            redact_json_strings(&mut call.arguments, self);
        }
        if let Some(final_content) = &out.final_content {
            out.final_content = Some(self.redact(final_content));
        }
        out
    }
}

impl Default for Redactor {
    fn default() -> Self {
        Self::new()
    }
}

fn redact_json_strings(value: &mut serde_json::Value, redactor: &Redactor) {
    match value {
        serde_json::Value::String(s) => *s = redactor.redact(s),
        serde_json::Value::Array(items) => {
            for item in items {
                redact_json_strings(item, redactor);
            }
        }
        serde_json::Value::Object(map) => {
            for (_, entry) in map.iter_mut() {
                redact_json_strings(entry, redactor);
            }
        }
        _ => {}
    }
}

/// Truncate to at most `max_bytes` of content (on a char boundary), replacing
/// the tail with an explicit marker naming the byte count removed.
pub fn truncate_content(content: &str, max_bytes: usize) -> String {
    if content.len() <= max_bytes {
        return content.to_string();
    }
    let mut cut = max_bytes;
    while cut > 0 && !content.is_char_boundary(cut) {
        cut -= 1;
    }
    let dropped = content.len() - cut;
    format!("{}…[TRUNCATED {dropped} bytes]", &content[..cut])
}

/// Apply size caps to a trace's message contents and tool-call blobs. Runs
/// after pattern redaction, once, at persistence time.
pub fn apply_trace_limits(trace: &Trace) -> Trace {
    let mut out = trace.clone();
    for msg in &mut out.messages {
        if let Some(content) = &msg.content {
            if content.len() > MAX_MESSAGE_CONTENT_BYTES {
                msg.content = Some(truncate_content(content, MAX_MESSAGE_CONTENT_BYTES));
            }
        }
        truncate_tool_calls(msg);
    }
    if let Some(final_content) = &out.final_content {
        if final_content.len() > MAX_TOOL_CALL_BYTES
        {
            out.final_content = Some(truncate_content(final_content, MAX_TOOL_CALL_BYTES));
        }
    }
    out
}

fn truncate_tool_calls(msg: &mut Message) {
    for call in &mut msg.tool_calls {
        let serialized = call.arguments.to_string();
        if serialized.len() > MAX_TOOL_CALL_BYTES {
            call.arguments = serde_json::json!({
                "truncated": true,
                "original_bytes": serialized.len(),
            });
        }
    }
}
