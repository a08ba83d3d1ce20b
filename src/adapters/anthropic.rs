//! Adapter for Anthropic-compatible messages/tool-use APIs.
//!
//! Differences from the OpenAI wire format handled here: the system prompt is
//! a top-level parameter, tools declare `input_schema` rather than
//! `parameters`, tool results travel inside user messages as `tool_result`
//! blocks, and `max_tokens` is mandatory (defaulted to 4096). Tool-use inputs
//! arrive already structured. The seed parameter has no equivalent on this
//! API and is not forwarded.

use std::env;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::adapters::{Adapter, AdapterConfig};
use crate::error::SalvoError;
use crate::scenario::ToolDef;
use crate::types::{AdapterTurnResult, FinishReason, Message, MessageRole, TokenUsage, ToolCall};

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";
const API_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 4096;

#[derive(Debug, Clone)]
pub struct AnthropicConfig {
    pub api_key: String,
    pub base_url: String,
}

impl AnthropicConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[derive(Debug, Clone)]
pub struct AnthropicAdapter {
    client: Client,
    config: AnthropicConfig,
}

impl AnthropicAdapter {
    pub fn new(api_key: impl Into<String>) -> Result<Self, SalvoError> {
        Self::from_config(AnthropicConfig::new(api_key))
    }

    pub fn from_env() -> Result<Self, SalvoError> {
        let api_key = env::var("ANTHROPIC_API_KEY")
            .map_err(|_| SalvoError::MissingApiKey("ANTHROPIC_API_KEY"))?;
        let mut config = AnthropicConfig::new(api_key);
        if let Ok(base_url) = env::var("ANTHROPIC_BASE_URL") {
            config.base_url = base_url;
        }
        Self::from_config(config)
    }

    pub fn from_config(config: AnthropicConfig) -> Result<Self, SalvoError> {
        let client = Client::builder().build()?;
        Ok(Self { client, config })
    }

    fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.config.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    fn with_default_headers(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", API_VERSION)
    }

    /// Pull the system prompt out of the message list; this API wants it as a
    /// top-level parameter.
    fn extract_system(messages: &[Message]) -> (Option<String>, Vec<&Message>) {
        let mut system = None;
        let mut remaining = Vec::with_capacity(messages.len());
        for msg in messages {
            if msg.role == MessageRole::System {
                system = msg.content.clone();
            } else {
                remaining.push(msg);
            }
        }
        (system, remaining)
    }

    fn convert_message(msg: &Message) -> WireMessage {
        match msg.role {
            MessageRole::Assistant => {
                let mut content = Vec::new();
                if let Some(text) = &msg.content {
                    if !text.is_empty() {
                        content.push(WireBlock::Text { text: text.clone() });
                    }
                }
                for tc in &msg.tool_calls {
                    content.push(WireBlock::ToolUse {
                        id: tc.id.clone(),
                        name: tc.name.clone(),
                        input: tc.arguments.clone(),
                    });
                }
                WireMessage {
                    role: "assistant",
                    content: WireContent::Blocks(content),
                }
            }
            MessageRole::ToolResult => WireMessage {
                role: "user",
                content: WireContent::Blocks(vec![WireBlock::ToolResult {
                    tool_use_id: msg.tool_call_id.clone().unwrap_or_default(),
                    content: msg.content.clone().unwrap_or_default(),
                }]),
            },
            _ => WireMessage {
                role: "user",
                content: WireContent::Text(msg.content.clone().unwrap_or_default()),
            },
        }
    }

    fn convert_tools(tools: &[ToolDef]) -> Vec<WireTool> {
        tools
            .iter()
            .map(|tool| WireTool {
                name: tool.name.clone(),
                description: tool.description.clone(),
                input_schema: tool.parameters.clone(),
            })
            .collect()
    }
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: &'static str,
    content: WireContent,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum WireContent {
    Text(String),
    Blocks(Vec<WireBlock>),
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
    },
}

#[derive(Debug, Serialize)]
struct WireTool {
    name: String,
    description: String,
    input_schema: Value,
}

#[derive(Debug, Serialize)]
struct RequestBody {
    model: String,
    messages: Vec<WireMessage>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<WireTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ResponseBlock>,
    #[serde(default)]
    stop_reason: Option<String>,
    usage: ResponseUsage,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ResponseBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
struct ResponseUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

#[async_trait]
impl Adapter for AnthropicAdapter {
    async fn send_turn(
        &self,
        messages: &[Message],
        tools: &[ToolDef],
        config: &AdapterConfig,
    ) -> Result<AdapterTurnResult, SalvoError> {
        let (system, remaining) = Self::extract_system(messages);

        let body = RequestBody {
            model: config.model.clone(),
            messages: remaining.iter().map(|m| Self::convert_message(m)).collect(),
            max_tokens: config.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            system,
            tools: if tools.is_empty() {
                None
            } else {
                Some(Self::convert_tools(tools))
            },
            temperature: config.temperature,
        };

        let mut payload = serde_json::to_value(&body)?;
        if let Some(object) = payload.as_object_mut() {
            for (key, value) in &config.extras {
                object.insert(key.clone(), value.clone());
            }
        }

        let builder = self
            .with_default_headers(self.client.post(self.endpoint("messages")))
            .timeout(config.timeout)
            .json(&payload);

        let response = builder.send().await?;
        let status = response.status();

        if !status.is_success() {
            let text = response.text().await?;
            let message = serde_json::from_str::<ErrorEnvelope>(&text)
                .map(|envelope| envelope.error.message)
                .unwrap_or(text);
            return Err(SalvoError::Provider {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: MessagesResponse = response.json().await?;

        let mut text_parts = Vec::new();
        let mut tool_calls = Vec::new();
        for block in parsed.content {
            match block {
                ResponseBlock::Text { text } => text_parts.push(text),
                ResponseBlock::ToolUse { id, name, input } => tool_calls.push(ToolCall {
                    id,
                    name,
                    arguments: input,
                }),
                ResponseBlock::Unknown => {}
            }
        }

        let content = if text_parts.is_empty() {
            None
        } else {
            Some(text_parts.join("\n"))
        };

        let usage = TokenUsage {
            input_tokens: parsed.usage.input_tokens,
            output_tokens: parsed.usage.output_tokens,
            total_tokens: parsed.usage.input_tokens + parsed.usage.output_tokens,
        };

        let finish_reason = match parsed.stop_reason.as_deref() {
            Some(reason) => FinishReason::from_anthropic(reason),
            None if !tool_calls.is_empty() => FinishReason::ToolUse,
            None => FinishReason::Stop,
        };

        Ok(AdapterTurnResult {
            content,
            tool_calls,
            usage,
            finish_reason,
        })
    }

    fn provider_name(&self) -> &str {
        "anthropic"
    }
}
