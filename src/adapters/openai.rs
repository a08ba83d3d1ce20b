//! Adapter for OpenAI-compatible chat/tool APIs.
//!
//! Tool-call arguments arrive as JSON text on this wire format and are parsed
//! into structured values before they reach the rest of the pipeline.

use std::env;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::adapters::{Adapter, AdapterConfig};
use crate::error::SalvoError;
use crate::scenario::ToolDef;
use crate::types::{AdapterTurnResult, FinishReason, Message, MessageRole, TokenUsage, ToolCall};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub api_key: String,
    pub base_url: String,
}

impl OpenAiConfig {
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
pub struct OpenAiAdapter {
    client: Client,
    config: OpenAiConfig,
}

impl OpenAiAdapter {
    pub fn new(api_key: impl Into<String>) -> Result<Self, SalvoError> {
        Self::from_config(OpenAiConfig::new(api_key))
    }

    pub fn from_env() -> Result<Self, SalvoError> {
        let api_key =
            env::var("OPENAI_API_KEY").map_err(|_| SalvoError::MissingApiKey("OPENAI_API_KEY"))?;
        let mut config = OpenAiConfig::new(api_key);
        if let Ok(base_url) = env::var("OPENAI_BASE_URL") {
            config.base_url = base_url;
        }
        Self::from_config(config)
    }

    pub fn from_config(config: OpenAiConfig) -> Result<Self, SalvoError> {
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
        builder.bearer_auth(&self.config.api_key)
    }

    fn convert_messages(messages: &[Message]) -> Result<Vec<WireMessage>, SalvoError> {
        let mut out = Vec::with_capacity(messages.len());
        for msg in messages {
            let wire = match msg.role {
                MessageRole::System => WireMessage {
                    role: "system",
                    content: msg.content.clone(),
                    tool_calls: None,
                    tool_call_id: None,
                },
                MessageRole::User => WireMessage {
                    role: "user",
                    content: msg.content.clone(),
                    tool_calls: None,
                    tool_call_id: None,
                },
                MessageRole::Assistant => {
                    let tool_calls = if msg.tool_calls.is_empty() {
                        None
                    } else {
                        Some(
                            msg.tool_calls
                                .iter()
                                .map(|tc| {
                                    Ok(WireToolCall {
                                        id: tc.id.clone(),
                                        kind: "function",
                                        function: WireFunctionCall {
                                            name: tc.name.clone(),
                                            arguments: serde_json::to_string(&tc.arguments)?,
                                        },
                                    })
                                })
                                .collect::<Result<Vec<_>, SalvoError>>()?,
                        )
                    };
                    WireMessage {
                        role: "assistant",
                        content: msg.content.clone(),
                        tool_calls,
                        tool_call_id: None,
                    }
                }
                MessageRole::ToolResult => WireMessage {
                    role: "tool",
                    content: msg.content.clone(),
                    tool_calls: None,
                    tool_call_id: msg.tool_call_id.clone(),
                },
            };
            out.push(wire);
        }
        Ok(out)
    }

    fn convert_tools(tools: &[ToolDef]) -> Vec<WireTool> {
        tools
            .iter()
            .map(|tool| WireTool {
                kind: "function",
                function: WireFunctionDef {
                    name: tool.name.clone(),
                    description: tool.description.clone(),
                    parameters: tool.parameters.clone(),
                },
            })
            .collect()
    }
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<WireToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct WireToolCall {
    id: String,
    #[serde(rename = "type")]
    kind: &'static str,
    function: WireFunctionCall,
}

#[derive(Debug, Serialize)]
struct WireFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Debug, Serialize)]
struct WireTool {
    #[serde(rename = "type")]
    kind: &'static str,
    function: WireFunctionDef,
}

#[derive(Debug, Serialize)]
struct WireFunctionDef {
    name: String,
    description: String,
    parameters: Value,
}

#[derive(Debug, Serialize)]
struct RequestBody {
    model: String,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<WireTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    seed: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ResponseChoice>,
    #[serde(default)]
    usage: Option<ResponseUsage>,
}

#[derive(Debug, Deserialize)]
struct ResponseChoice {
    message: ResponseMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ResponseToolCall>,
}

#[derive(Debug, Deserialize)]
struct ResponseToolCall {
    id: String,
    function: ResponseFunctionCall,
}

#[derive(Debug, Deserialize)]
struct ResponseFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct ResponseUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
    #[serde(default)]
    total_tokens: u64,
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
impl Adapter for OpenAiAdapter {
    async fn send_turn(
        &self,
        messages: &[Message],
        tools: &[ToolDef],
        config: &AdapterConfig,
    ) -> Result<AdapterTurnResult, SalvoError> {
        let body = RequestBody {
            model: config.model.clone(),
            messages: Self::convert_messages(messages)?,
            tools: if tools.is_empty() {
                None
            } else {
                Some(Self::convert_tools(tools))
            },
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            seed: config.seed,
        };

        // Merge validated extras into the serialized body so provider-specific
        // parameters (tool_choice, top_p, ...) pass through unchanged.
        let mut payload = serde_json::to_value(&body)?;
        if let Some(object) = payload.as_object_mut() {
            for (key, value) in &config.extras {
                object.insert(key.clone(), value.clone());
            }
        }

        let builder = self
            .with_default_headers(self.client.post(self.endpoint("chat/completions")))
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

        let parsed: ChatCompletionResponse = response.json().await?;
        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or(SalvoError::InvalidResponse("response contained no choices"))?;

        let mut tool_calls = Vec::with_capacity(choice.message.tool_calls.len());
        for tc in choice.message.tool_calls {
            let arguments: Value = if tc.function.arguments.trim().is_empty() {
                Value::Object(serde_json::Map::new())
            } else {
                serde_json::from_str(&tc.function.arguments).map_err(|_| {
                    SalvoError::InvalidResponse("tool call arguments contained invalid json")
                })?
            };
            tool_calls.push(ToolCall {
                id: tc.id,
                name: tc.function.name,
                arguments,
            });
        }

        let usage = parsed
            .usage
            .map(|u| TokenUsage {
                input_tokens: u.prompt_tokens,
                output_tokens: u.completion_tokens,
                total_tokens: u.total_tokens,
            })
            .unwrap_or_default();

        let finish_reason = match choice.finish_reason.as_deref() {
            Some(reason) => FinishReason::from_openai(reason),
            None if !tool_calls.is_empty() => FinishReason::ToolUse,
            None => FinishReason::Stop,
        };

        Ok(AdapterTurnResult {
            content: choice.message.content,
            tool_calls,
            usage,
            finish_reason,
        })
    }

    fn provider_name(&self) -> &str {
        "openai"
    }
}
