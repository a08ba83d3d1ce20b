//! Deterministic in-memory adapter used by tests and offline runs.
//!
//! Each `send_turn` pops the next scripted step. Failure steps surface as
//! provider errors, which makes retry and infra-error paths testable without
//! a network.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use crate::adapters::{Adapter, AdapterConfig};
use crate::error::SalvoError;
use crate::scenario::ToolDef;
use crate::types::{AdapterTurnResult, FinishReason, Message, TokenUsage, ToolCall};

/// One scripted model turn.
#[derive(Debug, Clone)]
pub struct ScriptedTurn {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCall>,
    pub usage: TokenUsage,
}

impl ScriptedTurn {
    /// A final text answer with no tool calls.
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            tool_calls: Vec::new(),
            usage: TokenUsage {
                input_tokens: 100,
                output_tokens: 20,
                total_tokens: 120,
            },
        }
    }

    /// A turn that invokes one tool. Call ids are derived from the name.
    pub fn tool_call(name: impl Into<String>, arguments: Value) -> Self {
        let name = name.into();
        Self {
            content: None,
            tool_calls: vec![ToolCall {
                id: format!("call_{name}"),
                name,
                arguments,
            }],
            usage: TokenUsage {
                input_tokens: 100,
                output_tokens: 30,
                total_tokens: 130,
            },
        }
    }

    pub fn with_tool_call(mut self, name: impl Into<String>, arguments: Value) -> Self {
        let name = name.into();
        self.tool_calls.push(ToolCall {
            id: format!("call_{name}_{}", self.tool_calls.len()),
            name,
            arguments,
        });
        self
    }

    pub fn with_usage(mut self, input_tokens: u64, output_tokens: u64) -> Self {
        self.usage = TokenUsage {
            input_tokens,
            output_tokens,
            total_tokens: input_tokens + output_tokens,
        };
        self
    }
}

#[derive(Debug, Clone)]
pub enum ScriptedStep {
    Turn(ScriptedTurn),
    /// Fail with a provider error carrying this status code. 429/5xx steps
    /// are classified transient and exercise the retry path.
    Fail {
        status: u16,
        message: String,
    },
}

pub struct ScriptedAdapter {
    steps: Mutex<Vec<ScriptedStep>>,
    cursor: AtomicUsize,
    calls: AtomicUsize,
}

impl ScriptedAdapter {
    pub fn new(turns: Vec<ScriptedTurn>) -> Self {
        Self::from_steps(turns.into_iter().map(ScriptedStep::Turn).collect())
    }

    pub fn from_steps(steps: Vec<ScriptedStep>) -> Self {
        Self {
            steps: Mutex::new(steps),
            cursor: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
        }
    }

    /// Number of `send_turn` calls observed so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Adapter for ScriptedAdapter {
    async fn send_turn(
        &self,
        _messages: &[Message],
        _tools: &[ToolDef],
        _config: &AdapterConfig,
    ) -> Result<AdapterTurnResult, SalvoError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let index = self.cursor.fetch_add(1, Ordering::SeqCst);
        let step = {
            let steps = self.steps.lock().expect("scripted steps poisoned");
            steps.get(index).cloned()
        };

        match step {
            Some(ScriptedStep::Turn(turn)) => {
                let finish_reason = if turn.tool_calls.is_empty() {
                    FinishReason::Stop
                } else {
                    FinishReason::ToolUse
                };
                Ok(AdapterTurnResult {
                    content: turn.content,
                    tool_calls: turn.tool_calls,
                    usage: turn.usage,
                    finish_reason,
                })
            }
            Some(ScriptedStep::Fail { status, message }) => {
                Err(SalvoError::Provider { status, message })
            }
            None => Err(SalvoError::InvalidResponse("no more scripted turns")),
        }
    }

    fn provider_name(&self) -> &str {
        "scripted"
    }
}
