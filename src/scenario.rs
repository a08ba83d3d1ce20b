//! Scenario data model: the immutable description of one agent test.
//!
//! Assertions are a closed tagged enum; the two sugar forms (`tool_called`,
//! `output_contains`) normalize to their canonical counterparts before
//! evaluation.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::error::SalvoError;

fn default_weight() -> f64 {
    1.0
}

fn default_threshold() -> f64 {
    0.8
}

fn default_max_turns() -> u32 {
    10
}

fn default_adapter() -> String {
    "openai".to_string()
}

/// JSON-schema-shaped parameter description for a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ToolDef {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "empty_object_schema")]
    pub parameters: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mock_response: Option<Value>,
}

fn empty_object_schema() -> Value {
    serde_json::json!({"type": "object", "properties": {}})
}

impl ToolDef {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: empty_object_schema(),
            mock_response: None,
        }
    }

    pub fn with_parameters(mut self, parameters: Value) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn with_mock_response(mut self, mock: Value) -> Self {
        self.mock_response = Some(mock);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operator {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    Contains,
    Regex,
    Exists,
}

impl Operator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::Eq => "eq",
            Operator::Ne => "ne",
            Operator::Gt => "gt",
            Operator::Gte => "gte",
            Operator::Lt => "lt",
            Operator::Lte => "lte",
            Operator::Contains => "contains",
            Operator::Regex => "regex",
            Operator::Exists => "exists",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SequenceMode {
    #[serde(alias = "EXACT")]
    Exact,
    #[serde(alias = "IN_ORDER")]
    InOrder,
    #[serde(alias = "ANY_ORDER")]
    AnyOrder,
}

impl Default for SequenceMode {
    fn default() -> Self {
        SequenceMode::Exact
    }
}

/// One named, weighted axis within a judge assertion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Criterion {
    pub name: String,
    pub description: String,
    #[serde(default = "default_weight")]
    pub weight: f64,
}

/// A declarative check over a trace. The closed set of kinds dispatches to
/// the matching evaluator; sugar kinds expand via [`Assertion::normalized`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Assertion {
    Jmespath {
        expression: String,
        operator: Operator,
        #[serde(default)]
        value: Value,
        #[serde(default = "default_weight")]
        weight: f64,
        #[serde(default)]
        required: bool,
    },
    ToolSequence {
        sequence: Vec<String>,
        #[serde(default)]
        mode: SequenceMode,
        #[serde(default = "default_weight")]
        weight: f64,
        #[serde(default)]
        required: bool,
    },
    ToolCalled {
        tool: String,
        #[serde(default = "default_weight")]
        weight: f64,
        #[serde(default)]
        required: bool,
    },
    OutputContains {
        value: String,
        #[serde(default = "default_weight")]
        weight: f64,
        #[serde(default)]
        required: bool,
    },
    CostLimit {
        max_usd: f64,
        #[serde(default = "default_weight")]
        weight: f64,
        #[serde(default)]
        required: bool,
    },
    LatencyLimit {
        max_seconds: f64,
        #[serde(default = "default_weight")]
        weight: f64,
        #[serde(default)]
        required: bool,
    },
    Judge {
        criteria: Vec<Criterion>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        judge_adapter: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        judge_model: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        k: Option<u32>,
        #[serde(default)]
        include_system_prompt: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        custom_prompt: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        threshold: Option<f64>,
        #[serde(default = "default_weight")]
        weight: f64,
        #[serde(default)]
        required: bool,
    },
}

impl Assertion {
    pub fn type_name(&self) -> &'static str {
        match self {
            Assertion::Jmespath { .. } => "jmespath",
            Assertion::ToolSequence { .. } => "tool_sequence",
            Assertion::ToolCalled { .. } => "tool_called",
            Assertion::OutputContains { .. } => "output_contains",
            Assertion::CostLimit { .. } => "cost_limit",
            Assertion::LatencyLimit { .. } => "latency_limit",
            Assertion::Judge { .. } => "judge",
        }
    }

    pub fn weight(&self) -> f64 {
        match self {
            Assertion::Jmespath { weight, .. }
            | Assertion::ToolSequence { weight, .. }
            | Assertion::ToolCalled { weight, .. }
            | Assertion::OutputContains { weight, .. }
            | Assertion::CostLimit { weight, .. }
            | Assertion::LatencyLimit { weight, .. }
            | Assertion::Judge { weight, .. } => *weight,
        }
    }

    pub fn required(&self) -> bool {
        match self {
            Assertion::Jmespath { required, .. }
            | Assertion::ToolSequence { required, .. }
            | Assertion::ToolCalled { required, .. }
            | Assertion::OutputContains { required, .. }
            | Assertion::CostLimit { required, .. }
            | Assertion::LatencyLimit { required, .. }
            | Assertion::Judge { required, .. } => *required,
        }
    }

    /// Expand sugar kinds into their canonical form. `tool_called` becomes a
    /// length-1 any-order tool sequence; `output_contains` becomes a
    /// `contains` query over the final response content. Canonical kinds are
    /// returned unchanged.
    pub fn normalized(&self) -> Assertion {
        match self {
            Assertion::ToolCalled {
                tool,
                weight,
                required,
            } => Assertion::ToolSequence {
                sequence: vec![tool.clone()],
                mode: SequenceMode::AnyOrder,
                weight: *weight,
                required: *required,
            },
            Assertion::OutputContains {
                value,
                weight,
                required,
            } => Assertion::Jmespath {
                expression: "response.content".to_string(),
                operator: Operator::Contains,
                value: Value::String(value.clone()),
                weight: *weight,
                required: *required,
            },
            other => other.clone(),
        }
    }

    /// Whether evaluating this assertion needs message content, as opposed to
    /// structure (tool names, counts, usage) that survives metadata_only
    /// recording.
    pub fn is_content_dependent(&self) -> bool {
        matches!(
            self,
            Assertion::Jmespath { .. } | Assertion::OutputContains { .. } | Assertion::Judge { .. }
        )
    }
}

/// A complete test scenario. Immutable once constructed; the content hash is
/// stamped into every trace for drift detection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Scenario {
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_adapter")]
    pub adapter: String,
    pub model: String,
    #[serde(default)]
    pub system_prompt: String,
    pub prompt: String,
    #[serde(default)]
    pub tools: Vec<ToolDef>,
    #[serde(default)]
    pub assertions: Vec<Assertion>,
    #[serde(default = "default_threshold")]
    pub threshold: f64,
    #[serde(default = "default_max_turns")]
    pub max_turns: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<i64>,
    #[serde(default)]
    pub extras: Map<String, Value>,
}

impl Scenario {
    /// Display name: the description when present, otherwise a prompt prefix.
    pub fn name(&self) -> String {
        if !self.description.is_empty() {
            self.description.clone()
        } else {
            self.prompt.chars().take(50).collect()
        }
    }

    /// SHA-256 hex digest of the canonical JSON serialization.
    pub fn content_hash(&self) -> String {
        let bytes = serde_json::to_vec(self).unwrap_or_default();
        let digest = Sha256::digest(&bytes);
        format!("{digest:x}")
    }

    /// Assertions with sugar kinds expanded, in declaration order.
    pub fn normalized_assertions(&self) -> Vec<Assertion> {
        self.assertions.iter().map(Assertion::normalized).collect()
    }

    /// Bounds checks beyond what deserialization enforces.
    pub fn validate(&self) -> Result<(), SalvoError> {
        if !(0.0..=1.0).contains(&self.threshold) {
            return Err(SalvoError::ScenarioInvalid(format!(
                "threshold {} must be within [0.0, 1.0]",
                self.threshold
            )));
        }
        if !(1..=100).contains(&self.max_turns) {
            return Err(SalvoError::ScenarioInvalid(format!(
                "max_turns {} must be within [1, 100]",
                self.max_turns
            )));
        }
        for assertion in &self.assertions {
            match assertion {
                Assertion::ToolSequence { sequence, .. } if sequence.is_empty() => {
                    return Err(SalvoError::ScenarioInvalid(
                        "tool_sequence assertion has an empty sequence".to_string(),
                    ));
                }
                Assertion::Judge { criteria, k, .. } => {
                    if criteria.is_empty() {
                        return Err(SalvoError::ScenarioInvalid(
                            "judge assertion has no criteria".to_string(),
                        ));
                    }
                    if let Some(k) = k {
                        if *k == 0 || *k % 2 == 0 {
                            return Err(SalvoError::ScenarioInvalid(format!(
                                "judge k must be odd and positive, got {k}"
                            )));
                        }
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }
}
