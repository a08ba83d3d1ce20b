use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SalvoError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("provider error (status {status}): {message}")]
    Provider { status: u16, message: String },

    #[error("unknown adapter '{name}'; available adapters: {available}. For custom adapters, register a factory via salvo::adapters::register_adapter")]
    AdapterUnavailable { name: String, available: String },

    #[error("missing API key: set the {0} environment variable")]
    MissingApiKey(&'static str),

    #[error("extras rejected: {0}")]
    ExtrasRejected(String),

    #[error("model called tool '{tool}' but no mock_response is defined; available mocks: {available}")]
    ToolMockMissing { tool: String, available: String },

    #[error("invalid response from provider: {0}")]
    InvalidResponse(&'static str),

    #[error("invalid scenario: {0}")]
    ScenarioInvalid(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("cancelled")]
    Cancelled,
}

impl SalvoError {
    /// Whether a retry could plausibly succeed: network-level failures,
    /// request timeouts, rate limits, and server-side errors.
    pub fn is_transient(&self) -> bool {
        match self {
            SalvoError::Http(err) => err.is_timeout() || err.is_connect() || err.is_request(),
            SalvoError::Provider { status, .. } => matches!(status, 408 | 429) || *status >= 500,
            SalvoError::Timeout(_) => true,
            _ => false,
        }
    }

    /// Short classification tag recorded on trial results for retry stats.
    pub fn kind(&self) -> &'static str {
        match self {
            SalvoError::Http(_) => "http",
            SalvoError::Serialization(_) => "serialization",
            SalvoError::Yaml(_) => "yaml",
            SalvoError::Io(_) => "io",
            SalvoError::Provider { .. } => "provider",
            SalvoError::AdapterUnavailable { .. } => "adapter_unavailable",
            SalvoError::MissingApiKey(_) => "missing_api_key",
            SalvoError::ExtrasRejected(_) => "extras_rejected",
            SalvoError::ToolMockMissing { .. } => "tool_mock_missing",
            SalvoError::InvalidResponse(_) => "invalid_response",
            SalvoError::ScenarioInvalid(_) => "scenario_invalid",
            SalvoError::Storage(_) => "storage",
            SalvoError::Timeout(_) => "timeout",
            SalvoError::Cancelled => "cancelled",
        }
    }
}
