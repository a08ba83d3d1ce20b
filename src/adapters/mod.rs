//! Provider adapters: a single-turn send-and-receive contract plus a
//! registry resolving adapter names to factories.
//!
//! Built-ins (`openai`, `anthropic`) are registered at startup; custom
//! adapters are registered explicitly by the embedding application, so the
//! core never does dynamic loading.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use serde_json::{Map, Value};

use crate::error::SalvoError;
use crate::scenario::ToolDef;
use crate::types::{AdapterTurnResult, Message};

pub mod anthropic;
pub mod openai;
pub mod scripted;

pub use anthropic::AnthropicAdapter;
pub use openai::OpenAiAdapter;
pub use scripted::{ScriptedAdapter, ScriptedStep, ScriptedTurn};

pub const DEFAULT_TURN_TIMEOUT: Duration = Duration::from_secs(120);

/// Configuration for a single run, shared by every adapter.
#[derive(Debug, Clone)]
pub struct AdapterConfig {
    pub model: String,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub seed: Option<i64>,
    pub timeout: Duration,
    /// Validated provider extras, forwarded verbatim into the wire request.
    pub extras: Map<String, Value>,
}

impl AdapterConfig {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            temperature: None,
            max_tokens: None,
            seed: None,
            timeout: DEFAULT_TURN_TIMEOUT,
            extras: Map::new(),
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_seed(mut self, seed: i64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_extras(mut self, extras: Map<String, Value>) -> Self {
        self.extras = extras;
        self
    }
}

/// The provider-agnostic single-turn contract: given the conversation so far
/// and the tool definitions, return one model turn.
#[async_trait]
pub trait Adapter: Send + Sync {
    async fn send_turn(
        &self,
        messages: &[Message],
        tools: &[ToolDef],
        config: &AdapterConfig,
    ) -> Result<AdapterTurnResult, SalvoError>;

    fn provider_name(&self) -> &str;
}

/// Builds a fresh adapter. Trials never share adapter instances, so the
/// orchestrator invokes the factory once per trial.
pub type AdapterFactory = Arc<dyn Fn() -> Result<Arc<dyn Adapter>, SalvoError> + Send + Sync>;

static REGISTRY: Lazy<RwLock<HashMap<String, AdapterFactory>>> = Lazy::new(|| {
    let mut map: HashMap<String, AdapterFactory> = HashMap::new();
    map.insert(
        "openai".to_string(),
        Arc::new(|| Ok(Arc::new(OpenAiAdapter::from_env()?) as Arc<dyn Adapter>)),
    );
    map.insert(
        "anthropic".to_string(),
        Arc::new(|| Ok(Arc::new(AnthropicAdapter::from_env()?) as Arc<dyn Adapter>)),
    );
    RwLock::new(map)
});

/// Register a custom adapter factory under a name. Later registrations
/// shadow earlier ones, builtins included.
pub fn register_adapter(name: impl Into<String>, factory: AdapterFactory) {
    let mut registry = REGISTRY.write().expect("adapter registry poisoned");
    registry.insert(name.into(), factory);
}

/// Resolve a name to its factory, or fail with the list of known adapters.
pub fn adapter_factory(name: &str) -> Result<AdapterFactory, SalvoError> {
    let registry = REGISTRY.read().expect("adapter registry poisoned");
    match registry.get(name) {
        Some(factory) => Ok(factory.clone()),
        None => {
            let mut available: Vec<&str> = registry.keys().map(String::as_str).collect();
            available.sort_unstable();
            Err(SalvoError::AdapterUnavailable {
                name: name.to_string(),
                available: available.join(", "),
            })
        }
    }
}

/// Build a single adapter instance by name.
pub fn get_adapter(name: &str) -> Result<Arc<dyn Adapter>, SalvoError> {
    adapter_factory(name)?()
}
