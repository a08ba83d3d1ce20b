pub mod adapters;
pub mod config;
pub mod cost;
pub mod error;
pub mod eval;
pub mod extras;
pub mod loader;
pub mod orchestrator;
pub mod recording;
pub mod redaction;
pub mod render;
pub mod retry;
pub mod runner;
pub mod scenario;
pub mod storage;
pub mod suite;
pub mod trace;
pub mod types;

pub use adapters::{
    register_adapter, Adapter, AdapterConfig, AdapterFactory, AnthropicAdapter, OpenAiAdapter,
    ScriptedAdapter, ScriptedTurn,
};
pub use config::{find_project_root, JudgeConfig, ProjectConfig, RecordingConfig, RecordingMode};
pub use error::SalvoError;
pub use eval::{EvalContext, EvalResult};
pub use loader::{load_scenario_file, load_scenario_str};
pub use orchestrator::{default_parallelism, CancelToken, TrialRunner};
pub use recording::{
    RecordedTrace, ReevalOptions, RevalResult, TraceMetadata, TraceRecorder, TraceReplayer,
};
pub use runner::ScenarioRunner;
pub use scenario::{Assertion, Criterion, Operator, Scenario, SequenceMode, ToolDef};
pub use storage::RunStore;
pub use suite::{FailureRow, SuiteResult, TrialResult, TrialStatus, Verdict};
pub use trace::Trace;
pub use types::{
    AdapterTurnResult, FinishReason, Message, MessageRole, TokenUsage, ToolCall,
};
