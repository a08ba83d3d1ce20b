//! Record/replay pipeline: persistence of redacted traces, replay loading,
//! and re-evaluation of recorded traces against updated assertions.

pub mod models;
pub mod recorder;
pub mod reeval;
pub mod replayer;

pub use models::{RecordedTrace, RevalResult, TraceMetadata, CURRENT_TRACE_SCHEMA_VERSION};
pub use recorder::TraceRecorder;
pub use reeval::{reevaluate, ReevalOptions, ReevalOutcome};
pub use replayer::TraceReplayer;
