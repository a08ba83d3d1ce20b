//! TraceReplayer: load recorded traces for read-only display or
//! re-evaluation. No adapter is ever constructed on this path.

use std::sync::Arc;

use crate::error::SalvoError;
use crate::recording::models::{validate_trace_version, RecordedTrace};
use crate::storage::RunStore;

pub struct TraceReplayer {
    store: Arc<RunStore>,
}

impl TraceReplayer {
    pub fn new(store: Arc<RunStore>) -> Self {
        Self { store }
    }

    /// Load a recorded trace by id, or the latest recording when no id is
    /// given. Validates the schema version before handing the trace out.
    pub fn load(&self, trace_id: Option<&str>) -> Result<Option<RecordedTrace>, SalvoError> {
        let recorded = match trace_id {
            Some(trace_id) => self.store.load_recorded_trace(trace_id)?,
            None => self.store.load_latest_recorded_trace()?,
        };

        if let Some(recorded) = &recorded {
            validate_trace_version(&recorded.metadata)?;
        }

        Ok(recorded)
    }
}
