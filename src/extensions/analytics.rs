use std::sync::Arc;

use crate::analytics::AnalyticsRecorder;
use crate::extension::Extension;
use crate::pipeline::Middleware;
use crate::state::AppState;

/// Records search analytics on both proxied chains.
pub struct AnalyticsExtension;

impl AnalyticsExtension {
    pub const NAME: &'static str = "analytics";

    fn recorder(state: &AppState) -> Arc<dyn Middleware> {
        Arc::new(AnalyticsRecorder::new(
            Arc::clone(&state.store),
            Arc::clone(&state.geo),
            state.task_tracker().clone(),
            state.config.analytics_max_response_size,
        ))
    }
}

impl Extension for AnalyticsExtension {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn search_middleware(&self, state: &AppState) -> Vec<Arc<dyn Middleware>> {
        vec![Self::recorder(state)]
    }

    fn reactive_search_middleware(&self, state: &AppState) -> Vec<Arc<dyn Middleware>> {
        vec![Self::recorder(state)]
    }
}
