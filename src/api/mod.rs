//! HTTP API surface: document management and analysis endpoints.

pub mod analysis;
pub mod documents;

use crate::models::Config;
use crate::orchestrator::Orchestrator;
use crate::store::AnalysisStore;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: AnalysisStore,
    pub orchestrator: Orchestrator,
    pub config: Config,
}
