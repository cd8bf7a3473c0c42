//! HTTP surface: REST under `/api/v1` plus the client WebSocket endpoints.

mod response;
mod rest;
mod ws;

pub use response::{correlation_middleware, ApiError, CorrelationId};
pub use rest::router;

use std::sync::Arc;

use crate::app::orchestrator::Orchestrator;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct ApiState {
    pub orchestrator: Arc<Orchestrator>,
}
