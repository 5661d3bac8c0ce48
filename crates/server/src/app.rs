use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use tower_http::trace::TraceLayer;

use frontdesk_agent::ConversationOrchestrator;
use frontdesk_db::DbPool;

use crate::outbound::OutboundDispatcher;
use crate::{chat, health, voice, whatsapp};

/// Shared by every channel route.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<ConversationOrchestrator>,
    pub outbound: Arc<dyn OutboundDispatcher>,
    pub voice_timeout: Duration,
}

pub fn router(state: AppState, db_pool: DbPool) -> Router {
    Router::new()
        .merge(chat::router())
        .merge(voice::router())
        .merge(whatsapp::router())
        .with_state(state)
        .merge(health::router(db_pool))
        .layer(TraceLayer::new_for_http())
}
