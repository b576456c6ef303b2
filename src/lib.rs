pub mod admin;
pub mod appresult;
pub mod config;
pub mod error;
pub mod events;
pub mod identity;
pub mod mapping;
pub mod moderation;
pub mod platform;
pub mod registry;
pub mod relay;

use std::sync::Arc;

use axum::{extract::FromRef, Router};
use tower_http::trace::TraceLayer;

pub use appresult::{AppError, AppResult};

use moderation::ModerationController;
use platform::http::HttpPlatform;
use relay::RelayService;

#[derive(Clone, FromRef)]
pub struct AppState {
    pub relay: RelayService,
    pub moderation: Arc<ModerationController>,
    /// Present when the platform is the HTTP gateway, which pushes capability updates.
    pub gateway: Option<Arc<HttpPlatform>>,
    pub admin_token: Option<Arc<str>>,
}

impl AppState {
    pub fn new(relay: RelayService, admin_token: Option<String>) -> Self {
        let moderation = ModerationController::new(
            relay.registry().clone(),
            relay.platform().clone(),
            relay.presenter().clone(),
        );
        Self {
            relay,
            moderation: Arc::new(moderation),
            gateway: None,
            admin_token: admin_token.map(Arc::from),
        }
    }

    pub fn with_gateway(mut self, gateway: Arc<HttpPlatform>) -> Self {
        self.gateway = Some(gateway);
        self
    }
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .nest("/admin", admin::router(state.clone()))
        .nest("/events", events::router())
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}
