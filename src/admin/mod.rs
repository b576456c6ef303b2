//! Administrative command surface. Every operation answers `{"error": null}` on
//! success or `{"error": "<message>"}` for the command layer to show as-is.

mod channels;
mod moderation;

use axum::{
    extract::{Request, State},
    http::{header, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
    Json, Router,
};
use serde::Serialize;
use serde_json::Value;

use crate::{error, registry::RegistryResult, AppState};

pub fn router(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/channels", get(channels::list).post(channels::create))
        .route("/channels/{id}", get(channels::show).delete(channels::remove))
        .route("/channels/{id}/links", post(channels::link))
        .route("/channels/{id}/links/{tenant}", delete(channels::unlink_tenant))
        .route("/channels/{id}/settings", put(channels::settings))
        .route("/channels/{id}/staff", put(channels::staff))
        .route("/channels/{id}/moderation", post(moderation::moderate))
        .route("/channels/{id}/warnings/{tenant}", get(moderation::warnings))
        .route("/links", delete(channels::unlink))
        .route("/snapshot", get(channels::snapshot))
        .route_layer(middleware::from_fn_with_state(state, require_token))
}

#[derive(Debug, Serialize)]
pub struct Reply {
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

pub(crate) fn reply<T: Serialize>(result: RegistryResult<T>) -> Json<Reply> {
    let error = error::message(&result);
    let data = result
        .ok()
        .and_then(|data| serde_json::to_value(data).ok())
        .filter(|data| !data.is_null());
    Json(Reply { error, data })
}

async fn require_token(State(state): State<AppState>, request: Request, next: Next) -> Response {
    if let Some(expected) = state.admin_token.as_deref() {
        let presented = request
            .headers()
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "));
        if presented != Some(expected) {
            return StatusCode::UNAUTHORIZED.into_response();
        }
    }
    next.run(request).await
}
