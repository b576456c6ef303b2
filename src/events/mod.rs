use std::collections::HashSet;

use axum::{debug_handler, extract::State, http::StatusCode, routing::post, Json, Router};
use serde::Deserialize;

use crate::{
    platform::{Capability, ChannelId},
    relay::{MessageDeleted, MessagePosted, ReactionAdded},
    AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/message", post(message))
        .route("/delete", post(delete))
        .route("/reaction", post(reaction))
        .route("/permissions", post(permissions))
}

#[derive(Debug, Deserialize)]
pub(crate) struct PermissionsUpdate {
    channel: ChannelId,
    granted: HashSet<Capability>,
}

#[debug_handler]
pub(crate) async fn message(
    State(state): State<AppState>,
    Json(event): Json<MessagePosted>,
) -> StatusCode {
    // Resolving the tenant name can take a gateway round trip; answer first.
    tokio::spawn(async move {
        state.relay.on_message(event).await;
    });
    StatusCode::ACCEPTED
}

#[debug_handler]
pub(crate) async fn delete(
    State(state): State<AppState>,
    Json(event): Json<MessageDeleted>,
) -> StatusCode {
    state.relay.on_delete(event);
    StatusCode::ACCEPTED
}

#[debug_handler]
pub(crate) async fn reaction(
    State(state): State<AppState>,
    Json(event): Json<ReactionAdded>,
) -> StatusCode {
    state.relay.on_reaction(event);
    StatusCode::ACCEPTED
}

#[debug_handler]
pub(crate) async fn permissions(
    State(state): State<AppState>,
    Json(PermissionsUpdate { channel, granted }): Json<PermissionsUpdate>,
) -> StatusCode {
    let Some(gateway) = state.gateway else {
        return StatusCode::NOT_FOUND;
    };
    gateway.update_capabilities(channel, granted);
    StatusCode::ACCEPTED
}
