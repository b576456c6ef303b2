use std::time::Duration;

use axum::{
    debug_handler,
    extract::{Path, State},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::{
    platform::{TenantId, UserId},
    registry::{RegistryResult, Role},
    AppState,
};

use super::{reply, Reply};

#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub(crate) enum Action {
    Kick,
    Ban,
    Unban,
    Mute {
        #[serde(default)]
        minutes: Option<u64>,
    },
    Unmute,
    Warn { reason: String },
    Unwarn { index: usize },
}

#[derive(Debug, Deserialize)]
pub(crate) struct ModerationRequest {
    actor: UserId,
    tenant: TenantId,
    #[serde(flatten)]
    action: Action,
}

#[debug_handler]
pub(crate) async fn moderate(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<ModerationRequest>,
) -> Json<Reply> {
    reply(run(&state, &id, request).await)
}

async fn run(state: &AppState, id: &str, request: ModerationRequest) -> RegistryResult<Value> {
    state
        .relay
        .registry()
        .authorize(id, request.actor, Role::Moderator)?;

    let moderation = &state.moderation;
    let tenant = request.tenant;
    Ok(match request.action {
        Action::Kick => moderation.kick(id, tenant).await.map(|_| Value::Null)?,
        Action::Ban => moderation.ban(id, tenant).await.map(|_| Value::Null)?,
        Action::Unban => moderation.unban(id, tenant).await.map(|_| Value::Null)?,
        Action::Mute { minutes } => {
            let duration = minutes.map(|minutes| Duration::from_secs(minutes.saturating_mul(60)));
            moderation.mute(id, tenant, duration).await?;
            Value::Null
        }
        Action::Unmute => moderation.unmute(id, tenant).await.map(|_| Value::Null)?,
        Action::Warn { reason } => json!({ "warnings": moderation.warn(id, tenant, &reason).await? }),
        Action::Unwarn { index } => json!({ "removed": moderation.unwarn(id, tenant, index).await? }),
    })
}

#[debug_handler]
pub(crate) async fn warnings(
    State(state): State<AppState>,
    Path((id, tenant)): Path<(String, TenantId)>,
) -> Json<Reply> {
    reply(state.relay.registry().warnings(&id, tenant))
}
