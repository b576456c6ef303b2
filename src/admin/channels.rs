use axum::{
    debug_handler,
    extract::{Path, State},
    http::header,
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::json;

use crate::{
    appresult::AppResult,
    error::RegistryError,
    platform::{ChannelId, TenantId, UserId},
    registry::{GlobalChannel, NewGlobalChannel, RegistryResult, Role, Visibility},
    AppState,
};

use super::{reply, Reply};

#[derive(Debug, Deserialize)]
pub(crate) struct ActorRequest {
    actor: UserId,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CreateRequest {
    actor: UserId,
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    visibility: Visibility,
    #[serde(default)]
    key_required: bool,
    key: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct LinkRequest {
    tenant: TenantId,
    channel: ChannelId,
    key: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct UnlinkRequest {
    tenant: TenantId,
    channel: ChannelId,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "setting", rename_all = "snake_case")]
pub(crate) enum Setting {
    Rules { rules: Vec<String> },
    /// `null` restores a default, `""` blanks it.
    Templates {
        #[serde(default)]
        prefix: Option<String>,
        #[serde(default)]
        suffix: Option<String>,
    },
    Description { description: String },
    Visibility { visibility: Visibility },
    Key { key: Option<String> },
}

#[derive(Debug, Deserialize)]
pub(crate) struct SettingsRequest {
    actor: UserId,
    #[serde(flatten)]
    setting: Setting,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "change", rename_all = "snake_case")]
pub(crate) enum StaffChange {
    AddCoOwner,
    RemoveCoOwner,
    AddModerator,
    RemoveModerator,
    TransferOwnership,
}

#[derive(Debug, Deserialize)]
pub(crate) struct StaffRequest {
    actor: UserId,
    user: UserId,
    #[serde(flatten)]
    change: StaffChange,
}

#[debug_handler]
pub(crate) async fn list(State(state): State<AppState>) -> Json<Reply> {
    let public: Vec<_> = state
        .relay
        .registry()
        .list_public()
        .into_iter()
        .map(GlobalChannel::redacted)
        .collect();
    reply(Ok(public))
}

#[debug_handler]
pub(crate) async fn show(State(state): State<AppState>, Path(id): Path<String>) -> Json<Reply> {
    let found = state.relay.registry().get(&id).map(GlobalChannel::redacted);
    reply(found.ok_or(RegistryError::NotFound(id)))
}

#[debug_handler]
pub(crate) async fn create(
    State(state): State<AppState>,
    Json(request): Json<CreateRequest>,
) -> Json<Reply> {
    let created = state
        .relay
        .registry()
        .create(NewGlobalChannel {
            name: request.name,
            description: request.description,
            visibility: request.visibility,
            key_required: request.key_required,
            key: request.key,
            owner: request.actor,
        })
        .await;
    reply(created.map(|gc| json!({ "id": gc.id })))
}

#[debug_handler]
pub(crate) async fn remove(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(ActorRequest { actor }): Json<ActorRequest>,
) -> Json<Reply> {
    reply(remove_owned(&state, &id, actor).await)
}

async fn remove_owned(state: &AppState, id: &str, actor: UserId) -> RegistryResult<()> {
    state.relay.registry().authorize(id, actor, Role::Owner)?;
    state.relay.delete_global(id).await
}

#[debug_handler]
pub(crate) async fn link(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(LinkRequest { tenant, channel, key }): Json<LinkRequest>,
) -> Json<Reply> {
    reply(
        state
            .relay
            .registry()
            .link(&id, tenant, channel, key.as_deref())
            .await,
    )
}

#[debug_handler]
pub(crate) async fn unlink(
    State(state): State<AppState>,
    Json(UnlinkRequest { tenant, channel }): Json<UnlinkRequest>,
) -> Json<Reply> {
    let unlinked = state.relay.registry().unlink(tenant, channel).await;
    if unlinked.is_ok() {
        state.relay.presenter().forget(channel);
    }
    reply(unlinked.map(|id| json!({ "id": id })))
}

#[debug_handler]
pub(crate) async fn unlink_tenant(
    State(state): State<AppState>,
    Path((id, tenant)): Path<(String, TenantId)>,
    Json(ActorRequest { actor }): Json<ActorRequest>,
) -> Json<Reply> {
    reply(remove_tenant(&state, &id, tenant, actor).await)
}

async fn remove_tenant(
    state: &AppState,
    id: &str,
    tenant: TenantId,
    actor: UserId,
) -> RegistryResult<()> {
    state.relay.registry().authorize(id, actor, Role::CoOwner)?;
    let channel = state.relay.registry().unlink_tenant(id, tenant).await?;
    state.relay.presenter().forget(channel);
    Ok(())
}

#[debug_handler]
pub(crate) async fn settings(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(SettingsRequest { actor, setting }): Json<SettingsRequest>,
) -> Json<Reply> {
    reply(apply_setting(&state, &id, actor, setting).await)
}

async fn apply_setting(
    state: &AppState,
    id: &str,
    actor: UserId,
    setting: Setting,
) -> RegistryResult<()> {
    let registry = state.relay.registry();
    registry.authorize(id, actor, Role::CoOwner)?;
    match setting {
        Setting::Rules { rules } => registry.set_rules(id, rules).await,
        Setting::Templates { prefix, suffix } => registry.set_templates(id, prefix, suffix).await,
        Setting::Description { description } => registry.set_description(id, description).await,
        Setting::Visibility { visibility } => registry.set_visibility(id, visibility).await,
        Setting::Key { key } => registry.set_key(id, key).await,
    }
}

#[debug_handler]
pub(crate) async fn staff(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(StaffRequest { actor, user, change }): Json<StaffRequest>,
) -> Json<Reply> {
    reply(apply_staff(&state, &id, actor, user, change).await)
}

async fn apply_staff(
    state: &AppState,
    id: &str,
    actor: UserId,
    user: UserId,
    change: StaffChange,
) -> RegistryResult<()> {
    let registry = state.relay.registry();
    let needed = match change {
        StaffChange::AddModerator | StaffChange::RemoveModerator => Role::CoOwner,
        _ => Role::Owner,
    };
    registry.authorize(id, actor, needed)?;
    match change {
        StaffChange::AddCoOwner => registry.add_co_owner(id, user).await,
        StaffChange::RemoveCoOwner => registry.remove_co_owner(id, user).await,
        StaffChange::AddModerator => registry.add_moderator(id, user).await,
        StaffChange::RemoveModerator => registry.remove_moderator(id, user).await,
        StaffChange::TransferOwnership => registry.transfer_ownership(id, user).await,
    }
}

#[debug_handler]
pub(crate) async fn snapshot(State(state): State<AppState>) -> AppResult<Response> {
    let body = serde_json::to_string_pretty(&state.relay.registry().snapshot())?;
    Ok(([(header::CONTENT_TYPE, "application/json")], body).into_response())
}
