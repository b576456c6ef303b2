pub mod http;
pub mod memory;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

macro_rules! snowflake {
    ($($name:ident),* $(,)?) => {
        $(
            #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
            #[serde(transparent)]
            pub struct $name(pub u64);

            impl fmt::Display for $name {
                fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                    write!(f, "{}", self.0)
                }
            }
        )*
    };
}

snowflake!(TenantId, ChannelId, MessageId, UserId);

/// A channel inside a specific tenant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TenantChannel {
    pub tenant: TenantId,
    pub channel: ChannelId,
}

impl TenantChannel {
    pub fn new(tenant: TenantId, channel: ChannelId) -> Self {
        Self { tenant, channel }
    }
}

/// Handle that lets the service post under an arbitrary name and avatar in one channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: u64,
    pub channel: ChannelId,
    pub token: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    ManageIdentities,
    ViewChannel,
    SendMessages,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Author {
    pub id: UserId,
    pub username: String,
    pub display_name: Option<String>,
    pub pronouns: Option<String>,
    pub avatar_url: Option<String>,
}

impl Author {
    pub fn shown_name(&self) -> &str {
        self.display_name
            .as_deref()
            .filter(|name| !name.trim().is_empty())
            .unwrap_or(&self.username)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutgoingMessage {
    pub username: String,
    pub avatar_url: Option<String>,
    pub content: String,
}

/// Everything the engine needs from the chat platform.
///
/// Every call is a suspension point; the engine never holds a map guard across one.
#[async_trait]
pub trait Platform: Send + Sync + 'static {
    async fn send_as(
        &self,
        identity: &Identity,
        channel: ChannelId,
        message: &OutgoingMessage,
    ) -> anyhow::Result<MessageId>;

    /// Finds the identity named `reserved_name` in `channel`, creating it when absent.
    async fn get_or_create_identity(
        &self,
        channel: ChannelId,
        reserved_name: &str,
    ) -> anyhow::Result<Identity>;

    async fn delete_message_as(
        &self,
        identity: &Identity,
        channel: ChannelId,
        message: MessageId,
    ) -> anyhow::Result<()>;

    async fn add_reaction_as(
        &self,
        identity: &Identity,
        channel: ChannelId,
        message: MessageId,
        emoji: &str,
    ) -> anyhow::Result<()>;

    async fn add_reaction(
        &self,
        channel: ChannelId,
        message: MessageId,
        emoji: &str,
    ) -> anyhow::Result<()>;

    async fn delete_message(&self, channel: ChannelId, message: MessageId) -> anyhow::Result<()>;

    async fn send_message(&self, channel: ChannelId, content: &str) -> anyhow::Result<MessageId>;

    /// Direct message to the administrator of `tenant`.
    async fn notify_tenant_owner(&self, tenant: TenantId, content: &str) -> anyhow::Result<()>;

    async fn resolve_tenant_display_name(&self, tenant: TenantId) -> Option<String>;

    fn has_capability(&self, channel: ChannelId, capability: Capability) -> bool;

    fn message_link(&self, tenant: TenantId, channel: ChannelId, message: MessageId) -> String;
}
