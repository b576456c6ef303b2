//! Platform adapter speaking JSON to a gateway sidecar that owns the real chat connection.

use std::collections::HashSet;

use anyhow::Context;
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use super::{Capability, ChannelId, Identity, MessageId, OutgoingMessage, Platform, TenantId};

#[derive(Deserialize)]
struct Created {
    id: MessageId,
}

#[derive(Deserialize)]
struct TenantInfo {
    name: Option<String>,
}

#[derive(Serialize)]
struct ContentBody<'a> {
    content: &'a str,
}

#[derive(Serialize)]
struct EmojiBody<'a> {
    emoji: &'a str,
}

#[derive(Serialize)]
struct IdentityRequest<'a> {
    name: &'a str,
}

#[derive(Serialize)]
struct SendAsBody<'a> {
    token: &'a str,
    channel: ChannelId,
    #[serde(flatten)]
    message: &'a OutgoingMessage,
}

#[derive(Serialize)]
struct TokenBody<'a> {
    token: &'a str,
}

#[derive(Serialize)]
struct TokenEmojiBody<'a> {
    token: &'a str,
    emoji: &'a str,
}

pub struct HttpPlatform {
    base: String,
    link_base: String,
    client: reqwest::Client,
    /// Capabilities granted to the service per channel, pushed by the gateway.
    capabilities: DashMap<ChannelId, HashSet<Capability>>,
}

impl HttpPlatform {
    pub fn new(base: &str) -> anyhow::Result<Self> {
        let client = reqwest::ClientBuilder::new()
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        let base = base.trim_end_matches('/').to_owned();
        Ok(Self {
            link_base: format!("{base}/channels"),
            base,
            client,
            capabilities: DashMap::new(),
        })
    }

    pub fn with_link_base(mut self, link_base: &str) -> Self {
        self.link_base = link_base.trim_end_matches('/').to_owned();
        self
    }

    pub fn update_capabilities(&self, channel: ChannelId, granted: HashSet<Capability>) {
        self.capabilities.insert(channel, granted);
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base)
    }
}

#[async_trait]
impl Platform for HttpPlatform {
    async fn send_as(
        &self,
        identity: &Identity,
        channel: ChannelId,
        message: &OutgoingMessage,
    ) -> anyhow::Result<MessageId> {
        let created: Created = self
            .client
            .post(self.url(&format!("/identities/{}/messages", identity.id)))
            .json(&SendAsBody {
                token: &identity.token,
                channel,
                message,
            })
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(created.id)
    }

    async fn get_or_create_identity(
        &self,
        channel: ChannelId,
        reserved_name: &str,
    ) -> anyhow::Result<Identity> {
        let identity = self
            .client
            .put(self.url(&format!("/channels/{channel}/identities")))
            .json(&IdentityRequest { name: reserved_name })
            .send()
            .await?
            .error_for_status()
            .with_context(|| format!("identity for channel {channel}"))?
            .json()
            .await?;
        Ok(identity)
    }

    async fn delete_message_as(
        &self,
        identity: &Identity,
        channel: ChannelId,
        message: MessageId,
    ) -> anyhow::Result<()> {
        self.client
            .delete(self.url(&format!(
                "/identities/{}/channels/{channel}/messages/{message}",
                identity.id
            )))
            .json(&TokenBody { token: &identity.token })
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn add_reaction_as(
        &self,
        identity: &Identity,
        channel: ChannelId,
        message: MessageId,
        emoji: &str,
    ) -> anyhow::Result<()> {
        self.client
            .post(self.url(&format!(
                "/identities/{}/channels/{channel}/messages/{message}/reactions",
                identity.id
            )))
            .json(&TokenEmojiBody {
                token: &identity.token,
                emoji,
            })
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn add_reaction(
        &self,
        channel: ChannelId,
        message: MessageId,
        emoji: &str,
    ) -> anyhow::Result<()> {
        self.client
            .post(self.url(&format!("/channels/{channel}/messages/{message}/reactions")))
            .json(&EmojiBody { emoji })
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn delete_message(&self, channel: ChannelId, message: MessageId) -> anyhow::Result<()> {
        self.client
            .delete(self.url(&format!("/channels/{channel}/messages/{message}")))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn send_message(&self, channel: ChannelId, content: &str) -> anyhow::Result<MessageId> {
        let created: Created = self
            .client
            .post(self.url(&format!("/channels/{channel}/messages")))
            .json(&ContentBody { content })
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(created.id)
    }

    async fn notify_tenant_owner(&self, tenant: TenantId, content: &str) -> anyhow::Result<()> {
        self.client
            .post(self.url(&format!("/tenants/{tenant}/owner/messages")))
            .json(&ContentBody { content })
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn resolve_tenant_display_name(&self, tenant: TenantId) -> Option<String> {
        let response = self
            .client
            .get(self.url(&format!("/tenants/{tenant}")))
            .send()
            .await
            .and_then(|response| response.error_for_status());

        match response {
            Ok(response) => response.json::<TenantInfo>().await.ok().and_then(|info| info.name),
            Err(err) => {
                tracing::debug!(%tenant, error = %err, "tenant lookup failed");
                None
            }
        }
    }

    fn has_capability(&self, channel: ChannelId, capability: Capability) -> bool {
        // Channels the gateway never reported on are assumed usable; a failed send evicts.
        self.capabilities
            .get(&channel)
            .is_none_or(|granted| granted.contains(&capability))
    }

    fn message_link(&self, tenant: TenantId, channel: ChannelId, message: MessageId) -> String {
        format!("{}/{tenant}/{channel}/{message}", self.link_base)
    }
}
