//! In-process platform used by tests and local runs.
//!
//! Behaves like the real thing where the engine cares: identities are looked up by
//! name, only the identity that posted a message may delete it, missing capabilities
//! make identity creation fail, and channels can be told to reject sends.

use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicU64, Ordering},
        Mutex, MutexGuard, PoisonError,
    },
};

use anyhow::{anyhow, bail};
use async_trait::async_trait;
use dashmap::{DashMap, DashSet};

use super::{Capability, ChannelId, Identity, MessageId, OutgoingMessage, Platform, TenantId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMessage {
    pub id: MessageId,
    pub channel: ChannelId,
    pub username: String,
    pub content: String,
    /// Identity that posted it; `None` for plain messages.
    pub identity: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reaction {
    pub channel: ChannelId,
    pub message: MessageId,
    pub emoji: String,
    pub via_identity: bool,
}

pub struct MemoryPlatform {
    next_id: AtomicU64,
    tenants: DashMap<TenantId, String>,
    denied: DashMap<ChannelId, HashSet<Capability>>,
    identities: DashMap<ChannelId, Vec<(String, Identity)>>,
    messages: DashMap<MessageId, StoredMessage>,
    failing: DashSet<ChannelId>,
    created_identities: AtomicU64,
    deletions: Mutex<Vec<(ChannelId, MessageId)>>,
    reactions: Mutex<Vec<Reaction>>,
    owner_dms: Mutex<Vec<(TenantId, String)>>,
}

fn locked<T>(log: &Mutex<Vec<T>>) -> MutexGuard<'_, Vec<T>> {
    log.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Default for MemoryPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryPlatform {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1000),
            tenants: DashMap::new(),
            denied: DashMap::new(),
            identities: DashMap::new(),
            messages: DashMap::new(),
            failing: DashSet::new(),
            created_identities: AtomicU64::new(0),
            deletions: Mutex::new(Vec::new()),
            reactions: Mutex::new(Vec::new()),
            owner_dms: Mutex::new(Vec::new()),
        }
    }

    fn next(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn add_tenant(&self, tenant: TenantId, name: &str) {
        self.tenants.insert(tenant, name.to_owned());
    }

    pub fn deny(&self, channel: ChannelId, capability: Capability) {
        self.denied.entry(channel).or_default().insert(capability);
    }

    pub fn grant_all(&self, channel: ChannelId) {
        self.denied.remove(&channel);
    }

    pub fn fail_sends(&self, channel: ChannelId) {
        self.failing.insert(channel);
    }

    pub fn heal(&self, channel: ChannelId) {
        self.failing.remove(&channel);
    }

    /// Simulates a user posting in `channel`.
    pub fn post(&self, channel: ChannelId, username: &str, content: &str) -> MessageId {
        let id = MessageId(self.next());
        self.messages.insert(
            id,
            StoredMessage {
                id,
                channel,
                username: username.to_owned(),
                content: content.to_owned(),
                identity: None,
            },
        );
        id
    }

    /// Simulates a user removing their own message.
    pub fn remove(&self, message: MessageId) -> Option<StoredMessage> {
        self.messages.remove(&message).map(|(_, stored)| stored)
    }

    pub fn message(&self, message: MessageId) -> Option<StoredMessage> {
        self.messages.get(&message).map(|stored| stored.clone())
    }

    pub fn messages_in(&self, channel: ChannelId) -> Vec<StoredMessage> {
        let mut found: Vec<_> = self
            .messages
            .iter()
            .filter(|stored| stored.channel == channel)
            .map(|stored| stored.clone())
            .collect();
        found.sort_by_key(|stored| stored.id);
        found
    }

    /// Every delete attempt, successful or not.
    pub fn deletions(&self) -> Vec<(ChannelId, MessageId)> {
        locked(&self.deletions).clone()
    }

    pub fn reactions(&self) -> Vec<Reaction> {
        locked(&self.reactions).clone()
    }

    pub fn owner_dms(&self) -> Vec<(TenantId, String)> {
        locked(&self.owner_dms).clone()
    }

    pub fn identities_created(&self) -> u64 {
        self.created_identities.load(Ordering::Relaxed)
    }

    fn allowed(&self, channel: ChannelId, capability: Capability) -> bool {
        self.denied
            .get(&channel)
            .is_none_or(|denied| !denied.contains(&capability))
    }

    fn check_identity(&self, identity: &Identity, channel: ChannelId) -> anyhow::Result<()> {
        let known = self.identities.get(&channel).is_some_and(|entries| {
            entries.iter().any(|(_, known)| known == identity)
        });
        if !known {
            bail!("unknown identity {} for channel {channel}", identity.id);
        }
        Ok(())
    }
}

#[async_trait]
impl Platform for MemoryPlatform {
    async fn send_as(
        &self,
        identity: &Identity,
        channel: ChannelId,
        message: &OutgoingMessage,
    ) -> anyhow::Result<MessageId> {
        self.check_identity(identity, channel)?;
        if self.failing.contains(&channel) {
            bail!("channel {channel} rejected the message");
        }

        let id = MessageId(self.next());
        self.messages.insert(
            id,
            StoredMessage {
                id,
                channel,
                username: message.username.clone(),
                content: message.content.clone(),
                identity: Some(identity.id),
            },
        );
        Ok(id)
    }

    async fn get_or_create_identity(
        &self,
        channel: ChannelId,
        reserved_name: &str,
    ) -> anyhow::Result<Identity> {
        if !self.allowed(channel, Capability::ManageIdentities) {
            bail!("missing permission to manage identities in {channel}");
        }

        let mut entries = self.identities.entry(channel).or_default();
        if let Some((_, identity)) = entries.iter().find(|(name, _)| name == reserved_name) {
            return Ok(identity.clone());
        }

        let id = self.next();
        let identity = Identity {
            id,
            channel,
            token: format!("token-{id}"),
        };
        entries.push((reserved_name.to_owned(), identity.clone()));
        self.created_identities.fetch_add(1, Ordering::Relaxed);
        Ok(identity)
    }

    async fn delete_message_as(
        &self,
        identity: &Identity,
        channel: ChannelId,
        message: MessageId,
    ) -> anyhow::Result<()> {
        locked(&self.deletions).push((channel, message));
        self.check_identity(identity, channel)?;

        match self.messages.remove_if(&message, |_, stored| {
            stored.channel == channel && stored.identity == Some(identity.id)
        }) {
            Some(_) => Ok(()),
            None => Err(anyhow!("message {message} not owned by identity {}", identity.id)),
        }
    }

    async fn add_reaction_as(
        &self,
        identity: &Identity,
        channel: ChannelId,
        message: MessageId,
        emoji: &str,
    ) -> anyhow::Result<()> {
        self.check_identity(identity, channel)?;
        if !self.messages.contains_key(&message) {
            bail!("unknown message {message}");
        }
        locked(&self.reactions).push(Reaction {
            channel,
            message,
            emoji: emoji.to_owned(),
            via_identity: true,
        });
        Ok(())
    }

    async fn add_reaction(
        &self,
        channel: ChannelId,
        message: MessageId,
        emoji: &str,
    ) -> anyhow::Result<()> {
        if !self.messages.contains_key(&message) {
            bail!("unknown message {message}");
        }
        locked(&self.reactions).push(Reaction {
            channel,
            message,
            emoji: emoji.to_owned(),
            via_identity: false,
        });
        Ok(())
    }

    async fn delete_message(&self, channel: ChannelId, message: MessageId) -> anyhow::Result<()> {
        locked(&self.deletions).push((channel, message));
        match self
            .messages
            .remove_if(&message, |_, stored| stored.channel == channel)
        {
            Some(_) => Ok(()),
            None => Err(anyhow!("unknown message {message} in {channel}")),
        }
    }

    async fn send_message(&self, channel: ChannelId, content: &str) -> anyhow::Result<MessageId> {
        if !self.allowed(channel, Capability::SendMessages) {
            bail!("missing permission to send in {channel}");
        }
        let id = MessageId(self.next());
        self.messages.insert(
            id,
            StoredMessage {
                id,
                channel,
                username: "service".to_owned(),
                content: content.to_owned(),
                identity: None,
            },
        );
        Ok(id)
    }

    async fn notify_tenant_owner(&self, tenant: TenantId, content: &str) -> anyhow::Result<()> {
        locked(&self.owner_dms).push((tenant, content.to_owned()));
        Ok(())
    }

    async fn resolve_tenant_display_name(&self, tenant: TenantId) -> Option<String> {
        self.tenants.get(&tenant).map(|name| name.clone())
    }

    fn has_capability(&self, channel: ChannelId, capability: Capability) -> bool {
        self.allowed(channel, capability)
    }

    fn message_link(&self, tenant: TenantId, channel: ChannelId, message: MessageId) -> String {
        format!("https://chat.invalid/channels/{tenant}/{channel}/{message}")
    }
}
