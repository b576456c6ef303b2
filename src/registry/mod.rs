//! Durable record of global channels, their tenant links and moderation state.
//!
//! Reads are lock-free through concurrent maps. Writers serialize on one async lock,
//! mutate the forward link map and the reverse index together, then persist the full
//! snapshot before returning.

mod channel;
pub mod store;

use std::sync::Arc;

use dashmap::DashMap;
use rand::{distr::Alphanumeric, Rng};
use tokio::sync::Mutex;

pub use channel::{unix_now, GlobalChannel, Role, Visibility, DEFAULT_PREFIX, DEFAULT_SUFFIX};
pub use store::{MemoryStore, RegistryState, SnapshotStore, SqliteStore};

use crate::{
    error::{LinkConflict, RegistryError},
    platform::{ChannelId, TenantId, UserId},
};

const ID_LEN: usize = 8;

pub type RegistryResult<T> = Result<T, RegistryError>;

#[derive(Debug, Clone)]
pub struct NewGlobalChannel {
    pub name: String,
    pub description: String,
    pub visibility: Visibility,
    pub key_required: bool,
    pub key: Option<String>,
    pub owner: UserId,
}

pub struct ChannelRegistry {
    channels: DashMap<String, GlobalChannel>,
    by_channel: DashMap<ChannelId, String>,
    write: Mutex<()>,
    store: Arc<dyn SnapshotStore>,
}

fn generate_id() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(ID_LEN)
        .map(|byte| char::from(byte).to_ascii_lowercase())
        .collect()
}

impl ChannelRegistry {
    pub async fn load(store: Arc<dyn SnapshotStore>) -> anyhow::Result<Self> {
        let state = store.load_snapshot().await?;
        let registry = Self {
            channels: DashMap::new(),
            by_channel: DashMap::new(),
            write: Mutex::new(()),
            store,
        };

        for (id, mut gc) in state.channels {
            gc.linked_channels.retain(|tenant, channel| {
                if let Some(owner) = registry.by_channel.get(channel) {
                    tracing::warn!(%tenant, %channel, global = %id, other = %owner.as_str(), "dropping duplicate link");
                    return false;
                }
                registry.by_channel.insert(*channel, id.clone());
                true
            });
            registry.channels.insert(id, gc);
        }

        tracing::info!(channels = registry.channels.len(), "registry loaded");
        Ok(registry)
    }

    pub fn get(&self, id: &str) -> Option<GlobalChannel> {
        self.channels.get(id).map(|gc| gc.clone())
    }

    pub fn global_for_channel(&self, channel: ChannelId) -> Option<GlobalChannel> {
        let id = self.by_channel.get(&channel)?.clone();
        self.get(&id)
    }

    pub fn tenant_for_channel(&self, channel: ChannelId) -> Option<TenantId> {
        self.global_for_channel(channel)?.tenant_of(channel)
    }

    pub fn list_public(&self) -> Vec<GlobalChannel> {
        let mut public: Vec<_> = self
            .channels
            .iter()
            .filter(|gc| gc.visibility == Visibility::Public)
            .map(|gc| gc.clone())
            .collect();
        public.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        public
    }

    pub fn snapshot(&self) -> RegistryState {
        RegistryState {
            channels: self
                .channels
                .iter()
                .map(|gc| (gc.key().clone(), gc.value().clone()))
                .collect(),
        }
    }

    /// Checks that `actor` holds at least `min` on the channel.
    pub fn authorize(&self, id: &str, actor: UserId, min: Role) -> RegistryResult<GlobalChannel> {
        let gc = self
            .get(id)
            .ok_or_else(|| RegistryError::NotFound(id.to_owned()))?;
        if gc.role_of(actor) < min {
            return Err(RegistryError::NotAuthorized);
        }
        Ok(gc)
    }

    async fn persist(&self, state: &RegistryState) -> RegistryResult<()> {
        if let Err(err) = self.store.save_snapshot(state).await {
            tracing::error!(error = %err, "failed to persist registry snapshot");
            return Err(err.into());
        }
        Ok(())
    }

    /// Caller holds the write lock. Saves the snapshot with `id` replaced by `next`
    /// (removed when `None`) and only then makes the change visible to readers.
    async fn publish(&self, id: &str, next: Option<GlobalChannel>) -> RegistryResult<()> {
        let mut state = self.snapshot();
        match &next {
            Some(gc) => state.channels.insert(id.to_owned(), gc.clone()),
            None => state.channels.remove(id),
        };
        self.persist(&state).await?;

        let before: Vec<ChannelId> = self
            .channels
            .get(id)
            .map(|gc| gc.linked_channels.values().copied().collect())
            .unwrap_or_default();
        let after: Vec<ChannelId> = next
            .as_ref()
            .map(|gc| gc.linked_channels.values().copied().collect())
            .unwrap_or_default();

        for channel in before.iter().filter(|channel| !after.contains(channel)) {
            self.by_channel.remove_if(channel, |_, owner| owner == id);
        }
        match next {
            Some(gc) => {
                self.channels.insert(id.to_owned(), gc);
            }
            None => {
                self.channels.remove(id);
            }
        }
        for channel in after {
            self.by_channel.insert(channel, id.to_owned());
        }
        Ok(())
    }

    /// Caller holds the write lock. `change` works on a copy; nothing is visible until it is saved.
    async fn commit<T>(
        &self,
        id: &str,
        change: impl FnOnce(&mut GlobalChannel) -> RegistryResult<T>,
    ) -> RegistryResult<T> {
        let mut gc = self
            .get(id)
            .ok_or_else(|| RegistryError::NotFound(id.to_owned()))?;
        let out = change(&mut gc)?;
        self.publish(id, Some(gc)).await?;
        Ok(out)
    }

    async fn mutate<T>(
        &self,
        id: &str,
        change: impl FnOnce(&mut GlobalChannel) -> RegistryResult<T>,
    ) -> RegistryResult<T> {
        let _write = self.write.lock().await;
        self.commit(id, change).await
    }

    pub async fn create(&self, new: NewGlobalChannel) -> RegistryResult<GlobalChannel> {
        let name = new.name.trim();
        if name.is_empty() {
            return Err(RegistryError::invalid("a global channel needs a name"));
        }
        let key = new.key.filter(|key| !key.is_empty());
        if new.key_required && key.is_none() {
            return Err(RegistryError::invalid("a key is required for a protected channel"));
        }

        let _write = self.write.lock().await;
        let id = loop {
            let id = generate_id();
            if !self.channels.contains_key(&id) {
                break id;
            }
        };

        let mut gc = GlobalChannel::new(id.clone(), name.to_owned(), new.owner);
        gc.description = new.description;
        gc.visibility = new.visibility;
        gc.key_required = new.key_required;
        gc.key = key;
        self.publish(&id, Some(gc.clone())).await?;

        tracing::info!(global = %id, owner = %new.owner, "global channel created");
        Ok(gc)
    }

    /// Removes the channel and its reverse-index entries; returns the channels that were linked.
    pub async fn delete(&self, id: &str) -> RegistryResult<Vec<ChannelId>> {
        let _write = self.write.lock().await;
        let gc = self
            .get(id)
            .ok_or_else(|| RegistryError::NotFound(id.to_owned()))?;
        self.publish(id, None).await?;

        let unlinked: Vec<ChannelId> = gc.linked_channels.values().copied().collect();
        tracing::info!(global = %id, unlinked = unlinked.len(), "global channel deleted");
        Ok(unlinked)
    }

    pub async fn link(
        &self,
        id: &str,
        tenant: TenantId,
        channel: ChannelId,
        key: Option<&str>,
    ) -> RegistryResult<()> {
        self.mutate(id, |gc| {
            if let Some(owner) = self.by_channel.get(&channel) {
                let conflict = if *owner == gc.id {
                    LinkConflict::TenantLinked
                } else {
                    LinkConflict::ChannelInUse
                };
                return Err(RegistryError::AlreadyLinked(conflict));
            }
            if gc.linked_channels.contains_key(&tenant) {
                return Err(RegistryError::AlreadyLinked(LinkConflict::TenantLinked));
            }
            if gc.banned_tenants.contains(&tenant) {
                return Err(RegistryError::Banned);
            }
            if !gc.accepts_key(key) {
                return Err(RegistryError::KeyMismatch);
            }

            gc.linked_channels.insert(tenant, channel);
            tracing::info!(global = %gc.id, %tenant, %channel, "tenant linked");
            Ok(())
        })
        .await
    }

    /// Tenant-initiated unlink. Returns the id of the global channel it left.
    pub async fn unlink(&self, tenant: TenantId, channel: ChannelId) -> RegistryResult<String> {
        let _write = self.write.lock().await;
        let id = self
            .by_channel
            .get(&channel)
            .map(|owner| owner.clone())
            .ok_or(RegistryError::LinkNotFound)?;

        self.commit(&id, |gc| {
            if gc.linked_channels.get(&tenant) != Some(&channel) {
                return Err(RegistryError::LinkNotFound);
            }
            gc.linked_channels.remove(&tenant);
            Ok(())
        })
        .await?;

        tracing::info!(global = %id, %tenant, %channel, "tenant unlinked");
        Ok(id)
    }

    /// Owner-initiated unlink. Returns the channel that was linked.
    pub async fn unlink_tenant(&self, id: &str, tenant: TenantId) -> RegistryResult<ChannelId> {
        self.mutate(id, |gc| {
            gc.linked_channels
                .remove(&tenant)
                .ok_or(RegistryError::LinkNotFound)
        })
        .await
    }

    /// Bans the tenant, unlinking it first when linked.
    pub async fn ban(&self, id: &str, tenant: TenantId) -> RegistryResult<Option<ChannelId>> {
        self.mutate(id, |gc| {
            if gc.banned_tenants.contains(&tenant) {
                return Err(RegistryError::invalid("that server is already banned"));
            }
            let unlinked = gc.linked_channels.remove(&tenant);
            gc.banned_tenants.insert(tenant);
            Ok(unlinked)
        })
        .await
    }

    pub async fn unban(&self, id: &str, tenant: TenantId) -> RegistryResult<()> {
        self.mutate(id, |gc| {
            if !gc.banned_tenants.remove(&tenant) {
                return Err(RegistryError::invalid("that server is not banned"));
            }
            Ok(())
        })
        .await
    }

    /// `until` is unix seconds; zero or negative mutes permanently.
    pub async fn mute(&self, id: &str, tenant: TenantId, until: i64) -> RegistryResult<()> {
        self.mutate(id, |gc| {
            gc.muted_tenants.insert(tenant, until);
            Ok(())
        })
        .await
    }

    pub async fn unmute(&self, id: &str, tenant: TenantId) -> RegistryResult<()> {
        self.mutate(id, |gc| {
            if gc.muted_tenants.remove(&tenant).is_none() {
                return Err(RegistryError::invalid("that server is not muted"));
            }
            Ok(())
        })
        .await
    }

    /// Records a warning and returns how many the tenant now has.
    pub async fn warn(&self, id: &str, tenant: TenantId, reason: &str) -> RegistryResult<usize> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(RegistryError::invalid("a warning needs a reason"));
        }
        self.mutate(id, |gc| {
            let warnings = gc.warnings.entry(tenant).or_default();
            warnings.push(reason.to_owned());
            Ok(warnings.len())
        })
        .await
    }

    /// Removes the warning at `index` and returns its reason.
    pub async fn unwarn(&self, id: &str, tenant: TenantId, index: usize) -> RegistryResult<String> {
        self.mutate(id, |gc| {
            let warnings = gc
                .warnings
                .get_mut(&tenant)
                .filter(|warnings| index < warnings.len())
                .ok_or_else(|| RegistryError::invalid("no warning at that position"))?;
            let reason = warnings.remove(index);
            if warnings.is_empty() {
                gc.warnings.remove(&tenant);
            }
            Ok(reason)
        })
        .await
    }

    pub fn warnings(&self, id: &str, tenant: TenantId) -> RegistryResult<Vec<String>> {
        let gc = self
            .channels
            .get(id)
            .ok_or_else(|| RegistryError::NotFound(id.to_owned()))?;
        Ok(gc.warnings.get(&tenant).cloned().unwrap_or_default())
    }

    pub async fn set_rules(&self, id: &str, rules: Vec<String>) -> RegistryResult<()> {
        let rules: Vec<String> = rules
            .into_iter()
            .map(|rule| rule.trim().to_owned())
            .filter(|rule| !rule.is_empty())
            .collect();
        self.mutate(id, |gc| {
            gc.rules = rules;
            Ok(())
        })
        .await
    }

    pub async fn set_templates(
        &self,
        id: &str,
        prefix: Option<String>,
        suffix: Option<String>,
    ) -> RegistryResult<()> {
        self.mutate(id, |gc| {
            gc.prefix = prefix;
            gc.suffix = suffix;
            Ok(())
        })
        .await
    }

    pub async fn set_description(&self, id: &str, description: String) -> RegistryResult<()> {
        self.mutate(id, |gc| {
            gc.description = description;
            Ok(())
        })
        .await
    }

    pub async fn set_visibility(&self, id: &str, visibility: Visibility) -> RegistryResult<()> {
        self.mutate(id, |gc| {
            gc.visibility = visibility;
            Ok(())
        })
        .await
    }

    /// `None` opens the channel; `Some` requires the key from now on.
    pub async fn set_key(&self, id: &str, key: Option<String>) -> RegistryResult<()> {
        let key = key.filter(|key| !key.is_empty());
        self.mutate(id, |gc| {
            gc.key_required = key.is_some();
            gc.key = key;
            Ok(())
        })
        .await
    }

    pub async fn add_co_owner(&self, id: &str, user: UserId) -> RegistryResult<()> {
        self.mutate(id, |gc| {
            if user == gc.owner || !gc.co_owners.insert(user) {
                return Err(RegistryError::invalid("that user is already a co-owner"));
            }
            Ok(())
        })
        .await
    }

    pub async fn remove_co_owner(&self, id: &str, user: UserId) -> RegistryResult<()> {
        self.mutate(id, |gc| {
            if !gc.co_owners.remove(&user) {
                return Err(RegistryError::invalid("that user is not a co-owner"));
            }
            Ok(())
        })
        .await
    }

    pub async fn add_moderator(&self, id: &str, user: UserId) -> RegistryResult<()> {
        self.mutate(id, |gc| {
            if user == gc.owner || !gc.moderators.insert(user) {
                return Err(RegistryError::invalid("that user is already a moderator"));
            }
            Ok(())
        })
        .await
    }

    pub async fn remove_moderator(&self, id: &str, user: UserId) -> RegistryResult<()> {
        self.mutate(id, |gc| {
            if !gc.moderators.remove(&user) {
                return Err(RegistryError::invalid("that user is not a moderator"));
            }
            Ok(())
        })
        .await
    }

    pub async fn transfer_ownership(&self, id: &str, user: UserId) -> RegistryResult<()> {
        self.mutate(id, |gc| {
            if user == gc.owner {
                return Err(RegistryError::invalid("that user already owns the channel"));
            }
            gc.co_owners.remove(&user);
            gc.moderators.remove(&user);
            gc.owner = user;
            Ok(())
        })
        .await
    }

    /// Drops mutes whose expiry has passed. Persists only when something changed.
    pub async fn sweep_expired_mutes(&self, now: i64) -> RegistryResult<usize> {
        let _write = self.write.lock().await;
        let mut swept = 0;
        let mut changed = Vec::new();
        for gc in self.channels.iter() {
            let mut next = gc.clone();
            next.muted_tenants.retain(|_, until| *until <= 0 || *until > now);
            let removed = gc.muted_tenants.len() - next.muted_tenants.len();
            if removed > 0 {
                swept += removed;
                changed.push(next);
            }
        }
        if changed.is_empty() {
            return Ok(0);
        }

        let mut state = self.snapshot();
        for gc in &changed {
            state.channels.insert(gc.id.clone(), gc.clone());
        }
        self.persist(&state).await?;
        for gc in changed {
            self.channels.insert(gc.id.clone(), gc);
        }

        tracing::debug!(swept, "expired mutes removed");
        Ok(swept)
    }
}
