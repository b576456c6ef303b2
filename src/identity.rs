//! Per-channel presentation identities and the permission preflight in front of them.
//!
//! A slot is absent when no identity was created yet, `Ready` when one is cached,
//! and `Denied` when the last preflight failed; `Denied` remembers when the tenant
//! was last warned so warnings go out at most once per cooldown window.

use std::{sync::Arc, time::Duration};

use dashmap::{mapref::entry::Entry, DashMap};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::{
    error::RelayError,
    platform::{Capability, ChannelId, Identity, Platform, TenantChannel},
};

pub const REQUIRED_CAPABILITIES: [Capability; 2] =
    [Capability::ManageIdentities, Capability::ViewChannel];

#[derive(Debug, Clone)]
enum Slot {
    Ready(Identity),
    Denied { warned_at: Instant },
}

pub struct IdentityPresenter {
    platform: Arc<dyn Platform>,
    reserved_name: String,
    cooldown: Duration,
    slots: DashMap<ChannelId, Slot>,
}

impl IdentityPresenter {
    pub fn new(platform: Arc<dyn Platform>, reserved_name: &str, cooldown: Duration) -> Self {
        Self {
            platform,
            reserved_name: reserved_name.to_owned(),
            cooldown,
            slots: DashMap::new(),
        }
    }

    /// The identity to post with in `target`, or `None` when the message must be dropped.
    pub async fn acquire(&self, target: TenantChannel) -> Option<Identity> {
        if let Some(identity) = self.cached(target.channel) {
            return Some(identity);
        }

        if let Err(err) = self.preflight(target.channel) {
            debug!(tenant = %target.tenant, channel = %target.channel, error = %err, "dropping relay");
            self.warn_missing(target).await;
            return None;
        }

        match self
            .platform
            .get_or_create_identity(target.channel, &self.reserved_name)
            .await
        {
            Ok(identity) => {
                self.slots.insert(target.channel, Slot::Ready(identity.clone()));
                Some(identity)
            }
            Err(err) => {
                let err = RelayError::WebhookFailure(err);
                warn!(tenant = %target.tenant, channel = %target.channel, error = %err, "identity unavailable");
                self.invalidate(target.channel);
                None
            }
        }
    }

    pub fn cached(&self, channel: ChannelId) -> Option<Identity> {
        match self.slots.get(&channel).as_deref() {
            Some(Slot::Ready(identity)) => Some(identity.clone()),
            _ => None,
        }
    }

    pub fn preflight(&self, channel: ChannelId) -> Result<(), RelayError> {
        let granted = REQUIRED_CAPABILITIES
            .iter()
            .all(|capability| self.platform.has_capability(channel, *capability));
        if !granted {
            return Err(RelayError::PermissionDenied(channel));
        }
        Ok(())
    }

    /// Drops a cached identity so the next message recreates it. Warning state is kept.
    pub fn invalidate(&self, channel: ChannelId) {
        self.slots
            .remove_if(&channel, |_, slot| matches!(slot, Slot::Ready(_)));
    }

    pub fn forget(&self, channel: ChannelId) {
        self.slots.remove(&channel);
    }

    async fn warn_missing(&self, target: TenantChannel) {
        let now = Instant::now();
        let due = match self.slots.entry(target.channel) {
            Entry::Occupied(mut slot) => {
                let cooling = matches!(
                    slot.get(),
                    Slot::Denied { warned_at } if now.duration_since(*warned_at) < self.cooldown
                );
                if !cooling {
                    slot.insert(Slot::Denied { warned_at: now });
                }
                !cooling
            }
            Entry::Vacant(slot) => {
                slot.insert(Slot::Denied { warned_at: now });
                true
            }
        };
        if !due {
            return;
        }

        let notice = format!(
            "Global chat cannot deliver messages to channel {}: the service needs permission to \
             view the channel and manage webhooks there.",
            target.channel
        );

        let can_speak = self.platform.has_capability(target.channel, Capability::ViewChannel)
            && self.platform.has_capability(target.channel, Capability::SendMessages);
        if can_speak {
            match self.platform.send_message(target.channel, &notice).await {
                Ok(_) => return,
                Err(err) => debug!(channel = %target.channel, error = %err, "in-channel warning failed"),
            }
        }

        if let Err(err) = self.platform.notify_tenant_owner(target.tenant, &notice).await {
            warn!(tenant = %target.tenant, error = %err, "could not warn tenant owner");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::{memory::MemoryPlatform, TenantId};

    fn presenter(platform: &Arc<MemoryPlatform>) -> IdentityPresenter {
        IdentityPresenter::new(platform.clone(), "GlobalChat", Duration::from_secs(300))
    }

    fn target() -> TenantChannel {
        TenantChannel::new(TenantId(1), ChannelId(10))
    }

    #[tokio::test]
    async fn identities_are_created_once_and_cached() {
        let platform = Arc::new(MemoryPlatform::new());
        let presenter = presenter(&platform);

        let first = presenter.acquire(target()).await.unwrap();
        let second = presenter.acquire(target()).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(platform.identities_created(), 1);

        presenter.invalidate(ChannelId(10));
        assert!(presenter.cached(ChannelId(10)).is_none());
        // The platform hands back the identity registered under the reserved name.
        assert_eq!(presenter.acquire(target()).await.unwrap(), first);
        assert_eq!(platform.identities_created(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_permissions_warn_once_per_window() {
        let platform = Arc::new(MemoryPlatform::new());
        platform.deny(ChannelId(10), Capability::ManageIdentities);
        let presenter = presenter(&platform);

        for _ in 0..5 {
            assert!(presenter.acquire(target()).await.is_none());
        }
        assert_eq!(platform.identities_created(), 0);
        assert_eq!(platform.messages_in(ChannelId(10)).len(), 1);

        tokio::time::advance(Duration::from_secs(301)).await;
        assert!(presenter.acquire(target()).await.is_none());
        assert_eq!(platform.messages_in(ChannelId(10)).len(), 2);
        assert!(platform.owner_dms().is_empty());
    }

    #[tokio::test]
    async fn warnings_fall_back_to_the_tenant_owner() {
        let platform = Arc::new(MemoryPlatform::new());
        platform.deny(ChannelId(10), Capability::ViewChannel);
        let presenter = presenter(&platform);

        assert!(presenter.acquire(target()).await.is_none());
        assert!(presenter.acquire(target()).await.is_none());
        assert!(platform.messages_in(ChannelId(10)).is_empty());
        assert_eq!(platform.owner_dms().len(), 1);
        assert_eq!(platform.owner_dms()[0].0, TenantId(1));
    }

    #[tokio::test]
    async fn restored_permissions_recover_without_a_restart() {
        let platform = Arc::new(MemoryPlatform::new());
        platform.deny(ChannelId(10), Capability::ManageIdentities);
        let presenter = presenter(&platform);
        assert!(presenter.acquire(target()).await.is_none());

        platform.grant_all(ChannelId(10));
        assert!(presenter.acquire(target()).await.is_some());
        assert!(presenter.cached(ChannelId(10)).is_some());
    }
}
