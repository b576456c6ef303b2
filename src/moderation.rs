//! Per-tenant moderation: mutate the registry, then tell the affected tenant.

use std::{sync::Arc, time::Duration};

use tracing::{info, warn};

use crate::{
    identity::IdentityPresenter,
    platform::{ChannelId, Platform, TenantId},
    registry::{unix_now, ChannelRegistry, RegistryResult},
};

pub struct ModerationController {
    registry: Arc<ChannelRegistry>,
    platform: Arc<dyn Platform>,
    presenter: Arc<IdentityPresenter>,
}

impl ModerationController {
    pub fn new(
        registry: Arc<ChannelRegistry>,
        platform: Arc<dyn Platform>,
        presenter: Arc<IdentityPresenter>,
    ) -> Self {
        Self {
            registry,
            platform,
            presenter,
        }
    }

    /// Unlinks the tenant; it may link again.
    pub async fn kick(&self, id: &str, tenant: TenantId) -> RegistryResult<()> {
        let channel = self.registry.unlink_tenant(id, tenant).await?;
        self.presenter.forget(channel);
        info!(global = %id, %tenant, "tenant kicked");
        self.notify(id, tenant, Some(channel), "was removed from").await;
        Ok(())
    }

    pub async fn ban(&self, id: &str, tenant: TenantId) -> RegistryResult<()> {
        let unlinked = self.registry.ban(id, tenant).await?;
        if let Some(channel) = unlinked {
            self.presenter.forget(channel);
        }
        info!(global = %id, %tenant, "tenant banned");
        self.notify(id, tenant, unlinked, "was banned from").await;
        Ok(())
    }

    pub async fn unban(&self, id: &str, tenant: TenantId) -> RegistryResult<()> {
        self.registry.unban(id, tenant).await?;
        self.notify(id, tenant, None, "was unbanned from").await;
        Ok(())
    }

    /// `None` mutes until lifted.
    pub async fn mute(&self, id: &str, tenant: TenantId, duration: Option<Duration>) -> RegistryResult<()> {
        let until = match duration {
            Some(duration) => unix_now().saturating_add(duration.as_secs().min(i64::MAX as u64) as i64),
            None => 0,
        };
        self.registry.mute(id, tenant, until).await?;
        info!(global = %id, %tenant, until, "tenant muted");

        let action = match duration {
            Some(duration) => format!("was muted for {} minutes in", duration.as_secs().div_ceil(60)),
            None => "was muted in".to_owned(),
        };
        self.notify(id, tenant, None, &action).await;
        Ok(())
    }

    pub async fn unmute(&self, id: &str, tenant: TenantId) -> RegistryResult<()> {
        self.registry.unmute(id, tenant).await?;
        self.notify(id, tenant, None, "was unmuted in").await;
        Ok(())
    }

    pub async fn warn(&self, id: &str, tenant: TenantId, reason: &str) -> RegistryResult<usize> {
        let count = self.registry.warn(id, tenant, reason).await?;
        let action = format!("received warning #{count} (\"{}\") in", reason.trim());
        self.notify(id, tenant, None, &action).await;
        Ok(count)
    }

    pub async fn unwarn(&self, id: &str, tenant: TenantId, index: usize) -> RegistryResult<String> {
        let reason = self.registry.unwarn(id, tenant, index).await?;
        let action = format!("had the warning \"{reason}\" removed in");
        self.notify(id, tenant, None, &action).await;
        Ok(reason)
    }

    /// Best effort: the linked channel when the service can speak there, else the tenant owner.
    async fn notify(&self, id: &str, tenant: TenantId, channel: Option<ChannelId>, action: &str) {
        let gc = self.registry.get(id);
        let name = gc.as_ref().map_or(id, |gc| gc.name.as_str());
        let notice = format!("This server {action} the global channel \"{name}\".");

        let channel = channel.or_else(|| gc.as_ref().and_then(|gc| gc.linked_channels.get(&tenant).copied()));
        if let Some(channel) = channel {
            match self.platform.send_message(channel, &notice).await {
                Ok(_) => return,
                Err(err) => warn!(%channel, error = %err, "moderation notice failed"),
            }
        }
        if let Err(err) = self.platform.notify_tenant_owner(tenant, &notice).await {
            warn!(%tenant, error = %err, "could not notify tenant owner");
        }
    }
}
