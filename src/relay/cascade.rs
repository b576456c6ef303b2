use tracing::{debug, warn};

use crate::{
    error::DropReason,
    platform::{ChannelId, Identity, MessageId, TenantChannel},
};

use super::{Dispatch, RelayService};

impl RelayService {
    /// Number of deletions issued by cascades that have not completed yet.
    pub fn pending_deletes(&self) -> usize {
        self.pending_deletes.len()
    }

    /// Identity for acting on an existing copy; falls back to the cache for unlinked channels.
    async fn identity_for(&self, channel: ChannelId) -> Option<Identity> {
        match self.registry.tenant_for_channel(channel) {
            Some(tenant) => self.presenter.acquire(TenantChannel::new(tenant, channel)).await,
            None => self.presenter.cached(channel),
        }
    }

    /// Propagates the deletion of a source or any copy to every other message of the set.
    pub fn cascade_delete(&self, deleted: MessageId, channel: ChannelId) -> Dispatch {
        if self.pending_deletes.contains(&deleted) {
            return Dispatch::dropped(DropReason::Suppressed, channel);
        }
        let Some(source) = self.mappings.source_of(deleted) else {
            return Dispatch::dropped(DropReason::Untracked, channel);
        };
        // Flag first, then take: a copy recorded after the take sees the flag.
        self.mark_cascaded(source);
        // Taken up front: late delete notifications for this set find nothing to cascade.
        let Some(resolved) = self.mappings.take(source) else {
            return Dispatch::dropped(DropReason::Untracked, channel);
        };

        let copies: Vec<(ChannelId, MessageId)> = resolved
            .copies
            .into_iter()
            .filter(|(_, copy)| *copy != deleted)
            .collect();
        let source = (deleted != resolved.source).then_some((resolved.source_channel, resolved.source));

        for (_, message) in copies.iter().chain(source.iter()) {
            self.pending_deletes.insert(*message);
        }

        let mut tasks = Vec::with_capacity(copies.len() + 1);
        for (target, copy) in copies {
            let this = self.clone();
            tasks.push(tokio::spawn(async move {
                match this.identity_for(target).await {
                    Some(identity) => {
                        if let Err(err) = this.platform.delete_message_as(&identity, target, copy).await {
                            this.presenter.invalidate(target);
                            warn!(channel = %target, message = %copy, error = %err, "could not delete copy");
                        }
                    }
                    None => debug!(channel = %target, message = %copy, "no identity to delete copy with"),
                }
                this.pending_deletes.remove(&copy);
            }));
        }

        if let Some((home, original)) = source {
            let this = self.clone();
            tasks.push(tokio::spawn(async move {
                if let Err(err) = this.platform.delete_message(home, original).await {
                    warn!(channel = %home, message = %original, error = %err, "could not delete source");
                }
                this.pending_deletes.remove(&original);
            }));
        }

        debug!(%deleted, source = %resolved.source, deletes = tasks.len(), "cascading delete");
        Dispatch { tasks }
    }

    /// Mirrors a reaction onto the source and every other copy. Best effort.
    pub fn relay_reaction(&self, message: MessageId, channel: ChannelId, emoji: &str) -> Dispatch {
        let Some(resolved) = self.mappings.resolve(message) else {
            return Dispatch::dropped(DropReason::Untracked, channel);
        };

        let mut tasks = Vec::new();
        if channel != resolved.source_channel {
            let this = self.clone();
            let emoji = emoji.to_owned();
            let (home, source) = (resolved.source_channel, resolved.source);
            tasks.push(tokio::spawn(async move {
                if let Err(err) = this.platform.add_reaction(home, source, &emoji).await {
                    debug!(channel = %home, message = %source, error = %err, "reaction on source failed");
                }
            }));
        }

        for (target, copy) in resolved.copies {
            if target == channel {
                continue;
            }
            let this = self.clone();
            let emoji = emoji.to_owned();
            tasks.push(tokio::spawn(async move {
                let Some(identity) = this.identity_for(target).await else {
                    return;
                };
                if let Err(err) = this.platform.add_reaction_as(&identity, target, copy, &emoji).await {
                    debug!(channel = %target, message = %copy, error = %err, "reaction on copy failed");
                }
            }));
        }

        Dispatch { tasks }
    }
}
