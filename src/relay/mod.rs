//! The fan-out core: copies a message from its source channel into every other
//! channel linked to the same global channel, and keeps deletes and reactions in
//! step across the copies.

mod cascade;
pub mod format;

use std::{sync::Arc, time::Duration};

use dashmap::{mapref::entry::Entry, DashMap, DashSet};
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::{
    error::DropReason,
    identity::IdentityPresenter,
    mapping::MappingStore,
    platform::{Author, ChannelId, MessageId, OutgoingMessage, Platform, TenantChannel},
    registry::{unix_now, ChannelRegistry, RegistryResult},
};

pub const DISPLAY_NAME_LIMIT: usize = 80;
pub const MESSAGE_LIMIT: usize = 2000;

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub mapping_capacity: usize,
    pub warning_cooldown: Duration,
    pub identity_name: String,
    pub display_name_limit: usize,
    pub message_limit: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            mapping_capacity: 10_000,
            warning_cooldown: Duration::from_secs(5 * 60),
            identity_name: "GlobalChat".to_owned(),
            display_name_limit: DISPLAY_NAME_LIMIT,
            message_limit: MESSAGE_LIMIT,
        }
    }
}

/// The message a relayed message answers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyContext {
    pub message: MessageId,
    pub author: String,
    pub content: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessagePosted {
    pub channel: ChannelId,
    pub message: MessageId,
    pub author: Author,
    #[serde(default)]
    pub author_is_bot: bool,
    /// Set when the message was posted through a presentation identity.
    #[serde(default)]
    pub identity: Option<u64>,
    pub content: String,
    #[serde(default)]
    pub reply: Option<ReplyContext>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct MessageDeleted {
    pub channel: ChannelId,
    pub message: MessageId,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReactionAdded {
    pub channel: ChannelId,
    pub message: MessageId,
    pub emoji: String,
    /// Set when the service itself added the reaction.
    #[serde(default)]
    pub by_service: bool,
}

/// Per-target tasks spawned by one relay, delete or reaction.
///
/// Dropping it leaves the tasks running.
#[derive(Debug, Default)]
pub struct Dispatch {
    tasks: Vec<JoinHandle<()>>,
}

impl Dispatch {
    fn dropped(reason: DropReason, channel: ChannelId) -> Self {
        debug!(%channel, %reason, "nothing to relay");
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Waits until every per-target task has finished.
    pub async fn settled(self) {
        for joined in join_all(self.tasks).await {
            if let Err(err) = joined {
                warn!(error = %err, "relay task panicked");
            }
        }
    }
}

/// Deliveries still running for one source message.
#[derive(Debug, Clone, Copy)]
struct InFlight {
    remaining: usize,
    /// The source was deleted while copies were still being sent.
    cascaded: bool,
}

#[derive(Clone)]
pub struct RelayService {
    platform: Arc<dyn Platform>,
    registry: Arc<ChannelRegistry>,
    presenter: Arc<IdentityPresenter>,
    mappings: Arc<MappingStore>,
    pending_deletes: Arc<DashSet<MessageId>>,
    in_flight: Arc<DashMap<MessageId, InFlight>>,
    config: Arc<RelayConfig>,
}

impl RelayService {
    pub fn new(
        platform: Arc<dyn Platform>,
        registry: Arc<ChannelRegistry>,
        config: RelayConfig,
    ) -> Self {
        let presenter = IdentityPresenter::new(
            platform.clone(),
            &config.identity_name,
            config.warning_cooldown,
        );
        Self {
            mappings: Arc::new(MappingStore::new(config.mapping_capacity)),
            presenter: Arc::new(presenter),
            pending_deletes: Arc::new(DashSet::new()),
            in_flight: Arc::new(DashMap::new()),
            config: Arc::new(config),
            platform,
            registry,
        }
    }

    pub fn registry(&self) -> &Arc<ChannelRegistry> {
        &self.registry
    }

    pub fn presenter(&self) -> &Arc<IdentityPresenter> {
        &self.presenter
    }

    pub fn platform(&self) -> &Arc<dyn Platform> {
        &self.platform
    }

    pub fn mappings(&self) -> &MappingStore {
        &self.mappings
    }

    /// Deletes a global channel and forgets the identities of every channel it linked.
    pub async fn delete_global(&self, id: &str) -> RegistryResult<()> {
        for channel in self.registry.delete(id).await? {
            self.presenter.forget(channel);
        }
        Ok(())
    }

    pub async fn on_message(&self, event: MessagePosted) -> Dispatch {
        if event.author_is_bot || event.identity.is_some() {
            return Dispatch::dropped(DropReason::SelfEvent, event.channel);
        }
        self.relay(
            event.channel,
            &event.author,
            &event.content,
            event.reply.as_ref(),
            Some(event.message),
        )
        .await
    }

    pub fn on_delete(&self, event: MessageDeleted) -> Dispatch {
        self.cascade_delete(event.message, event.channel)
    }

    pub fn on_reaction(&self, event: ReactionAdded) -> Dispatch {
        if event.by_service {
            return Dispatch::dropped(DropReason::SelfEvent, event.channel);
        }
        self.relay_reaction(event.message, event.channel, &event.emoji)
    }

    /// Copies a message into every other linked, unmuted channel of its global channel.
    pub async fn relay(
        &self,
        source: ChannelId,
        author: &Author,
        content: &str,
        reply: Option<&ReplyContext>,
        source_message: Option<MessageId>,
    ) -> Dispatch {
        let Some(gc) = self.registry.global_for_channel(source) else {
            return Dispatch::dropped(DropReason::NotLinked, source);
        };
        let Some(source_tenant) = gc.tenant_of(source) else {
            return Dispatch::dropped(DropReason::NotLinked, source);
        };
        let now = unix_now();
        if gc.is_muted(source_tenant, now) {
            return Dispatch::dropped(DropReason::SourceMuted, source);
        }

        let tenant_name = self
            .platform
            .resolve_tenant_display_name(source_tenant)
            .await
            .unwrap_or_else(|| "Unknown".to_owned());
        let prefix = format::render_template(gc.prefix_template(), author, &tenant_name);
        let suffix = format::render_template(gc.suffix_template(), author, &tenant_name);
        let template = OutgoingMessage {
            username: format::compose_name(
                &prefix,
                author.shown_name(),
                &suffix,
                self.config.display_name_limit,
            ),
            avatar_url: author.avatar_url.clone(),
            content: content.to_owned(),
        };

        let targets: Vec<TenantChannel> = gc
            .linked_channels
            .iter()
            .filter(|(tenant, _)| **tenant != source_tenant && !gc.is_muted(**tenant, now))
            .map(|(tenant, channel)| TenantChannel::new(*tenant, *channel))
            .collect();

        // Registered before the mapping opens so a delete racing the copies can flag them.
        if let Some(message) = source_message {
            match self.in_flight.entry(message) {
                Entry::Occupied(_) => return Dispatch::dropped(DropReason::Duplicate, source),
                Entry::Vacant(slot) => {
                    slot.insert(InFlight {
                        remaining: targets.len(),
                        cascaded: false,
                    });
                }
            }
            if !self.mappings.begin(message, source) {
                self.in_flight.remove(&message);
                return Dispatch::dropped(DropReason::Duplicate, source);
            }
            if targets.is_empty() {
                self.in_flight.remove(&message);
            }
        }

        // Replies to a copy quote the same thing as replies to the source.
        let quoted = reply.map(|reply| (reply.clone(), self.mappings.source_of(reply.message)));

        let mut tasks = Vec::with_capacity(targets.len());
        for target in targets {
            let this = self.clone();
            let message = template.clone();
            let quoted = quoted.clone();
            tasks.push(tokio::spawn(async move {
                this.deliver(target, message, quoted, source_message).await;
                if let Some(source) = source_message {
                    this.delivery_done(source);
                }
            }));
        }

        debug!(global = %gc.id, %source, targets = tasks.len(), "relaying message");
        Dispatch { tasks }
    }

    fn delivery_done(&self, source: MessageId) {
        let finished = self.in_flight.get_mut(&source).is_some_and(|mut flight| {
            flight.remaining = flight.remaining.saturating_sub(1);
            flight.remaining == 0
        });
        if finished {
            self.in_flight.remove_if(&source, |_, flight| flight.remaining == 0);
        }
    }

    /// Flags `source` so copies that land after its cascade delete themselves.
    fn mark_cascaded(&self, source: MessageId) {
        if let Some(mut flight) = self.in_flight.get_mut(&source) {
            flight.cascaded = true;
        }
    }

    fn cascaded(&self, source: MessageId) -> bool {
        self.in_flight.get(&source).is_some_and(|flight| flight.cascaded)
    }

    async fn deliver(
        &self,
        target: TenantChannel,
        mut message: OutgoingMessage,
        quoted: Option<(ReplyContext, Option<MessageId>)>,
        source_message: Option<MessageId>,
    ) {
        let Some(identity) = self.presenter.acquire(target).await else {
            return;
        };

        if let Some((reply, quoted_source)) = &quoted {
            let link = quoted_source
                .and_then(|source| self.mappings.copy_in(source, target.channel))
                .map(|copy| self.platform.message_link(target.tenant, target.channel, copy));
            let quote = match link {
                Some(link) => format::quote_with_link(reply, &link),
                None => format::quote_with_text(reply),
            };
            message.content = quote + &message.content;
        }
        message.content = format::truncate(&message.content, self.config.message_limit);

        match self.platform.send_as(&identity, target.channel, &message).await {
            Ok(relayed) => {
                let Some(source) = source_message else {
                    return;
                };
                if self.mappings.record(source, target.channel, relayed) {
                    return;
                }
                if !self.cascaded(source) {
                    debug!(%source, %relayed, "mapping evicted before the copy was recorded");
                    return;
                }
                debug!(%source, %relayed, channel = %target.channel, "source deleted mid-relay, removing copy");
                if let Err(err) = self
                    .platform
                    .delete_message_as(&identity, target.channel, relayed)
                    .await
                {
                    warn!(channel = %target.channel, message = %relayed, error = %err, "could not remove late copy");
                }
            }
            Err(err) => {
                self.presenter.invalidate(target.channel);
                warn!(
                    tenant = %target.tenant,
                    channel = %target.channel,
                    error = %err,
                    "relay to target failed"
                );
            }
        }
    }
}
