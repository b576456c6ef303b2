use std::fmt;

use thiserror::Error;

use crate::platform::ChannelId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkConflict {
    /// The tenant already has a channel linked into this global channel.
    TenantLinked,
    /// The tenant channel backs a different global channel.
    ChannelInUse,
}

impl fmt::Display for LinkConflict {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            LinkConflict::TenantLinked => "this server is already linked to that global channel",
            LinkConflict::ChannelInUse => "this channel is already linked to another global channel",
        })
    }
}

/// Failures of registry and moderation operations.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("global channel `{0}` does not exist")]
    NotFound(String),
    #[error("this channel is not linked to a global channel")]
    LinkNotFound,
    #[error("{0}")]
    AlreadyLinked(LinkConflict),
    #[error("this server is banned from that global channel")]
    Banned,
    #[error("the key is missing or incorrect")]
    KeyMismatch,
    #[error("you are not allowed to do that")]
    NotAuthorized,
    #[error("{0}")]
    InvalidInput(String),
    #[error("failed to save: {0}")]
    Persistence(#[from] anyhow::Error),
}

impl RegistryError {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }
}

/// Failures on the relay path. Logged per target, never shown to users.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("missing capabilities in channel {0}")]
    PermissionDenied(ChannelId),
    #[error("presentation identity failed: {0}")]
    WebhookFailure(#[source] anyhow::Error),
}

/// Why an inbound event produced no fan-out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    NotLinked,
    SourceMuted,
    Untracked,
    Suppressed,
    SelfEvent,
    Duplicate,
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            DropReason::NotLinked => "channel not linked",
            DropReason::SourceMuted => "source tenant muted",
            DropReason::Untracked => "message not tracked",
            DropReason::Suppressed => "deletion already in flight",
            DropReason::SelfEvent => "event caused by the service",
            DropReason::Duplicate => "message already relayed",
        })
    }
}

/// Renders an operation result for the command layer: `None` on success.
pub fn message<T>(result: &Result<T, RegistryError>) -> Option<String> {
    match result {
        Ok(_) => None,
        Err(err) => Some(err.to_string()),
    }
}
