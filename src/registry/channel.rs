use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::platform::{ChannelId, TenantId, UserId};

pub const DEFAULT_PREFIX: &str = "[GC]";
pub const DEFAULT_SUFFIX: &str = "• {tenant}";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    #[default]
    Public,
    Unlisted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Role {
    Member,
    Moderator,
    CoOwner,
    Owner,
}

/// A virtual room shared by several tenant channels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalChannel {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub visibility: Visibility,
    #[serde(default)]
    pub key_required: bool,
    #[serde(default)]
    pub key: Option<String>,
    pub owner: UserId,
    #[serde(default)]
    pub co_owners: BTreeSet<UserId>,
    #[serde(default)]
    pub moderators: BTreeSet<UserId>,
    #[serde(default)]
    pub rules: Vec<String>,
    /// `None` uses the default template, `Some("")` is intentionally blank.
    #[serde(default)]
    pub prefix: Option<String>,
    #[serde(default)]
    pub suffix: Option<String>,
    #[serde(default)]
    pub linked_channels: BTreeMap<TenantId, ChannelId>,
    #[serde(default)]
    pub banned_tenants: BTreeSet<TenantId>,
    /// Unix seconds the mute ends at; zero or negative never ends.
    #[serde(default)]
    pub muted_tenants: BTreeMap<TenantId, i64>,
    #[serde(default)]
    pub warnings: BTreeMap<TenantId, Vec<String>>,
}

pub fn unix_now() -> i64 {
    OffsetDateTime::now_utc().unix_timestamp()
}

impl GlobalChannel {
    pub fn new(id: String, name: String, owner: UserId) -> Self {
        Self {
            id,
            name,
            description: String::new(),
            visibility: Visibility::Public,
            key_required: false,
            key: None,
            owner,
            co_owners: BTreeSet::new(),
            moderators: BTreeSet::new(),
            rules: Vec::new(),
            prefix: None,
            suffix: None,
            linked_channels: BTreeMap::new(),
            banned_tenants: BTreeSet::new(),
            muted_tenants: BTreeMap::new(),
            warnings: BTreeMap::new(),
        }
    }

    pub fn tenant_of(&self, channel: ChannelId) -> Option<TenantId> {
        self.linked_channels
            .iter()
            .find(|(_, linked)| **linked == channel)
            .map(|(tenant, _)| *tenant)
    }

    pub fn is_muted(&self, tenant: TenantId, now: i64) -> bool {
        self.muted_tenants
            .get(&tenant)
            .is_some_and(|until| *until <= 0 || *until > now)
    }

    pub fn accepts_key(&self, provided: Option<&str>) -> bool {
        if !self.key_required {
            return true;
        }
        matches!((self.key.as_deref(), provided), (Some(key), Some(provided)) if key == provided)
    }

    pub fn role_of(&self, user: UserId) -> Role {
        if user == self.owner {
            Role::Owner
        } else if self.co_owners.contains(&user) {
            Role::CoOwner
        } else if self.moderators.contains(&user) {
            Role::Moderator
        } else {
            Role::Member
        }
    }

    /// Copy safe to show to users: the join key is removed.
    pub fn redacted(mut self) -> Self {
        self.key = None;
        self
    }

    pub fn prefix_template(&self) -> &str {
        self.prefix.as_deref().unwrap_or(DEFAULT_PREFIX)
    }

    pub fn suffix_template(&self) -> &str {
        self.suffix.as_deref().unwrap_or(DEFAULT_SUFFIX)
    }
}
