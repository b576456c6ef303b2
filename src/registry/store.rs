use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use tokio::sync::Mutex;

use super::GlobalChannel;

/// Everything the registry persists: global channels keyed by id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryState {
    pub channels: BTreeMap<String, GlobalChannel>,
}

#[async_trait]
pub trait SnapshotStore: Send + Sync + 'static {
    async fn load_snapshot(&self) -> anyhow::Result<RegistryState>;
    async fn save_snapshot(&self, state: &RegistryState) -> anyhow::Result<()>;
}

/// One JSON row per global channel.
pub struct SqliteStore {
    db_pool: SqlitePool,
}

impl SqliteStore {
    pub async fn connect(url: &str) -> anyhow::Result<Self> {
        let db_pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect(url)
            .await?;
        Self::with_pool(db_pool).await
    }

    pub async fn with_pool(db_pool: SqlitePool) -> anyhow::Result<Self> {
        sqlx::query("CREATE TABLE IF NOT EXISTS global_channels (id TEXT PRIMARY KEY, body TEXT NOT NULL)")
            .execute(&db_pool)
            .await?;
        Ok(Self { db_pool })
    }
}

#[async_trait]
impl SnapshotStore for SqliteStore {
    async fn load_snapshot(&self) -> anyhow::Result<RegistryState> {
        let rows: Vec<(String, String)> = sqlx::query_as("SELECT id,body FROM global_channels")
            .fetch_all(&self.db_pool)
            .await?;

        let mut state = RegistryState::default();
        for (id, body) in rows {
            let channel: GlobalChannel = serde_json::from_str(&body)?;
            state.channels.insert(id, channel);
        }
        Ok(state)
    }

    async fn save_snapshot(&self, state: &RegistryState) -> anyhow::Result<()> {
        let mut tx = self.db_pool.begin().await?;
        sqlx::query("DELETE FROM global_channels")
            .execute(&mut *tx)
            .await?;
        for (id, channel) in &state.channels {
            sqlx::query("INSERT INTO global_channels (id,body) VALUES (?,?)")
                .bind(id)
                .bind(serde_json::to_string(channel)?)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<RegistryState>,
    saves: Mutex<usize>,
}

impl MemoryStore {
    pub fn new(state: RegistryState) -> Self {
        Self {
            state: Mutex::new(state),
            saves: Mutex::new(0),
        }
    }

    pub async fn saves(&self) -> usize {
        *self.saves.lock().await
    }

    pub async fn snapshot(&self) -> RegistryState {
        self.state.lock().await.clone()
    }
}

#[async_trait]
impl SnapshotStore for MemoryStore {
    async fn load_snapshot(&self) -> anyhow::Result<RegistryState> {
        Ok(self.state.lock().await.clone())
    }

    async fn save_snapshot(&self, state: &RegistryState) -> anyhow::Result<()> {
        *self.state.lock().await = state.clone();
        *self.saves.lock().await += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::{ChannelId, TenantId, UserId};

    #[tokio::test]
    async fn sqlite_snapshot_survives_a_reload() {
        let store = SqliteStore::connect("sqlite::memory:").await.unwrap();

        let mut gc = GlobalChannel::new("k3y5".to_owned(), "lobby".to_owned(), UserId(7));
        gc.linked_channels.insert(TenantId(1), ChannelId(11));
        gc.muted_tenants.insert(TenantId(2), 0);
        gc.warnings.insert(TenantId(2), vec!["spam".to_owned()]);
        gc.prefix = Some(String::new());

        let mut state = RegistryState::default();
        state.channels.insert(gc.id.clone(), gc);
        store.save_snapshot(&state).await.unwrap();
        assert_eq!(store.load_snapshot().await.unwrap(), state);

        state.channels.clear();
        store.save_snapshot(&state).await.unwrap();
        assert!(store.load_snapshot().await.unwrap().channels.is_empty());
    }
}
