use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;

use super::directory::{start_directory, DirectoryHandle};
use super::room::{start_room, RoomHandle, RoomStats};
use super::storage::{InMemoryStorage, StorageBackend};
use super::ConnId;
use crate::config::ServerConfig;

/// Owns the directory actor and the per-name room registry. Rooms are
/// spawned on first resolution and deregister themselves when they go idle.
pub struct LobbyRuntime {
    config: ServerConfig,
    directory: DirectoryHandle,
    rooms: Arc<DashMap<String, RoomHandle>>,
    conn_seq: AtomicU64,
    room_seq: AtomicU64,
}

impl LobbyRuntime {
    pub fn bootstrap(config: ServerConfig) -> Self {
        Self::bootstrap_with_storage(config, Arc::new(InMemoryStorage::new()))
    }

    pub fn bootstrap_with_storage(config: ServerConfig, storage: Arc<dyn StorageBackend>) -> Self {
        let directory = start_directory(storage);
        Self {
            config,
            directory,
            rooms: Arc::new(DashMap::new()),
            conn_seq: AtomicU64::new(1),
            room_seq: AtomicU64::new(1),
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn directory(&self) -> &DirectoryHandle {
        &self.directory
    }

    pub fn next_conn_id(&self) -> ConnId {
        ConnId(self.conn_seq.fetch_add(1, Ordering::Relaxed))
    }

    /// Stable per-name room resolution; spawns the actor on first use.
    pub fn room(&self, name: &str) -> RoomHandle {
        self.rooms
            .entry(name.to_string())
            .or_insert_with(|| {
                let instance = self.room_seq.fetch_add(1, Ordering::Relaxed);
                start_room(
                    name.to_string(),
                    self.directory.clone(),
                    self.rooms.clone(),
                    instance,
                )
            })
            .clone()
    }

    pub fn active_rooms(&self) -> usize {
        self.rooms.len()
    }

    pub async fn room_stats(&self) -> Vec<RoomStats> {
        let handles: Vec<RoomHandle> = self
            .rooms
            .iter()
            .map(|entry| entry.value().clone())
            .collect();

        let mut out = Vec::with_capacity(handles.len());
        for handle in handles {
            out.push(handle.stats().await);
        }
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }

    /// Closes every room, then stops the directory actor.
    pub async fn shutdown(&self) -> anyhow::Result<()> {
        let handles: Vec<RoomHandle> = self
            .rooms
            .iter()
            .map(|entry| entry.value().clone())
            .collect();

        for room in handles {
            // Idle rooms may already have stopped on their own.
            let _ = room.shutdown().await;
        }

        self.directory.shutdown().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn room_resolution_is_stable_per_name() {
        let runtime = LobbyRuntime::bootstrap(ServerConfig::default());

        let first = runtime.room("room1");
        let second = runtime.room("room1");
        assert_eq!(first.instance(), second.instance());

        let other = runtime.room("room2");
        assert_ne!(first.instance(), other.instance());
        assert_eq!(runtime.active_rooms(), 2);

        runtime.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn conn_ids_are_unique() {
        let runtime = LobbyRuntime::bootstrap(ServerConfig::default());
        assert_ne!(runtime.next_conn_id(), runtime.next_conn_id());
        runtime.shutdown().await.unwrap();
    }
}
