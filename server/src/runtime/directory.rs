use std::collections::BTreeMap;
use std::sync::Arc;

use protocol::{encode_packet, GameEntry, Packet};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};

use super::now_ms;
use super::storage::StorageBackend;

/// Storage key holding the serialized game list.
const GAMES_KEY: &str = "games";

/// Command backlog for the directory actor.
const COMMAND_BUFFER: usize = 256;

/// One published room, keyed by name.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryEntry {
    pub name: String,
    #[serde(rename = "type")]
    pub game_type: u32,
    pub slots_used: u32,
    pub slots_total: u32,
    pub updated_at: u64,
}

/// Upsert payload; `updated_at` is stamped by the directory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryUpsert {
    pub name: String,
    #[serde(rename = "type")]
    pub game_type: u32,
    pub slots_used: u32,
    pub slots_total: u32,
}

#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    #[error("directory channel closed")]
    ChannelClosed,
}

#[derive(Debug)]
enum DirectoryCommand {
    Upsert {
        update: DirectoryUpsert,
        ack: oneshot::Sender<()>,
    },
    Remove {
        name: String,
        ack: oneshot::Sender<()>,
    },
    ListFrame {
        reply: oneshot::Sender<Vec<u8>>,
    },
    Snapshot {
        reply: oneshot::Sender<Vec<DirectoryEntry>>,
    },
    Shutdown,
}

/// Cheap cloneable handle to the directory actor.
#[derive(Clone)]
pub struct DirectoryHandle {
    tx: mpsc::Sender<DirectoryCommand>,
}

impl DirectoryHandle {
    pub async fn upsert(&self, update: DirectoryUpsert) -> Result<(), DirectoryError> {
        let (ack, ack_rx) = oneshot::channel();
        self.tx
            .send(DirectoryCommand::Upsert { update, ack })
            .await
            .map_err(|_| DirectoryError::ChannelClosed)?;
        ack_rx.await.map_err(|_| DirectoryError::ChannelClosed)
    }

    pub async fn remove(&self, name: String) -> Result<(), DirectoryError> {
        let (ack, ack_rx) = oneshot::channel();
        self.tx
            .send(DirectoryCommand::Remove { name, ack })
            .await
            .map_err(|_| DirectoryError::ChannelClosed)?;
        ack_rx.await.map_err(|_| DirectoryError::ChannelClosed)
    }

    /// Encoded `GameList` frame, entries ordered by most recent update.
    pub async fn list_frame(&self) -> Result<Vec<u8>, DirectoryError> {
        let (reply, reply_rx) = oneshot::channel();
        self.tx
            .send(DirectoryCommand::ListFrame { reply })
            .await
            .map_err(|_| DirectoryError::ChannelClosed)?;
        reply_rx.await.map_err(|_| DirectoryError::ChannelClosed)
    }

    /// Entries ordered by most recent update.
    pub async fn snapshot(&self) -> Result<Vec<DirectoryEntry>, DirectoryError> {
        let (reply, reply_rx) = oneshot::channel();
        self.tx
            .send(DirectoryCommand::Snapshot { reply })
            .await
            .map_err(|_| DirectoryError::ChannelClosed)?;
        reply_rx.await.map_err(|_| DirectoryError::ChannelClosed)
    }

    pub async fn shutdown(&self) -> Result<(), DirectoryError> {
        self.tx
            .send(DirectoryCommand::Shutdown)
            .await
            .map_err(|_| DirectoryError::ChannelClosed)
    }
}

/// Spawns the directory actor. All mutation of the game list happens on the
/// actor task; the persisted snapshot is loaded once, on the first command.
pub fn start_directory(storage: Arc<dyn StorageBackend>) -> DirectoryHandle {
    let (tx, mut rx) = mpsc::channel::<DirectoryCommand>(COMMAND_BUFFER);

    tokio::spawn(async move {
        let mut games: BTreeMap<String, DirectoryEntry> = BTreeMap::new();
        let mut loaded = false;

        while let Some(cmd) = rx.recv().await {
            if !loaded {
                games = load_games(storage.as_ref());
                loaded = true;
            }

            match cmd {
                DirectoryCommand::Upsert { update, ack } => {
                    let entry = DirectoryEntry {
                        name: update.name.clone(),
                        game_type: update.game_type,
                        slots_used: update.slots_used,
                        slots_total: update.slots_total,
                        updated_at: now_ms(),
                    };
                    games.insert(update.name, entry);
                    persist(storage.as_ref(), &games);
                    let _ = ack.send(());
                }
                DirectoryCommand::Remove { name, ack } => {
                    games.remove(&name);
                    persist(storage.as_ref(), &games);
                    let _ = ack.send(());
                }
                DirectoryCommand::ListFrame { reply } => {
                    let entries = recent_first(&games)
                        .into_iter()
                        .map(|entry| GameEntry {
                            game_type: entry.game_type,
                            name: entry.name.clone(),
                        })
                        .collect();
                    let _ = reply.send(encode_packet(&Packet::GameList { entries }));
                }
                DirectoryCommand::Snapshot { reply } => {
                    let entries = recent_first(&games).into_iter().cloned().collect();
                    let _ = reply.send(entries);
                }
                DirectoryCommand::Shutdown => break,
            }
        }
    });

    DirectoryHandle { tx }
}

fn recent_first(games: &BTreeMap<String, DirectoryEntry>) -> Vec<&DirectoryEntry> {
    let mut entries: Vec<&DirectoryEntry> = games.values().collect();
    entries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
    entries
}

fn load_games(storage: &dyn StorageBackend) -> BTreeMap<String, DirectoryEntry> {
    let bytes = match storage.get(GAMES_KEY) {
        Ok(Some(bytes)) => bytes,
        Ok(None) => return BTreeMap::new(),
        Err(err) => {
            log::error!("failed to load persisted game list: {err}");
            return BTreeMap::new();
        }
    };

    match serde_json::from_slice::<Vec<(String, DirectoryEntry)>>(&bytes) {
        Ok(pairs) => pairs.into_iter().collect(),
        Err(err) => {
            log::error!("failed to parse persisted game list: {err}");
            BTreeMap::new()
        }
    }
}

fn persist(storage: &dyn StorageBackend, games: &BTreeMap<String, DirectoryEntry>) {
    let pairs: Vec<(&String, &DirectoryEntry)> = games.iter().collect();
    match serde_json::to_vec(&pairs) {
        Ok(bytes) => {
            if let Err(err) = storage.put(GAMES_KEY, bytes) {
                log::error!("failed to persist game list: {err}");
            }
        }
        Err(err) => log::error!("failed to serialize game list: {err}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::storage::InMemoryStorage;
    use std::time::Duration;

    fn sample_upsert(name: &str, slots_used: u32) -> DirectoryUpsert {
        DirectoryUpsert {
            name: name.to_string(),
            game_type: 0,
            slots_used,
            slots_total: 4,
        }
    }

    #[tokio::test]
    async fn upsert_stamps_updated_at_and_overwrites() {
        let directory = start_directory(Arc::new(InMemoryStorage::new()));

        directory.upsert(sample_upsert("room1", 1)).await.unwrap();
        directory.upsert(sample_upsert("room1", 2)).await.unwrap();

        let entries = directory.snapshot().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].slots_used, 2);
        assert!(entries[0].updated_at > 0);

        directory.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn list_frame_orders_by_most_recent_update() {
        let directory = start_directory(Arc::new(InMemoryStorage::new()));

        directory.upsert(sample_upsert("older", 1)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        directory.upsert(sample_upsert("newer", 1)).await.unwrap();

        let frame = directory.list_frame().await.unwrap();
        let expected = encode_packet(&Packet::GameList {
            entries: vec![
                GameEntry {
                    game_type: 0,
                    name: "newer".to_string(),
                },
                GameEntry {
                    game_type: 0,
                    name: "older".to_string(),
                },
            ],
        });
        assert_eq!(frame, expected);

        directory.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn persisted_games_survive_a_restart() {
        let storage = Arc::new(InMemoryStorage::new());

        let directory = start_directory(storage.clone());
        directory.upsert(sample_upsert("room1", 1)).await.unwrap();
        directory.shutdown().await.unwrap();

        let directory = start_directory(storage);
        let entries = directory.snapshot().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "room1");

        directory.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn remove_deletes_the_entry() {
        let directory = start_directory(Arc::new(InMemoryStorage::new()));

        directory.upsert(sample_upsert("room1", 1)).await.unwrap();
        directory.remove("room1".to_string()).await.unwrap();

        assert!(directory.snapshot().await.unwrap().is_empty());

        directory.shutdown().await.unwrap();
    }
}
