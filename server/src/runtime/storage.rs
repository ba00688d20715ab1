use dashmap::DashMap;

/// Errors surfaced by a storage backend.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Minimal key-value surface the directory persists through.
///
/// The backend guarantees at-most-one concurrent writer per key; in this
/// process the directory actor is the only writer of its key.
pub trait StorageBackend: Send + Sync + 'static {
    fn put(&self, key: &str, value: Vec<u8>) -> Result<(), StorageError>;
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;
}

#[derive(Default)]
pub struct InMemoryStorage {
    entries: DashMap<String, Vec<u8>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StorageBackend for InMemoryStorage {
    fn put(&self, key: &str, value: Vec<u8>) -> Result<(), StorageError> {
        self.entries.insert(key.to_string(), value);
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.entries.get(key).map(|entry| entry.value().clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_then_get_returns_the_value() {
        let storage = InMemoryStorage::new();
        storage.put("games", vec![1, 2, 3]).unwrap();
        assert_eq!(storage.get("games").unwrap(), Some(vec![1, 2, 3]));
    }

    #[test]
    fn get_of_missing_key_is_none() {
        let storage = InMemoryStorage::new();
        assert_eq!(storage.get("games").unwrap(), None);
    }
}
