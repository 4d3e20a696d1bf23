//! Conversation store: the ordered turns of the open conversation, optionally
//! mirrored to durable key-value storage.
//!
//! Sends are modelled as a transaction: [`ConversationStore::begin`] appends
//! the user turn provisionally, then either [`ConversationStore::commit`]
//! appends the reply and persists, or [`ConversationStore::abort`] truncates
//! back to the exact pre-send length.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use tracing::{debug, warn};

use crate::error::PersistenceError;
use crate::state::Turn;

/// Storage key for the persisted conversation.
pub const HISTORY_KEY: &str = "parley_chat_history";

/// Durable string key-value storage.
pub trait Storage: Send {
    fn get(&self, key: &str) -> Result<Option<String>, PersistenceError>;
    fn set(&mut self, key: &str, value: &str) -> Result<(), PersistenceError>;
    fn remove(&mut self, key: &str) -> Result<(), PersistenceError>;
}

/// One file per key under a directory.
pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, PersistenceError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }
}

impl Storage for FileStorage {
    fn get(&self, key: &str) -> Result<Option<String>, PersistenceError> {
        let path = self.path_for(key);
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(fs::read_to_string(path)?))
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), PersistenceError> {
        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, value)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), PersistenceError> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct MemoryStorage {
    values: HashMap<String, String>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Storage for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<String>, PersistenceError> {
        Ok(self.values.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), PersistenceError> {
        self.values.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), PersistenceError> {
        self.values.remove(key);
        Ok(())
    }
}

/// Marks an open send. Consumed by `commit` or `abort`.
#[derive(Debug, PartialEq, Eq)]
#[must_use = "an exchange must be committed or aborted"]
pub struct Exchange {
    base_len: usize,
}

impl Exchange {
    /// Length of the conversation before this send began.
    pub fn base_len(&self) -> usize {
        self.base_len
    }
}

pub struct ConversationStore {
    turns: Vec<Turn>,
    storage: Option<Box<dyn Storage>>,
}

impl Default for ConversationStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ConversationStore {
    /// In-memory store; nothing is persisted.
    pub fn new() -> Self {
        Self {
            turns: Vec::new(),
            storage: None,
        }
    }

    pub fn with_storage(storage: Box<dyn Storage>) -> Self {
        Self {
            turns: Vec::new(),
            storage: Some(storage),
        }
    }

    pub fn is_persistent(&self) -> bool {
        self.storage.is_some()
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Load a previously persisted conversation. Unreadable or corrupt data
    /// yields an empty conversation.
    pub fn restore(&mut self) -> &[Turn] {
        let Some(storage) = &self.storage else {
            return &self.turns;
        };

        self.turns = match storage.get(HISTORY_KEY) {
            Ok(Some(saved)) => match serde_json::from_str::<Vec<Turn>>(&saved) {
                Ok(turns) => turns,
                Err(e) => {
                    warn!(error = %e, "Failed to parse saved conversation, starting empty");
                    Vec::new()
                }
            },
            Ok(None) => Vec::new(),
            Err(e) => {
                warn!(error = %e, "Failed to load saved conversation, starting empty");
                Vec::new()
            }
        };

        debug!(turns = self.turns.len(), "Restored conversation");
        &self.turns
    }

    pub fn append(&mut self, turn: Turn) {
        self.turns.push(turn);
        self.persist();
    }

    /// Remove the most recent turn.
    pub fn rollback_last(&mut self) -> Option<Turn> {
        let turn = self.turns.pop();
        if turn.is_some() {
            self.persist();
        }
        turn
    }

    /// Empty the conversation and drop persisted state. Safe to repeat.
    pub fn clear(&mut self) {
        self.turns.clear();
        if let Some(storage) = self.storage.as_mut() {
            if let Err(e) = storage.remove(HISTORY_KEY) {
                warn!(error = %e, "Failed to clear saved conversation");
            }
        }
    }

    /// Swap in a whole conversation (e.g. one loaded from the server).
    /// Not mirrored locally.
    pub fn replace(&mut self, turns: Vec<Turn>) {
        self.turns = turns;
    }

    /// Append the user turn provisionally; it is not persisted until commit.
    pub fn begin(&mut self, user_turn: Turn) -> Exchange {
        let exchange = Exchange {
            base_len: self.turns.len(),
        };
        self.turns.push(user_turn);
        exchange
    }

    /// Turns that preceded the exchange's user turn.
    pub fn history_before(&self, exchange: &Exchange) -> &[Turn] {
        &self.turns[..exchange.base_len.min(self.turns.len())]
    }

    pub fn commit(&mut self, exchange: Exchange, reply: Turn) {
        debug_assert!(self.turns.len() > exchange.base_len);
        self.append(reply);
    }

    /// Drop everything appended since `begin`.
    pub fn abort(&mut self, exchange: Exchange) {
        self.turns.truncate(exchange.base_len);
    }

    fn persist(&mut self) {
        let Some(storage) = self.storage.as_mut() else {
            return;
        };

        let result = serde_json::to_string(&self.turns)
            .map_err(PersistenceError::from)
            .and_then(|json| storage.set(HISTORY_KEY, &json));

        if let Err(e) = result {
            warn!(error = %e, "Failed to save conversation");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    struct FailingStorage;

    impl Storage for FailingStorage {
        fn get(&self, _key: &str) -> Result<Option<String>, PersistenceError> {
            Err(std::io::Error::other("quota").into())
        }
        fn set(&mut self, _key: &str, _value: &str) -> Result<(), PersistenceError> {
            Err(std::io::Error::other("quota").into())
        }
        fn remove(&mut self, _key: &str) -> Result<(), PersistenceError> {
            Err(std::io::Error::other("quota").into())
        }
    }

    fn file_store(dir: &TempDir) -> ConversationStore {
        ConversationStore::with_storage(Box::new(FileStorage::new(dir.path()).unwrap()))
    }

    #[test]
    fn test_committed_exchange_round_trips_through_storage() {
        let dir = TempDir::new().unwrap();
        let mut store = file_store(&dir);

        let exchange = store.begin(Turn::user("Hello"));
        store.commit(exchange, Turn::assistant("Hi there"));

        let mut restored = file_store(&dir);
        assert_eq!(restored.restore(), store.turns());
        assert_eq!(
            restored.turns(),
            &[Turn::user("Hello"), Turn::assistant("Hi there")]
        );
    }

    #[test]
    fn test_abort_restores_exact_length() {
        let mut store = ConversationStore::with_storage(Box::new(MemoryStorage::new()));
        store.append(Turn::user("a"));
        store.append(Turn::assistant("b"));

        let exchange = store.begin(Turn::user("c"));
        assert_eq!(store.len(), 3);
        assert_eq!(store.history_before(&exchange).len(), 2);
        store.abort(exchange);

        assert_eq!(store.turns(), &[Turn::user("a"), Turn::assistant("b")]);
    }

    #[test]
    fn test_provisional_turn_is_not_persisted() {
        let dir = TempDir::new().unwrap();
        let mut store = file_store(&dir);
        store.append(Turn::user("kept"));
        let _exchange = store.begin(Turn::user("pending"));

        let mut restored = file_store(&dir);
        assert_eq!(restored.restore(), &[Turn::user("kept")]);
    }

    #[test]
    fn test_corrupt_storage_restores_empty() {
        let mut storage = MemoryStorage::new();
        storage.set(HISTORY_KEY, "{not json").unwrap();
        let mut store = ConversationStore::with_storage(Box::new(storage));

        assert!(store.restore().is_empty());
    }

    #[test]
    fn test_storage_failures_are_swallowed() {
        let mut store = ConversationStore::with_storage(Box::new(FailingStorage));
        assert!(store.restore().is_empty());

        store.append(Turn::user("still works"));
        assert_eq!(store.len(), 1);
        store.clear();
        assert!(store.is_empty());
    }

    #[test]
    fn test_clear_twice_is_noop() {
        let dir = TempDir::new().unwrap();
        let mut store = file_store(&dir);
        store.append(Turn::user("x"));

        store.clear();
        store.clear();

        assert!(store.is_empty());
        assert!(file_store(&dir).restore().is_empty());
    }

    #[test]
    fn test_rollback_last() {
        let mut store = ConversationStore::new();
        assert_eq!(store.rollback_last(), None);
        store.append(Turn::user("x"));
        assert_eq!(store.rollback_last(), Some(Turn::user("x")));
        assert!(store.is_empty());
    }

    #[test]
    fn test_replace_is_not_persisted() {
        let dir = TempDir::new().unwrap();
        let mut store = file_store(&dir);
        store.replace(vec![Turn::user("from server")]);

        assert_eq!(store.len(), 1);
        assert!(file_store(&dir).restore().is_empty());
    }
}
