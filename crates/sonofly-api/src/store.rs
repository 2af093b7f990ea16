// Injected key-value persistence.
//
// Session records and device snapshots survive process restarts through
// whatever store the embedding application provides (a JSON file, a
// database row, a secret service). The core only ever reads and writes
// opaque JSON strings under fixed keys.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::Error;

/// Key under which the serialized [`Session`](crate::Session) is persisted.
pub const SESSION_KEY: &str = "session";

/// Key under which the raw device thing-list is persisted.
pub const DEVICES_KEY: &str = "devices";

/// String key to JSON string value persistence, supplied by the caller.
///
/// Implementations must be cheap to call: the core skips writes whose
/// value is unchanged, but reads happen on every load path.
pub trait KvStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, Error>;
    fn put(&self, key: &str, value: &str) -> Result<(), Error>;
    fn remove(&self, key: &str) -> Result<(), Error>;
}

/// In-memory store. The default when the caller does not need persistence,
/// and the store used throughout the test suites.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, Error> {
        Ok(self
            .entries
            .lock()
            .expect("store lock poisoned")
            .get(key)
            .cloned())
    }

    fn put(&self, key: &str, value: &str) -> Result<(), Error> {
        self.entries
            .lock()
            .expect("store lock poisoned")
            .insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), Error> {
        self.entries
            .lock()
            .expect("store lock poisoned")
            .remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_store_round_trip() {
        let store = MemoryStore::new();
        assert_eq!(store.get("session").unwrap(), None);

        store.put("session", "{\"at\":1}").unwrap();
        assert_eq!(store.get("session").unwrap().as_deref(), Some("{\"at\":1}"));

        store.remove("session").unwrap();
        assert_eq!(store.get("session").unwrap(), None);
    }
}
