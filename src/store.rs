use bytes::Bytes;
use std::collections::HashMap;
use std::ops::Deref;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::time::{Duration, Instant};

/// The Store is responsible for managing key-value pairs, with an optional time-to-live for each
/// key. Expiry is lazy: there is no background task, a key past its deadline is removed by the
/// first read that sees it. Until then it keeps using memory.
///
/// All access goes through one mutex guarding the whole map, so individual operations never
/// observe a torn write. Nothing spans several operations. The store is cloned cheaply using
/// reference counting and shared by every connection.
#[derive(Clone)]
pub struct Store {
    inner: Arc<InnerStore>,
}

impl Store {
    pub fn new() -> Store {
        let state = State {
            keys: HashMap::new(),
        };

        let inner = Arc::new(InnerStore {
            state: Mutex::new(state),
        });

        Self { inner }
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

pub struct InnerStore {
    state: Mutex<State>,
}

pub struct InnerStoreLocked<'a> {
    state: MutexGuard<'a, State>,
}

impl<'a> InnerStoreLocked<'a> {
    /// Installs `data` under `key`, replacing any previous value and expiry. A `ttl` of zero means
    /// the key never expires.
    pub fn set(&mut self, key: Key, data: Bytes, ttl: Option<Duration>) {
        let expires_at = ttl
            .filter(|ttl| !ttl.is_zero())
            .map(|ttl| Instant::now() + ttl);

        let value = Value { data, expires_at };
        self.state.keys.insert(key, value);
    }

    /// Returns the value under `key`, deleting it instead if it has expired.
    pub fn get(&mut self, key: &[u8]) -> Option<Bytes> {
        let now = Instant::now();

        let expired = self.state.keys.get(key)?.is_expired(now);
        if expired {
            self.state.keys.remove(key);
            return None;
        }

        self.state.keys.get(key).map(|v| v.data.clone())
    }

    /// Whether an entry exists for `key`, expired or not. Never evicts.
    pub fn contains(&self, key: &[u8]) -> bool {
        self.state.keys.contains_key(key)
    }

    /// Number of entries held, including expired ones nobody has read yet.
    pub fn len(&self) -> usize {
        self.state.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.keys.is_empty()
    }
}

impl Deref for Store {
    type Target = InnerStore;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl InnerStore {
    pub fn lock(&self) -> InnerStoreLocked<'_> {
        // A panic while holding the lock can't leave the map half-updated, every mutation is a
        // single insert or remove.
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        InnerStoreLocked { state }
    }
}

type Key = Bytes;

pub struct Value {
    pub data: Bytes,
    pub expires_at: Option<Instant>,
}

impl Value {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at <= now)
    }
}

pub struct State {
    keys: HashMap<Key, Value>,
}
