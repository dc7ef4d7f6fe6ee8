#![forbid(unsafe_code)]

//! Bidirectional mapping between items and opaque client keys.
//!
//! The client never sees items, only keys. A key is allocated the first time
//! an item is referenced and stays bound to that item until it is released
//! with [`KeyMapper::remove`] (or one of its siblings).
//!
//! # Invariants
//!
//! 1. A live key refers to exactly one item, and an item has at most one key.
//! 2. With the default counter strategy a released key is never reissued, so
//!    a stale client reference can never resolve to a different item.
//! 3. With a unique-key provider, a derived key that is already bound to a
//!    different item falls back to a counter key; invariant 1 still holds.
//!
//! `KeyMapper` is a single-writer structure: the hierarchy layer is driven
//! from one logical thread per session, so no internal locking is done.

use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use crate::identity::Item;

/// Derives a client key from an item.
pub type UniqueKeyProvider<T> = Rc<dyn Fn(&T) -> String>;

/// Maps items to stable string keys and back.
pub struct KeyMapper<T: Item> {
    keys: HashMap<T, String>,
    items: HashMap<String, T>,
    next_id: u64,
    unique_key_provider: Option<UniqueKeyProvider<T>>,
}

impl<T: Item> KeyMapper<T> {
    /// Create an empty mapper using counter keys (`"1"`, `"2"`, ...).
    #[must_use]
    pub fn new() -> Self {
        Self {
            keys: HashMap::new(),
            items: HashMap::new(),
            next_id: 0,
            unique_key_provider: None,
        }
    }

    /// Create a mapper that derives keys from items.
    #[must_use]
    pub fn with_unique_key_provider(provider: UniqueKeyProvider<T>) -> Self {
        let mut mapper = Self::new();
        mapper.unique_key_provider = Some(provider);
        mapper
    }

    /// Replace the key strategy for keys allocated from now on.
    ///
    /// Existing keys are kept.
    pub fn set_unique_key_provider(&mut self, provider: Option<UniqueKeyProvider<T>>) {
        self.unique_key_provider = provider;
    }

    /// Return the key of `item`, allocating one on first reference.
    pub fn key(&mut self, item: &T) -> String {
        if let Some(key) = self.keys.get(item) {
            return key.clone();
        }
        let key = self.create_key(item);
        self.keys.insert(item.clone(), key.clone());
        self.items.insert(key.clone(), item.clone());
        key
    }

    fn create_key(&mut self, item: &T) -> String {
        if let Some(provider) = &self.unique_key_provider {
            let derived = provider(item);
            if !self.items.contains_key(&derived) {
                return derived;
            }
            crate::warn!(key = %derived, "derived key already bound to another item");
        }
        loop {
            self.next_id += 1;
            let key = self.next_id.to_string();
            if !self.items.contains_key(&key) {
                return key;
            }
        }
    }

    /// The key of `item`, without allocating.
    #[must_use]
    pub fn key_of(&self, item: &T) -> Option<&str> {
        self.keys.get(item).map(String::as_str)
    }

    /// Whether `item` currently has a key.
    #[must_use]
    pub fn has(&self, item: &T) -> bool {
        self.keys.contains_key(item)
    }

    /// Whether `key` is currently bound.
    #[must_use]
    pub fn has_key(&self, key: &str) -> bool {
        self.items.contains_key(key)
    }

    /// The item bound to `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&T> {
        self.items.get(key)
    }

    /// Release the key of `item`. Returns the released key.
    pub fn remove(&mut self, item: &T) -> Option<String> {
        let key = self.keys.remove(item)?;
        self.items.remove(&key);
        Some(key)
    }

    /// Release `key`. Returns the item it was bound to.
    pub fn remove_key(&mut self, key: &str) -> Option<T> {
        let item = self.items.remove(key)?;
        self.keys.remove(&item);
        Some(item)
    }

    /// Release every key.
    pub fn remove_all(&mut self) {
        self.keys.clear();
        self.items.clear();
    }

    /// Replace the stored instance of an item equal to `item`.
    ///
    /// Identity is unchanged; this only matters for items whose identity
    /// ignores some fields (see [`crate::identity::ById`]).
    pub fn refresh(&mut self, item: &T) {
        if let Some(key) = self.keys.remove(item) {
            self.keys.insert(item.clone(), key.clone());
            self.items.insert(key, item.clone());
        }
    }

    /// Number of live keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Whether no keys are live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Iterate live `(key, item)` pairs in arbitrary order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &T)> + '_ {
        self.items.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl<T: Item> Default for KeyMapper<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Item> fmt::Debug for KeyMapper<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyMapper")
            .field("live_keys", &self.keys.len())
            .field("next_id", &self.next_id)
            .field("unique_keys", &self.unique_key_provider.is_some())
            .finish()
    }
}
