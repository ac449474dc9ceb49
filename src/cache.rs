//! Memoization of resolved schemas per connection, collection, base query and
//! sample size.
//!
//! The cache is an explicit object passed to (or owned by) the resolver's
//! caller rather than a process-wide singleton; by convention its lifetime is
//! the process, but construction is always explicit. One mutex guards lookup
//! and insert, entries are plain value copies, and invalidation is a full
//! wipe — changing the sample-size setting changes resolved schemas, so it
//! must be followed by [`BindCache::clear`].

use crate::{options::ConnectionOptions, schema::Schema};
use serde_json::Value;
use std::{
    collections::HashMap,
    sync::Mutex,
};

/// The parameters that affect a resolved schema. Transport tuning (timeouts,
/// retries) is deliberately excluded since it cannot change the result.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BindCacheKey {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub use_tls: bool,
    pub verify_tls: bool,
    pub collection: String,
    /// Canonical serialization of the base query clause, if any.
    pub base_query: Option<String>,
    pub sample_size: u32,
}

impl BindCacheKey {
    pub fn new(
        options: &ConnectionOptions,
        collection: &str,
        base_query: Option<&Value>,
    ) -> Self {
        Self {
            host: options.host.clone(),
            port: options.port,
            username: options.username.clone(),
            password: options.password.clone(),
            use_tls: options.use_tls,
            verify_tls: options.verify_tls,
            collection: collection.to_string(),
            base_query: base_query.map(Value::to_string),
            sample_size: options.sample_size,
        }
    }
}

#[derive(Debug, Default)]
pub struct BindCache {
    entries: Mutex<HashMap<BindCacheKey, Schema>>,
}

impl BindCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of the cached schema, if any. Entries never alias
    /// across lookups.
    pub fn get(&self, key: &BindCacheKey) -> Option<Schema> {
        self.entries.lock().expect("bind cache lock").get(key).cloned()
    }

    pub fn put(&self, key: BindCacheKey, schema: Schema) {
        self.entries
            .lock()
            .expect("bind cache lock")
            .insert(key, schema);
    }

    /// Wipes the whole cache and returns the number of entries removed.
    /// There is no partial invalidation.
    pub fn clear(&self) -> usize {
        let mut entries = self.entries.lock().expect("bind cache lock");
        let count = entries.len();
        entries.clear();
        count
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("bind cache lock").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
