use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use vmsteward_core::Resource;

/// Last known state of an object whose deletion was missed by the watch.
///
/// Produced when a relist no longer contains an object that is still in the
/// cache. The object may be stale.
#[derive(Debug, Clone, PartialEq)]
pub struct DeletedFinalStateUnknown<K> {
    pub key: String,
    pub obj: K,
}

/// Payload of a delete notification
#[derive(Debug, Clone, PartialEq)]
pub enum DeletedObject<K> {
    /// The deletion was observed directly
    Live(K),
    /// The deletion was inferred from a relist
    Tombstone(DeletedFinalStateUnknown<K>),
}

impl<K> DeletedObject<K> {
    /// Normalize to the (last known) object
    pub fn into_object(self) -> K {
        match self {
            DeletedObject::Live(obj) => obj,
            DeletedObject::Tombstone(tombstone) => tombstone.obj,
        }
    }
}

/// Callbacks invoked after the cache applied a change
pub trait ResourceEventHandler<K>: Send + Sync {
    fn on_add(&self, obj: &K);

    fn on_update(&self, old: &K, new: &K);

    fn on_delete(&self, obj: DeletedObject<K>);
}

/// Thread-safe object cache keyed by `namespace/name`, indexed by namespace
pub struct Store<K> {
    items: RwLock<HashMap<String, K>>,
    namespace_index: RwLock<HashMap<String, BTreeSet<String>>>,
}

impl<K: Resource> Default for Store<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Resource> Store<K> {
    pub fn new() -> Self {
        Self {
            items: RwLock::new(HashMap::new()),
            namespace_index: RwLock::new(HashMap::new()),
        }
    }

    /// Fetch a copy of the object stored under `key`
    pub fn get_by_key(&self, key: &str) -> Option<K> {
        self.items.read().get(key).cloned()
    }

    /// All objects of a namespace, ordered by key
    pub fn by_namespace(&self, namespace: &str) -> Vec<K> {
        let index = self.namespace_index.read();
        let items = self.items.read();
        index
            .get(namespace)
            .map(|keys| keys.iter().filter_map(|k| items.get(k).cloned()).collect())
            .unwrap_or_default()
    }

    pub fn list_keys(&self) -> Vec<String> {
        self.items.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Insert or replace an object, returning the previous version
    fn upsert(&self, key: String, obj: K) -> Option<K> {
        let namespace = obj.namespace().to_string();
        self.namespace_index
            .write()
            .entry(namespace)
            .or_default()
            .insert(key.clone());
        self.items.write().insert(key, obj)
    }

    fn remove(&self, key: &str) -> Option<K> {
        let removed = self.items.write().remove(key)?;
        let mut index = self.namespace_index.write();
        if let Some(keys) = index.get_mut(removed.namespace()) {
            keys.remove(key);
            if keys.is_empty() {
                index.remove(removed.namespace());
            }
        }
        Some(removed)
    }
}

/// A store plus the handlers interested in its changes
pub struct Informer<K> {
    name: String,
    store: Store<K>,
    handlers: RwLock<Vec<Arc<dyn ResourceEventHandler<K>>>>,
    synced: watch::Sender<bool>,
}

impl<K: Resource> Informer<K> {
    pub fn new(name: impl Into<String>) -> Self {
        let (synced, _) = watch::channel(false);
        Self {
            name: name.into(),
            store: Store::new(),
            handlers: RwLock::new(Vec::new()),
            synced,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn store(&self) -> &Store<K> {
        &self.store
    }

    pub fn add_event_handler(&self, handler: Arc<dyn ResourceEventHandler<K>>) {
        self.handlers.write().push(handler);
    }

    fn handlers(&self) -> Vec<Arc<dyn ResourceEventHandler<K>>> {
        self.handlers.read().clone()
    }

    /// Apply an added object (an add for a known key is an update)
    pub fn add(&self, obj: K) {
        let key = match obj.key() {
            Ok(k) => k,
            Err(e) => {
                warn!("{} informer: dropping object without key: {}", self.name, e);
                return;
            }
        };

        match self.store.upsert(key, obj.clone()) {
            Some(old) => self.notify_update(&old, &obj),
            None => {
                for handler in self.handlers() {
                    handler.on_add(&obj);
                }
            }
        }
    }

    /// Apply a modified object
    pub fn update(&self, obj: K) {
        self.add(obj);
    }

    /// Apply an observed deletion
    pub fn delete(&self, obj: K) {
        let Ok(key) = obj.key() else {
            return;
        };
        self.store.remove(&key);
        for handler in self.handlers() {
            handler.on_delete(DeletedObject::Live(obj.clone()));
        }
    }

    /// Replace the cache content with a full listing.
    ///
    /// New objects produce adds, retained objects produce updates (even when
    /// unchanged) and objects missing from the listing produce tombstones.
    pub fn replace(&self, objects: Vec<K>) {
        let mut listed = HashMap::with_capacity(objects.len());
        for obj in objects {
            match obj.key() {
                Ok(key) => {
                    listed.insert(key, obj);
                }
                Err(e) => warn!("{} informer: skipping object without key: {}", self.name, e),
            }
        }

        for key in self.store.list_keys() {
            if listed.contains_key(&key) {
                continue;
            }
            if let Some(last_known) = self.store.remove(&key) {
                debug!("{} informer: {} vanished between lists", self.name, key);
                let tombstone = DeletedFinalStateUnknown {
                    key,
                    obj: last_known,
                };
                for handler in self.handlers() {
                    handler.on_delete(DeletedObject::Tombstone(tombstone.clone()));
                }
            }
        }

        for obj in listed.into_values() {
            self.add(obj);
        }
    }

    fn notify_update(&self, old: &K, new: &K) {
        for handler in self.handlers() {
            handler.on_update(old, new);
        }
    }

    /// Record that the initial listing has been applied
    pub fn mark_synced(&self) {
        if !*self.synced.borrow() {
            info!("{} informer synced ({} objects)", self.name, self.store.len());
        }
        self.synced.send_replace(true);
    }

    pub fn has_synced(&self) -> bool {
        *self.synced.borrow()
    }

    /// Wait until the initial listing has been applied.
    /// Returns false if `token` is cancelled first.
    pub async fn wait_for_sync(&self, token: &CancellationToken) -> bool {
        let mut rx = self.synced.subscribe();
        tokio::select! {
            res = rx.wait_for(|synced| *synced) => res.is_ok(),
            _ = token.cancelled() => false,
        }
    }
}
