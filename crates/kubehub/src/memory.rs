use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use futures::stream::BoxStream;
use futures::StreamExt;
use kube::ResourceExt;
use tokio::sync::broadcast;

use crate::{selector_matches, ApiError, Shard, ShardApi, ShardEvent};

#[derive(Debug, Clone)]
struct Change {
    namespace: String,
    labels: BTreeMap<String, String>,
    event: ShardEvent,
}

/// In-memory shard store with resourceVersion checks, conflict injection and
/// write counters.
pub struct MemoryShardApi {
    objects: Arc<Mutex<BTreeMap<(String, String), Shard>>>,
    rv: AtomicU64,
    conflicts: AtomicUsize,
    unavailable: AtomicBool,
    creates: AtomicUsize,
    updates: AtomicUsize,
    update_attempts: AtomicUsize,
    deletes: AtomicUsize,
    changes: broadcast::Sender<Change>,
}

impl Default for MemoryShardApi {
    fn default() -> Self { Self::new() }
}

impl MemoryShardApi {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(256);
        Self {
            objects: Arc::new(Mutex::new(BTreeMap::new())),
            rv: AtomicU64::new(0),
            conflicts: AtomicUsize::new(0),
            unavailable: AtomicBool::new(false),
            creates: AtomicUsize::new(0),
            updates: AtomicUsize::new(0),
            update_attempts: AtomicUsize::new(0),
            deletes: AtomicUsize::new(0),
            changes,
        }
    }

    /// The next `n` updates fail with `Conflict` regardless of resourceVersion.
    pub fn inject_conflicts(&self, n: usize) { self.conflicts.store(n, Ordering::SeqCst); }

    /// Every call fails with `Unavailable` while set.
    pub fn set_unavailable(&self, down: bool) { self.unavailable.store(down, Ordering::SeqCst); }

    pub fn creates(&self) -> usize { self.creates.load(Ordering::SeqCst) }
    pub fn updates(&self) -> usize { self.updates.load(Ordering::SeqCst) }
    /// Every `update` call that reached the store, rejected ones included.
    pub fn update_attempts(&self) -> usize { self.update_attempts.load(Ordering::SeqCst) }
    pub fn deletes(&self) -> usize { self.deletes.load(Ordering::SeqCst) }
    pub fn writes(&self) -> usize { self.creates() + self.updates() + self.deletes() }

    pub fn snapshot(&self, namespace: &str) -> Vec<Shard> { namespaced(&self.objects, namespace) }

    /// Write as another actor would: no counters, no version check.
    pub fn put_external(&self, namespace: &str, mut shard: Shard) {
        let name = shard.name_any();
        shard.metadata.namespace = Some(namespace.to_string());
        shard.metadata.resource_version = Some(self.next_rv());
        let labels = shard.labels().clone();
        self.objects.lock().unwrap().insert((namespace.to_string(), name.clone()), shard);
        self.publish(namespace, labels, ShardEvent::Applied(name));
    }

    /// Delete as another actor would.
    pub fn remove_external(&self, namespace: &str, name: &str) -> Option<Shard> {
        let removed = self.objects.lock().unwrap().remove(&(namespace.to_string(), name.to_string()));
        if let Some(s) = &removed {
            self.publish(namespace, s.labels().clone(), ShardEvent::Deleted(name.to_string()));
        }
        removed
    }

    fn next_rv(&self) -> String { (self.rv.fetch_add(1, Ordering::SeqCst) + 1).to_string() }

    fn publish(&self, namespace: &str, labels: BTreeMap<String, String>, event: ShardEvent) {
        let _ = self.changes.send(Change { namespace: namespace.to_string(), labels, event });
    }

    fn check_up(&self) -> Result<(), ApiError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(ApiError::Unavailable("injected outage".into()));
        }
        Ok(())
    }

    fn take_conflict(&self) -> bool {
        self.conflicts.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1)).is_ok()
    }
}

fn namespaced(objects: &Mutex<BTreeMap<(String, String), Shard>>, namespace: &str) -> Vec<Shard> {
    let objects = objects.lock().unwrap();
    objects.iter().filter(|((ns, _), _)| ns == namespace).map(|(_, s)| s.clone()).collect()
}

fn matching(objects: &Mutex<BTreeMap<(String, String), Shard>>, namespace: &str, selector: &str) -> usize {
    namespaced(objects, namespace).iter().filter(|s| selector_matches(selector, s.metadata.labels.as_ref())).count()
}

#[async_trait::async_trait]
impl ShardApi for MemoryShardApi {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<Shard>, ApiError> {
        self.check_up()?;
        Ok(self.objects.lock().unwrap().get(&(namespace.to_string(), name.to_string())).cloned())
    }

    async fn create(&self, namespace: &str, shard: &Shard) -> Result<Shard, ApiError> {
        self.check_up()?;
        let name = shard.name_any();
        if name.is_empty() {
            return Err(ApiError::Invalid("metadata.name is required".into()));
        }
        let key = (namespace.to_string(), name.clone());
        let stored = {
            let mut objects = self.objects.lock().unwrap();
            if objects.contains_key(&key) {
                return Err(ApiError::AlreadyExists);
            }
            let mut stored = shard.clone();
            stored.metadata.namespace = Some(namespace.to_string());
            stored.metadata.resource_version = Some(self.next_rv());
            stored.status = None;
            objects.insert(key, stored.clone());
            stored
        };
        self.creates.fetch_add(1, Ordering::SeqCst);
        self.publish(namespace, stored.labels().clone(), ShardEvent::Applied(name));
        Ok(stored)
    }

    async fn update(&self, namespace: &str, shard: &Shard) -> Result<Shard, ApiError> {
        self.check_up()?;
        let name = shard.name_any();
        let key = (namespace.to_string(), name.clone());
        self.update_attempts.fetch_add(1, Ordering::SeqCst);
        let stored = {
            let mut objects = self.objects.lock().unwrap();
            let Some(current) = objects.get(&key) else {
                return Err(ApiError::NotFound);
            };
            if self.take_conflict() || current.metadata.resource_version != shard.metadata.resource_version {
                return Err(ApiError::Conflict);
            }
            let mut stored = shard.clone();
            stored.metadata.namespace = Some(namespace.to_string());
            stored.metadata.resource_version = Some(self.next_rv());
            // status is a subresource; replace never changes it
            stored.status = current.status.clone();
            objects.insert(key, stored.clone());
            stored
        };
        self.updates.fetch_add(1, Ordering::SeqCst);
        self.publish(namespace, stored.labels().clone(), ShardEvent::Applied(name));
        Ok(stored)
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<(), ApiError> {
        self.check_up()?;
        let removed = self.objects.lock().unwrap().remove(&(namespace.to_string(), name.to_string()));
        let Some(removed) = removed else {
            return Err(ApiError::NotFound);
        };
        self.deletes.fetch_add(1, Ordering::SeqCst);
        self.publish(namespace, removed.labels().clone(), ShardEvent::Deleted(name.to_string()));
        Ok(())
    }

    async fn list(&self, namespace: &str, selector: &str) -> Result<Vec<Shard>, ApiError> {
        self.check_up()?;
        Ok(self
            .snapshot(namespace)
            .into_iter()
            .filter(|s| selector_matches(selector, s.metadata.labels.as_ref()))
            .collect())
    }

    fn watch(&self, namespace: &str, selector: &str) -> BoxStream<'static, Result<ShardEvent, ApiError>> {
        let rx = self.changes.subscribe();
        let initial = matching(&self.objects, namespace, selector);
        let objects = self.objects.clone();
        let namespace = namespace.to_string();
        let selector = selector.to_string();
        let changes = futures::stream::unfold(rx, move |mut rx| {
            let objects = objects.clone();
            let namespace = namespace.clone();
            let selector = selector.clone();
            async move {
                loop {
                    match rx.recv().await {
                        Ok(c) if c.namespace == namespace && selector_matches(&selector, Some(&c.labels)) => {
                            return Some((Ok(c.event), rx));
                        }
                        Ok(_) => continue,
                        // missed events are replaced by a fresh list, as a real watcher does
                        Err(broadcast::error::RecvError::Lagged(_)) => {
                            return Some((Ok(ShardEvent::Restarted(matching(&objects, &namespace, &selector))), rx));
                        }
                        Err(broadcast::error::RecvError::Closed) => return None,
                    }
                }
            }
        });
        futures::stream::once(async move { Ok(ShardEvent::Restarted(initial)) }).chain(changes).boxed()
    }
}
