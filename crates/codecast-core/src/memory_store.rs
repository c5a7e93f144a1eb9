//! In-memory [`EventStore`] backed by a JSON tree.

use async_trait::async_trait;
use codecast_proto::{EventStore, StoreEntry, StoreError, StorePath, ValueStream};
use futures::StreamExt;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;
use tracing::trace;

struct Subscriber {
    path: StorePath,
    tx: watch::Sender<Option<Value>>,
}

/// Arrival sequences, shaped like the value tree.
#[derive(Default)]
struct SeqNode {
    /// Latest write at exactly this path.
    own: Option<u64>,
    /// Latest write at or beneath this path.
    latest: u64,
    children: HashMap<String, SeqNode>,
}

impl SeqNode {
    fn find(&self, path: &StorePath) -> Option<&SeqNode> {
        path.segments()
            .iter()
            .try_fold(self, |node, segment| node.children.get(segment))
    }

    /// Records a write at `path`; earlier writes beneath it are forgotten.
    fn record(&mut self, path: &StorePath, seq: u64) {
        let mut node = self;
        node.latest = seq;
        for segment in path.segments() {
            node = node.children.entry(segment.clone()).or_default();
            node.latest = seq;
        }
        node.own = Some(seq);
        node.children.clear();
    }

    /// Own write if there is one, otherwise the latest write beneath.
    fn seq(&self) -> u64 {
        self.own.unwrap_or(self.latest)
    }
}

struct Inner {
    root: Value,
    seqs: SeqNode,
    next_seq: u64,
    subscribers: Vec<Subscriber>,
}

impl Inner {
    fn lookup(&self, path: &StorePath) -> Option<&Value> {
        let mut node = &self.root;
        for segment in path.segments() {
            node = node.as_object()?.get(segment)?;
        }
        if node.is_null() { None } else { Some(node) }
    }

    fn write(&mut self, path: &StorePath, value: Value) {
        let Some((last, parents)) = path.segments().split_last() else {
            self.root = if value.is_null() {
                Value::Object(Map::new())
            } else {
                value
            };
            return;
        };

        let mut node = &mut self.root;
        for segment in parents {
            if !node.is_object() {
                *node = Value::Object(Map::new());
            }
            let Value::Object(map) = node else {
                unreachable!("node was just made an object");
            };
            node = map
                .entry(segment.clone())
                .or_insert_with(|| Value::Object(Map::new()));
        }
        if !node.is_object() {
            *node = Value::Object(Map::new());
        }
        if let Value::Object(map) = node {
            if value.is_null() {
                map.remove(last);
            } else {
                map.insert(last.clone(), value);
            }
        }
    }

    fn notify(&mut self, changed: &StorePath) {
        self.subscribers.retain(|s| !s.tx.is_closed());
        let updates: Vec<(usize, Option<Value>)> = self
            .subscribers
            .iter()
            .enumerate()
            .filter(|(_, s)| s.path.overlaps(changed))
            .map(|(i, s)| (i, self.lookup(&s.path).cloned()))
            .collect();
        for (i, value) in updates {
            self.subscribers[i].tx.send_replace(value);
        }
    }
}

/// Volatile store holding the whole tree in memory.
///
/// Writes of `null` delete the node, and writing below a non-object value
/// replaces it with an object.
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                root: Value::Object(Map::new()),
                seqs: SeqNode::default(),
                next_seq: 0,
                subscribers: Vec::new(),
            }),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Inner>, StoreError> {
        self.inner
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".into()))
    }

    /// Applies a write synchronously. Shared with the file-backed store.
    pub(crate) fn apply(&self, path: &StorePath, value: Value) -> Result<u64, StoreError> {
        let mut inner = self.lock()?;
        inner.next_seq += 1;
        let seq = inner.next_seq;
        inner.write(path, value);
        inner.seqs.record(path, seq);
        inner.notify(path);
        trace!(%path, seq, "Store write applied");
        Ok(seq)
    }

    /// Total number of writes applied so far.
    pub fn write_count(&self) -> u64 {
        self.inner.lock().map(|i| i.next_seq).unwrap_or(0)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventStore for MemoryStore {
    async fn set(&self, path: &StorePath, value: Value) -> Result<(), StoreError> {
        self.apply(path, value).map(|_| ())
    }

    async fn get(&self, path: &StorePath) -> Result<Option<Value>, StoreError> {
        Ok(self.lock()?.lookup(path).cloned())
    }

    async fn children(&self, path: &StorePath) -> Result<Vec<StoreEntry>, StoreError> {
        let inner = self.lock()?;
        let Some(Value::Object(map)) = inner.lookup(path) else {
            return Ok(Vec::new());
        };
        let seqs = inner.seqs.find(path);
        let mut entries: Vec<StoreEntry> = map
            .iter()
            .map(|(key, value)| StoreEntry {
                key: key.clone(),
                value: value.clone(),
                seq: seqs
                    .and_then(|node| node.children.get(key))
                    .map_or(0, SeqNode::seq),
            })
            .collect();
        entries.sort_by(|a, b| a.seq.cmp(&b.seq).then_with(|| a.key.cmp(&b.key)));
        Ok(entries)
    }

    fn subscribe(&self, path: &StorePath) -> ValueStream {
        let Ok(mut inner) = self.inner.lock() else {
            return futures::stream::empty().boxed();
        };
        let (tx, rx) = watch::channel(inner.lookup(path).cloned());
        inner.subscribers.push(Subscriber {
            path: path.clone(),
            tx,
        });
        WatchStream::new(rx).boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_set_and_get_nested() {
        let store = MemoryStore::new();
        store
            .set(&StorePath::parse("/sessions/s1/name"), json!("demo"))
            .await
            .unwrap();
        store
            .set(&StorePath::parse("/sessions/s1/recording"), json!(true))
            .await
            .unwrap();

        let node = store.get(&StorePath::parse("/sessions/s1")).await.unwrap();
        assert_eq!(node, Some(json!({"name": "demo", "recording": true})));
        assert_eq!(
            store.get(&StorePath::parse("/sessions/s2")).await.unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn test_null_deletes() {
        let store = MemoryStore::new();
        let path = StorePath::parse("/a/b");
        store.set(&path, json!(1)).await.unwrap();
        store.set(&path, Value::Null).await.unwrap();
        assert_eq!(store.get(&path).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_children_in_arrival_order() {
        let store = MemoryStore::new();
        let base = StorePath::parse("/sessions/s1/code");
        for key in ["1000", "20", "300"] {
            store.set(&base.clone().child(key), json!(key)).await.unwrap();
        }
        let keys: Vec<String> = store
            .children(&base)
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.key)
            .collect();
        assert_eq!(keys, vec!["1000", "20", "300"]);
    }

    #[tokio::test]
    async fn test_overwrite_moves_entry_to_latest_arrival() {
        let store = MemoryStore::new();
        let base = StorePath::parse("/x");
        store.set(&base.clone().child("a"), json!(1)).await.unwrap();
        store.set(&base.clone().child("b"), json!(2)).await.unwrap();
        store.set(&base.clone().child("a"), json!(3)).await.unwrap();

        let entries = store.children(&base).await.unwrap();
        assert_eq!(entries[0].key, "b");
        assert_eq!(entries[1].key, "a");
        assert_eq!(entries[1].value, json!(3));
        assert_eq!(store.write_count(), 3);
    }

    #[tokio::test]
    async fn test_parent_ordered_by_latest_write_beneath() {
        let store = MemoryStore::new();
        store.set(&StorePath::parse("/s/a/x"), json!(1)).await.unwrap();
        store.set(&StorePath::parse("/s/b"), json!(2)).await.unwrap();
        store.set(&StorePath::parse("/s/a/y"), json!(3)).await.unwrap();

        let entries = store.children(&StorePath::parse("/s")).await.unwrap();
        let order: Vec<(&str, u64)> = entries.iter().map(|e| (e.key.as_str(), e.seq)).collect();
        assert_eq!(order, vec![("b", 2), ("a", 3)]);
    }

    #[tokio::test]
    async fn test_long_recording_children_keep_arrival_order() {
        let store = MemoryStore::new();
        let base = StorePath::parse("/sessions/long/code");
        for offset in (0..20_000u64).rev() {
            store
                .set(&base.clone().child(offset.to_string()), json!(offset))
                .await
                .unwrap();
        }
        let entries = store.children(&base).await.unwrap();
        assert_eq!(entries.len(), 20_000);
        assert_eq!(entries[0].key, "19999");
        assert_eq!(entries[19_999].key, "0");
        assert!(entries.windows(2).all(|w| w[0].seq < w[1].seq));
    }

    #[tokio::test]
    async fn test_subscribe_yields_current_then_updates() {
        let store = MemoryStore::new();
        let session = StorePath::parse("/sessions/s1");
        store
            .set(&session.clone().child("name"), json!("first"))
            .await
            .unwrap();

        let mut stream = store.subscribe(&session);
        assert_eq!(stream.next().await, Some(Some(json!({"name": "first"}))));

        store
            .set(&session.clone().child("name"), json!("second"))
            .await
            .unwrap();
        assert_eq!(stream.next().await, Some(Some(json!({"name": "second"}))));
    }

    #[tokio::test]
    async fn test_unrelated_writes_do_not_notify() {
        let store = MemoryStore::new();
        let mut stream = store.subscribe(&StorePath::parse("/sessions/s1"));
        assert_eq!(stream.next().await, Some(None));

        store
            .set(&StorePath::parse("/sessions/s2/name"), json!("other"))
            .await
            .unwrap();
        let pending = tokio::time::timeout(std::time::Duration::from_millis(50), stream.next()).await;
        assert!(pending.is_err(), "no update expected for unrelated path");
    }

    #[tokio::test]
    async fn test_dropped_subscriptions_are_pruned() {
        let store = MemoryStore::new();
        let stream = store.subscribe(&StorePath::parse("/a"));
        drop(stream);
        store.set(&StorePath::parse("/a"), json!(1)).await.unwrap();
        assert!(store.inner.lock().unwrap().subscribers.is_empty());
    }
}
