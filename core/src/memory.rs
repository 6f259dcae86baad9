use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::broadcast;

use crate::error::{TrackerError, TrackerResult};
use crate::store::{RemoteStore, Subscription};
use crate::tree;

const CHANGE_CAPACITY: usize = 256;

/// In-process realtime store.
///
/// Behaves like the hosted store from the caller's side: path-addressed
/// reads, last-write-wins writes and change notifications. Writes can be
/// made to fail on demand to exercise transient-failure handling.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

struct Inner {
    tree: Mutex<Value>,
    changes: broadcast::Sender<String>,
    fail_writes: AtomicBool,
    write_log: Mutex<Vec<String>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                tree: Mutex::new(Value::Null),
                changes,
                fail_writes: AtomicBool::new(false),
                write_log: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Make every subsequent write fail (or succeed again).
    pub fn fail_writes(&self, fail: bool) {
        self.inner.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Paths written so far, oldest first.
    #[must_use]
    pub fn written_paths(&self) -> Vec<String> {
        self.inner
            .write_log
            .lock()
            .map(|log| log.clone())
            .unwrap_or_default()
    }

    /// The whole tree, for inspection.
    #[must_use]
    pub fn dump(&self) -> Value {
        self.inner
            .tree
            .lock()
            .map(|t| t.clone())
            .unwrap_or(Value::Null)
    }

    fn lock_tree<'a>(inner: &'a Inner, path: &str) -> TrackerResult<MutexGuard<'a, Value>> {
        inner
            .tree
            .lock()
            .map_err(|_| TrackerError::store(path, "store lock poisoned"))
    }

    fn read(inner: &Inner, path: &str) -> TrackerResult<Value> {
        let segs = tree::segments(path)?;
        let root = Self::lock_tree(inner, path)?;
        Ok(tree::get(&root, &segs).cloned().unwrap_or(Value::Null))
    }

    fn write<F>(&self, path: &str, apply: F) -> TrackerResult<()>
    where
        F: FnOnce(&mut Value, &[&str]) -> TrackerResult<()>,
    {
        if self.inner.fail_writes.load(Ordering::SeqCst) {
            return Err(TrackerError::store(path, "write rejected: store offline"));
        }
        let segs = tree::segments(path)?;
        {
            let mut root = Self::lock_tree(&self.inner, path)?;
            apply(&mut root, &segs)?;
        }
        let normalized = segs.join("/");
        if let Ok(mut log) = self.inner.write_log.lock() {
            log.push(normalized.clone());
        }
        // No receivers is fine.
        let _ = self.inner.changes.send(normalized);
        Ok(())
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn get(&self, path: &str) -> TrackerResult<Value> {
        Self::read(&self.inner, path)
    }

    async fn set(&self, path: &str, value: Value) -> TrackerResult<()> {
        self.write(path, |root, segs| {
            tree::set(root, segs, value);
            Ok(())
        })
    }

    async fn update(&self, path: &str, fields: Map<String, Value>) -> TrackerResult<()> {
        self.write(path, |root, segs| tree::update(root, segs, fields))
    }

    async fn get_or_create(&self, path: &str, default: Value) -> TrackerResult<Value> {
        let segs = tree::segments(path)?;
        {
            let root = Self::lock_tree(&self.inner, path)?;
            if let Some(existing) = tree::get(&root, &segs) {
                return Ok(existing.clone());
            }
        }
        // The check and the write take the lock separately; re-check under
        // the write so two racing creators keep the first value.
        let mut stored = Value::Null;
        self.write(path, |root, segs| {
            if let Some(existing) = tree::get(root, segs) {
                stored = existing.clone();
            } else {
                tree::set(root, segs, default.clone());
                stored = default;
            }
            Ok(())
        })?;
        Ok(stored)
    }

    fn subscribe(&self, path: &str) -> TrackerResult<Subscription> {
        let changes = self.inner.changes.subscribe();
        let inner = Arc::clone(&self.inner);
        Subscription::spawn(path, changes, move |p| Self::read(&inner, p))
    }
}
