use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::{broadcast, mpsc};

use crate::error::TrackerResult;
use crate::session::TaskGuard;
use crate::tree;

/// A path-addressed realtime data store shared by all of a user's devices.
///
/// Reads return `Value::Null` for absent nodes. Writes are last-write-wins;
/// prefer [`RemoteStore::update`] so concurrent writers touching other
/// fields are not clobbered.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn get(&self, path: &str) -> TrackerResult<Value>;

    /// Replace the node at `path`.
    async fn set(&self, path: &str, value: Value) -> TrackerResult<()>;

    /// Write only the given child fields of `path`.
    async fn update(&self, path: &str, fields: Map<String, Value>) -> TrackerResult<()>;

    /// Atomically create `path` with `default` if it is absent, returning the
    /// stored value either way.
    async fn get_or_create(&self, path: &str, default: Value) -> TrackerResult<Value>;

    /// Follow `path`: the current value is delivered first, then a fresh
    /// snapshot after every change that can affect it.
    fn subscribe(&self, path: &str) -> TrackerResult<Subscription>;
}

/// Handle to a live listener. Dropping it releases the listener.
pub struct Subscription {
    path: String,
    rx: mpsc::UnboundedReceiver<Value>,
    _guard: TaskGuard,
}

impl Subscription {
    /// Start a listener task for `path`.
    ///
    /// `changes` must be subscribed before this is called so no write between
    /// the initial read and the first notification is missed. `fetch` reads
    /// the current value of a path.
    pub fn spawn<F>(path: &str, mut changes: broadcast::Receiver<String>, fetch: F) -> TrackerResult<Self>
    where
        F: Fn(&str) -> TrackerResult<Value> + Send + Sync + 'static,
    {
        let path = tree::normalize(path)?;
        let (tx, rx) = mpsc::unbounded_channel();
        let watched = path.clone();

        let handle = tokio::spawn(async move {
            let mut last: Option<Value> = None;
            let deliver = |last: &mut Option<Value>| -> bool {
                match fetch(&watched) {
                    Ok(value) => {
                        if last.as_ref() == Some(&value) {
                            return true;
                        }
                        *last = Some(value.clone());
                        tx.send(value).is_ok()
                    }
                    Err(e) => {
                        tracing::warn!(path = %watched, error = %e, "subscription read failed");
                        true
                    }
                }
            };

            if !deliver(&mut last) {
                return;
            }
            loop {
                match changes.recv().await {
                    Ok(changed) => {
                        if tree::overlaps(&changed, &watched) && !deliver(&mut last) {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::debug!(path = %watched, skipped, "subscription lagged, re-reading");
                        if !deliver(&mut last) {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        Ok(Self {
            path,
            rx,
            _guard: TaskGuard::new(handle),
        })
    }

    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Wait for the next snapshot. `None` once the store has gone away.
    pub async fn next(&mut self) -> Option<Value> {
        self.rx.recv().await
    }

    /// The most recent snapshot already delivered, skipping older ones.
    pub fn latest(&mut self) -> Option<Value> {
        let mut latest = None;
        while let Ok(v) = self.rx.try_recv() {
            latest = Some(v);
        }
        latest
    }

    /// Release the listener.
    pub fn unsubscribe(self) {}
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("path", &self.path).finish_non_exhaustive()
    }
}
