use std::future::Future;
use std::sync::Mutex;

use chrono::NaiveDate;
use tokio::task::JoinHandle;

use crate::error::{TrackerError, TrackerResult};
use crate::models::{SeriesKind, format_date};

/// The signed-in user a tracker works for. Every store path is built from
/// this rather than from ambient state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserSession {
    uid: String,
}

impl UserSession {
    pub fn new(uid: impl Into<String>) -> TrackerResult<Self> {
        let uid = uid.into();
        let trimmed = uid.trim();
        if trimmed.is_empty() {
            return Err(TrackerError::InvalidInput(
                "User id must not be empty".to_string(),
            ));
        }
        if trimmed.contains(['/', '.', '#', '$', '[', ']']) {
            return Err(TrackerError::InvalidInput(format!(
                "User id '{trimmed}' contains a reserved character"
            )));
        }
        Ok(Self {
            uid: trimmed.to_string(),
        })
    }

    #[must_use]
    pub fn uid(&self) -> &str {
        &self.uid
    }

    /// `users/{uid}`: profile, goals, points and level.
    #[must_use]
    pub fn root_path(&self) -> String {
        format!("users/{}", self.uid)
    }

    #[must_use]
    pub fn steps_path(&self, date: NaiveDate) -> String {
        format!("users/{}/steps/{}", self.uid, format_date(date))
    }

    #[must_use]
    pub fn water_path(&self, date: NaiveDate) -> String {
        format!("users/{}/water/{}", self.uid, format_date(date))
    }

    #[must_use]
    pub fn today_path(&self) -> String {
        format!("users/{}/today", self.uid)
    }

    #[must_use]
    pub fn collection_path(&self, kind: SeriesKind) -> String {
        format!("users/{}/{}", self.uid, kind.collection())
    }
}

/// Aborts the wrapped task when dropped.
#[derive(Debug)]
pub struct TaskGuard(JoinHandle<()>);

impl TaskGuard {
    #[must_use]
    pub fn new(handle: JoinHandle<()>) -> Self {
        Self(handle)
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.0.is_finished()
    }
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Owns the background work of one screen or session: sensor watches and
/// store listeners. Everything it owns stops when the scope ends or is
/// dropped.
#[derive(Debug, Default)]
pub struct SessionScope {
    tasks: Mutex<Vec<TaskGuard>>,
}

impl SessionScope {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn spawn<F>(&self, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let guard = TaskGuard::new(tokio::spawn(fut));
        if let Ok(mut tasks) = self.tasks.lock() {
            tasks.retain(|t| !t.is_finished());
            tasks.push(guard);
        }
    }

    /// Number of tasks still running.
    #[must_use]
    pub fn active(&self) -> usize {
        self.tasks
            .lock()
            .map(|tasks| tasks.iter().filter(|t| !t.is_finished()).count())
            .unwrap_or(0)
    }

    /// Release everything the scope owns.
    pub fn end(&self) {
        let released = self
            .tasks
            .lock()
            .map(|mut tasks| std::mem::take(&mut *tasks))
            .unwrap_or_default();
        tracing::debug!(tasks = released.len(), "session scope ended");
        drop(released);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_user_session_paths() {
        let session = UserSession::new("abc123").unwrap();
        let date = NaiveDate::from_ymd_opt(2024, 6, 15).unwrap();
        assert_eq!(session.root_path(), "users/abc123");
        assert_eq!(session.steps_path(date), "users/abc123/steps/2024-06-15");
        assert_eq!(session.water_path(date), "users/abc123/water/2024-06-15");
        assert_eq!(session.today_path(), "users/abc123/today");
        assert_eq!(session.collection_path(SeriesKind::Water), "users/abc123/water");
    }

    #[test]
    fn test_user_session_rejects_bad_ids() {
        assert!(UserSession::new("").is_err());
        assert!(UserSession::new("   ").is_err());
        assert!(UserSession::new("a/b").is_err());
        assert!(UserSession::new("a.b").is_err());
    }

    #[tokio::test]
    async fn test_scope_end_aborts_tasks() {
        let scope = SessionScope::new();
        scope.spawn(async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        });
        assert_eq!(scope.active(), 1);
        scope.end();
        assert_eq!(scope.active(), 0);
    }

    #[tokio::test]
    async fn test_task_guard_aborts_on_drop() {
        let (tx, mut rx) = tokio::sync::mpsc::channel::<()>(1);
        let guard = TaskGuard::new(tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            let _ = tx.send(()).await;
        }));
        drop(guard);
        // The sender is dropped with the aborted task.
        assert!(rx.recv().await.is_none());
    }
}
