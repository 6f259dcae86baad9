use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{Local, NaiveDateTime};
use rusqlite::{Connection, OptionalExtension, params};
use serde_json::{Map, Value};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::cache::LocalCache;
use crate::error::{TrackerError, TrackerResult};
use crate::sensor::{SensorSample, SensorWatch, StepSensor, steps_between};
use crate::store::{RemoteStore, Subscription};
use crate::tree;

const READING_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";
const CHANGE_CAPACITY: usize = 256;
const SAMPLE_CAPACITY: usize = 64;

/// Local SQLite persistence.
///
/// The shared record tree is stored as one JSON document per top-level
/// node (`users/{uid}`), so a path like `users/{uid}/steps/2024-06-15` is
/// read and written inside that user's document.
pub struct Database {
    conn: Connection,
}

impl Database {
    pub fn open(path: &Path) -> TrackerResult<Self> {
        let conn = Connection::open(path)?;
        let db = Database { conn };
        db.migrate()?;
        tracing::debug!(path = %path.display(), "database opened");
        Ok(db)
    }

    pub fn open_in_memory() -> TrackerResult<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Database { conn };
        db.migrate()?;
        Ok(db)
    }

    fn migrate(&self) -> TrackerResult<()> {
        let version: i64 = self
            .conn
            .pragma_query_value(None, "user_version", |row| row.get(0))?;

        if version < 1 {
            self.conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS documents (
                    root TEXT PRIMARY KEY NOT NULL,
                    body TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS device_cache (
                    key TEXT PRIMARY KEY NOT NULL,
                    value TEXT NOT NULL,
                    updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now'))
                );

                CREATE TABLE IF NOT EXISTS config (
                    key TEXT PRIMARY KEY,
                    value TEXT NOT NULL
                );

                PRAGMA user_version = 1;",
            )?;
        }

        if version < 2 {
            self.conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS sensor_readings (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    recorded_at TEXT NOT NULL,
                    steps INTEGER NOT NULL CHECK (steps >= 0)
                );
                CREATE INDEX IF NOT EXISTS idx_sensor_readings_at ON sensor_readings(recorded_at);

                PRAGMA user_version = 2;",
            )?;
        }

        Ok(())
    }

    // --- Record tree ---

    fn split_root<'a>(path: &str, segs: &'a [&'a str]) -> TrackerResult<(String, &'a [&'a str])> {
        if segs.len() < 2 {
            return Err(TrackerError::InvalidInput(format!(
                "Path '{path}' must address a node below a user root"
            )));
        }
        Ok((segs[..2].join("/"), &segs[2..]))
    }

    fn load_document(&self, root: &str) -> TrackerResult<Value> {
        let body: Option<String> = self
            .conn
            .query_row(
                "SELECT body FROM documents WHERE root = ?1",
                params![root],
                |row| row.get(0),
            )
            .optional()?;
        match body {
            Some(b) => Ok(serde_json::from_str(&b)?),
            None => Ok(Value::Null),
        }
    }

    fn save_document(&self, root: &str, doc: &Value) -> TrackerResult<()> {
        if doc.is_null() {
            self.conn
                .execute("DELETE FROM documents WHERE root = ?1", params![root])?;
            return Ok(());
        }
        let now = Local::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO documents (root, body, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(root) DO UPDATE SET body = excluded.body, updated_at = excluded.updated_at",
            params![root, serde_json::to_string(doc)?, now],
        )?;
        Ok(())
    }

    /// Read the node at `path`; absent nodes read as `Null`.
    pub fn read_path(&self, path: &str) -> TrackerResult<Value> {
        let segs = tree::segments(path)?;
        let (root, rest) = Self::split_root(path, &segs)?;
        let doc = self.load_document(&root)?;
        Ok(tree::get(&doc, rest).cloned().unwrap_or(Value::Null))
    }

    /// Apply `edit` to the document holding `path` and persist the result.
    /// Returns the normalised path that was written.
    pub fn write_path<F>(&self, path: &str, edit: F) -> TrackerResult<String>
    where
        F: FnOnce(&mut Value, &[&str]) -> TrackerResult<()>,
    {
        let segs = tree::segments(path)?;
        let (root, rest) = Self::split_root(path, &segs)?;
        let mut doc = self.load_document(&root)?;
        edit(&mut doc, rest)?;
        self.save_document(&root, &doc)?;
        Ok(segs.join("/"))
    }

    // --- Device cache ---

    pub fn set_cache_item(&self, key: &str, value: &str) -> TrackerResult<()> {
        let now = Local::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO device_cache (key, value, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, value, now],
        )?;
        Ok(())
    }

    pub fn get_cache_item(&self, key: &str) -> TrackerResult<Option<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT value FROM device_cache WHERE key = ?1")?;
        let mut rows = stmt.query(params![key])?;
        if let Some(row) = rows.next()? {
            Ok(Some(row.get(0)?))
        } else {
            Ok(None)
        }
    }

    pub fn remove_cache_item(&self, key: &str) -> TrackerResult<bool> {
        let rows = self
            .conn
            .execute("DELETE FROM device_cache WHERE key = ?1", params![key])?;
        Ok(rows > 0)
    }

    pub fn get_or_create_device_id(&self) -> TrackerResult<String> {
        let existing: Option<String> = self
            .conn
            .query_row(
                "SELECT value FROM config WHERE key = 'device_id'",
                [],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(id) = existing {
            return Ok(id);
        }

        let device_id = Uuid::new_v4().to_string();
        self.conn.execute(
            "INSERT INTO config (key, value) VALUES ('device_id', ?1)",
            params![device_id],
        )?;
        Ok(device_id)
    }

    // --- Sensor readings ---

    pub fn insert_reading(&self, at: NaiveDateTime, steps: u64) -> TrackerResult<()> {
        let steps = i64::try_from(steps)
            .map_err(|_| TrackerError::InvalidInput(format!("Reading {steps} is too large")))?;
        self.conn.execute(
            "INSERT INTO sensor_readings (recorded_at, steps) VALUES (?1, ?2)",
            params![at.format(READING_FORMAT).to_string(), steps],
        )?;
        Ok(())
    }

    fn reading_from_row(row: &rusqlite::Row) -> rusqlite::Result<(String, i64)> {
        Ok((row.get(0)?, row.get(1)?))
    }

    fn to_sample((at, steps): (String, i64)) -> TrackerResult<SensorSample> {
        Ok(SensorSample {
            at: NaiveDateTime::parse_from_str(&at, READING_FORMAT)?,
            steps: u64::try_from(steps).unwrap_or(0),
        })
    }

    /// Readings taken inside `[start, end]`, oldest first.
    pub fn readings_between(
        &self,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> TrackerResult<Vec<SensorSample>> {
        let mut stmt = self.conn.prepare(
            "SELECT recorded_at, steps FROM sensor_readings
             WHERE recorded_at >= ?1 AND recorded_at <= ?2
             ORDER BY recorded_at, id",
        )?;
        let rows = stmt.query_map(
            params![
                start.format(READING_FORMAT).to_string(),
                end.format(READING_FORMAT).to_string()
            ],
            Self::reading_from_row,
        )?;
        let mut results = Vec::new();
        for row in rows {
            results.push(Self::to_sample(row?)?);
        }
        Ok(results)
    }

    /// The newest reading taken strictly before `at`.
    pub fn reading_before(&self, at: NaiveDateTime) -> TrackerResult<Option<SensorSample>> {
        self.conn
            .query_row(
                "SELECT recorded_at, steps FROM sensor_readings
                 WHERE recorded_at < ?1
                 ORDER BY recorded_at DESC, id DESC LIMIT 1",
                params![at.format(READING_FORMAT).to_string()],
                Self::reading_from_row,
            )
            .optional()?
            .map(Self::to_sample)
            .transpose()
    }

    pub fn latest_reading(&self) -> TrackerResult<Option<SensorSample>> {
        self.conn
            .query_row(
                "SELECT recorded_at, steps FROM sensor_readings
                 ORDER BY recorded_at DESC, id DESC LIMIT 1",
                [],
                Self::reading_from_row,
            )
            .optional()?
            .map(Self::to_sample)
            .transpose()
    }
}

/// A [`Database`] shared between the remote-store, local-cache and sensor
/// roles, so a single file can back the whole tracker on one machine.
#[derive(Clone)]
pub struct SqliteBackend {
    db: Arc<Mutex<Database>>,
    changes: broadcast::Sender<String>,
    readings: broadcast::Sender<SensorSample>,
}

impl SqliteBackend {
    #[must_use]
    pub fn new(db: Database) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CAPACITY);
        let (readings, _) = broadcast::channel(SAMPLE_CAPACITY);
        Self {
            db: Arc::new(Mutex::new(db)),
            changes,
            readings,
        }
    }

    pub fn open(path: &Path) -> TrackerResult<Self> {
        Ok(Self::new(Database::open(path)?))
    }

    pub fn open_in_memory() -> TrackerResult<Self> {
        Ok(Self::new(Database::open_in_memory()?))
    }

    fn lock(db: &Mutex<Database>) -> TrackerResult<MutexGuard<'_, Database>> {
        db.lock()
            .map_err(|_| TrackerError::InvalidInput("database lock poisoned".to_string()))
    }

    /// Run `f` with exclusive access to the database.
    pub fn with_db<T>(&self, f: impl FnOnce(&Database) -> TrackerResult<T>) -> TrackerResult<T> {
        let db = Self::lock(&self.db)?;
        f(&db)
    }

    /// Append a cumulative pedometer reading and publish it to watchers.
    pub fn record_reading(&self, at: NaiveDateTime, steps: u64) -> TrackerResult<()> {
        self.with_db(|db| db.insert_reading(at, steps))?;
        let _ = self.readings.send(SensorSample { at, steps });
        Ok(())
    }

    fn write(
        &self,
        path: &str,
        edit: impl FnOnce(&mut Value, &[&str]) -> TrackerResult<()>,
    ) -> TrackerResult<()> {
        let written = self
            .with_db(|db| db.write_path(path, edit))
            .map_err(|e| match e {
                TrackerError::Database(err) => TrackerError::store(path, err.to_string()),
                other => other,
            })?;
        let _ = self.changes.send(written);
        Ok(())
    }
}

#[async_trait]
impl RemoteStore for SqliteBackend {
    async fn get(&self, path: &str) -> TrackerResult<Value> {
        self.with_db(|db| db.read_path(path))
    }

    async fn set(&self, path: &str, value: Value) -> TrackerResult<()> {
        self.write(path, |doc, segs| {
            tree::set(doc, segs, value);
            Ok(())
        })
    }

    async fn update(&self, path: &str, fields: Map<String, Value>) -> TrackerResult<()> {
        self.write(path, |doc, segs| tree::update(doc, segs, fields))
    }

    async fn get_or_create(&self, path: &str, default: Value) -> TrackerResult<Value> {
        // Check and create under one lock so concurrent creators agree.
        let mut stored = Value::Null;
        let mut created = false;
        let written = self.with_db(|db| {
            let existing = db.read_path(path)?;
            if !existing.is_null() {
                stored = existing;
                return Ok(None);
            }
            created = true;
            stored = default.clone();
            db.write_path(path, |doc, segs| {
                tree::set(doc, segs, default);
                Ok(())
            })
            .map(Some)
        })?;
        if let Some(p) = written {
            let _ = self.changes.send(p);
        }
        if created {
            tracing::debug!(path, "record created");
        }
        Ok(stored)
    }

    fn subscribe(&self, path: &str) -> TrackerResult<Subscription> {
        let changes = self.changes.subscribe();
        let db = Arc::clone(&self.db);
        Subscription::spawn(path, changes, move |p| Self::lock(&db)?.read_path(p))
    }
}

#[async_trait]
impl LocalCache for SqliteBackend {
    async fn get_item(&self, key: &str) -> TrackerResult<Option<String>> {
        self.with_db(|db| db.get_cache_item(key))
    }

    async fn set_item(&self, key: &str, value: &str) -> TrackerResult<()> {
        self.with_db(|db| db.set_cache_item(key, value))
    }

    async fn remove_item(&self, key: &str) -> TrackerResult<()> {
        self.with_db(|db| db.remove_cache_item(key).map(|_| ()))
    }
}

#[async_trait]
impl StepSensor for SqliteBackend {
    async fn is_available(&self) -> TrackerResult<bool> {
        Ok(true)
    }

    async fn step_count(&self, start: NaiveDateTime, end: NaiveDateTime) -> TrackerResult<u64> {
        let readings = self
            .with_db(|db| {
                let mut readings: Vec<SensorSample> = db.reading_before(start)?.into_iter().collect();
                readings.extend(db.readings_between(start, end)?);
                Ok(readings)
            })
            .map_err(|e| TrackerError::SensorUnavailable(e.to_string()))?;
        Ok(steps_between(&readings, start, end))
    }

    fn watch(&self) -> TrackerResult<SensorWatch> {
        Ok(SensorWatch::new(self.readings.subscribe()))
    }
}
