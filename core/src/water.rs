use std::sync::{Arc, Mutex};

use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use serde::Serialize;
use serde_json::{Map, Value, json};
use tokio::sync::Mutex as AsyncMutex;

use crate::clock::Clock;
use crate::error::TrackerResult;
use crate::models::{UserProfile, WaterRecord, format_date, validate_water_amount};
use crate::progress::points_for_water_addition;
use crate::session::UserSession;
use crate::store::{RemoteStore, Subscription};

/// Outcome of one water addition.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WaterAddition {
    pub record: WaterRecord,
    pub points_awarded: u64,
    /// Points total after the award; `None` when the award could not be
    /// written.
    pub total_points: Option<u64>,
}

/// Tracks a user's water intake for the current day.
pub struct WaterTracker {
    session: UserSession,
    store: Arc<dyn RemoteStore>,
    clock: Arc<dyn Clock>,
    /// One addition at a time, so two quick taps cannot lose an entry.
    op_lock: AsyncMutex<()>,
    view: Mutex<Option<WaterRecord>>,
}

impl WaterTracker {
    #[must_use]
    pub fn new(session: UserSession, store: Arc<dyn RemoteStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            session,
            store,
            clock,
            op_lock: AsyncMutex::new(()),
            view: Mutex::new(None),
        }
    }

    /// The record as last seen or optimistically updated, if any.
    #[must_use]
    pub fn current(&self) -> Option<WaterRecord> {
        self.view.lock().ok().and_then(|v| v.clone())
    }

    fn replace_view(&self, record: Option<WaterRecord>) -> Option<WaterRecord> {
        match self.view.lock() {
            Ok(mut v) => std::mem::replace(&mut *v, record),
            Err(_) => None,
        }
    }

    async fn read_record(&self, date: NaiveDate) -> TrackerResult<WaterRecord> {
        let path = self.session.water_path(date);
        let value = self.store.get(&path).await?;
        Ok(WaterRecord::from_value(&path, date, &value)?.unwrap_or_else(|| WaterRecord::empty(date)))
    }

    /// Read today's record from the store.
    pub async fn today(&self) -> TrackerResult<WaterRecord> {
        let record = self.read_record(self.clock.today()).await?;
        self.replace_view(Some(record.clone()));
        Ok(record)
    }

    /// Take a snapshot delivered by a listener as the current record.
    pub fn apply_snapshot(&self, date: NaiveDate, value: &Value) -> TrackerResult<WaterRecord> {
        let path = self.session.water_path(date);
        let record = WaterRecord::from_value(&path, date, value)?.unwrap_or_else(|| WaterRecord::empty(date));
        self.replace_view(Some(record.clone()));
        Ok(record)
    }

    pub async fn add_water(&self, amount_ml: u32) -> TrackerResult<WaterAddition> {
        let now = self.clock.now();
        self.add_water_at(amount_ml, now).await
    }

    /// Log `amount_ml` at `now`.
    ///
    /// If the day's record cannot be written the local view is rolled back
    /// and the error returned. Failures after that point are logged; a
    /// failed points award reports zero points.
    pub async fn add_water_at(
        &self,
        amount_ml: u32,
        now: NaiveDateTime,
    ) -> TrackerResult<WaterAddition> {
        validate_water_amount(amount_ml)?;
        let _turn = self.op_lock.lock().await;

        let date = now.date();
        let at = NaiveTime::from_hms_opt(now.hour(), now.minute(), 0).unwrap_or(NaiveTime::MIN);
        let current = self.read_record(date).await?;
        let next = current.with_addition(at, amount_ml)?;

        let previous = self.replace_view(Some(next.clone()));
        let path = self.session.water_path(date);
        if let Err(e) = self.store.set(&path, next.to_value()).await {
            tracing::warn!(path = %path, amount_ml, error = %e, "water write failed, rolling back");
            self.replace_view(previous);
            return Err(e);
        }

        let mut today = Map::new();
        today.insert("water_ml".into(), json!(next.amount_ml));
        today.insert("date".into(), json!(format_date(date)));
        if let Err(e) = self.store.update(&self.session.today_path(), today).await {
            tracing::warn!(error = %e, "could not update today summary with water");
        }

        let points = points_for_water_addition(amount_ml);
        let (points_awarded, total_points) = match self.award_points(points).await {
            Ok(total) => (points, Some(total)),
            Err(e) => {
                tracing::warn!(points, error = %e, "could not award water points");
                (0, None)
            }
        };

        tracing::info!(
            date = %format_date(date),
            amount_ml,
            total_ml = next.amount_ml,
            points_awarded,
            "water added"
        );
        Ok(WaterAddition {
            record: next,
            points_awarded,
            total_points,
        })
    }

    async fn award_points(&self, points: u64) -> TrackerResult<u64> {
        let root = self.session.root_path();
        let value = self.store.get(&root).await?;
        let current = UserProfile::from_value(&root, &value)?.map_or(0, |p| p.total_points);
        if points == 0 {
            return Ok(current);
        }
        let total = current.saturating_add(points);
        let mut fields = Map::new();
        fields.insert("total_points".into(), json!(total));
        self.store.update(&root, fields).await?;
        Ok(total)
    }

    /// Follow today's water record.
    pub fn watch_today(&self) -> TrackerResult<WaterWatch> {
        let date = self.clock.today();
        let sub = self.store.subscribe(&self.session.water_path(date))?;
        Ok(WaterWatch { sub, date })
    }
}

/// Live water record for one day. Dropping it releases the listener.
pub struct WaterWatch {
    sub: Subscription,
    date: NaiveDate,
}

impl WaterWatch {
    /// Next readable snapshot; unreadable ones are logged and skipped.
    pub async fn next(&mut self) -> Option<WaterRecord> {
        loop {
            let value = self.sub.next().await?;
            match WaterRecord::from_value(self.sub.path(), self.date, &value) {
                Ok(record) => return Some(record.unwrap_or_else(|| WaterRecord::empty(self.date))),
                Err(e) => tracing::warn!(error = %e, "ignoring unreadable water snapshot"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::error::TrackerError;
    use crate::memory::MemoryStore;
    use crate::models::{MAX_WATER_ADDITION_ML, parse_date};

    fn at(h: u32, m: u32) -> NaiveDateTime {
        parse_date("2024-06-15")
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    fn tracker(store: &MemoryStore) -> WaterTracker {
        WaterTracker::new(
            UserSession::new("u1").unwrap(),
            Arc::new(store.clone()),
            Arc::new(ManualClock::new(at(9, 0))),
        )
    }

    #[tokio::test]
    async fn test_two_additions_accumulate_and_award_points() {
        let store = MemoryStore::new();
        let water = tracker(&store);

        let first = water.add_water_at(250, at(9, 0)).await.unwrap();
        assert_eq!(first.points_awarded, 2);
        let second = water.add_water_at(330, at(10, 0)).await.unwrap();
        assert_eq!(second.points_awarded, 3);

        assert_eq!(second.record.amount_ml, 580);
        let entries: Vec<(String, u32)> = second
            .record
            .log_entries
            .iter()
            .map(|e| (e.time.format("%H:%M").to_string(), e.amount_ml))
            .collect();
        assert_eq!(
            entries,
            vec![("09:00".to_string(), 250), ("10:00".to_string(), 330)]
        );
        assert_eq!(second.total_points, Some(5));

        let stored = store.get("users/u1").await.unwrap();
        assert_eq!(stored["total_points"], 5);
        assert_eq!(stored["today"]["water_ml"], 580);
        assert_eq!(stored["today"]["date"], "2024-06-15");
        assert_eq!(stored["water"]["2024-06-15"]["amount_ml"], 580);
    }

    #[tokio::test]
    async fn test_failed_write_rolls_back_view() {
        let store = MemoryStore::new();
        let water = tracker(&store);
        water.add_water_at(250, at(9, 0)).await.unwrap();

        store.fail_writes(true);
        let err = water.add_water_at(500, at(9, 30)).await;
        assert!(matches!(err, Err(TrackerError::Store { .. })));
        assert_eq!(water.current().unwrap().amount_ml, 250);
    }

    #[tokio::test]
    async fn test_zero_amount_rejected() {
        let store = MemoryStore::new();
        let water = tracker(&store);
        assert!(matches!(
            water.add_water_at(0, at(9, 0)).await,
            Err(TrackerError::InvalidInput(_))
        ));
        assert!(store.written_paths().is_empty());
    }

    #[tokio::test]
    async fn test_huge_additions_are_rejected_and_day_stays_readable() {
        let store = MemoryStore::new();
        let water = tracker(&store);
        assert!(matches!(
            water.add_water_at(3_000_000_000, at(9, 0)).await,
            Err(TrackerError::InvalidInput(_))
        ));
        for _ in 0..3 {
            water.add_water_at(MAX_WATER_ADDITION_ML, at(9, 0)).await.unwrap();
        }
        let record = water.today().await.unwrap();
        assert_eq!(record.amount_ml, 3 * MAX_WATER_ADDITION_ML);
        let summed: u32 = record.log_entries.iter().map(|e| e.amount_ml).sum();
        assert_eq!(summed, record.amount_ml);
    }

    #[tokio::test]
    async fn test_small_addition_awards_no_points() {
        let store = MemoryStore::new();
        let water = tracker(&store);
        let added = water.add_water_at(50, at(9, 0)).await.unwrap();
        assert_eq!(added.points_awarded, 0);
        assert!(!store.written_paths().contains(&"users/u1".to_string()));
    }

    #[tokio::test]
    async fn test_addition_keeps_step_fields_in_today() {
        let store = MemoryStore::new();
        store
            .set("users/u1/today", json!({ "date": "2024-06-15", "steps": 4000 }))
            .await
            .unwrap();
        let water = tracker(&store);
        water.add_water_at(250, at(9, 0)).await.unwrap();
        let today = store.get("users/u1/today").await.unwrap();
        assert_eq!(today["steps"], 4000);
        assert_eq!(today["water_ml"], 250);
    }

    #[tokio::test]
    async fn test_additions_read_latest_remote_record() {
        let store = MemoryStore::new();
        // Another device already logged water today.
        store
            .set(
                "users/u1/water/2024-06-15",
                json!({ "amount_ml": 200, "log_entries": [{ "time": "08:00", "amount": 200 }] }),
            )
            .await
            .unwrap();
        let water = tracker(&store);
        let added = water.add_water_at(250, at(9, 0)).await.unwrap();
        assert_eq!(added.record.amount_ml, 450);
        assert_eq!(added.record.log_entries.len(), 2);
    }

    #[tokio::test]
    async fn test_watch_today_follows_changes() {
        let store = MemoryStore::new();
        let water = tracker(&store);
        let mut watch = water.watch_today().unwrap();
        assert_eq!(watch.next().await.unwrap().amount_ml, 0);
        water.add_water_at(330, at(9, 0)).await.unwrap();
        assert_eq!(watch.next().await.unwrap().amount_ml, 330);
    }

    #[tokio::test]
    async fn test_apply_snapshot_updates_view() {
        let store = MemoryStore::new();
        let water = tracker(&store);
        let d = parse_date("2024-06-15").unwrap();
        let record = water
            .apply_snapshot(d, &json!({ "amount_ml": 500, "log_entries": [{ "time": "07:30", "amount": 500 }] }))
            .unwrap();
        assert_eq!(record.amount_ml, 500);
        assert_eq!(water.current(), Some(record));
        assert!(water.apply_snapshot(d, &json!("bad")).is_err());
    }
}
