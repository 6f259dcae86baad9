use std::sync::Arc;

use chrono::{NaiveDate, TimeDelta};
use serde_json::Value;

use crate::clock::Clock;
use crate::error::TrackerResult;
use crate::models::{
    DailyRecord, SeriesKind, WEEK_DAYS, WaterRecord, WeeklyPoint, WeeklySeries, format_date,
};
use crate::session::UserSession;
use crate::store::{RemoteStore, Subscription};

/// Build the 7-day series ending on `today`, oldest first, from a snapshot
/// of the `steps` or `water` collection. Days without a record, or with an
/// unreadable one, count as zero.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn build_weekly_series(
    kind: SeriesKind,
    today: NaiveDate,
    goal: u32,
    snapshot: &Value,
) -> WeeklySeries {
    let mut points = Vec::with_capacity(WEEK_DAYS);
    let mut calories_burned = 0.0;

    for i in 0..WEEK_DAYS {
        let back = i64::try_from(WEEK_DAYS - 1 - i).unwrap_or(0);
        let date = today - TimeDelta::days(back);
        let key = format_date(date);
        let raw = snapshot.get(&key).unwrap_or(&Value::Null);
        let path = format!("{}/{key}", kind.collection());

        let value = match kind {
            SeriesKind::Steps => match DailyRecord::from_value(&path, date, raw) {
                Ok(Some(record)) => {
                    calories_burned += record.calories_burned;
                    record.steps
                }
                Ok(None) => 0,
                Err(e) => {
                    tracing::warn!(error = %e, "skipping unreadable step record");
                    0
                }
            },
            SeriesKind::Water => match WaterRecord::from_value(&path, date, raw) {
                Ok(record) => record.map_or(0, |r| u64::from(r.amount_ml)),
                Err(e) => {
                    tracing::warn!(error = %e, "skipping unreadable water record");
                    0
                }
            },
        };

        points.push(WeeklyPoint {
            date,
            label: date.format("%a").to_string(),
            value,
            goal,
        });
    }

    let total: u64 = points.iter().map(|p| p.value).sum();
    let days_goal_met = points
        .iter()
        .filter(|p| p.goal > 0 && p.value >= u64::from(p.goal))
        .count();

    WeeklySeries {
        kind,
        total,
        average: total as f64 / WEEK_DAYS as f64,
        days_goal_met: u32::try_from(days_goal_met).unwrap_or(u32::MAX),
        calories_burned,
        points,
    }
}

/// Reads and follows the weekly series for one user.
pub struct WeeklyAggregator {
    session: UserSession,
    store: Arc<dyn RemoteStore>,
    clock: Arc<dyn Clock>,
}

impl WeeklyAggregator {
    #[must_use]
    pub fn new(session: UserSession, store: Arc<dyn RemoteStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            session,
            store,
            clock,
        }
    }

    /// One-shot read of the week ending today.
    pub async fn load(&self, kind: SeriesKind, goal: u32) -> TrackerResult<WeeklySeries> {
        let snapshot = self
            .store
            .get(&self.session.collection_path(kind))
            .await?;
        Ok(build_weekly_series(kind, self.clock.today(), goal, &snapshot))
    }

    /// Follow the collection; every change yields a series rebuilt from the
    /// new snapshot.
    pub fn watch(&self, kind: SeriesKind, goal: u32) -> TrackerResult<SeriesWatch> {
        let sub = self.store.subscribe(&self.session.collection_path(kind))?;
        Ok(SeriesWatch {
            sub,
            kind,
            goal,
            clock: Arc::clone(&self.clock),
        })
    }
}

/// A live weekly series. Dropping it releases the underlying listener.
pub struct SeriesWatch {
    sub: Subscription,
    kind: SeriesKind,
    goal: u32,
    clock: Arc<dyn Clock>,
}

impl SeriesWatch {
    /// Use a new goal for series produced from now on.
    pub fn set_goal(&mut self, goal: u32) {
        self.goal = goal;
    }

    pub async fn next(&mut self) -> Option<WeeklySeries> {
        let snapshot = self.sub.next().await?;
        tracing::debug!(kind = self.kind.collection(), "weekly series refreshed");
        Some(build_weekly_series(
            self.kind,
            self.clock.today(),
            self.goal,
            &snapshot,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::memory::MemoryStore;
    use crate::models::parse_date;
    use serde_json::json;

    fn date(s: &str) -> NaiveDate {
        parse_date(s).unwrap()
    }

    #[test]
    fn test_series_always_has_seven_days_ending_today() {
        let today = date("2024-06-15");
        for snapshot in [
            Value::Null,
            json!({ "2024-06-15": { "steps": 100 } }),
            json!({ "2024-06-01": { "steps": 100 } }),
        ] {
            let series = build_weekly_series(SeriesKind::Steps, today, 8000, &snapshot);
            assert_eq!(series.points.len(), 7);
            assert_eq!(series.points[0].date, date("2024-06-09"));
            assert_eq!(series.points[6].date, today);
            assert!(series.points.windows(2).all(|w| w[0].date < w[1].date));
        }
    }

    #[test]
    fn test_series_labels_and_zero_fill() {
        let snapshot = json!({
            "2024-06-13": { "steps": 9000, "calories_burned": 360.0 },
            "2024-06-15": { "steps": 4000 },
        });
        let series = build_weekly_series(SeriesKind::Steps, date("2024-06-15"), 8000, &snapshot);
        // 2024-06-15 is a Saturday.
        assert_eq!(series.points[6].label, "Sat");
        assert_eq!(series.points[0].label, "Sun");
        let values: Vec<u64> = series.points.iter().map(|p| p.value).collect();
        assert_eq!(values, vec![0, 0, 0, 0, 9000, 0, 4000]);
        assert_eq!(series.total, 13_000);
        assert_eq!(series.days_goal_met, 1);
        assert!((series.calories_burned - 520.0).abs() < 1e-9);
        assert!(series.points.iter().all(|p| p.goal == 8000));
    }

    #[test]
    fn test_water_series_and_average() {
        let snapshot = json!({
            "2024-06-14": { "amount_ml": 2100, "log_entries": [
                { "time": "09:00", "amount": 1600 },
                { "time": "12:00", "amount": 500 }
            ] },
            "2024-06-15": { "amount_ml": 700 },
        });
        let series = build_weekly_series(SeriesKind::Water, date("2024-06-15"), 2000, &snapshot);
        assert_eq!(series.points[5].value, 2100);
        assert_eq!(series.total, 2100 + 700);
        assert!((series.average - 400.0).abs() < 1e-9);
        assert_eq!(series.days_goal_met, 1);
        assert!(series.calories_burned.abs() < f64::EPSILON);
    }

    #[test]
    fn test_malformed_day_counts_as_zero() {
        let snapshot = json!({
            "2024-06-14": { "steps": "lots" },
            "2024-06-15": { "steps": 10 },
        });
        let series = build_weekly_series(SeriesKind::Steps, date("2024-06-15"), 8000, &snapshot);
        assert_eq!(series.points[5].value, 0);
        assert_eq!(series.total, 10);
    }

    #[tokio::test]
    async fn test_aggregator_watch_rebuilds_on_change() {
        let store = MemoryStore::new();
        let clock = Arc::new(ManualClock::new(
            date("2024-06-15").and_hms_opt(12, 0, 0).unwrap(),
        ));
        let aggregator = WeeklyAggregator::new(
            UserSession::new("u1").unwrap(),
            Arc::new(store.clone()),
            clock,
        );

        let mut watch = aggregator.watch(SeriesKind::Steps, 8000).unwrap();
        let initial = watch.next().await.unwrap();
        assert_eq!(initial.total, 0);

        store
            .set("users/u1/steps/2024-06-15", json!({ "steps": 8500 }))
            .await
            .unwrap();
        watch.set_goal(10_000);
        let updated = watch.next().await.unwrap();
        assert_eq!(updated.total, 8500);
        assert_eq!(updated.points[6].goal, 10_000);
        assert_eq!(updated.days_goal_met, 0);

        let loaded = aggregator.load(SeriesKind::Steps, 8000).await.unwrap();
        assert_eq!(loaded.days_goal_met, 1);
    }
}
