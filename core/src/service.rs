use std::path::Path;
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::cache::LocalCache;
use crate::clock::{Clock, SystemClock};
use crate::counter::DailyCounterStore;
use crate::dashboard::{Dashboard, DashboardWatch};
use crate::db::SqliteBackend;
use crate::error::TrackerResult;
use crate::models::{CountingStrategy, DailyRecord, SeriesKind, WeeklySeries};
use crate::profile::ProfileService;
use crate::sensor::StepSensor;
use crate::session::{SessionScope, UserSession};
use crate::store::RemoteStore;
use crate::water::{WaterAddition, WaterTracker};
use crate::weekly::{SeriesWatch, WeeklyAggregator};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackerConfig {
    pub uid: String,
    pub strategy: CountingStrategy,
}

impl TrackerConfig {
    #[must_use]
    pub fn new(uid: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            strategy: CountingStrategy::default(),
        }
    }

    #[must_use]
    pub fn with_strategy(mut self, strategy: CountingStrategy) -> Self {
        self.strategy = strategy;
        self
    }
}

/// One user's tracker: step counting, water, goals, weekly series and the
/// dashboard, sharing one store, cache, sensor and clock.
pub struct Tracker {
    session: UserSession,
    store: Arc<dyn RemoteStore>,
    clock: Arc<dyn Clock>,
    counter: Arc<DailyCounterStore>,
    weekly: WeeklyAggregator,
    water: WaterTracker,
    profiles: ProfileService,
    scope: SessionScope,
}

impl Tracker {
    pub fn new(
        config: &TrackerConfig,
        store: Arc<dyn RemoteStore>,
        cache: Arc<dyn LocalCache>,
        sensor: Arc<dyn StepSensor>,
        clock: Arc<dyn Clock>,
    ) -> TrackerResult<Self> {
        let session = UserSession::new(config.uid.clone())?;
        let counter = Arc::new(DailyCounterStore::new(
            session.clone(),
            Arc::clone(&store),
            cache,
            sensor,
            Arc::clone(&clock),
            config.strategy,
        ));
        Ok(Self {
            weekly: WeeklyAggregator::new(session.clone(), Arc::clone(&store), Arc::clone(&clock)),
            water: WaterTracker::new(session.clone(), Arc::clone(&store), Arc::clone(&clock)),
            profiles: ProfileService::new(session.clone(), Arc::clone(&store), Arc::clone(&clock)),
            session,
            store,
            clock,
            counter,
            scope: SessionScope::new(),
        })
    }

    /// A tracker backed entirely by one SQLite file, on the system clock.
    pub fn open(config: &TrackerConfig, db_path: &Path) -> TrackerResult<Self> {
        Self::with_backend(config, &SqliteBackend::open(db_path)?)
    }

    pub fn with_backend(config: &TrackerConfig, backend: &SqliteBackend) -> TrackerResult<Self> {
        let shared = Arc::new(backend.clone());
        Self::new(
            config,
            shared.clone(),
            shared.clone(),
            shared,
            Arc::new(SystemClock),
        )
    }

    #[must_use]
    pub fn session(&self) -> &UserSession {
        &self.session
    }

    #[must_use]
    pub fn counter(&self) -> &Arc<DailyCounterStore> {
        &self.counter
    }

    #[must_use]
    pub fn water(&self) -> &WaterTracker {
        &self.water
    }

    #[must_use]
    pub fn profiles(&self) -> &ProfileService {
        &self.profiles
    }

    // --- Steps ---

    pub async fn start(&self) -> TrackerResult<DailyRecord> {
        self.counter.start().await
    }

    pub async fn record_steps(&self, raw_device_count: u64) -> TrackerResult<DailyRecord> {
        self.counter.record_sample_now(raw_device_count).await
    }

    pub async fn today_steps(&self) -> u64 {
        self.counter.today_steps().await
    }

    /// Feed live sensor readings through the counter until the session ends.
    pub fn watch_steps(&self) -> TrackerResult<mpsc::UnboundedReceiver<DailyRecord>> {
        self.counter.watch(&self.scope)
    }

    // --- Water ---

    pub async fn add_water(&self, amount_ml: u32) -> TrackerResult<WaterAddition> {
        self.water.add_water(amount_ml).await
    }

    // --- Weekly ---

    async fn goal_for(&self, kind: SeriesKind) -> TrackerResult<u32> {
        let goals = self.profiles.goals().await?;
        Ok(match kind {
            SeriesKind::Steps => goals.daily_step_goal,
            SeriesKind::Water => goals.daily_water_goal_ml,
        })
    }

    /// The last 7 days against the user's current goal.
    pub async fn weekly(&self, kind: SeriesKind) -> TrackerResult<WeeklySeries> {
        let goal = self.goal_for(kind).await?;
        self.weekly.load(kind, goal).await
    }

    pub async fn watch_weekly(&self, kind: SeriesKind) -> TrackerResult<SeriesWatch> {
        let goal = self.goal_for(kind).await?;
        self.weekly.watch(kind, goal)
    }

    // --- Dashboard ---

    pub async fn dashboard(&self) -> TrackerResult<Dashboard> {
        let root = self.store.get(&self.session.root_path()).await?;
        Ok(Dashboard::from_snapshot(
            &self.session,
            self.clock.today(),
            &root,
        ))
    }

    pub fn watch_dashboard(&self) -> TrackerResult<DashboardWatch> {
        let sub = self.store.subscribe(&self.session.root_path())?;
        Ok(DashboardWatch::new(
            sub,
            self.session.clone(),
            Arc::clone(&self.clock),
        ))
    }

    /// Stop every watch started through this tracker.
    pub fn end_session(&self) {
        self.scope.end();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::clock::ManualClock;
    use crate::memory::MemoryStore;
    use crate::models::{NewProfile, parse_date};
    use crate::sensor::RecordedSensor;
    use chrono::{NaiveDateTime, TimeDelta};

    fn at(date: &str, h: u32, m: u32) -> NaiveDateTime {
        parse_date(date).unwrap().and_hms_opt(h, m, 0).unwrap()
    }

    fn tracker(strategy: CountingStrategy) -> (Tracker, MemoryStore, Arc<RecordedSensor>, Arc<ManualClock>) {
        let store = MemoryStore::new();
        let sensor = Arc::new(RecordedSensor::new());
        let clock = Arc::new(ManualClock::new(at("2024-06-15", 8, 0)));
        let tracker = Tracker::new(
            &TrackerConfig::new("u1").with_strategy(strategy),
            Arc::new(store.clone()),
            Arc::new(MemoryCache::new()),
            sensor.clone(),
            clock.clone(),
        )
        .unwrap();
        (tracker, store, sensor, clock)
    }

    #[test]
    fn test_config_defaults_to_midnight_query() {
        assert_eq!(
            TrackerConfig::new("u1").strategy,
            CountingStrategy::MidnightQuery
        );
    }

    #[test]
    fn test_tracker_rejects_bad_uid() {
        let result = Tracker::new(
            &TrackerConfig::new("a/b"),
            Arc::new(MemoryStore::new()),
            Arc::new(MemoryCache::new()),
            Arc::new(RecordedSensor::new()),
            Arc::new(SystemClock),
        );
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_day_of_activity_shows_on_dashboard() {
        let (tracker, _store, _sensor, clock) = tracker(CountingStrategy::Baseline);
        tracker
            .profiles()
            .create_profile(&NewProfile {
                full_name: "Sam".to_string(),
                age: 30,
                height_cm: 175.0,
                weight_kg: 70.0,
            })
            .await
            .unwrap();
        tracker.start().await.unwrap();
        tracker.record_steps(20_000).await.unwrap();
        clock.advance(TimeDelta::hours(2));
        tracker.record_steps(24_000).await.unwrap();
        tracker.add_water(500).await.unwrap();

        let dashboard = tracker.dashboard().await.unwrap();
        assert_eq!(dashboard.steps.steps, 4000);
        assert_eq!(dashboard.water_ml, 500);
        assert_eq!(dashboard.total_points, 5);
        assert_eq!(dashboard.step_percentage, 50);

        let week = tracker.weekly(SeriesKind::Steps).await.unwrap();
        assert_eq!(week.total, 4000);
        assert_eq!(week.points[6].goal, 8000);
    }

    #[tokio::test]
    async fn test_weekly_uses_current_goal() {
        let (tracker, store, _sensor, _clock) = tracker(CountingStrategy::Baseline);
        store
            .set(
                "users/u1",
                serde_json::json!({
                    "createdAt": "2024-06-01T00:00:00",
                    "daily_water_goal": 1500,
                    "water": { "2024-06-14": { "amount_ml": 1600 } }
                }),
            )
            .await
            .unwrap();
        let week = tracker.weekly(SeriesKind::Water).await.unwrap();
        assert!(week.points.iter().all(|p| p.goal == 1500));
        assert_eq!(week.days_goal_met, 1);
    }

    #[tokio::test]
    async fn test_end_session_stops_step_watch() {
        let (tracker, _store, sensor, _clock) = tracker(CountingStrategy::Baseline);
        let mut records = tracker.watch_steps().unwrap();
        sensor.record(at("2024-06-15", 8, 0), 100);
        assert_eq!(records.recv().await.unwrap().steps, 0);
        tracker.end_session();
        assert!(records.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_dashboard_watch_follows_water() {
        let (tracker, _store, _sensor, _clock) = tracker(CountingStrategy::Baseline);
        let mut watch = tracker.watch_dashboard().unwrap();
        assert_eq!(watch.next().await.unwrap().water_ml, 0);
        tracker.add_water(250).await.unwrap();
        // Each write of the addition produces a snapshot; the last one has
        // the points.
        let mut latest = watch.next().await.unwrap();
        while latest.total_points < 2 {
            latest = watch.next().await.unwrap();
        }
        assert_eq!(latest.water_ml, 250);
    }

    #[tokio::test]
    async fn test_sqlite_backed_tracker() {
        let dir = tempfile::tempdir().unwrap();
        let config = TrackerConfig::new("u1");
        let tracker = Tracker::open(&config, &dir.path().join("stride.db")).unwrap();
        tracker.start().await.unwrap();
        let added = tracker.add_water(330).await.unwrap();
        assert_eq!(added.points_awarded, 3);
        let week = tracker.weekly(SeriesKind::Water).await.unwrap();
        assert_eq!(week.points[6].value, 330);
    }

    #[tokio::test]
    async fn test_watch_weekly_follows_new_steps() {
        let (tracker, _store, _sensor, _clock) = tracker(CountingStrategy::Baseline);
        let mut week = tracker.watch_weekly(SeriesKind::Steps).await.unwrap();
        assert_eq!(week.next().await.unwrap().total, 0);

        tracker.start().await.unwrap();
        tracker.record_steps(1000).await.unwrap();
        tracker.record_steps(1700).await.unwrap();
        let mut latest = week.next().await.unwrap();
        while latest.total < 700 {
            latest = week.next().await.unwrap();
        }
        assert_eq!(latest.points[6].value, 700);
        assert_eq!(latest.points[6].goal, 8000);
    }
}
