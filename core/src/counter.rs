//! Daily Counter Store: turns cumulative pedometer readings into a per-day
//! step count and keeps the device cache and the shared records in step.

use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{NaiveDate, NaiveDateTime};
use serde_json::json;
use tokio::sync::{Mutex as AsyncMutex, mpsc};

use crate::cache::LocalCache;
use crate::clock::{Clock, start_of_day};
use crate::error::TrackerResult;
use crate::models::{
    CountingStrategy, DailyRecord, LocalCounterState, SensorAvailability, WaterRecord, format_date,
    parse_date,
};
use crate::sensor::StepSensor;
use crate::session::{SessionScope, UserSession};
use crate::store::RemoteStore;

const KEY_LAST_RESET: &str = "steps.last_reset_date";
const KEY_BASELINE: &str = "steps.baseline";
const KEY_CARRIED: &str = "steps.carried";
const KEY_COUNT: &str = "steps.count";

pub struct DailyCounterStore {
    session: UserSession,
    store: Arc<dyn RemoteStore>,
    cache: Arc<dyn LocalCache>,
    sensor: Arc<dyn StepSensor>,
    clock: Arc<dyn Clock>,
    strategy: CountingStrategy,
    /// Held for the whole of a sample so samples are processed one at a time.
    state: AsyncMutex<Option<LocalCounterState>>,
    availability: Mutex<SensorAvailability>,
    pending_write: AtomicBool,
}

impl DailyCounterStore {
    #[must_use]
    pub fn new(
        session: UserSession,
        store: Arc<dyn RemoteStore>,
        cache: Arc<dyn LocalCache>,
        sensor: Arc<dyn StepSensor>,
        clock: Arc<dyn Clock>,
        strategy: CountingStrategy,
    ) -> Self {
        Self {
            session,
            store,
            cache,
            sensor,
            clock,
            strategy,
            state: AsyncMutex::new(None),
            availability: Mutex::new(SensorAvailability::Unknown),
            pending_write: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn session(&self) -> &UserSession {
        &self.session
    }

    #[must_use]
    pub fn strategy(&self) -> CountingStrategy {
        self.strategy
    }

    /// Sensor availability; `Unknown` until the first check or sample.
    #[must_use]
    pub fn availability(&self) -> SensorAvailability {
        self.availability
            .lock()
            .map(|a| *a)
            .unwrap_or(SensorAvailability::Unknown)
    }

    /// True when the last remote write failed and the cached value has not
    /// reached the store yet.
    #[must_use]
    pub fn pending_write(&self) -> bool {
        self.pending_write.load(Ordering::SeqCst)
    }

    fn set_availability(&self, availability: SensorAvailability) {
        if let Ok(mut a) = self.availability.lock() {
            if *a != availability {
                tracing::info!(%availability, "step sensor availability changed");
            }
            *a = availability;
        }
    }

    // --- Device cache ---

    async fn load_local(&self) -> TrackerResult<LocalCounterState> {
        let last_reset_date = match self.cache.get_item(KEY_LAST_RESET).await? {
            Some(s) => match parse_date(&s) {
                Ok(d) => Some(d),
                Err(e) => {
                    tracing::warn!(value = %s, error = %e, "ignoring corrupt cached reset date");
                    None
                }
            },
            None => None,
        };
        Ok(LocalCounterState {
            last_reset_date,
            baseline_device_steps: self.cached_count(KEY_BASELINE).await?,
            carried_steps: self.cached_count(KEY_CARRIED).await?.unwrap_or(0),
            cached_steps: self.cached_count(KEY_COUNT).await?.unwrap_or(0),
        })
    }

    async fn cached_count(&self, key: &str) -> TrackerResult<Option<u64>> {
        let Some(raw) = self.cache.get_item(key).await? else {
            return Ok(None);
        };
        match u64::from_str(raw.trim()) {
            Ok(v) => Ok(Some(v)),
            Err(_) => {
                tracing::warn!(key, value = %raw, "ignoring corrupt cached counter");
                Ok(None)
            }
        }
    }

    async fn save_local(&self, state: &LocalCounterState) -> TrackerResult<()> {
        match state.last_reset_date {
            Some(d) => self.cache.set_item(KEY_LAST_RESET, &format_date(d)).await?,
            None => self.cache.remove_item(KEY_LAST_RESET).await?,
        }
        match state.baseline_device_steps {
            Some(b) => self.cache.set_item(KEY_BASELINE, &b.to_string()).await?,
            None => self.cache.remove_item(KEY_BASELINE).await?,
        }
        self.cache
            .set_item(KEY_CARRIED, &state.carried_steps.to_string())
            .await?;
        self.cache
            .set_item(KEY_COUNT, &state.cached_steps.to_string())
            .await?;
        Ok(())
    }

    async fn loaded<'a>(
        &self,
        slot: &'a mut Option<LocalCounterState>,
    ) -> TrackerResult<&'a mut LocalCounterState> {
        if slot.is_none() {
            *slot = Some(self.load_local().await?);
        }
        Ok(slot.get_or_insert_with(LocalCounterState::default))
    }

    // --- Remote records ---

    /// Create the day's record with zero steps if it is absent, otherwise
    /// return it unchanged. Safe to call repeatedly and concurrently.
    pub async fn ensure_day_initialized(&self, date: NaiveDate) -> TrackerResult<DailyRecord> {
        let path = self.session.steps_path(date);
        let value = self
            .store
            .get_or_create(&path, DailyRecord::empty(date).to_value())
            .await?;
        Ok(DailyRecord::from_value(&path, date, &value)?.unwrap_or_else(|| DailyRecord::empty(date)))
    }

    /// Ensure the day's record, falling back to an empty one when the store
    /// cannot be reached or the record is unreadable.
    async fn ensure_or_empty(&self, date: NaiveDate) -> DailyRecord {
        match self.ensure_day_initialized(date).await {
            Ok(record) => record,
            Err(e) => {
                if e.is_transient() {
                    self.pending_write.store(true, Ordering::SeqCst);
                }
                tracing::warn!(date = %date, error = %e, "could not initialise day record");
                DailyRecord::empty(date)
            }
        }
    }

    async fn water_amount(&self, date: NaiveDate) -> u32 {
        let path = self.session.water_path(date);
        let parsed = match self.store.get(&path).await {
            Ok(value) => WaterRecord::from_value(&path, date, &value),
            Err(e) => Err(e),
        };
        match parsed {
            Ok(record) => record.map_or(0, |r| r.amount_ml),
            Err(e) => {
                tracing::warn!(path = %path, error = %e, "could not read water record");
                0
            }
        }
    }

    /// Write `record` to its day and to the today summary. Only the step
    /// fields are written, so water and profile fields written by other
    /// screens survive.
    async fn persist(&self, record: &DailyRecord) {
        let day_path = self.session.steps_path(record.date);
        let today_path = self.session.today_path();
        let mut ok = true;
        for path in [&day_path, &today_path] {
            if let Err(e) = self.store.update(path, record.to_fields()).await {
                tracing::warn!(path = %path, steps = record.steps, error = %e, "step write failed, keeping cached value");
                ok = false;
            }
        }
        self.pending_write.store(!ok, Ordering::SeqCst);
    }

    // --- Day rollover ---

    /// Start counting `new_date` from zero. The record for `previous_date`
    /// is left exactly as it is.
    pub async fn reconcile_on_day_rollover(
        &self,
        previous_date: Option<NaiveDate>,
        new_date: NaiveDate,
    ) -> TrackerResult<DailyRecord> {
        let mut slot = self.state.lock().await;
        let state = self.loaded(&mut slot).await?;
        self.rollover_locked(state, previous_date, new_date).await
    }

    async fn rollover_locked(
        &self,
        state: &mut LocalCounterState,
        previous_date: Option<NaiveDate>,
        new_date: NaiveDate,
    ) -> TrackerResult<DailyRecord> {
        tracing::info!(
            previous = ?previous_date.map(format_date),
            new = %format_date(new_date),
            "day rollover, resetting step counter"
        );
        *state = LocalCounterState::fresh(new_date);

        let record = self.ensure_or_empty(new_date).await;
        // Another device may already have counted part of the new day.
        state.cached_steps = record.steps;
        self.save_local(state).await?;

        let mut fields = record.to_fields();
        fields.insert("water_ml".into(), json!(self.water_amount(new_date).await));
        if let Err(e) = self.store.update(&self.session.today_path(), fields).await {
            tracing::warn!(error = %e, "could not reset today summary");
            self.pending_write.store(true, Ordering::SeqCst);
        }
        Ok(record)
    }

    // --- Samples ---

    /// Load the device state, roll over if the cached day is stale and
    /// return the record for today.
    pub async fn start(&self) -> TrackerResult<DailyRecord> {
        match self.sensor.is_available().await {
            Ok(true) => self.set_availability(SensorAvailability::Available),
            Ok(false) => self.set_availability(SensorAvailability::Unavailable),
            Err(e) => {
                tracing::warn!(error = %e, "step sensor capability check failed");
                self.set_availability(SensorAvailability::Unavailable);
            }
        }

        let mut slot = self.state.lock().await;
        let state = self.loaded(&mut slot).await?;
        let today = self.clock.today();

        let remote = if state.last_reset_date == Some(today) {
            self.ensure_or_empty(today).await
        } else {
            let previous = state.last_reset_date;
            self.rollover_locked(state, previous, today).await?
        };

        if remote.steps > state.cached_steps {
            tracing::debug!(remote = remote.steps, cached = state.cached_steps, "adopting stored step count");
            state.cached_steps = remote.steps;
            self.save_local(state).await?;
        }
        Ok(DailyRecord::from_steps(today, state.cached_steps))
    }

    /// Process one cumulative reading taken at `now`.
    ///
    /// Sensor and store failures never surface here: the last known count is
    /// returned and the failure shows up in [`Self::availability`] or
    /// [`Self::pending_write`]. Only device cache failures are returned.
    pub async fn record_step_sample(
        &self,
        raw_device_count: u64,
        now: NaiveDateTime,
    ) -> TrackerResult<DailyRecord> {
        let mut slot = self.state.lock().await;
        let state = self.loaded(&mut slot).await?;
        self.sample_locked(state, raw_device_count, now).await
    }

    /// Like [`Self::record_step_sample`], reading the clock only once this
    /// sample's turn has come.
    pub async fn record_sample_now(&self, raw_device_count: u64) -> TrackerResult<DailyRecord> {
        let mut slot = self.state.lock().await;
        let state = self.loaded(&mut slot).await?;
        let now = self.clock.now();
        self.sample_locked(state, raw_device_count, now).await
    }

    async fn sample_locked(
        &self,
        state: &mut LocalCounterState,
        raw: u64,
        now: NaiveDateTime,
    ) -> TrackerResult<DailyRecord> {
        let today = now.date();
        if let Some(current) = state.last_reset_date.filter(|d| *d > today) {
            tracing::warn!(
                sample_date = %format_date(today),
                current = %format_date(current),
                raw,
                "dropping step sample from a finished day"
            );
            return Ok(DailyRecord::from_steps(current, state.cached_steps));
        }
        if state.last_reset_date != Some(today) {
            let previous = state.last_reset_date;
            self.rollover_locked(state, previous, today).await?;
        }

        let counted = match self.strategy {
            CountingStrategy::Baseline => {
                self.set_availability(SensorAvailability::Available);
                Self::count_from_baseline(state, raw)
            }
            CountingStrategy::MidnightQuery => {
                match self.sensor.step_count(start_of_day(now), now).await {
                    Ok(steps) => {
                        self.set_availability(SensorAvailability::Available);
                        steps
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "step query failed, serving cached count");
                        self.set_availability(SensorAvailability::Unavailable);
                        return Ok(DailyRecord::from_steps(today, state.cached_steps));
                    }
                }
            }
        };

        // A day's count never goes backwards.
        let steps = counted.max(state.cached_steps);
        state.cached_steps = steps;
        self.save_local(state).await?;

        let record = DailyRecord::from_steps(today, steps);
        tracing::debug!(raw, steps, date = %format_date(today), "step sample processed");
        self.persist(&record).await;
        Ok(record)
    }

    /// Steps for the day from a raw reading, capturing a new baseline on the
    /// day's first reading or after the device counter restarted.
    fn count_from_baseline(state: &mut LocalCounterState, raw: u64) -> u64 {
        match state.baseline_device_steps {
            None => {
                tracing::info!(baseline = raw, "captured step baseline");
                state.carried_steps = state.cached_steps;
                state.baseline_device_steps = Some(raw);
            }
            Some(baseline) if raw < baseline => {
                tracing::warn!(baseline, raw, "device step counter went backwards, recapturing baseline");
                state.carried_steps = state.cached_steps;
                state.baseline_device_steps = Some(raw);
            }
            Some(_) => {}
        }
        let baseline = state.baseline_device_steps.unwrap_or(raw);
        state.carried_steps + raw.saturating_sub(baseline)
    }

    /// Today's cached count, 0 before anything has been counted today.
    pub async fn today_steps(&self) -> u64 {
        let today = self.clock.today();
        let mut slot = self.state.lock().await;
        match self.loaded(&mut slot).await {
            Ok(state) if state.last_reset_date == Some(today) => state.cached_steps,
            Ok(_) => 0,
            Err(e) => {
                tracing::warn!(error = %e, "could not read cached step count");
                0
            }
        }
    }

    /// Follow the sensor inside `scope`, feeding each reading through
    /// [`Self::record_sample_now`] in arrival order. Updated records are sent
    /// on the returned channel; the watch stops when the scope ends.
    pub fn watch(
        self: &Arc<Self>,
        scope: &SessionScope,
    ) -> TrackerResult<mpsc::UnboundedReceiver<DailyRecord>> {
        let mut samples = match self.sensor.watch() {
            Ok(w) => w,
            Err(e) => {
                self.set_availability(SensorAvailability::Unavailable);
                return Err(e);
            }
        };
        let (tx, rx) = mpsc::unbounded_channel();
        let this = Arc::clone(self);
        scope.spawn(async move {
            while let Some(sample) = samples.next().await {
                match this.record_sample_now(sample.steps).await {
                    Ok(record) => {
                        if tx.send(record).is_err() {
                            break;
                        }
                    }
                    Err(e) => tracing::warn!(error = %e, "step sample dropped"),
                }
            }
            tracing::debug!("step watch finished");
        });
        Ok(rx)
    }
}
