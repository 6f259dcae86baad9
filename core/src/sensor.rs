use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use serde::Serialize;
use tokio::sync::broadcast;

use crate::error::{TrackerError, TrackerResult};

const SAMPLE_CAPACITY: usize = 64;

/// A cumulative pedometer reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SensorSample {
    pub at: NaiveDateTime,
    pub steps: u64,
}

/// The device step counter.
#[async_trait]
pub trait StepSensor: Send + Sync {
    async fn is_available(&self) -> TrackerResult<bool>;

    /// Steps taken between `start` and `end`.
    async fn step_count(&self, start: NaiveDateTime, end: NaiveDateTime) -> TrackerResult<u64>;

    /// Follow live cumulative readings.
    fn watch(&self) -> TrackerResult<SensorWatch>;
}

/// Live feed of sensor samples. Dropping it stops the feed.
pub struct SensorWatch {
    rx: broadcast::Receiver<SensorSample>,
}

impl SensorWatch {
    #[must_use]
    pub fn new(rx: broadcast::Receiver<SensorSample>) -> Self {
        Self { rx }
    }

    /// Next sample. A slow reader skips to the newest readings, which is
    /// fine because each reading is cumulative.
    pub async fn next(&mut self) -> Option<SensorSample> {
        loop {
            match self.rx.recv().await {
                Ok(sample) => return Some(sample),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "sensor watch lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// Steps implied by cumulative readings, attributed to `[start, end]`.
///
/// The last reading before `start` anchors the range: steps walked between
/// it and the first reading inside the range count toward the range.
/// Consecutive readings contribute their difference; a drop means the
/// device counter restarted from zero, so the newer reading counts in full.
#[must_use]
pub fn steps_between(readings: &[SensorSample], start: NaiveDateTime, end: NaiveDateTime) -> u64 {
    let mut upto_end: Vec<&SensorSample> = readings.iter().filter(|r| r.at <= end).collect();
    upto_end.sort_by_key(|r| r.at);
    let anchor = upto_end.partition_point(|r| r.at < start).saturating_sub(1);
    upto_end[anchor..]
        .windows(2)
        .map(|pair| {
            let (prev, cur) = (pair[0].steps, pair[1].steps);
            if cur >= prev { cur - prev } else { cur }
        })
        .sum()
}

/// A sensor backed by an in-memory history of readings.
pub struct RecordedSensor {
    readings: Mutex<Vec<SensorSample>>,
    available: AtomicBool,
    tx: broadcast::Sender<SensorSample>,
}

impl Default for RecordedSensor {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordedSensor {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(SAMPLE_CAPACITY);
        Self {
            readings: Mutex::new(Vec::new()),
            available: AtomicBool::new(true),
            tx,
        }
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Record a cumulative reading and publish it to watchers.
    pub fn record(&self, at: NaiveDateTime, steps: u64) {
        let sample = SensorSample { at, steps };
        if let Ok(mut readings) = self.readings.lock() {
            readings.push(sample);
        }
        let _ = self.tx.send(sample);
    }

    fn check_available(&self) -> TrackerResult<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(TrackerError::SensorUnavailable(
                "pedometer not available".to_string(),
            ))
        }
    }
}

#[async_trait]
impl StepSensor for RecordedSensor {
    async fn is_available(&self) -> TrackerResult<bool> {
        Ok(self.available.load(Ordering::SeqCst))
    }

    async fn step_count(&self, start: NaiveDateTime, end: NaiveDateTime) -> TrackerResult<u64> {
        self.check_available()?;
        let readings = self
            .readings
            .lock()
            .map_err(|_| TrackerError::SensorUnavailable("reading log poisoned".to_string()))?;
        Ok(steps_between(&readings, start, end))
    }

    fn watch(&self) -> TrackerResult<SensorWatch> {
        self.check_available()?;
        Ok(SensorWatch::new(self.tx.subscribe()))
    }
}
