use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Local;
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, BufReader};

use stride_core::db::SqliteBackend;
use stride_core::models::{DailyRecord, SeriesKind, SensorAvailability};
use stride_core::service::Tracker;

use super::helpers::{print_json, print_weekly_table};

#[derive(Serialize)]
struct StepsView<'a> {
    #[serde(flatten)]
    record: &'a DailyRecord,
    sensor: SensorAvailability,
    pending_write: bool,
}

fn print_record(tracker: &Tracker, record: &DailyRecord, json: bool) -> Result<()> {
    let counter = tracker.counter();
    if json {
        return print_json(&StepsView {
            record,
            sensor: counter.availability(),
            pending_write: counter.pending_write(),
        });
    }
    println!(
        "{}: {} steps, {:.2} km, {:.0} kcal",
        record.date.format("%Y-%m-%d"),
        record.steps,
        record.distance_km,
        record.calories_burned
    );
    if counter.pending_write() {
        eprintln!("Note: today's count has not been saved yet; it will be retried on the next sample");
    }
    Ok(())
}

/// Store `raw` as a sensor reading, then count it.
pub(crate) async fn cmd_steps_sample(
    tracker: &Tracker,
    backend: &SqliteBackend,
    raw: u64,
    json: bool,
) -> Result<()> {
    tracker.start().await?;
    backend.record_reading(Local::now().naive_local(), raw)?;
    let record = tracker.record_steps(raw).await?;
    print_record(tracker, &record, json)
}

pub(crate) async fn cmd_steps_today(tracker: &Tracker, json: bool) -> Result<()> {
    let record = tracker.start().await?;
    print_record(tracker, &record, json)
}

pub(crate) async fn cmd_steps_week(tracker: &Tracker, json: bool) -> Result<()> {
    let series = tracker.weekly(SeriesKind::Steps).await?;
    if json {
        return print_json(&series);
    }
    print_weekly_table(&series);
    Ok(())
}

fn parse_reading(line: &str) -> Option<u64> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    match line.parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(line, "ignoring unreadable step reading");
            None
        }
    }
}

/// Follow readings piped on stdin until it closes.
pub(crate) async fn cmd_steps_watch(
    tracker: &Tracker,
    backend: &SqliteBackend,
    json: bool,
) -> Result<()> {
    let record = tracker.start().await?;
    print_update(&record, json)?;
    let mut records = tracker.watch_steps()?;

    let feeder = backend.clone();
    let mut reader = tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Some(line) = lines.next_line().await.context("Failed to read stdin")? {
            if let Some(raw) = parse_reading(&line) {
                feeder.record_reading(Local::now().naive_local(), raw)?;
            }
        }
        anyhow::Ok(())
    });

    let input = loop {
        tokio::select! {
            Some(record) = records.recv() => print_update(&record, json)?,
            done = &mut reader => break done,
        }
    };

    // Readings published just before stdin closed may still be in flight.
    while let Ok(Some(record)) = tokio::time::timeout(Duration::from_millis(200), records.recv()).await {
        print_update(&record, json)?;
    }
    tracker.end_session();
    input.context("stdin reader stopped")?
}

fn print_update(record: &DailyRecord, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(record)?);
    } else {
        println!("{} steps", record.steps);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use stride_core::service::TrackerConfig;

    #[test]
    fn test_parse_reading() {
        assert_eq!(parse_reading("1200"), Some(1200));
        assert_eq!(parse_reading("  42 \n"), Some(42));
        assert_eq!(parse_reading(""), None);
        assert_eq!(parse_reading("# comment"), None);
        assert_eq!(parse_reading("-5"), None);
        assert_eq!(parse_reading("lots"), None);
    }

    #[tokio::test]
    async fn test_sample_is_counted_against_first_reading() {
        let backend = SqliteBackend::open_in_memory().unwrap();
        let config = TrackerConfig::new("u1").with_strategy("baseline".parse().unwrap());
        let tracker = Tracker::with_backend(&config, &backend).unwrap();
        cmd_steps_sample(&tracker, &backend, 5000, true).await.unwrap();
        cmd_steps_sample(&tracker, &backend, 5600, true).await.unwrap();
        assert_eq!(tracker.today_steps().await, 600);
        let latest = backend.with_db(|db| db.latest_reading()).unwrap().unwrap();
        assert_eq!(latest.steps, 5600);
    }
}
