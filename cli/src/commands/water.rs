use anyhow::Result;
use tabled::{
    Table, Tabled,
    settings::{Alignment, Modify, Style, object::Columns},
};

use stride_core::models::{SeriesKind, WATER_PRESETS, WaterRecord};
use stride_core::progress::percentage;
use stride_core::service::Tracker;

use super::helpers::{parse_water_amount, print_json, print_weekly_table, progress_bar};

pub(crate) async fn cmd_water_add(tracker: &Tracker, amount: &str, json: bool) -> Result<()> {
    let amount_ml = parse_water_amount(amount)?;
    let added = tracker.add_water(amount_ml).await?;

    if json {
        return print_json(&added);
    }
    let goal = tracker.profiles().goals().await?.daily_water_goal_ml;
    println!(
        "Added {amount_ml} ml. Today: {} / {goal} ml ({}%)",
        added.record.amount_ml,
        percentage(u64::from(added.record.amount_ml), i64::from(goal))
    );
    match added.total_points {
        Some(total) if added.points_awarded > 0 => {
            println!("+{} points ({total} total)", added.points_awarded);
        }
        Some(_) => {}
        None => eprintln!("Note: points for this addition could not be saved"),
    }
    Ok(())
}

fn print_water_log(record: &WaterRecord, goal: u32) {
    #[derive(Tabled)]
    struct EntryRow {
        #[tabled(rename = "Time")]
        time: String,
        #[tabled(rename = "Amount (ml)")]
        amount: u32,
    }

    let ratio = if goal == 0 {
        0.0
    } else {
        f64::from(record.amount_ml) / f64::from(goal)
    };
    println!(
        "{}: {} / {goal} ml {}",
        record.date.format("%Y-%m-%d"),
        record.amount_ml,
        progress_bar(ratio, 20)
    );
    if record.log_entries.is_empty() {
        return;
    }

    let rows: Vec<EntryRow> = record
        .entries_newest_first()
        .into_iter()
        .map(|e| EntryRow {
            time: e.time.format("%H:%M").to_string(),
            amount: e.amount_ml,
        })
        .collect();
    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::new(1..2)).with(Alignment::right()))
        .to_string();
    println!("{table}");
}

pub(crate) async fn cmd_water_today(tracker: &Tracker, json: bool) -> Result<()> {
    let record = tracker.water().today().await?;
    if json {
        return print_json(&record);
    }
    let goal = tracker.profiles().goals().await?.daily_water_goal_ml;
    print_water_log(&record, goal);
    Ok(())
}

pub(crate) async fn cmd_water_week(tracker: &Tracker, json: bool) -> Result<()> {
    let series = tracker.weekly(SeriesKind::Water).await?;
    if json {
        return print_json(&series);
    }
    print_weekly_table(&series);
    Ok(())
}

pub(crate) fn cmd_water_presets(json: bool) -> Result<()> {
    if json {
        return print_json(&WATER_PRESETS);
    }

    #[derive(Tabled)]
    struct PresetRow {
        #[tabled(rename = "")]
        icon: &'static str,
        #[tabled(rename = "Preset")]
        name: &'static str,
        #[tabled(rename = "Amount (ml)")]
        amount: u32,
    }

    let rows: Vec<PresetRow> = WATER_PRESETS
        .iter()
        .map(|p| PresetRow {
            icon: p.icon,
            name: p.name,
            amount: p.amount_ml,
        })
        .collect();
    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::new(2..3)).with(Alignment::right()))
        .to_string();
    println!("{table}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use stride_core::db::SqliteBackend;
    use stride_core::service::TrackerConfig;

    #[tokio::test]
    async fn test_add_preset_then_today() {
        let backend = SqliteBackend::open_in_memory().unwrap();
        let tracker = Tracker::with_backend(&TrackerConfig::new("u1"), &backend).unwrap();
        cmd_water_add(&tracker, "glass", true).await.unwrap();
        cmd_water_add(&tracker, "330ml", false).await.unwrap();
        let record = tracker.water().today().await.unwrap();
        assert_eq!(record.amount_ml, 580);
        assert_eq!(record.log_entries.len(), 2);
        cmd_water_today(&tracker, false).await.unwrap();
    }

    #[tokio::test]
    async fn test_add_rejects_bad_amount() {
        let backend = SqliteBackend::open_in_memory().unwrap();
        let tracker = Tracker::with_backend(&TrackerConfig::new("u1"), &backend).unwrap();
        assert!(cmd_water_add(&tracker, "bucket", false).await.is_err());
        assert!(tracker.water().today().await.unwrap().log_entries.is_empty());
    }

    #[test]
    fn test_presets_print() {
        cmd_water_presets(false).unwrap();
        cmd_water_presets(true).unwrap();
    }
}
