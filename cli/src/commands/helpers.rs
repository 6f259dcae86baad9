use anyhow::{Context, Result, bail};
use serde::Serialize;
use tabled::{
    Table, Tabled,
    settings::{Alignment, Modify, Style, object::Columns},
};

use stride_core::models::{SeriesKind, WeeklySeries, find_preset};

/// Parse a water amount: a number of ml ("250", "250ml", "250 ml") or a
/// preset name ("glass", "large-bottle").
pub(crate) fn parse_water_amount(s: &str) -> Result<u32> {
    let s = s.trim();
    if let Some(preset) = find_preset(s) {
        return Ok(preset.amount_ml);
    }

    let number = s
        .strip_suffix("ml")
        .or_else(|| s.strip_suffix("ML"))
        .unwrap_or(s)
        .trim();
    let value: u32 = number.parse().with_context(|| {
        format!("Invalid water amount: '{s}'. Use a number like '250' or '250ml', or a preset name")
    })?;
    if value == 0 {
        bail!("Water amount must be greater than 0 ml");
    }
    Ok(value)
}

pub(crate) fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub(crate) fn json_error(message: &str) -> String {
    #[derive(Serialize)]
    struct CliError<'a> {
        error: &'a str,
    }
    serde_json::to_string(&CliError { error: message })
        .unwrap_or_else(|_| format!("{{\"error\":\"{message}\"}}"))
}

/// Print a message for an empty result and exit with status 2.
pub(crate) fn nothing_to_show(message: &str, json: bool) -> ! {
    if json {
        println!("{}", json_error(message));
    } else {
        eprintln!("{message}");
    }
    std::process::exit(2);
}

/// A text bar of `width` cells filled to `ratio`.
#[allow(clippy::cast_sign_loss, clippy::cast_precision_loss)]
pub(crate) fn progress_bar(ratio: f64, width: usize) -> String {
    let filled = ((ratio.clamp(0.0, 1.0) * width as f64).round() as usize).min(width);
    format!("[{}{}]", "#".repeat(filled), "-".repeat(width - filled))
}

fn unit(kind: SeriesKind) -> &'static str {
    match kind {
        SeriesKind::Steps => "steps",
        SeriesKind::Water => "ml",
    }
}

pub(crate) fn print_weekly_table(series: &WeeklySeries) {
    #[derive(Tabled)]
    struct DayRow {
        #[tabled(rename = "Day")]
        label: String,
        #[tabled(rename = "Date")]
        date: String,
        #[tabled(rename = "Value")]
        value: u64,
        #[tabled(rename = "Goal")]
        goal: u32,
        #[tabled(rename = "Met")]
        met: String,
    }

    let rows: Vec<DayRow> = series
        .points
        .iter()
        .map(|p| DayRow {
            label: p.label.clone(),
            date: p.date.format("%Y-%m-%d").to_string(),
            value: p.value,
            goal: p.goal,
            met: if p.goal > 0 && p.value >= u64::from(p.goal) {
                "yes".to_string()
            } else {
                String::new()
            },
        })
        .collect();

    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::new(2..4)).with(Alignment::right()))
        .to_string();
    println!("{table}");

    let unit = unit(series.kind);
    println!(
        "Total: {} {unit}  Average: {:.0} {unit}/day  Goal met: {}/7 days",
        series.total, series.average, series.days_goal_met
    );
    if series.kind == SeriesKind::Steps {
        println!("Calories burned: {:.0} kcal", series.calories_burned);
    }
}

pub(crate) fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let end = s.char_indices().nth(max - 3).map_or(s.len(), |(i, _)| i);
        format!("{}...", &s[..end])
    }
}
