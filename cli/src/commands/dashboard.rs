use anyhow::Result;
use tabled::{
    Table, Tabled,
    settings::{Alignment, Modify, Style, object::Columns},
};

use stride_core::dashboard::Dashboard;
use stride_core::service::Tracker;

use super::helpers::{print_json, progress_bar};

pub(crate) async fn cmd_dashboard(tracker: &Tracker, json: bool) -> Result<()> {
    // Bring today's step record up to date before reading the tree.
    tracker.start().await?;
    let dashboard = tracker.dashboard().await?;
    if json {
        return print_json(&dashboard);
    }
    print_dashboard(&dashboard);
    Ok(())
}

fn print_dashboard(d: &Dashboard) {
    let greeting = d
        .profile
        .as_ref()
        .and_then(|p| p.full_name.as_deref())
        .map_or_else(|| "Hello!".to_string(), |name| format!("Hello, {name}!"));
    println!("{greeting}  {}", d.date.format("%A %Y-%m-%d"));
    println!();
    println!(
        "Steps  {:>6} / {:<6} {} {:>3}%",
        d.steps.steps,
        d.goals.daily_step_goal,
        progress_bar(d.step_progress, 20),
        d.step_percentage
    );
    println!(
        "Water  {:>6} / {:<6} {} {:>3}%",
        d.water_ml,
        d.goals.daily_water_goal_ml,
        progress_bar(d.water_progress, 20),
        d.water_percentage
    );
    println!(
        "       {:.2} km, {:.0} kcal, {} steps to go",
        d.steps.distance_km, d.steps.calories_burned, d.steps_remaining
    );
    println!();
    println!(
        "Level {}  {} {} / {} points",
        d.current_level,
        progress_bar(d.level_progress, 20),
        d.total_points,
        d.points_for_next_level
    );
    println!("{}", d.motivation);
    println!();

    #[derive(Tabled)]
    struct WeekRow {
        #[tabled(rename = "Day")]
        label: String,
        #[tabled(rename = "Steps")]
        steps: u64,
        #[tabled(rename = "Water (ml)")]
        water: u64,
    }

    let rows: Vec<WeekRow> = d
        .weekly_steps
        .points
        .iter()
        .zip(&d.weekly_water.points)
        .map(|(s, w)| WeekRow {
            label: s.label.clone(),
            steps: s.value,
            water: w.value,
        })
        .collect();
    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::new(1..3)).with(Alignment::right()))
        .to_string();
    println!("{table}");
}
