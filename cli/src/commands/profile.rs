use anyhow::{Result, bail};
use serde::Serialize;

use stride_core::models::{NewProfile, ProfileUpdate, UserGoals, UserProfile};
use stride_core::progress::{BmiCategory, bmi};
use stride_core::service::Tracker;

use super::helpers::{nothing_to_show, print_json, truncate};

#[derive(Serialize)]
struct ProfileView<'a> {
    uid: &'a str,
    #[serde(flatten)]
    profile: &'a UserProfile,
    bmi: Option<f64>,
    bmi_category: Option<BmiCategory>,
}

fn print_profile(uid: &str, profile: &UserProfile, json: bool) -> Result<()> {
    let bmi = bmi(profile.weight_kg, profile.height_cm);
    if json {
        return print_json(&ProfileView {
            uid,
            profile,
            bmi,
            bmi_category: bmi.map(BmiCategory::for_bmi),
        });
    }

    let name = profile.full_name.as_deref().unwrap_or("-");
    println!("{} ({uid})", truncate(name, 40));
    if let Some(age) = profile.age {
        println!("  Age:     {age}");
    }
    if let Some(h) = profile.height_cm {
        println!("  Height:  {h:.0} cm");
    }
    if let Some(w) = profile.weight_kg {
        println!("  Weight:  {w:.1} kg");
    }
    if let Some(b) = bmi {
        println!("  BMI:     {b:.1} ({})", BmiCategory::for_bmi(b));
    }
    println!(
        "  Goals:   {} steps, {} ml water",
        profile.goals.daily_step_goal, profile.goals.daily_water_goal_ml
    );
    println!(
        "  Points:  {} (level {})",
        profile.total_points, profile.current_level
    );
    Ok(())
}

pub(crate) async fn cmd_init(
    tracker: &Tracker,
    full_name: String,
    age: u32,
    height_cm: f64,
    weight_kg: f64,
    json: bool,
) -> Result<()> {
    let new = NewProfile {
        full_name,
        age,
        height_cm,
        weight_kg,
    };
    let profile = tracker.profiles().create_profile(&new).await?;
    if !json {
        println!("Welcome to stride!");
    }
    print_profile(tracker.session().uid(), &profile, json)
}

pub(crate) async fn cmd_profile_show(tracker: &Tracker, json: bool) -> Result<()> {
    match tracker.profiles().load_profile().await? {
        Some(profile) => print_profile(tracker.session().uid(), &profile, json),
        None => nothing_to_show("No profile yet. Run `stride init` to create one.", json),
    }
}

pub(crate) async fn cmd_profile_set(
    tracker: &Tracker,
    full_name: Option<String>,
    age: Option<u32>,
    height_cm: Option<f64>,
    weight_kg: Option<f64>,
    json: bool,
) -> Result<()> {
    let update = ProfileUpdate {
        full_name,
        age,
        height_cm,
        weight_kg,
        ..ProfileUpdate::default()
    };
    if update.is_empty() {
        bail!("Nothing to update. Specify at least one of --name, --age, --height, --weight");
    }
    let profile = tracker.profiles().update_profile(&update).await?;
    print_profile(tracker.session().uid(), &profile, json)
}

fn print_goals(goals: &UserGoals, json: bool) -> Result<()> {
    if json {
        return print_json(goals);
    }
    println!("Daily step goal:  {} steps", goals.daily_step_goal);
    println!("Daily water goal: {} ml", goals.daily_water_goal_ml);
    Ok(())
}

pub(crate) async fn cmd_goals_show(tracker: &Tracker, json: bool) -> Result<()> {
    let goals = tracker.profiles().goals().await?;
    print_goals(&goals, json)
}

pub(crate) async fn cmd_goals_set(
    tracker: &Tracker,
    steps: Option<u32>,
    water: Option<u32>,
    json: bool,
) -> Result<()> {
    if steps.is_none() && water.is_none() {
        bail!("Specify --steps, --water, or both");
    }
    let goals = tracker.profiles().set_goals(steps, water).await?;
    print_goals(&goals, json)
}
