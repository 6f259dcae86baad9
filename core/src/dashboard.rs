use std::sync::Arc;

use chrono::NaiveDate;
use serde::Serialize;
use serde_json::Value;

use crate::clock::Clock;
use crate::models::{
    DailyRecord, SeriesKind, TodaySummary, UserGoals, UserProfile, WaterRecord, WeeklySeries,
    format_date,
};
use crate::progress::{
    Motivation, level_progress, percentage, points_for_next_level, progress, remaining_to_goal,
};
use crate::session::UserSession;
use crate::store::Subscription;
use crate::weekly::build_weekly_series;

/// Everything the home screen shows, derived from one snapshot of the
/// user's tree.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Dashboard {
    pub date: NaiveDate,
    pub profile: Option<UserProfile>,
    pub goals: UserGoals,
    pub steps: DailyRecord,
    pub water_ml: u32,
    pub step_progress: f64,
    pub step_percentage: u32,
    pub steps_remaining: u64,
    pub water_progress: f64,
    pub water_percentage: u32,
    pub total_points: u64,
    pub current_level: u32,
    pub level_progress: f64,
    pub points_for_next_level: u64,
    pub motivation: Motivation,
    pub weekly_steps: WeeklySeries,
    pub weekly_water: WeeklySeries,
}

impl Dashboard {
    /// Build from the value at `users/{uid}`. Unreadable parts are logged
    /// and shown as empty.
    #[must_use]
    pub fn from_snapshot(session: &UserSession, today: NaiveDate, root: &Value) -> Self {
        let root_path = session.root_path();
        let profile = UserProfile::from_value(&root_path, root).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "unreadable profile on dashboard");
            None
        });
        let goals = profile.as_ref().map(|p| p.goals).unwrap_or_default();
        let key = format_date(today);

        let summary = match TodaySummary::from_value(&session.today_path(), &root["today"]) {
            Ok(s) => s.map_or_else(|| TodaySummary::empty(today), |s| s.for_date(today)),
            Err(e) => {
                tracing::warn!(error = %e, "unreadable today summary");
                TodaySummary::empty(today)
            }
        };

        let steps_path = session.steps_path(today);
        let steps = match DailyRecord::from_value(&steps_path, today, &root["steps"][&key]) {
            Ok(Some(record)) => record,
            Ok(None) => DailyRecord::from_steps(today, summary.steps),
            Err(e) => {
                tracing::warn!(error = %e, "unreadable step record on dashboard");
                DailyRecord::from_steps(today, summary.steps)
            }
        };

        let water_path = session.water_path(today);
        let water_ml = match WaterRecord::from_value(&water_path, today, &root["water"][&key]) {
            Ok(Some(record)) => record.amount_ml,
            Ok(None) => summary.water_ml,
            Err(e) => {
                tracing::warn!(error = %e, "unreadable water record on dashboard");
                summary.water_ml
            }
        };

        let step_goal = i64::from(goals.daily_step_goal);
        let water_goal = i64::from(goals.daily_water_goal_ml);
        let step_progress = progress(steps.steps, step_goal);
        let (total_points, current_level) = profile
            .as_ref()
            .map_or((0, 1), |p| (p.total_points, p.current_level));

        Self {
            date: today,
            steps_remaining: remaining_to_goal(steps.steps, step_goal),
            step_percentage: percentage(steps.steps, step_goal),
            step_progress,
            water_progress: progress(u64::from(water_ml), water_goal),
            water_percentage: percentage(u64::from(water_ml), water_goal),
            total_points,
            current_level,
            level_progress: level_progress(total_points, current_level),
            points_for_next_level: points_for_next_level(current_level),
            motivation: Motivation::for_progress(step_progress),
            weekly_steps: build_weekly_series(
                SeriesKind::Steps,
                today,
                goals.daily_step_goal,
                &root["steps"],
            ),
            weekly_water: build_weekly_series(
                SeriesKind::Water,
                today,
                goals.daily_water_goal_ml,
                &root["water"],
            ),
            profile,
            goals,
            steps,
            water_ml,
        }
    }
}

/// Live dashboard. Dropping it releases the listener.
pub struct DashboardWatch {
    sub: Subscription,
    session: UserSession,
    clock: Arc<dyn Clock>,
}

impl DashboardWatch {
    #[must_use]
    pub fn new(sub: Subscription, session: UserSession, clock: Arc<dyn Clock>) -> Self {
        Self {
            sub,
            session,
            clock,
        }
    }

    pub async fn next(&mut self) -> Option<Dashboard> {
        let root = self.sub.next().await?;
        Some(Dashboard::from_snapshot(
            &self.session,
            self.clock.today(),
            &root,
        ))
    }
}
