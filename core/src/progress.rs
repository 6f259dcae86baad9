use std::fmt;

use serde::Serialize;

use crate::models::{ML_PER_POINT, POINTS_PER_LEVEL};

/// Fraction of `goal` reached, in `[0, 1]`. A goal of zero or less means
/// there is nothing to make progress towards.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn progress(value: u64, goal: i64) -> f64 {
    if goal <= 0 {
        return 0.0;
    }
    (value as f64 / goal as f64).min(1.0)
}

/// Progress as a whole percentage for display.
#[must_use]
#[allow(clippy::cast_sign_loss)]
pub fn percentage(value: u64, goal: i64) -> u32 {
    (progress(value, goal) * 100.0).round() as u32
}

#[must_use]
pub fn goal_met(value: u64, goal: i64) -> bool {
    goal > 0 && progress(value, goal) >= 1.0
}

#[must_use]
pub fn remaining_to_goal(value: u64, goal: i64) -> u64 {
    u64::try_from(goal).unwrap_or(0).saturating_sub(value)
}

/// One point per full 100 ml.
#[must_use]
pub fn points_for_water_addition(amount_ml: u32) -> u64 {
    u64::from(amount_ml / ML_PER_POINT)
}

/// How far through `current_level` the user is, in `[0, 1]`. Level `L`
/// starts at `(L-1) * 1000` points and completes at `L * 1000`.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn level_progress(total_points: u64, current_level: u32) -> f64 {
    let level = u64::from(current_level.max(1));
    let start = (level - 1) * POINTS_PER_LEVEL;
    let into_level = total_points.saturating_sub(start) as f64;
    (into_level / POINTS_PER_LEVEL as f64).clamp(0.0, 1.0)
}

/// Cumulative points at which `current_level` completes.
#[must_use]
pub fn points_for_next_level(current_level: u32) -> u64 {
    u64::from(current_level.max(1)) * POINTS_PER_LEVEL
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Motivation {
    GoalReached,
    Halfway,
    KeepMoving,
}

impl Motivation {
    #[must_use]
    pub fn for_progress(ratio: f64) -> Self {
        if ratio >= 1.0 {
            Self::GoalReached
        } else if ratio >= 0.5 {
            Self::Halfway
        } else {
            Self::KeepMoving
        }
    }

    #[must_use]
    pub fn message(self) -> &'static str {
        match self {
            Self::GoalReached => "Amazing! You've reached your step goal!",
            Self::Halfway => "You're halfway there! Keep it up!",
            Self::KeepMoving => "Every step counts! Let's get moving!",
        }
    }
}

impl fmt::Display for Motivation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BmiCategory {
    Underweight,
    Normal,
    Overweight,
    Obese,
}

impl BmiCategory {
    #[must_use]
    pub fn for_bmi(bmi: f64) -> Self {
        if bmi < 18.5 {
            Self::Underweight
        } else if bmi < 25.0 {
            Self::Normal
        } else if bmi < 30.0 {
            Self::Overweight
        } else {
            Self::Obese
        }
    }
}

impl fmt::Display for BmiCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Underweight => "Underweight",
            Self::Normal => "Normal",
            Self::Overweight => "Overweight",
            Self::Obese => "Obese",
        };
        f.write_str(s)
    }
}

/// Body-mass index from weight in kg and height in cm.
#[must_use]
pub fn bmi(weight_kg: Option<f64>, height_cm: Option<f64>) -> Option<f64> {
    let (w, h) = (weight_kg?, height_cm?);
    if !(w.is_finite() && h.is_finite()) || w <= 0.0 || h <= 0.0 {
        return None;
    }
    let meters = h / 100.0;
    Some(w / (meters * meters))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_is_clamped_ratio() {
        assert!((progress(4000, 8000) - 0.5).abs() < 1e-12);
        assert!((progress(12_000, 8000) - 1.0).abs() < 1e-12);
        assert!(progress(0, 8000).abs() < 1e-12);
    }

    #[test]
    fn test_progress_non_positive_goal_is_zero() {
        assert!(progress(500, 0).abs() < f64::EPSILON);
        assert!(progress(500, -10).abs() < f64::EPSILON);
        assert!(!goal_met(500, 0));
    }

    #[test]
    fn test_progress_matches_definition_over_range() {
        for goal in [1_i64, 7, 100, 8000] {
            for value in [0_u64, 1, 6, 99, 100, 7999, 8000, 20_000] {
                #[allow(clippy::cast_precision_loss)]
                let expected = (value as f64 / goal as f64).min(1.0);
                assert!((progress(value, goal) - expected).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn test_percentage_and_remaining() {
        assert_eq!(percentage(2000, 8000), 25);
        assert_eq!(percentage(9000, 8000), 100);
        assert_eq!(remaining_to_goal(6500, 8000), 1500);
        assert_eq!(remaining_to_goal(9000, 8000), 0);
        assert!(goal_met(8000, 8000));
    }

    #[test]
    fn test_points_for_water() {
        assert_eq!(points_for_water_addition(250), 2);
        assert_eq!(points_for_water_addition(330), 3);
        assert_eq!(points_for_water_addition(99), 0);
        assert_eq!(points_for_water_addition(1000), 10);
    }

    #[test]
    fn test_level_progress() {
        assert!((level_progress(1500, 2) - 0.5).abs() < 1e-12);
        assert!(level_progress(500, 3).abs() < 1e-12);
        assert!((level_progress(5000, 1) - 1.0).abs() < 1e-12);
        assert!((level_progress(250, 0) - 0.25).abs() < 1e-12);
        assert_eq!(points_for_next_level(2), 2000);
    }

    #[test]
    fn test_motivation_tiers() {
        assert_eq!(Motivation::for_progress(1.0), Motivation::GoalReached);
        assert_eq!(Motivation::for_progress(0.5), Motivation::Halfway);
        assert_eq!(Motivation::for_progress(0.49), Motivation::KeepMoving);
    }

    #[test]
    fn test_bmi() {
        let value = bmi(Some(70.0), Some(175.0)).unwrap();
        assert!((value - 22.857).abs() < 1e-3);
        assert_eq!(BmiCategory::for_bmi(value), BmiCategory::Normal);
        assert_eq!(BmiCategory::for_bmi(17.0), BmiCategory::Underweight);
        assert_eq!(BmiCategory::for_bmi(27.0), BmiCategory::Overweight);
        assert_eq!(BmiCategory::for_bmi(31.0), BmiCategory::Obese);
        assert!(bmi(None, Some(175.0)).is_none());
        assert!(bmi(Some(70.0), Some(0.0)).is_none());
    }
}
