use std::fmt;
use std::str::FromStr;

use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::error::{TrackerError, TrackerResult};

pub const CALORIES_PER_STEP: f64 = 0.04;
pub const METERS_PER_STEP: f64 = 0.762;
pub const DEFAULT_STEP_GOAL: u32 = 8000;
pub const DEFAULT_WATER_GOAL_ML: u32 = 2000;
pub const POINTS_PER_LEVEL: u64 = 1000;
pub const ML_PER_POINT: u32 = 100;
pub const WEEK_DAYS: usize = 7;
pub const MAX_WATER_ADDITION_ML: u32 = 5000;

pub const DATE_FORMAT: &str = "%Y-%m-%d";
pub const TIME_FORMAT: &str = "%H:%M";

#[must_use]
pub fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

pub fn parse_date(s: &str) -> TrackerResult<NaiveDate> {
    Ok(NaiveDate::parse_from_str(s, DATE_FORMAT)?)
}

/// Serde adapter for `HH:MM` wall-clock times.
mod hhmm {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    use super::TIME_FORMAT;

    pub fn serialize<S: Serializer>(time: &NaiveTime, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&time.format(TIME_FORMAT).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveTime, D::Error> {
        let raw = String::deserialize(d)?;
        NaiveTime::parse_from_str(&raw, TIME_FORMAT).map_err(serde::de::Error::custom)
    }
}

// --- Loosely typed field readers ---
//
// Records arrive as untyped JSON. Missing or null fields take the documented
// default; a field of the wrong shape is a `MalformedRecord`.

fn as_object<'a>(path: &str, value: &'a Value) -> TrackerResult<Option<&'a Map<String, Value>>> {
    match value {
        Value::Null => Ok(None),
        Value::Object(map) => Ok(Some(map)),
        other => Err(TrackerError::malformed(
            path,
            format!("expected an object, found {}", kind_of(other)),
        )),
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[allow(clippy::cast_sign_loss)]
fn count_field(path: &str, map: &Map<String, Value>, name: &str) -> TrackerResult<Option<u64>> {
    match map.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => {
            if let Some(v) = n.as_u64() {
                return Ok(Some(v));
            }
            match n.as_f64() {
                Some(f) if f.is_finite() && f >= 0.0 && f.fract() == 0.0 => Ok(Some(f as u64)),
                _ => Err(TrackerError::malformed(
                    path,
                    format!("{name} must be a non-negative integer, found {n}"),
                )),
            }
        }
        Some(other) => Err(TrackerError::malformed(
            path,
            format!("{name} must be a number, found {}", kind_of(other)),
        )),
    }
}

fn float_field(path: &str, map: &Map<String, Value>, name: &str) -> TrackerResult<Option<f64>> {
    match map.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => Ok(n.as_f64()),
        Some(other) => Err(TrackerError::malformed(
            path,
            format!("{name} must be a number, found {}", kind_of(other)),
        )),
    }
}

fn string_field(path: &str, map: &Map<String, Value>, name: &str) -> TrackerResult<Option<String>> {
    match map.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(other) => Err(TrackerError::malformed(
            path,
            format!("{name} must be a string, found {}", kind_of(other)),
        )),
    }
}

fn u32_field(path: &str, map: &Map<String, Value>, name: &str) -> TrackerResult<Option<u32>> {
    count_field(path, map, name)?
        .map(|v| {
            u32::try_from(v)
                .map_err(|_| TrackerError::malformed(path, format!("{name} is out of range")))
        })
        .transpose()
}

// --- Step records ---

/// One user's step total for one calendar day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyRecord {
    pub date: NaiveDate,
    pub steps: u64,
    pub calories_burned: f64,
    pub distance_km: f64,
}

impl DailyRecord {
    #[must_use]
    pub fn empty(date: NaiveDate) -> Self {
        Self {
            date,
            steps: 0,
            calories_burned: 0.0,
            distance_km: 0.0,
        }
    }

    /// Build a record with calories and distance derived from `steps`.
    #[must_use]
    pub fn from_steps(date: NaiveDate, steps: u64) -> Self {
        Self {
            date,
            steps,
            calories_burned: calories_for_steps(steps),
            distance_km: distance_km_for_steps(steps),
        }
    }

    /// Parse the record stored at `users/{uid}/steps/{date}`.
    ///
    /// The key is authoritative for `date`. Missing `steps` reads as 0 and
    /// missing derived fields are recomputed from `steps`.
    pub fn from_value(path: &str, date: NaiveDate, value: &Value) -> TrackerResult<Option<Self>> {
        let Some(map) = as_object(path, value)? else {
            return Ok(None);
        };
        let steps = count_field(path, map, "steps")?.unwrap_or(0);
        let calories_burned =
            float_field(path, map, "calories_burned")?.unwrap_or_else(|| calories_for_steps(steps));
        let distance_km =
            float_field(path, map, "distance_km")?.unwrap_or_else(|| distance_km_for_steps(steps));
        Ok(Some(Self {
            date,
            steps,
            calories_burned,
            distance_km,
        }))
    }

    #[must_use]
    pub fn to_value(&self) -> Value {
        Value::Object(self.to_fields())
    }

    /// Field map suitable for a narrow `update`.
    #[must_use]
    pub fn to_fields(&self) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("date".into(), json!(format_date(self.date)));
        map.insert("steps".into(), json!(self.steps));
        map.insert("calories_burned".into(), json!(self.calories_burned));
        map.insert("distance_km".into(), json!(self.distance_km));
        map
    }
}

#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn calories_for_steps(steps: u64) -> f64 {
    steps as f64 * CALORIES_PER_STEP
}

#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn distance_km_for_steps(steps: u64) -> f64 {
    steps as f64 * METERS_PER_STEP / 1000.0
}

// --- Water records ---

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaterLogEntry {
    #[serde(with = "hhmm")]
    pub time: NaiveTime,
    #[serde(rename = "amount")]
    pub amount_ml: u32,
}

/// One user's water intake for one calendar day.
///
/// `amount_ml` always equals the sum of `log_entries`; entries are kept in
/// the order they were added.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WaterRecord {
    pub date: NaiveDate,
    pub amount_ml: u32,
    pub log_entries: Vec<WaterLogEntry>,
}

impl WaterRecord {
    #[must_use]
    pub fn empty(date: NaiveDate) -> Self {
        Self {
            date,
            amount_ml: 0,
            log_entries: Vec::new(),
        }
    }

    /// Append an addition, returning the updated record. Fails if the day's
    /// total would no longer fit.
    pub fn with_addition(&self, time: NaiveTime, amount_ml: u32) -> TrackerResult<Self> {
        let total = self.amount_ml.checked_add(amount_ml).ok_or_else(|| {
            TrackerError::InvalidInput(format!(
                "Adding {amount_ml} ml would overflow today's water total of {} ml",
                self.amount_ml
            ))
        })?;
        let mut next = self.clone();
        next.log_entries.push(WaterLogEntry { time, amount_ml });
        next.amount_ml = total;
        Ok(next)
    }

    /// Entries newest first, the order the log is displayed in.
    #[must_use]
    pub fn entries_newest_first(&self) -> Vec<&WaterLogEntry> {
        self.log_entries.iter().rev().collect()
    }

    /// Parse the record stored at `users/{uid}/water/{date}`.
    ///
    /// `log_entries` may arrive as an array or as an object keyed by index.
    /// A stored `amount_ml` that disagrees with logged entries is malformed;
    /// a record with no entries keeps its stored total.
    pub fn from_value(path: &str, date: NaiveDate, value: &Value) -> TrackerResult<Option<Self>> {
        let Some(map) = as_object(path, value)? else {
            return Ok(None);
        };

        let raw_entries: Vec<&Value> = match map.get("log_entries") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => items.iter().filter(|v| !v.is_null()).collect(),
            Some(Value::Object(indexed)) => {
                let mut keyed = Vec::with_capacity(indexed.len());
                for (k, v) in indexed {
                    let idx: usize = k.parse().map_err(|_| {
                        TrackerError::malformed(path, format!("log_entries key '{k}' is not an index"))
                    })?;
                    keyed.push((idx, v));
                }
                keyed.sort_by_key(|(idx, _)| *idx);
                keyed.into_iter().map(|(_, v)| v).collect()
            }
            Some(other) => {
                return Err(TrackerError::malformed(
                    path,
                    format!("log_entries must be a list, found {}", kind_of(other)),
                ));
            }
        };

        let mut log_entries = Vec::with_capacity(raw_entries.len());
        for raw in raw_entries {
            let entry: WaterLogEntry = serde_json::from_value(raw.clone())
                .map_err(|e| TrackerError::malformed(path, format!("bad log entry: {e}")))?;
            log_entries.push(entry);
        }

        let summed = log_entries
            .iter()
            .try_fold(0_u32, |acc, e| acc.checked_add(e.amount_ml))
            .ok_or_else(|| TrackerError::malformed(path, "logged water total overflows"))?;
        let amount_ml = u32_field(path, map, "amount_ml")?.unwrap_or(summed);
        if !log_entries.is_empty() && amount_ml != summed {
            return Err(TrackerError::malformed(
                path,
                format!("amount_ml {amount_ml} does not match logged total {summed}"),
            ));
        }

        Ok(Some(Self {
            date,
            amount_ml,
            log_entries,
        }))
    }

    #[must_use]
    pub fn to_value(&self) -> Value {
        json!({
            "amount_ml": self.amount_ml,
            "log_entries": self.log_entries,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WaterPreset {
    pub name: &'static str,
    pub amount_ml: u32,
    pub icon: &'static str,
}

pub const WATER_PRESETS: &[WaterPreset] = &[
    WaterPreset {
        name: "Glass",
        amount_ml: 250,
        icon: "🥛",
    },
    WaterPreset {
        name: "Bottle",
        amount_ml: 330,
        icon: "🍼",
    },
    WaterPreset {
        name: "Large Bottle",
        amount_ml: 500,
        icon: "🧴",
    },
    WaterPreset {
        name: "Coffee Cup",
        amount_ml: 200,
        icon: "☕",
    },
];

/// Look up a preset by name, ignoring case and treating `-`/`_` as spaces.
#[must_use]
pub fn find_preset(name: &str) -> Option<&'static WaterPreset> {
    let wanted = name.trim().to_lowercase().replace(['-', '_'], " ");
    WATER_PRESETS
        .iter()
        .find(|p| p.name.to_lowercase() == wanted)
}

pub fn validate_water_amount(amount_ml: u32) -> TrackerResult<()> {
    if amount_ml == 0 {
        return Err(TrackerError::InvalidInput(
            "Water amount must be greater than 0 ml".to_string(),
        ));
    }
    if amount_ml > MAX_WATER_ADDITION_ML {
        return Err(TrackerError::InvalidInput(format!(
            "Water amount must be at most {MAX_WATER_ADDITION_ML} ml per addition"
        )));
    }
    Ok(())
}

// --- Goals and profile ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserGoals {
    pub daily_step_goal: u32,
    pub daily_water_goal_ml: u32,
}

impl Default for UserGoals {
    fn default() -> Self {
        Self {
            daily_step_goal: DEFAULT_STEP_GOAL,
            daily_water_goal_ml: DEFAULT_WATER_GOAL_ML,
        }
    }
}

impl UserGoals {
    /// Read goals from a profile node. Missing or zero goals take the defaults.
    pub fn from_value(path: &str, value: &Value) -> TrackerResult<Self> {
        let Some(map) = as_object(path, value)? else {
            return Ok(Self::default());
        };
        Self::from_map(path, map)
    }

    fn from_map(path: &str, map: &Map<String, Value>) -> TrackerResult<Self> {
        let defaults = Self::default();
        let step = u32_field(path, map, "daily_step_goal")?.filter(|g| *g > 0);
        let water = u32_field(path, map, "daily_water_goal")?.filter(|g| *g > 0);
        Ok(Self {
            daily_step_goal: step.unwrap_or(defaults.daily_step_goal),
            daily_water_goal_ml: water.unwrap_or(defaults.daily_water_goal_ml),
        })
    }
}

pub fn validate_goal(name: &str, value: u32) -> TrackerResult<()> {
    if value == 0 {
        return Err(TrackerError::InvalidInput(format!(
            "{name} must be greater than 0"
        )));
    }
    Ok(())
}

/// The profile node at `users/{uid}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserProfile {
    pub full_name: Option<String>,
    pub age: Option<u32>,
    pub height_cm: Option<f64>,
    pub weight_kg: Option<f64>,
    pub total_points: u64,
    pub current_level: u32,
    pub goals: UserGoals,
    pub created_at: Option<String>,
}

impl UserProfile {
    pub fn from_value(path: &str, value: &Value) -> TrackerResult<Option<Self>> {
        let Some(map) = as_object(path, value)? else {
            return Ok(None);
        };
        Ok(Some(Self {
            full_name: string_field(path, map, "full_name")?,
            age: u32_field(path, map, "age")?,
            height_cm: float_field(path, map, "height")?,
            weight_kg: float_field(path, map, "weight")?,
            total_points: count_field(path, map, "total_points")?.unwrap_or(0),
            current_level: u32_field(path, map, "current_level")?
                .filter(|l| *l > 0)
                .unwrap_or(1),
            goals: UserGoals::from_map(path, map)?,
            created_at: string_field(path, map, "createdAt")?,
        }))
    }
}

/// Details collected during onboarding.
#[derive(Debug, Clone, PartialEq)]
pub struct NewProfile {
    pub full_name: String,
    pub age: u32,
    pub height_cm: f64,
    pub weight_kg: f64,
}

impl NewProfile {
    pub fn validate(&self) -> TrackerResult<()> {
        if self.full_name.trim().is_empty() {
            return Err(TrackerError::InvalidInput(
                "Full name must not be empty".to_string(),
            ));
        }
        if !(13..=120).contains(&self.age) {
            return Err(TrackerError::InvalidInput(
                "Please enter a valid age (13-120)".to_string(),
            ));
        }
        if !(50.0..=250.0).contains(&self.height_cm) {
            return Err(TrackerError::InvalidInput(
                "Please enter a valid height in cm (50-250)".to_string(),
            ));
        }
        if !(20.0..=300.0).contains(&self.weight_kg) {
            return Err(TrackerError::InvalidInput(
                "Please enter a valid weight in kg (20-300)".to_string(),
            ));
        }
        Ok(())
    }

    #[must_use]
    pub fn to_value(&self, created_at: &str) -> Value {
        let goals = UserGoals::default();
        json!({
            "full_name": self.full_name.trim(),
            "age": self.age,
            "height": self.height_cm,
            "weight": self.weight_kg,
            "total_points": 0,
            "current_level": 1,
            "daily_step_goal": goals.daily_step_goal,
            "daily_water_goal": goals.daily_water_goal_ml,
            "createdAt": created_at,
        })
    }
}

fn validate_measurement(name: &str, value: Option<f64>) -> TrackerResult<()> {
    if let Some(v) = value {
        if !v.is_finite() || v <= 0.0 {
            return Err(TrackerError::InvalidInput(format!(
                "{name} must be greater than 0"
            )));
        }
    }
    Ok(())
}

/// A partial profile edit; only the `Some` fields are written.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProfileUpdate {
    pub full_name: Option<String>,
    pub age: Option<u32>,
    pub height_cm: Option<f64>,
    pub weight_kg: Option<f64>,
    pub daily_step_goal: Option<u32>,
    pub daily_water_goal_ml: Option<u32>,
}

impl ProfileUpdate {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Validate and convert to the narrow field map written to `users/{uid}`.
    pub fn to_fields(&self) -> TrackerResult<Map<String, Value>> {
        let mut fields = Map::new();
        if let Some(name) = &self.full_name {
            if name.trim().is_empty() {
                return Err(TrackerError::InvalidInput(
                    "Full name must not be empty".to_string(),
                ));
            }
            fields.insert("full_name".into(), json!(name.trim()));
        }
        if let Some(age) = self.age {
            validate_goal("Age", age)?;
            fields.insert("age".into(), json!(age));
        }
        validate_measurement("Height", self.height_cm)?;
        if let Some(h) = self.height_cm {
            fields.insert("height".into(), json!(h));
        }
        validate_measurement("Weight", self.weight_kg)?;
        if let Some(w) = self.weight_kg {
            fields.insert("weight".into(), json!(w));
        }
        if let Some(g) = self.daily_step_goal {
            validate_goal("Daily step goal", g)?;
            fields.insert("daily_step_goal".into(), json!(g));
        }
        if let Some(g) = self.daily_water_goal_ml {
            validate_goal("Daily water goal", g)?;
            fields.insert("daily_water_goal".into(), json!(g));
        }
        Ok(fields)
    }
}

// --- Today summary ---

/// The shared `users/{uid}/today` node read by the dashboard.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TodaySummary {
    pub date: Option<NaiveDate>,
    pub steps: u64,
    pub calories_burned: f64,
    pub distance_km: f64,
    pub water_ml: u32,
}

impl TodaySummary {
    #[must_use]
    pub fn empty(date: NaiveDate) -> Self {
        Self {
            date: Some(date),
            steps: 0,
            calories_burned: 0.0,
            distance_km: 0.0,
            water_ml: 0,
        }
    }

    pub fn from_value(path: &str, value: &Value) -> TrackerResult<Option<Self>> {
        let Some(map) = as_object(path, value)? else {
            return Ok(None);
        };
        let date = match string_field(path, map, "date")? {
            Some(s) => Some(
                parse_date(&s)
                    .map_err(|_| TrackerError::malformed(path, format!("bad date '{s}'")))?,
            ),
            None => None,
        };
        Ok(Some(Self {
            date,
            steps: count_field(path, map, "steps")?.unwrap_or(0),
            calories_burned: float_field(path, map, "calories_burned")?.unwrap_or(0.0),
            distance_km: float_field(path, map, "distance_km")?.unwrap_or(0.0),
            water_ml: u32_field(path, map, "water_ml")?.unwrap_or(0),
        }))
    }

    /// The summary as it applies to `date`; a summary left over from an
    /// earlier day reads as empty.
    #[must_use]
    pub fn for_date(self, date: NaiveDate) -> Self {
        if self.date == Some(date) {
            self
        } else {
            Self::empty(date)
        }
    }
}

// --- Device-local counting state ---

/// Step counting state owned by one device.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LocalCounterState {
    pub last_reset_date: Option<NaiveDate>,
    /// Raw pedometer reading at which today's count starts.
    pub baseline_device_steps: Option<u64>,
    /// Steps counted today before the device counter last reset.
    pub carried_steps: u64,
    pub cached_steps: u64,
}

impl LocalCounterState {
    #[must_use]
    pub fn fresh(date: NaiveDate) -> Self {
        Self {
            last_reset_date: Some(date),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SensorAvailability {
    #[default]
    Unknown,
    Available,
    Unavailable,
}

impl fmt::Display for SensorAvailability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unknown => "unknown",
            Self::Available => "available",
            Self::Unavailable => "unavailable",
        };
        f.write_str(s)
    }
}

/// How a day's step count is derived from the device pedometer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CountingStrategy {
    /// Subtract a cached raw reading captured at the start of the day.
    Baseline,
    /// Ask the sensor for the steps between local midnight and now.
    #[default]
    MidnightQuery,
}

impl FromStr for CountingStrategy {
    type Err = TrackerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "baseline" => Ok(Self::Baseline),
            "midnight" | "midnight-query" | "midnight_query" => Ok(Self::MidnightQuery),
            other => Err(TrackerError::InvalidInput(format!(
                "Invalid counting strategy '{other}'. Use 'baseline' or 'midnight-query'"
            ))),
        }
    }
}

impl fmt::Display for CountingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Baseline => f.write_str("baseline"),
            Self::MidnightQuery => f.write_str("midnight-query"),
        }
    }
}

// --- Weekly series ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SeriesKind {
    Steps,
    Water,
}

impl SeriesKind {
    /// Child collection under `users/{uid}` holding the per-day records.
    #[must_use]
    pub fn collection(self) -> &'static str {
        match self {
            Self::Steps => "steps",
            Self::Water => "water",
        }
    }
}

impl FromStr for SeriesKind {
    type Err = TrackerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "steps" => Ok(Self::Steps),
            "water" => Ok(Self::Water),
            other => Err(TrackerError::InvalidInput(format!(
                "Invalid series '{other}'. Use 'steps' or 'water'"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeeklyPoint {
    pub date: NaiveDate,
    /// Short weekday name, e.g. `Mon`.
    pub label: String,
    pub value: u64,
    /// The goal in force when the series was read, not the historical one.
    pub goal: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeeklySeries {
    pub kind: SeriesKind,
    pub points: Vec<WeeklyPoint>,
    pub total: u64,
    pub average: f64,
    pub days_goal_met: u32,
    /// Sum of stored calories for the steps series; 0 for water.
    pub calories_burned: f64,
}
