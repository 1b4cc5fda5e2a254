// src/config.rs
//
// All compliance thresholds are configuration, not constants: the numbers
// below are the shipped defaults, overridable through `ATTENDANCE_`-prefixed
// environment variables.

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::model::BreakType;

#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Worked minutes before an employee may take a manual break.
    #[serde(default = "default_manual_break_eligibility_minutes")]
    pub manual_break_eligibility_minutes: i64,
    /// Worked minutes after which a SHORT break is due.
    #[serde(default = "default_short_break_due_minutes")]
    pub short_break_due_minutes: i64,
    /// Worked minutes after which a LUNCH break is due.
    #[serde(default = "default_lunch_break_due_minutes")]
    pub lunch_break_due_minutes: i64,
    /// Minimum gap between two break reminders for the same session.
    #[serde(default = "default_reminder_cooldown_minutes")]
    pub reminder_cooldown_minutes: i64,
    /// Geofence radius used when a location does not carry its own.
    #[serde(default = "default_geofence_radius_meters")]
    pub geofence_radius_meters: f64,
    /// Session duration above which `is_overtime` is set when no
    /// OVERTIME_THRESHOLD rule matches.
    #[serde(default = "default_overtime_after_hours")]
    pub overtime_after_hours: f64,
    /// Minimum closed-break duration for the break to count as compliant.
    #[serde(default = "default_short_break_min_minutes")]
    pub short_break_min_minutes: i64,
    #[serde(default = "default_lunch_break_min_minutes")]
    pub lunch_break_min_minutes: i64,
    /// When set, a waived required break still produces a LOW-severity
    /// compliance record instead of being fully suppressed.
    #[serde(default)]
    pub flag_waived_breaks: bool,
    /// Open sessions older than this are included in the periodic
    /// violation sweep.
    #[serde(default = "default_open_session_sweep_after_hours")]
    pub open_session_sweep_after_hours: f64,
}

fn default_manual_break_eligibility_minutes() -> i64 {
    60
}
fn default_short_break_due_minutes() -> i64 {
    120
}
fn default_lunch_break_due_minutes() -> i64 {
    300
}
fn default_reminder_cooldown_minutes() -> i64 {
    30
}
fn default_geofence_radius_meters() -> f64 {
    150.0
}
fn default_overtime_after_hours() -> f64 {
    8.0
}
fn default_short_break_min_minutes() -> i64 {
    10
}
fn default_lunch_break_min_minutes() -> i64 {
    30
}
fn default_open_session_sweep_after_hours() -> f64 {
    12.0
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            manual_break_eligibility_minutes: default_manual_break_eligibility_minutes(),
            short_break_due_minutes: default_short_break_due_minutes(),
            lunch_break_due_minutes: default_lunch_break_due_minutes(),
            reminder_cooldown_minutes: default_reminder_cooldown_minutes(),
            geofence_radius_meters: default_geofence_radius_meters(),
            overtime_after_hours: default_overtime_after_hours(),
            short_break_min_minutes: default_short_break_min_minutes(),
            lunch_break_min_minutes: default_lunch_break_min_minutes(),
            flag_waived_breaks: false,
            open_session_sweep_after_hours: default_open_session_sweep_after_hours(),
        }
    }
}

impl EngineConfig {
    /// Loads the config from `ATTENDANCE_*` environment variables, reading a
    /// `.env` file first if one is present.
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        envy::prefixed("ATTENDANCE_")
            .from_env()
            .context("failed to load engine config from environment")
    }

    /// Break-due thresholds in ascending order of worked minutes.
    pub fn break_due_thresholds(&self) -> [(i64, BreakType); 2] {
        [
            (self.short_break_due_minutes, BreakType::Short),
            (self.lunch_break_due_minutes, BreakType::Lunch),
        ]
    }

    pub fn min_compliant_minutes(&self, break_type: BreakType) -> i64 {
        match break_type {
            BreakType::Short => self.short_break_min_minutes,
            BreakType::Lunch => self.lunch_break_min_minutes,
            BreakType::Personal => 0,
        }
    }
}
