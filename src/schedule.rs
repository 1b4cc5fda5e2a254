// src/schedule.rs
//
// The shift roster is an external collaborator. When it cannot answer
// (timeout, outage), schedule-dependent rules are skipped, never failed.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::EmployeeId;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Shift {
    pub employee_id: EmployeeId,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ScheduleError {
    #[error("shift schedule unavailable: {0}")]
    Unavailable(String),
}

pub trait ShiftSchedule: Send + Sync {
    /// The scheduled shift, if any, that `at` falls within or nearest to.
    fn eligible_shift(
        &self,
        employee_id: &EmployeeId,
        at: DateTime<Utc>,
    ) -> Result<Option<Shift>, ScheduleError>;
}

/// No roster configured: every lookup answers "no shift", which causes
/// LATE_ARRIVAL / EARLY_DEPARTURE rules to be skipped.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSchedule;

impl ShiftSchedule for NoSchedule {
    fn eligible_shift(
        &self,
        _employee_id: &EmployeeId,
        _at: DateTime<Utc>,
    ) -> Result<Option<Shift>, ScheduleError> {
        Ok(None)
    }
}

/// In-memory roster. The `unavailable` switch simulates a collaborator
/// outage for degradation tests.
#[derive(Clone, Default)]
pub struct StaticSchedule {
    shifts: Arc<RwLock<HashMap<EmployeeId, Vec<Shift>>>>,
    unavailable: Arc<AtomicBool>,
}

impl StaticSchedule {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_shift(&self, shift: Shift) {
        self.shifts
            .write()
            .entry(shift.employee_id.clone())
            .or_default()
            .push(shift);
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }
}

impl ShiftSchedule for StaticSchedule {
    fn eligible_shift(
        &self,
        employee_id: &EmployeeId,
        at: DateTime<Utc>,
    ) -> Result<Option<Shift>, ScheduleError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(ScheduleError::Unavailable("simulated outage".into()));
        }
        let shifts = self.shifts.read();
        let Some(candidates) = shifts.get(employee_id) else {
            return Ok(None);
        };
        // A clock action counts against a shift within a 12-hour window
        // around it; among matches, the nearest start wins.
        let slack = Duration::hours(12);
        let best = candidates
            .iter()
            .filter(|s| at >= s.start - slack && at <= s.end + slack)
            .min_by_key(|s| (s.start - at).num_seconds().abs())
            .cloned();
        Ok(best)
    }
}
