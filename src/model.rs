// src/model.rs
//
// Core data model for the attendance engine: sessions, nested breaks,
// configurable labor rules and the violations they produce.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type EmployeeId = String;
pub type LocationId = String;
pub type Role = String;
pub type SessionId = Uuid;
pub type BreakId = Uuid;
pub type RuleId = Uuid;
pub type ViolationId = Uuid;

/// How a clock action was verified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClockMethod {
    Portal,
    QrCode,
    Api,
    Admin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    ClockedIn,
    OnBreak,
    BackFromBreak,
    ClockedOut,
}

/// Break classification. Ordering matters: a larger break satisfies the
/// thresholds of the smaller ones, so `Lunch > Short`. `Personal` sits
/// outside the threshold ladder and never satisfies a requirement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BreakType {
    Personal,
    Short,
    Lunch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClockOutReason {
    EndShift,
    LunchBreak,
    ShortBreak,
    PersonalBreak,
    Emergency,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RuleKind {
    OvertimeThreshold,
    BreakRequirement,
    LateArrival,
    EarlyDeparture,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ViolationKind {
    Overtime,
    MissingBreak,
    LateArrival,
    EarlyDeparture,
}

/// A latitude/longitude pair, quantized to 6 decimal places on construction
/// (roughly 0.1 m, the precision the source data carries).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self {
            lat: quantize6(lat),
            lon: quantize6(lon),
        }
    }
}

fn quantize6(v: f64) -> f64 {
    (v * 1_000_000.0).round() / 1_000_000.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Employee {
    pub id: EmployeeId,
    pub name: String,
    pub role: Role,
    /// UTC offset of the employee's configured timezone, in minutes.
    /// Work-date bucketing uses this offset, never UTC.
    pub tz_offset_minutes: i32,
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    pub id: LocationId,
    pub name: String,
    pub geo: Option<GeoPoint>,
    pub requires_gps_verification: bool,
    /// Per-location geofence radius in meters; falls back to the engine
    /// config default when absent.
    pub geofence_radius_m: Option<f64>,
    /// Secret used to sign this location's QR payloads.
    pub qr_secret: String,
}

/// One continuous clock-in-to-clock-out work period. Never physically
/// destroyed, only closed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceSession {
    pub id: SessionId,
    pub employee_id: EmployeeId,
    pub location_id: Option<LocationId>,
    pub clock_in_time: DateTime<Utc>,
    pub clock_out_time: Option<DateTime<Utc>>,
    pub clock_in_method: ClockMethod,
    pub clock_out_method: Option<ClockMethod>,
    pub clock_in_geo: Option<GeoPoint>,
    pub clock_out_geo: Option<GeoPoint>,
    pub status: SessionStatus,
    pub clock_out_reason: Option<ClockOutReason>,
    pub break_reminder_sent_at: Option<DateTime<Utc>>,
    pub break_reminder_count: u32,
    /// Set when the employee acknowledges an outstanding break reminder;
    /// stamped onto the next break they start.
    pub break_reminder_acknowledged_at: Option<DateTime<Utc>>,
    pub open_break_id: Option<BreakId>,
    pub is_approved: bool,
    pub approved_by: Option<EmployeeId>,
}

impl AttendanceSession {
    pub fn is_open(&self) -> bool {
        self.clock_out_time.is_none()
    }

    /// `BackFromBreak` is transient and folds into `ClockedIn` for
    /// eligibility purposes.
    pub fn is_working(&self) -> bool {
        matches!(
            self.status,
            SessionStatus::ClockedIn | SessionStatus::BackFromBreak
        )
    }
}

/// A nested pause within a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakSession {
    pub id: BreakId,
    pub session_id: SessionId,
    /// Denormalized from the owning session for query convenience; always
    /// equals `session.employee_id`.
    pub employee_id: EmployeeId,
    pub break_type: BreakType,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub was_waived: bool,
    pub waiver_reason: Option<String>,
    pub is_compliant: bool,
    pub reminder_acknowledged: bool,
    pub reminder_acknowledged_at: Option<DateTime<Utc>>,
    pub notes: Option<String>,
}

impl BreakSession {
    pub fn is_open(&self) -> bool {
        self.end_time.is_none()
    }
}

/// Named, typed labor-rule configuration. Identity is immutable; parameters
/// may be edited at any time and take effect on the next evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceRule {
    pub id: RuleId,
    pub name: String,
    pub kind: RuleKind,
    /// Free-form parameter map, e.g. `{"thresholdMinutes": 480}`.
    pub params: serde_json::Value,
    pub roles: HashSet<Role>,
    pub employees: HashSet<EmployeeId>,
    pub active: bool,
}

impl AttendanceRule {
    pub fn new(name: &str, kind: RuleKind, params: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            kind,
            params,
            roles: HashSet::new(),
            employees: HashSet::new(),
            active: true,
        }
    }

    pub fn for_roles<I: IntoIterator<Item = Role>>(mut self, roles: I) -> Self {
        self.roles = roles.into_iter().collect();
        self
    }

    pub fn for_employees<I: IntoIterator<Item = EmployeeId>>(mut self, employees: I) -> Self {
        self.employees = employees.into_iter().collect();
        self
    }

    /// Empty role and employee scope means the rule applies to everyone;
    /// otherwise the union of the two sets.
    pub fn applies_to(&self, employee: &Employee) -> bool {
        if self.roles.is_empty() && self.employees.is_empty() {
            return true;
        }
        self.roles.contains(&employee.role) || self.employees.contains(&employee.id)
    }

    /// Typed accessor into the free-form parameter map.
    pub fn param_i64(&self, key: &str) -> Option<i64> {
        self.params.get(key).and_then(|v| v.as_i64())
    }

    pub fn param_severity(&self, key: &str) -> Option<Severity> {
        self.params
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }
}

/// One record per detected rule breach. Never deleted; resolved by an
/// authorized human action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceViolation {
    pub id: ViolationId,
    pub session_id: SessionId,
    pub employee_id: EmployeeId,
    /// May become `None` if the triggering rule is later deleted.
    pub rule_id: Option<RuleId>,
    pub violation_type: ViolationKind,
    pub severity: Severity,
    pub violation_data: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub is_resolved: bool,
    pub resolved_by: Option<EmployeeId>,
    pub resolution_notes: Option<String>,
    pub resolved_at: Option<DateTime<Utc>>,
}

/// The four clock actions a caller can request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClockAction {
    ClockIn,
    ClockOut,
    StartBreak,
    EndBreak,
}

/// Which entry point a clock request arrived through. QR-verified actions
/// are only accepted through the dedicated scan entry point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryOrigin {
    Generic,
    QrScan,
}

/// Location/geo evidence accompanying a clock request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClockProof {
    pub location_id: Option<LocationId>,
    pub geo: Option<GeoPoint>,
}

/// Normalized output of the clock event validator, consumed by the state
/// machine.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedEvent {
    pub action: ClockAction,
    pub method: ClockMethod,
    pub location_id: Option<LocationId>,
    pub geo: Option<GeoPoint>,
}

/// Resolved principal for privileged operations. Computed once at request
/// entry by the auth collaborator; authorization checks here are direct
/// field comparisons.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Actor {
    pub employee_id: Option<EmployeeId>,
    pub is_admin: bool,
    pub managed_roles: HashSet<Role>,
}

impl Actor {
    pub fn admin(id: &str) -> Self {
        Self {
            employee_id: Some(id.to_string()),
            is_admin: true,
            managed_roles: HashSet::new(),
        }
    }

    pub fn employee(id: &str) -> Self {
        Self {
            employee_id: Some(id.to_string()),
            is_admin: false,
            managed_roles: HashSet::new(),
        }
    }

    pub fn owns(&self, employee_id: &str) -> bool {
        self.employee_id.as_deref() == Some(employee_id)
    }

    pub fn manages(&self, role: &str) -> bool {
        self.is_admin || self.managed_roles.contains(role)
    }
}
