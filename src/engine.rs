// src/engine.rs
//
// Session State Machine and the operation surface exposed to the transport
// layer. Per-employee transitions are linearized through a per-employee
// mutex; operations across different employees run fully in parallel.
//
// Lock discipline: the employee mutex is taken first, then store locks in
// the order sessions -> breaks. Sweeps and read paths take snapshots and
// never hold a store lock across notification dispatch.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::clock::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::error::{EngineError, StateConflict};
use crate::model::{
    AttendanceRule, AttendanceSession, AttendanceViolation, BreakId, BreakSession, BreakType,
    ClockAction, ClockMethod, ClockOutReason, ClockProof, Employee, EmployeeId, EntryOrigin,
    GeoPoint, Location, LocationId, RuleId, SessionId, SessionStatus, ViolationId,
};
use crate::notify::{NotificationSink, TracingSink};
use crate::qr;
use crate::schedule::{NoSchedule, ShiftSchedule};
use crate::validator::ClockEventValidator;

/// Answer to `current_status`: what the employee is doing right now.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentStatus {
    pub status: SessionStatus,
    pub is_clocked_in: bool,
    pub open_session: Option<AttendanceSession>,
}

/// A QR scan lands on a session or on a break depending on the action.
#[derive(Debug, Clone, PartialEq)]
pub enum QrScanResult {
    Session(AttendanceSession),
    Break(BreakSession),
}

pub struct AttendanceEngine {
    pub(crate) config: EngineConfig,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) sink: Arc<dyn NotificationSink>,
    pub(crate) schedule: Arc<dyn ShiftSchedule>,
    pub(crate) validator: ClockEventValidator,
    pub(crate) employees: RwLock<HashMap<EmployeeId, Employee>>,
    pub(crate) locations: RwLock<HashMap<LocationId, Location>>,
    pub(crate) sessions: RwLock<HashMap<SessionId, AttendanceSession>>,
    pub(crate) breaks: RwLock<HashMap<BreakId, BreakSession>>,
    pub(crate) rules: RwLock<HashMap<RuleId, AttendanceRule>>,
    pub(crate) violations: RwLock<HashMap<ViolationId, AttendanceViolation>>,
    /// At most one entry per employee; the at-most-one-open-session
    /// invariant lives here, guarded by `employee_locks`.
    pub(crate) open_sessions: DashMap<EmployeeId, SessionId>,
    pub(crate) employee_locks: DashMap<EmployeeId, Arc<Mutex<()>>>,
}

impl AttendanceEngine {
    pub fn new(
        config: EngineConfig,
        clock: Arc<dyn Clock>,
        sink: Arc<dyn NotificationSink>,
        schedule: Arc<dyn ShiftSchedule>,
    ) -> Self {
        let validator = ClockEventValidator::new(&config);
        Self {
            config,
            clock,
            sink,
            schedule,
            validator,
            employees: RwLock::new(HashMap::new()),
            locations: RwLock::new(HashMap::new()),
            sessions: RwLock::new(HashMap::new()),
            breaks: RwLock::new(HashMap::new()),
            rules: RwLock::new(HashMap::new()),
            violations: RwLock::new(HashMap::new()),
            open_sessions: DashMap::new(),
            employee_locks: DashMap::new(),
        }
    }

    /// System clock, log-only notifications, no shift roster.
    pub fn with_defaults(config: EngineConfig) -> Self {
        Self::new(
            config,
            Arc::new(SystemClock),
            Arc::new(TracingSink),
            Arc::new(NoSchedule),
        )
    }

    // --- Registry ---

    pub fn configure_employee(&self, employee: Employee) {
        info!(employee_id = %employee.id, role = %employee.role, "configuring employee");
        self.employees
            .write()
            .insert(employee.id.clone(), employee);
    }

    pub fn configure_location(&self, location: Location) {
        info!(location_id = %location.id, gps = location.requires_gps_verification, "configuring location");
        self.locations
            .write()
            .insert(location.id.clone(), location);
    }

    pub fn configure_rule(&self, rule: AttendanceRule) {
        info!(rule_id = %rule.id, kind = ?rule.kind, name = %rule.name, "configuring rule");
        self.rules.write().insert(rule.id, rule);
    }

    /// Deletes a rule. Violations it produced survive with their rule
    /// reference nulled.
    pub fn delete_rule(&self, rule_id: RuleId) {
        if self.rules.write().remove(&rule_id).is_some() {
            info!(%rule_id, "rule deleted");
            for violation in self.violations.write().values_mut() {
                if violation.rule_id == Some(rule_id) {
                    violation.rule_id = None;
                }
            }
        }
    }

    /// The payload to print on a location's QR poster.
    pub fn issue_qr_payload(&self, location_id: &str) -> Result<String, EngineError> {
        let locations = self.locations.read();
        let location = locations
            .get(location_id)
            .ok_or_else(|| EngineError::UnknownLocation(location_id.to_string()))?;
        Ok(qr::issue_payload(location))
    }

    // --- Clock operations (generic entry point) ---

    pub fn clock_in(
        &self,
        employee_id: &str,
        method: ClockMethod,
        proof: ClockProof,
    ) -> Result<AttendanceSession, EngineError> {
        self.clock_in_via(employee_id, method, proof, EntryOrigin::Generic)
    }

    pub fn clock_out(
        &self,
        employee_id: &str,
        method: ClockMethod,
        reason: Option<ClockOutReason>,
        proof: ClockProof,
    ) -> Result<AttendanceSession, EngineError> {
        self.clock_out_via(employee_id, method, reason, proof, EntryOrigin::Generic)
    }

    pub(crate) fn clock_in_via(
        &self,
        employee_id: &str,
        method: ClockMethod,
        proof: ClockProof,
        origin: EntryOrigin,
    ) -> Result<AttendanceSession, EngineError> {
        let employee = self.employee(employee_id)?;
        let location = self.resolve_location(proof.location_id.as_deref())?;
        let event = self.validator.validate(
            &employee,
            ClockAction::ClockIn,
            method,
            &proof,
            origin,
            location.as_ref(),
        )?;

        let lock = self.employee_lock(employee_id);
        let _guard = lock.lock();
        if self.open_sessions.contains_key(employee_id) {
            return Err(StateConflict::AlreadyClockedIn.into());
        }
        let now = self.clock.now();
        let session = AttendanceSession {
            id: Uuid::new_v4(),
            employee_id: employee_id.to_string(),
            location_id: event.location_id.clone(),
            clock_in_time: now,
            clock_out_time: None,
            clock_in_method: event.method,
            clock_out_method: None,
            clock_in_geo: event.geo,
            clock_out_geo: None,
            status: SessionStatus::ClockedIn,
            clock_out_reason: None,
            break_reminder_sent_at: None,
            break_reminder_count: 0,
            break_reminder_acknowledged_at: None,
            open_break_id: None,
            is_approved: false,
            approved_by: None,
        };
        self.sessions.write().insert(session.id, session.clone());
        self.open_sessions
            .insert(employee_id.to_string(), session.id);
        info!(employee_id, session_id = %session.id, ?method, "clocked in");
        Ok(session)
    }

    pub(crate) fn clock_out_via(
        &self,
        employee_id: &str,
        method: ClockMethod,
        reason: Option<ClockOutReason>,
        proof: ClockProof,
        origin: EntryOrigin,
    ) -> Result<AttendanceSession, EngineError> {
        let employee = self.employee(employee_id)?;
        let location = self.resolve_location(proof.location_id.as_deref())?;
        let event = self.validator.validate(
            &employee,
            ClockAction::ClockOut,
            method,
            &proof,
            origin,
            location.as_ref(),
        )?;

        let lock = self.employee_lock(employee_id);
        let closed = {
            let _guard = lock.lock();
            let session_id = self
                .open_sessions
                .get(employee_id)
                .map(|entry| *entry)
                .ok_or(StateConflict::NotClockedIn)?;
            let now = self.clock.now();
            let mut sessions = self.sessions.write();
            let session = sessions
                .get_mut(&session_id)
                .ok_or(EngineError::UnknownSession(session_id))?;

            // Any open break is force-ended first; it was not waived, so the
            // compliance sweep still sees it as taken.
            if let Some(break_id) = session.open_break_id.take() {
                let mut breaks = self.breaks.write();
                if let Some(open_break) = breaks.get_mut(&break_id) {
                    open_break.end_time = Some(now);
                    open_break.is_compliant = self.closed_break_compliant(open_break);
                    warn!(
                        employee_id,
                        break_id = %break_id,
                        "open break force-ended at clock-out"
                    );
                }
            }
            session.clock_out_time = Some(now);
            session.clock_out_method = Some(event.method);
            session.clock_out_geo = event.geo;
            session.clock_out_reason = reason;
            session.status = SessionStatus::ClockedOut;
            if event.location_id.is_some() {
                session.location_id = event.location_id.clone();
            }
            let closed = session.clone();
            drop(sessions);
            self.open_sessions.remove(employee_id);
            closed
        };
        info!(employee_id, session_id = %closed.id, "clocked out");

        // Close-time violation sweep is best-effort relative to the
        // transition; it cannot undo the clock-out.
        if let Err(e) = self.run_session_sweep(closed.id) {
            warn!(employee_id, session_id = %closed.id, error = %e, "close-time sweep failed");
        }
        Ok(closed)
    }

    // --- Breaks ---

    pub fn start_break(
        &self,
        employee_id: &str,
        break_type: BreakType,
    ) -> Result<BreakSession, EngineError> {
        self.employee(employee_id)?;
        let lock = self.employee_lock(employee_id);
        let _guard = lock.lock();
        let session_id = self
            .open_sessions
            .get(employee_id)
            .map(|entry| *entry)
            .ok_or(StateConflict::NotClockedIn)?;
        let now = self.clock.now();
        let mut sessions = self.sessions.write();
        let session = sessions
            .get_mut(&session_id)
            .ok_or(EngineError::UnknownSession(session_id))?;
        if session.open_break_id.is_some() {
            return Err(StateConflict::AlreadyOnBreak.into());
        }
        let ack_at = session.break_reminder_acknowledged_at;
        let break_session = BreakSession {
            id: Uuid::new_v4(),
            session_id,
            employee_id: employee_id.to_string(),
            break_type,
            start_time: now,
            end_time: None,
            was_waived: false,
            waiver_reason: None,
            is_compliant: true,
            reminder_acknowledged: ack_at.is_some(),
            reminder_acknowledged_at: ack_at,
            notes: None,
        };
        session.status = SessionStatus::OnBreak;
        session.open_break_id = Some(break_session.id);
        drop(sessions);
        self.breaks
            .write()
            .insert(break_session.id, break_session.clone());
        info!(employee_id, break_id = %break_session.id, ?break_type, "break started");
        Ok(break_session)
    }

    pub fn end_break(
        &self,
        break_id: BreakId,
        notes: Option<String>,
    ) -> Result<BreakSession, EngineError> {
        let employee_id = {
            let breaks = self.breaks.read();
            breaks
                .get(&break_id)
                .map(|b| b.employee_id.clone())
                .ok_or(EngineError::UnknownBreak(break_id))?
        };
        let lock = self.employee_lock(&employee_id);
        let _guard = lock.lock();
        let now = self.clock.now();
        let mut sessions = self.sessions.write();
        let mut breaks = self.breaks.write();
        let break_session = breaks
            .get_mut(&break_id)
            .ok_or(EngineError::UnknownBreak(break_id))?;
        if !break_session.is_open() {
            return Err(StateConflict::NoActiveBreak.into());
        }
        break_session.end_time = Some(now);
        break_session.notes = notes;
        break_session.is_compliant = self.closed_break_compliant(break_session);
        let closed = break_session.clone();
        if let Some(session) = sessions.get_mut(&closed.session_id) {
            session.open_break_id = None;
            session.status = SessionStatus::BackFromBreak;
        }
        info!(
            employee_id,
            break_id = %break_id,
            compliant = closed.is_compliant,
            "break ended"
        );
        Ok(closed)
    }

    pub(crate) fn closed_break_compliant(&self, break_session: &BreakSession) -> bool {
        let Some(end) = break_session.end_time else {
            return true;
        };
        let minutes = (end - break_session.start_time).num_seconds().div_euclid(60);
        minutes >= self.config.min_compliant_minutes(break_session.break_type)
    }

    // --- QR scan entry point ---

    /// The only entry point that accepts the QR_CODE method: the payload is
    /// resolved and signature-checked before any transition runs.
    pub fn qr_scan(
        &self,
        employee_id: &str,
        payload: &str,
        action: ClockAction,
        geo: Option<GeoPoint>,
    ) -> Result<QrScanResult, EngineError> {
        let location = qr::resolve_payload(payload, |id| self.locations.read().get(id).cloned())?;
        let proof = ClockProof {
            location_id: Some(location.id.clone()),
            geo,
        };
        match action {
            ClockAction::ClockIn => self
                .clock_in_via(employee_id, ClockMethod::QrCode, proof, EntryOrigin::QrScan)
                .map(QrScanResult::Session),
            ClockAction::ClockOut => self
                .clock_out_via(
                    employee_id,
                    ClockMethod::QrCode,
                    None,
                    proof,
                    EntryOrigin::QrScan,
                )
                .map(QrScanResult::Session),
            ClockAction::StartBreak => {
                // A scan-initiated break takes the currently due type, or a
                // short break when nothing is due yet.
                let due = self.break_requirements(employee_id)?;
                let break_type = due.break_type.unwrap_or(BreakType::Short);
                self.start_break(employee_id, break_type)
                    .map(QrScanResult::Break)
            }
            ClockAction::EndBreak => {
                let session = self
                    .open_session_snapshot(employee_id)
                    .ok_or(StateConflict::NotClockedIn)?;
                let open_break = session.open_break_id.ok_or(StateConflict::NoActiveBreak)?;
                self.end_break(open_break, None).map(QrScanResult::Break)
            }
        }
    }

    // --- Read side ---

    pub fn current_status(&self, employee_id: &str) -> Result<CurrentStatus, EngineError> {
        self.employee(employee_id)?;
        let open_session = self.open_session_snapshot(employee_id);
        Ok(CurrentStatus {
            status: open_session
                .as_ref()
                .map_or(SessionStatus::ClockedOut, |s| s.status),
            is_clocked_in: open_session.is_some(),
            open_session,
        })
    }

    pub fn session(&self, session_id: SessionId) -> Result<AttendanceSession, EngineError> {
        self.sessions
            .read()
            .get(&session_id)
            .cloned()
            .ok_or(EngineError::UnknownSession(session_id))
    }

    pub fn breaks_for_session(&self, session_id: SessionId) -> Vec<BreakSession> {
        let mut out: Vec<_> = self
            .breaks
            .read()
            .values()
            .filter(|b| b.session_id == session_id)
            .cloned()
            .collect();
        out.sort_by_key(|b| b.start_time);
        out
    }

    pub fn violations_for_session(&self, session_id: SessionId) -> Vec<AttendanceViolation> {
        let mut out: Vec<_> = self
            .violations
            .read()
            .values()
            .filter(|v| v.session_id == session_id)
            .cloned()
            .collect();
        out.sort_by_key(|v| v.created_at);
        out
    }

    // --- Internals ---

    pub(crate) fn employee(&self, employee_id: &str) -> Result<Employee, EngineError> {
        self.employees
            .read()
            .get(employee_id)
            .cloned()
            .ok_or_else(|| EngineError::UnknownEmployee(employee_id.to_string()))
    }

    pub(crate) fn resolve_location(
        &self,
        location_id: Option<&str>,
    ) -> Result<Option<Location>, EngineError> {
        match location_id {
            None => Ok(None),
            Some(id) => self
                .locations
                .read()
                .get(id)
                .cloned()
                .map(Some)
                .ok_or_else(|| EngineError::UnknownLocation(id.to_string())),
        }
    }

    pub(crate) fn employee_lock(&self, employee_id: &str) -> Arc<Mutex<()>> {
        self.employee_locks
            .entry(employee_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    pub(crate) fn open_session_snapshot(&self, employee_id: &str) -> Option<AttendanceSession> {
        let session_id = self.open_sessions.get(employee_id).map(|entry| *entry)?;
        self.sessions.read().get(&session_id).cloned()
    }
}

// --- Administrative overrides ---

impl AttendanceEngine {
    /// ADMIN-privileged approval of a session.
    pub fn approve_session(
        &self,
        actor: &crate::model::Actor,
        session_id: SessionId,
    ) -> Result<AttendanceSession, EngineError> {
        if !actor.is_admin {
            return Err(EngineError::NotAuthorized);
        }
        let mut sessions = self.sessions.write();
        let session = sessions
            .get_mut(&session_id)
            .ok_or(EngineError::UnknownSession(session_id))?;
        session.is_approved = true;
        session.approved_by = actor.employee_id.clone();
        info!(session_id = %session_id, approved_by = ?actor.employee_id, "session approved");
        Ok(session.clone())
    }
}
