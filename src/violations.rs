// src/violations.rs
//
// Violation Detector: evaluates configured rules against closed and
// long-running sessions. Emission is idempotent per (session, type, rule);
// schedule-dependent rules degrade to a skip when the roster collaborator
// cannot answer.

use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::compliance::evaluate_break_requirements;
use crate::engine::AttendanceEngine;
use crate::error::EngineError;
use crate::metrics;
use crate::model::{
    Actor, AttendanceRule, AttendanceSession, AttendanceViolation, BreakSession, Employee,
    RuleKind, SessionId, Severity, ViolationId, ViolationKind,
};
use crate::notify::{self, NotificationEvent};
use crate::schedule::ScheduleError;

impl AttendanceEngine {
    /// Evaluates every active, in-scope rule against one session. Runs on
    /// session close and may be re-run at any time; existing unresolved
    /// violations suppress duplicates.
    pub fn run_session_sweep(
        &self,
        session_id: SessionId,
    ) -> Result<Vec<AttendanceViolation>, EngineError> {
        let session = self.session(session_id)?;
        let employee = self.employee(&session.employee_id)?;
        Ok(self.evaluate_rules(&session, &employee))
    }

    /// Periodic sweep over closed sessions plus open sessions that have been
    /// running longer than the configured horizon (a forgotten clock-out
    /// should surface as overtime before anyone closes it).
    pub fn run_periodic_sweep(&self) -> Vec<AttendanceViolation> {
        let now = self.clock.now();
        let open_horizon =
            Duration::minutes((self.config.open_session_sweep_after_hours * 60.0) as i64);
        let candidates: Vec<AttendanceSession> = self
            .sessions
            .read()
            .values()
            .filter(|s| !s.is_open() || now - s.clock_in_time >= open_horizon)
            .cloned()
            .collect();
        info!(sessions = candidates.len(), "periodic violation sweep");
        let mut created = Vec::new();
        for session in candidates {
            match self.employee(&session.employee_id) {
                Ok(employee) => created.extend(self.evaluate_rules(&session, &employee)),
                Err(e) => debug!(session_id = %session.id, error = %e, "sweep skipped session"),
            }
        }
        created
    }

    /// Marks a violation resolved. Admins and managers of the employee's
    /// role may resolve.
    pub fn resolve_violation(
        &self,
        actor: &Actor,
        violation_id: ViolationId,
        notes: &str,
    ) -> Result<AttendanceViolation, EngineError> {
        let employee_id = {
            let violations = self.violations.read();
            violations
                .get(&violation_id)
                .map(|v| v.employee_id.clone())
                .ok_or(EngineError::UnknownViolation(violation_id))?
        };
        let employee = self.employee(&employee_id)?;
        if !actor.manages(&employee.role) {
            return Err(EngineError::NotAuthorized);
        }
        let now = self.clock.now();
        let mut violations = self.violations.write();
        let violation = violations
            .get_mut(&violation_id)
            .ok_or(EngineError::UnknownViolation(violation_id))?;
        violation.is_resolved = true;
        violation.resolved_by = actor.employee_id.clone();
        violation.resolution_notes = Some(notes.to_string());
        violation.resolved_at = Some(now);
        info!(%violation_id, resolved_by = ?actor.employee_id, "violation resolved");
        Ok(violation.clone())
    }

    fn evaluate_rules(
        &self,
        session: &AttendanceSession,
        employee: &Employee,
    ) -> Vec<AttendanceViolation> {
        let rules: Vec<AttendanceRule> = self
            .rules
            .read()
            .values()
            .filter(|r| r.active && r.applies_to(employee))
            .cloned()
            .collect();
        if rules.is_empty() {
            return Vec::new();
        }
        let breaks = self.breaks_for_session(session.id);
        let now = self.clock.now();
        let mut created = Vec::new();

        for rule in rules {
            let candidate = match rule.kind {
                RuleKind::OvertimeThreshold => self.check_overtime(&rule, session, &breaks, now),
                RuleKind::BreakRequirement => self.check_missing_break(&rule, session, &breaks),
                RuleKind::LateArrival => self.check_late_arrival(&rule, session),
                RuleKind::EarlyDeparture => self.check_early_departure(&rule, session),
            };
            let Some((kind, severity, data)) = candidate else {
                continue;
            };
            // Check-and-insert is one critical section: a sweep racing this
            // one over the same session must not double-emit the pair.
            let mut violations = self.violations.write();
            let duplicate = violations.values().any(|v| {
                v.session_id == session.id
                    && v.violation_type == kind
                    && v.rule_id == Some(rule.id)
                    && !v.is_resolved
            });
            if duplicate {
                drop(violations);
                debug!(
                    session_id = %session.id,
                    rule_id = %rule.id,
                    ?kind,
                    "duplicate violation suppressed"
                );
                continue;
            }
            let violation = AttendanceViolation {
                id: Uuid::new_v4(),
                session_id: session.id,
                employee_id: session.employee_id.clone(),
                rule_id: Some(rule.id),
                violation_type: kind,
                severity,
                violation_data: data,
                created_at: now,
                is_resolved: false,
                resolved_by: None,
                resolution_notes: None,
                resolved_at: None,
            };
            violations.insert(violation.id, violation.clone());
            drop(violations);
            warn!(
                session_id = %session.id,
                employee_id = %session.employee_id,
                rule = %rule.name,
                ?kind,
                ?severity,
                "attendance violation recorded"
            );
            created.push(violation);
        }

        // Alerts go out after the store locks are released; dispatch failure
        // never unwinds the sweep.
        for violation in &created {
            notify::dispatch(
                &self.sink,
                &session.employee_id,
                NotificationEvent::ViolationRaised {
                    violation_id: violation.id,
                    kind: violation.violation_type,
                    severity: violation.severity,
                },
            );
        }
        created
    }

    fn check_overtime(
        &self,
        rule: &AttendanceRule,
        session: &AttendanceSession,
        breaks: &[BreakSession],
        now: DateTime<Utc>,
    ) -> Option<(ViolationKind, Severity, serde_json::Value)> {
        let threshold_minutes = rule
            .param_i64("thresholdMinutes")
            .unwrap_or((self.config.overtime_after_hours * 60.0) as i64);
        let worked = metrics::worked_minutes(session, breaks, now);
        let excess = worked - threshold_minutes;
        if excess <= 0 {
            return None;
        }
        Some((
            ViolationKind::Overtime,
            rule.param_severity("severity").unwrap_or(Severity::Medium),
            json!({
                "workedMinutes": worked,
                "thresholdMinutes": threshold_minutes,
                "excessMinutes": excess,
            }),
        ))
    }

    fn check_missing_break(
        &self,
        rule: &AttendanceRule,
        session: &AttendanceSession,
        breaks: &[BreakSession],
    ) -> Option<(ViolationKind, Severity, serde_json::Value)> {
        // Only a closed session can have conclusively missed its break.
        let closed_at = session.clock_out_time?;
        let at_close = evaluate_break_requirements(&self.config, session, breaks, closed_at);
        if at_close.requires_break {
            let missed = at_close.break_type;
            return Some((
                ViolationKind::MissingBreak,
                rule.param_severity("severity").unwrap_or(Severity::High),
                json!({
                    "missedBreakType": missed,
                    "minutesWorked": at_close.minutes_worked,
                }),
            ));
        }
        if self.config.flag_waived_breaks {
            // Requirement met only through a waiver: policy downgrades the
            // record to LOW instead of suppressing it.
            let taken: Vec<BreakSession> =
                breaks.iter().filter(|b| !b.was_waived).cloned().collect();
            let without_waivers =
                evaluate_break_requirements(&self.config, session, &taken, closed_at);
            if without_waivers.requires_break {
                return Some((
                    ViolationKind::MissingBreak,
                    Severity::Low,
                    json!({
                        "missedBreakType": without_waivers.break_type,
                        "minutesWorked": without_waivers.minutes_worked,
                        "waived": true,
                    }),
                ));
            }
        }
        None
    }

    fn check_late_arrival(
        &self,
        rule: &AttendanceRule,
        session: &AttendanceSession,
    ) -> Option<(ViolationKind, Severity, serde_json::Value)> {
        let shift = match self
            .schedule
            .eligible_shift(&session.employee_id, session.clock_in_time)
        {
            Ok(Some(shift)) => shift,
            // No matching shift: rule skipped, not failed.
            Ok(None) => return None,
            Err(ScheduleError::Unavailable(reason)) => {
                debug!(
                    session_id = %session.id,
                    rule_id = %rule.id,
                    %reason,
                    "rule evaluation skipped: shift schedule unavailable"
                );
                return None;
            }
        };
        let grace = rule.param_i64("graceMinutes").unwrap_or(10);
        let late_minutes = (session.clock_in_time - shift.start).num_minutes();
        if late_minutes <= grace {
            return None;
        }
        Some((
            ViolationKind::LateArrival,
            rule.param_severity("severity").unwrap_or(Severity::Low),
            json!({
                "lateMinutes": late_minutes,
                "shiftStart": shift.start,
            }),
        ))
    }

    fn check_early_departure(
        &self,
        rule: &AttendanceRule,
        session: &AttendanceSession,
    ) -> Option<(ViolationKind, Severity, serde_json::Value)> {
        let closed_at = session.clock_out_time?;
        let shift = match self.schedule.eligible_shift(&session.employee_id, closed_at) {
            Ok(Some(shift)) => shift,
            Ok(None) => return None,
            Err(ScheduleError::Unavailable(reason)) => {
                debug!(
                    session_id = %session.id,
                    rule_id = %rule.id,
                    %reason,
                    "rule evaluation skipped: shift schedule unavailable"
                );
                return None;
            }
        };
        let grace = rule.param_i64("graceMinutes").unwrap_or(10);
        let early_minutes = (shift.end - closed_at).num_minutes();
        if early_minutes <= grace {
            return None;
        }
        Some((
            ViolationKind::EarlyDeparture,
            rule.param_severity("severity").unwrap_or(Severity::Low),
            json!({
                "earlyMinutes": early_minutes,
                "shiftEnd": shift.end,
            }),
        ))
    }
}
