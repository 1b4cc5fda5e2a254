// src/compliance.rs
//
// Break Compliance Engine: decides when a break is due, records waivers, and
// rations reminder dispatch. All thresholds come from `EngineConfig`.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::engine::AttendanceEngine;
use crate::error::{EngineError, StateConflict};
use crate::metrics;
use crate::model::{Actor, AttendanceSession, BreakSession, BreakType, SessionId};
use crate::notify::{self, NotificationEvent};

/// What the compliance engine currently expects of an in-progress session.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakRequirement {
    pub requires_break: bool,
    pub break_type: Option<BreakType>,
    pub can_take_manual_break: bool,
    pub minutes_worked: i64,
}

impl BreakRequirement {
    pub fn none() -> Self {
        Self {
            requires_break: false,
            break_type: None,
            can_take_manual_break: false,
            minutes_worked: 0,
        }
    }
}

/// Pure evaluation of the break policy against one session and its breaks.
///
/// A due threshold is satisfied by a break of its type or larger that was
/// taken (open breaks count while running) or waived; personal breaks sit
/// outside the ladder. Among crossed unmet thresholds the largest one wins.
pub fn evaluate_break_requirements(
    config: &EngineConfig,
    session: &AttendanceSession,
    breaks: &[BreakSession],
    now: DateTime<Utc>,
) -> BreakRequirement {
    let minutes_worked = metrics::worked_minutes(session, breaks, now);
    let has_open_break = session.open_break_id.is_some();
    let can_take_manual_break = session.is_open()
        && !has_open_break
        && minutes_worked >= config.manual_break_eligibility_minutes;

    let satisfies = |required: BreakType| {
        breaks
            .iter()
            .any(|b| b.break_type != BreakType::Personal && b.break_type >= required)
    };
    let mut due = None;
    for (threshold_minutes, break_type) in config.break_due_thresholds() {
        if minutes_worked >= threshold_minutes && !satisfies(break_type) {
            due = Some(break_type);
        }
    }

    BreakRequirement {
        requires_break: due.is_some(),
        break_type: due,
        can_take_manual_break,
        minutes_worked,
    }
}

impl AttendanceEngine {
    pub fn break_requirements(&self, employee_id: &str) -> Result<BreakRequirement, EngineError> {
        self.employee(employee_id)?;
        let Some(session) = self.open_session_snapshot(employee_id) else {
            return Ok(BreakRequirement::none());
        };
        let breaks = self.breaks_for_session(session.id);
        Ok(evaluate_break_requirements(
            &self.config,
            &session,
            &breaks,
            self.clock.now(),
        ))
    }

    /// Excuses a due break for the rest of the session. The waiver is stored
    /// as a closed zero-length break so "taken or waived" checks read one
    /// place. A reason is mandatory; only the employee themselves or an
    /// admin may waive.
    pub fn waive_break(
        &self,
        actor: &Actor,
        employee_id: &str,
        break_type: BreakType,
        reason: &str,
    ) -> Result<BreakSession, EngineError> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(EngineError::WaiverReasonRequired);
        }
        if !(actor.is_admin || actor.owns(employee_id)) {
            return Err(EngineError::NotAuthorized);
        }
        self.employee(employee_id)?;

        let lock = self.employee_lock(employee_id);
        let _guard = lock.lock();
        let session_id = self
            .open_sessions
            .get(employee_id)
            .map(|entry| *entry)
            .ok_or(StateConflict::NotClockedIn)?;
        let now = self.clock.now();
        let waiver = BreakSession {
            id: Uuid::new_v4(),
            session_id,
            employee_id: employee_id.to_string(),
            break_type,
            start_time: now,
            end_time: Some(now),
            was_waived: true,
            waiver_reason: Some(reason.to_string()),
            is_compliant: true,
            reminder_acknowledged: false,
            reminder_acknowledged_at: None,
            notes: None,
        };
        self.breaks.write().insert(waiver.id, waiver.clone());
        info!(employee_id, ?break_type, reason, "break waived");
        Ok(waiver)
    }

    /// Records the employee's response to an outstanding break reminder;
    /// reminders stop for the rest of the session and the acknowledgment is
    /// stamped onto the next break they start.
    pub fn acknowledge_break_reminder(
        &self,
        employee_id: &str,
    ) -> Result<AttendanceSession, EngineError> {
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
        if session.break_reminder_acknowledged_at.is_none() {
            session.break_reminder_acknowledged_at = Some(now);
            info!(employee_id, session_id = %session_id, "break reminder acknowledged");
        }
        Ok(session.clone())
    }

    /// Sends a break reminder for the session if one is due, unacknowledged,
    /// and outside the cooldown window. Returns whether a reminder went out.
    /// Dispatch happens after all locks are released; a sink failure never
    /// affects the session.
    pub fn maybe_send_reminder(&self, session_id: SessionId) -> Result<bool, EngineError> {
        let session = self.session(session_id)?;
        if !session.is_open() {
            return Ok(false);
        }
        let employee_id = session.employee_id.clone();
        let breaks = self.breaks_for_session(session_id);
        let now = self.clock.now();
        let requirement = evaluate_break_requirements(&self.config, &session, &breaks, now);
        if !requirement.requires_break {
            return Ok(false);
        }
        if session.break_reminder_acknowledged_at.is_some() {
            debug!(employee_id, %session_id, "reminder suppressed: acknowledged");
            return Ok(false);
        }
        let cooldown = Duration::minutes(self.config.reminder_cooldown_minutes);

        let lock = self.employee_lock(&employee_id);
        let sent_count = {
            let _guard = lock.lock();
            let mut sessions = self.sessions.write();
            let session = sessions
                .get_mut(&session_id)
                .ok_or(EngineError::UnknownSession(session_id))?;
            // Re-check under the lock; a concurrent reminder pass may have
            // stamped the session since the snapshot.
            if session
                .break_reminder_sent_at
                .is_some_and(|at| now - at < cooldown)
            {
                None
            } else {
                session.break_reminder_sent_at = Some(now);
                session.break_reminder_count += 1;
                Some(session.break_reminder_count)
            }
        };
        let Some(count) = sent_count else {
            return Ok(false);
        };
        info!(
            employee_id,
            %session_id,
            break_type = ?requirement.break_type,
            count,
            "break reminder sent"
        );
        notify::dispatch(
            &self.sink,
            &employee_id,
            NotificationEvent::BreakReminder {
                session_id,
                break_type: requirement.break_type.unwrap_or(BreakType::Short),
                minutes_worked: requirement.minutes_worked,
            },
        );
        Ok(true)
    }

    /// Periodic-trigger convenience: runs `maybe_send_reminder` over every
    /// open session. Returns how many reminders went out.
    pub fn run_reminder_pass(&self) -> usize {
        let open: Vec<SessionId> = self.open_sessions.iter().map(|entry| *entry.value()).collect();
        let mut sent = 0;
        for session_id in open {
            match self.maybe_send_reminder(session_id) {
                Ok(true) => sent += 1,
                Ok(false) => {}
                Err(e) => debug!(%session_id, error = %e, "reminder pass skipped session"),
            }
        }
        sent
    }
}
