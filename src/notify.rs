// src/notify.rs
//
// Notification dispatch is fire-and-forget relative to the state transition
// that triggered it: a sink failure is logged and never escalated.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{info, warn};

use crate::model::{BreakType, EmployeeId, SessionId, Severity, ViolationId, ViolationKind};

#[derive(Debug, Clone, PartialEq)]
pub enum NotificationEvent {
    BreakReminder {
        session_id: SessionId,
        break_type: BreakType,
        minutes_worked: i64,
    },
    ViolationRaised {
        violation_id: ViolationId,
        kind: ViolationKind,
        severity: Severity,
    },
}

pub trait NotificationSink: Send + Sync {
    fn notify(&self, employee_id: &EmployeeId, event: NotificationEvent);
}

/// Dispatches through the sink, swallowing panics. The clock transition that
/// triggered the notification must commit regardless of delivery.
pub(crate) fn dispatch(
    sink: &Arc<dyn NotificationSink>,
    employee_id: &EmployeeId,
    event: NotificationEvent,
) {
    let result = catch_unwind(AssertUnwindSafe(|| sink.notify(employee_id, event)));
    if result.is_err() {
        warn!(employee_id, "notification sink panicked; event dropped");
    }
}

/// Default sink: logs the event and does nothing else. Real transports
/// (email queue, web push) live behind this trait in the embedding service.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl NotificationSink for TracingSink {
    fn notify(&self, employee_id: &EmployeeId, event: NotificationEvent) {
        info!(employee_id, ?event, "notification dispatched");
    }
}

/// Records every event for later assertions.
#[derive(Clone, Default)]
pub struct MemorySink {
    sent: Arc<Mutex<Vec<(EmployeeId, NotificationEvent)>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<(EmployeeId, NotificationEvent)> {
        self.sent.lock().clone()
    }

    pub fn count_for(&self, employee_id: &str) -> usize {
        self.sent
            .lock()
            .iter()
            .filter(|(id, _)| id == employee_id)
            .count()
    }

    pub fn clear(&self) {
        self.sent.lock().clear();
    }
}

impl NotificationSink for MemorySink {
    fn notify(&self, employee_id: &EmployeeId, event: NotificationEvent) {
        self.sent.lock().push((employee_id.clone(), event));
    }
}
