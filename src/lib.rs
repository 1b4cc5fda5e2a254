//! Attendance session and break-compliance engine.
//!
//! The core of an employee attendance tracker: the clock-in/out state
//! machine for one work session and its nested breaks, the rules deciding
//! when breaks are required, waived or violated, and the pure metrics every
//! read consumer (reports, dashboards, notifications) derives from a
//! session.
//!
//! Transport, auth and persistence are the embedding service's concern; the
//! engine consumes a resolved identity per call and talks to its
//! collaborators through injected capabilities ([`clock::Clock`],
//! [`notify::NotificationSink`], [`schedule::ShiftSchedule`]).

pub mod clock;
pub mod compliance;
pub mod config;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod model;
pub mod notify;
pub mod qr;
pub mod schedule;
pub mod validator;
mod violations;

mod engine_tests;

pub use compliance::{evaluate_break_requirements, BreakRequirement};
pub use config::EngineConfig;
pub use engine::{AttendanceEngine, CurrentStatus, QrScanResult};
pub use error::{EngineError, StateConflict, VerificationError};
pub use model::{
    Actor, AttendanceRule, AttendanceSession, AttendanceViolation, BreakSession, BreakType,
    ClockAction, ClockMethod, ClockOutReason, ClockProof, Employee, GeoPoint, Location, RuleKind,
    SessionStatus, Severity, ViolationKind,
};
