// src/error.rs

use thiserror::Error;
use uuid::Uuid;

use crate::model::{ClockMethod, EmployeeId, LocationId};

/// Wrong-state transition attempts. Surfaced to the caller with the specific
/// violated precondition so client UIs can render accurate state; never
/// retried, never silently coerced.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateConflict {
    #[error("employee already has an open attendance session")]
    AlreadyClockedIn,
    #[error("employee has no open attendance session")]
    NotClockedIn,
    #[error("an open break already exists on this session")]
    AlreadyOnBreak,
    #[error("no open break exists on this session")]
    NoActiveBreak,
}

/// Geo/QR proof mismatches. Surfaced, not retried.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum VerificationError {
    #[error("method {method:?} is not accepted through this entry point")]
    ForbiddenMethod { method: ClockMethod },
    #[error("geo verification failed for location {location_id}: {detail}")]
    GeoVerificationFailed {
        location_id: LocationId,
        detail: String,
    },
    #[error("QR payload could not be resolved to a location")]
    InvalidQrCode,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error(transparent)]
    State(#[from] StateConflict),
    #[error(transparent)]
    Verification(#[from] VerificationError),
    #[error("unknown employee {0}")]
    UnknownEmployee(EmployeeId),
    #[error("unknown location {0}")]
    UnknownLocation(LocationId),
    #[error("unknown session {0}")]
    UnknownSession(Uuid),
    #[error("unknown break {0}")]
    UnknownBreak(Uuid),
    #[error("unknown violation {0}")]
    UnknownViolation(Uuid),
    #[error("actor is not authorized for this operation")]
    NotAuthorized,
    #[error("a waiver reason is required")]
    WaiverReasonRequired,
}
