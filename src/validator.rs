// src/validator.rs
//
// Clock Event Validator: pure validation of a requested clock action against
// the verification method and location proofs. No side effects; the state
// machine consumes the normalized event on success.

use tracing::debug;

use crate::config::EngineConfig;
use crate::error::VerificationError;
use crate::model::{
    ClockAction, ClockMethod, ClockProof, Employee, EntryOrigin, GeoPoint, Location,
    ValidatedEvent,
};

#[derive(Debug, Clone)]
pub struct ClockEventValidator {
    default_geofence_radius_m: f64,
}

impl ClockEventValidator {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            default_geofence_radius_m: config.geofence_radius_meters,
        }
    }

    pub fn validate(
        &self,
        employee: &Employee,
        action: ClockAction,
        method: ClockMethod,
        proof: &ClockProof,
        origin: EntryOrigin,
        location: Option<&Location>,
    ) -> Result<ValidatedEvent, VerificationError> {
        // The QR_CODE method label is only trusted when the request came
        // through the dedicated scan entry point, which has already resolved
        // a signed payload. Accepting the label on the generic endpoint
        // would let a client claim QR verification without scanning.
        if method == ClockMethod::QrCode && origin != EntryOrigin::QrScan {
            return Err(VerificationError::ForbiddenMethod { method });
        }

        if let Some(location) = location {
            if location.requires_gps_verification {
                self.verify_geofence(employee, proof, location)?;
            }
        }

        debug!(
            employee_id = %employee.id,
            ?action,
            ?method,
            "clock event validated"
        );
        Ok(ValidatedEvent {
            action,
            method,
            location_id: location.map(|l| l.id.clone()),
            geo: proof.geo,
        })
    }

    fn verify_geofence(
        &self,
        employee: &Employee,
        proof: &ClockProof,
        location: &Location,
    ) -> Result<(), VerificationError> {
        let Some(here) = proof.geo else {
            return Err(VerificationError::GeoVerificationFailed {
                location_id: location.id.clone(),
                detail: "location requires GPS verification but no coordinates were supplied"
                    .to_string(),
            });
        };
        let Some(center) = location.geo else {
            return Err(VerificationError::GeoVerificationFailed {
                location_id: location.id.clone(),
                detail: "location requires GPS verification but has no configured coordinates"
                    .to_string(),
            });
        };
        let radius = location
            .geofence_radius_m
            .unwrap_or(self.default_geofence_radius_m);
        let distance = haversine_meters(here, center);
        if distance > radius {
            debug!(
                employee_id = %employee.id,
                location_id = %location.id,
                distance_m = distance,
                radius_m = radius,
                "geofence check failed"
            );
            return Err(VerificationError::GeoVerificationFailed {
                location_id: location.id.clone(),
                detail: format!("{distance:.0} m from location, radius is {radius:.0} m"),
            });
        }
        Ok(())
    }
}

/// Great-circle distance between two points in meters.
pub fn haversine_meters(a: GeoPoint, b: GeoPoint) -> f64 {
    const EARTH_RADIUS_M: f64 = 6_371_000.0;
    let (lat1, lat2) = (a.lat.to_radians(), b.lat.to_radians());
    let dlat = (b.lat - a.lat).to_radians();
    let dlon = (b.lon - a.lon).to_radians();
    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * h.sqrt().asin()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn employee() -> Employee {
        Employee {
            id: "emp-1".to_string(),
            name: "Dana".to_string(),
            role: "driver".to_string(),
            tz_offset_minutes: 0,
            active: true,
        }
    }

    fn gps_location() -> Location {
        Location {
            id: "depot".to_string(),
            name: "Depot".to_string(),
            geo: Some(GeoPoint::new(52.520008, 13.404954)),
            requires_gps_verification: true,
            geofence_radius_m: Some(100.0),
            qr_secret: "secret".to_string(),
        }
    }

    fn validator() -> ClockEventValidator {
        ClockEventValidator::new(&EngineConfig::default())
    }

    #[test]
    fn qr_method_rejected_on_generic_entry_point() {
        let err = validator()
            .validate(
                &employee(),
                ClockAction::ClockIn,
                ClockMethod::QrCode,
                &ClockProof::default(),
                EntryOrigin::Generic,
                None,
            )
            .unwrap_err();
        assert_eq!(
            err,
            VerificationError::ForbiddenMethod {
                method: ClockMethod::QrCode
            }
        );
    }

    #[test]
    fn qr_method_accepted_through_scan_entry_point() {
        let event = validator()
            .validate(
                &employee(),
                ClockAction::ClockIn,
                ClockMethod::QrCode,
                &ClockProof::default(),
                EntryOrigin::QrScan,
                None,
            )
            .unwrap();
        assert_eq!(event.method, ClockMethod::QrCode);
    }

    #[test]
    fn geofence_accepts_nearby_and_rejects_distant_proof() {
        let loc = gps_location();
        let near = ClockProof {
            location_id: Some(loc.id.clone()),
            // ~30 m north of the depot.
            geo: Some(GeoPoint::new(52.520278, 13.404954)),
        };
        let event = validator()
            .validate(
                &employee(),
                ClockAction::ClockIn,
                ClockMethod::Portal,
                &near,
                EntryOrigin::Generic,
                Some(&loc),
            )
            .unwrap();
        assert_eq!(event.location_id.as_deref(), Some("depot"));

        let far = ClockProof {
            location_id: Some(loc.id.clone()),
            // ~1.1 km away.
            geo: Some(GeoPoint::new(52.530008, 13.404954)),
        };
        let err = validator()
            .validate(
                &employee(),
                ClockAction::ClockIn,
                ClockMethod::Portal,
                &far,
                EntryOrigin::Generic,
                Some(&loc),
            )
            .unwrap_err();
        assert!(matches!(
            err,
            VerificationError::GeoVerificationFailed { .. }
        ));
    }

    #[test]
    fn missing_coordinates_fail_when_gps_required() {
        let loc = gps_location();
        let err = validator()
            .validate(
                &employee(),
                ClockAction::ClockOut,
                ClockMethod::Portal,
                &ClockProof {
                    location_id: Some(loc.id.clone()),
                    geo: None,
                },
                EntryOrigin::Generic,
                Some(&loc),
            )
            .unwrap_err();
        assert!(matches!(
            err,
            VerificationError::GeoVerificationFailed { .. }
        ));
    }

    #[test]
    fn haversine_is_sane() {
        let a = GeoPoint::new(52.520008, 13.404954);
        let b = GeoPoint::new(52.520008, 13.404954);
        assert!(haversine_meters(a, b) < 0.01);
        // One degree of latitude is about 111 km.
        let c = GeoPoint::new(53.520008, 13.404954);
        let d = haversine_meters(a, c);
        assert!((d - 111_000.0).abs() < 500.0, "distance was {d}");
    }
}
