use serde::{Deserialize, Serialize};

use super::session::Location;
use crate::config::ProximitySection;

/// Earth radius in meters (mean).
const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Discretized proximity bucket between two sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProximityTier {
    Room,
    Venue,
    Nearby,
    Far,
}

impl ProximityTier {
    /// Score multiplier used by the Signal Engine. Closer tiers score higher.
    pub fn multiplier(self) -> f64 {
        match self {
            ProximityTier::Room => 3.0,
            ProximityTier::Venue => 2.0,
            ProximityTier::Nearby => 1.0,
            ProximityTier::Far => 0.0,
        }
    }
}

fn coordinates_valid(loc: &Location) -> bool {
    loc.lat.is_finite()
        && loc.lng.is_finite()
        && loc.lat.abs() <= 90.0
        && loc.lng.abs() <= 180.0
}

/// Haversine great-circle distance in meters. Returns `f64::INFINITY` when
/// either location is missing or carries out-of-range/non-finite coordinates.
pub fn calculate_distance(a: Option<Location>, b: Option<Location>) -> f64 {
    let (Some(a), Some(b)) = (a, b) else {
        return f64::INFINITY;
    };
    if !coordinates_valid(&a) || !coordinates_valid(&b) {
        return f64::INFINITY;
    }

    let d_lat = (b.lat - a.lat).to_radians();
    let d_lng = (b.lng - a.lng).to_radians();

    let h = (d_lat / 2.0).sin().powi(2)
        + a.lat.to_radians().cos() * b.lat.to_radians().cos() * (d_lng / 2.0).sin().powi(2);

    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());
    EARTH_RADIUS_M * c
}

/// Classify a finite distance into a tier.
pub fn tier_for_distance(distance_m: f64, cfg: &ProximitySection) -> ProximityTier {
    if distance_m <= cfg.room_m {
        ProximityTier::Room
    } else if distance_m <= cfg.venue_m {
        ProximityTier::Venue
    } else if distance_m <= cfg.nearby_m {
        ProximityTier::Nearby
    } else {
        ProximityTier::Far
    }
}

/// Tier between two optional locations. `None` (not `Far`) when the distance
/// cannot be computed.
pub fn calculate_proximity_tier(
    a: Option<Location>,
    b: Option<Location>,
    cfg: &ProximitySection,
) -> Option<ProximityTier> {
    let distance = calculate_distance(a, b);
    if !distance.is_finite() {
        return None;
    }
    Some(tier_for_distance(distance, cfg))
}
