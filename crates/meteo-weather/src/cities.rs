//! Supported cities and their coordinates.
//!
//! The table is static: a city outside it is rejected before any request is made.

use crate::types::Coordinates;

pub const SUPPORTED_CITIES: &[(&str, Coordinates)] = &[
    (
        "Yekaterinburg",
        Coordinates {
            latitude: 56.8389,
            longitude: 60.6057,
        },
    ),
    (
        "Moscow",
        Coordinates {
            latitude: 55.7558,
            longitude: 37.6173,
        },
    ),
    (
        "Saint Petersburg",
        Coordinates {
            latitude: 59.9386,
            longitude: 30.3141,
        },
    ),
];

/// Look up coordinates for a city. Names are matched exactly.
pub fn coordinates(city: &str) -> Option<Coordinates> {
    SUPPORTED_CITIES
        .iter()
        .find(|(name, _)| *name == city)
        .map(|(_, coords)| *coords)
}

pub fn is_supported(city: &str) -> bool {
    coordinates(city).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_city() {
        let coords = coordinates("Yekaterinburg").unwrap();
        assert_eq!(coords.latitude, 56.8389);
        assert_eq!(coords.longitude, 60.6057);
    }

    #[test]
    fn test_city_with_space() {
        assert!(is_supported("Saint Petersburg"));
    }

    #[test]
    fn test_unknown_city() {
        assert!(coordinates("Paris").is_none());
        assert!(!is_supported(""));
    }

    #[test]
    fn test_match_is_exact() {
        assert!(!is_supported("moscow"));
        assert!(!is_supported(" Moscow"));
    }
}
