//! Reverse geocoding and weather lookup for a captured fix

use crate::domain::types::Coordinate;
use async_trait::async_trait;
use rand::seq::SliceRandom;

/// Human-readable description of where a checkpoint was taken
#[derive(Debug, Clone, PartialEq)]
pub struct PlaceInfo {
    pub location: String,
    /// e.g. `"Sunny, 28°C"`
    pub weather: String,
}

impl PlaceInfo {
    /// Weather condition without the temperature
    pub fn condition(&self) -> &str {
        self.weather.split(',').next().unwrap_or("").trim()
    }
}

#[async_trait]
pub trait PlaceResolver: Send + Sync {
    async fn describe(&self, coordinate: Option<Coordinate>) -> PlaceInfo;
}

const SIMULATED_LOCATIONS: [&str; 4] =
    ["Sector 4, Tech Park", "Downtown Avenue", "Industrial Zone B", "Main Street, North"];
const SIMULATED_WEATHER: [&str; 4] = ["Sunny, 28°C", "Cloudy, 24°C", "Rainy, 22°C", "Clear, 30°C"];

/// Picks a location and weather string from fixed lists
#[derive(Debug, Default)]
pub struct SimulatedPlaceResolver;

#[async_trait]
impl PlaceResolver for SimulatedPlaceResolver {
    async fn describe(&self, coordinate: Option<Coordinate>) -> PlaceInfo {
        let mut rng = rand::thread_rng();
        let location = match coordinate {
            Some(_) => SIMULATED_LOCATIONS.choose(&mut rng).copied().unwrap_or("Unknown"),
            None => "Unknown",
        };
        let weather = SIMULATED_WEATHER.choose(&mut rng).copied().unwrap_or("Unknown");
        PlaceInfo { location: location.to_string(), weather: weather.to_string() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_simulated_place_from_lists() {
        let place = SimulatedPlaceResolver.describe(Some(Coordinate::new(1.0, 2.0))).await;
        assert!(SIMULATED_LOCATIONS.contains(&place.location.as_str()));
        assert!(SIMULATED_WEATHER.contains(&place.weather.as_str()));
    }

    #[tokio::test]
    async fn test_no_fix_is_unknown_location() {
        let place = SimulatedPlaceResolver.describe(None).await;
        assert_eq!(place.location, "Unknown");
    }

    #[test]
    fn test_condition_strips_temperature() {
        let place = PlaceInfo { location: "x".to_string(), weather: "Rainy, 22°C".to_string() };
        assert_eq!(place.condition(), "Rainy");
    }
}
