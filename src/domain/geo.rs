//! Great-circle distance between coordinates (Haversine)

use crate::domain::types::Coordinate;

/// Mean Earth radius in meters
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Distance in meters between two coordinates.
///
/// Pure and total for finite inputs. Accurate well within GPS error for the
/// radius comparisons the workflow makes (meters up to tens of kilometers).
///
/// ```
/// use checkpoint_flow::domain::geo::distance_meters;
/// use checkpoint_flow::domain::types::Coordinate;
///
/// let d = distance_meters(Coordinate::new(0.0, 0.0), Coordinate::new(0.0, 1.0));
/// assert!((d - 111_195.0).abs() < 1_112.0);
/// ```
pub fn distance_meters(a: Coordinate, b: Coordinate) -> f64 {
    let phi1 = a.lat.to_radians();
    let phi2 = b.lat.to_radians();
    let d_phi = (b.lat - a.lat).to_radians();
    let d_lambda = (b.lng - a.lng).to_radians();

    let h = (d_phi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    // Rounding can push h a hair above 1 for antipodal points
    let h = h.clamp(0.0, 1.0);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());

    EARTH_RADIUS_M * c
}

/// Sum of consecutive legs along a path, in meters
pub fn path_length_meters(points: &[Coordinate]) -> f64 {
    points.windows(2).map(|leg| distance_meters(leg[0], leg[1])).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_one_degree_longitude_at_equator() {
        let d = distance_meters(Coordinate::new(0.0, 0.0), Coordinate::new(0.0, 1.0));
        assert!((d - 111_195.0).abs() < 111_195.0 * 0.01, "got {d}");
    }

    #[test]
    fn test_small_offset_near_target() {
        // ~15.6m diagonal at 10N
        let d = distance_meters(Coordinate::new(10.0, 10.0), Coordinate::new(10.0001, 10.0001));
        assert!((d - 15.6).abs() < 1.0, "got {d}");
    }

    #[test]
    fn test_antipodal_is_half_circumference() {
        let d = distance_meters(Coordinate::new(0.0, 0.0), Coordinate::new(0.0, 180.0));
        assert!((d - std::f64::consts::PI * EARTH_RADIUS_M).abs() < 1.0);
    }

    #[test]
    fn test_path_length() {
        let a = Coordinate::new(0.0, 0.0);
        let b = Coordinate::new(0.0, 1.0);
        let total = path_length_meters(&[a, b, a]);
        assert!((total - 2.0 * distance_meters(a, b)).abs() < 1e-6);
        assert_eq!(path_length_meters(&[a]), 0.0);
        assert_eq!(path_length_meters(&[]), 0.0);
    }

    fn coordinate() -> impl Strategy<Value = Coordinate> {
        (-90.0f64..=90.0, -180.0f64..=180.0).prop_map(|(lat, lng)| Coordinate::new(lat, lng))
    }

    proptest! {
        #[test]
        fn prop_distance_to_self_is_zero(a in coordinate()) {
            prop_assert!(distance_meters(a, a).abs() < 1e-6);
        }

        #[test]
        fn prop_distance_is_symmetric(a in coordinate(), b in coordinate()) {
            let ab = distance_meters(a, b);
            let ba = distance_meters(b, a);
            prop_assert!((ab - ba).abs() < 1e-6);
        }

        #[test]
        fn prop_distance_is_bounded(a in coordinate(), b in coordinate()) {
            let d = distance_meters(a, b);
            prop_assert!(d >= 0.0);
            prop_assert!(d <= std::f64::consts::PI * EARTH_RADIUS_M + 1.0);
        }
    }
}
