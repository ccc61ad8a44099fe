//! Point-in-polygon evaluation over raw WGS84 degrees.
//!
//! Containment is planar: no projection or geodesic correction is applied.
//! Points on an edge or a vertex of any ring count as inside the polygon,
//! points strictly inside a hole count as outside. The predicate relies on
//! robust orientation tests, so identical inputs always give identical answers.

use geo::coordinate_position::{CoordPos, CoordinatePosition};
use geo::line_intersection::{line_intersection, LineIntersection};
use geo::{Area, Closest, ClosestPoint, Coord, HaversineDistance, Line, LineString, Point, Polygon};

use crate::error::GeometryError;

const MIN_RING_POINTS: usize = 4;
const MIN_DISTINCT_POINTS: usize = 3;

/// Returns true when (lon, lat) lies inside or on the boundary of `polygon`.
///
/// Degenerate polygons (fewer than three distinct exterior points, or zero
/// area) never contain anything.
pub fn contains(polygon: &Polygon<f64>, lon: f64, lat: f64) -> bool {
    if !lon.is_finite() || !lat.is_finite() || is_degenerate(polygon) {
        return false;
    }

    polygon.coordinate_position(&Coord { x: lon, y: lat }) != CoordPos::Outside
}

/// Geodesic distance in meters from (lon, lat) to the nearest point of
/// `polygon`, or zero when the polygon contains it.
pub fn distance_meters(polygon: &Polygon<f64>, lon: f64, lat: f64) -> f64 {
    if !lon.is_finite() || !lat.is_finite() {
        return f64::INFINITY;
    }
    if contains(polygon, lon, lat) {
        return 0.0;
    }

    let origin = Point::new(lon, lat);
    match polygon.closest_point(&origin) {
        Closest::Intersection(p) | Closest::SinglePoint(p) => origin.haversine_distance(&p),
        Closest::Indeterminate => f64::INFINITY,
    }
}

pub fn is_degenerate(polygon: &Polygon<f64>) -> bool {
    distinct_points(polygon.exterior()) < MIN_DISTINCT_POINTS || polygon.unsigned_area() == 0.0
}

/// Wraps (lon, lat) pairs into a ring, insisting that the caller closed it.
pub fn close_ring(points: Vec<(f64, f64)>) -> Result<LineString<f64>, GeometryError> {
    if points.len() < MIN_RING_POINTS {
        return Err(GeometryError::TooFewPoints(points.len()));
    }
    if points.first() != points.last() {
        return Err(GeometryError::OpenRing);
    }
    Ok(LineString::from(points))
}

/// Full structural check applied before a zone enters a snapshot.
pub fn validate_polygon(polygon: &Polygon<f64>) -> Result<(), GeometryError> {
    let rings = std::iter::once(polygon.exterior()).chain(polygon.interiors());

    for (index, ring) in rings.enumerate() {
        validate_ring(index, ring)?;
    }

    if polygon.unsigned_area() == 0.0 {
        return Err(GeometryError::ZeroArea);
    }

    Ok(())
}

fn validate_ring(index: usize, ring: &LineString<f64>) -> Result<(), GeometryError> {
    let count = ring.0.len();
    if count < MIN_RING_POINTS {
        return Err(GeometryError::TooFewPoints(count));
    }
    if !ring.is_closed() {
        return Err(GeometryError::OpenRing);
    }

    if let Some(c) = ring.0.iter().find(|c| !in_bounds(c)) {
        return Err(GeometryError::OutOfBounds { lon: c.x, lat: c.y });
    }

    let distinct = distinct_points(ring);
    if distinct < MIN_DISTINCT_POINTS {
        return Err(GeometryError::Degenerate(distinct));
    }

    check_simple(index, ring)
}

fn in_bounds(c: &Coord<f64>) -> bool {
    c.x.is_finite()
        && c.y.is_finite()
        && (-180.0..=180.0).contains(&c.x)
        && (-90.0..=90.0).contains(&c.y)
}

fn distinct_points(ring: &LineString<f64>) -> usize {
    let open = match ring.0.split_last() {
        Some((last, rest)) if rest.first() == Some(last) => rest,
        _ => ring.0.as_slice(),
    };

    let mut seen: Vec<Coord<f64>> = Vec::with_capacity(open.len());
    for c in open {
        if !seen.contains(c) {
            seen.push(*c);
        }
    }
    seen.len()
}

/// Rejects rings whose non-adjacent segments touch, or whose adjacent
/// segments overlap beyond their shared vertex.
fn check_simple(ring_index: usize, ring: &LineString<f64>) -> Result<(), GeometryError> {
    let segments: Vec<Line<f64>> = ring.lines().filter(|l| l.start != l.end).collect();
    let n = segments.len();

    for i in 0..n {
        for j in (i + 1)..n {
            let Some(hit) = line_intersection(segments[i], segments[j]) else {
                continue;
            };

            let adjacent = j == i + 1 || (i == 0 && j == n - 1);
            let allowed = adjacent
                && matches!(hit, LineIntersection::SinglePoint { is_proper: false, .. });

            if !allowed {
                return Err(GeometryError::SelfIntersection {
                    ring: ring_index,
                    first: i,
                    second: j,
                });
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn polygon(points: Vec<(f64, f64)>) -> Polygon<f64> {
        Polygon::new(LineString::from(points), Vec::new())
    }

    fn unit_square() -> Polygon<f64> {
        polygon(vec![(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 1.0), (0.0, 0.0)])
    }

    #[test]
    fn test_inside_outside() {
        let square = unit_square();
        assert!(contains(&square, 0.5, 0.5));
        assert!(!contains(&square, 1.5, 0.5));
        assert!(!contains(&square, -0.0001, 0.5));
    }

    #[test]
    fn test_boundary_counts_as_inside() {
        let square = unit_square();
        assert!(contains(&square, 0.0, 0.0), "vertex");
        assert!(contains(&square, 1.0, 0.5), "edge");
        assert!(contains(&square, 0.5, 1.0), "top edge");
    }

    #[test]
    fn test_degenerate_never_contains() {
        let line = polygon(vec![(0.0, 0.0), (1.0, 1.0), (0.0, 0.0), (0.0, 0.0)]);
        assert!(is_degenerate(&line));
        assert!(!contains(&line, 0.5, 0.5));
        assert!(!contains(&line, 0.0, 0.0));
    }

    #[test]
    fn test_non_finite_point() {
        assert!(!contains(&unit_square(), f64::NAN, 0.5));
    }

    #[test]
    fn test_bowtie_is_rejected() {
        let bowtie = polygon(vec![(0.0, 0.0), (1.0, 1.0), (1.0, 0.0), (0.0, 1.0), (0.0, 0.0)]);
        assert!(matches!(
            validate_polygon(&bowtie),
            Err(GeometryError::SelfIntersection { ring: 0, .. })
        ));
    }

    #[test]
    fn test_valid_square_passes() {
        assert_eq!(validate_polygon(&unit_square()), Ok(()));
    }

    #[test]
    fn test_out_of_bounds_rejected() {
        let far = polygon(vec![(179.0, 0.0), (181.0, 0.0), (181.0, 1.0), (179.0, 1.0), (179.0, 0.0)]);
        assert!(matches!(
            validate_polygon(&far),
            Err(GeometryError::OutOfBounds { .. })
        ));
    }

    #[test]
    fn test_close_ring() {
        assert_eq!(
            close_ring(vec![(0.0, 0.0), (1.0, 0.0), (0.0, 0.0)]).unwrap_err(),
            GeometryError::TooFewPoints(3)
        );
        assert_eq!(
            close_ring(vec![(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 1.0)]).unwrap_err(),
            GeometryError::OpenRing
        );
        assert!(close_ring(vec![(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 0.0)]).is_ok());
    }
}
