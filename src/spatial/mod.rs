//! Block-group geometry and the measures taken on it.
//!
//! All geometry stays in lon/lat (EPSG:4326). Areas are geodesic and lengths
//! are haversine, so no projected CRS round-trip is needed to get km² and km.

pub mod read;

use geo::{
    BooleanOps, BoundingRect, Centroid, Contains, GeodesicArea, HaversineDistance,
    HaversineLength,
};
use geo_types::{Coord, LineString, MultiLineString, MultiPolygon, Point, Rect};

use crate::error::{PipelineError, Result};

/// One census block group: normalized 12-digit id plus polygon footprint.
#[derive(Debug, Clone)]
pub struct BlockGroup {
    pub geoid: String,
    pub geometry: MultiPolygon<f64>,
}

impl BlockGroup {
    /// Geodesic footprint area in km².
    pub fn area_km2(&self) -> f64 {
        self.geometry.geodesic_area_unsigned() / 1_000_000.0
    }

    pub fn centroid(&self) -> Option<Point<f64>> {
        self.geometry.centroid()
    }

    pub fn contains(&self, point: &Point<f64>) -> bool {
        self.geometry.contains(point)
    }
}

/// Dissolve block-group polygons into a single community-area boundary.
pub fn dissolve(block_groups: &[BlockGroup]) -> Result<MultiPolygon<f64>> {
    let mut iter = block_groups.iter();
    let first = iter
        .next()
        .ok_or_else(|| PipelineError::Geometry("no block-group polygons to dissolve".into()))?;
    let mut boundary = first.geometry.clone();
    for bg in iter {
        boundary = boundary.union(&bg.geometry);
    }
    if boundary.0.is_empty() {
        return Err(PipelineError::Geometry(
            "dissolved community-area boundary is empty".into(),
        ));
    }
    Ok(boundary)
}

/// Great-circle distance between two lon/lat points, in meters.
pub fn distance_m(a: Point<f64>, b: Point<f64>) -> f64 {
    a.haversine_distance(&b)
}

/// Haversine length of a lon/lat polyline, in meters.
pub fn polyline_length_m(coords: &[[f64; 2]]) -> f64 {
    let line: LineString<f64> = coords.iter().map(|c| Coord { x: c[0], y: c[1] }).collect();
    line.haversine_length()
}

/// Length in km of the portion of `line` that falls inside `area`.
pub fn clipped_length_km(area: &MultiPolygon<f64>, line: &LineString<f64>) -> f64 {
    let clipped = area.clip(&MultiLineString::new(vec![line.clone()]), false);
    clipped.haversine_length() / 1000.0
}

/// Index of the block group whose centroid is closest to `point`.
/// Ties resolve to the earliest entry, so a geoid-sorted slice gives a
/// deterministic assignment.
pub fn nearest_block_group(block_groups: &[BlockGroup], point: Point<f64>) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (i, bg) in block_groups.iter().enumerate() {
        let Some(centroid) = bg.centroid() else {
            continue;
        };
        let d = distance_m(point, centroid);
        match best {
            Some((_, current)) if d >= current => {}
            _ => best = Some((i, d)),
        }
    }
    best.map(|(i, _)| i)
}

/// Bounding rectangle of a boundary polygon.
pub fn bounding_rect(boundary: &MultiPolygon<f64>) -> Result<Rect<f64>> {
    boundary
        .bounding_rect()
        .ok_or_else(|| PipelineError::Geometry("boundary has no bounding rectangle".into()))
}

/// Grow a lon/lat rectangle by roughly `meters` on every side.
pub fn expand_rect(rect: Rect<f64>, meters: f64) -> Rect<f64> {
    let mid_lat = (rect.min().y + rect.max().y) / 2.0;
    let dlat = meters / 111_320.0;
    let dlon = meters / (111_320.0 * mid_lat.to_radians().cos().max(0.01));
    Rect::new(
        Coord {
            x: rect.min().x - dlon,
            y: rect.min().y - dlat,
        },
        Coord {
            x: rect.max().x + dlon,
            y: rect.max().y + dlat,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use geo_types::{polygon, Polygon};

    /// Roughly 1 km x 1 km square on the equator.
    fn unit_square() -> BlockGroup {
        let side = 1000.0 / 111_320.0;
        let poly: Polygon<f64> = polygon![
            (x: 0.0, y: 0.0),
            (x: side, y: 0.0),
            (x: side, y: side),
            (x: 0.0, y: side),
            (x: 0.0, y: 0.0),
        ];
        BlockGroup {
            geoid: "000000000001".into(),
            geometry: MultiPolygon::new(vec![poly]),
        }
    }

    #[test]
    fn geodesic_area_of_unit_square() {
        let bg = unit_square();
        assert_relative_eq!(bg.area_km2(), 1.0, max_relative = 0.02);
    }

    #[test]
    fn dissolve_of_single_polygon_keeps_area() {
        let bg = unit_square();
        let boundary = dissolve(std::slice::from_ref(&bg)).unwrap();
        assert_relative_eq!(
            boundary.geodesic_area_unsigned() / 1_000_000.0,
            bg.area_km2(),
            max_relative = 1e-6
        );
    }

    #[test]
    fn dissolve_rejects_empty_input() {
        assert!(dissolve(&[]).is_err());
    }

    #[test]
    fn clip_keeps_inside_portion() {
        let bg = unit_square();
        let side = 1000.0 / 111_320.0;
        // Horizontal line crossing the square and sticking out both ends.
        let line: LineString<f64> = vec![
            Coord { x: -side, y: side / 2.0 },
            Coord { x: 2.0 * side, y: side / 2.0 },
        ]
        .into();
        let inside_km = clipped_length_km(&bg.geometry, &line);
        assert_relative_eq!(inside_km, 1.0, max_relative = 0.02);
    }

    #[test]
    fn nearest_assignment_is_deterministic() {
        let a = unit_square();
        let mut b = unit_square();
        b.geoid = "000000000002".into();
        // Shift b east by two sides.
        let side = 1000.0 / 111_320.0;
        b.geometry = MultiPolygon::new(
            b.geometry
                .0
                .iter()
                .map(|p| {
                    Polygon::new(
                        p.exterior()
                            .coords()
                            .map(|c| Coord {
                                x: c.x + 2.0 * side,
                                y: c.y,
                            })
                            .collect(),
                        vec![],
                    )
                })
                .collect(),
        );
        let bgs = vec![a, b];
        let near_a = Point::new(-0.0001, 0.0001);
        assert_eq!(nearest_block_group(&bgs, near_a), Some(0));
        let near_b = Point::new(2.0 * side + 0.0001, 0.0001);
        assert_eq!(nearest_block_group(&bgs, near_b), Some(1));
    }

    #[test]
    fn expand_rect_grows_both_axes() {
        let rect = Rect::new(Coord { x: 0.0, y: 0.0 }, Coord { x: 1.0, y: 1.0 });
        let grown = expand_rect(rect, 1000.0);
        assert!(grown.min().x < 0.0 && grown.min().y < 0.0);
        assert!(grown.max().x > 1.0 && grown.max().y > 1.0);
    }
}
