//! Planar geometry in geographic (lon, lat) degrees
//!
//! Only what subsetting needs: bounding boxes, polygons with holes, an
//! inclusive point-in-polygon test and a polygon intersection test. Edges
//! are straight lines in lon/lat space; the antimeridian is not handled.

use crate::error::{Result, SubsetError};

/// Distance (in degrees) under which a point counts as lying on an edge
pub const BOUNDARY_TOLERANCE: f64 = 1e-12;

/// A (lon, lat) coordinate pair
pub type Coord = (f64, f64);

/// Axis-aligned bounding box
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl BoundingBox {
    pub fn empty() -> Self {
        Self {
            min_x: f64::INFINITY,
            min_y: f64::INFINITY,
            max_x: f64::NEG_INFINITY,
            max_y: f64::NEG_INFINITY,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.min_x > self.max_x || self.min_y > self.max_y
    }

    pub fn extend(&mut self, x: f64, y: f64) {
        self.min_x = self.min_x.min(x);
        self.min_y = self.min_y.min(y);
        self.max_x = self.max_x.max(x);
        self.max_y = self.max_y.max(y);
    }

    pub fn union(&self, other: &BoundingBox) -> BoundingBox {
        BoundingBox {
            min_x: self.min_x.min(other.min_x),
            min_y: self.min_y.min(other.min_y),
            max_x: self.max_x.max(other.max_x),
            max_y: self.max_y.max(other.max_y),
        }
    }

    /// Inclusive containment
    pub fn contains(&self, x: f64, y: f64) -> bool {
        x >= self.min_x - BOUNDARY_TOLERANCE
            && x <= self.max_x + BOUNDARY_TOLERANCE
            && y >= self.min_y - BOUNDARY_TOLERANCE
            && y <= self.max_y + BOUNDARY_TOLERANCE
    }

    pub fn intersects(&self, other: &BoundingBox) -> bool {
        !self.is_empty()
            && !other.is_empty()
            && self.min_x <= other.max_x + BOUNDARY_TOLERANCE
            && other.min_x <= self.max_x + BOUNDARY_TOLERANCE
            && self.min_y <= other.max_y + BOUNDARY_TOLERANCE
            && other.min_y <= self.max_y + BOUNDARY_TOLERANCE
    }

    /// `west,south,east,north`, as catalog bounding box parameters expect
    pub fn to_wsen_string(&self) -> String {
        format!("{},{},{},{}", self.min_x, self.min_y, self.max_x, self.max_y)
    }
}

/// Where a point lies relative to a ring
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Location {
    Inside,
    Boundary,
    Outside,
}

/// Polygon with one exterior ring and zero or more holes
///
/// Rings are stored open (the closing vertex is dropped) and must have at
/// least three distinct vertices.
#[derive(Debug, Clone, PartialEq)]
pub struct Polygon {
    exterior: Vec<Coord>,
    holes: Vec<Vec<Coord>>,
    bbox: BoundingBox,
}

impl Polygon {
    pub fn new(exterior: Vec<Coord>, holes: Vec<Vec<Coord>>) -> Result<Self> {
        let exterior = open_ring(exterior)?;
        let holes = holes.into_iter().map(open_ring).collect::<Result<Vec<_>>>()?;

        let mut bbox = BoundingBox::empty();
        for &(x, y) in &exterior {
            bbox.extend(x, y);
        }

        Ok(Self {
            exterior,
            holes,
            bbox,
        })
    }

    /// Polygon without holes
    pub fn from_exterior(exterior: Vec<Coord>) -> Result<Self> {
        Self::new(exterior, Vec::new())
    }

    /// Rectangle from `west, south, east, north`
    pub fn rectangle(west: f64, south: f64, east: f64, north: f64) -> Result<Self> {
        Self::from_exterior(vec![
            (west, south),
            (east, south),
            (east, north),
            (west, north),
        ])
    }

    pub fn exterior(&self) -> &[Coord] {
        &self.exterior
    }

    pub fn holes(&self) -> &[Vec<Coord>] {
        &self.holes
    }

    pub fn bbox(&self) -> &BoundingBox {
        &self.bbox
    }

    /// Inclusive point-in-polygon test
    ///
    /// Points on the exterior ring, on a hole's ring, or on a vertex are
    /// inside. Points strictly inside a hole are outside.
    pub fn contains(&self, x: f64, y: f64) -> bool {
        if !self.bbox.contains(x, y) {
            return false;
        }

        match locate(&self.exterior, x, y) {
            Location::Outside => false,
            Location::Boundary => true,
            Location::Inside => !self
                .holes
                .iter()
                .any(|hole| locate(hole, x, y) == Location::Inside),
        }
    }

    /// True when the two polygons share at least one point
    pub fn intersects(&self, other: &Polygon) -> bool {
        if !self.bbox.intersects(&other.bbox) {
            return false;
        }

        if other.exterior.iter().any(|&(x, y)| self.contains(x, y))
            || self.exterior.iter().any(|&(x, y)| other.contains(x, y))
        {
            return true;
        }

        self.rings().any(|a| {
            other
                .rings()
                .any(|b| edges(a).any(|(p1, p2)| edges(b).any(|(p3, p4)| segments_intersect(p1, p2, p3, p4))))
        })
    }

    fn rings(&self) -> impl Iterator<Item = &[Coord]> {
        std::iter::once(self.exterior.as_slice()).chain(self.holes.iter().map(Vec::as_slice))
    }
}

/// One or more polygons in WGS 84 lon/lat; a point is inside when any
/// polygon contains it
#[derive(Debug, Clone, PartialEq)]
pub struct AreaOfInterest {
    polygons: Vec<Polygon>,
    bbox: BoundingBox,
}

impl AreaOfInterest {
    pub fn new(polygons: Vec<Polygon>) -> Result<Self> {
        if polygons.is_empty() {
            return Err(SubsetError::Aoi("no polygons".to_string()));
        }

        let bbox = polygons
            .iter()
            .fold(BoundingBox::empty(), |acc, p| acc.union(p.bbox()));

        Ok(Self { polygons, bbox })
    }

    /// Load from GeoJSON text
    pub fn from_geojson_str(text: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(text)
            .map_err(|e| SubsetError::Aoi(format!("not valid JSON: {}", e)))?;
        Self::new(crate::geojson::polygons(&value)?)
    }

    /// Load from a GeoJSON file
    pub fn from_geojson_path<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| SubsetError::Aoi(format!("cannot read {}: {}", path.display(), e)))?;
        Self::from_geojson_str(&text)
    }

    pub fn polygons(&self) -> &[Polygon] {
        &self.polygons
    }

    pub fn bbox(&self) -> &BoundingBox {
        &self.bbox
    }

    pub fn contains(&self, x: f64, y: f64) -> bool {
        self.bbox.contains(x, y) && self.polygons.iter().any(|p| p.contains(x, y))
    }

    /// True when any of `envelope` intersects any AOI polygon
    pub fn intersects_any(&self, envelope: &[Polygon]) -> bool {
        envelope
            .iter()
            .any(|e| self.polygons.iter().any(|p| p.intersects(e)))
    }
}

fn open_ring(mut ring: Vec<Coord>) -> Result<Vec<Coord>> {
    if ring.iter().any(|(x, y)| !x.is_finite() || !y.is_finite()) {
        return Err(SubsetError::Aoi("ring has non-finite coordinates".to_string()));
    }

    if ring.len() > 1 && ring.first() == ring.last() {
        ring.pop();
    }

    let mut distinct = ring.clone();
    distinct.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    distinct.dedup();
    if distinct.len() < 3 {
        return Err(SubsetError::Aoi(format!(
            "ring needs at least 3 distinct vertices, found {}",
            distinct.len()
        )));
    }

    Ok(ring)
}

fn edges(ring: &[Coord]) -> impl Iterator<Item = (Coord, Coord)> + '_ {
    let n = ring.len();
    (0..n).map(move |i| (ring[i], ring[(i + 1) % n]))
}

/// Crossing-number test with an explicit boundary check
fn locate(ring: &[Coord], x: f64, y: f64) -> Location {
    let mut inside = false;

    for ((xi, yi), (xj, yj)) in edges(ring) {
        if on_segment((xi, yi), (xj, yj), (x, y)) {
            return Location::Boundary;
        }

        if (yi > y) != (yj > y) {
            let x_cross = (xj - xi) * (y - yi) / (yj - yi) + xi;
            if x < x_cross {
                inside = !inside;
            }
        }
    }

    if inside {
        Location::Inside
    } else {
        Location::Outside
    }
}

fn cross(o: Coord, a: Coord, b: Coord) -> f64 {
    (a.0 - o.0) * (b.1 - o.1) - (a.1 - o.1) * (b.0 - o.0)
}

fn on_segment(a: Coord, b: Coord, p: Coord) -> bool {
    let length = (b.0 - a.0).hypot(b.1 - a.1);
    if cross(a, b, p).abs() > BOUNDARY_TOLERANCE * length.max(1.0) {
        return false;
    }

    p.0 >= a.0.min(b.0) - BOUNDARY_TOLERANCE
        && p.0 <= a.0.max(b.0) + BOUNDARY_TOLERANCE
        && p.1 >= a.1.min(b.1) - BOUNDARY_TOLERANCE
        && p.1 <= a.1.max(b.1) + BOUNDARY_TOLERANCE
}

fn segments_intersect(p1: Coord, p2: Coord, p3: Coord, p4: Coord) -> bool {
    let d1 = cross(p3, p4, p1);
    let d2 = cross(p3, p4, p2);
    let d3 = cross(p1, p2, p3);
    let d4 = cross(p1, p2, p4);

    if ((d1 > 0.0 && d2 < 0.0) || (d1 < 0.0 && d2 > 0.0))
        && ((d3 > 0.0 && d4 < 0.0) || (d3 < 0.0 && d4 > 0.0))
    {
        return true;
    }

    on_segment(p3, p4, p1) || on_segment(p3, p4, p2) || on_segment(p1, p2, p3) || on_segment(p1, p2, p4)
}
