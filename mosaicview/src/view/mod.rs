//! Viewport snapshots consumed by the lifecycle manager and prioritizer.
//!
//! A [`ViewStateSnapshot`] is an immutable copy of the viewport parameters
//! taken once per render pass. The render loop hands it to the lifecycle
//! manager, which compares snapshots by value to decide whether a new
//! catalog query is worth dispatching and whether an in-flight query has
//! become irrelevant.
//!
//! When the viewport spans the antimeridian (±180° longitude), a single
//! west-to-east bounds rectangle is meaningless; such snapshots are split
//! into two single-hemisphere snapshots before querying.

use serde::{Deserialize, Serialize};

/// A geographic position in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }
}

/// Axis-aligned geographic bounds in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoBounds {
    pub north: f64,
    pub south: f64,
    pub east: f64,
    pub west: f64,
}

impl GeoBounds {
    pub fn new(north: f64, south: f64, east: f64, west: f64) -> Self {
        Self {
            north,
            south,
            east,
            west,
        }
    }

    /// Axis-aligned intersection test.
    pub fn intersects(&self, other: &GeoBounds) -> bool {
        self.south <= other.north
            && self.north >= other.south
            && self.west <= other.east
            && self.east >= other.west
    }

    /// Smallest bounds containing the four corners of a quadrilateral.
    pub fn enclosing(corners: &[GeoPoint; 4]) -> Self {
        let mut bounds = GeoBounds::new(
            corners[0].latitude,
            corners[0].latitude,
            corners[0].longitude,
            corners[0].longitude,
        );
        for corner in &corners[1..] {
            bounds.north = bounds.north.max(corner.latitude);
            bounds.south = bounds.south.min(corner.latitude);
            bounds.east = bounds.east.max(corner.longitude);
            bounds.west = bounds.west.min(corner.longitude);
        }
        bounds
    }
}

/// Immutable copy of the viewport parameters for one render pass.
///
/// Equality is by field value, not identity; two snapshots taken from an
/// unchanged camera compare equal, which is what lets the lifecycle
/// manager short-circuit redundant catalog queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewStateSnapshot {
    /// Geographic bounds of the viewport. When `crosses_antimeridian` is
    /// set, `west > east` and the bounds describe the wrapped span.
    pub bounds: GeoBounds,
    /// Ground sample distance of the view, meters per pixel.
    pub resolution: f64,
    /// Viewport size in pixels.
    pub viewport_width: u32,
    pub viewport_height: u32,
    /// Camera look-at point in viewport pixels.
    pub focus_x: f64,
    pub focus_y: f64,
    /// Viewport spans the ±180° longitude seam.
    pub crosses_antimeridian: bool,
}

impl ViewStateSnapshot {
    /// Whether this snapshot differs enough from `other` to justify a new
    /// catalog query: any bound or the resolution moved beyond `epsilon`
    /// (resolution relative), or the antimeridian flag flipped.
    pub fn materially_differs(&self, other: &ViewStateSnapshot, epsilon: f64) -> bool {
        if self.crosses_antimeridian != other.crosses_antimeridian {
            return true;
        }
        let bounds_moved = (self.bounds.north - other.bounds.north).abs() > epsilon
            || (self.bounds.south - other.bounds.south).abs() > epsilon
            || (self.bounds.east - other.bounds.east).abs() > epsilon
            || (self.bounds.west - other.bounds.west).abs() > epsilon;
        if bounds_moved {
            return true;
        }
        let reference = other.resolution.abs().max(f64::MIN_POSITIVE);
        (self.resolution - other.resolution).abs() / reference > epsilon
    }

    /// Absolute zoom distance to `other` in log2 space.
    ///
    /// A value of 1.0 means the resolution doubled or halved.
    pub fn zoom_delta(&self, other: &ViewStateSnapshot) -> f64 {
        (self.resolution / other.resolution).log2().abs()
    }

    /// Splits an antimeridian-crossing snapshot into west-of-seam and
    /// east-of-seam halves, each a valid single-hemisphere query.
    ///
    /// Callers should only invoke this when `crosses_antimeridian` is set;
    /// for an ordinary snapshot both halves equal `self`.
    pub fn split_hemispheres(&self) -> (ViewStateSnapshot, ViewStateSnapshot) {
        if !self.crosses_antimeridian {
            return (self.clone(), self.clone());
        }
        let mut west = self.clone();
        west.bounds.east = 180.0;
        west.crosses_antimeridian = false;
        let mut east = self.clone();
        east.bounds.west = -180.0;
        east.crosses_antimeridian = false;
        (west, east)
    }

    /// Whether the given bounds intersect the viewport, accounting for the
    /// antimeridian split.
    pub fn intersects(&self, bounds: &GeoBounds) -> bool {
        if self.crosses_antimeridian {
            let (west, east) = self.split_hemispheres();
            west.bounds.intersects(bounds) || east.bounds.intersects(bounds)
        } else {
            self.bounds.intersects(bounds)
        }
    }
}
