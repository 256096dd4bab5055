//! Frame descriptors and the spatial catalog collaborator.
//!
//! A [`Frame`] describes one addressable data unit the catalog knows
//! about: where it sits on the ground and what resolution range it covers.
//! The catalog itself (a SQL-backed mosaic database in production) is out
//! of scope here; only its query contract, the [`Catalog`] trait, is part
//! of this crate.

use std::future::Future;
use std::pin::Pin;

use thiserror::Error;

use crate::view::{GeoBounds, GeoPoint, ViewStateSnapshot};

/// Boxed future type for dyn-compatible async collaborator methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Stable identity of a frame: source path plus imagery type.
///
/// Unique within one catalog; the catalog is treated as append-only for a
/// given id within a session, so equal ids imply equal geometry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FrameId {
    pub path: String,
    pub imagery_type: String,
}

impl FrameId {
    pub fn new(path: impl Into<String>, imagery_type: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            imagery_type: imagery_type.into(),
        }
    }
}

impl std::fmt::Display for FrameId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.imagery_type, self.path)
    }
}

/// Descriptor of one addressable data unit from the catalog.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub id: FrameId,
    /// Bounding quadrilateral: upper-left, upper-right, lower-right,
    /// lower-left. Not necessarily axis-aligned.
    pub corners: [GeoPoint; 4],
    /// Axis-aligned bounds enclosing `corners`.
    bounds: GeoBounds,
    /// Minimum ground sample distance the frame is valid for (finest).
    pub min_gsd: f64,
    /// Maximum ground sample distance the frame is valid for (coarsest).
    pub max_gsd: f64,
}

impl Frame {
    pub fn new(id: FrameId, corners: [GeoPoint; 4], min_gsd: f64, max_gsd: f64) -> Self {
        let bounds = GeoBounds::enclosing(&corners);
        Self {
            id,
            corners,
            bounds,
            min_gsd,
            max_gsd,
        }
    }

    pub fn bounds(&self) -> &GeoBounds {
        &self.bounds
    }

    /// The layering key for this frame.
    pub fn sort_key(&self) -> SortKey {
        SortKey {
            max_gsd: self.max_gsd,
            imagery_type: self.id.imagery_type.clone(),
            path: self.id.path.clone(),
        }
    }
}

/// Total layering order over frames: coarsest resolution first (so finer
/// imagery draws on top), then imagery type, then path.
///
/// Two keys with the same path and type are always equal, regardless of
/// GSD — identity wins over resolution, so a frame keeps its map slot
/// even if the catalog re-reports its resolution range.
///
/// # Ordering precondition
///
/// `Ord` is a lawful total order only under the catalog invariant that a
/// frame id is append-only within a session: equal (path, type) implies
/// equal `max_gsd`. A catalog that re-reported a different GSD for an
/// existing id would produce keys that compare equal to each other yet
/// order differently against a third key. Catalog implementations must
/// uphold this; the crate's ordered maps rely on it.
#[derive(Debug, Clone)]
pub struct SortKey {
    max_gsd: f64,
    imagery_type: String,
    path: String,
}

impl PartialEq for SortKey {
    fn eq(&self, other: &Self) -> bool {
        self.path == other.path && self.imagery_type == other.imagery_type
    }
}

impl Eq for SortKey {}

impl PartialOrd for SortKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SortKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        if self == other {
            return std::cmp::Ordering::Equal;
        }
        // Descending by max GSD: coarser frames sort earlier and render
        // underneath finer ones.
        other
            .max_gsd
            .total_cmp(&self.max_gsd)
            .then_with(|| self.imagery_type.cmp(&other.imagery_type))
            .then_with(|| self.path.cmp(&other.path))
    }
}

/// Errors from the catalog collaborator.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// The catalog backend failed or is unreachable. Recoverable: the
    /// lifecycle manager treats this as "zero frames this cycle".
    #[error("catalog unavailable: {0}")]
    Unavailable(String),

    /// I/O error reading the catalog.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Query contract of the spatial catalog.
///
/// Implementations must be safe to call from the lifecycle manager's
/// background worker; the query may block on I/O (it is the only blocking
/// call in the system) and may return a truncated subset when the manager
/// abandons the query mid-flight.
pub trait Catalog: Send + Sync {
    /// Returns the frames relevant to the given view.
    fn query<'a>(
        &'a self,
        view: &'a ViewStateSnapshot,
    ) -> BoxFuture<'a, Result<Vec<Frame>, CatalogError>>;
}
