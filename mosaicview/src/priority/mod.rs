//! Viewport-driven prioritization of pending I/O read requests.
//!
//! Readers service one request at a time from a shared queue; the order in
//! which requests are serviced decides how quickly the on-screen area
//! fills in. [`ReadRequestPrioritizer`] turns the current viewport
//! geometry (focus point plus the rectangles actually being rendered this
//! frame) into a total order over [`ReadRequest`]s, and [`RequestQueue`]
//! applies that order to the pending set.
//!
//! # Example
//!
//! ```ignore
//! let prioritizer = Arc::new(ReadRequestPrioritizer::new(true));
//! prioritizer.update(50.0, 50.0, vec![SourceRect::new(0, 0, 100, 100)]);
//!
//! let mut queue = RequestQueue::new(Arc::clone(&prioritizer));
//! queue.push(ReadRequest::new(1, 3, SourceRect::new(0, 0, 10, 10)));
//! queue.push(ReadRequest::new(2, 3, SourceRect::new(45, 45, 55, 55)));
//! let (next, cancelled) = queue.pop_next().unwrap();
//! assert_eq!((next.id, cancelled), (2, false));
//! ```

mod queue;

pub use queue::RequestQueue;

use std::cmp::Ordering;

use parking_lot::RwLock;

// ============================================================================
// Source-space geometry
// ============================================================================

/// Axis-aligned rectangle in source pixel coordinates, edges inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceRect {
    pub left: i64,
    pub top: i64,
    pub right: i64,
    pub bottom: i64,
}

impl SourceRect {
    pub fn new(left: i64, top: i64, right: i64, bottom: i64) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    pub fn intersects(&self, other: &SourceRect) -> bool {
        self.left <= other.right
            && self.right >= other.left
            && self.top <= other.bottom
            && self.bottom >= other.top
    }

    pub fn contains_point(&self, x: f64, y: f64) -> bool {
        x >= self.left as f64
            && x <= self.right as f64
            && y >= self.top as f64
            && y <= self.bottom as f64
    }

    /// Squared distance from the point to the nearest point inside the
    /// rectangle. Zero when the point is inside.
    pub fn distance_sq(&self, x: f64, y: f64) -> f64 {
        let clamped_x = x.clamp(self.left as f64, self.right as f64);
        let clamped_y = y.clamp(self.top as f64, self.bottom as f64);
        let dx = x - clamped_x;
        let dy = y - clamped_y;
        dx * dx + dy * dy
    }
}

/// One pending I/O fetch. Compared by the prioritizer, never mutated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadRequest {
    /// Monotonically increasing issue id; breaks otherwise perfect ties so
    /// the order stays strict.
    pub id: u64,
    /// Pyramid level the request reads from. Larger is coarser.
    pub level: u32,
    pub rect: SourceRect,
}

impl ReadRequest {
    pub fn new(id: u64, level: u32, rect: SourceRect) -> Self {
        Self { id, level, rect }
    }
}

// ============================================================================
// Prioritizer
// ============================================================================

#[derive(Debug, Clone, Default)]
struct FocusSnapshot {
    focus_x: f64,
    focus_y: f64,
    regions: Vec<SourceRect>,
}

/// Total-order comparator over pending read requests.
///
/// Ordering rules, applied in sequence:
///
/// 1. A request intersecting any visible region beats one that does not.
/// 2. When both intersect and sit on different pyramid levels, the level
///    rule decides (see `progressive_load`).
/// 3. A request whose rectangle contains the focus point beats one whose
///    rectangle does not.
/// 4. The request whose rectangle is nearer the focus point (squared
///    Euclidean distance to the clamped nearest point) wins.
/// 5. Remaining ties fall back to the level rule, then ascending id.
///
/// With `progressive_load` set, coarser levels are serviced first so the
/// view fills in at low detail before refining; unset, the finest level is
/// serviced first.
///
/// The geometry snapshot is updated once per render pass via [`update`];
/// comparisons between updates all see the same snapshot, keeping the
/// order consistent for any single sort.
///
/// [`update`]: ReadRequestPrioritizer::update
pub struct ReadRequestPrioritizer {
    progressive_load: bool,
    snapshot: RwLock<FocusSnapshot>,
}

impl ReadRequestPrioritizer {
    pub fn new(progressive_load: bool) -> Self {
        Self {
            progressive_load,
            snapshot: RwLock::new(FocusSnapshot::default()),
        }
    }

    /// Replaces the focus point and visible-region set for subsequent
    /// comparisons.
    pub fn update(&self, focus_x: f64, focus_y: f64, regions: Vec<SourceRect>) {
        *self.snapshot.write() = FocusSnapshot {
            focus_x,
            focus_y,
            regions,
        };
    }

    fn level_order(&self, a: &ReadRequest, b: &ReadRequest) -> Ordering {
        if self.progressive_load {
            // Coarser (larger) level first.
            b.level.cmp(&a.level)
        } else {
            a.level.cmp(&b.level)
        }
    }

    /// Compares two requests; `Ordering::Less` means `a` is serviced
    /// before `b`.
    pub fn compare(&self, a: &ReadRequest, b: &ReadRequest) -> Ordering {
        let snapshot = self.snapshot.read();

        let a_visible = snapshot.regions.iter().any(|r| r.intersects(&a.rect));
        let b_visible = snapshot.regions.iter().any(|r| r.intersects(&b.rect));
        match (a_visible, b_visible) {
            (true, false) => return Ordering::Less,
            (false, true) => return Ordering::Greater,
            _ => {}
        }

        if a_visible && b_visible && a.level != b.level {
            return self.level_order(a, b);
        }

        let a_focused = a.rect.contains_point(snapshot.focus_x, snapshot.focus_y);
        let b_focused = b.rect.contains_point(snapshot.focus_x, snapshot.focus_y);
        match (a_focused, b_focused) {
            (true, false) => return Ordering::Less,
            (false, true) => return Ordering::Greater,
            _ => {}
        }

        let a_dist = a.rect.distance_sq(snapshot.focus_x, snapshot.focus_y);
        let b_dist = b.rect.distance_sq(snapshot.focus_x, snapshot.focus_y);
        a_dist
            .total_cmp(&b_dist)
            .then_with(|| self.level_order(a, b))
            .then_with(|| a.id.cmp(&b.id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(id: u64, level: u32, left: i64, top: i64, right: i64, bottom: i64) -> ReadRequest {
        ReadRequest::new(id, level, SourceRect::new(left, top, right, bottom))
    }

    fn focused_prioritizer(progressive_load: bool) -> ReadRequestPrioritizer {
        let prioritizer = ReadRequestPrioritizer::new(progressive_load);
        prioritizer.update(50.0, 50.0, vec![SourceRect::new(0, 0, 100, 100)]);
        prioritizer
    }

    #[test]
    fn test_rect_distance_sq() {
        let rect = SourceRect::new(0, 0, 10, 10);
        assert_eq!(rect.distance_sq(5.0, 5.0), 0.0);
        assert_eq!(rect.distance_sq(13.0, 14.0), 9.0 + 16.0);
        assert_eq!(rect.distance_sq(-3.0, 5.0), 9.0);
    }

    #[test]
    fn test_visible_beats_offscreen() {
        let prioritizer = focused_prioritizer(true);
        let visible = request(1, 5, 40, 40, 60, 60);
        let offscreen = request(2, 5, 200, 200, 210, 210);
        assert_eq!(prioritizer.compare(&visible, &offscreen), Ordering::Less);
        assert_eq!(prioritizer.compare(&offscreen, &visible), Ordering::Greater);
    }

    #[test]
    fn test_both_visible_level_rule() {
        let coarse = request(1, 6, 40, 40, 60, 60);
        let fine = request(2, 2, 70, 70, 90, 90);

        let progressive = focused_prioritizer(true);
        assert_eq!(progressive.compare(&coarse, &fine), Ordering::Less);

        let direct = focused_prioritizer(false);
        assert_eq!(direct.compare(&fine, &coarse), Ordering::Less);
    }

    #[test]
    fn test_focus_containment_beats_distance() {
        // Both intersect the region at the same level; B contains the
        // focus point, A does not.
        let prioritizer = focused_prioritizer(true);
        let a = request(1, 3, 0, 0, 10, 10);
        let b = request(2, 3, 45, 45, 55, 55);
        assert_eq!(prioritizer.compare(&b, &a), Ordering::Less);
        assert_eq!(prioritizer.compare(&a, &b), Ordering::Greater);
    }

    #[test]
    fn test_offscreen_ordered_by_distance() {
        let prioritizer = focused_prioritizer(true);
        let near = request(1, 3, 110, 50, 120, 60);
        let far = request(2, 3, 400, 400, 410, 410);
        assert_eq!(prioritizer.compare(&near, &far), Ordering::Less);
    }

    #[test]
    fn test_identical_geometry_tie_broken_by_id() {
        let prioritizer = focused_prioritizer(true);
        let first = request(1, 3, 40, 40, 60, 60);
        let second = request(2, 3, 40, 40, 60, 60);
        assert_eq!(prioritizer.compare(&first, &second), Ordering::Less);
        assert_eq!(prioritizer.compare(&second, &first), Ordering::Greater);
        assert_eq!(prioritizer.compare(&first, &first), Ordering::Equal);
    }

    #[test]
    fn test_strict_weak_ordering_over_triples() {
        let prioritizer = focused_prioritizer(true);
        let requests = [
            request(1, 2, 40, 40, 60, 60),
            request(2, 6, 40, 40, 60, 60),
            request(3, 3, 0, 0, 10, 10),
            request(4, 3, 45, 45, 55, 55),
            request(5, 3, 110, 50, 120, 60),
            request(6, 3, 400, 400, 410, 410),
            request(7, 3, 40, 40, 60, 60),
        ];
        for a in &requests {
            assert_ne!(prioritizer.compare(a, a), Ordering::Less);
            for b in &requests {
                for c in &requests {
                    if prioritizer.compare(a, b) == Ordering::Less
                        && prioritizer.compare(b, c) == Ordering::Less
                    {
                        assert_eq!(
                            prioritizer.compare(a, c),
                            Ordering::Less,
                            "transitivity violated for ids {} {} {}",
                            a.id,
                            b.id,
                            c.id
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn test_empty_region_set_falls_through_to_focus() {
        let prioritizer = ReadRequestPrioritizer::new(true);
        prioritizer.update(50.0, 50.0, Vec::new());
        let containing = request(1, 3, 45, 45, 55, 55);
        let distant = request(2, 3, 200, 200, 210, 210);
        assert_eq!(prioritizer.compare(&containing, &distant), Ordering::Less);
    }
}
