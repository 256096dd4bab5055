//! View-driven lifecycle of renderable resources.
//!
//! [`RenderableLifecycleManager`] keeps the set of live renderables
//! consistent with the most recent viewport snapshot. All catalog I/O
//! happens on a background [`QueryWorker`]; the owner thread (the render
//! loop) only publishes view changes and merges completed query results.
//!
//! Renderables leaving the visible set are not dropped immediately: as
//! long as they still intersect the view and carry useful resolution
//! progress they are retained as *zombies*, stand-ins drawn underneath
//! until fresher data covers the screen. A zombie whose frame comes back
//! in a later query is *resurrected*, reusing the same instance so its
//! resolution progress survives.
//!
//! # Example
//!
//! ```ignore
//! use mosaicview::lifecycle::RenderableLifecycleManager;
//!
//! let (mut manager, worker) =
//!     RenderableLifecycleManager::new(catalog, factory, LifecycleConfig::default());
//! tokio::spawn(worker.run(shutdown.clone()));
//!
//! // Per render pass, on the owner thread:
//! manager.set_target_view(snapshot);
//! if manager.merge_pending() {
//!     // visible set changed
//! }
//! for (_, renderable) in manager.visible() { /* draw */ }
//! ```

mod worker;

pub use worker::QueryWorker;

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::catalog::{Catalog, Frame, SortKey};
use crate::config::LifecycleConfig;
use crate::renderable::{Renderable, RenderableFactory};
use crate::resolve::ResolveState;
use crate::view::ViewStateSnapshot;

use worker::Shared;

/// A live renderable together with the frame it was built from.
struct Entry {
    frame: Frame,
    renderable: Arc<dyn Renderable>,
}

/// Owner-thread manager of the visible and retained renderable sets.
///
/// All methods must be called from the single owner thread; the only
/// cross-thread state is the shared target view and the result mailbox,
/// both internally synchronized.
pub struct RenderableLifecycleManager<F>
where
    F: RenderableFactory,
{
    factory: Arc<F>,
    config: LifecycleConfig,
    shared: Arc<Shared>,
    /// Cancelled on drop so the worker does not outlive the manager.
    manager_gone: CancellationToken,

    /// Renderables covering the prepared view, in draw order (coarsest
    /// first).
    visible: BTreeMap<SortKey, Entry>,
    /// Renderables no longer selected by the catalog but retained as
    /// stand-ins.
    zombie: BTreeMap<SortKey, Entry>,
    /// Renderables moved from zombie back to visible in the most recent
    /// merge. Cleared at the start of every merge.
    resurrected: Vec<Arc<dyn Renderable>>,
    /// View of the last merged batch.
    prepared: Option<ViewStateSnapshot>,
}

impl<F> RenderableLifecycleManager<F>
where
    F: RenderableFactory,
{
    /// Creates a manager and its background query worker.
    ///
    /// The caller spawns the worker onto the runtime; the worker exits
    /// when the manager is dropped or its shutdown token fires.
    pub fn new<C: Catalog>(
        catalog: Arc<C>,
        factory: Arc<F>,
        config: LifecycleConfig,
    ) -> (Self, QueryWorker<C, F>) {
        let shared = Arc::new(Shared::new());
        let manager_gone = CancellationToken::new();
        let worker = QueryWorker::new(
            catalog,
            Arc::clone(&factory),
            Arc::clone(&shared),
            config.clone(),
            manager_gone.clone(),
        );
        let manager = Self {
            factory,
            config,
            shared,
            manager_gone,
            visible: BTreeMap::new(),
            zombie: BTreeMap::new(),
            resurrected: Vec::new(),
            prepared: None,
        };
        (manager, worker)
    }

    // ========================================================================
    // View publication
    // ========================================================================

    /// Publishes a new target view. Non-blocking; the worker picks it up
    /// and queries the catalog if the change is material.
    pub fn set_target_view(&self, view: ViewStateSnapshot) {
        self.shared.state.lock().target = Some(view);
        self.shared.wake.notify_one();
    }

    /// Forces a re-query of the current target even if the view has not
    /// moved, e.g. after the catalog contents changed.
    pub fn invalidate(&self) {
        self.shared.state.lock().invalid = true;
        self.shared.wake.notify_one();
    }

    /// Whether the current target differs materially from the last merged
    /// view.
    pub fn should_query(&self) -> bool {
        let state = self.shared.state.lock();
        if state.invalid {
            return true;
        }
        match (&state.target, &self.prepared) {
            (Some(target), Some(prepared)) => {
                target.materially_differs(prepared, self.config.view_epsilon)
            }
            (Some(_), None) => true,
            (None, _) => false,
        }
    }

    /// Whether the in-flight query, if any, has zoomed out of relevance.
    pub fn should_cancel(&self) -> bool {
        let state = self.shared.state.lock();
        match (&state.target, &state.in_flight) {
            (Some(target), Some(in_flight)) => {
                target.zoom_delta(in_flight) > self.config.cancel_zoom_delta
            }
            _ => false,
        }
    }

    // ========================================================================
    // Merge
    // ========================================================================

    /// Drains the worker's mailbox and merges the batch, if one is
    /// waiting. Returns whether a merge happened.
    ///
    /// Called once per render pass on the owner thread.
    pub fn merge_pending(&mut self) -> bool {
        let batch = self.shared.mailbox.lock().take();
        match batch {
            Some(batch) => {
                self.merge_batch(batch.view, batch.frames, batch.preload);
                true
            }
            None => false,
        }
    }

    /// Merges a frame set for the given view directly, instantiating any
    /// renderables not already held.
    ///
    /// `merge_pending` is the normal path; this entry point exists for
    /// hosts that drive the catalog themselves.
    pub fn merge(&mut self, view: ViewStateSnapshot, frames: Vec<Frame>) {
        self.merge_batch(view, frames, BTreeMap::new());
    }

    fn merge_batch(
        &mut self,
        view: ViewStateSnapshot,
        frames: Vec<Frame>,
        mut preload: BTreeMap<SortKey, Arc<dyn Renderable>>,
    ) {
        self.resurrected.clear();
        let mut next_visible: BTreeMap<SortKey, Entry> = BTreeMap::new();

        for frame in frames {
            let key = frame.sort_key();
            if next_visible.contains_key(&key) {
                continue;
            }
            if let Some(entry) = self.visible.remove(&key) {
                // Already visible: carried forward, never re-instantiated.
                next_visible.insert(key, entry);
            } else if let Some(entry) = self.zombie.remove(&key) {
                trace!(frame = %entry.frame.id, "resurrecting renderable");
                entry.renderable.resume();
                self.resurrected.push(Arc::clone(&entry.renderable));
                next_visible.insert(key, entry);
            } else if let Some(renderable) = preload.remove(&key) {
                next_visible.insert(key, Entry { frame, renderable });
            } else {
                // No preload for this frame (direct merge, or the frame
                // was resident when the worker ran but released since).
                match self.factory.create(&frame) {
                    Ok(renderable) => {
                        next_visible.insert(key, Entry { frame, renderable });
                    }
                    Err(err) => {
                        warn!(frame = %frame.id, error = %err, "factory failed, skipping frame");
                    }
                }
            }
        }

        // Formerly-visible frames absent from this batch become zombies if
        // they still intersect the view and carry resolution progress;
        // otherwise they are released now.
        let mut candidates: BTreeMap<SortKey, Entry> = BTreeMap::new();
        for (key, entry) in std::mem::take(&mut self.visible) {
            let state = entry.renderable.state();
            let keep = view.intersects(entry.frame.bounds())
                && state != ResolveState::Unresolved
                && state != ResolveState::Unresolvable;
            if keep {
                candidates.insert(key, entry);
            } else {
                trace!(frame = %entry.frame.id, "releasing off-view renderable");
                entry.renderable.release();
            }
        }

        // Sweep the retained set. Once every visible renderable has
        // resolved, the stand-ins serve no purpose.
        let all_resolved = self.config.release_zombies_when_all_resolved
            && !next_visible.is_empty()
            && next_visible
                .values()
                .all(|entry| entry.renderable.state() == ResolveState::Resolved);

        let mut next_zombie: BTreeMap<SortKey, Entry> = BTreeMap::new();
        for (key, entry) in std::mem::take(&mut self.zombie).into_iter().chain(candidates) {
            let state = entry.renderable.state();
            let release = state == ResolveState::Unresolvable
                || !view.intersects(entry.frame.bounds())
                || all_resolved;
            if release {
                trace!(frame = %entry.frame.id, "releasing zombie renderable");
                entry.renderable.release();
            } else {
                // A zombie only stands in with what it already has; its
                // pending work yields to the visible set.
                entry.renderable.suspend();
                next_zombie.insert(key, entry);
            }
        }

        // Pre-instantiated renderables for frames that did not survive the
        // merge are never used.
        for renderable in preload.values() {
            renderable.release();
        }

        debug!(
            visible = next_visible.len(),
            zombies = next_zombie.len(),
            resurrected = self.resurrected.len(),
            "merge complete"
        );

        self.visible = next_visible;
        self.zombie = next_zombie;
        self.prepared = Some(view);
        self.sync_resident();
    }

    /// Pushes the owner's resident key set to the worker so it skips
    /// pre-instantiating frames already held.
    fn sync_resident(&self) {
        let mut state = self.shared.state.lock();
        state.resident = self
            .visible
            .keys()
            .chain(self.zombie.keys())
            .cloned()
            .collect();
    }

    // ========================================================================
    // Teardown and inspection
    // ========================================================================

    /// Releases every held renderable and resets the manager to empty.
    pub fn release(&mut self) {
        for entry in self.visible.values().chain(self.zombie.values()) {
            entry.renderable.release();
        }
        self.visible.clear();
        self.zombie.clear();
        self.resurrected.clear();
        self.prepared = None;
        self.sync_resident();
    }

    /// Overall resolution state of the visible set.
    pub fn aggregate_state(&self) -> ResolveState {
        if self.visible.is_empty() {
            return ResolveState::Unresolved;
        }
        let mut all_resolved = true;
        let mut all_unresolvable = true;
        for entry in self.visible.values() {
            match entry.renderable.state() {
                ResolveState::Resolved => all_unresolvable = false,
                ResolveState::Unresolvable => all_resolved = false,
                _ => {
                    all_resolved = false;
                    all_unresolvable = false;
                }
            }
        }
        if all_resolved {
            ResolveState::Resolved
        } else if all_unresolvable {
            ResolveState::Unresolvable
        } else {
            ResolveState::Resolving
        }
    }

    /// Visible renderables in draw order, coarsest imagery first.
    pub fn visible(&self) -> impl Iterator<Item = (&Frame, &Arc<dyn Renderable>)> {
        self.visible
            .values()
            .map(|entry| (&entry.frame, &entry.renderable))
    }

    /// Retained off-view renderables in draw order.
    pub fn zombies(&self) -> impl Iterator<Item = (&Frame, &Arc<dyn Renderable>)> {
        self.zombie
            .values()
            .map(|entry| (&entry.frame, &entry.renderable))
    }

    /// Renderables resurrected by the most recent merge.
    pub fn resurrected(&self) -> &[Arc<dyn Renderable>] {
        &self.resurrected
    }

    /// View of the last merged batch, if any.
    pub fn prepared_view(&self) -> Option<&ViewStateSnapshot> {
        self.prepared.as_ref()
    }
}

impl<F> Drop for RenderableLifecycleManager<F>
where
    F: RenderableFactory,
{
    fn drop(&mut self) {
        self.manager_gone.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{BoxFuture, CatalogError, FrameId};
    use crate::renderable::{FactoryError, ResolvableResource};
    use crate::view::{GeoBounds, GeoPoint};
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct EmptyCatalog;

    impl Catalog for EmptyCatalog {
        fn query<'a>(
            &'a self,
            _view: &'a ViewStateSnapshot,
        ) -> BoxFuture<'a, Result<Vec<Frame>, CatalogError>> {
            Box::pin(async { Ok(Vec::new()) })
        }
    }

    /// Counts instantiations and keeps a concrete handle to every product
    /// so tests can drive resolution state directly.
    struct CountingFactory {
        created: AtomicUsize,
        instances: Mutex<Vec<(String, Arc<ResolvableResource>)>>,
    }

    impl CountingFactory {
        fn new() -> Self {
            Self {
                created: AtomicUsize::new(0),
                instances: Mutex::new(Vec::new()),
            }
        }

        fn created(&self) -> usize {
            self.created.load(Ordering::SeqCst)
        }

        /// Most recent instance created for the given path.
        fn resource(&self, path: &str) -> Arc<ResolvableResource> {
            self.instances
                .lock()
                .iter()
                .rev()
                .find(|(p, _)| p == path)
                .map(|(_, r)| Arc::clone(r))
                .unwrap()
        }

        fn resolve(&self, path: &str) {
            let resource = self.resource(path);
            resource.begin_resolving().unwrap();
            resource.mark_resolved(true).unwrap();
        }
    }

    impl RenderableFactory for CountingFactory {
        fn create(&self, frame: &Frame) -> Result<Arc<dyn Renderable>, FactoryError> {
            let resource = Arc::new(ResolvableResource::new(frame.clone()));
            self.instances
                .lock()
                .push((frame.id.path.clone(), Arc::clone(&resource)));
            self.created.fetch_add(1, Ordering::SeqCst);
            Ok(resource)
        }
    }

    fn frame(path: &str, max_gsd: f64, south: f64, west: f64) -> Frame {
        Frame::new(
            FrameId::new(path, "ortho"),
            [
                GeoPoint::new(south + 1.0, west),
                GeoPoint::new(south + 1.0, west + 1.0),
                GeoPoint::new(south, west + 1.0),
                GeoPoint::new(south, west),
            ],
            max_gsd / 4.0,
            max_gsd,
        )
    }

    fn view(north: f64, south: f64, east: f64, west: f64) -> ViewStateSnapshot {
        ViewStateSnapshot {
            bounds: GeoBounds::new(north, south, east, west),
            resolution: 4.0,
            viewport_width: 1920,
            viewport_height: 1080,
            focus_x: 960.0,
            focus_y: 540.0,
            crosses_antimeridian: false,
        }
    }

    fn manager_with_config(
        config: LifecycleConfig,
    ) -> (
        RenderableLifecycleManager<CountingFactory>,
        Arc<CountingFactory>,
    ) {
        let factory = Arc::new(CountingFactory::new());
        let (manager, _worker) =
            RenderableLifecycleManager::new(Arc::new(EmptyCatalog), Arc::clone(&factory), config);
        (manager, factory)
    }

    fn manager() -> (
        RenderableLifecycleManager<CountingFactory>,
        Arc<CountingFactory>,
    ) {
        manager_with_config(LifecycleConfig::default())
    }

    #[test]
    fn test_merge_instantiates_new_frames() {
        let (mut manager, factory) = manager();
        manager.merge(
            view(49.0, 46.0, 13.0, 10.0),
            vec![frame("a.tif", 8.0, 47.0, 11.0), frame("b.tif", 4.0, 47.0, 12.0)],
        );
        assert_eq!(manager.visible().count(), 2);
        assert_eq!(factory.created(), 2);
        assert_eq!(manager.zombies().count(), 0);
    }

    #[test]
    fn test_merge_is_idempotent() {
        let (mut manager, factory) = manager();
        let frames = vec![frame("a.tif", 8.0, 47.0, 11.0)];
        let v = view(49.0, 46.0, 13.0, 10.0);

        manager.merge(v.clone(), frames.clone());
        let first: Vec<_> = manager.visible().map(|(_, r)| Arc::clone(r)).collect();

        manager.merge(v, frames);
        let second: Vec<_> = manager.visible().map(|(_, r)| Arc::clone(r)).collect();

        assert_eq!(factory.created(), 1);
        assert_eq!(first.len(), second.len());
        assert!(Arc::ptr_eq(&first[0], &second[0]));
    }

    #[test]
    fn test_duplicate_frames_in_batch_instantiated_once() {
        let (mut manager, factory) = manager();
        manager.merge(
            view(49.0, 46.0, 13.0, 10.0),
            vec![frame("a.tif", 8.0, 47.0, 11.0), frame("a.tif", 8.0, 47.0, 11.0)],
        );
        assert_eq!(manager.visible().count(), 1);
        assert_eq!(factory.created(), 1);
    }

    #[test]
    fn test_unresolved_renderable_released_not_zombied() {
        let (mut manager, factory) = manager();
        let v = view(49.0, 46.0, 13.0, 10.0);
        manager.merge(v.clone(), vec![frame("a.tif", 8.0, 47.0, 11.0)]);

        // "a" never started resolving; it carries nothing worth keeping.
        manager.merge(v, vec![frame("b.tif", 4.0, 47.0, 12.0)]);
        assert_eq!(manager.zombies().count(), 0);
        assert_eq!(
            factory.resource("a.tif").state(),
            ResolveState::Unresolved
        );
    }

    #[test]
    fn test_resolved_renderable_zombies_and_resurrects() {
        let (mut manager, factory) = manager();
        let v = view(49.0, 46.0, 13.0, 10.0);
        let a = frame("a.tif", 8.0, 47.0, 11.0);
        let b = frame("b.tif", 4.0, 47.0, 12.0);

        manager.merge(v.clone(), vec![a.clone(), b.clone()]);
        // Resolve "a" so it survives as a zombie; leave "b" unresolved so
        // the all-resolved sweep does not fire.
        factory.resolve("a.tif");
        let a_renderable = {
            let (_, r) = manager
                .visible()
                .find(|(f, _)| f.id.path == "a.tif")
                .unwrap();
            Arc::clone(r)
        };

        manager.merge(v.clone(), vec![b.clone()]);
        assert_eq!(manager.visible().count(), 1);
        assert_eq!(manager.zombies().count(), 1);
        assert_eq!(factory.created(), 2);

        // The zombie comes back: same instance, listed as resurrected.
        manager.merge(v, vec![a, b]);
        assert_eq!(manager.zombies().count(), 0);
        assert_eq!(manager.resurrected().len(), 1);
        assert!(Arc::ptr_eq(&manager.resurrected()[0], &a_renderable));
        let (_, merged) = manager
            .visible()
            .find(|(f, _)| f.id.path == "a.tif")
            .unwrap();
        assert!(Arc::ptr_eq(merged, &a_renderable));
        assert_eq!(factory.created(), 2);
    }

    #[test]
    fn test_offscreen_renderable_released_not_zombied() {
        let (mut manager, factory) = manager();
        manager.merge(
            view(49.0, 46.0, 13.0, 10.0),
            vec![frame("a.tif", 8.0, 47.0, 11.0)],
        );
        factory.resolve("a.tif");

        // New view far away; the old frame no longer intersects.
        manager.merge(view(10.0, 9.0, -50.0, -51.0), Vec::new());
        assert_eq!(manager.visible().count(), 0);
        assert_eq!(manager.zombies().count(), 0);
        assert_eq!(
            factory.resource("a.tif").state(),
            ResolveState::Unresolved
        );
    }

    #[test]
    fn test_zombies_released_when_all_visible_resolved() {
        let (mut manager, factory) = manager();
        let v = view(49.0, 46.0, 13.0, 10.0);

        manager.merge(v.clone(), vec![frame("a.tif", 8.0, 47.0, 11.0)]);
        factory.resolve("a.tif");

        manager.merge(v.clone(), vec![frame("b.tif", 4.0, 47.0, 12.0)]);
        assert_eq!(manager.zombies().count(), 1);

        // Resolve the sole visible renderable; the next merge sweeps the
        // stand-in.
        factory.resolve("b.tif");
        manager.merge(v, vec![frame("b.tif", 4.0, 47.0, 12.0)]);
        assert_eq!(manager.zombies().count(), 0);
        assert_eq!(
            factory.resource("a.tif").state(),
            ResolveState::Unresolved
        );
    }

    #[test]
    fn test_zombie_sweep_disabled_by_config() {
        let config = LifecycleConfig {
            release_zombies_when_all_resolved: false,
            ..LifecycleConfig::default()
        };
        let (mut manager, factory) = manager_with_config(config);
        let v = view(49.0, 46.0, 13.0, 10.0);

        manager.merge(v.clone(), vec![frame("a.tif", 8.0, 47.0, 11.0)]);
        factory.resolve("a.tif");
        manager.merge(v.clone(), vec![frame("b.tif", 4.0, 47.0, 12.0)]);
        factory.resolve("b.tif");

        manager.merge(v, vec![frame("b.tif", 4.0, 47.0, 12.0)]);
        assert_eq!(manager.zombies().count(), 1);
    }

    #[test]
    fn test_resolving_zombie_suspended_and_resumed_on_resurrection() {
        let (mut manager, factory) = manager();
        let v = view(49.0, 46.0, 13.0, 10.0);
        manager.merge(v.clone(), vec![frame("a.tif", 8.0, 47.0, 11.0)]);
        let a = factory.resource("a.tif");
        a.begin_resolving().unwrap();
        assert_eq!(a.state(), ResolveState::Resolving);

        manager.merge(v.clone(), vec![frame("b.tif", 4.0, 47.0, 12.0)]);
        assert_eq!(a.state(), ResolveState::Suspended);

        manager.merge(
            v,
            vec![frame("a.tif", 8.0, 47.0, 11.0), frame("b.tif", 4.0, 47.0, 12.0)],
        );
        assert_eq!(a.state(), ResolveState::Resolving);
    }

    #[test]
    fn test_release_clears_everything() {
        let (mut manager, factory) = manager();
        let v = view(49.0, 46.0, 13.0, 10.0);
        manager.merge(v.clone(), vec![frame("a.tif", 8.0, 47.0, 11.0)]);
        factory.resolve("a.tif");
        manager.merge(v, vec![frame("b.tif", 4.0, 47.0, 12.0)]);

        manager.release();
        assert_eq!(manager.visible().count(), 0);
        assert_eq!(manager.zombies().count(), 0);
        assert!(manager.resurrected().is_empty());
        assert!(manager.prepared_view().is_none());
        assert_eq!(
            factory.resource("a.tif").state(),
            ResolveState::Unresolved
        );
    }

    #[test]
    fn test_aggregate_state() {
        let (mut manager, factory) = manager();
        assert_eq!(manager.aggregate_state(), ResolveState::Unresolved);

        manager.merge(
            view(49.0, 46.0, 13.0, 10.0),
            vec![frame("a.tif", 8.0, 47.0, 11.0), frame("b.tif", 4.0, 47.0, 12.0)],
        );
        assert_eq!(manager.aggregate_state(), ResolveState::Resolving);

        factory.resolve("a.tif");
        factory.resolve("b.tif");
        assert_eq!(manager.aggregate_state(), ResolveState::Resolved);
    }

    #[test]
    fn test_should_query_tracks_prepared_view() {
        let (mut manager, _factory) = manager();
        assert!(!manager.should_query());

        let v = view(49.0, 46.0, 13.0, 10.0);
        manager.set_target_view(v.clone());
        assert!(manager.should_query());

        manager.merge(v.clone(), Vec::new());
        assert!(!manager.should_query());

        manager.invalidate();
        assert!(manager.should_query());

        let mut moved = v;
        moved.bounds.north += 1.0;
        manager.set_target_view(moved);
        assert!(manager.should_query());
    }
}
