//! Background query worker for the renderable lifecycle manager.
//!
//! One worker task runs per manager instance, guaranteeing at most one
//! catalog query in flight. The worker wakes when the target view moves,
//! queries the catalog, pre-instantiates renderables for frames the owner
//! does not already hold, and publishes the batch through a single-slot
//! mailbox. A newer batch overwrites an undelivered older one; only the
//! newest view matters.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::catalog::{Catalog, Frame, SortKey};
use crate::config::LifecycleConfig;
use crate::renderable::{Renderable, RenderableFactory};
use crate::view::ViewStateSnapshot;

/// One completed query, ready for the owner thread to merge.
pub(crate) struct QueryBatch {
    /// The view the query answered.
    pub view: ViewStateSnapshot,
    pub frames: Vec<Frame>,
    /// Renderables pre-instantiated off the owner thread for frames that
    /// were not resident when the query completed.
    pub preload: BTreeMap<SortKey, Arc<dyn Renderable>>,
}

#[derive(Default)]
pub(crate) struct SharedState {
    /// Most recent view requested by the owner.
    pub target: Option<ViewStateSnapshot>,
    /// View of the last published batch; the worker is idle while this
    /// matches the target.
    pub last_queried: Option<ViewStateSnapshot>,
    /// View of the query currently being serviced, if any.
    pub in_flight: Option<ViewStateSnapshot>,
    /// Forces a re-query even for an unchanged view.
    pub invalid: bool,
    /// Sort keys of renderables the owner currently holds (visible and
    /// retained); the worker skips pre-instantiating these.
    pub resident: BTreeSet<SortKey>,
}

/// State shared between the lifecycle manager and its query worker.
pub(crate) struct Shared {
    pub state: Mutex<SharedState>,
    pub wake: Notify,
    pub mailbox: Mutex<Option<QueryBatch>>,
}

impl Shared {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SharedState::default()),
            wake: Notify::new(),
            mailbox: Mutex::new(None),
        }
    }
}

/// The background query task of one lifecycle manager.
///
/// Created together with its manager; the caller spawns [`run`] onto the
/// runtime.
///
/// [`run`]: QueryWorker::run
pub struct QueryWorker<C, F>
where
    C: Catalog,
    F: RenderableFactory,
{
    catalog: Arc<C>,
    factory: Arc<F>,
    shared: Arc<Shared>,
    config: LifecycleConfig,
    /// Cancelled when the owning manager is dropped.
    manager_gone: CancellationToken,
}

impl<C, F> QueryWorker<C, F>
where
    C: Catalog,
    F: RenderableFactory,
{
    pub(crate) fn new(
        catalog: Arc<C>,
        factory: Arc<F>,
        shared: Arc<Shared>,
        config: LifecycleConfig,
        manager_gone: CancellationToken,
    ) -> Self {
        Self {
            catalog,
            factory,
            shared,
            config,
            manager_gone,
        }
    }

    /// Runs the worker until shutdown is signalled or the owning manager
    /// is dropped.
    pub async fn run(self, shutdown: CancellationToken) {
        debug!("query worker starting");

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    debug!("query worker shutting down");
                    break;
                }

                _ = self.manager_gone.cancelled() => {
                    debug!("lifecycle manager dropped, query worker exiting");
                    break;
                }

                _ = self.shared.wake.notified() => {}
            }

            // Service every pending target before sleeping again; a wake
            // can coalesce several view changes.
            while let Some(target) = self.take_dirty_target() {
                self.service_query(target).await;
                if shutdown.is_cancelled() || self.manager_gone.is_cancelled() {
                    return;
                }
            }
        }
    }

    /// Claims the current target for querying if it differs from the last
    /// published view, marking it in flight.
    fn take_dirty_target(&self) -> Option<ViewStateSnapshot> {
        let mut state = self.shared.state.lock();
        let target = state.target.clone()?;
        let dirty = state.invalid
            || match &state.last_queried {
                Some(queried) => target.materially_differs(queried, self.config.view_epsilon),
                None => true,
            };
        if !dirty {
            return None;
        }
        state.invalid = false;
        state.in_flight = Some(target.clone());
        Some(target)
    }

    /// Whether the in-flight query has zoomed out of relevance.
    fn query_abandoned(&self, in_flight: &ViewStateSnapshot) -> bool {
        let state = self.shared.state.lock();
        match &state.target {
            Some(target) => target.zoom_delta(in_flight) > self.config.cancel_zoom_delta,
            None => false,
        }
    }

    fn clear_in_flight(&self) {
        self.shared.state.lock().in_flight = None;
    }

    async fn service_query(&self, target: ViewStateSnapshot) {
        trace!(?target.bounds, resolution = target.resolution, "querying catalog");

        if self.query_abandoned(&target) {
            trace!("query abandoned before catalog call");
            self.clear_in_flight();
            return;
        }

        let frames = self.query_frames(&target).await;

        if self.query_abandoned(&target) {
            trace!("query abandoned after catalog call, discarding results");
            self.clear_in_flight();
            return;
        }

        // Pre-instantiate renderables for frames the owner does not hold,
        // keeping factory work off the owner thread.
        let mut preload: BTreeMap<SortKey, Arc<dyn Renderable>> = BTreeMap::new();
        for frame in &frames {
            if self.query_abandoned(&target) {
                trace!("query abandoned during instantiation, discarding results");
                for renderable in preload.values() {
                    renderable.release();
                }
                self.clear_in_flight();
                return;
            }
            let key = frame.sort_key();
            if self.shared.state.lock().resident.contains(&key) || preload.contains_key(&key) {
                continue;
            }
            match self.factory.create(frame) {
                Ok(renderable) => {
                    preload.insert(key, renderable);
                }
                Err(err) => {
                    warn!(frame = %frame.id, error = %err, "factory failed, skipping frame");
                }
            }
        }

        debug!(
            frames = frames.len(),
            preloaded = preload.len(),
            "publishing query batch"
        );
        self.publish(QueryBatch {
            view: target,
            frames,
            preload,
        });
    }

    /// Queries the catalog, splitting antimeridian-crossing views into two
    /// single-hemisphere queries. A failed query degrades to zero frames
    /// this cycle.
    async fn query_frames(&self, target: &ViewStateSnapshot) -> Vec<Frame> {
        if target.crosses_antimeridian {
            let (west, east) = target.split_hemispheres();
            let mut frames = self.query_one(&west).await;
            let eastern = self.query_one(&east).await;
            let seen: BTreeSet<SortKey> = frames.iter().map(Frame::sort_key).collect();
            frames.extend(
                eastern
                    .into_iter()
                    .filter(|frame| !seen.contains(&frame.sort_key())),
            );
            frames
        } else {
            self.query_one(target).await
        }
    }

    async fn query_one(&self, view: &ViewStateSnapshot) -> Vec<Frame> {
        match self.catalog.query(view).await {
            Ok(frames) => frames,
            Err(err) => {
                warn!(error = %err, "catalog query failed, treating as empty");
                Vec::new()
            }
        }
    }

    /// Publishes a batch, replacing any undelivered previous one.
    fn publish(&self, batch: QueryBatch) {
        let stale = {
            let mut mailbox = self.shared.mailbox.lock();
            let mut state = self.shared.state.lock();
            state.last_queried = Some(batch.view.clone());
            state.in_flight = None;
            mailbox.replace(batch)
        };
        // The overwritten batch's pre-instantiated renderables were never
        // seen by the owner; release them here.
        if let Some(stale) = stale {
            trace!(frames = stale.frames.len(), "dropping undelivered batch");
            for renderable in stale.preload.values() {
                renderable.release();
            }
        }
    }
}
