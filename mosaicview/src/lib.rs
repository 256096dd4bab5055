//! Mosaicview - resource resolution core for tiled map rendering
//!
//! This library keeps what a tiled-map renderer draws consistent with
//! where the camera looks: it tracks per-resource resolution state,
//! bounds decoded data in a byte-budgeted cache, prioritizes pending I/O
//! by viewport relevance, and manages the visible/retained renderable
//! sets against an external spatial catalog without ever blocking the
//! render loop.
//!
//! The pieces compose around a single owner thread (the render loop) and
//! one background query task per [`lifecycle::RenderableLifecycleManager`]:
//!
//! - [`resolve`] - per-resource resolution state machine
//! - [`cache`] - byte-budgeted LRU cache for decoded payloads
//! - [`view`] - immutable viewport snapshots
//! - [`catalog`] - frame descriptors and the catalog query contract
//! - [`renderable`] - live resource wrappers and their factory
//! - [`priority`] - viewport-driven I/O request ordering
//! - [`lifecycle`] - view-driven renderable lifecycle management

pub mod cache;
pub mod catalog;
pub mod config;
pub mod lifecycle;
pub mod priority;
pub mod renderable;
pub mod resolve;
pub mod view;

pub use cache::{BoundedResourceCache, CacheStats};
pub use catalog::{Catalog, CatalogError, Frame, FrameId, SortKey};
pub use config::LifecycleConfig;
pub use lifecycle::{QueryWorker, RenderableLifecycleManager};
pub use priority::{ReadRequest, ReadRequestPrioritizer, RequestQueue, SourceRect};
pub use renderable::{FactoryError, Renderable, RenderableFactory, ResolvableResource};
pub use resolve::{ResolutionStateMachine, ResolveState, StateError};
pub use view::{GeoBounds, GeoPoint, ViewStateSnapshot};
