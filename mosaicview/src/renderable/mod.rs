//! Renderable wrappers and the factory collaborator.
//!
//! A renderable is the live wrapper bound to exactly one [`Frame`],
//! carrying its resolution state. The lifecycle manager owns renderables
//! through `Arc<dyn Renderable>`; resurrection (zombie back to visible)
//! reuses the same allocation, observable through `Arc::ptr_eq`.
//!
//! The [`RenderableFactory`] is invoked off the owner thread, so
//! implementations must not touch owner-thread-only resources — any such
//! initialization (GPU textures and the like) happens lazily on first
//! owner-thread use.

use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;

use crate::catalog::Frame;
use crate::resolve::{ResolutionStateMachine, ResolveState, StateError};

/// Errors from the renderable factory collaborator.
#[derive(Debug, Error)]
pub enum FactoryError {
    /// The factory could not instantiate a wrapper for the frame.
    #[error("failed to instantiate renderable for {path}: {reason}")]
    Creation { path: String, reason: String },
}

/// A live, possibly not-yet-ready resource wrapper.
///
/// `suspend` and `resume` are lenient at this level: calling them when the
/// wrapped state machine is not in the applicable state is a no-op, so
/// sweep passes can apply them to whole sets.
pub trait Renderable: Send + Sync {
    /// Current resolution state.
    fn state(&self) -> ResolveState;

    /// Pauses in-flight resolution work, if any.
    fn suspend(&self);

    /// Resumes previously suspended resolution work, if any.
    fn resume(&self);

    /// Frees the wrapper's non-owner-thread resources and drops any
    /// resolution progress.
    fn release(&self);
}

/// Instantiates a renderable for a catalog frame.
///
/// Called from the lifecycle manager's background worker (and, as a
/// fallback for frames that arrive without a preload, from the owner
/// thread during merge).
pub trait RenderableFactory: Send + Sync {
    fn create(&self, frame: &Frame) -> Result<Arc<dyn Renderable>, FactoryError>;
}

/// Default renderable: a frame plus a mutex-guarded state machine.
///
/// Suitable for hosts that drive resolution themselves via the loader
/// callbacks and do not need a custom wrapper type.
pub struct ResolvableResource {
    frame: Frame,
    machine: Mutex<ResolutionStateMachine>,
}

impl ResolvableResource {
    pub fn new(frame: Frame) -> Self {
        Self {
            frame,
            machine: Mutex::new(ResolutionStateMachine::new()),
        }
    }

    pub fn frame(&self) -> &Frame {
        &self.frame
    }

    /// Marks the start of resolution work. Strict: errors unless the
    /// resource is `Unresolved`.
    pub fn begin_resolving(&self) -> Result<(), StateError> {
        self.machine.lock().begin()
    }

    /// Records the outcome of resolution work. Strict: errors unless the
    /// resource is `Resolving`.
    pub fn mark_resolved(&self, success: bool) -> Result<(), StateError> {
        self.machine.lock().resolve(success)
    }
}

impl Renderable for ResolvableResource {
    fn state(&self) -> ResolveState {
        self.machine.lock().state()
    }

    fn suspend(&self) {
        self.machine.lock().suspend();
    }

    fn resume(&self) {
        let mut machine = self.machine.lock();
        if machine.state() == ResolveState::Suspended {
            // Strict resume cannot fail from Suspended.
            let _ = machine.resume();
        }
    }

    fn release(&self) {
        self.machine.lock().reset();
    }
}
