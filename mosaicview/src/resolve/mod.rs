//! Resolution state machine shared by every loadable resource.
//!
//! Each renderable wrapper carries a [`ResolutionStateMachine`] that tracks
//! progress from "nothing loaded yet" to a terminal outcome:
//!
//! ```text
//! Unresolved ──► Resolving ──► Resolved
//!                   │  ▲  └──► Unresolvable
//!                   ▼  │
//!                 Suspended
//! ```
//!
//! Transitions are checked: skipping a state is a caller bug, surfaced as
//! [`StateError::InvalidTransition`]. The one deliberate exception is
//! [`ResolutionStateMachine::suspend`], which is a silent no-op outside of
//! `Resolving` so that sweep passes can suspend large sets without first
//! inspecting each member.

use thiserror::Error;
use tracing::warn;

/// Lifecycle state of a loadable resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResolveState {
    /// Created, no loading attempted yet.
    Unresolved,
    /// Loading is in progress.
    Resolving,
    /// Loading finished successfully. Terminal.
    Resolved,
    /// Loading failed permanently. Terminal.
    Unresolvable,
    /// In-flight work is paused; partial progress is retained.
    Suspended,
}

impl ResolveState {
    /// Returns true for states no further transition can leave
    /// (absent external invalidation).
    pub fn is_terminal(&self) -> bool {
        matches!(self, ResolveState::Resolved | ResolveState::Unresolvable)
    }
}

/// Errors produced by illegal state machine transitions.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum StateError {
    /// The caller attempted a transition the state machine does not allow.
    #[error("invalid resolution state transition: {from:?} -> {to:?}")]
    InvalidTransition {
        from: ResolveState,
        to: ResolveState,
    },
}

/// Checked state machine driving one resource's resolution lifecycle.
///
/// Starts in [`ResolveState::Unresolved`]. Callers must pass through
/// `Resolving` before reaching either terminal state; the machine rejects
/// shortcuts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolutionStateMachine {
    state: ResolveState,
}

impl ResolutionStateMachine {
    /// Creates a machine in the `Unresolved` state.
    pub fn new() -> Self {
        Self {
            state: ResolveState::Unresolved,
        }
    }

    /// Returns the current state.
    pub fn state(&self) -> ResolveState {
        self.state
    }

    /// Enters `Resolving` from `Unresolved`.
    pub fn begin(&mut self) -> Result<(), StateError> {
        match self.state {
            ResolveState::Unresolved => {
                self.state = ResolveState::Resolving;
                Ok(())
            }
            from => Err(StateError::InvalidTransition {
                from,
                to: ResolveState::Resolving,
            }),
        }
    }

    /// Pauses in-flight work without discarding partial progress.
    ///
    /// Silent no-op unless the machine is currently `Resolving`.
    pub fn suspend(&mut self) {
        if self.state == ResolveState::Resolving {
            self.state = ResolveState::Suspended;
        }
    }

    /// Re-enters `Resolving` from `Suspended`.
    pub fn resume(&mut self) -> Result<(), StateError> {
        match self.state {
            ResolveState::Suspended => {
                self.state = ResolveState::Resolving;
                Ok(())
            }
            from => Err(StateError::InvalidTransition {
                from,
                to: ResolveState::Resolving,
            }),
        }
    }

    /// Finishes resolution: `Resolving -> Resolved` on success,
    /// `Resolving -> Unresolvable` on failure.
    ///
    /// Any other source state is a caller error.
    pub fn resolve(&mut self, success: bool) -> Result<(), StateError> {
        let to = if success {
            ResolveState::Resolved
        } else {
            ResolveState::Unresolvable
        };
        match self.state {
            ResolveState::Resolving => {
                self.state = to;
                Ok(())
            }
            from => Err(StateError::InvalidTransition { from, to }),
        }
    }

    /// Drops all progress and returns to `Unresolved`.
    ///
    /// Used when a wrapper is released and its backing resources are freed.
    pub fn reset(&mut self) {
        self.state = ResolveState::Unresolved;
    }
}

impl Default for ResolutionStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

/// Absorbs an illegal-transition error per the crate's propagation policy:
/// fatal in debug builds, logged and ignored in release builds.
///
/// Illegal transitions indicate a programming error in the caller, but in
/// production a mis-sequenced transition is preferable to tearing down the
/// render loop.
pub fn tolerate_transition(result: Result<(), StateError>) {
    if let Err(err) = result {
        debug_assert!(false, "{err}");
        warn!("ignoring illegal resolution state transition: {err}");
    }
}
