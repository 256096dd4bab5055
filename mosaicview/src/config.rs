//! Configuration for the renderable lifecycle manager.

use serde::{Deserialize, Serialize};

// ==================== Lifecycle Defaults ====================

/// Default epsilon for view-change detection in degrees (bounds) and
/// relative units (resolution).
///
/// Sub-epsilon camera jitter does not trigger a new catalog query.
pub const DEFAULT_VIEW_EPSILON: f64 = 1e-6;

/// Default zoom distance, in log2 units, beyond which an in-flight query
/// is abandoned.
///
/// 1.0 means the view's resolution has doubled or halved since the query
/// was dispatched.
pub const DEFAULT_CANCEL_ZOOM_DELTA: f64 = 1.0;

/// Default for releasing retained off-view renderables once every visible
/// one has finished resolving.
pub const DEFAULT_RELEASE_ZOMBIES_WHEN_ALL_RESOLVED: bool = true;

/// Tuning knobs for view-change detection and query cancellation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// Minimum view change that counts as material.
    ///
    /// Applied per bound in degrees and to resolution as a relative
    /// delta. Default: 1e-6.
    pub view_epsilon: f64,

    /// Zoom distance in log2 units at which an in-flight catalog query is
    /// abandoned rather than finished.
    ///
    /// Default: 1.0 (one zoom level).
    pub cancel_zoom_delta: f64,

    /// Release retained off-view renderables eagerly once every visible
    /// renderable has resolved.
    ///
    /// Off-view renderables are normally kept as stand-ins until fresher
    /// data covers the screen; once it does they serve no purpose.
    /// Default: true.
    pub release_zombies_when_all_resolved: bool,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            view_epsilon: DEFAULT_VIEW_EPSILON,
            cancel_zoom_delta: DEFAULT_CANCEL_ZOOM_DELTA,
            release_zombies_when_all_resolved: DEFAULT_RELEASE_ZOMBIES_WHEN_ALL_RESOLVED,
        }
    }
}

impl LifecycleConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle_config_default() {
        let config = LifecycleConfig::default();
        assert_eq!(config.view_epsilon, DEFAULT_VIEW_EPSILON);
        assert_eq!(config.cancel_zoom_delta, DEFAULT_CANCEL_ZOOM_DELTA);
        assert_eq!(
            config.release_zombies_when_all_resolved,
            DEFAULT_RELEASE_ZOMBIES_WHEN_ALL_RESOLVED
        );
    }

    #[test]
    fn test_lifecycle_config_serde_round_trip() {
        let mut config = LifecycleConfig::default();
        config.cancel_zoom_delta = 2.0;
        config.release_zombies_when_all_resolved = false;

        let json = serde_json::to_string(&config).unwrap();
        let parsed: LifecycleConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.cancel_zoom_delta, 2.0);
        assert!(!parsed.release_zombies_when_all_resolved);
        assert_eq!(parsed.view_epsilon, config.view_epsilon);
    }

    #[test]
    fn test_lifecycle_config_partial_json_uses_defaults() {
        let parsed: LifecycleConfig = serde_json::from_str(r#"{"cancel_zoom_delta": 0.5}"#).unwrap();
        assert_eq!(parsed.cancel_zoom_delta, 0.5);
        assert_eq!(parsed.view_epsilon, DEFAULT_VIEW_EPSILON);
        assert!(parsed.release_zombies_when_all_resolved);
    }
}
