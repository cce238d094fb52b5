//! Collaborators the mode synchronizer calls out to at transitions.

use std::sync::Arc;

use crate::preload::{LoadingIndicator, NoIndicator};

/// Camera reset failures. Always tolerated by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SceneError {
    #[error("camera not found in scene")]
    NoCamera,
}

/// The 3D scene presenting the 360° video.
///
/// The synchronizer only toggles visibility and resets the camera; the render
/// loop belongs to the host.
pub trait SceneHost: Send + Sync {
    fn set_visible(&self, visible: bool);

    /// Put the camera back to its default orientation before hiding.
    fn reset_camera(&self) -> Result<(), SceneError>;

    /// Re-center the view on user request. Returns whether it worked.
    fn recenter(&self) -> bool;
}

/// Scene host for headless sessions.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoScene;

impl SceneHost for NoScene {
    fn set_visible(&self, _visible: bool) {}

    fn reset_camera(&self) -> Result<(), SceneError> {
        Ok(())
    }

    fn recenter(&self) -> bool {
        false
    }
}

/// User-visible notices ("XR content is not available ...").
pub trait Notifier: Send + Sync {
    fn notify(&self, message: &str);
}

/// Notifier that writes to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, message: &str) {
        tracing::warn!("{}", message);
    }
}

/// Optional collaborators, resolved once at construction.
#[derive(Clone)]
pub struct Collaborators {
    pub scene: Arc<dyn SceneHost>,
    pub notifier: Arc<dyn Notifier>,
    /// Loading spinner driven by the readiness gate
    pub indicator: Arc<dyn LoadingIndicator>,
}

impl Default for Collaborators {
    fn default() -> Self {
        Self {
            scene: Arc::new(NoScene),
            notifier: Arc::new(LogNotifier),
            indicator: Arc::new(NoIndicator),
        }
    }
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}
