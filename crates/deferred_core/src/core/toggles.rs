//! Runtime toggles consumed by the frame loop
//!
//! Toggles only pick which optional pass runs and which constants get pushed.
//! They never add edges to the pass dependency graph.

use serde::{Deserialize, Serialize};

/// What the lighting pass writes to the screen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DebugView {
    /// Full lighting with occlusion
    #[default]
    Lit,
    /// Blurred occlusion term only
    OcclusionOnly,
    /// World-space normals
    Normals,
    /// Window-space fragment depth
    Depth,
}

impl DebugView {
    /// Value pushed to the lighting shader (`0..=3`)
    pub fn shader_value(self) -> i32 {
        match self {
            Self::Lit => 0,
            Self::OcclusionOnly => 1,
            Self::Normals => 2,
            Self::Depth => 3,
        }
    }

    /// Next view in the 4-state cycle
    pub fn next(self) -> Self {
        match self {
            Self::Lit => Self::OcclusionOnly,
            Self::OcclusionOnly => Self::Normals,
            Self::Normals => Self::Depth,
            Self::Depth => Self::Lit,
        }
    }
}

/// How the camera is driven
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CameraMode {
    /// Follow the keyframe animation
    #[default]
    Animated,
    /// Held in place; the viewer may move it by hand
    Manual,
}

/// Discrete toggle requests, usually mapped from key presses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToggleAction {
    /// Flip ambient occlusion on or off
    ToggleOcclusion,
    /// Advance the debug view
    CycleDebugView,
    /// Switch between animated and manual camera
    ToggleCameraMode,
}

/// Current toggle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeToggles {
    /// Whether the AO pass runs
    pub occlusion_enabled: bool,
    /// Lighting debug view
    pub debug_view: DebugView,
    /// Camera mode
    pub camera_mode: CameraMode,
}

impl RuntimeToggles {
    /// Initial toggles
    pub fn new(occlusion_enabled: bool, debug_view: DebugView, camera_mode: CameraMode) -> Self {
        Self {
            occlusion_enabled,
            debug_view,
            camera_mode,
        }
    }

    /// Apply one action. Returns `true` when the camera just switched to animated mode,
    /// which callers use to restart the animation clock.
    pub fn apply(&mut self, action: ToggleAction) -> bool {
        match action {
            ToggleAction::ToggleOcclusion => {
                self.occlusion_enabled = !self.occlusion_enabled;
                log::info!("SSAO: {}", if self.occlusion_enabled { "ON" } else { "OFF" });
                false
            }
            ToggleAction::CycleDebugView => {
                self.debug_view = self.debug_view.next();
                log::info!("Debug view: {:?}", self.debug_view);
                false
            }
            ToggleAction::ToggleCameraMode => {
                self.camera_mode = match self.camera_mode {
                    CameraMode::Animated => CameraMode::Manual,
                    CameraMode::Manual => CameraMode::Animated,
                };
                log::info!("Camera mode: {:?}", self.camera_mode);
                self.camera_mode == CameraMode::Animated
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_view_cycles_through_four_states() {
        let mut view = DebugView::Lit;
        let mut seen = Vec::new();
        for _ in 0..4 {
            seen.push(view.shader_value());
            view = view.next();
        }
        assert_eq!(seen, vec![0, 1, 2, 3]);
        assert_eq!(view, DebugView::Lit);
    }

    #[test]
    fn test_switching_to_animated_requests_clock_reset() {
        let mut toggles = RuntimeToggles::new(true, DebugView::Lit, CameraMode::Animated);
        assert!(!toggles.apply(ToggleAction::ToggleCameraMode));
        assert_eq!(toggles.camera_mode, CameraMode::Manual);
        assert!(toggles.apply(ToggleAction::ToggleCameraMode));
    }

    #[test]
    fn test_occlusion_toggle_flips() {
        let mut toggles = RuntimeToggles::new(true, DebugView::Lit, CameraMode::Manual);
        toggles.apply(ToggleAction::ToggleOcclusion);
        assert!(!toggles.occlusion_enabled);
        toggles.apply(ToggleAction::ToggleOcclusion);
        assert!(toggles.occlusion_enabled);
    }
}
