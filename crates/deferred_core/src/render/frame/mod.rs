//! Frame orchestration logic independent of any device
//!
//! The Vulkan renderer drives these types; tests drive them with simulated fences.

pub mod cycle;
pub mod dependencies;
pub mod pacing;

pub use cycle::{FrameCycle, FrameError, FramePhase, PassKind, PassMask, PassPlan, PassSequencer, PassStep};
pub use dependencies::{DependencyEdge, DependencyError, DependencyTable, Signal, Stage};
pub use pacing::{FrameFence, FramePacer, FRAME_SLOT_COUNT};
