//! Per-frame state machine and pass ordering
//!
//! A frame moves `Idle -> Acquiring -> Recording -> Submitted -> Idle`. While recording,
//! passes open and close one at a time in the fixed order geometry, occlusion, blur,
//! lighting. Occlusion and blur are optional in the sense that a frame may omit them,
//! but blur always runs before lighting so lighting never samples an undefined input.

use bitflags::bitflags;
use thiserror::Error;

/// The four passes of the deferred chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PassKind {
    Geometry,
    Occlusion,
    Blur,
    Lighting,
}

impl PassKind {
    /// Legal recording order
    pub const ORDER: [PassKind; 4] = [
        PassKind::Geometry,
        PassKind::Occlusion,
        PassKind::Blur,
        PassKind::Lighting,
    ];

    fn rank(self) -> u8 {
        match self {
            PassKind::Geometry => 0,
            PassKind::Occlusion => 1,
            PassKind::Blur => 2,
            PassKind::Lighting => 3,
        }
    }

    /// Human readable pass name for logs
    pub fn name(self) -> &'static str {
        match self {
            PassKind::Geometry => "geometry",
            PassKind::Occlusion => "occlusion",
            PassKind::Blur => "blur",
            PassKind::Lighting => "lighting",
        }
    }

    /// Clear value for the pass's colour target(s)
    ///
    /// The single-channel occlusion targets clear to 1.0 ("fully lit"). The G-buffer
    /// clears to zero, which marks background through position alpha.
    pub fn clear_value(self) -> f32 {
        match self {
            PassKind::Occlusion | PassKind::Blur => 1.0,
            PassKind::Geometry | PassKind::Lighting => 0.0,
        }
    }

    /// Bit for this pass in a [`PassMask`]
    pub fn mask(self) -> PassMask {
        match self {
            PassKind::Geometry => PassMask::GEOMETRY,
            PassKind::Occlusion => PassMask::OCCLUSION,
            PassKind::Blur => PassMask::BLUR,
            PassKind::Lighting => PassMask::LIGHTING,
        }
    }

    /// Pass whose output this pass samples, if that pass must run first
    fn prerequisite(self) -> Option<PassKind> {
        match self {
            PassKind::Occlusion => Some(PassKind::Geometry),
            PassKind::Lighting => Some(PassKind::Blur),
            PassKind::Geometry | PassKind::Blur => None,
        }
    }
}

bitflags! {
    /// Passes completed so far in a frame
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct PassMask: u8 {
        const GEOMETRY = 1 << 0;
        const OCCLUSION = 1 << 1;
        const BLUR = 1 << 2;
        const LIGHTING = 1 << 3;
    }
}

/// Frame lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramePhase {
    Idle,
    Acquiring,
    Recording,
    Submitted,
}

/// Illegal frame or pass transition
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("Cannot {action} while frame is {phase:?}")]
    InvalidPhase {
        action: &'static str,
        phase: FramePhase,
    },

    #[error("Pass {requested:?} cannot begin while {open:?} is open")]
    PassAlreadyOpen { requested: PassKind, open: PassKind },

    #[error("Pass {requested:?} is out of order after {last:?}")]
    OutOfOrder { requested: PassKind, last: PassKind },

    #[error("Pass {requested:?} requires {missing:?} earlier in the frame")]
    MissingPrerequisite { requested: PassKind, missing: PassKind },

    #[error("No pass is open")]
    NoOpenPass,

    #[error("Frame ended without a lighting pass")]
    LightingNotRecorded,
}

/// Enforces pass order within one frame's recording
#[derive(Debug, Clone, Default)]
pub struct PassSequencer {
    completed: PassMask,
    last: Option<PassKind>,
    open: Option<PassKind>,
}

impl PassSequencer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open `kind`, checking order and prerequisites
    pub fn begin(&mut self, kind: PassKind) -> Result<(), FrameError> {
        if let Some(open) = self.open {
            return Err(FrameError::PassAlreadyOpen { requested: kind, open });
        }
        if let Some(last) = self.last {
            if kind.rank() <= last.rank() {
                return Err(FrameError::OutOfOrder { requested: kind, last });
            }
        }
        if let Some(missing) = kind.prerequisite() {
            if !self.completed.contains(missing.mask()) {
                return Err(FrameError::MissingPrerequisite { requested: kind, missing });
            }
        }
        self.open = Some(kind);
        Ok(())
    }

    /// Close the open pass
    pub fn end(&mut self) -> Result<PassKind, FrameError> {
        let kind = self.open.take().ok_or(FrameError::NoOpenPass)?;
        self.completed |= kind.mask();
        self.last = Some(kind);
        Ok(kind)
    }

    /// Pass currently open
    pub fn open_pass(&self) -> Option<PassKind> {
        self.open
    }

    /// Passes closed so far
    pub fn completed(&self) -> PassMask {
        self.completed
    }
}

/// Frame-level phase tracking around a [`PassSequencer`]
#[derive(Debug, Clone)]
pub struct FrameCycle {
    phase: FramePhase,
    passes: PassSequencer,
}

impl Default for FrameCycle {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameCycle {
    pub fn new() -> Self {
        Self {
            phase: FramePhase::Idle,
            passes: PassSequencer::new(),
        }
    }

    pub fn phase(&self) -> FramePhase {
        self.phase
    }

    fn require_phase(&self, phase: FramePhase, action: &'static str) -> Result<(), FrameError> {
        if self.phase == phase {
            Ok(())
        } else {
            Err(FrameError::InvalidPhase { action, phase: self.phase })
        }
    }

    /// `Idle -> Acquiring`
    pub fn start_acquire(&mut self) -> Result<(), FrameError> {
        self.require_phase(FramePhase::Idle, "acquire an image")?;
        self.phase = FramePhase::Acquiring;
        Ok(())
    }

    /// `Acquiring -> Recording`
    pub fn acquired(&mut self) -> Result<(), FrameError> {
        self.require_phase(FramePhase::Acquiring, "start recording")?;
        self.passes = PassSequencer::new();
        self.phase = FramePhase::Recording;
        Ok(())
    }

    /// `Acquiring -> Idle` after a stale acquire; nothing is recorded
    pub fn abandon(&mut self) -> Result<(), FrameError> {
        self.require_phase(FramePhase::Acquiring, "abandon the frame")?;
        self.phase = FramePhase::Idle;
        Ok(())
    }

    pub fn begin_pass(&mut self, kind: PassKind) -> Result<(), FrameError> {
        self.require_phase(FramePhase::Recording, "begin a pass")?;
        self.passes.begin(kind)
    }

    pub fn end_pass(&mut self) -> Result<PassKind, FrameError> {
        self.require_phase(FramePhase::Recording, "end a pass")?;
        self.passes.end()
    }

    /// `Recording -> Submitted`, requiring a closed lighting pass
    pub fn submit(&mut self) -> Result<PassMask, FrameError> {
        self.require_phase(FramePhase::Recording, "submit")?;
        if let Some(open) = self.passes.open_pass() {
            return Err(FrameError::PassAlreadyOpen { requested: PassKind::Lighting, open });
        }
        if !self.passes.completed().contains(PassMask::LIGHTING) {
            return Err(FrameError::LightingNotRecorded);
        }
        self.phase = FramePhase::Submitted;
        Ok(self.passes.completed())
    }

    /// `Submitted -> Idle`
    pub fn presented(&mut self) -> Result<(), FrameError> {
        self.require_phase(FramePhase::Submitted, "finish the frame")?;
        self.phase = FramePhase::Idle;
        Ok(())
    }
}

/// One entry of a [`PassPlan`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PassStep {
    pub kind: PassKind,
    /// False for a pass that only clears its target
    pub draws: bool,
}

/// Passes a frame records, derived from the occlusion toggle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassPlan {
    steps: Vec<PassStep>,
}

impl PassPlan {
    /// With occlusion on, all four passes draw. With it off, the blur target is only
    /// cleared to fully lit and the G-buffer pass is skipped because nothing reads it.
    pub fn for_frame(occlusion_enabled: bool) -> Self {
        let steps = if occlusion_enabled {
            PassKind::ORDER
                .iter()
                .map(|&kind| PassStep { kind, draws: true })
                .collect()
        } else {
            vec![
                PassStep { kind: PassKind::Blur, draws: false },
                PassStep { kind: PassKind::Lighting, draws: true },
            ]
        };
        Self { steps }
    }

    pub fn steps(&self) -> &[PassStep] {
        &self.steps
    }

    pub fn contains(&self, kind: PassKind) -> bool {
        self.steps.iter().any(|step| step.kind == kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recording() -> FrameCycle {
        let mut cycle = FrameCycle::new();
        cycle.start_acquire().unwrap();
        cycle.acquired().unwrap();
        cycle
    }

    fn record(cycle: &mut FrameCycle, plan: &PassPlan) {
        for step in plan.steps() {
            cycle.begin_pass(step.kind).unwrap();
            assert_eq!(cycle.end_pass().unwrap(), step.kind);
        }
    }

    #[test]
    fn test_full_frame_round_trip() {
        let mut cycle = recording();
        record(&mut cycle, &PassPlan::for_frame(true));
        let done = cycle.submit().unwrap();
        assert_eq!(done, PassMask::all());
        cycle.presented().unwrap();
        assert_eq!(cycle.phase(), FramePhase::Idle);
    }

    #[test]
    fn test_disabled_occlusion_plan_still_blurs() {
        let plan = PassPlan::for_frame(false);
        assert!(plan.contains(PassKind::Blur));
        assert!(!plan.contains(PassKind::Occlusion));
        assert_eq!(plan.steps()[0], PassStep { kind: PassKind::Blur, draws: false });

        let mut cycle = recording();
        record(&mut cycle, &plan);
        assert_eq!(cycle.submit().unwrap(), PassMask::BLUR | PassMask::LIGHTING);
    }

    #[test]
    fn test_lighting_without_blur_rejected() {
        let mut cycle = recording();
        cycle.begin_pass(PassKind::Geometry).unwrap();
        cycle.end_pass().unwrap();
        assert_eq!(
            cycle.begin_pass(PassKind::Lighting),
            Err(FrameError::MissingPrerequisite {
                requested: PassKind::Lighting,
                missing: PassKind::Blur
            })
        );
    }

    #[test]
    fn test_occlusion_requires_geometry() {
        let mut cycle = recording();
        assert!(matches!(
            cycle.begin_pass(PassKind::Occlusion),
            Err(FrameError::MissingPrerequisite { .. })
        ));
    }

    #[test]
    fn test_out_of_order_and_nested_passes_rejected() {
        let mut cycle = recording();
        cycle.begin_pass(PassKind::Blur).unwrap();
        assert!(matches!(
            cycle.begin_pass(PassKind::Lighting),
            Err(FrameError::PassAlreadyOpen { .. })
        ));
        cycle.end_pass().unwrap();
        assert!(matches!(
            cycle.begin_pass(PassKind::Geometry),
            Err(FrameError::OutOfOrder { .. })
        ));
        assert!(matches!(
            cycle.begin_pass(PassKind::Blur),
            Err(FrameError::OutOfOrder { .. })
        ));
    }

    #[test]
    fn test_phase_violations() {
        let mut cycle = FrameCycle::new();
        assert!(matches!(cycle.begin_pass(PassKind::Geometry), Err(FrameError::InvalidPhase { .. })));
        assert!(cycle.submit().is_err());

        cycle.start_acquire().unwrap();
        cycle.abandon().unwrap();
        assert_eq!(cycle.phase(), FramePhase::Idle);

        let mut cycle = recording();
        assert_eq!(cycle.submit(), Err(FrameError::LightingNotRecorded));
        assert_eq!(cycle.end_pass(), Err(FrameError::NoOpenPass));
    }

    #[test]
    fn test_clear_values() {
        assert_eq!(PassKind::Blur.clear_value(), 1.0);
        assert_eq!(PassKind::Occlusion.clear_value(), 1.0);
        assert_eq!(PassKind::Geometry.clear_value(), 0.0);
    }
}
