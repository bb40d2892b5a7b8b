use crate::frame::{FrameRotation, UpdateKind};
use crate::geometry::{DestinationId, FrameGeometry};

/// How the destination buffer is brought up to date for one frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpdatePlan {
    /// Every row of the physical frame is copied.
    FullFrame,
    /// Only the dirty rectangles are copied over the previous frame.
    Incremental,
    /// The logical frame is regenerated from a rotated physical image.
    Rotated,
}

/// Per-session state the planner consults between frames.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct CaptureState {
    pub(crate) rotation: FrameRotation,
    /// Desktop-facing size after rotation; `(0, 0)` when unknown.
    pub(crate) logical_size: (u32, u32),
    /// A complete frame has been written into `destination`.
    pub(crate) frame_initialized: bool,
    pub(crate) destination: Option<DestinationId>,
    pub(crate) frame_size: Option<(u32, u32)>,
}

impl CaptureState {
    pub(crate) fn new(logical_size: (u32, u32)) -> Self {
        Self {
            logical_size,
            ..Self::default()
        }
    }

    /// Record a successful write of a `physical` sized frame into
    /// `destination`.
    pub(crate) fn mark_written(&mut self, destination: DestinationId, physical: (u32, u32)) {
        self.frame_initialized = true;
        self.destination = Some(destination);
        self.frame_size = Some(physical);
    }

    /// Forget the tracked destination so the next frame is copied in full.
    pub(crate) fn invalidate(&mut self) {
        self.frame_initialized = false;
        self.destination = None;
        self.frame_size = None;
    }

    fn holds_previous_frame(&self, destination: DestinationId, physical: (u32, u32)) -> bool {
        self.frame_initialized
            && self.destination == Some(destination)
            && self.frame_size == Some(physical)
    }
}

/// Everything about the current frame the planner decides on.
#[derive(Clone, Copy, Debug)]
pub(crate) struct PlanInput {
    pub(crate) physical: (u32, u32),
    pub(crate) rotation: FrameRotation,
    pub(crate) update_kind: UpdateKind,
    pub(crate) dirty_rects: usize,
    pub(crate) move_rects: usize,
    pub(crate) destination: DestinationId,
    pub(crate) incremental_enabled: bool,
}

/// Rotated outputs whose logical and physical orientation disagree are
/// always regenerated through the transposer; change metadata is in the
/// wrong coordinate space for them.
pub(crate) fn needs_rotation(
    rotation: FrameRotation,
    geometry: &FrameGeometry,
    physical: (u32, u32),
    logical: (u32, u32),
) -> bool {
    rotation.is_rotated() && geometry.orientation_swapped && physical != logical
}

pub(crate) fn plan_update(
    state: &CaptureState,
    geometry: &FrameGeometry,
    input: &PlanInput,
) -> UpdatePlan {
    if needs_rotation(input.rotation, geometry, input.physical, state.logical_size) {
        return UpdatePlan::Rotated;
    }

    let incremental = input.incremental_enabled
        && input.update_kind == UpdateKind::IncrementalWithMetadata
        && input.dirty_rects > 0
        && input.move_rects == 0
        && state.holds_previous_frame(input.destination, input.physical);
    if incremental {
        UpdatePlan::Incremental
    } else {
        UpdatePlan::FullFrame
    }
}
