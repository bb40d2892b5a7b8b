pub mod copy;
pub mod cursor;
pub(crate) mod env_config;
pub mod error;
#[cfg(test)]
mod fake_source;
pub mod frame;
pub mod geometry;
mod parallel;
mod planner;
pub mod platform;
pub mod rotation;
pub mod session;
pub mod source;

pub use copy::{copy_dirty_regions, copy_full_frame};
pub use cursor::{CursorPosition, CursorShapeInfo, CursorShapeKind, draw_cursor};
pub use error::{CaptureError, CaptureErrorClass, CaptureResult};
pub use frame::{
    BYTES_PER_PIXEL, DirtyRect, FrameRotation, FrameSnapshot, MoveRect, SourcePoint, UpdateKind,
    bgra_len,
};
pub use geometry::DesktopRect;
pub use planner::UpdatePlan;
pub use platform::{DefaultSource, open_default_source, open_output};
pub use rotation::copy_rotated_frame;
pub use session::{
    DuplicationConfig, DuplicationSession, DuplicationSessionBuilder, FrameReport, FrameStatus,
};
pub use source::{
    AcquireOutcome, AcquiredFrame, CaptureSource, MappedImage, MetadataFill, ShapeFill,
};

