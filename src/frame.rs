use crate::error::{CaptureError, CaptureResult};

/// Bytes per pixel of every buffer the engine touches (BGRA8).
pub const BYTES_PER_PIXEL: usize = 4;

/// Axis-aligned rectangle in physical (pre-rotation) source coordinates
/// describing a region that changed since the previous frame.
///
/// Edges are exclusive on the right and bottom. Rectangles reported by the
/// source are not trusted: they may be empty, inverted or extend past the
/// frame, and are clamped before use.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DirtyRect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl DirtyRect {
    pub const fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    /// Rectangle covering a whole `width`×`height` frame.
    pub fn covering(width: u32, height: u32) -> Self {
        Self {
            left: 0,
            top: 0,
            right: i32::try_from(width).unwrap_or(i32::MAX),
            bottom: i32::try_from(height).unwrap_or(i32::MAX),
        }
    }

    /// Clamp to `[0,width]×[0,height]`. Returns `None` for rectangles that
    /// are empty or inverted after clamping.
    pub(crate) fn clamp_to(self, width: u32, height: u32) -> Option<ClampedRect> {
        let clamp = |value: i32, max: u32| -> usize {
            if value <= 0 {
                0
            } else {
                (value as u32).min(max) as usize
            }
        };

        let left = clamp(self.left, width);
        let right = clamp(self.right, width);
        let top = clamp(self.top, height);
        let bottom = clamp(self.bottom, height);
        if left >= right || top >= bottom {
            return None;
        }

        Some(ClampedRect {
            left,
            top,
            right,
            bottom,
        })
    }
}

/// A dirty rectangle already clamped to the frame bounds and known to be
/// non-empty.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct ClampedRect {
    pub(crate) left: usize,
    pub(crate) top: usize,
    pub(crate) right: usize,
    pub(crate) bottom: usize,
}

impl ClampedRect {
    #[inline]
    pub(crate) fn width(self) -> usize {
        self.right - self.left
    }

    #[inline]
    pub(crate) fn height(self) -> usize {
        self.bottom - self.top
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SourcePoint {
    pub x: i32,
    pub y: i32,
}

/// A block of previous-frame content relocated from `source` to
/// `destination`. Not a content change.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MoveRect {
    pub source: SourcePoint,
    pub destination: DirtyRect,
}

/// Orientation of the captured output relative to the physical panel.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FrameRotation {
    #[default]
    Identity,
    Rotate90,
    Rotate180,
    Rotate270,
}

impl FrameRotation {
    #[inline]
    pub fn is_rotated(self) -> bool {
        !matches!(self, Self::Identity)
    }

    pub const fn degrees(self) -> u32 {
        match self {
            Self::Identity => 0,
            Self::Rotate90 => 90,
            Self::Rotate180 => 180,
            Self::Rotate270 => 270,
        }
    }
}

/// What the source handed back for the current frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpdateKind {
    /// Only a full image is available, no change metadata.
    FullImage,
    /// A full image plus dirty/move rectangle lists.
    IncrementalWithMetadata,
}

/// Read-only view of a mapped desktop image.
///
/// Borrowed from the source for the duration of one map/unmap scope and
/// never retained past it.
#[derive(Clone, Copy, Debug)]
pub struct FrameSnapshot<'a> {
    pub data: &'a [u8],
    pub row_pitch: usize,
    pub width: u32,
    pub height: u32,
    pub rotation: FrameRotation,
    pub update_kind: UpdateKind,
}

impl FrameSnapshot<'_> {
    /// Validate that `data` really holds `height` rows of `row_pitch` bytes
    /// and that each row is wide enough for `width` pixels.
    pub(crate) fn validate(&self) -> CaptureResult<()> {
        let row_bytes = row_bytes(self.width)?;
        if self.row_pitch < row_bytes {
            return Err(CaptureError::GeometryMismatch(format!(
                "row pitch {} is narrower than {} pixels",
                self.row_pitch, self.width
            )));
        }
        let required = self
            .row_pitch
            .checked_mul(self.height as usize)
            .ok_or(CaptureError::BufferOverflow)?;
        if self.data.len() < required {
            return Err(CaptureError::GeometryMismatch(format!(
                "source image holds {} bytes, {}x{} at pitch {} needs {required}",
                self.data.len(),
                self.width,
                self.height,
                self.row_pitch
            )));
        }
        Ok(())
    }
}

#[inline]
pub(crate) fn row_bytes(width: u32) -> CaptureResult<usize> {
    (width as usize)
        .checked_mul(BYTES_PER_PIXEL)
        .ok_or(CaptureError::BufferOverflow)
}

/// Bytes needed by a tightly packed BGRA buffer of `width`×`height`.
pub fn bgra_len(width: u32, height: u32) -> CaptureResult<usize> {
    row_bytes(width)?
        .checked_mul(height as usize)
        .ok_or(CaptureError::BufferOverflow)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamp_keeps_rects_inside_frame() {
        let rect = DirtyRect::new(10, 10, 20, 20).clamp_to(640, 480).unwrap();
        assert_eq!(
            rect,
            ClampedRect {
                left: 10,
                top: 10,
                right: 20,
                bottom: 20
            }
        );
        assert_eq!((rect.width(), rect.height()), (10, 10));
    }

    #[test]
    fn clamp_trims_partially_outside_rects() {
        let rect = DirtyRect::new(-5, 470, 700, 900).clamp_to(640, 480).unwrap();
        assert_eq!(
            rect,
            ClampedRect {
                left: 0,
                top: 470,
                right: 640,
                bottom: 480
            }
        );
    }

    #[test]
    fn clamp_rejects_empty_inverted_and_outside_rects() {
        assert!(DirtyRect::new(5, 5, 5, 10).clamp_to(640, 480).is_none());
        assert!(DirtyRect::new(30, 30, 10, 40).clamp_to(640, 480).is_none());
        assert!(DirtyRect::new(700, 10, 800, 20).clamp_to(640, 480).is_none());
        assert!(DirtyRect::new(-40, -40, -1, -1).clamp_to(640, 480).is_none());
    }

    #[test]
    fn snapshot_validation_checks_pitch_and_length() {
        let data = vec![0u8; 16 * 2];
        let snapshot = FrameSnapshot {
            data: &data,
            row_pitch: 16,
            width: 4,
            height: 2,
            rotation: FrameRotation::Identity,
            update_kind: UpdateKind::FullImage,
        };
        assert!(snapshot.validate().is_ok());

        let narrow = FrameSnapshot {
            row_pitch: 12,
            ..snapshot
        };
        assert!(matches!(
            narrow.validate(),
            Err(CaptureError::GeometryMismatch(_))
        ));

        let short = FrameSnapshot {
            height: 3,
            ..snapshot
        };
        assert!(matches!(
            short.validate(),
            Err(CaptureError::GeometryMismatch(_))
        ));
    }

    #[test]
    fn bgra_len_detects_overflow() {
        assert_eq!(bgra_len(640, 480).unwrap(), 640 * 480 * 4);
        assert!(matches!(
            bgra_len(u32::MAX, u32::MAX),
            Err(CaptureError::BufferOverflow)
        ));
    }
}
