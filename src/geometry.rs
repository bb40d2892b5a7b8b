use crate::error::{CaptureError, CaptureResult};
use crate::frame::row_bytes;

/// Rectangle in virtual-desktop coordinates, right/bottom exclusive.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DesktopRect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl DesktopRect {
    pub const fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    /// Reject inverted bounds. Empty bounds are allowed: they simply never
    /// contain the cursor.
    pub fn validated(self) -> CaptureResult<Self> {
        if self.right < self.left || self.bottom < self.top {
            return Err(CaptureError::InvalidConfig(format!(
                "inverted monitor bounds ({}, {}, {}, {})",
                self.left, self.top, self.right, self.bottom
            )));
        }
        Ok(self)
    }

    pub fn width(&self) -> u32 {
        self.right.saturating_sub(self.left).max(0) as u32
    }

    pub fn height(&self) -> u32 {
        self.bottom.saturating_sub(self.top).max(0) as u32
    }

    #[inline]
    pub fn contains(&self, x: i32, y: i32) -> bool {
        x >= self.left && x < self.right && y >= self.top && y < self.bottom
    }
}

/// Identity of a caller-owned destination buffer. Only the address and
/// length are compared, never the contents.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct DestinationId {
    address: usize,
    len: usize,
}

impl DestinationId {
    pub(crate) fn of(buffer: &[u8]) -> Self {
        Self {
            address: buffer.as_ptr() as usize,
            len: buffer.len(),
        }
    }
}

/// Derived per-frame layout values.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct FrameGeometry {
    /// Tightly packed destination row length in bytes for the physical frame.
    pub(crate) content_width: usize,
    /// Source row stride in bytes.
    pub(crate) source_row_width: usize,
    /// Logical desktop is taller than wide.
    pub(crate) is_vertical: bool,
    /// Logical and physical orientation disagree, so pixels must be transposed.
    pub(crate) orientation_swapped: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct GeometryKey {
    physical: (u32, u32),
    row_pitch: usize,
    logical: (u32, u32),
    destination: DestinationId,
}

/// Single-entry memo of the last frame/destination pair seen.
#[derive(Debug, Default)]
pub(crate) struct GeometryCache {
    entry: Option<(GeometryKey, FrameGeometry)>,
}

impl GeometryCache {
    pub(crate) fn resolve(
        &mut self,
        physical: (u32, u32),
        row_pitch: usize,
        logical: (u32, u32),
        destination: DestinationId,
    ) -> CaptureResult<FrameGeometry> {
        let key = GeometryKey {
            physical,
            row_pitch,
            logical,
            destination,
        };
        if let Some((cached_key, geometry)) = self.entry {
            if cached_key == key {
                return Ok(geometry);
            }
        }

        let geometry = compute_geometry(physical, row_pitch, logical)?;
        self.entry = Some((key, geometry));
        Ok(geometry)
    }

    pub(crate) fn invalidate(&mut self) {
        self.entry = None;
    }

    #[cfg(test)]
    fn is_cached(&self) -> bool {
        self.entry.is_some()
    }
}

fn compute_geometry(
    physical: (u32, u32),
    row_pitch: usize,
    logical: (u32, u32),
) -> CaptureResult<FrameGeometry> {
    let content_width = row_bytes(physical.0)?;
    let logical_known = logical.0 > 0 && logical.1 > 0;
    let is_vertical = logical_known && logical.0 < logical.1;
    let physical_is_vertical = physical.0 < physical.1;

    Ok(FrameGeometry {
        content_width,
        source_row_width: row_pitch,
        is_vertical,
        orientation_swapped: logical_known && is_vertical != physical_is_vertical,
    })
}
