//! Scripted in-memory [`CaptureSource`] used by unit tests.

use std::collections::VecDeque;
use std::time::Duration;

use crate::cursor::{CursorPosition, CursorShapeInfo};
use crate::error::{CaptureError, CaptureResult};
use crate::frame::{DirtyRect, FrameRotation, MoveRect};
use crate::geometry::DesktopRect;
use crate::source::{
    AcquireOutcome, AcquiredFrame, CaptureSource, MappedImage, MetadataFill, ShapeFill,
};

#[derive(Clone, Debug)]
pub(crate) struct FakeFrame {
    pub(crate) width: u32,
    pub(crate) height: u32,
    pub(crate) pitch: usize,
    pub(crate) data: Vec<u8>,
    pub(crate) rotation: FrameRotation,
    pub(crate) accumulated_frames: u32,
    /// `Some` when the frame carries change metadata.
    pub(crate) dirty: Option<Vec<DirtyRect>>,
    pub(crate) moves: Vec<MoveRect>,
    pub(crate) shape: Option<(CursorShapeInfo, Vec<u8>)>,
}

impl FakeFrame {
    /// Tightly packed frame with every byte set to `value`.
    pub(crate) fn solid(width: u32, height: u32, value: u8) -> Self {
        let pitch = width as usize * 4;
        Self {
            width,
            height,
            pitch,
            data: vec![value; pitch * height as usize],
            rotation: FrameRotation::Identity,
            accumulated_frames: 1,
            dirty: None,
            moves: Vec::new(),
            shape: None,
        }
    }

    /// Frame at `pitch` bytes per row whose pixels encode `(x, y, seed)`.
    pub(crate) fn patterned(width: u32, height: u32, pitch: usize, seed: u8) -> Self {
        let mut data = vec![0xEEu8; pitch * height as usize];
        for y in 0..height as usize {
            for x in 0..width as usize {
                let offset = y * pitch + x * 4;
                data[offset] = x as u8;
                data[offset + 1] = y as u8;
                data[offset + 2] = seed;
                data[offset + 3] = 0xFF;
            }
        }
        Self {
            pitch,
            data,
            ..Self::solid(width, height, 0)
        }
    }

    pub(crate) fn with_dirty(mut self, rects: &[DirtyRect]) -> Self {
        self.dirty = Some(rects.to_vec());
        self
    }

    pub(crate) fn with_moves(mut self, moves: &[MoveRect]) -> Self {
        self.moves = moves.to_vec();
        if self.dirty.is_none() {
            self.dirty = Some(Vec::new());
        }
        self
    }

    pub(crate) fn with_rotation(mut self, rotation: FrameRotation) -> Self {
        self.rotation = rotation;
        self
    }

    pub(crate) fn with_shape(mut self, info: CursorShapeInfo, bitmap: Vec<u8>) -> Self {
        self.shape = Some((info, bitmap));
        self
    }

    /// Only the pointer changed; no new desktop image.
    pub(crate) fn pointer_only(mut self) -> Self {
        self.accumulated_frames = 0;
        self
    }

    pub(crate) fn row(&self, y: usize) -> &[u8] {
        &self.data[y * self.pitch..y * self.pitch + self.width as usize * 4]
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct Counters {
    pub(crate) acquired: usize,
    pub(crate) released: usize,
    pub(crate) mapped: usize,
    pub(crate) unmapped: usize,
    pub(crate) dirty_queries: usize,
    pub(crate) move_queries: usize,
    pub(crate) shape_queries: usize,
}

#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct Failures {
    pub(crate) dirty_rects: bool,
    pub(crate) map: bool,
    pub(crate) cursor_position: bool,
    pub(crate) access_lost: bool,
    /// The frame is acquired, then rejected before the header is built.
    pub(crate) after_acquire: bool,
}

pub(crate) struct FakeSource {
    bounds: DesktopRect,
    queue: VecDeque<FakeFrame>,
    current: Option<FakeFrame>,
    mapped: bool,
    events: Vec<&'static str>,
    pub(crate) counters: Counters,
    pub(crate) fail: Failures,
    pub(crate) cursor: CursorPosition,
}

impl FakeSource {
    pub(crate) fn new(bounds: DesktopRect) -> Self {
        Self {
            bounds,
            queue: VecDeque::new(),
            current: None,
            mapped: false,
            events: Vec::new(),
            counters: Counters::default(),
            fail: Failures::default(),
            cursor: CursorPosition::default(),
        }
    }

    pub(crate) fn push_frame(&mut self, frame: FakeFrame) {
        self.queue.push_back(frame);
    }

    pub(crate) fn set_bounds(&mut self, bounds: DesktopRect) {
        self.bounds = bounds;
    }

    pub(crate) fn events(&self) -> &[&'static str] {
        &self.events
    }

    pub(crate) fn is_balanced(&self) -> bool {
        self.counters.acquired == self.counters.released
            && self.counters.mapped == self.counters.unmapped
            && self.current.is_none()
            && !self.mapped
    }

    fn current(&self) -> CaptureResult<&FakeFrame> {
        self.current.as_ref().ok_or_else(|| {
            CaptureError::source_failure(anyhow::anyhow!("no frame acquired"), "fake source")
        })
    }

    fn injected(operation: &'static str) -> CaptureError {
        CaptureError::source_failure(anyhow::anyhow!("injected failure"), operation)
    }
}

/// Copy as many of `items` as fit, reporting the shortfall the way DXGI does.
fn fill_from<T: Copy>(buffer: &mut [T], items: &[T]) -> MetadataFill {
    if buffer.len() < items.len() {
        return MetadataFill::NeedsCapacity(items.len());
    }
    buffer[..items.len()].copy_from_slice(items);
    MetadataFill::Filled(items.len())
}

impl CaptureSource for FakeSource {
    fn acquire_frame(&mut self, _timeout: Duration) -> CaptureResult<AcquireOutcome> {
        if self.fail.access_lost {
            self.fail.access_lost = false;
            return Err(CaptureError::AccessLost);
        }
        if self.current.is_some() {
            return Err(CaptureError::source_failure(
                anyhow::anyhow!("previous frame was never released"),
                "fake acquire",
            ));
        }
        let Some(frame) = self.queue.pop_front() else {
            return Ok(AcquireOutcome::NoNewFrame);
        };

        self.counters.acquired += 1;
        self.events.push("acquire");
        if self.fail.after_acquire {
            self.fail.after_acquire = false;
            self.current = Some(frame);
            self.release_frame()?;
            return Err(Self::injected("failed to cast acquired resource"));
        }
        let header = AcquiredFrame {
            width: frame.width,
            height: frame.height,
            rotation: frame.rotation,
            accumulated_frames: frame.accumulated_frames,
            has_metadata: frame.dirty.is_some(),
            pointer_shape_size: frame.shape.as_ref().map_or(0, |(_, bitmap)| bitmap.len()),
        };
        self.current = Some(frame);
        Ok(AcquireOutcome::Acquired(header))
    }

    fn release_frame(&mut self) -> CaptureResult<()> {
        if self.current.take().is_none() {
            return Err(Self::injected("release without acquire"));
        }
        self.counters.released += 1;
        self.events.push("release");
        Ok(())
    }

    fn move_rects(&mut self, buffer: &mut [MoveRect]) -> CaptureResult<MetadataFill> {
        self.counters.move_queries += 1;
        Ok(fill_from(buffer, &self.current()?.moves))
    }

    fn dirty_rects(&mut self, buffer: &mut [DirtyRect]) -> CaptureResult<MetadataFill> {
        self.counters.dirty_queries += 1;
        if self.fail.dirty_rects {
            return Err(Self::injected("failed to query dirty rects"));
        }
        let rects = self.current()?.dirty.as_deref().unwrap_or_default();
        Ok(fill_from(buffer, rects))
    }

    fn pointer_shape(&mut self, buffer: &mut [u8]) -> CaptureResult<ShapeFill> {
        self.counters.shape_queries += 1;
        let Some((info, bitmap)) = self.current()?.shape.as_ref() else {
            return Err(Self::injected("no pointer shape"));
        };
        if buffer.len() < bitmap.len() {
            return Ok(ShapeFill::NeedsCapacity(bitmap.len()));
        }
        buffer[..bitmap.len()].copy_from_slice(bitmap);
        Ok(ShapeFill::Filled(*info, bitmap.len()))
    }

    fn map_image(&mut self) -> CaptureResult<()> {
        self.current()?;
        if self.fail.map {
            return Err(Self::injected("failed to map desktop image"));
        }
        self.mapped = true;
        self.counters.mapped += 1;
        self.events.push("map");
        Ok(())
    }

    fn mapped_image(&self) -> CaptureResult<MappedImage<'_>> {
        let frame = self.current()?;
        if !self.mapped {
            return Err(Self::injected("image is not mapped"));
        }
        Ok(MappedImage {
            data: &frame.data,
            row_pitch: frame.pitch,
        })
    }

    fn unmap_image(&mut self) -> CaptureResult<()> {
        if !self.mapped {
            return Err(Self::injected("unmap without map"));
        }
        self.mapped = false;
        self.counters.unmapped += 1;
        self.events.push("unmap");
        Ok(())
    }

    fn output_bounds(&self) -> CaptureResult<DesktopRect> {
        Ok(self.bounds)
    }

    fn cursor_position(&self) -> CaptureResult<CursorPosition> {
        if self.fail.cursor_position {
            return Err(Self::injected("GetCursorInfo failed"));
        }
        Ok(self.cursor)
    }
}
