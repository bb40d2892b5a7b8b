//! Interface to the thing that actually produces desktop frames.
//!
//! [`CaptureSource`] is implemented by the DXGI adapter on Windows and by
//! an in-memory fake in tests. The session never talks to the OS directly.

use std::time::Duration;

use tracing::warn;

use crate::cursor::{CursorPosition, CursorShapeInfo};
use crate::error::{CaptureError, CaptureResult};
use crate::frame::{DirtyRect, FrameRotation, MoveRect, UpdateKind};
use crate::geometry::DesktopRect;

/// Frame header returned by a successful acquire.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AcquiredFrame {
    pub width: u32,
    pub height: u32,
    pub rotation: FrameRotation,
    /// Desktop updates folded into this frame. Zero means only the pointer
    /// changed.
    pub accumulated_frames: u32,
    /// Dirty/move rectangle lists are available for this frame.
    pub has_metadata: bool,
    /// Bytes needed for a new pointer shape, zero when the shape is
    /// unchanged.
    pub pointer_shape_size: usize,
}

impl AcquiredFrame {
    #[inline]
    pub fn pointer_shape_updated(&self) -> bool {
        self.pointer_shape_size > 0
    }

    #[inline]
    pub fn update_kind(&self) -> UpdateKind {
        if self.has_metadata {
            UpdateKind::IncrementalWithMetadata
        } else {
            UpdateKind::FullImage
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AcquireOutcome {
    Acquired(AcquiredFrame),
    /// The timeout elapsed without a new frame.
    NoNewFrame,
}

/// Result of a variable-length metadata query.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MetadataFill {
    /// The first `n` entries of the buffer were written.
    Filled(usize),
    /// The buffer was too small; the source needs room for `n` entries.
    NeedsCapacity(usize),
}

/// Result of a pointer-shape query.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShapeFill {
    /// The first `n` bytes of the buffer hold the shape bitmap.
    Filled(CursorShapeInfo, usize),
    /// The buffer was too small; the source needs `n` bytes.
    NeedsCapacity(usize),
}

/// Borrowed view of the mapped desktop image.
#[derive(Clone, Copy, Debug)]
pub struct MappedImage<'a> {
    pub data: &'a [u8],
    pub row_pitch: usize,
}

pub trait CaptureSource {
    /// Wait up to `timeout` for the next desktop frame. A successful
    /// acquire must be paired with [`CaptureSource::release_frame`].
    fn acquire_frame(&mut self, timeout: Duration) -> CaptureResult<AcquireOutcome>;

    fn release_frame(&mut self) -> CaptureResult<()>;

    fn move_rects(&mut self, buffer: &mut [MoveRect]) -> CaptureResult<MetadataFill>;

    fn dirty_rects(&mut self, buffer: &mut [DirtyRect]) -> CaptureResult<MetadataFill>;

    fn pointer_shape(&mut self, buffer: &mut [u8]) -> CaptureResult<ShapeFill>;

    /// Make the acquired frame readable by the CPU. Paired with
    /// [`CaptureSource::unmap_image`].
    fn map_image(&mut self) -> CaptureResult<()>;

    /// The image mapped by the last [`CaptureSource::map_image`].
    fn mapped_image(&self) -> CaptureResult<MappedImage<'_>>;

    fn unmap_image(&mut self) -> CaptureResult<()>;

    /// Desktop coordinates of the captured output.
    fn output_bounds(&self) -> CaptureResult<DesktopRect>;

    fn cursor_position(&self) -> CaptureResult<CursorPosition>;
}

/// Releases the acquired frame when dropped.
pub(crate) struct AcquiredFrameGuard<'a, S: CaptureSource> {
    source: &'a mut S,
    frame: AcquiredFrame,
}

impl<'a, S: CaptureSource> AcquiredFrameGuard<'a, S> {
    pub(crate) fn new(source: &'a mut S, frame: AcquiredFrame) -> Self {
        Self { source, frame }
    }

    pub(crate) fn frame(&self) -> &AcquiredFrame {
        &self.frame
    }

    pub(crate) fn source(&self) -> &S {
        &*self.source
    }

    pub(crate) fn source_mut(&mut self) -> &mut S {
        &mut *self.source
    }

    /// Map the frame for reading. The returned guard borrows this one, so
    /// the image is always unmapped before the frame is released.
    pub(crate) fn map(&mut self) -> CaptureResult<MappedImageGuard<'_, S>> {
        self.source.map_image()?;
        Ok(MappedImageGuard {
            source: &mut *self.source,
        })
    }
}

impl<S: CaptureSource> Drop for AcquiredFrameGuard<'_, S> {
    fn drop(&mut self) {
        if let Err(err) = self.source.release_frame() {
            warn!(error = %err, "failed to release duplicated frame");
        }
    }
}

/// Unmaps the desktop image when dropped.
pub(crate) struct MappedImageGuard<'a, S: CaptureSource> {
    source: &'a mut S,
}

impl<S: CaptureSource> MappedImageGuard<'_, S> {
    pub(crate) fn image(&self) -> CaptureResult<MappedImage<'_>> {
        self.source.mapped_image()
    }
}

impl<S: CaptureSource> Drop for MappedImageGuard<'_, S> {
    fn drop(&mut self) {
        if let Err(err) = self.source.unmap_image() {
            warn!(error = %err, "failed to unmap desktop image");
        }
    }
}

pub(crate) enum Fetched<R> {
    Done(R, usize),
    Grow(usize),
}

/// Common shape of [`MetadataFill`] and [`ShapeFill`].
pub(crate) trait FillResult {
    type Output;

    fn into_fetched(self) -> Fetched<Self::Output>;
}

impl FillResult for MetadataFill {
    type Output = ();

    fn into_fetched(self) -> Fetched<()> {
        match self {
            Self::Filled(count) => Fetched::Done((), count),
            Self::NeedsCapacity(count) => Fetched::Grow(count),
        }
    }
}

impl FillResult for ShapeFill {
    type Output = CursorShapeInfo;

    fn into_fetched(self) -> Fetched<CursorShapeInfo> {
        match self {
            Self::Filled(info, len) => Fetched::Done(info, len),
            Self::NeedsCapacity(len) => Fetched::Grow(len),
        }
    }
}

/// Run a variable-length query against a retained scratch buffer.
///
/// The first attempt offers the larger of `hint` and the buffer's current
/// capacity. If the source asks for more, the buffer grows to the reported
/// size and the query runs exactly once more. On success the buffer is
/// truncated to the filled length; its allocation is kept for next time.
pub(crate) fn fetch_with_retry<T, F, Q>(
    scratch: &mut Vec<T>,
    hint: usize,
    operation: &'static str,
    mut query: Q,
) -> CaptureResult<F::Output>
where
    T: Clone + Default,
    F: FillResult,
    Q: FnMut(&mut [T]) -> CaptureResult<F>,
{
    let candidate = hint.max(scratch.capacity());
    scratch.clear();
    scratch.resize(candidate, T::default());

    let required = match query(scratch.as_mut_slice())?.into_fetched() {
        Fetched::Done(result, filled) => return finish(scratch, result, filled, operation),
        Fetched::Grow(required) => required,
    };

    scratch.clear();
    scratch.resize(required.max(candidate), T::default());
    match query(scratch.as_mut_slice())?.into_fetched() {
        Fetched::Done(result, filled) => finish(scratch, result, filled, operation),
        Fetched::Grow(again) => Err(CaptureError::source_failure(
            anyhow::anyhow!("source still needs {again} entries after growing to {required}"),
            operation,
        )),
    }
}

fn finish<T, R>(
    scratch: &mut Vec<T>,
    result: R,
    filled: usize,
    operation: &'static str,
) -> CaptureResult<R> {
    if filled > scratch.len() {
        return Err(CaptureError::source_failure(
            anyhow::anyhow!(
                "source reported {filled} entries for a buffer of {}",
                scratch.len()
            ),
            operation,
        ));
    }
    scratch.truncate(filled);
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake_source::{FakeFrame, FakeSource};

    #[test]
    fn fetch_succeeds_first_time_when_capacity_suffices() {
        let mut scratch: Vec<DirtyRect> = Vec::with_capacity(8);
        let mut calls = 0;
        fetch_with_retry(&mut scratch, 0, "dirty rects", |buffer: &mut [DirtyRect]| {
            calls += 1;
            buffer[0] = DirtyRect::new(1, 2, 3, 4);
            Ok(MetadataFill::Filled(1))
        })
        .unwrap();
        assert_eq!(calls, 1);
        assert_eq!(scratch, vec![DirtyRect::new(1, 2, 3, 4)]);
        assert!(scratch.capacity() >= 8);
    }

    #[test]
    fn fetch_grows_once_to_reported_capacity() {
        let mut scratch: Vec<DirtyRect> = Vec::new();
        let mut offered = Vec::new();
        fetch_with_retry(&mut scratch, 0, "dirty rects", |buffer: &mut [DirtyRect]| {
            offered.push(buffer.len());
            if buffer.len() < 3 {
                return Ok(MetadataFill::NeedsCapacity(3));
            }
            buffer[..3].fill(DirtyRect::new(0, 0, 1, 1));
            Ok(MetadataFill::Filled(3))
        })
        .unwrap();
        assert_eq!(offered, vec![0, 3]);
        assert_eq!(scratch.len(), 3);
    }

    #[test]
    fn second_shortfall_is_a_source_failure() {
        let mut scratch: Vec<u8> = Vec::new();
        let err = fetch_with_retry(&mut scratch, 16, "pointer shape", |buffer: &mut [u8]| {
            Ok(ShapeFill::NeedsCapacity(buffer.len() + 1))
        })
        .unwrap_err();
        assert!(matches!(err, CaptureError::SourceFailure(_)));
        assert!(err.to_string().contains("pointer shape"));
    }

    #[test]
    fn overstated_fill_is_rejected() {
        let mut scratch: Vec<DirtyRect> = Vec::with_capacity(2);
        let err = fetch_with_retry(&mut scratch, 0, "dirty rects", |_: &mut [DirtyRect]| {
            Ok(MetadataFill::Filled(5))
        })
        .unwrap_err();
        assert!(matches!(err, CaptureError::SourceFailure(_)));
    }

    #[test]
    fn guards_release_in_reverse_order() {
        let mut source = FakeSource::new(DesktopRect::new(0, 0, 4, 4));
        source.push_frame(FakeFrame::solid(4, 4, 0x11));
        let AcquireOutcome::Acquired(frame) =
            source.acquire_frame(Duration::from_millis(1)).unwrap()
        else {
            panic!("expected a frame");
        };

        {
            let mut guard = AcquiredFrameGuard::new(&mut source, frame);
            let mapped = guard.map().unwrap();
            assert_eq!(mapped.image().unwrap().data.len(), 64);
        }

        assert_eq!(source.counters.acquired, 1);
        assert_eq!(source.counters.released, 1);
        assert_eq!(source.counters.mapped, 1);
        assert_eq!(source.counters.unmapped, 1);
        assert_eq!(source.events(), ["acquire", "map", "unmap", "release"]);
    }
}
