//! OS capture sources.

#[cfg(not(target_os = "windows"))]
use crate::error::CaptureError;
use crate::error::CaptureResult;

#[cfg(target_os = "windows")]
pub(crate) mod windows;

#[cfg(target_os = "windows")]
pub use windows::DxgiDuplicationSource;

#[cfg(target_os = "windows")]
pub type DefaultSource = windows::DxgiDuplicationSource;

#[cfg(not(target_os = "windows"))]
pub type DefaultSource = UnsupportedSource;

/// Stand-in for platforms without desktop duplication. Never constructed.
#[cfg(not(target_os = "windows"))]
pub enum UnsupportedSource {}

#[cfg(not(target_os = "windows"))]
mod unsupported {
    use std::time::Duration;

    use super::UnsupportedSource;
    use crate::cursor::CursorPosition;
    use crate::error::CaptureResult;
    use crate::frame::{DirtyRect, MoveRect};
    use crate::geometry::DesktopRect;
    use crate::source::{AcquireOutcome, CaptureSource, MappedImage, MetadataFill, ShapeFill};

    impl CaptureSource for UnsupportedSource {
        fn acquire_frame(&mut self, _timeout: Duration) -> CaptureResult<AcquireOutcome> {
            match *self {}
        }

        fn release_frame(&mut self) -> CaptureResult<()> {
            match *self {}
        }

        fn move_rects(&mut self, _buffer: &mut [MoveRect]) -> CaptureResult<MetadataFill> {
            match *self {}
        }

        fn dirty_rects(&mut self, _buffer: &mut [DirtyRect]) -> CaptureResult<MetadataFill> {
            match *self {}
        }

        fn pointer_shape(&mut self, _buffer: &mut [u8]) -> CaptureResult<ShapeFill> {
            match *self {}
        }

        fn map_image(&mut self) -> CaptureResult<()> {
            match *self {}
        }

        fn mapped_image(&self) -> CaptureResult<MappedImage<'_>> {
            match *self {}
        }

        fn unmap_image(&mut self) -> CaptureResult<()> {
            match *self {}
        }

        fn output_bounds(&self) -> CaptureResult<DesktopRect> {
            match *self {}
        }

        fn cursor_position(&self) -> CaptureResult<CursorPosition> {
            match *self {}
        }
    }
}

/// Open duplication of the `index`-th desktop output.
#[cfg(target_os = "windows")]
pub fn open_output(index: usize) -> CaptureResult<DefaultSource> {
    windows::DxgiDuplicationSource::open(index)
}

#[cfg(not(target_os = "windows"))]
pub fn open_output(_index: usize) -> CaptureResult<DefaultSource> {
    Err(CaptureError::SourceUnavailable)
}

/// Open duplication of the primary desktop output.
pub fn open_default_source() -> CaptureResult<DefaultSource> {
    open_output(0)
}
