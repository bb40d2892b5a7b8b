//! Stride-aware copies from a mapped desktop image into a tightly packed
//! BGRA destination.

pub(crate) mod scalar;

use crate::error::{CaptureError, CaptureResult};
use crate::frame::{BYTES_PER_PIXEL, DirtyRect};

/// How rows are moved from source to destination.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum CopyPath {
    /// Source and destination strides match: one block copy.
    Contiguous,
    /// Both strides are 4-byte aligned: copy in pixel units.
    Pixels,
    /// Odd strides: plain byte copies per row.
    Bytes,
}

#[inline]
pub(crate) fn select_copy_path(src_row_pitch: usize, dst_row_width: usize) -> CopyPath {
    if src_row_pitch == dst_row_width {
        CopyPath::Contiguous
    } else if src_row_pitch % BYTES_PER_PIXEL == 0 && dst_row_width % BYTES_PER_PIXEL == 0 {
        CopyPath::Pixels
    } else {
        CopyPath::Bytes
    }
}

fn check_footprints(
    dst: &[u8],
    src: &[u8],
    src_row_pitch: usize,
    dst_row_width: usize,
    height: usize,
) -> CaptureResult<usize> {
    let required = dst_row_width
        .checked_mul(height)
        .ok_or(CaptureError::BufferOverflow)?;
    if dst.len() < required {
        return Err(CaptureError::InsufficientBuffer {
            required,
            actual: dst.len(),
        });
    }
    if height == 0 {
        return Ok(required);
    }

    if src_row_pitch < dst_row_width {
        return Err(CaptureError::GeometryMismatch(format!(
            "source pitch {src_row_pitch} is narrower than destination row {dst_row_width}"
        )));
    }
    let src_required = src_row_pitch
        .checked_mul(height - 1)
        .and_then(|rows| rows.checked_add(dst_row_width))
        .ok_or(CaptureError::BufferOverflow)?;
    if src.len() < src_required {
        return Err(CaptureError::GeometryMismatch(format!(
            "source image holds {} bytes, {height} rows at pitch {src_row_pitch} \
             need {src_required}",
            src.len()
        )));
    }
    Ok(required)
}

/// Copy `height` rows of `dst_row_width` bytes from `src` (stride
/// `src_row_pitch`) into the tightly packed `dst`.
///
/// Fails with [`CaptureError::InsufficientBuffer`] before touching `dst` if
/// it is shorter than `dst_row_width * height`.
pub fn copy_full_frame(
    dst: &mut [u8],
    src: &[u8],
    src_row_pitch: usize,
    dst_row_width: usize,
    height: usize,
) -> CaptureResult<()> {
    let required = check_footprints(dst, src, src_row_pitch, dst_row_width, height)?;
    if required == 0 {
        return Ok(());
    }

    match select_copy_path(src_row_pitch, dst_row_width) {
        CopyPath::Contiguous => dst[..required].copy_from_slice(&src[..required]),
        CopyPath::Pixels => {
            for (dst_row, src_row) in dst[..required]
                .chunks_exact_mut(dst_row_width)
                .zip(src.chunks(src_row_pitch))
            {
                scalar::copy_pixel_row(dst_row, &src_row[..dst_row_width]);
            }
        }
        CopyPath::Bytes => {
            for (dst_row, src_row) in dst[..required]
                .chunks_exact_mut(dst_row_width)
                .zip(src.chunks(src_row_pitch))
            {
                dst_row.copy_from_slice(&src_row[..dst_row_width]);
            }
        }
    }
    Ok(())
}

/// Copy only the rows covered by `rects` from `src` into `dst`, leaving
/// every other destination byte as it was.
///
/// Rectangles are clamped to the frame (`dst_row_width / 4` by `height`);
/// empty, inverted or fully outside rectangles are skipped. The buffer
/// size check runs once against the full-frame footprint, so this fails
/// exactly when [`copy_full_frame`] would. Returns the number of rectangles
/// that contributed pixels.
pub fn copy_dirty_regions(
    dst: &mut [u8],
    src: &[u8],
    src_row_pitch: usize,
    dst_row_width: usize,
    height: usize,
    rects: &[DirtyRect],
) -> CaptureResult<usize> {
    check_footprints(dst, src, src_row_pitch, dst_row_width, height)?;

    let width = u32::try_from(dst_row_width / BYTES_PER_PIXEL)
        .map_err(|_| CaptureError::BufferOverflow)?;
    let height_u32 = u32::try_from(height).map_err(|_| CaptureError::BufferOverflow)?;
    let pixel_path = src_row_pitch % BYTES_PER_PIXEL == 0 && dst_row_width % BYTES_PER_PIXEL == 0;

    let mut copied = 0usize;
    for rect in rects {
        let Some(clamped) = rect.clamp_to(width, height_u32) else {
            continue;
        };

        let row_len = clamped.width() * BYTES_PER_PIXEL;
        let column_offset = clamped.left * BYTES_PER_PIXEL;
        let mut src_start = clamped.top * src_row_pitch + column_offset;
        let mut dst_start = clamped.top * dst_row_width + column_offset;

        for _ in 0..clamped.height() {
            let dst_row = &mut dst[dst_start..dst_start + row_len];
            let src_row = &src[src_start..src_start + row_len];
            if pixel_path {
                scalar::copy_pixel_row(dst_row, src_row);
            } else {
                dst_row.copy_from_slice(src_row);
            }
            src_start += src_row_pitch;
            dst_start += dst_row_width;
        }
        copied += 1;
    }
    Ok(copied)
}
