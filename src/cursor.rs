//! CPU cursor overlay for captured frames.
//!
//! The pointer shape arrives as a descriptor plus a raw bitmap whose layout
//! depends on [`CursorShapeKind`]:
//!
//! - `Monochrome`: AND mask then XOR mask, 1 bit per pixel, each row padded
//!   to `ceil(width / 8)` bytes, most significant bit first.
//! - `Color`: 4-byte BGRA pixels at `pitch` bytes per row, alpha in the top
//!   byte.
//! - `MaskedColor`: 4-byte pixels at `pitch` bytes per row followed by a
//!   1-bit AND mask laid out like the monochrome one.

use crate::copy::scalar::{read_pixel, write_pixel};
use crate::error::{CaptureError, CaptureResult};
use crate::frame::{BYTES_PER_PIXEL, DirtyRect};
use crate::geometry::DesktopRect;

const OPAQUE_BLACK: u32 = 0xFF00_0000;
const OPAQUE_WHITE: u32 = 0xFFFF_FFFF;
const ALPHA_MASK: u32 = 0xFF00_0000;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CursorShapeKind {
    Monochrome,
    Color,
    MaskedColor,
}

/// Pointer shape descriptor. `hot_spot` is the offset from the reported
/// pointer position to the bitmap origin.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CursorShapeInfo {
    pub kind: CursorShapeKind,
    pub width: u32,
    pub height: u32,
    pub pitch: u32,
    pub hot_spot: (i32, i32),
}

/// System pointer position in desktop coordinates.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CursorPosition {
    pub x: i32,
    pub y: i32,
    pub visible: bool,
}

/// Last pointer shape reported by the source.
///
/// The bitmap doubles as the scratch buffer for shape queries, so its
/// allocation is kept across updates.
#[derive(Debug, Default)]
pub(crate) struct CursorShape {
    info: Option<CursorShapeInfo>,
    bitmap: Vec<u8>,
}

impl CursorShape {
    pub(crate) fn info(&self) -> Option<&CursorShapeInfo> {
        self.info.as_ref()
    }

    pub(crate) fn bitmap(&self) -> &[u8] {
        &self.bitmap
    }

    pub(crate) fn scratch_mut(&mut self) -> &mut Vec<u8> {
        &mut self.bitmap
    }

    /// Accept a freshly fetched shape occupying the first `len` bytes of the
    /// scratch buffer.
    pub(crate) fn commit(&mut self, info: CursorShapeInfo, len: usize) {
        self.bitmap.truncate(len);
        self.info = Some(info);
    }

    /// Drop the descriptor after a failed fetch so a half-written bitmap is
    /// never drawn.
    pub(crate) fn invalidate(&mut self) {
        self.info = None;
        self.bitmap.clear();
    }
}

/// Cursor draw rectangle clipped to the destination, in shape-local pixels.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct ClippedCursor {
    origin_x: i64,
    origin_y: i64,
    left: usize,
    top: usize,
    right: usize,
    bottom: usize,
}

impl ClippedCursor {
    fn frame_rect(&self) -> DirtyRect {
        let edge = |origin: i64, offset: usize| (origin + offset as i64) as i32;
        DirtyRect::new(
            edge(self.origin_x, self.left),
            edge(self.origin_y, self.top),
            edge(self.origin_x, self.right),
            edge(self.origin_y, self.bottom),
        )
    }
}

fn clip_cursor(
    origin_x: i64,
    origin_y: i64,
    cursor_width: u32,
    cursor_height: u32,
    frame_width: u32,
    frame_height: u32,
) -> Option<ClippedCursor> {
    let (cw, ch) = (i64::from(cursor_width), i64::from(cursor_height));
    let (fw, fh) = (i64::from(frame_width), i64::from(frame_height));
    if origin_x + cw <= 0 || origin_x >= fw || origin_y + ch <= 0 || origin_y >= fh {
        return None;
    }

    let left = (-origin_x).max(0);
    let top = (-origin_y).max(0);
    let right = cw.min(fw - origin_x);
    let bottom = ch.min(fh - origin_y);
    if left >= right || top >= bottom {
        return None;
    }

    Some(ClippedCursor {
        origin_x,
        origin_y,
        left: left as usize,
        top: top as usize,
        right: right as usize,
        bottom: bottom as usize,
    })
}

#[inline]
fn mask_row_bytes(width: u32) -> usize {
    (width as usize).div_ceil(8)
}

#[inline(always)]
fn mask_bit(mask: &[u8], row_bytes: usize, x: usize, y: usize) -> bool {
    let byte = mask[y * row_bytes + x / 8];
    (byte >> (7 - (x & 7))) & 1 == 1
}

/// Per-channel linear blend of `fg` over `bg`; output alpha is opaque.
#[inline(always)]
fn blend(bg: u32, fg: u32, alpha: u32) -> u32 {
    let inv = 255 - alpha;
    let channel = |shift: u32| {
        let b = (bg >> shift) & 0xFF;
        let f = (fg >> shift) & 0xFF;
        ((b * inv + f * alpha) / 255) << shift
    };
    channel(0) | channel(8) | channel(16) | ALPHA_MASK
}

fn bitmap_too_small(kind: CursorShapeKind, required: usize, actual: usize) -> CaptureError {
    CaptureError::GeometryMismatch(format!(
        "{kind:?} cursor bitmap holds {actual} bytes, shape needs {required}"
    ))
}

fn color_plane_len(info: &CursorShapeInfo) -> CaptureResult<usize> {
    let pitch = info.pitch as usize;
    let row = (info.width as usize) * BYTES_PER_PIXEL;
    if pitch < row {
        return Err(CaptureError::GeometryMismatch(format!(
            "cursor pitch {pitch} is narrower than {} pixels",
            info.width
        )));
    }
    pitch
        .checked_mul(info.height as usize)
        .ok_or(CaptureError::BufferOverflow)
}

/// Composite the cursor onto `buffer`, a tightly packed `width`×`height`
/// BGRA frame covering `bounds` of the desktop.
///
/// Returns the frame rectangle the cursor covered, or `None` when nothing
/// needed drawing: the pointer is hidden, outside `bounds`, zero-sized or
/// fully off the frame. Malformed shape data is reported as
/// [`CaptureError::GeometryMismatch`] before any pixel is written.
pub fn draw_cursor(
    buffer: &mut [u8],
    width: u32,
    height: u32,
    shape: &CursorShapeInfo,
    bitmap: &[u8],
    position: CursorPosition,
    bounds: DesktopRect,
) -> CaptureResult<Option<DirtyRect>> {
    if !position.visible || !bounds.contains(position.x, position.y) {
        return Ok(None);
    }
    if shape.width == 0 || shape.height == 0 {
        return Ok(None);
    }

    let frame_len = crate::frame::bgra_len(width, height)?;
    if buffer.len() < frame_len {
        return Err(CaptureError::InsufficientBuffer {
            required: frame_len,
            actual: buffer.len(),
        });
    }

    let origin_x = i64::from(position.x) - i64::from(bounds.left) - i64::from(shape.hot_spot.0);
    let origin_y = i64::from(position.y) - i64::from(bounds.top) - i64::from(shape.hot_spot.1);
    let Some(clip) = clip_cursor(origin_x, origin_y, shape.width, shape.height, width, height)
    else {
        return Ok(None);
    };

    let frame = &mut buffer[..frame_len];
    match shape.kind {
        CursorShapeKind::Monochrome => draw_monochrome(frame, width, shape, bitmap, clip)?,
        CursorShapeKind::Color => draw_color(frame, width, shape, bitmap, clip)?,
        CursorShapeKind::MaskedColor => draw_masked_color(frame, width, shape, bitmap, clip)?,
    }
    Ok(Some(clip.frame_rect()))
}

#[inline(always)]
fn frame_index(clip: &ClippedCursor, frame_width: u32, x: usize, y: usize) -> usize {
    let fx = (clip.origin_x + x as i64) as usize;
    let fy = (clip.origin_y + y as i64) as usize;
    fy * frame_width as usize + fx
}

fn draw_monochrome(
    frame: &mut [u8],
    frame_width: u32,
    shape: &CursorShapeInfo,
    bitmap: &[u8],
    clip: ClippedCursor,
) -> CaptureResult<()> {
    let row_bytes = mask_row_bytes(shape.width);
    let mask_len = row_bytes * shape.height as usize;
    if bitmap.len() < mask_len * 2 {
        return Err(bitmap_too_small(shape.kind, mask_len * 2, bitmap.len()));
    }
    let (and_mask, rest) = bitmap.split_at(mask_len);
    let xor_mask = &rest[..mask_len];

    for y in clip.top..clip.bottom {
        for x in clip.left..clip.right {
            if !mask_bit(and_mask, row_bytes, x, y) {
                continue;
            }
            let pixel = if mask_bit(xor_mask, row_bytes, x, y) {
                OPAQUE_WHITE
            } else {
                OPAQUE_BLACK
            };
            write_pixel(frame, frame_index(&clip, frame_width, x, y), pixel);
        }
    }
    Ok(())
}

fn draw_color(
    frame: &mut [u8],
    frame_width: u32,
    shape: &CursorShapeInfo,
    bitmap: &[u8],
    clip: ClippedCursor,
) -> CaptureResult<()> {
    let pitch = shape.pitch as usize;
    let required = color_plane_len(shape)?;
    if bitmap.len() < required {
        return Err(bitmap_too_small(shape.kind, required, bitmap.len()));
    }

    for y in clip.top..clip.bottom {
        let row = &bitmap[y * pitch..];
        for x in clip.left..clip.right {
            let cursor_pixel = read_pixel(row, x);
            let alpha = cursor_pixel >> 24;
            if alpha == 0 {
                continue;
            }

            let index = frame_index(&clip, frame_width, x, y);
            let out = if alpha == 255 {
                cursor_pixel | ALPHA_MASK
            } else {
                blend(read_pixel(frame, index), cursor_pixel, alpha)
            };
            write_pixel(frame, index, out);
        }
    }
    Ok(())
}

fn draw_masked_color(
    frame: &mut [u8],
    frame_width: u32,
    shape: &CursorShapeInfo,
    bitmap: &[u8],
    clip: ClippedCursor,
) -> CaptureResult<()> {
    let pitch = shape.pitch as usize;
    let color_len = color_plane_len(shape)?;
    let row_bytes = mask_row_bytes(shape.width);
    let required = color_len + row_bytes * shape.height as usize;
    if bitmap.len() < required {
        return Err(bitmap_too_small(shape.kind, required, bitmap.len()));
    }
    let (color, and_mask) = bitmap.split_at(color_len);

    for y in clip.top..clip.bottom {
        let row = &color[y * pitch..];
        for x in clip.left..clip.right {
            if mask_bit(and_mask, row_bytes, x, y) {
                continue;
            }
            write_pixel(frame, frame_index(&clip, frame_width, x, y), read_pixel(row, x));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const BG: u32 = 0xFF10_2030;

    fn frame(width: u32, height: u32) -> Vec<u8> {
        let mut buffer = vec![0u8; (width * height * 4) as usize];
        for index in 0..(width * height) as usize {
            write_pixel(&mut buffer, index, BG);
        }
        buffer
    }

    fn pixel(buffer: &[u8], width: u32, x: u32, y: u32) -> u32 {
        read_pixel(buffer, (y * width + x) as usize)
    }

    fn color_shape(width: u32, height: u32) -> CursorShapeInfo {
        CursorShapeInfo {
            kind: CursorShapeKind::Color,
            width,
            height,
            pitch: width * 4,
            hot_spot: (0, 0),
        }
    }

    fn visible_at(x: i32, y: i32) -> CursorPosition {
        CursorPosition { x, y, visible: true }
    }

    #[test]
    fn color_alpha_boundaries() {
        let shape = color_shape(3, 1);
        let mut bitmap = vec![0u8; 12];
        write_pixel(&mut bitmap, 0, 0x00FF_FFFF);
        write_pixel(&mut bitmap, 1, 0xFF11_2233);
        write_pixel(&mut bitmap, 2, 0x80FF_6400);

        let mut buffer = frame(4, 4);
        let bounds = DesktopRect::new(0, 0, 4, 4);
        let drawn = draw_cursor(&mut buffer, 4, 4, &shape, &bitmap, visible_at(0, 0), bounds)
            .unwrap();
        assert_eq!(drawn, Some(DirtyRect::new(0, 0, 3, 1)));

        assert_eq!(pixel(&buffer, 4, 0, 0), BG);
        assert_eq!(pixel(&buffer, 4, 1, 0), 0xFF11_2233);

        let blended = pixel(&buffer, 4, 2, 0);
        let expect = |bg: u32, fg: u32| (bg * 127 + fg * 128) / 255;
        let channel = |value: u32, shift: u32| (value >> shift) & 0xFF;
        assert_eq!(channel(blended, 0), expect(0x30, 0x00));
        assert_eq!(channel(blended, 8), expect(0x20, 0x64));
        assert_eq!(channel(blended, 16), expect(0x10, 0xFF));
        assert_eq!(blended >> 24, 0xFF);
        // Untouched neighbours.
        assert_eq!(pixel(&buffer, 4, 3, 0), BG);
        assert_eq!(pixel(&buffer, 4, 0, 1), BG);
    }

    #[test]
    fn half_alpha_is_close_to_linear_blend() {
        assert_eq!(blend(0xFF00_0000, 0x80FF_FFFF, 128) & 0xFF, 128);
        let value = blend(0xFF00_00C8, 0x8000_0064, 128) & 0xFF;
        let exact = (200.0 * 127.0 + 100.0 * 128.0) / 255.0;
        assert!((f64::from(value) - exact).abs() < 1.0);
    }

    #[test]
    fn monochrome_and_xor_rules() {
        // Row 0: AND=1,0 XOR=1,1 -> white, skipped.
        // Row 1: AND=1,1 XOR=0,1 -> black, white.
        let shape = CursorShapeInfo {
            kind: CursorShapeKind::Monochrome,
            width: 2,
            height: 2,
            pitch: 1,
            hot_spot: (0, 0),
        };
        let bitmap: [u8; 4] = [0b1000_0000, 0b1100_0000, 0b1100_0000, 0b0100_0000];
        let mut buffer = frame(3, 3);
        draw_cursor(
            &mut buffer,
            3,
            3,
            &shape,
            &bitmap,
            visible_at(1, 1),
            DesktopRect::new(0, 0, 3, 3),
        )
        .unwrap();

        assert_eq!(pixel(&buffer, 3, 1, 1), OPAQUE_WHITE);
        assert_eq!(pixel(&buffer, 3, 2, 1), BG);
        assert_eq!(pixel(&buffer, 3, 1, 2), OPAQUE_BLACK);
        assert_eq!(pixel(&buffer, 3, 2, 2), OPAQUE_WHITE);
        assert_eq!(pixel(&buffer, 3, 0, 0), BG);
    }

    #[test]
    fn monochrome_reads_bits_past_the_first_byte() {
        // 10 pixels wide, so each mask row spans two bytes.
        let shape = CursorShapeInfo {
            kind: CursorShapeKind::Monochrome,
            width: 10,
            height: 1,
            pitch: 2,
            hot_spot: (0, 0),
        };
        let bitmap: [u8; 4] = [0x00, 0b0100_0000, 0x00, 0b0100_0000];
        let mut buffer = frame(12, 1);
        draw_cursor(
            &mut buffer,
            12,
            1,
            &shape,
            &bitmap,
            visible_at(0, 0),
            DesktopRect::new(0, 0, 12, 1),
        )
        .unwrap();
        for x in 0..12 {
            let expected = if x == 9 { OPAQUE_WHITE } else { BG };
            assert_eq!(pixel(&buffer, 12, x, 0), expected, "pixel {x}");
        }
    }

    #[test]
    fn masked_color_overwrites_only_where_and_is_clear() {
        let shape = CursorShapeInfo {
            kind: CursorShapeKind::MaskedColor,
            width: 2,
            height: 1,
            pitch: 8,
            hot_spot: (0, 0),
        };
        let mut bitmap = vec![0u8; 8 + 1];
        write_pixel(&mut bitmap, 0, 0x0012_3456);
        write_pixel(&mut bitmap, 1, 0x00AB_CDEF);
        bitmap[8] = 0b0100_0000;

        let mut buffer = frame(2, 1);
        draw_cursor(
            &mut buffer,
            2,
            1,
            &shape,
            &bitmap,
            visible_at(0, 0),
            DesktopRect::new(0, 0, 2, 1),
        )
        .unwrap();
        assert_eq!(pixel(&buffer, 2, 0, 0), 0x0012_3456);
        assert_eq!(pixel(&buffer, 2, 1, 0), BG);
    }

    #[test]
    fn cursor_is_clipped_at_frame_edges() {
        let shape = CursorShapeInfo {
            hot_spot: (1, 1),
            ..color_shape(3, 3)
        };
        let mut bitmap = vec![0u8; 36];
        for index in 0..9 {
            write_pixel(&mut bitmap, index, 0xFF00_FF00 | index as u32);
        }

        // Pointer at the bottom-right pixel of a 4x4 monitor at (100, 50).
        let bounds = DesktopRect::new(100, 50, 104, 54);
        let mut buffer = frame(4, 4);
        let drawn =
            draw_cursor(&mut buffer, 4, 4, &shape, &bitmap, visible_at(103, 53), bounds).unwrap();
        assert_eq!(drawn, Some(DirtyRect::new(2, 2, 4, 4)));

        // Origin is (2, 2); shape pixels (0..2, 0..2) land inside.
        assert_eq!(pixel(&buffer, 4, 2, 2), 0xFF00_FF00);
        assert_eq!(pixel(&buffer, 4, 3, 2), 0xFF00_FF01);
        assert_eq!(pixel(&buffer, 4, 2, 3), 0xFF00_FF03);
        assert_eq!(pixel(&buffer, 4, 3, 3), 0xFF00_FF04);
        assert_eq!(pixel(&buffer, 4, 1, 1), BG);
        assert_eq!(buffer.len(), 64);
    }

    #[test]
    fn negative_origin_clips_top_left() {
        let shape = CursorShapeInfo {
            hot_spot: (2, 2),
            ..color_shape(3, 3)
        };
        let mut bitmap = vec![0u8; 36];
        for index in 0..9 {
            write_pixel(&mut bitmap, index, 0xFF00_0000 | index as u32);
        }
        let mut buffer = frame(4, 4);
        draw_cursor(
            &mut buffer,
            4,
            4,
            &shape,
            &bitmap,
            visible_at(0, 0),
            DesktopRect::new(0, 0, 4, 4),
        )
        .unwrap();
        assert_eq!(pixel(&buffer, 4, 0, 0), 0xFF00_0008);
        assert_eq!(pixel(&buffer, 4, 1, 0), BG);
        assert_eq!(pixel(&buffer, 4, 0, 1), BG);
    }

    #[test]
    fn monochrome_clipped_at_negative_origin_reads_absolute_columns() {
        // Origin lands at x = -9, so frame column 0 is shape column 9.
        let shape = CursorShapeInfo {
            kind: CursorShapeKind::Monochrome,
            width: 16,
            height: 1,
            pitch: 2,
            hot_spot: (9, 0),
        };
        let bitmap: [u8; 4] = [0x00, 0xFF, 0x00, 0b0101_0000];
        let mut buffer = frame(8, 1);
        let drawn = draw_cursor(
            &mut buffer,
            8,
            1,
            &shape,
            &bitmap,
            visible_at(0, 0),
            DesktopRect::new(0, 0, 8, 1),
        )
        .unwrap();
        assert_eq!(drawn, Some(DirtyRect::new(0, 0, 7, 1)));

        let expected = [
            OPAQUE_WHITE,
            OPAQUE_BLACK,
            OPAQUE_WHITE,
            OPAQUE_BLACK,
            OPAQUE_BLACK,
            OPAQUE_BLACK,
            OPAQUE_BLACK,
            BG,
        ];
        for (x, want) in expected.into_iter().enumerate() {
            assert_eq!(pixel(&buffer, 8, x as u32, 0), want, "pixel {x}");
        }
    }

    #[test]
    fn masked_color_clipped_at_negative_origin_reads_absolute_columns() {
        let shape = CursorShapeInfo {
            kind: CursorShapeKind::MaskedColor,
            width: 16,
            height: 1,
            pitch: 64,
            hot_spot: (9, 0),
        };
        let mut bitmap = vec![0u8; 64 + 2];
        for index in 0..16 {
            write_pixel(&mut bitmap, index, 0x00AB_0000 | index as u32);
        }
        // Shape columns 0..8 and 10 keep the screen.
        bitmap[64] = 0xFF;
        bitmap[65] = 0b0010_0000;

        let mut buffer = frame(8, 1);
        draw_cursor(
            &mut buffer,
            8,
            1,
            &shape,
            &bitmap,
            visible_at(0, 0),
            DesktopRect::new(0, 0, 8, 1),
        )
        .unwrap();

        assert_eq!(pixel(&buffer, 8, 0, 0), 0x00AB_0009);
        assert_eq!(pixel(&buffer, 8, 1, 0), BG);
        for x in 2..7 {
            assert_eq!(pixel(&buffer, 8, x, 0), 0x00AB_0000 | (x + 9), "pixel {x}");
        }
        assert_eq!(pixel(&buffer, 8, 7, 0), BG);
    }

    #[test]
    fn hidden_or_outside_cursor_is_not_drawn() {
        let shape = color_shape(1, 1);
        let bitmap = 0xFFFF_FFFFu32.to_le_bytes();
        let bounds = DesktopRect::new(0, 0, 2, 2);
        let mut buffer = frame(2, 2);

        let hidden = CursorPosition {
            x: 0,
            y: 0,
            visible: false,
        };
        assert!(draw_cursor(&mut buffer, 2, 2, &shape, &bitmap, hidden, bounds)
            .unwrap()
            .is_none());
        assert!(draw_cursor(&mut buffer, 2, 2, &shape, &bitmap, visible_at(2, 0), bounds)
            .unwrap()
            .is_none());

        let far_hotspot = CursorShapeInfo {
            hot_spot: (-10, -10),
            ..shape
        };
        assert!(
            draw_cursor(&mut buffer, 2, 2, &far_hotspot, &bitmap, visible_at(0, 0), bounds)
                .unwrap()
                .is_none()
        );
        assert!(buffer.chunks_exact(4).all(|px| px == BG.to_le_bytes()));
    }

    #[test]
    fn short_bitmap_is_reported_not_drawn() {
        let shape = color_shape(4, 4);
        let bitmap = vec![0xFFu8; 40];
        let mut buffer = frame(4, 4);
        let err = draw_cursor(
            &mut buffer,
            4,
            4,
            &shape,
            &bitmap,
            visible_at(0, 0),
            DesktopRect::new(0, 0, 4, 4),
        )
        .unwrap_err();
        assert!(matches!(err, CaptureError::GeometryMismatch(_)));
        assert!(buffer.chunks_exact(4).all(|px| px == BG.to_le_bytes()));
    }

    #[test]
    fn retained_shape_commit_and_invalidate() {
        let mut shape = CursorShape::default();
        shape.scratch_mut().resize(64, 0xAA);
        shape.commit(color_shape(2, 2), 16);
        assert_eq!(shape.bitmap().len(), 16);
        assert_eq!(shape.info().map(|info| info.width), Some(2));

        shape.invalidate();
        assert!(shape.info().is_none());
        assert!(shape.bitmap().is_empty());
    }
}
