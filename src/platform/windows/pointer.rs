//! Repacks DXGI pointer shapes into the bitmap layouts [`crate::draw_cursor`]
//! reads.

use crate::cursor::{CursorShapeInfo, CursorShapeKind};
use crate::error::{CaptureError, CaptureResult};
use crate::frame::BYTES_PER_PIXEL;

/// `raw_info` is the shape exactly as DXGI reported it: monochrome
/// cursors carry both masks stacked, so their height is doubled.
pub(crate) fn normalize_shape(
    raw: &[u8],
    raw_info: CursorShapeInfo,
    out: &mut Vec<u8>,
) -> CaptureResult<CursorShapeInfo> {
    out.clear();
    match raw_info.kind {
        CursorShapeKind::Monochrome => repack_monochrome(raw, raw_info, out),
        CursorShapeKind::Color => {
            let len = plane_len(raw, raw_info)?;
            out.extend_from_slice(&raw[..len]);
            Ok(raw_info)
        }
        CursorShapeKind::MaskedColor => split_masked_color(raw, raw_info, out),
    }
}

fn plane_len(raw: &[u8], info: CursorShapeInfo) -> CaptureResult<usize> {
    let pitch = info.pitch as usize;
    if pitch < info.width as usize * BYTES_PER_PIXEL {
        return Err(CaptureError::GeometryMismatch(format!(
            "pointer pitch {pitch} is narrower than {} pixels",
            info.width
        )));
    }
    let len = pitch
        .checked_mul(info.height as usize)
        .ok_or(CaptureError::BufferOverflow)?;
    if raw.len() < len {
        return Err(CaptureError::GeometryMismatch(format!(
            "pointer shape holds {} bytes, {:?} shape needs {len}",
            raw.len(),
            info.kind
        )));
    }
    Ok(len)
}

fn repack_monochrome(
    raw: &[u8],
    raw_info: CursorShapeInfo,
    out: &mut Vec<u8>,
) -> CaptureResult<CursorShapeInfo> {
    let height = raw_info.height / 2;
    let pitch = raw_info.pitch as usize;
    let row_bytes = (raw_info.width as usize).div_ceil(8);
    if pitch < row_bytes || raw.len() < pitch * height as usize * 2 {
        return Err(CaptureError::GeometryMismatch(format!(
            "monochrome pointer of {}x{} does not fit {} bytes at pitch {pitch}",
            raw_info.width,
            raw_info.height,
            raw.len()
        )));
    }

    // AND rows then XOR rows, each trimmed to the packed row width.
    for row in 0..height as usize * 2 {
        let start = row * pitch;
        out.extend_from_slice(&raw[start..start + row_bytes]);
    }
    Ok(CursorShapeInfo {
        height,
        pitch: row_bytes as u32,
        ..raw_info
    })
}

/// DXGI stores the masked-color mask in the alpha byte: `0xFF` means the
/// pixel is combined with the screen, `0` means it replaces it. Screen
/// combined pixels become set bits in a trailing 1-bit AND mask and the
/// color plane is made opaque.
fn split_masked_color(
    raw: &[u8],
    raw_info: CursorShapeInfo,
    out: &mut Vec<u8>,
) -> CaptureResult<CursorShapeInfo> {
    let len = plane_len(raw, raw_info)?;
    let pitch = raw_info.pitch as usize;
    let width = raw_info.width as usize;
    let row_bytes = width.div_ceil(8);

    out.extend_from_slice(&raw[..len]);
    out.resize(len + row_bytes * raw_info.height as usize, 0);
    let (color, mask) = out.split_at_mut(len);
    for y in 0..raw_info.height as usize {
        for x in 0..width {
            let alpha = y * pitch + x * BYTES_PER_PIXEL + 3;
            if color[alpha] != 0 {
                mask[y * row_bytes + x / 8] |= 0x80 >> (x & 7);
            }
            color[alpha] = 0xFF;
        }
    }
    Ok(raw_info)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(kind: CursorShapeKind, width: u32, height: u32, pitch: u32) -> CursorShapeInfo {
        CursorShapeInfo {
            kind,
            width,
            height,
            pitch,
            hot_spot: (0, 0),
        }
    }

    #[test]
    fn monochrome_height_is_halved_and_rows_trimmed() {
        // 8x2 cursor, DXGI pitch 4: AND rows 0xF0, 0x0F then XOR rows 0xAA, 0x55.
        let raw = [
            0xF0, 0, 0, 0, 0x0F, 0, 0, 0, 0xAA, 0, 0, 0, 0x55, 0, 0, 0,
        ];
        let mut out = Vec::new();
        let normalized = normalize_shape(
            &raw,
            info(CursorShapeKind::Monochrome, 8, 4, 4),
            &mut out,
        )
        .unwrap();
        assert_eq!(normalized.height, 2);
        assert_eq!(normalized.pitch, 1);
        assert_eq!(out, vec![0xF0, 0x0F, 0xAA, 0x55]);
    }

    #[test]
    fn masked_color_alpha_becomes_and_mask() {
        // 2x1: first pixel replaces the screen, second is combined with it.
        let raw = [1, 2, 3, 0x00, 4, 5, 6, 0xFF];
        let mut out = Vec::new();
        let normalized = normalize_shape(
            &raw,
            info(CursorShapeKind::MaskedColor, 2, 1, 8),
            &mut out,
        )
        .unwrap();
        assert_eq!(normalized.height, 1);
        assert_eq!(out, vec![1, 2, 3, 0xFF, 4, 5, 6, 0xFF, 0b0100_0000]);
    }

    #[test]
    fn short_color_shape_is_rejected() {
        let mut out = Vec::new();
        let err = normalize_shape(&[0; 12], info(CursorShapeKind::Color, 2, 2, 8), &mut out)
            .unwrap_err();
        assert!(matches!(err, CaptureError::GeometryMismatch(_)));
    }
}
