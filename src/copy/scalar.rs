/// Copy `pixel_count` 4-byte pixels from `src` to `dst` in `u32` units.
///
/// # Safety
///
/// `src` must be valid for reads and `dst` valid for writes of
/// `pixel_count * 4` bytes, and the two ranges must not overlap. Neither
/// pointer needs to be 4-byte aligned.
pub(crate) unsafe fn copy_pixels_unchecked(src: *const u8, dst: *mut u8, pixel_count: usize) {
    let mut src_px = src as *const u32;
    let mut dst_px = dst as *mut u32;
    let mut remaining = pixel_count;

    while remaining >= 8 {
        unsafe {
            let p0 = std::ptr::read_unaligned(src_px);
            let p1 = std::ptr::read_unaligned(src_px.add(1));
            let p2 = std::ptr::read_unaligned(src_px.add(2));
            let p3 = std::ptr::read_unaligned(src_px.add(3));
            let p4 = std::ptr::read_unaligned(src_px.add(4));
            let p5 = std::ptr::read_unaligned(src_px.add(5));
            let p6 = std::ptr::read_unaligned(src_px.add(6));
            let p7 = std::ptr::read_unaligned(src_px.add(7));

            std::ptr::write_unaligned(dst_px, p0);
            std::ptr::write_unaligned(dst_px.add(1), p1);
            std::ptr::write_unaligned(dst_px.add(2), p2);
            std::ptr::write_unaligned(dst_px.add(3), p3);
            std::ptr::write_unaligned(dst_px.add(4), p4);
            std::ptr::write_unaligned(dst_px.add(5), p5);
            std::ptr::write_unaligned(dst_px.add(6), p6);
            std::ptr::write_unaligned(dst_px.add(7), p7);
        }

        src_px = unsafe { src_px.add(8) };
        dst_px = unsafe { dst_px.add(8) };
        remaining -= 8;
    }

    while remaining != 0 {
        unsafe {
            std::ptr::write_unaligned(dst_px, std::ptr::read_unaligned(src_px));
        }

        src_px = unsafe { src_px.add(1) };
        dst_px = unsafe { dst_px.add(1) };
        remaining -= 1;
    }
}

/// Safe wrapper over [`copy_pixels_unchecked`] for one row.
#[inline]
pub(crate) fn copy_pixel_row(dst: &mut [u8], src: &[u8]) {
    assert_eq!(dst.len(), src.len(), "pixel row length mismatch");
    debug_assert_eq!(dst.len() % 4, 0);
    // SAFETY: both slices are exactly `len` bytes long and a `&mut` slice
    // cannot alias a shared one.
    unsafe { copy_pixels_unchecked(src.as_ptr(), dst.as_mut_ptr(), dst.len() / 4) };
}

#[inline(always)]
pub(crate) fn read_pixel(bytes: &[u8], pixel_index: usize) -> u32 {
    let offset = pixel_index * 4;
    u32::from_le_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}

#[inline(always)]
pub(crate) fn write_pixel(bytes: &mut [u8], pixel_index: usize, pixel: u32) {
    let offset = pixel_index * 4;
    bytes[offset..offset + 4].copy_from_slice(&pixel.to_le_bytes());
}
