use std::time::Duration;

use anyhow::Context;
use tracing::{debug, info, warn};
use windows::Win32::Foundation::RECT;
use windows::Win32::Graphics::Direct3D11::{
    D3D11_CPU_ACCESS_READ, D3D11_MAP_READ, D3D11_MAPPED_SUBRESOURCE, D3D11_TEXTURE2D_DESC,
    D3D11_USAGE_STAGING, ID3D11Device, ID3D11DeviceContext, ID3D11Resource, ID3D11Texture2D,
};
use windows::Win32::Graphics::Dxgi::Common::{
    DXGI_FORMAT_B8G8R8A8_UNORM, DXGI_MODE_ROTATION, DXGI_MODE_ROTATION_ROTATE90,
    DXGI_MODE_ROTATION_ROTATE180, DXGI_MODE_ROTATION_ROTATE270, DXGI_SAMPLE_DESC,
};
use windows::Win32::Graphics::Dxgi::{
    DXGI_ERROR_ACCESS_LOST, DXGI_ERROR_MORE_DATA, DXGI_ERROR_WAIT_TIMEOUT,
    DXGI_OUTDUPL_DESC, DXGI_OUTDUPL_FRAME_INFO, DXGI_OUTDUPL_MOVE_RECT,
    DXGI_OUTDUPL_POINTER_SHAPE_INFO, DXGI_OUTDUPL_POINTER_SHAPE_TYPE_COLOR,
    DXGI_OUTDUPL_POINTER_SHAPE_TYPE_MASKED_COLOR, DXGI_OUTDUPL_POINTER_SHAPE_TYPE_MONOCHROME,
    IDXGIOutput, IDXGIOutput1, IDXGIOutput5, IDXGIOutputDuplication, IDXGIResource,
};
use windows::Win32::UI::WindowsAndMessaging::{CURSOR_SHOWING, CURSORINFO, GetCursorInfo};
use windows::core::Interface;

use crate::cursor::{CursorPosition, CursorShapeInfo, CursorShapeKind};
use crate::error::{CaptureError, CaptureResult};
use crate::frame::{DirtyRect, FrameRotation, MoveRect, SourcePoint};
use crate::geometry::DesktopRect;
use crate::source::{
    AcquireOutcome, AcquiredFrame, CaptureSource, MappedImage, MetadataFill, ShapeFill,
    fetch_with_retry,
};

use super::d3d11;
use super::output::{self, AttachedOutput};
use super::pointer;

fn create_duplication(
    output: &IDXGIOutput,
    device: &ID3D11Device,
) -> CaptureResult<IDXGIOutputDuplication> {
    if let Ok(output5) = output.cast::<IDXGIOutput5>() {
        let formats = [DXGI_FORMAT_B8G8R8A8_UNORM];
        if let Ok(duplication) = unsafe { output5.DuplicateOutput1(device, 0, &formats) } {
            return Ok(duplication);
        }
    }

    let output1: IDXGIOutput1 = output
        .cast()
        .context("failed to query IDXGIOutput1")
        .map_err(CaptureError::SourceFailure)?;
    unsafe { output1.DuplicateOutput(device) }
        .context("DuplicateOutput failed")
        .map_err(CaptureError::SourceFailure)
}

fn frame_rotation(rotation: DXGI_MODE_ROTATION) -> FrameRotation {
    match rotation {
        DXGI_MODE_ROTATION_ROTATE90 => FrameRotation::Rotate90,
        DXGI_MODE_ROTATION_ROTATE180 => FrameRotation::Rotate180,
        DXGI_MODE_ROTATION_ROTATE270 => FrameRotation::Rotate270,
        _ => FrameRotation::Identity,
    }
}

fn shape_kind(raw_type: u32) -> CaptureResult<CursorShapeKind> {
    match raw_type {
        t if t == DXGI_OUTDUPL_POINTER_SHAPE_TYPE_MONOCHROME.0 as u32 => {
            Ok(CursorShapeKind::Monochrome)
        }
        t if t == DXGI_OUTDUPL_POINTER_SHAPE_TYPE_COLOR.0 as u32 => Ok(CursorShapeKind::Color),
        t if t == DXGI_OUTDUPL_POINTER_SHAPE_TYPE_MASKED_COLOR.0 as u32 => {
            Ok(CursorShapeKind::MaskedColor)
        }
        other => Err(CaptureError::source_failure(
            anyhow::anyhow!("unknown pointer shape type {other}"),
            "GetFramePointerShape",
        )),
    }
}

/// Byte size DXGI expects for `count` metadata entries of type `T`.
fn metadata_bytes<T>(count: usize) -> CaptureResult<u32> {
    count
        .checked_mul(std::mem::size_of::<T>())
        .and_then(|bytes| u32::try_from(bytes).ok())
        .ok_or(CaptureError::BufferOverflow)
}

/// Map a byte-sized DXGI metadata result onto entry counts.
fn metadata_fill<T>(
    result: windows::core::Result<()>,
    required_bytes: u32,
    operation: &'static str,
) -> CaptureResult<MetadataFill> {
    let count = required_bytes as usize / std::mem::size_of::<T>();
    match result {
        Ok(()) => Ok(MetadataFill::Filled(count)),
        Err(e) if e.code() == DXGI_ERROR_MORE_DATA => Ok(MetadataFill::NeedsCapacity(count)),
        Err(e) if e.code() == DXGI_ERROR_ACCESS_LOST => Err(CaptureError::AccessLost),
        Err(e) => Err(CaptureError::source_failure(e, operation)),
    }
}

fn query_pointer_shape(
    duplication: &IDXGIOutputDuplication,
    buffer: &mut [u8],
) -> CaptureResult<ShapeFill> {
    let size = metadata_bytes::<u8>(buffer.len())?;
    let mut required = 0u32;
    let mut info = DXGI_OUTDUPL_POINTER_SHAPE_INFO::default();
    let result = unsafe {
        duplication.GetFramePointerShape(
            size,
            buffer.as_mut_ptr() as *mut _,
            &mut required,
            &mut info,
        )
    };
    match result {
        Ok(()) => Ok(ShapeFill::Filled(
            CursorShapeInfo {
                kind: shape_kind(info.Type)?,
                width: info.Width,
                height: info.Height,
                pitch: info.Pitch,
                hot_spot: (info.HotSpot.x, info.HotSpot.y),
            },
            required as usize,
        )),
        Err(e) if e.code() == DXGI_ERROR_MORE_DATA => {
            Ok(ShapeFill::NeedsCapacity(required as usize))
        }
        Err(e) if e.code() == DXGI_ERROR_ACCESS_LOST => Err(CaptureError::AccessLost),
        Err(e) => Err(CaptureError::source_failure(e, "GetFramePointerShape failed")),
    }
}

fn ensure_staging_texture<'a>(
    device: &ID3D11Device,
    staging: &'a mut Option<ID3D11Texture2D>,
    src: &D3D11_TEXTURE2D_DESC,
) -> CaptureResult<&'a ID3D11Texture2D> {
    let reusable = staging.as_ref().is_some_and(|existing| {
        let mut desc = D3D11_TEXTURE2D_DESC::default();
        unsafe { existing.GetDesc(&mut desc) };
        desc.Width == src.Width && desc.Height == src.Height && desc.Format == src.Format
    });

    if !reusable {
        let desc = D3D11_TEXTURE2D_DESC {
            Width: src.Width,
            Height: src.Height,
            MipLevels: 1,
            ArraySize: 1,
            Format: src.Format,
            SampleDesc: DXGI_SAMPLE_DESC {
                Count: 1,
                Quality: 0,
            },
            Usage: D3D11_USAGE_STAGING,
            BindFlags: Default::default(),
            CPUAccessFlags: D3D11_CPU_ACCESS_READ.0 as u32,
            MiscFlags: Default::default(),
        };

        let mut texture: Option<ID3D11Texture2D> = None;
        unsafe { device.CreateTexture2D(&desc, None, Some(&mut texture)) }
            .context("failed to create staging texture for desktop image")
            .map_err(CaptureError::SourceFailure)?;
        *staging = texture;
    }

    staging.as_ref().ok_or_else(|| {
        CaptureError::source_failure(
            anyhow::anyhow!("CreateTexture2D returned no texture"),
            "failed to create staging texture for desktop image",
        )
    })
}

/// The frame currently held between acquire and release.
struct HeldFrame {
    info: DXGI_OUTDUPL_FRAME_INFO,
    texture: Option<ID3D11Texture2D>,
    height: u32,
}

enum MappingKind {
    /// `MapDesktopSurface`; the desktop image already lives in system memory.
    SystemMemory,
    Staging(ID3D11Resource),
}

struct Mapping {
    kind: MappingKind,
    bits: *const u8,
    pitch: usize,
    len: usize,
}

/// DXGI desktop duplication of one output.
///
/// Not `Send`: the D3D11 device is created single-threaded and the mapped
/// image is a raw pointer into driver memory.
pub struct DxgiDuplicationSource {
    output_index: usize,
    name: String,
    output: IDXGIOutput,
    device: ID3D11Device,
    context: ID3D11DeviceContext,
    duplication: IDXGIOutputDuplication,
    desc: DXGI_OUTDUPL_DESC,
    frame: Option<HeldFrame>,
    staging: Option<ID3D11Texture2D>,
    mapping: Option<Mapping>,
    raw_rects: Vec<RECT>,
    raw_moves: Vec<DXGI_OUTDUPL_MOVE_RECT>,
    raw_shape: Vec<u8>,
    shape_bitmap: Vec<u8>,
    /// Normalized shape for the held frame, fetched on first request.
    shape: Option<CursorShapeInfo>,
}

impl DxgiDuplicationSource {
    /// Duplicate the `output_index`-th output attached to the desktop.
    pub fn open(output_index: usize) -> CaptureResult<Self> {
        let AttachedOutput {
            adapter,
            output,
            name,
        } = output::find_attached_output(output_index)?;
        let (device, context) = d3d11::create_device_for_adapter(&adapter, true)
            .map_err(CaptureError::SourceFailure)?;
        let duplication = create_duplication(&output, &device)?;
        let desc = duplication_desc(&duplication);

        info!(
            output_index,
            output = %name,
            width = desc.ModeDesc.Width,
            height = desc.ModeDesc.Height,
            rotation = ?frame_rotation(desc.Rotation),
            system_memory = desc.DesktopImageInSystemMemory.as_bool(),
            "opened desktop duplication"
        );

        Ok(Self {
            output_index,
            name,
            output,
            device,
            context,
            duplication,
            desc,
            frame: None,
            staging: None,
            mapping: None,
            raw_rects: Vec::new(),
            raw_moves: Vec::new(),
            raw_shape: Vec::new(),
            shape_bitmap: Vec::new(),
            shape: None,
        })
    }

    pub fn output_index(&self) -> usize {
        self.output_index
    }

    /// Device name of the duplicated output, e.g. `\\.\DISPLAY1`.
    pub fn output_name(&self) -> &str {
        &self.name
    }

    /// Recreate the duplication interface after [`CaptureError::AccessLost`].
    pub fn recreate(&mut self) -> CaptureResult<()> {
        if self.mapping.is_some() {
            self.unmap_image()?;
        }
        // The old interface is gone; its frame cannot be released anyway.
        self.frame = None;
        self.shape = None;
        self.staging = None;
        self.duplication = create_duplication(&self.output, &self.device)?;
        self.desc = duplication_desc(&self.duplication);
        debug!(
            output_index = self.output_index,
            rotation = ?frame_rotation(self.desc.Rotation),
            "recreated desktop duplication"
        );
        Ok(())
    }

    fn held(&self) -> CaptureResult<&HeldFrame> {
        self.frame.as_ref().ok_or_else(|| {
            CaptureError::source_failure(
                anyhow::anyhow!("no duplicated frame is held"),
                "desktop duplication",
            )
        })
    }

    fn map_staging(&mut self) -> CaptureResult<Mapping> {
        let frame = self.frame.as_ref().ok_or_else(|| {
            CaptureError::source_failure(
                anyhow::anyhow!("no duplicated frame is held"),
                "map desktop image",
            )
        })?;
        let texture = frame.texture.as_ref().ok_or_else(|| {
            CaptureError::source_failure(
                anyhow::anyhow!("frame carries no desktop image"),
                "map desktop image",
            )
        })?;
        let mut src_desc = D3D11_TEXTURE2D_DESC::default();
        unsafe { texture.GetDesc(&mut src_desc) };
        let source_res: ID3D11Resource = texture
            .cast()
            .context("failed to cast desktop texture to ID3D11Resource")
            .map_err(CaptureError::SourceFailure)?;

        let staging = ensure_staging_texture(&self.device, &mut self.staging, &src_desc)?;
        let staging_res: ID3D11Resource = staging
            .cast()
            .context("failed to cast staging texture to ID3D11Resource")
            .map_err(CaptureError::SourceFailure)?;

        let mut mapped = D3D11_MAPPED_SUBRESOURCE::default();
        unsafe {
            self.context.CopyResource(&staging_res, &source_res);
            self.context
                .Map(&staging_res, 0, D3D11_MAP_READ, 0, Some(&mut mapped))
                .context("failed to map staging texture")
                .map_err(CaptureError::SourceFailure)?;
        }

        let pitch = mapped.RowPitch as usize;
        Ok(Mapping {
            kind: MappingKind::Staging(staging_res),
            bits: mapped.pData as *const u8,
            pitch,
            len: pitch * src_desc.Height as usize,
        })
    }
}

fn duplication_desc(duplication: &IDXGIOutputDuplication) -> DXGI_OUTDUPL_DESC {
    let mut desc = DXGI_OUTDUPL_DESC::default();
    unsafe { duplication.GetDesc(&mut desc) };
    desc
}

impl CaptureSource for DxgiDuplicationSource {
    fn acquire_frame(&mut self, timeout: Duration) -> CaptureResult<AcquireOutcome> {
        if self.frame.is_some() {
            self.release_frame()?;
        }

        let timeout_ms = u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX);
        let mut info = DXGI_OUTDUPL_FRAME_INFO::default();
        let mut resource: Option<IDXGIResource> = None;
        let acquired =
            unsafe { self.duplication.AcquireNextFrame(timeout_ms, &mut info, &mut resource) };
        if let Err(error) = acquired {
            if error.code() == DXGI_ERROR_WAIT_TIMEOUT {
                return Ok(AcquireOutcome::NoNewFrame);
            }
            if error.code() == DXGI_ERROR_ACCESS_LOST {
                return Err(CaptureError::AccessLost);
            }
            return Err(CaptureError::source_failure(error, "AcquireNextFrame failed"));
        }

        let texture = match resource.map(|r| r.cast::<ID3D11Texture2D>()).transpose() {
            Ok(texture) => texture,
            Err(error) => {
                // The frame is acquired but not yet tracked; hand it back now.
                if let Err(release) = unsafe { self.duplication.ReleaseFrame() } {
                    warn!(error = %release, "ReleaseFrame failed after a rejected acquisition");
                }
                return Err(CaptureError::SourceFailure(anyhow::Error::from(error).context(
                    "failed to cast acquired IDXGIResource to ID3D11Texture2D",
                )));
            }
        };

        // The desktop texture is laid out in panel orientation.
        let (width, height) = match &texture {
            Some(texture) => {
                let mut desc = D3D11_TEXTURE2D_DESC::default();
                unsafe { texture.GetDesc(&mut desc) };
                (desc.Width, desc.Height)
            }
            None => (self.desc.ModeDesc.Width, self.desc.ModeDesc.Height),
        };

        self.desc = duplication_desc(&self.duplication);
        self.shape = None;
        let header = AcquiredFrame {
            width,
            height,
            rotation: frame_rotation(self.desc.Rotation),
            accumulated_frames: info.AccumulatedFrames,
            has_metadata: info.TotalMetadataBufferSize > 0,
            pointer_shape_size: info.PointerShapeBufferSize as usize,
        };
        self.frame = Some(HeldFrame {
            info,
            texture,
            height,
        });
        Ok(AcquireOutcome::Acquired(header))
    }

    fn release_frame(&mut self) -> CaptureResult<()> {
        if self.mapping.is_some() {
            self.unmap_image()?;
        }
        if self.frame.take().is_none() {
            return Ok(());
        }
        match unsafe { self.duplication.ReleaseFrame() } {
            Ok(()) => Ok(()),
            Err(e) if e.code() == DXGI_ERROR_ACCESS_LOST => Err(CaptureError::AccessLost),
            Err(e) => Err(CaptureError::source_failure(e, "ReleaseFrame failed")),
        }
    }

    fn move_rects(&mut self, buffer: &mut [MoveRect]) -> CaptureResult<MetadataFill> {
        self.held()?;
        self.raw_moves.clear();
        self.raw_moves
            .resize(buffer.len(), DXGI_OUTDUPL_MOVE_RECT::default());
        let size = metadata_bytes::<DXGI_OUTDUPL_MOVE_RECT>(buffer.len())?;
        let mut required = 0u32;
        let result = unsafe {
            self.duplication
                .GetFrameMoveRects(size, self.raw_moves.as_mut_ptr(), &mut required)
        };
        let count = match metadata_fill::<DXGI_OUTDUPL_MOVE_RECT>(
            result,
            required,
            "GetFrameMoveRects failed",
        )? {
            MetadataFill::Filled(count) => count.min(buffer.len()),
            needs => return Ok(needs),
        };

        for (dst, raw) in buffer.iter_mut().zip(&self.raw_moves[..count]) {
            let rect = raw.DestinationRect;
            *dst = MoveRect {
                source: SourcePoint {
                    x: raw.SourcePoint.x,
                    y: raw.SourcePoint.y,
                },
                destination: DirtyRect::new(rect.left, rect.top, rect.right, rect.bottom),
            };
        }
        Ok(MetadataFill::Filled(count))
    }

    fn dirty_rects(&mut self, buffer: &mut [DirtyRect]) -> CaptureResult<MetadataFill> {
        self.held()?;
        self.raw_rects.clear();
        self.raw_rects.resize(buffer.len(), RECT::default());
        let size = metadata_bytes::<RECT>(buffer.len())?;
        let mut required = 0u32;
        let result = unsafe {
            self.duplication
                .GetFrameDirtyRects(size, self.raw_rects.as_mut_ptr(), &mut required)
        };
        let count = match metadata_fill::<RECT>(result, required, "GetFrameDirtyRects failed")? {
            MetadataFill::Filled(count) => count.min(buffer.len()),
            needs => return Ok(needs),
        };

        for (dst, rect) in buffer.iter_mut().zip(&self.raw_rects[..count]) {
            *dst = DirtyRect::new(rect.left, rect.top, rect.right, rect.bottom);
        }
        Ok(MetadataFill::Filled(count))
    }

    fn pointer_shape(&mut self, buffer: &mut [u8]) -> CaptureResult<ShapeFill> {
        let info = match self.shape {
            Some(info) => info,
            None => {
                let hint = self.held()?.info.PointerShapeBufferSize as usize;
                let duplication = &self.duplication;
                let raw_info = fetch_with_retry(
                    &mut self.raw_shape,
                    hint,
                    "GetFramePointerShape",
                    |raw: &mut [u8]| query_pointer_shape(duplication, raw),
                )?;
                let info =
                    pointer::normalize_shape(&self.raw_shape, raw_info, &mut self.shape_bitmap)?;
                self.shape = Some(info);
                info
            }
        };

        let len = self.shape_bitmap.len();
        if buffer.len() < len {
            return Ok(ShapeFill::NeedsCapacity(len));
        }
        buffer[..len].copy_from_slice(&self.shape_bitmap);
        Ok(ShapeFill::Filled(info, len))
    }

    fn map_image(&mut self) -> CaptureResult<()> {
        if self.mapping.is_some() {
            return Ok(());
        }
        let height = self.held()?.height as usize;

        let mapping = if self.desc.DesktopImageInSystemMemory.as_bool() {
            let rect = unsafe { self.duplication.MapDesktopSurface() }
                .context("MapDesktopSurface failed")
                .map_err(CaptureError::SourceFailure)?;
            let pitch = rect.Pitch as usize;
            Mapping {
                kind: MappingKind::SystemMemory,
                bits: rect.pBits as *const u8,
                pitch,
                len: pitch * height,
            }
        } else {
            self.map_staging()?
        };

        if mapping.bits.is_null() {
            self.mapping = Some(mapping);
            self.unmap_image()?;
            return Err(CaptureError::source_failure(
                anyhow::anyhow!("mapped desktop image has no data pointer"),
                "map desktop image",
            ));
        }
        self.mapping = Some(mapping);
        Ok(())
    }

    fn mapped_image(&self) -> CaptureResult<MappedImage<'_>> {
        let mapping = self.mapping.as_ref().ok_or_else(|| {
            CaptureError::source_failure(
                anyhow::anyhow!("desktop image is not mapped"),
                "read desktop image",
            )
        })?;
        // SAFETY: `bits` points to `len` readable bytes until `unmap_image`,
        // which needs `&mut self` and so cannot run while this borrow lives.
        let data = unsafe { std::slice::from_raw_parts(mapping.bits, mapping.len) };
        Ok(MappedImage {
            data,
            row_pitch: mapping.pitch,
        })
    }

    fn unmap_image(&mut self) -> CaptureResult<()> {
        let Some(mapping) = self.mapping.take() else {
            return Ok(());
        };
        match mapping.kind {
            MappingKind::SystemMemory => unsafe { self.duplication.UnMapDesktopSurface() }
                .context("UnMapDesktopSurface failed")
                .map_err(CaptureError::SourceFailure),
            MappingKind::Staging(resource) => {
                unsafe { self.context.Unmap(&resource, 0) };
                Ok(())
            }
        }
    }

    fn output_bounds(&self) -> CaptureResult<DesktopRect> {
        let desc = output::output_desc(&self.output)?;
        Ok(output::desktop_rect(desc.DesktopCoordinates))
    }

    fn cursor_position(&self) -> CaptureResult<CursorPosition> {
        let mut info = CURSORINFO {
            cbSize: std::mem::size_of::<CURSORINFO>() as u32,
            ..Default::default()
        };
        unsafe { GetCursorInfo(&mut info) }
            .context("GetCursorInfo failed")
            .map_err(CaptureError::SourceFailure)?;
        Ok(CursorPosition {
            x: info.ptScreenPos.x,
            y: info.ptScreenPos.y,
            visible: (info.flags.0 & CURSOR_SHOWING.0) != 0,
        })
    }
}

impl Drop for DxgiDuplicationSource {
    fn drop(&mut self) {
        if let Err(err) = self.release_frame() {
            debug!(error = %err, "failed to release frame while closing duplication");
        }
    }
}
