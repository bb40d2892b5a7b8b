use std::time::Duration;

use tracing::{debug, trace, warn};

use crate::copy::{copy_dirty_regions, copy_full_frame};
use crate::cursor::{CursorShape, draw_cursor};
use crate::env_config;
use crate::error::{CaptureError, CaptureResult};
use crate::frame::{DirtyRect, FrameRotation, FrameSnapshot, MoveRect, bgra_len};
use crate::geometry::{DesktopRect, DestinationId, FrameGeometry, GeometryCache};
use crate::planner::{CaptureState, PlanInput, UpdatePlan, plan_update};
use crate::rotation::copy_rotated_frame;
use crate::source::{AcquireOutcome, AcquiredFrameGuard, CaptureSource, fetch_with_retry};

const DEFAULT_TIMEOUT: Duration = Duration::from_millis(100);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DuplicationConfig {
    /// Composite the system pointer onto every delivered frame.
    pub capture_cursor: bool,
    /// Desktop bounds used to place the pointer instead of the output's own
    /// coordinates.
    pub monitor_bounds: Option<DesktopRect>,
    /// Acquire timeout used by [`DuplicationSession::get_frame`].
    pub default_timeout: Duration,
    /// Allow dirty-rectangle updates on top of the previous frame. When
    /// `false` every frame is copied in full.
    pub incremental_copy: bool,
}

impl Default for DuplicationConfig {
    fn default() -> Self {
        Self {
            capture_cursor: false,
            monitor_bounds: None,
            default_timeout: DEFAULT_TIMEOUT,
            incremental_copy: true,
        }
    }
}

pub struct DuplicationSessionBuilder {
    config: DuplicationConfig,
}

impl DuplicationSessionBuilder {
    pub fn new() -> Self {
        Self {
            config: DuplicationConfig::default(),
        }
    }

    pub fn capture_cursor(mut self, enabled: bool) -> Self {
        self.config.capture_cursor = enabled;
        self
    }

    /// Place the pointer relative to these desktop bounds. Inverted bounds
    /// are rejected by [`DuplicationSessionBuilder::build`].
    pub fn monitor_bounds(mut self, left: i32, top: i32, right: i32, bottom: i32) -> Self {
        self.config.monitor_bounds = Some(DesktopRect::new(left, top, right, bottom));
        self
    }

    pub fn default_timeout(mut self, timeout: Duration) -> Self {
        self.config.default_timeout = timeout;
        self
    }

    pub fn incremental_copy(mut self, enabled: bool) -> Self {
        self.config.incremental_copy = enabled;
        self
    }

    pub fn build<S: CaptureSource>(self, source: S) -> CaptureResult<DuplicationSession<S>> {
        DuplicationSession::new(source, self.config)
    }
}

impl Default for DuplicationSessionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// What a successful [`DuplicationSession::get_frame`] wrote.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameReport {
    /// Width of the frame now in the destination, in pixels.
    pub width: u32,
    pub height: u32,
    pub plan: UpdatePlan,
    pub cursor_drawn: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameStatus {
    Updated(FrameReport),
    /// Nothing new arrived before the timeout; the destination is unchanged.
    NoNewFrame,
}

impl FrameStatus {
    pub fn is_updated(&self) -> bool {
        matches!(self, Self::Updated(_))
    }
}

/// Polls a [`CaptureSource`] and keeps a caller-owned BGRA buffer in sync
/// with the captured output.
///
/// Not safe for concurrent use; open one session per output and thread.
pub struct DuplicationSession<S: CaptureSource> {
    source: Option<S>,
    config: DuplicationConfig,
    state: CaptureState,
    geometry: GeometryCache,
    cursor: CursorShape,
    dirty_rects: Vec<DirtyRect>,
    move_rects: Vec<MoveRect>,
    /// Frame area the cursor was composited over last time. It holds overlay
    /// pixels rather than desktop content, so the next incremental update
    /// copies it again.
    last_cursor_rect: Option<DirtyRect>,
}

impl<S: CaptureSource> DuplicationSession<S> {
    pub fn builder() -> DuplicationSessionBuilder {
        DuplicationSessionBuilder::new()
    }

    pub fn new(source: S, config: DuplicationConfig) -> CaptureResult<Self> {
        if let Some(bounds) = config.monitor_bounds {
            bounds.validated()?;
        }
        let output = source.output_bounds()?;
        let logical_size = (output.width(), output.height());
        debug!(
            logical_width = logical_size.0,
            logical_height = logical_size.1,
            capture_cursor = config.capture_cursor,
            "duplication session created"
        );

        Ok(Self {
            source: Some(source),
            config,
            state: CaptureState::new(logical_size),
            geometry: GeometryCache::default(),
            cursor: CursorShape::default(),
            dirty_rects: Vec::new(),
            move_rects: Vec::new(),
            last_cursor_rect: None,
        })
    }

    pub fn config(&self) -> &DuplicationConfig {
        &self.config
    }

    pub fn set_cursor_capture_enabled(&mut self, enabled: bool) {
        self.config.capture_cursor = enabled;
    }

    pub fn cursor_capture_enabled(&self) -> bool {
        self.config.capture_cursor
    }

    pub fn set_monitor_bounds_override(
        &mut self,
        left: i32,
        top: i32,
        right: i32,
        bottom: i32,
    ) -> CaptureResult<()> {
        let bounds = DesktopRect::new(left, top, right, bottom).validated()?;
        self.config.monitor_bounds = Some(bounds);
        Ok(())
    }

    pub fn clear_monitor_bounds_override(&mut self) {
        self.config.monitor_bounds = None;
    }

    /// Desktop bounds of the captured output, or the caller's override.
    pub fn bounds(&self) -> CaptureResult<DesktopRect> {
        if let Some(bounds) = self.config.monitor_bounds {
            return Ok(bounds);
        }
        self.source
            .as_ref()
            .ok_or(CaptureError::SourceUnavailable)?
            .output_bounds()
    }

    pub fn size(&self) -> CaptureResult<(u32, u32)> {
        let bounds = self.bounds()?;
        Ok((bounds.width(), bounds.height()))
    }

    pub fn last_rotation(&self) -> FrameRotation {
        self.state.rotation
    }

    pub fn logical_size(&self) -> (u32, u32) {
        self.state.logical_size
    }

    /// Forget the tracked destination; the next frame is copied in full.
    pub fn reset(&mut self) {
        self.state.invalidate();
        self.geometry.invalidate();
        self.last_cursor_rect = None;
    }

    pub fn source(&self) -> Option<&S> {
        self.source.as_ref()
    }

    pub fn source_mut(&mut self) -> Option<&mut S> {
        self.source.as_mut()
    }

    /// Detach the source. Later frame requests fail with
    /// [`CaptureError::SourceUnavailable`].
    pub fn release_source(&mut self) -> Option<S> {
        self.reset();
        self.source.take()
    }

    pub fn into_source(self) -> Option<S> {
        self.source
    }

    pub fn get_frame(&mut self, destination: &mut [u8]) -> CaptureResult<FrameStatus> {
        self.get_frame_with_timeout(destination, self.config.default_timeout)
    }

    /// Fill `destination` with the current desktop image.
    ///
    /// `destination` must hold at least `width * height * 4` bytes of the
    /// frame being delivered (logical size for rotated outputs, physical
    /// size otherwise); a shorter buffer fails with
    /// [`CaptureError::InsufficientBuffer`] and is left untouched. Passing
    /// the same buffer on every call lets later frames copy only the
    /// regions that changed.
    pub fn get_frame_with_timeout(
        &mut self,
        destination: &mut [u8],
        timeout: Duration,
    ) -> CaptureResult<FrameStatus> {
        let Self {
            source,
            config,
            state,
            geometry,
            cursor,
            dirty_rects,
            move_rects,
            last_cursor_rect,
        } = self;
        let source = source.as_mut().ok_or(CaptureError::SourceUnavailable)?;

        let header = match source.acquire_frame(timeout) {
            Ok(AcquireOutcome::Acquired(header)) => header,
            Ok(AcquireOutcome::NoNewFrame) => {
                trace!(timeout_ms = timeout.as_millis() as u64, "no new frame");
                return Ok(FrameStatus::NoNewFrame);
            }
            Err(err) => {
                if err.requires_session_reset() {
                    state.invalidate();
                    geometry.invalidate();
                    *last_cursor_rect = None;
                }
                return Err(err);
            }
        };
        let mut frame = AcquiredFrameGuard::new(source, header);

        if header.pointer_shape_updated() {
            let fetched = fetch_with_retry(
                cursor.scratch_mut(),
                header.pointer_shape_size,
                "failed to query pointer shape",
                |buffer: &mut [u8]| frame.source_mut().pointer_shape(buffer),
            );
            match fetched {
                Ok(info) => {
                    let len = cursor.bitmap().len();
                    cursor.commit(info, len);
                }
                Err(err) => {
                    warn!(error = %err, "pointer shape update dropped");
                    cursor.invalidate();
                }
            }
        }

        if header.accumulated_frames == 0 {
            trace!("pointer-only update");
            return Ok(FrameStatus::NoNewFrame);
        }

        if header.rotation != state.rotation {
            match frame.source().output_bounds() {
                Ok(bounds) => state.logical_size = (bounds.width(), bounds.height()),
                Err(err) => {
                    warn!(error = %err, "keeping previous logical size after rotation change")
                }
            }
            debug!(
                from = state.rotation.degrees(),
                to = header.rotation.degrees(),
                logical_width = state.logical_size.0,
                logical_height = state.logical_size.1,
                "output rotation changed"
            );
            state.rotation = header.rotation;
            state.invalidate();
            geometry.invalidate();
        }

        if header.has_metadata {
            fetch_with_retry(
                move_rects,
                0,
                "failed to query move rects",
                |buffer: &mut [MoveRect]| frame.source_mut().move_rects(buffer),
            )?;
            fetch_with_retry(
                dirty_rects,
                0,
                "failed to query dirty rects",
                |buffer: &mut [DirtyRect]| frame.source_mut().dirty_rects(buffer),
            )?;
        } else {
            move_rects.clear();
            dirty_rects.clear();
        }

        let physical = (header.width, header.height);
        let target = DestinationId::of(destination);
        let mapped = frame.map()?;
        let image = mapped.image()?;
        let snapshot = FrameSnapshot {
            data: image.data,
            row_pitch: image.row_pitch,
            width: header.width,
            height: header.height,
            rotation: header.rotation,
            update_kind: header.update_kind(),
        };
        snapshot.validate()?;

        let layout = geometry.resolve(physical, snapshot.row_pitch, state.logical_size, target)?;
        let plan = plan_update(
            state,
            &layout,
            &PlanInput {
                physical,
                rotation: header.rotation,
                update_kind: snapshot.update_kind,
                dirty_rects: dirty_rects.len(),
                move_rects: move_rects.len(),
                destination: target,
                incremental_enabled: config.incremental_copy
                    && env_config::incremental_copy_allowed(),
            },
        );

        let (width, height) = match plan {
            UpdatePlan::Rotated => state.logical_size,
            UpdatePlan::FullFrame | UpdatePlan::Incremental => physical,
        };
        let required = bgra_len(width, height)?;
        if destination.len() < required {
            return Err(CaptureError::InsufficientBuffer {
                required,
                actual: destination.len(),
            });
        }

        if plan == UpdatePlan::Incremental {
            if let Some(rect) = last_cursor_rect.take() {
                dirty_rects.push(rect);
            }
        }
        let written = write_frame(
            destination,
            &snapshot,
            &layout,
            plan,
            state.logical_size,
            dirty_rects,
        );
        drop(mapped);
        if let Err(err) = written {
            state.invalidate();
            *last_cursor_rect = None;
            return Err(err);
        }
        debug!(
            ?plan,
            width,
            height,
            dirty_rects = dirty_rects.len(),
            move_rects = move_rects.len(),
            "frame updated"
        );

        let cursor_rect = if config.capture_cursor && env_config::cursor_overlay_allowed() {
            composite_cursor(
                frame.source(),
                cursor,
                config.monitor_bounds,
                destination,
                (width, height),
            )
        } else {
            None
        };

        state.mark_written(target, physical);
        *last_cursor_rect = cursor_rect;
        Ok(FrameStatus::Updated(FrameReport {
            width,
            height,
            plan,
            cursor_drawn: cursor_rect.is_some(),
        }))
    }
}

/// Write one frame per `plan`.
///
/// An incremental copy fails only where a full copy of the same image
/// fails with the same error; the caller invalidates the tracked frame.
fn write_frame(
    destination: &mut [u8],
    snapshot: &FrameSnapshot<'_>,
    layout: &FrameGeometry,
    plan: UpdatePlan,
    logical_size: (u32, u32),
    dirty_rects: &[DirtyRect],
) -> CaptureResult<()> {
    let height = snapshot.height as usize;
    match plan {
        UpdatePlan::Rotated => copy_rotated_frame(
            destination,
            snapshot.data,
            (snapshot.width, snapshot.height),
            layout.source_row_width,
            snapshot.rotation,
            logical_size,
        ),
        UpdatePlan::FullFrame => copy_full_frame(
            destination,
            snapshot.data,
            layout.source_row_width,
            layout.content_width,
            height,
        ),
        UpdatePlan::Incremental => copy_dirty_regions(
            destination,
            snapshot.data,
            layout.source_row_width,
            layout.content_width,
            height,
            dirty_rects,
        )
        .map(|_| ()),
    }
}

/// Draw the retained pointer shape. Failures only cost the overlay.
fn composite_cursor<S: CaptureSource>(
    source: &S,
    shape: &CursorShape,
    bounds_override: Option<DesktopRect>,
    destination: &mut [u8],
    (width, height): (u32, u32),
) -> Option<DirtyRect> {
    let info = shape.info()?;
    let drawn = source.cursor_position().and_then(|position| {
        let bounds = match bounds_override {
            Some(bounds) => bounds,
            None => source.output_bounds()?,
        };
        draw_cursor(destination, width, height, info, shape.bitmap(), position, bounds)
    });
    match drawn {
        Ok(rect) => rect,
        Err(err) => {
            warn!(error = %err, "cursor overlay skipped");
            None
        }
    }
}
