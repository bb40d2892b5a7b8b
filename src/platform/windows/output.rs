use anyhow::Context;
use windows::Win32::Foundation::RECT;
use windows::Win32::Graphics::Dxgi::{
    CreateDXGIFactory1, DXGI_ERROR_NOT_FOUND, DXGI_OUTPUT_DESC, IDXGIAdapter, IDXGIFactory1,
    IDXGIOutput,
};
use windows::core::Interface;

use crate::error::{CaptureError, CaptureResult};
use crate::geometry::DesktopRect;

/// A desktop-attached output and the adapter driving it.
pub(crate) struct AttachedOutput {
    pub(crate) adapter: IDXGIAdapter,
    pub(crate) output: IDXGIOutput,
    pub(crate) name: String,
}

pub(crate) fn desktop_rect(rect: RECT) -> DesktopRect {
    DesktopRect::new(rect.left, rect.top, rect.right, rect.bottom)
}

fn utf16z_to_string(buf: &[u16]) -> String {
    let len = buf.iter().position(|&c| c == 0).unwrap_or(buf.len());
    String::from_utf16_lossy(&buf[..len])
}

pub(crate) fn output_desc(output: &IDXGIOutput) -> CaptureResult<DXGI_OUTPUT_DESC> {
    unsafe { output.GetDesc() }
        .context("IDXGIOutput::GetDesc failed")
        .map_err(CaptureError::SourceFailure)
}

/// Find the `index`-th output attached to the desktop, counting across
/// adapters in enumeration order.
pub(crate) fn find_attached_output(index: usize) -> CaptureResult<AttachedOutput> {
    let factory: IDXGIFactory1 = unsafe { CreateDXGIFactory1() }
        .context("CreateDXGIFactory1 failed")
        .map_err(CaptureError::SourceFailure)?;

    let mut seen = 0usize;
    let mut adapter_idx = 0u32;
    loop {
        let adapter1 = match unsafe { factory.EnumAdapters1(adapter_idx) } {
            Ok(a) => a,
            Err(e) if e.code() == DXGI_ERROR_NOT_FOUND => break,
            Err(e) => {
                return Err(CaptureError::SourceFailure(
                    anyhow::Error::from(e).context(format!("EnumAdapters1({adapter_idx}) failed")),
                ));
            }
        };
        let adapter: IDXGIAdapter = adapter1
            .cast()
            .context("failed to cast IDXGIAdapter1 to IDXGIAdapter")
            .map_err(CaptureError::SourceFailure)?;

        let mut output_idx = 0u32;
        loop {
            let output = match unsafe { adapter.EnumOutputs(output_idx) } {
                Ok(o) => o,
                Err(e) if e.code() == DXGI_ERROR_NOT_FOUND => break,
                Err(e) => {
                    return Err(CaptureError::SourceFailure(anyhow::Error::from(e).context(
                        format!("EnumOutputs({output_idx}) on adapter {adapter_idx} failed"),
                    )));
                }
            };
            output_idx += 1;

            let desc = output_desc(&output)?;
            if !desc.AttachedToDesktop.as_bool() {
                continue;
            }
            if seen == index {
                return Ok(AttachedOutput {
                    adapter,
                    output,
                    name: utf16z_to_string(&desc.DeviceName),
                });
            }
            seen += 1;
        }
        adapter_idx += 1;
    }

    Err(CaptureError::InvalidConfig(format!(
        "no desktop output at index {index} ({seen} attached)"
    )))
}
