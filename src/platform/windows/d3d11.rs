use anyhow::{Context, Result};
use windows::Win32::Graphics::Direct3D::{D3D_DRIVER_TYPE_UNKNOWN, D3D_FEATURE_LEVEL_11_0};
use windows::Win32::Graphics::Direct3D11::{
    D3D11_CREATE_DEVICE_BGRA_SUPPORT, D3D11_CREATE_DEVICE_SINGLETHREADED, D3D11_SDK_VERSION,
    D3D11CreateDevice, ID3D11Device, ID3D11DeviceContext,
};
use windows::Win32::Graphics::Dxgi::IDXGIAdapter;

/// Create a D3D11 device on the adapter that drives the duplicated output.
///
/// With `single_threaded` the device skips internal driver locking; only
/// valid when the device never leaves the owning session's thread.
pub(crate) fn create_device_for_adapter(
    adapter: &IDXGIAdapter,
    single_threaded: bool,
) -> Result<(ID3D11Device, ID3D11DeviceContext)> {
    let mut device: Option<ID3D11Device> = None;
    let mut context: Option<ID3D11DeviceContext> = None;
    let feature_levels = [D3D_FEATURE_LEVEL_11_0];

    let mut flags = D3D11_CREATE_DEVICE_BGRA_SUPPORT;
    if single_threaded {
        flags |= D3D11_CREATE_DEVICE_SINGLETHREADED;
    }

    // An explicit adapter requires the UNKNOWN driver type.
    unsafe {
        D3D11CreateDevice(
            Some(adapter),
            D3D_DRIVER_TYPE_UNKNOWN,
            None,
            flags,
            Some(&feature_levels),
            D3D11_SDK_VERSION,
            Some(&mut device),
            None,
            Some(&mut context),
        )
    }
    .context("D3D11CreateDevice failed")?;

    let device = device.context("D3D11CreateDevice did not return a device")?;
    let context = context.context("D3D11CreateDevice did not return a device context")?;
    Ok((device, context))
}
