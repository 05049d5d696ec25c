use candle_core::{Device, Result};

/// Pick the device to run on: CPU when forced. Otherwise the first CUDA device, falling back
/// to CPU when none is available, or with the `metal` feature the first Metal device, which
/// errors when there is none.
pub(crate) fn select_device(cpu: bool) -> Result<Device> {
    if cpu {
        return Ok(Device::Cpu);
    }
    #[cfg(not(feature = "metal"))]
    let device = Device::cuda_if_available(0)?;
    #[cfg(feature = "metal")]
    let device = Device::new_metal(0)?;
    Ok(device)
}
