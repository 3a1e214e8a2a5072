use candle_core::Device;
use tracing::info;

/// Pick the fastest device compiled in, falling back to CPU.
pub fn select_device() -> Device {
    #[cfg(feature = "cuda")]
    {
        if let Ok(dev) = Device::new_cuda(0) { info!("embedding device: CUDA"); return dev; }
    }
    #[cfg(feature = "metal")]
    {
        if let Ok(dev) = Device::new_metal(0) { info!("embedding device: Metal (MPS)"); return dev; }
    }
    info!("embedding device: CPU");
    Device::Cpu
}
