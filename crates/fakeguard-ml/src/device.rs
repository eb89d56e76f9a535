//! Compute device selection for embedding inference: CUDA > Metal > CPU.

use candle_core::Device;

/// Select the device the embedding networks run on.
///
/// Tries CUDA first (when compiled with the `cuda` feature), then Metal
/// (when compiled with `metal`), then falls back to CPU. Both embedders
/// must be given the same device so image and text features are produced
/// under identical numerics for training and prediction.
pub fn select_device() -> Device {
    #[cfg(feature = "cuda")]
    {
        match Device::new_cuda(0) {
            Ok(device) => {
                tracing::info!("Embedding on CUDA device 0");
                return device;
            }
            Err(e) => tracing::warn!(error = %e, "CUDA unavailable, falling back"),
        }
    }

    #[cfg(feature = "metal")]
    {
        match Device::new_metal(0) {
            Ok(device) => {
                tracing::info!("Embedding on Metal device 0");
                return device;
            }
            Err(e) => tracing::warn!(error = %e, "Metal unavailable, falling back"),
        }
    }

    tracing::debug!("Embedding on CPU");
    Device::Cpu
}
