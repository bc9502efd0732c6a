//! Backend abstraction - Multi-backend support
//!
//! NdArray (CPU) is always available. CUDA is compiled in with the `cuda`
//! feature and picked when the configuration selects the accelerator.

use burn::backend::Autodiff;

use crate::config::DeviceSelector;

/// CPU inference backend
pub type CpuBackend = burn_ndarray::NdArray;

/// CPU training backend
pub type CpuTrainingBackend = Autodiff<CpuBackend>;

#[cfg(feature = "cuda")]
pub type CudaBackend = burn_cuda::Cuda;

#[cfg(feature = "cuda")]
pub type CudaTrainingBackend = Autodiff<CudaBackend>;

/// Get a human-readable name for a device selector
pub fn backend_name(device: DeviceSelector) -> &'static str {
    match device {
        DeviceSelector::Cpu => "NdArray (CPU)",
        DeviceSelector::Accelerator => "CUDA (GPU)",
    }
}

/// Whether this build can honour the given selector
pub fn is_available(device: DeviceSelector) -> bool {
    match device {
        DeviceSelector::Cpu => true,
        DeviceSelector::Accelerator => cfg!(feature = "cuda"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cpu_always_available() {
        assert!(is_available(DeviceSelector::Cpu));
        assert_eq!(backend_name(DeviceSelector::Cpu), "NdArray (CPU)");
    }
}
