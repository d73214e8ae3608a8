//! Compute backend
//!
//! `ndarray` (CPU) is the default build; `--features cuda` runs training
//! and inference on the first GPU instead.

use burn::backend::Autodiff;
use burn::tensor::backend::Backend;

#[cfg(feature = "cuda")]
pub type DefaultBackend = burn_cuda::Cuda;

#[cfg(all(feature = "ndarray", not(feature = "cuda")))]
pub type DefaultBackend = burn::backend::NdArray;

#[cfg(not(any(feature = "ndarray", feature = "cuda")))]
compile_error!("agronomicare needs a backend: enable `ndarray` or `cuda`");

/// Gradient-tracking wrapper used by the fit loop
pub type TrainingBackend = Autodiff<DefaultBackend>;

pub type DefaultDevice = <DefaultBackend as Backend>::Device;

pub fn default_device() -> DefaultDevice {
    DefaultDevice::default()
}

/// Shown in the CLI banner and training summary
pub fn backend_name() -> &'static str {
    if cfg!(feature = "cuda") {
        "cuda (gpu)"
    } else {
        "ndarray (cpu)"
    }
}
