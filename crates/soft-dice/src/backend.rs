//! Compile-time backend selection.
//!
//! The losses run on the selected backend wrapped in
//! [`Autodiff`](burn::backend::Autodiff). `cuda` takes precedence over `wgpu`,
//! and `ndarray` is the CPU fallback.

use cfg_if::cfg_if;

cfg_if! {
    if #[cfg(feature = "cuda")] {
        /// Inner (non-differentiable) backend.
        pub type InnerBackend = burn::backend::Cuda;
        /// Human readable backend name.
        pub const NAME: &str = "CUDA (NVIDIA GPU)";
    } else if #[cfg(feature = "wgpu")] {
        /// Inner (non-differentiable) backend.
        pub type InnerBackend = burn::backend::Wgpu;
        /// Human readable backend name.
        pub const NAME: &str = "WGPU (GPU)";
    } else {
        /// Inner (non-differentiable) backend.
        pub type InnerBackend = burn::backend::NdArray;
        /// Human readable backend name.
        pub const NAME: &str = "NdArray (CPU)";
    }
}

/// Device of the selected backend.
pub type SelectedDevice = <InnerBackend as burn::tensor::backend::Backend>::Device;

/// Default device of the selected backend.
pub fn create_device() -> SelectedDevice {
    SelectedDevice::default()
}
