//! Backend selection for the `retinamask` binary.
//!
//! The concrete Burn backend is picked once from Cargo features; everything
//! below this module is generic over `B: Backend`.

use cfg_if::cfg_if;

cfg_if! {
    if #[cfg(feature = "cuda")] {
        use burn::backend::cuda::{Cuda, CudaDevice};

        /// Selected backend type
        pub type SelectedBackend = Cuda;
        /// Selected device type
        pub type SelectedDevice = CudaDevice;

        /// Backend name for logging purposes
        pub const NAME: &str = "CUDA (NVIDIA GPU)";
    } else if #[cfg(feature = "wgpu")] {
        use burn::backend::wgpu::{Wgpu, WgpuDevice};

        /// Selected backend type
        pub type SelectedBackend = Wgpu;
        /// Selected device type
        pub type SelectedDevice = WgpuDevice;

        /// Backend name for logging purposes
        pub const NAME: &str = "WGPU (GPU)";
    } else {
        use burn::backend::ndarray::{NdArray, NdArrayDevice};

        /// Selected backend type
        pub type SelectedBackend = NdArray;
        /// Selected device type
        pub type SelectedDevice = NdArrayDevice;

        /// Backend name for logging purposes
        pub const NAME: &str = "NdArray (CPU)";
    }
}

/// Autodiff wrapper of [`SelectedBackend`], used when gradients are needed.
pub type SelectedAutodiffBackend = burn::backend::Autodiff<SelectedBackend>;

/// Creates the default device of the selected backend.
pub fn create_device() -> SelectedDevice {
    SelectedDevice::default()
}
