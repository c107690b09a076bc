//! bitgemm: Vulkan compute backend for 1-bit matrix multiplication.
//!
//! Binarised-weight inference reduces GEMM to XNOR + popcount over
//! bit-packed operands. This crate provides:
//!
//! 1. A device-agnostic [`ComputeContext`] managing instance and device
//!    lifecycle, storage buffers, host transfers, kernel registration
//!    (including runtime GLSL compilation), dispatch, and fence-based
//!    synchronisation, implemented by the ash-based [`VulkanDriver`].
//! 2. CPU reference algorithms in [`cpu`]: ±1 matrix generation, bit
//!    packing, and a reference binary GEMM that is bit-exact with the GPU
//!    kernel.
//! 3. A kernel registry loaded from JSON configuration ([`AppConfig`]) and
//!    per-operation launchers ([`DeviceAlgorithms`]) with device-aware tile
//!    selection.
//!
//! # Example
//!
//! ```rust,no_run
//! use bitgemm::{BinmatmulSandbox, DataDomain};
//!
//! let sandbox = BinmatmulSandbox::with_crate_resources();
//! let report = sandbox.run(DataDomain::PmOne, 256, 256, 64)?;
//! assert!(report.is_exact());
//! # Ok::<(), bitgemm::DeviceError>(())
//! ```

pub mod config;
pub mod context;
pub mod cpu;
pub mod cpu_driver;
pub mod error;
pub mod launcher;
pub mod sandbox;
pub mod types;
pub mod vulkan;

pub use config::{AppConfig, KernelConfig};
pub use context::{BufferHandle, ComputeContext, ComputeDriver, DeviceLimits};
pub use cpu_driver::{CpuBuffer, CpuDriver, CpuKernel};
pub use error::{ConfigError, DeviceError};
pub use launcher::{ceil_div, choose_tile, DeviceAlgorithms, ScalarParam};
pub use sandbox::{BinmatmulSandbox, SandboxReport};
pub use types::{
    AllocMethod, DataDomain, DeviceDriver, DeviceSelect, DownloadMethod, KernelFormat, KernelType,
    LaunchMethod, MatrixOrder, UploadMethod, Vec3, Version,
};
pub use vulkan::{DeviceBuffer, Kernel, VulkanDriver};
