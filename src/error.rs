//! Error types for configuration loading and device operations.
//!
//! Every fallible operation returns one of these tagged enums; errors are
//! propagated to the caller, never swallowed.

use std::path::PathBuf;

use thiserror::Error;

/// Errors produced while loading the settings or kernel-index documents.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file is missing, unreadable, or not a JSON object.
    #[error("configuration file {0} is missing or not valid JSON")]
    InvalidFormat(PathBuf),

    /// A required key is absent.
    #[error("required configuration key \"{0}\" not found")]
    KeyNotFound(String),

    /// A key is present but holds a value outside the supported set.
    #[error("configuration key \"{0}\" holds an unsupported value")]
    InvalidValueType(String),
}

/// Errors produced by a compute driver or anything layered on top of it.
#[derive(Debug, Error)]
pub enum DeviceError {
    /// Driver bring-up failed before an instance existed.
    #[error("device initialisation failed: {0}")]
    InitFailed(String),

    /// The driver instance could not be created.
    #[error("could not create compute instance: {0}")]
    CouldNotCreateInstance(String),

    /// No physical device is present or none matches the selector.
    #[error("no available compute devices")]
    NoAvailableDevices,

    /// A logical device could not be created for the selected hardware.
    #[error("could not create selected device: {0}")]
    CouldNotCreateSelectedDevice(String),

    /// The requested operation or mode is not implemented by this driver.
    #[error("operation not available on this driver")]
    NotAvailable,

    /// Device memory allocation failed.
    #[error("device memory allocation failed: {0}")]
    AllocFailed(String),

    /// Buffer object creation or memory binding failed.
    #[error("could not create device buffer: {0}")]
    CouldNotCreateBuffer(String),

    /// Host-to-device transfer failed.
    #[error("upload to device failed: {0}")]
    UploadFailed(String),

    /// Device-to-host transfer failed.
    #[error("download from device failed: {0}")]
    DownloadFailed(String),

    /// Kernel submission failed, or host-side argument validation rejected
    /// the operation before it reached the device.
    #[error("kernel launch failed: {0}")]
    LaunchFailed(String),

    /// Runtime shader compilation failed.
    #[error("could not compile shader: {0}")]
    CouldNotCompileShader(String),

    /// The kernel's declared shader-API version or type is unsupported.
    #[error("shader version or type not supported: {0}")]
    ShaderVersionNotSupported(String),

    /// Descriptor pool/set construction or update failed.
    #[error("could not update kernel descriptors: {0}")]
    CouldNotUpdateDescriptors(String),

    /// Pipeline-layout construction failed.
    #[error("could not update kernel pipeline state: {0}")]
    CouldNotUpdatePipeline(String),

    /// Shader-module construction failed.
    #[error("could not update kernel shader module: {0}")]
    CouldNotUpdateKernelModule(String),

    /// Compute-pipeline construction failed.
    #[error("could not create compute pipeline: {0}")]
    CouldNotCreatePipeline(String),

    /// Kernel registration was rejected or a sub-resource failed without a
    /// more specific variant.
    #[error("could not register kernel: {0}")]
    CouldNotRegisterKernel(String),

    /// Recording the dispatch into the command buffer failed.
    #[error("could not dispatch kernel to command buffer: {0}")]
    CouldNotDispatchKernel(String),

    /// The fence wait expired before the kernel completed.
    #[error("kernel wait timed out")]
    KernelTimeoutReached,
}
