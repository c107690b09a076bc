//! Driver-polymorphic compute context.
//!
//! [`ComputeContext`] is a thin shell over a [`ComputeDriver`]: it forwards
//! every operation unchanged and only adds the typed upload/download
//! convenience layer. All state lives in the driver; the context owns it.

use crate::config::KernelConfig;
use crate::error::DeviceError;
use crate::types::{
    AllocMethod, DeviceSelect, DownloadMethod, LaunchMethod, UploadMethod, Vec3, Version,
};

/// Device capabilities surfaced to the launch-policy layer.
#[derive(Debug, Clone, Copy)]
pub struct DeviceLimits {
    /// Maximum workgroup size per dimension.
    pub max_compute_work_group_size: Vec3<u32>,
}

/// Handle to a device-resident buffer.
///
/// Handles are plain values identifying resources owned by the context that
/// allocated them; passing one to another context is undefined.
pub trait BufferHandle: Copy {
    /// Allocated size in bytes.
    fn size_bytes(&self) -> u64;
}

/// The operation set every compute driver implements.
///
/// The Vulkan driver is the only full implementation; the trait seam exists
/// so the context and launcher stay independent of the backend.
pub trait ComputeDriver {
    /// Device buffer handle type.
    type Buffer: BufferHandle;
    /// Registered kernel handle type.
    type Kernel: Copy;

    fn init(&mut self, version: Version, app_name: &str) -> Result<(), DeviceError>;
    fn set_device(&mut self, preferred: DeviceSelect) -> Result<(), DeviceError>;
    fn allocate(&mut self, size_bytes: u64, method: AllocMethod)
        -> Result<Self::Buffer, DeviceError>;
    fn upload(
        &mut self,
        dest: Self::Buffer,
        src: &[u8],
        method: UploadMethod,
    ) -> Result<(), DeviceError>;
    fn download(
        &mut self,
        dest: &mut [u8],
        src: Self::Buffer,
        method: DownloadMethod,
    ) -> Result<(), DeviceError>;
    fn register_kernel(
        &mut self,
        cfg: &KernelConfig,
        workgroup_size: Vec3<u32>,
        buffers: &[Self::Buffer],
    ) -> Result<Self::Kernel, DeviceError>;
    fn launch_kernel(
        &mut self,
        task: Self::Kernel,
        grid_size: Vec3<u32>,
        buffers: &[Self::Buffer],
        method: LaunchMethod,
        params: &[u8],
    ) -> Result<(), DeviceError>;
    fn wait_for_kernel(&mut self, task: Self::Kernel, timeout_ns: u64) -> Result<(), DeviceError>;
    fn wait_for_last_kernel(&mut self, timeout_ns: u64) -> Result<(), DeviceError>;
    fn destroy_kernel(&mut self, task: Self::Kernel) -> Result<(), DeviceError>;
    fn limits(&self) -> Result<DeviceLimits, DeviceError>;
    /// Tear down every outstanding resource. Idempotent; the context is
    /// terminal afterwards.
    fn exit(&mut self);
}

/// Compute context owning one driver instance.
#[derive(Debug, Default)]
pub struct ComputeContext<D: ComputeDriver> {
    driver: D,
}

impl<D: ComputeDriver> ComputeContext<D> {
    pub fn new() -> Self
    where
        D: Default,
    {
        Self { driver: D::default() }
    }

    pub fn init(&mut self, version: Version, app_name: &str) -> Result<(), DeviceError> {
        self.driver.init(version, app_name)
    }

    pub fn set_device(&mut self, preferred: DeviceSelect) -> Result<(), DeviceError> {
        self.driver.set_device(preferred)
    }

    pub fn allocate(
        &mut self,
        size_bytes: u64,
        method: AllocMethod,
    ) -> Result<D::Buffer, DeviceError> {
        self.driver.allocate(size_bytes, method)
    }

    /// Upload a typed host slice into `dest`.
    pub fn upload<T: Copy>(
        &mut self,
        dest: D::Buffer,
        src: &[T],
        method: UploadMethod,
    ) -> Result<(), DeviceError> {
        self.driver.upload(dest, as_bytes(src), method)
    }

    /// Download from `src` into a typed host slice.
    pub fn download<T: Copy>(
        &mut self,
        dest: &mut [T],
        src: D::Buffer,
        method: DownloadMethod,
    ) -> Result<(), DeviceError> {
        self.driver.download(as_bytes_mut(dest), src, method)
    }

    pub fn register_kernel(
        &mut self,
        cfg: &KernelConfig,
        workgroup_size: Vec3<u32>,
        buffers: &[D::Buffer],
    ) -> Result<D::Kernel, DeviceError> {
        self.driver.register_kernel(cfg, workgroup_size, buffers)
    }

    pub fn launch_kernel(
        &mut self,
        task: D::Kernel,
        grid_size: Vec3<u32>,
        buffers: &[D::Buffer],
        method: LaunchMethod,
        params: &[u8],
    ) -> Result<(), DeviceError> {
        self.driver.launch_kernel(task, grid_size, buffers, method, params)
    }

    pub fn wait_for_kernel(&mut self, task: D::Kernel, timeout_ns: u64) -> Result<(), DeviceError> {
        self.driver.wait_for_kernel(task, timeout_ns)
    }

    pub fn wait_for_last_kernel(&mut self, timeout_ns: u64) -> Result<(), DeviceError> {
        self.driver.wait_for_last_kernel(timeout_ns)
    }

    pub fn destroy_kernel(&mut self, task: D::Kernel) -> Result<(), DeviceError> {
        self.driver.destroy_kernel(task)
    }

    pub fn limits(&self) -> Result<DeviceLimits, DeviceError> {
        self.driver.limits()
    }

    pub fn exit(&mut self) {
        self.driver.exit();
    }
}

fn as_bytes<T: Copy>(slice: &[T]) -> &[u8] {
    // Plain-old-data reinterpretation; T: Copy rules out drop-relevant types.
    unsafe {
        std::slice::from_raw_parts(slice.as_ptr().cast::<u8>(), std::mem::size_of_val(slice))
    }
}

fn as_bytes_mut<T: Copy>(slice: &mut [T]) -> &mut [u8] {
    unsafe {
        std::slice::from_raw_parts_mut(
            slice.as_mut_ptr().cast::<u8>(),
            std::mem::size_of_val(slice),
        )
    }
}
