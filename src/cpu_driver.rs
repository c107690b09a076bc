//! CPU-native compute driver.
//!
//! Implements the same operation set as the Vulkan driver entirely on the
//! host: buffers are byte vectors, kernels are resolved by configuration
//! name to built-in implementations, and a launch runs to completion
//! before returning, so every wait is trivially satisfied. Useful as a
//! fallback on machines without a GPU and as a reference backend for
//! exercising the context and launcher layers in ordinary tests.

use crate::config::KernelConfig;
use crate::context::{BufferHandle, ComputeDriver, DeviceLimits};
use crate::cpu;
use crate::error::DeviceError;
use crate::types::{
    AllocMethod, DeviceSelect, DownloadMethod, LaunchMethod, UploadMethod, Vec3, Version,
};

/// Handle to a host-resident buffer owned by a [`CpuDriver`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuBuffer {
    index: usize,
    size_bytes: u64,
}

impl BufferHandle for CpuBuffer {
    fn size_bytes(&self) -> u64 {
        self.size_bytes
    }
}

/// Handle to a kernel registered with a [`CpuDriver`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuKernel {
    index: usize,
}

/// The host-side operations a kernel name can resolve to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CpuOp {
    Fill,
    Multiply,
    Binmatmul,
}

impl CpuOp {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "fill" => Some(CpuOp::Fill),
            "multiply" => Some(CpuOp::Multiply),
            "binmatmul" => Some(CpuOp::Binmatmul),
            _ => None,
        }
    }
}

/// One registered kernel; `op` is `None` once destroyed.
struct CpuKernelSlot {
    op: Option<CpuOp>,
    param_size_bytes: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum CpuState {
    #[default]
    Uninitialised,
    InstanceReady,
    DeviceReady,
    Terminated,
}

/// Host implementation of [`ComputeDriver`].
#[derive(Default)]
pub struct CpuDriver {
    state: CpuState,
    buffers: Vec<Vec<u8>>,
    kernels: Vec<CpuKernelSlot>,
}

impl CpuDriver {
    pub fn new() -> Self {
        Self::default()
    }

    fn buffer(&self, handle: CpuBuffer) -> Result<&Vec<u8>, DeviceError> {
        self.buffers
            .get(handle.index)
            .ok_or_else(|| DeviceError::LaunchFailed("unknown buffer handle".to_string()))
    }

    fn run_op(
        &mut self,
        op: CpuOp,
        buffers: &[CpuBuffer],
        params: &[u8],
    ) -> Result<(), DeviceError> {
        match op {
            CpuOp::Fill => {
                let [out] = expect_buffers::<1>(buffers)?;
                let value = param_f32(params, 0)?;
                let count = param_u32(params, 4)? as usize;
                let data = self.buffer_mut(out)?;
                ensure_capacity(data, count * 4)?;
                for chunk in data[..count * 4].chunks_exact_mut(4) {
                    chunk.copy_from_slice(&value.to_le_bytes());
                }
                Ok(())
            }
            CpuOp::Multiply => {
                let [inout] = expect_buffers::<1>(buffers)?;
                let factor = param_f32(params, 0)?;
                let count = param_u32(params, 4)? as usize;
                let data = self.buffer_mut(inout)?;
                ensure_capacity(data, count * 4)?;
                for chunk in data[..count * 4].chunks_exact_mut(4) {
                    let value = f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
                    chunk.copy_from_slice(&(value * factor).to_le_bytes());
                }
                Ok(())
            }
            CpuOp::Binmatmul => {
                let [a, b, c] = expect_buffers::<3>(buffers)?;
                let m = param_u32(params, 0)?;
                let n = param_u32(params, 4)?;
                let k_bits = param_u32(params, 8)?;

                let a_bits = words_from_bytes(self.buffer(a)?, (m * cpu::k_words(k_bits)) as usize)?;
                let b_bits = words_from_bytes(self.buffer(b)?, (n * cpu::k_words(k_bits)) as usize)?;
                let result = cpu::binmatmul_reference(&a_bits, &b_bits, m, n, k_bits)?;

                let out = self.buffer_mut(c)?;
                ensure_capacity(out, result.len() * 4)?;
                for (chunk, value) in out.chunks_exact_mut(4).zip(&result) {
                    chunk.copy_from_slice(&value.to_le_bytes());
                }
                Ok(())
            }
        }
    }

    fn buffer_mut(&mut self, handle: CpuBuffer) -> Result<&mut Vec<u8>, DeviceError> {
        self.buffers
            .get_mut(handle.index)
            .ok_or_else(|| DeviceError::LaunchFailed("unknown buffer handle".to_string()))
    }
}

fn expect_buffers<const N: usize>(buffers: &[CpuBuffer]) -> Result<[CpuBuffer; N], DeviceError> {
    <[CpuBuffer; N]>::try_from(buffers).map_err(|_| {
        DeviceError::LaunchFailed(format!("expected {N} buffers, got {}", buffers.len()))
    })
}

fn param_u32(params: &[u8], offset: usize) -> Result<u32, DeviceError> {
    params
        .get(offset..offset + 4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .ok_or_else(|| DeviceError::LaunchFailed("push-constant block too short".to_string()))
}

fn param_f32(params: &[u8], offset: usize) -> Result<f32, DeviceError> {
    param_u32(params, offset).map(f32::from_bits)
}

fn ensure_capacity(data: &[u8], needed: usize) -> Result<(), DeviceError> {
    if data.len() < needed {
        return Err(DeviceError::LaunchFailed(format!(
            "buffer of {} bytes cannot hold {needed}",
            data.len()
        )));
    }
    Ok(())
}

fn words_from_bytes(data: &[u8], words: usize) -> Result<Vec<u32>, DeviceError> {
    ensure_capacity(data, words * 4)?;
    Ok(data[..words * 4]
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

impl ComputeDriver for CpuDriver {
    type Buffer = CpuBuffer;
    type Kernel = CpuKernel;

    fn init(&mut self, version: Version, app_name: &str) -> Result<(), DeviceError> {
        if self.state != CpuState::Uninitialised {
            return Err(DeviceError::InitFailed(
                "context is already initialised".to_string(),
            ));
        }
        log::info!("cpu context \"{app_name}\" ready (api {version})");
        self.state = CpuState::InstanceReady;
        Ok(())
    }

    fn set_device(&mut self, _preferred: DeviceSelect) -> Result<(), DeviceError> {
        if self.state != CpuState::InstanceReady {
            return Err(DeviceError::NotAvailable);
        }
        // There is exactly one host "device"; every selector matches it.
        self.state = CpuState::DeviceReady;
        Ok(())
    }

    fn allocate(&mut self, size_bytes: u64, method: AllocMethod) -> Result<CpuBuffer, DeviceError> {
        if self.state != CpuState::DeviceReady {
            return Err(DeviceError::NotAvailable);
        }
        match method {
            AllocMethod::Base => {
                if size_bytes == 0 {
                    return Err(DeviceError::CouldNotCreateBuffer(
                        "requested buffer size is zero".to_string(),
                    ));
                }
                self.buffers.push(vec![0u8; size_bytes as usize]);
                Ok(CpuBuffer { index: self.buffers.len() - 1, size_bytes })
            }
            AllocMethod::Custom => Err(DeviceError::NotAvailable),
        }
    }

    fn upload(
        &mut self,
        dest: CpuBuffer,
        src: &[u8],
        method: UploadMethod,
    ) -> Result<(), DeviceError> {
        if method != UploadMethod::Sync {
            return Err(DeviceError::NotAvailable);
        }
        if self.state != CpuState::DeviceReady {
            return Err(DeviceError::NotAvailable);
        }
        if src.len() as u64 > dest.size_bytes {
            return Err(DeviceError::UploadFailed(format!(
                "{} bytes exceed buffer of {}",
                src.len(),
                dest.size_bytes
            )));
        }
        self.buffer_mut(dest)
            .map_err(|_| DeviceError::UploadFailed("unknown buffer handle".to_string()))?
            [..src.len()]
            .copy_from_slice(src);
        Ok(())
    }

    fn download(
        &mut self,
        dest: &mut [u8],
        src: CpuBuffer,
        method: DownloadMethod,
    ) -> Result<(), DeviceError> {
        if method != DownloadMethod::Sync {
            return Err(DeviceError::NotAvailable);
        }
        if self.state != CpuState::DeviceReady {
            return Err(DeviceError::NotAvailable);
        }
        if dest.len() as u64 > src.size_bytes {
            return Err(DeviceError::DownloadFailed(format!(
                "{} bytes exceed buffer of {}",
                dest.len(),
                src.size_bytes
            )));
        }
        let data = self
            .buffer(src)
            .map_err(|_| DeviceError::DownloadFailed("unknown buffer handle".to_string()))?;
        dest.copy_from_slice(&data[..dest.len()]);
        Ok(())
    }

    fn register_kernel(
        &mut self,
        cfg: &KernelConfig,
        workgroup_size: Vec3<u32>,
        _buffers: &[CpuBuffer],
    ) -> Result<CpuKernel, DeviceError> {
        if self.state != CpuState::DeviceReady {
            return Err(DeviceError::NotAvailable);
        }
        if workgroup_size.x == 0 || workgroup_size.y == 0 || workgroup_size.z == 0 {
            return Err(DeviceError::CouldNotRegisterKernel(format!(
                "workgroup dimension is zero: ({}, {}, {})",
                workgroup_size.x, workgroup_size.y, workgroup_size.z
            )));
        }
        let op = CpuOp::from_name(&cfg.name).ok_or_else(|| {
            DeviceError::CouldNotRegisterKernel(format!(
                "no host implementation for kernel \"{}\"",
                cfg.name
            ))
        })?;

        self.kernels.push(CpuKernelSlot {
            op: Some(op),
            param_size_bytes: cfg.param_size_bytes,
        });
        log::debug!("registered host kernel \"{}\"", cfg.name);
        Ok(CpuKernel { index: self.kernels.len() - 1 })
    }

    fn launch_kernel(
        &mut self,
        task: CpuKernel,
        _grid_size: Vec3<u32>,
        buffers: &[CpuBuffer],
        method: LaunchMethod,
        params: &[u8],
    ) -> Result<(), DeviceError> {
        if method != LaunchMethod::Sync {
            return Err(DeviceError::NotAvailable);
        }
        if self.state != CpuState::DeviceReady {
            return Err(DeviceError::NotAvailable);
        }
        let slot = self
            .kernels
            .get(task.index)
            .ok_or_else(|| DeviceError::LaunchFailed("unknown kernel handle".to_string()))?;
        let op = slot
            .op
            .ok_or_else(|| DeviceError::LaunchFailed("kernel has been destroyed".to_string()))?;
        if params.len() != slot.param_size_bytes {
            return Err(DeviceError::LaunchFailed(format!(
                "push-constant block is {} bytes, kernel expects {}",
                params.len(),
                slot.param_size_bytes
            )));
        }

        // Host launches run to completion; the grid is implied by the
        // element counts in the parameter block.
        self.run_op(op, buffers, params)
    }

    fn wait_for_kernel(&mut self, _task: CpuKernel, _timeout_ns: u64) -> Result<(), DeviceError> {
        // Launches completed synchronously; nothing is ever pending.
        Ok(())
    }

    fn wait_for_last_kernel(&mut self, _timeout_ns: u64) -> Result<(), DeviceError> {
        Ok(())
    }

    fn destroy_kernel(&mut self, task: CpuKernel) -> Result<(), DeviceError> {
        if let Some(slot) = self.kernels.get_mut(task.index) {
            slot.op = None;
        }
        Ok(())
    }

    fn limits(&self) -> Result<DeviceLimits, DeviceError> {
        if self.state != CpuState::DeviceReady {
            return Err(DeviceError::NotAvailable);
        }
        Ok(DeviceLimits {
            max_compute_work_group_size: Vec3::new(1024, 1024, 64),
        })
    }

    fn exit(&mut self) {
        self.buffers.clear();
        self.kernels.clear();
        self.state = CpuState::Terminated;
    }
}
