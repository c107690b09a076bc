//! Per-operation kernel launchers.
//!
//! Each operation resolves its kernel configuration by name, packs the
//! scalar parameters into a tight little-endian push-constant block, and
//! hands registration and submission to the context. Nothing here waits for
//! the device; callers sequence with
//! [`wait_for_last_kernel`](crate::ComputeContext::wait_for_last_kernel).

use crate::config::AppConfig;
use crate::context::{BufferHandle, ComputeContext, ComputeDriver};
use crate::error::DeviceError;
use crate::types::{LaunchMethod, Vec3};

/// Preferred workgroup edge for two-dimensional kernels.
pub const PREFERRED_TILE: u32 = 16;

/// Scalar types that can travel in a push-constant block.
pub trait ScalarParam: Copy {
    fn write_le(&self, out: &mut Vec<u8>);
}

impl ScalarParam for f32 {
    fn write_le(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.to_le_bytes());
    }
}

impl ScalarParam for u32 {
    fn write_le(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.to_le_bytes());
    }
}

impl ScalarParam for i32 {
    fn write_le(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.to_le_bytes());
    }
}

/// Workgroup edge for one output dimension: the preferred tile capped by
/// the device limit, falling back to the largest power of two that still
/// fits a small dimension.
pub fn choose_tile(dim: u32, preferred: u32, max_local: u32) -> u32 {
    let capped = preferred.min(max_local);
    if dim >= capped {
        return capped;
    }
    for tile in [8u32, 4, 2] {
        if dim >= tile {
            return tile;
        }
    }
    1
}

/// Number of workgroups covering `value` elements at `tile` per group.
pub fn ceil_div(value: u32, tile: u32) -> u32 {
    value.div_ceil(tile)
}

/// Launches the named device kernels against one compute context.
pub struct DeviceAlgorithms<'a, D: ComputeDriver> {
    ctx: &'a mut ComputeContext<D>,
    config: &'a AppConfig,
}

impl<'a, D: ComputeDriver> DeviceAlgorithms<'a, D> {
    pub fn new(ctx: &'a mut ComputeContext<D>, config: &'a AppConfig) -> Self {
        Self { ctx, config }
    }

    /// Set every `T`-element of `buffer` to `value`.
    pub fn fill<T: ScalarParam>(
        &mut self,
        workgroup_size: Vec3<u32>,
        grid_size: Vec3<u32>,
        buffer: D::Buffer,
        value: T,
    ) -> Result<(), DeviceError> {
        let count = (buffer.size_bytes() / std::mem::size_of::<T>() as u64) as u32;
        let mut params = Vec::with_capacity(8);
        value.write_le(&mut params);
        count.write_le(&mut params);

        self.submit("fill", workgroup_size, grid_size, &[buffer], &params)
    }

    /// Scale every `T`-element of `buffer` by `factor` in place.
    pub fn multiply<T: ScalarParam>(
        &mut self,
        workgroup_size: Vec3<u32>,
        grid_size: Vec3<u32>,
        buffer: D::Buffer,
        factor: T,
    ) -> Result<(), DeviceError> {
        let count = (buffer.size_bytes() / std::mem::size_of::<T>() as u64) as u32;
        let mut params = Vec::with_capacity(8);
        factor.write_le(&mut params);
        count.write_le(&mut params);

        self.submit("multiply", workgroup_size, grid_size, &[buffer], &params)
    }

    /// Binary GEMM over packed operands: `c = a_bits x b_bits`.
    ///
    /// Buffer order is `[a_bits, b_bits, c]`, matching the shader bindings.
    #[allow(clippy::too_many_arguments)]
    pub fn binmatmul(
        &mut self,
        grid_size: Vec3<u32>,
        local_size: Vec3<u32>,
        buffers: [D::Buffer; 3],
        m: u32,
        n: u32,
        k_bits: u32,
        k_words: u32,
    ) -> Result<(), DeviceError> {
        let mut params = Vec::with_capacity(16);
        m.write_le(&mut params);
        n.write_le(&mut params);
        k_bits.write_le(&mut params);
        k_words.write_le(&mut params);

        self.submit("binmatmul", local_size, grid_size, &buffers, &params)
    }

    fn submit(
        &mut self,
        name: &str,
        workgroup_size: Vec3<u32>,
        grid_size: Vec3<u32>,
        buffers: &[D::Buffer],
        params: &[u8],
    ) -> Result<(), DeviceError> {
        let cfg = self.config.kernel(name).ok_or_else(|| {
            DeviceError::LaunchFailed(format!("kernel \"{name}\" is not configured"))
        })?;

        if params.len() != cfg.param_size_bytes {
            return Err(DeviceError::LaunchFailed(format!(
                "kernel \"{name}\" declares {} push-constant bytes, packed {}",
                cfg.param_size_bytes,
                params.len()
            )));
        }

        let task = self.ctx.register_kernel(cfg, workgroup_size, buffers)?;
        self.ctx
            .launch_kernel(task, grid_size, buffers, LaunchMethod::Sync, params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn choose_tile_prefers_sixteen_for_large_dims() {
        assert_eq!(choose_tile(256, 16, 1024), 16);
        assert_eq!(choose_tile(16, 16, 1024), 16);
    }

    #[test]
    fn choose_tile_respects_device_limit() {
        assert_eq!(choose_tile(256, 16, 8), 8);
        assert_eq!(choose_tile(4, 16, 2), 2);
    }

    #[test]
    fn choose_tile_falls_back_to_power_of_two() {
        assert_eq!(choose_tile(12, 16, 1024), 8);
        assert_eq!(choose_tile(7, 16, 1024), 4);
        assert_eq!(choose_tile(3, 16, 1024), 2);
        assert_eq!(choose_tile(1, 16, 1024), 1);
    }

    #[test]
    fn ceil_div_rounds_up() {
        assert_eq!(ceil_div(256, 16), 16);
        assert_eq!(ceil_div(257, 16), 17);
        assert_eq!(ceil_div(1, 16), 1);
    }

    #[test]
    fn scalar_params_pack_little_endian() {
        let mut block = Vec::new();
        1.0f32.write_le(&mut block);
        7u32.write_le(&mut block);
        assert_eq!(block.len(), 8);
        assert_eq!(&block[0..4], &1.0f32.to_le_bytes());
        assert_eq!(&block[4..8], &[7, 0, 0, 0]);

        let mut block = Vec::new();
        (-3i32).write_le(&mut block);
        assert_eq!(block, (-3i32).to_le_bytes());
    }

    #[test]
    fn binmatmul_params_are_sixteen_bytes() {
        let mut block = Vec::new();
        for v in [8u32, 8, 64, 2] {
            v.write_le(&mut block);
        }
        assert_eq!(block.len(), 16);
    }
}
