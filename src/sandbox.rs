//! End-to-end correctness harness.
//!
//! Pairs the CPU reference GEMM with the GPU kernel on identical random
//! inputs and reports element mismatches. A report with zero mismatches is
//! the crate's primary acceptance signal, so the harness drives the whole
//! public surface: config load, context bring-up, allocation, transfers,
//! tile policy, dispatch, fence wait, and teardown.

use std::path::{Path, PathBuf};

use crate::config::AppConfig;
use crate::context::ComputeContext;
use crate::cpu;
use crate::error::DeviceError;
use crate::launcher::{ceil_div, choose_tile, DeviceAlgorithms, PREFERRED_TILE};
use crate::types::{
    AllocMethod, DataDomain, DeviceSelect, DownloadMethod, MatrixOrder, UploadMethod, Vec3,
    Version,
};
use crate::vulkan::VulkanDriver;

/// Seed for the activation-side matrix `A`.
const SEED_A: u32 = 7_937_929;
/// Seed for the weight-side matrix `B`.
const SEED_B: u32 = 732_973_980;
/// How long the harness waits on the GEMM fence.
const KERNEL_TIMEOUT_NS: u64 = 1_000_000_000;

/// Outcome of one CPU-vs-GPU comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SandboxReport {
    /// Largest absolute difference between host and device elements.
    pub max_abs_err: i32,
    /// Number of elements that differ at all.
    pub mismatches: usize,
    /// Total compared elements (`m * n`).
    pub total: usize,
}

impl SandboxReport {
    pub fn is_exact(&self) -> bool {
        self.mismatches == 0 && self.max_abs_err == 0
    }
}

/// Runs the binary-GEMM kernel against its CPU reference.
pub struct BinmatmulSandbox {
    resource_dir: PathBuf,
}

impl BinmatmulSandbox {
    pub fn new(resource_dir: impl Into<PathBuf>) -> Self {
        Self { resource_dir: resource_dir.into() }
    }

    /// Harness rooted at the crate's own `resources/` directory.
    pub fn with_crate_resources() -> Self {
        Self::new(Path::new(env!("CARGO_MANIFEST_DIR")).join("resources"))
    }

    /// Execute one `m x n x k_bits` case and compare element-wise.
    pub fn run(
        &self,
        domain: DataDomain,
        m: u32,
        n: u32,
        k_bits: u32,
    ) -> Result<SandboxReport, DeviceError> {
        let config = AppConfig::load(&self.resource_dir, &self.resource_dir.join("settings.json"))
            .map_err(|e| DeviceError::InitFailed(e.to_string()))?;

        let k_words = cpu::k_words(k_bits);

        let a = cpu::random_matrix(domain, m, k_bits, SEED_A)?;
        let b = cpu::random_matrix(domain, k_bits, n, SEED_B)?;
        let a_bits = cpu::pack_bits(MatrixOrder::RowMajor, &a, m, k_bits)?;
        let b_bits = cpu::pack_bits(MatrixOrder::ColMajor, &b, n, k_bits)?;
        let c_host = cpu::binmatmul_reference(&a_bits, &b_bits, m, n, k_bits)?;
        let mut c_device = vec![0i32; c_host.len()];

        let mut ctx: ComputeContext<VulkanDriver> = ComputeContext::new();
        let result = run_device_side(
            &mut ctx, &config, domain, m, n, k_bits, k_words, &a_bits, &b_bits, &mut c_device,
        );
        ctx.exit();
        result?;

        let mut max_abs_err = 0i32;
        let mut mismatches = 0usize;
        for (device, host) in c_device.iter().zip(&c_host) {
            let err = (device - host).abs();
            max_abs_err = max_abs_err.max(err);
            if err != 0 {
                mismatches += 1;
            }
        }

        let report = SandboxReport { max_abs_err, mismatches, total: c_host.len() };
        log::info!(
            "binmatmul sandbox {domain} {m}x{n}[{k_bits}bit]: mismatches={}/{} max_abs_err={}",
            report.mismatches,
            report.total,
            report.max_abs_err
        );
        Ok(report)
    }
}

#[allow(clippy::too_many_arguments)]
fn run_device_side(
    ctx: &mut ComputeContext<VulkanDriver>,
    config: &AppConfig,
    domain: DataDomain,
    m: u32,
    n: u32,
    k_bits: u32,
    k_words: u32,
    a_bits: &[u32],
    b_bits: &[u32],
    c_device: &mut [i32],
) -> Result<(), DeviceError> {
    let app_name = format!("binmatmul_{domain}_{m}x{n}[{k_bits}bit]");
    ctx.init(Version::new(0, 1, 1, 0), &app_name)?;
    ctx.set_device(DeviceSelect::FirstComputeCapable)?;

    let word = std::mem::size_of::<u32>() as u64;
    let d_a = ctx.allocate(a_bits.len() as u64 * word, AllocMethod::Base)?;
    let d_b = ctx.allocate(b_bits.len() as u64 * word, AllocMethod::Base)?;
    let d_c = ctx.allocate(u64::from(m) * u64::from(n) * word, AllocMethod::Base)?;

    ctx.upload(d_a, a_bits, UploadMethod::Sync)?;
    ctx.upload(d_b, b_bits, UploadMethod::Sync)?;

    let limits = ctx.limits()?;
    let local_x = choose_tile(n, PREFERRED_TILE, limits.max_compute_work_group_size.x);
    let local_y = choose_tile(m, PREFERRED_TILE, limits.max_compute_work_group_size.y);
    let local_size = Vec3::new(local_x, local_y, 1);
    let grid_size = Vec3::new(ceil_div(n, local_x), ceil_div(m, local_y), 1);

    DeviceAlgorithms::new(ctx, config).binmatmul(
        grid_size,
        local_size,
        [d_a, d_b, d_c],
        m,
        n,
        k_bits,
        k_words,
    )?;

    ctx.wait_for_last_kernel(KERNEL_TIMEOUT_NS)?;
    ctx.download(c_device, d_c, DownloadMethod::Sync)?;
    Ok(())
}
