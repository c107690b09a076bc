//! Integration tests that dispatch real Vulkan work.
//!
//! These require a Vulkan-capable GPU plus a GLSL compiler (`glslc` or
//! `glslangValidator`) on PATH and are marked #[ignore] by default.
//! Run with: cargo test -- --ignored

use std::path::{Path, PathBuf};

use bitgemm::{
    cpu, AllocMethod, AppConfig, BinmatmulSandbox, ComputeContext, DataDomain, DeviceAlgorithms,
    DeviceError, DeviceSelect, DownloadMethod, MatrixOrder, UploadMethod, Vec3, Version,
    VulkanDriver,
};

fn resource_dir() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("resources")
}

fn load_config() -> AppConfig {
    let dir = resource_dir();
    AppConfig::load(&dir, &dir.join("settings.json")).expect("resource config must load")
}

fn ready_context(app_name: &str) -> ComputeContext<VulkanDriver> {
    let mut ctx: ComputeContext<VulkanDriver> = ComputeContext::new();
    ctx.init(Version::new(0, 1, 1, 0), app_name)
        .expect("Vulkan instance");
    ctx.set_device(DeviceSelect::FirstComputeCapable)
        .expect("compute-capable device");
    ctx
}

#[test]
#[ignore] // Requires GPU
fn sandbox_8x8_64bit_is_exact() {
    let report = BinmatmulSandbox::new(resource_dir())
        .run(DataDomain::PmOne, 8, 8, 64)
        .expect("sandbox run");
    assert_eq!(report.total, 64);
    assert_eq!(report.mismatches, 0);
    assert_eq!(report.max_abs_err, 0);
}

#[test]
#[ignore] // Requires GPU
fn sandbox_256x256_64bit_is_exact() {
    let report = BinmatmulSandbox::new(resource_dir())
        .run(DataDomain::PmOne, 256, 256, 64)
        .expect("sandbox run");
    assert_eq!(report.total, 65536);
    assert_eq!(report.mismatches, 0);
    assert_eq!(report.max_abs_err, 0);
}

#[test]
#[ignore] // Requires GPU
fn sandbox_grid_sweep_is_exact() {
    let sandbox = BinmatmulSandbox::new(resource_dir());
    for k_bits in [16u32, 32, 48, 64] {
        for m in (8..=256).step_by(8) {
            let report = sandbox
                .run(DataDomain::PmOne, m, m, k_bits)
                .unwrap_or_else(|e| panic!("case {m}x{m}[{k_bits}bit] failed: {e}"));
            assert!(
                report.is_exact(),
                "case {m}x{m}[{k_bits}bit]: mismatches={} max_abs_err={}",
                report.mismatches,
                report.max_abs_err
            );
        }
    }
}

#[test]
#[ignore] // Requires GPU
fn sandbox_tail_masking_boundary_widths() {
    let sandbox = BinmatmulSandbox::new(resource_dir());
    for k_bits in [1u32, 31, 32, 33, 63, 64] {
        let report = sandbox
            .run(DataDomain::PmOne, 24, 40, k_bits)
            .unwrap_or_else(|e| panic!("k_bits={k_bits} failed: {e}"));
        assert!(report.is_exact(), "k_bits={k_bits} mismatched");
    }
}

#[test]
#[ignore] // Requires GPU
fn known_three_bit_case_is_all_ones() {
    // Every row of A is (+1, -1, +1) and every column of B is all +1, so
    // every output element is 1 - 1 + 1 = 1.
    let m = 4u32;
    let n = 4u32;
    let k_bits = 3u32;
    let k_words = cpu::k_words(k_bits);

    let a: Vec<f32> = (0..m).flat_map(|_| [1.0, -1.0, 1.0]).collect();
    let b = vec![1.0f32; (k_bits * n) as usize];
    let a_bits = cpu::pack_bits(MatrixOrder::RowMajor, &a, m, k_bits).unwrap();
    let b_bits = cpu::pack_bits(MatrixOrder::ColMajor, &b, n, k_bits).unwrap();

    let config = load_config();
    let mut ctx = ready_context("known_three_bit_case");

    let word = std::mem::size_of::<u32>() as u64;
    let d_a = ctx
        .allocate(a_bits.len() as u64 * word, AllocMethod::Base)
        .unwrap();
    let d_b = ctx
        .allocate(b_bits.len() as u64 * word, AllocMethod::Base)
        .unwrap();
    let d_c = ctx
        .allocate(u64::from(m * n) * word, AllocMethod::Base)
        .unwrap();

    ctx.upload(d_a, &a_bits, UploadMethod::Sync).unwrap();
    ctx.upload(d_b, &b_bits, UploadMethod::Sync).unwrap();

    DeviceAlgorithms::new(&mut ctx, &config)
        .binmatmul(
            Vec3::new(1, 1, 1),
            Vec3::new(4, 4, 1),
            [d_a, d_b, d_c],
            m,
            n,
            k_bits,
            k_words,
        )
        .unwrap();
    ctx.wait_for_last_kernel(1_000_000_000).unwrap();

    let mut c_device = vec![0i32; (m * n) as usize];
    ctx.download(&mut c_device, d_c, DownloadMethod::Sync)
        .unwrap();
    ctx.exit();

    assert_eq!(c_device, vec![1i32; (m * n) as usize]);
}

#[test]
#[ignore] // Requires GPU
fn fill_then_multiply_round_trip() {
    let config = load_config();
    let mut ctx = ready_context("fill_multiply_round_trip");

    let count = 1024u32;
    let buffer = ctx
        .allocate(u64::from(count) * 4, AllocMethod::Base)
        .unwrap();

    let local = Vec3::new(64, 1, 1);
    let grid = Vec3::new(count.div_ceil(64), 1, 1);

    let mut algorithms = DeviceAlgorithms::new(&mut ctx, &config);
    algorithms.fill(local, grid, buffer, 3.0f32).unwrap();
    algorithms.multiply(local, grid, buffer, 0.5f32).unwrap();
    ctx.wait_for_last_kernel(1_000_000_000).unwrap();

    let mut host = vec![0.0f32; count as usize];
    ctx.download(&mut host, buffer, DownloadMethod::Sync)
        .unwrap();
    ctx.exit();

    assert!(host.iter().all(|&v| v == 1.5));
}

#[test]
#[ignore] // Requires GPU
fn zero_byte_allocation_is_surfaced() {
    let mut ctx = ready_context("zero_byte_allocation");
    let err = ctx.allocate(0, AllocMethod::Base).unwrap_err();
    assert!(matches!(
        err,
        DeviceError::CouldNotCreateBuffer(_) | DeviceError::AllocFailed(_)
    ));
    // The context stays usable after a failed allocation.
    assert!(ctx.allocate(64, AllocMethod::Base).is_ok());
    ctx.exit();
}

#[test]
#[ignore] // Requires GPU
fn zero_workgroup_dimension_is_rejected() {
    let config = load_config();
    let mut ctx = ready_context("zero_workgroup_dimension");

    let d_a = ctx.allocate(64, AllocMethod::Base).unwrap();
    let d_b = ctx.allocate(64, AllocMethod::Base).unwrap();
    let d_c = ctx.allocate(64, AllocMethod::Base).unwrap();

    let cfg = config.kernel("binmatmul").unwrap();
    let err = ctx
        .register_kernel(cfg, Vec3::new(0, 1, 1), &[d_a, d_b, d_c])
        .unwrap_err();
    assert!(matches!(err, DeviceError::CouldNotRegisterKernel(_)));
    ctx.exit();
}

#[test]
#[ignore] // Requires GPU
fn workgroup_at_device_limit_is_accepted() {
    let config = load_config();
    let mut ctx = ready_context("workgroup_at_device_limit");

    let limits = ctx.limits().unwrap();
    let max_x = limits.max_compute_work_group_size.x;
    let buffer = ctx.allocate(256, AllocMethod::Base).unwrap();

    let cfg = config.kernel("fill").unwrap();
    let task = ctx
        .register_kernel(cfg, Vec3::new(max_x, 1, 1), &[buffer])
        .expect("device-max workgroup must register");
    ctx.destroy_kernel(task).unwrap();
    ctx.exit();
}

#[test]
#[ignore] // Requires GPU
fn teardown_is_idempotent() {
    let config = load_config();
    let mut ctx = ready_context("teardown_idempotent");

    let buffer = ctx.allocate(256, AllocMethod::Base).unwrap();
    let cfg = config.kernel("fill").unwrap();
    let task = ctx
        .register_kernel(cfg, Vec3::new(64, 1, 1), &[buffer])
        .unwrap();

    ctx.destroy_kernel(task).unwrap();
    ctx.destroy_kernel(task).unwrap();

    ctx.exit();
    ctx.exit();
}

#[test]
#[ignore] // Requires GPU
fn async_transfer_modes_are_not_available() {
    let mut ctx = ready_context("async_modes");
    let buffer = ctx.allocate(64, AllocMethod::Base).unwrap();

    let data = [0u32; 16];
    assert!(matches!(
        ctx.upload(buffer, &data, UploadMethod::Async),
        Err(DeviceError::NotAvailable)
    ));
    let mut out = [0u32; 16];
    assert!(matches!(
        ctx.download(&mut out, buffer, DownloadMethod::Interrupt),
        Err(DeviceError::NotAvailable)
    ));
    ctx.exit();
}

#[test]
#[ignore] // Requires GPU
fn oversized_upload_is_rejected() {
    let mut ctx = ready_context("oversized_upload");
    let buffer = ctx.allocate(8, AllocMethod::Base).unwrap();

    let data = [0u32; 16];
    assert!(matches!(
        ctx.upload(buffer, &data, UploadMethod::Sync),
        Err(DeviceError::UploadFailed(_))
    ));
    ctx.exit();
}
