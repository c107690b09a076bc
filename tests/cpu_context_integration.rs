//! End-to-end tests through the context facade on the CPU-native driver.
//!
//! These run everywhere (no GPU required) and exercise the same config,
//! launcher, and context code paths the Vulkan backend uses.

use std::path::{Path, PathBuf};

use bitgemm::{
    cpu, AllocMethod, AppConfig, ComputeContext, CpuDriver, DataDomain, DeviceAlgorithms,
    DeviceError, DeviceSelect, DownloadMethod, MatrixOrder, UploadMethod, Vec3, Version,
};

fn resource_dir() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("resources")
}

fn load_config() -> AppConfig {
    let dir = resource_dir();
    AppConfig::load(&dir, &dir.join("settings.json")).expect("resource config must load")
}

fn ready_context(app_name: &str) -> ComputeContext<CpuDriver> {
    let mut ctx: ComputeContext<CpuDriver> = ComputeContext::new();
    ctx.init(Version::new(0, 1, 1, 0), app_name).unwrap();
    ctx.set_device(DeviceSelect::FirstComputeCapable).unwrap();
    ctx
}

#[test]
fn binmatmul_matches_reference_end_to_end() {
    let m = 24u32;
    let n = 40u32;
    let k_bits = 33u32;
    let k_words = cpu::k_words(k_bits);

    let a = cpu::random_matrix(DataDomain::PmOne, m, k_bits, 123).unwrap();
    let b = cpu::random_matrix(DataDomain::PmOne, k_bits, n, 321).unwrap();
    let a_bits = cpu::pack_bits(MatrixOrder::RowMajor, &a, m, k_bits).unwrap();
    let b_bits = cpu::pack_bits(MatrixOrder::ColMajor, &b, n, k_bits).unwrap();
    let expected = cpu::binmatmul_reference(&a_bits, &b_bits, m, n, k_bits).unwrap();

    let config = load_config();
    let mut ctx = ready_context("cpu_binmatmul");

    let word = std::mem::size_of::<u32>() as u64;
    let d_a = ctx
        .allocate(a_bits.len() as u64 * word, AllocMethod::Base)
        .unwrap();
    let d_b = ctx
        .allocate(b_bits.len() as u64 * word, AllocMethod::Base)
        .unwrap();
    let d_c = ctx
        .allocate(u64::from(m) * u64::from(n) * word, AllocMethod::Base)
        .unwrap();

    ctx.upload(d_a, &a_bits, UploadMethod::Sync).unwrap();
    ctx.upload(d_b, &b_bits, UploadMethod::Sync).unwrap();

    let limits = ctx.limits().unwrap();
    let local_x = bitgemm::choose_tile(n, 16, limits.max_compute_work_group_size.x);
    let local_y = bitgemm::choose_tile(m, 16, limits.max_compute_work_group_size.y);
    DeviceAlgorithms::new(&mut ctx, &config)
        .binmatmul(
            Vec3::new(bitgemm::ceil_div(n, local_x), bitgemm::ceil_div(m, local_y), 1),
            Vec3::new(local_x, local_y, 1),
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

    assert_eq!(c_device, expected);
}

#[test]
fn known_three_bit_case_is_all_ones() {
    let m = 4u32;
    let n = 4u32;
    let k_bits = 3u32;

    let a: Vec<f32> = (0..m).flat_map(|_| [1.0, -1.0, 1.0]).collect();
    let b = vec![1.0f32; (k_bits * n) as usize];
    let a_bits = cpu::pack_bits(MatrixOrder::RowMajor, &a, m, k_bits).unwrap();
    let b_bits = cpu::pack_bits(MatrixOrder::ColMajor, &b, n, k_bits).unwrap();

    let config = load_config();
    let mut ctx = ready_context("cpu_three_bit");

    let d_a = ctx.allocate(a_bits.len() as u64 * 4, AllocMethod::Base).unwrap();
    let d_b = ctx.allocate(b_bits.len() as u64 * 4, AllocMethod::Base).unwrap();
    let d_c = ctx.allocate(u64::from(m * n) * 4, AllocMethod::Base).unwrap();

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
            cpu::k_words(k_bits),
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
fn fill_then_multiply_round_trip() {
    let config = load_config();
    let mut ctx = ready_context("cpu_fill_multiply");

    let count = 256u32;
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
fn zero_workgroup_dimension_is_rejected_through_facade() {
    let config = load_config();
    let mut ctx = ready_context("cpu_zero_workgroup");

    let d_a = ctx.allocate(64, AllocMethod::Base).unwrap();
    let cfg = config.kernel("binmatmul").unwrap();
    let err = ctx
        .register_kernel(cfg, Vec3::new(0, 1, 1), &[d_a])
        .unwrap_err();
    assert!(matches!(err, DeviceError::CouldNotRegisterKernel(_)));
    ctx.exit();
}

#[test]
fn teardown_is_idempotent_through_facade() {
    let config = load_config();
    let mut ctx = ready_context("cpu_teardown");

    let buffer = ctx.allocate(64, AllocMethod::Base).unwrap();
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
fn mismatched_push_constant_size_is_rejected() {
    let config = load_config();
    let mut ctx = ready_context("cpu_bad_params");

    let buffer = ctx.allocate(64, AllocMethod::Base).unwrap();
    // fill expects an 8-byte block; hand the kernel a 16-byte one.
    let cfg = config.kernel("fill").unwrap();
    let task = ctx
        .register_kernel(cfg, Vec3::new(64, 1, 1), &[buffer])
        .unwrap();
    let err = ctx
        .launch_kernel(
            task,
            Vec3::new(1, 1, 1),
            &[buffer],
            bitgemm::LaunchMethod::Sync,
            &[0u8; 16],
        )
        .unwrap_err();
    assert!(matches!(err, DeviceError::LaunchFailed(_)));
    ctx.exit();
}
