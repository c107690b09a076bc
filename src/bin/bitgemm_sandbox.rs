//! Binary-GEMM sandbox runner.
//!
//! Runs the CPU-reference vs GPU comparison for a single case, or sweeps
//! the full regression grid with `--sweep`. Exits non-zero on any
//! mismatch, so the tool doubles as a hardware smoke test:
//!
//! ```text
//! bitgemm_sandbox --m 256 --n 256 --k-bits 64
//! bitgemm_sandbox --sweep
//! ```

use clap::Parser;

use bitgemm::{BinmatmulSandbox, DataDomain};

#[derive(Parser)]
#[command(name = "bitgemm_sandbox")]
#[command(about = "Validate the Vulkan binary-GEMM kernel against its CPU reference")]
struct Args {
    /// Rows of A and C.
    #[arg(long, default_value_t = 256)]
    m: u32,

    /// Columns of B and C.
    #[arg(long, default_value_t = 256)]
    n: u32,

    /// Shared dimension in bits.
    #[arg(long, default_value_t = 64)]
    k_bits: u32,

    /// Value distribution: pm_one, zero_one, full_range, trinary.
    #[arg(long, default_value = "pm_one")]
    domain: String,

    /// Resource directory holding settings.json and the kernel tree.
    #[arg(long)]
    resources: Option<std::path::PathBuf>,

    /// Run the full regression grid instead of a single case.
    #[arg(long)]
    sweep: bool,
}

fn parse_domain(name: &str) -> Result<DataDomain, String> {
    match name {
        "pm_one" => Ok(DataDomain::PmOne),
        "zero_one" => Ok(DataDomain::ZeroOne),
        "full_range" => Ok(DataDomain::FullRange),
        "trinary" => Ok(DataDomain::Trinary),
        _ => Err(format!("unknown data domain \"{name}\"")),
    }
}

fn run_case(sandbox: &BinmatmulSandbox, domain: DataDomain, m: u32, n: u32, k_bits: u32) -> bool {
    let label = format!("{domain}_{m}x{n}_{k_bits}bit");
    match sandbox.run(domain, m, n, k_bits) {
        Ok(report) if report.is_exact() => {
            println!(
                "[binmatmul] {label} ok (M={m}, N={n}, K_bits={k_bits}, total={})",
                report.total
            );
            true
        }
        Ok(report) => {
            eprintln!(
                "[binmatmul] {label} mismatches={} max_abs_err={}",
                report.mismatches, report.max_abs_err
            );
            false
        }
        Err(e) => {
            eprintln!("[binmatmul] {label} failed: {e}");
            false
        }
    }
}

fn run_sweep(sandbox: &BinmatmulSandbox) -> bool {
    let domains = [
        DataDomain::FullRange,
        DataDomain::PmOne,
        DataDomain::ZeroOne,
        DataDomain::Trinary,
    ];
    let k_bit_values = [16u32, 32, 48, 64];

    let mut all_passed = true;
    let mut total_cases = 0usize;

    for domain in domains {
        let mut domain_passed = true;
        let mut domain_cases = 0usize;

        for m in (8..=256).step_by(8) {
            let n = m;
            for k_bits in k_bit_values {
                domain_cases += 1;
                total_cases += 1;
                let ok = run_case(sandbox, domain, m, n, k_bits);
                domain_passed = ok && domain_passed;
                all_passed = ok && all_passed;
            }
        }

        if domain_passed {
            println!("[binmatmul] domain={domain} all cases passed ({domain_cases})");
        } else {
            eprintln!("[binmatmul] domain={domain} detected failures ({domain_cases} total cases)");
        }
    }

    if all_passed {
        println!("[binmatmul] completed {total_cases} combinations without error");
    } else {
        eprintln!("[binmatmul] sandbox regression detected across {total_cases} combinations");
    }
    all_passed
}

fn main() -> std::process::ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let args = Args::parse();
    let sandbox = match args.resources {
        Some(dir) => BinmatmulSandbox::new(dir),
        None => BinmatmulSandbox::with_crate_resources(),
    };

    let ok = if args.sweep {
        run_sweep(&sandbox)
    } else {
        match parse_domain(&args.domain) {
            Ok(domain) => run_case(&sandbox, domain, args.m, args.n, args.k_bits),
            Err(e) => {
                eprintln!("{e}");
                false
            }
        }
    };

    if ok {
        std::process::ExitCode::SUCCESS
    } else {
        std::process::ExitCode::FAILURE
    }
}
