//! Shader loading and runtime GLSL-to-SPIR-V compilation.
//!
//! Kernels marked `recompile` with GLSL sources are compiled through an
//! external compiler at registration time: `glslc` when present, otherwise
//! `glslangValidator`. Everything else loads the pre-built binary from the
//! kernel's `bin/` path. Either way the result is validated against the
//! SPIR-V magic before a shader module is created from it.

use std::fs;
use std::path::Path;
use std::process::Command;

use crate::config::KernelConfig;
use crate::error::DeviceError;
use crate::types::{KernelFormat, Version};

/// SPIR-V magic number (little-endian).
const SPIRV_MAGIC: u32 = 0x0723_0203;

/// Produce the SPIR-V words for a kernel, compiling its source if requested.
pub(crate) fn kernel_spirv_words(cfg: &KernelConfig) -> Result<Vec<u32>, DeviceError> {
    if cfg.recompile && cfg.format == KernelFormat::Glsl {
        compile_glsl(cfg)?;
    }

    let bytes = fs::read(&cfg.binary_path).map_err(|e| {
        DeviceError::CouldNotCompileShader(format!(
            "could not read {}: {e}",
            cfg.binary_path.display()
        ))
    })?;
    spirv_words(&bytes)
}

/// Compile `cfg.source_path` into `cfg.binary_path`.
fn compile_glsl(cfg: &KernelConfig) -> Result<(), DeviceError> {
    let target_env = target_env(cfg.type_version)?;

    if let Some(parent) = cfg.binary_path.parent() {
        fs::create_dir_all(parent).map_err(|e| {
            DeviceError::CouldNotCompileShader(format!(
                "could not create {}: {e}",
                parent.display()
            ))
        })?;
    }

    let result = if compiler_available("glslc") {
        log::debug!(
            "compiling {} with glslc ({target_env})",
            cfg.source_path.display()
        );
        run_glslc(&cfg.source_path, &cfg.binary_path, target_env)
    } else if compiler_available("glslangValidator") {
        log::debug!(
            "compiling {} with glslangValidator ({target_env})",
            cfg.source_path.display()
        );
        run_glslang(&cfg.source_path, &cfg.binary_path, target_env)
    } else {
        return Err(DeviceError::CouldNotCompileShader(
            "no GLSL compiler found (need glslc or glslangValidator)".to_string(),
        ));
    };
    let output = result?;

    if !output.status.success() {
        return Err(DeviceError::CouldNotCompileShader(format!(
            "{}: {}",
            cfg.source_path.display(),
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    log::info!(
        "compiled kernel \"{}\" -> {}",
        cfg.name,
        cfg.binary_path.display()
    );
    Ok(())
}

/// Map a shader-API version onto a compiler target environment.
fn target_env(version: Version) -> Result<&'static str, DeviceError> {
    match (version.variant, version.major, version.minor) {
        (0, 1, 0) => Ok("vulkan1.0"),
        (0, 1, 1) => Ok("vulkan1.1"),
        (0, 1, 2) => Ok("vulkan1.2"),
        (0, 1, 3) => Ok("vulkan1.3"),
        _ => Err(DeviceError::ShaderVersionNotSupported(format!(
            "shader API version {version}"
        ))),
    }
}

fn compiler_available(name: &str) -> bool {
    Command::new(name)
        .arg("--version")
        .output()
        .map(|out| out.status.success())
        .unwrap_or(false)
}

fn run_glslc(
    source: &Path,
    binary: &Path,
    target_env: &str,
) -> Result<std::process::Output, DeviceError> {
    Command::new("glslc")
        .arg("-fshader-stage=compute")
        .arg(format!("--target-env={target_env}"))
        .arg("-O")
        .arg(source)
        .arg("-o")
        .arg(binary)
        .output()
        .map_err(|e| DeviceError::CouldNotCompileShader(format!("could not run glslc: {e}")))
}

fn run_glslang(
    source: &Path,
    binary: &Path,
    target_env: &str,
) -> Result<std::process::Output, DeviceError> {
    Command::new("glslangValidator")
        .arg("-V")
        .arg("--target-env")
        .arg(target_env)
        .arg("-S")
        .arg("comp")
        .arg(source)
        .arg("-o")
        .arg(binary)
        .output()
        .map_err(|e| {
            DeviceError::CouldNotCompileShader(format!("could not run glslangValidator: {e}"))
        })
}

/// Validate the magic number and reinterpret a SPIR-V byte blob as words.
fn spirv_words(bytes: &[u8]) -> Result<Vec<u32>, DeviceError> {
    if bytes.len() < 4 || bytes.len() % 4 != 0 {
        return Err(DeviceError::CouldNotCompileShader(format!(
            "SPIR-V blob has invalid length {}",
            bytes.len()
        )));
    }

    let words: Vec<u32> = bytes
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();

    if words[0] != SPIRV_MAGIC {
        return Err(DeviceError::CouldNotCompileShader(format!(
            "bad SPIR-V magic 0x{:08x}",
            words[0]
        )));
    }

    Ok(words)
}
