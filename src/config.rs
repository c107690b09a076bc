//! Application and kernel configuration loading.
//!
//! Two JSON documents drive the crate: a settings file naming the kernel
//! family and output binary format, and a per-family `index.json` listing
//! every kernel with its compile options. The schema is closed, so the
//! loader walks `serde_json::Value` by hand and reports which key broke
//! instead of a generic deserialisation error.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::error::ConfigError;
use crate::types::{KernelFormat, KernelType, Version};

/// Compile and dispatch options for one named kernel.
#[derive(Debug, Clone)]
pub struct KernelConfig {
    pub name: String,
    /// Compile `source_path` at registration time instead of loading
    /// `binary_path`.
    pub recompile: bool,
    pub kernel_type: KernelType,
    pub format: KernelFormat,
    /// Shader-API version the kernel targets.
    pub type_version: Version,
    /// Exact byte size of the push-constant block the kernel expects.
    pub param_size_bytes: usize,
    pub source_path: PathBuf,
    pub binary_path: PathBuf,
}

/// Everything the launcher needs to resolve kernels by name.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub resource_dir: PathBuf,
    pub kernel_dir: PathBuf,
    pub kernel_bin_format: KernelFormat,
    pub kernels: HashMap<String, KernelConfig>,
}

impl AppConfig {
    /// Load the settings document at `settings_path` and the kernel index it
    /// points at, rooted at `resource_dir`.
    pub fn load(resource_dir: &Path, settings_path: &Path) -> Result<Self, ConfigError> {
        let settings = read_json_object(settings_path)?;

        let kernel_type_str = require_str(&settings, "kernel_type")?;
        let kernel_type = KernelType::from_config_str(kernel_type_str, "kernel_type")?;
        // kernel_format_out must be present and well-formed even though the
        // effective binary format is derived from the kernel type.
        let format_out_str = require_str(&settings, "kernel_format_out")?;
        KernelFormat::from_config_str(format_out_str, "kernel_format_out")?;

        let kernel_dir = resource_dir
            .join("kernels")
            .join(kernel_type.kernel_subdir());
        let kernel_bin_format = kernel_type.bin_format();

        let index_path = kernel_dir.join("index.json");
        let index = read_json_object(&index_path)?;
        let entries = index
            .get("compute")
            .ok_or_else(|| ConfigError::KeyNotFound("compute".to_string()))?
            .as_array()
            .ok_or_else(|| ConfigError::InvalidValueType("compute".to_string()))?;

        let mut kernels = HashMap::new();
        for entry in entries {
            let entry = entry
                .as_object()
                .ok_or_else(|| ConfigError::InvalidValueType("compute".to_string()))?;

            let name = require_str(entry, "name")?.to_string();
            let recompile = require_bool(entry, "recompile")?;
            let format = KernelFormat::from_config_str(require_str(entry, "format")?, "format")?;
            let type_version = Version::from_json(require_key(entry, "version")?, "version")?;
            let param_size_bytes = require_usize(entry, "param_size_bytes")?;
            let file = require_str(entry, "file")?;

            let bin_file = format!("{}{}", name, kernel_bin_format.file_ext());
            let kernel = KernelConfig {
                name: name.clone(),
                recompile,
                kernel_type,
                format,
                type_version,
                param_size_bytes,
                source_path: kernel_dir.join(file),
                binary_path: kernel_dir.join("bin").join(bin_file),
            };

            log::debug!(
                "indexed kernel \"{}\" (recompile={}, params={}B)",
                kernel.name,
                kernel.recompile,
                kernel.param_size_bytes
            );
            kernels.insert(name, kernel);
        }

        log::info!(
            "loaded application config: {} kernels under {}",
            kernels.len(),
            kernel_dir.display()
        );

        Ok(Self {
            resource_dir: resource_dir.to_path_buf(),
            kernel_dir,
            kernel_bin_format,
            kernels,
        })
    }

    /// Look up a kernel configuration by name.
    pub fn kernel(&self, name: &str) -> Option<&KernelConfig> {
        self.kernels.get(name)
    }
}

fn read_json_object(path: &Path) -> Result<serde_json::Map<String, Value>, ConfigError> {
    let text =
        fs::read_to_string(path).map_err(|_| ConfigError::InvalidFormat(path.to_path_buf()))?;
    let value: Value =
        serde_json::from_str(&text).map_err(|_| ConfigError::InvalidFormat(path.to_path_buf()))?;
    match value {
        Value::Object(map) => Ok(map),
        _ => Err(ConfigError::InvalidFormat(path.to_path_buf())),
    }
}

fn require_key<'a>(
    obj: &'a serde_json::Map<String, Value>,
    key: &str,
) -> Result<&'a Value, ConfigError> {
    obj.get(key)
        .ok_or_else(|| ConfigError::KeyNotFound(key.to_string()))
}

fn require_str<'a>(
    obj: &'a serde_json::Map<String, Value>,
    key: &str,
) -> Result<&'a str, ConfigError> {
    require_key(obj, key)?
        .as_str()
        .ok_or_else(|| ConfigError::InvalidValueType(key.to_string()))
}

fn require_bool(obj: &serde_json::Map<String, Value>, key: &str) -> Result<bool, ConfigError> {
    require_key(obj, key)?
        .as_bool()
        .ok_or_else(|| ConfigError::InvalidValueType(key.to_string()))
}

fn require_usize(obj: &serde_json::Map<String, Value>, key: &str) -> Result<usize, ConfigError> {
    require_key(obj, key)?
        .as_u64()
        .and_then(|v| usize::try_from(v).ok())
        .ok_or_else(|| ConfigError::InvalidValueType(key.to_string()))
}
