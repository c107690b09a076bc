//! Core value types shared across the crate.
//!
//! Selector enums mirror the closed sets understood by the configuration
//! documents; string conversions live next to the enums so the config
//! loader and the CLI agree on spelling.

use std::fmt;

use crate::error::ConfigError;

/// A three-component vector of workgroup/grid dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Vec3<T> {
    pub x: T,
    pub y: T,
    pub z: T,
}

impl<T> Vec3<T> {
    pub fn new(x: T, y: T, z: T) -> Self {
        Self { x, y, z }
    }
}

/// Version tuple ordered lexicographically: variant, then major, minor, patch.
///
/// Matches the Vulkan packed-version layout, so `variant` is almost always 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Version {
    pub variant: u32,
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl Version {
    pub fn new(variant: u32, major: u32, minor: u32, patch: u32) -> Self {
        Self { variant, major, minor, patch }
    }

    /// Parse a `[variant, major, minor, patch]` JSON array.
    pub(crate) fn from_json(value: &serde_json::Value, key: &str) -> Result<Self, ConfigError> {
        let arr = value
            .as_array()
            .filter(|a| a.len() == 4)
            .ok_or_else(|| ConfigError::InvalidValueType(key.to_string()))?;
        let mut parts = [0u32; 4];
        for (slot, item) in parts.iter_mut().zip(arr) {
            *slot = item
                .as_u64()
                .and_then(|v| u32::try_from(v).ok())
                .ok_or_else(|| ConfigError::InvalidValueType(key.to_string()))?;
        }
        Ok(Self::new(parts[0], parts[1], parts[2], parts[3]))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}.{}", self.variant, self.major, self.minor, self.patch)
    }
}

/// Which driver backs a compute context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceDriver {
    VulkanNative,
    CpuNative,
}

/// Physical-device selection policy for [`set_device`](crate::ComputeContext::set_device).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceSelect {
    FirstAvailable,
    FirstComputeCapable,
    Discrete,
    Integrated,
}

/// Buffer allocation strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AllocMethod {
    #[default]
    Base,
    Custom,
}

/// Host-to-device transfer mode. Only `Sync` is implemented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UploadMethod {
    #[default]
    Sync,
    Async,
    Interrupt,
}

/// Device-to-host transfer mode. Only `Sync` is implemented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DownloadMethod {
    #[default]
    Sync,
    Async,
    Interrupt,
}

/// Kernel submission mode. Only `Sync` is implemented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LaunchMethod {
    #[default]
    Sync,
    Async,
    Interrupt,
}

/// Value distribution for randomly generated test matrices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataDomain {
    /// Each element is -1.0 or +1.0 with equal probability.
    PmOne,
    /// Uniform on [0, 1).
    ZeroOne,
    /// Uniform on [-1e6, 1e6].
    FullRange,
    /// Uniformly one of {-1.0, 0.0, +1.0}.
    Trinary,
}

impl DataDomain {
    /// Stable label used in app names and report lines.
    pub fn label(&self) -> &'static str {
        match self {
            DataDomain::PmOne => "pm_one",
            DataDomain::ZeroOne => "zero_one",
            DataDomain::FullRange => "full_range",
            DataDomain::Trinary => "trinary",
        }
    }
}

impl fmt::Display for DataDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Storage order of a dense float matrix handed to the bit packer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatrixOrder {
    RowMajor,
    ColMajor,
}

/// The kind of compute kernel a configuration entry describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelType {
    VulkanComputeShader,
}

impl KernelType {
    pub(crate) fn from_config_str(value: &str, key: &str) -> Result<Self, ConfigError> {
        match value {
            "vulkan_compute_shader" => Ok(KernelType::VulkanComputeShader),
            _ => Err(ConfigError::InvalidValueType(key.to_string())),
        }
    }

    /// Subdirectory of `<resource_dir>/kernels` holding this kernel family.
    pub fn kernel_subdir(&self) -> &'static str {
        match self {
            KernelType::VulkanComputeShader => "vk",
        }
    }

    /// Binary format this kernel type compiles to.
    pub fn bin_format(&self) -> KernelFormat {
        match self {
            KernelType::VulkanComputeShader => KernelFormat::Spirv,
        }
    }
}

/// Source or binary format of a shader file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelFormat {
    Glsl,
    Spirv,
    Hlsl,
}

impl KernelFormat {
    pub(crate) fn from_config_str(value: &str, key: &str) -> Result<Self, ConfigError> {
        match value {
            "glsl" => Ok(KernelFormat::Glsl),
            "spirv" => Ok(KernelFormat::Spirv),
            "hlsl" => Ok(KernelFormat::Hlsl),
            _ => Err(ConfigError::InvalidValueType(key.to_string())),
        }
    }

    /// File extension used for shader files of this format.
    pub fn file_ext(&self) -> &'static str {
        match self {
            KernelFormat::Glsl => ".glsl",
            KernelFormat::Spirv => ".spv",
            KernelFormat::Hlsl => ".hlsl",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_orders_lexicographically() {
        let base = Version::new(0, 1, 1, 0);
        assert!(Version::new(0, 1, 0, 9) < base);
        assert!(Version::new(0, 1, 1, 1) > base);
        assert!(Version::new(0, 2, 0, 0) > base);
        assert!(Version::new(1, 0, 0, 0) > base);
        assert_eq!(Version::new(0, 1, 1, 0), base);
    }

    #[test]
    fn version_from_json_positional() {
        let value = serde_json::json!([0, 1, 1, 0]);
        let v = Version::from_json(&value, "version").unwrap();
        assert_eq!(v, Version::new(0, 1, 1, 0));
    }

    #[test]
    fn kernel_type_round_trip() {
        let t = KernelType::from_config_str("vulkan_compute_shader", "kernel_type").unwrap();
        assert_eq!(t, KernelType::VulkanComputeShader);
        assert_eq!(t.kernel_subdir(), "vk");
        assert_eq!(t.bin_format(), KernelFormat::Spirv);
        assert!(KernelType::from_config_str("metal_shader", "kernel_type").is_err());
    }

    #[test]
    fn kernel_format_extensions() {
        assert_eq!(KernelFormat::Glsl.file_ext(), ".glsl");
        assert_eq!(KernelFormat::Spirv.file_ext(), ".spv");
        assert_eq!(KernelFormat::Hlsl.file_ext(), ".hlsl");
        assert!(KernelFormat::from_config_str("dxil", "format").is_err());
    }

    #[test]
    fn data_domain_labels() {
        assert_eq!(DataDomain::PmOne.to_string(), "pm_one");
        assert_eq!(DataDomain::Trinary.to_string(), "trinary");
    }
}
