// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Device capability snapshot.
//!
//! A driver reports a handful of strings and numbers about the device
//! ([`DeviceProperties`]). [`DeviceOptions`] parses them once, at context
//! creation, into the typed values the runtime uses to pick code paths:
//! the OpenCL version, the GPU architecture, the DDK release and the
//! extension set.

use std::collections::BTreeSet;
use std::fmt;

/// Raw device properties as a driver reports them.
///
/// Deserializable so the emulated device can be described in the runtime
/// configuration file. Defaults to a Mali-G76 class device.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct DeviceProperties {
    /// `CL_DEVICE_NAME`, e.g. `"Mali-G76"`.
    pub name: String,
    /// `CL_DEVICE_VERSION`, e.g. `"OpenCL 2.0 v1.r19p0-01rel0.git"`.
    pub version: String,
    /// Whitespace separated `CL_DEVICE_EXTENSIONS`.
    pub extensions: String,
    pub compute_units: u32,
    /// Global memory cache size in bytes.
    pub cache_size: usize,
    /// Global memory size in bytes.
    pub global_mem_size: usize,
    pub max_work_group_size: usize,
}

impl DeviceProperties {
    /// A Mali-G76 MP10 class device with 1 GiB of global memory.
    pub fn mali_g76() -> Self {
        Self {
            name: "Mali-G76".to_string(),
            version: "OpenCL 2.0 v1.r19p0-01rel0.git".to_string(),
            extensions: [
                "cl_khr_fp16",
                "cl_khr_int64_base_atomics",
                "cl_khr_image2d_from_buffer",
                "cl_arm_non_uniform_work_group_size",
                "cl_arm_integer_dot_product_int8",
                "cl_arm_printf",
            ]
            .join(" "),
            compute_units: 10,
            cache_size: 512 * 1024,
            global_mem_size: 1024 * 1024 * 1024,
            max_work_group_size: 384,
        }
    }

    /// A Mali-T860 class (Midgard) device: OpenCL 1.2, no non-uniform
    /// work-groups, no dot product.
    pub fn mali_t860() -> Self {
        Self {
            name: "Mali-T860".to_string(),
            version: "OpenCL 1.2 v1.r12p0-04rev0.git".to_string(),
            extensions: ["cl_khr_fp16", "cl_khr_image2d_from_buffer"].join(" "),
            compute_units: 4,
            cache_size: 256 * 1024,
            global_mem_size: 512 * 1024 * 1024,
            max_work_group_size: 256,
        }
    }
}

impl Default for DeviceProperties {
    fn default() -> Self {
        Self::mali_g76()
    }
}

/// OpenCL version reported by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize)]
pub enum ClVersion {
    Unknown,
    Cl10,
    Cl11,
    Cl12,
    Cl20,
    Cl30,
}

impl ClVersion {
    /// Parses a `CL_DEVICE_VERSION` string of the form
    /// `"OpenCL <major>.<minor> <vendor specific>"`.
    pub fn parse(version: &str) -> Self {
        let Some(rest) = version.strip_prefix("OpenCL ") else {
            return ClVersion::Unknown;
        };
        let number = rest.split_whitespace().next().unwrap_or("");
        match number.split_once('.') {
            Some(("1", "0")) => ClVersion::Cl10,
            Some(("1", "1")) => ClVersion::Cl11,
            Some(("1", "2")) => ClVersion::Cl12,
            Some(("2", _)) => ClVersion::Cl20,
            Some(("3", _)) => ClVersion::Cl30,
            _ => ClVersion::Unknown,
        }
    }
}

impl fmt::Display for ClVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ClVersion::Unknown => "unknown",
            ClVersion::Cl10 => "1.0",
            ClVersion::Cl11 => "1.1",
            ClVersion::Cl12 => "1.2",
            ClVersion::Cl20 => "2.x",
            ClVersion::Cl30 => "3.x",
        };
        f.write_str(s)
    }
}

/// GPU architecture family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
pub enum GpuArch {
    Midgard,
    Bifrost,
    Valhall,
}

/// GPU target, as specific as the device name allows.
///
/// The bare family variants are used when only the family is known.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
pub enum GpuTarget {
    Midgard,
    Bifrost,
    Valhall,
    T600,
    T700,
    T800,
    G71,
    G72,
    G51,
    G52,
    G76,
    G57,
    G77,
    G78,
}

impl GpuTarget {
    /// Extracts the target from a device name such as `"Mali-G76"` or
    /// `"Mali-T860"`. Names without a Mali model fall back to the Midgard
    /// family.
    pub fn from_name(name: &str) -> Self {
        let Some(idx) = name.find("Mali-") else {
            tracing::info!(name, "no Mali GPU model in device name, defaulting to Midgard");
            return GpuTarget::Midgard;
        };
        let model = &name[idx + "Mali-".len()..];
        let mut chars = model.chars();
        let series = chars.next().unwrap_or(' ');
        let digits: String = chars.take_while(|c| c.is_ascii_digit()).collect();

        match (series, digits.as_str()) {
            ('T', d) if d.starts_with('6') => GpuTarget::T600,
            ('T', d) if d.starts_with('7') => GpuTarget::T700,
            ('T', d) if d.starts_with('8') => GpuTarget::T800,
            ('G', "71") => GpuTarget::G71,
            ('G', "72") => GpuTarget::G72,
            ('G', "51") => GpuTarget::G51,
            ('G', "52") => GpuTarget::G52,
            ('G', "76") => GpuTarget::G76,
            ('G', "57") => GpuTarget::G57,
            ('G', "77") => GpuTarget::G77,
            ('G', "78") => GpuTarget::G78,
            ('G', d) if d.len() == 3 => GpuTarget::Valhall,
            ('G', _) => {
                tracing::warn!(name, "unrecognised Mali G-series model, assuming Bifrost");
                GpuTarget::Bifrost
            }
            _ => {
                tracing::warn!(name, "unrecognised Mali model, assuming Midgard");
                GpuTarget::Midgard
            }
        }
    }

    /// The architecture family this target belongs to.
    pub fn arch(self) -> GpuArch {
        match self {
            GpuTarget::Midgard | GpuTarget::T600 | GpuTarget::T700 | GpuTarget::T800 => {
                GpuArch::Midgard
            }
            GpuTarget::Bifrost
            | GpuTarget::G71
            | GpuTarget::G72
            | GpuTarget::G51
            | GpuTarget::G52
            | GpuTarget::G76 => GpuArch::Bifrost,
            GpuTarget::Valhall | GpuTarget::G57 | GpuTarget::G77 | GpuTarget::G78 => {
                GpuArch::Valhall
            }
        }
    }
}

/// Parses the DDK release number from the `r<N>p<M>` token of a driver
/// version string.
fn parse_ddk_version(version: &str) -> Option<u32> {
    let bytes = version.as_bytes();
    for (i, &b) in bytes.iter().enumerate() {
        if b != b'r' {
            continue;
        }
        let digits: String = version[i + 1..]
            .chars()
            .take_while(|c| c.is_ascii_digit())
            .collect();
        if digits.is_empty() {
            continue;
        }
        if bytes.get(i + 1 + digits.len()) == Some(&b'p') {
            return digits.parse().ok();
        }
    }
    None
}

/// Immutable snapshot of a device's capabilities.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct DeviceOptions {
    pub name: String,
    pub version: String,
    pub cl_version: ClVersion,
    pub extensions: BTreeSet<String>,
    /// DDK release (`N` of `rNpM`), if the version string carries one.
    pub ddk_version: Option<u32>,
    pub gpu_target: GpuTarget,
    pub compute_units: u32,
    pub cache_size: usize,
    pub global_mem_size: usize,
    pub max_work_group_size: usize,
}

impl DeviceOptions {
    /// Parses raw driver properties into a capability snapshot.
    pub fn from_properties(props: &DeviceProperties) -> Self {
        let options = Self {
            name: props.name.clone(),
            version: props.version.clone(),
            cl_version: ClVersion::parse(&props.version),
            extensions: props
                .extensions
                .split_whitespace()
                .map(str::to_string)
                .collect(),
            ddk_version: parse_ddk_version(&props.version),
            gpu_target: GpuTarget::from_name(&props.name),
            compute_units: props.compute_units,
            cache_size: props.cache_size,
            global_mem_size: props.global_mem_size,
            max_work_group_size: props.max_work_group_size.max(1),
        };
        tracing::debug!(
            name = %options.name,
            cl_version = %options.cl_version,
            target = ?options.gpu_target,
            "device options parsed"
        );
        options
    }

    pub fn supports_extension(&self, extension: &str) -> bool {
        self.extensions.contains(extension)
    }

    pub fn cl_version(&self) -> ClVersion {
        self.cl_version
    }

    pub fn gpu_arch(&self) -> GpuArch {
        self.gpu_target.arch()
    }

    /// Half-precision arithmetic (`cl_khr_fp16`).
    pub fn fp16_support(&self) -> bool {
        self.supports_extension("cl_khr_fp16")
    }

    /// 8-bit dot product instructions.
    ///
    /// Reported through `cl_arm_integer_dot_product_int8`; G76 and G52
    /// ship with it even on drivers that do not advertise the extension.
    pub fn dot8_support(&self) -> bool {
        self.supports_extension("cl_arm_integer_dot_product_int8")
            || matches!(self.gpu_target, GpuTarget::G76 | GpuTarget::G52)
    }

    /// Work-group sizes that do not divide the global size.
    pub fn non_uniform_workgroup_support(&self) -> bool {
        self.supports_extension("cl_arm_non_uniform_work_group_size")
    }

    /// Creating 2D images that alias a buffer.
    pub fn image2d_from_buffer_support(&self) -> bool {
        self.supports_extension("cl_khr_image2d_from_buffer")
    }

    /// Whether kernels should pad their global size with dummy work items.
    ///
    /// Every supported Mali driver benefits from it, so this is always on.
    pub fn preferred_dummy_work_items_support(&self) -> bool {
        true
    }

    /// Returns a summary string suitable for logging or CLI display.
    ///
    /// # Example output
    /// ```text
    /// Device: Mali-G76 (Bifrost, OpenCL 2.x, DDK r19), 10 CUs, 1024 MB, fp16 dot8 non-uniform
    /// ```
    pub fn summary(&self) -> String {
        let mut features = Vec::new();
        if self.fp16_support() {
            features.push("fp16");
        }
        if self.dot8_support() {
            features.push("dot8");
        }
        if self.non_uniform_workgroup_support() {
            features.push("non-uniform");
        }
        let ddk = self
            .ddk_version
            .map(|v| format!(", DDK r{v}"))
            .unwrap_or_default();
        format!(
            "Device: {} ({:?}, OpenCL {}{ddk}), {} CUs, {} MB, {}",
            self.name,
            self.gpu_arch(),
            self.cl_version,
            self.compute_units,
            self.global_mem_size / (1024 * 1024),
            features.join(" "),
        )
    }
}

impl Default for DeviceOptions {
    fn default() -> Self {
        Self::from_properties(&DeviceProperties::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_cl_version() {
        assert_eq!(ClVersion::parse("OpenCL 1.2 v1.r12p0"), ClVersion::Cl12);
        assert_eq!(ClVersion::parse("OpenCL 2.0 v1.r19p0"), ClVersion::Cl20);
        assert_eq!(ClVersion::parse("OpenCL 2.1"), ClVersion::Cl20);
        assert_eq!(ClVersion::parse("OpenCL 3.0 foo"), ClVersion::Cl30);
        assert_eq!(ClVersion::parse("OpenCL 1.0"), ClVersion::Cl10);
        assert_eq!(ClVersion::parse("Vulkan 1.3"), ClVersion::Unknown);
        assert!(ClVersion::Cl20 > ClVersion::Cl12);
    }

    #[test]
    fn test_parse_ddk_version() {
        assert_eq!(parse_ddk_version("OpenCL 2.0 v1.r19p0-01rel0.git"), Some(19));
        assert_eq!(parse_ddk_version("OpenCL 1.2 v1.r8p0"), Some(8));
        assert_eq!(parse_ddk_version("OpenCL 1.2 release"), None);
    }

    #[test]
    fn test_gpu_target_from_name() {
        assert_eq!(GpuTarget::from_name("Mali-G76"), GpuTarget::G76);
        assert_eq!(GpuTarget::from_name("Mali-G76 r0p0"), GpuTarget::G76);
        assert_eq!(GpuTarget::from_name("Mali-T860"), GpuTarget::T800);
        assert_eq!(GpuTarget::from_name("Mali-G710"), GpuTarget::Valhall);
        assert_eq!(GpuTarget::from_name("Mali-G31"), GpuTarget::Bifrost);
        assert_eq!(GpuTarget::from_name("Adreno 640"), GpuTarget::Midgard);
        assert_eq!(GpuTarget::G77.arch(), GpuArch::Valhall);
        assert_eq!(GpuTarget::T700.arch(), GpuArch::Midgard);
    }

    #[test]
    fn test_capabilities_g76() {
        let opts = DeviceOptions::default();
        assert_eq!(opts.gpu_arch(), GpuArch::Bifrost);
        assert_eq!(opts.ddk_version, Some(19));
        assert!(opts.fp16_support());
        assert!(opts.dot8_support());
        assert!(opts.non_uniform_workgroup_support());
        assert!(opts.image2d_from_buffer_support());
        assert!(opts.preferred_dummy_work_items_support());
    }

    #[test]
    fn test_capabilities_t860() {
        let opts = DeviceOptions::from_properties(&DeviceProperties::mali_t860());
        assert_eq!(opts.cl_version(), ClVersion::Cl12);
        assert!(!opts.dot8_support());
        assert!(!opts.non_uniform_workgroup_support());
    }

    #[test]
    fn test_summary_format() {
        let summary = DeviceOptions::default().summary();
        assert!(summary.contains("Mali-G76"));
        assert!(summary.contains("Bifrost"));
        assert!(summary.contains("DDK r19"));
        assert!(summary.contains("fp16 dot8 non-uniform"));
    }

    #[test]
    fn test_properties_partial_json() {
        let props: DeviceProperties =
            serde_json::from_str(r#"{"name": "Mali-G52", "compute_units": 2}"#).unwrap();
        assert_eq!(props.compute_units, 2);
        assert_eq!(props.max_work_group_size, 384);
        let opts = DeviceOptions::from_properties(&props);
        assert_eq!(opts.gpu_target, GpuTarget::G52);
    }
}
