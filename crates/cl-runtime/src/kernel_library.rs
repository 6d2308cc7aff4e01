// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Kernel library and built-program cache.
//!
//! Every kernel lives in a named program. Creating a kernel looks up its
//! program, appends the device-derived build options and reuses a program
//! already built with the same options:
//!
//! ```text
//! create_kernel("gemm_mm_floating_point", {-DALPHA=2})
//!       │  kernel → program table
//!       ▼
//!   "gemm.cl" + " -DALPHA=2" + device options
//!       │  cache key: "<program>_<options>"
//!       ▼
//!   built program (hit or newly built) ──► CompiledKernel
//! ```

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use device_context::{ClError, ClVersion, DeviceOptions, NdRange};

use crate::lws::DEFAULT_LWS;
use crate::RuntimeError;

/// Kernel name → program that contains it.
const KERNEL_PROGRAMS: &[(&str, &str)] = &[
    ("arithmetic_add", "arithmetic_op.cl"),
    ("arithmetic_sub", "arithmetic_op.cl"),
    ("depthwise_convolution_3x3", "depthwise_convolution.cl"),
    ("depthwise_convolution_3x3_quantized_nchw", "depthwise_convolution_quantized.cl"),
    ("depthwise_convolution_3x3_quantized_dot8_nchw", "depthwise_convolution_quantized.cl"),
    ("elementwise_operation_ADD", "elementwise_operation.cl"),
    ("elementwise_operation_SUB", "elementwise_operation.cl"),
    ("elementwise_operation_MUL", "elementwise_operation.cl"),
    ("elementwise_operation_MIN", "elementwise_operation.cl"),
    ("elementwise_operation_MAX", "elementwise_operation.cl"),
    ("elementwise_operation_ADD_quantized", "elementwise_operation_quantized.cl"),
    ("elementwise_operation_SUB_quantized", "elementwise_operation_quantized.cl"),
    ("elementwise_operation_MUL_quantized", "elementwise_operation_quantized.cl"),
    ("elementwise_operation_MIN_quantized", "elementwise_operation_quantized.cl"),
    ("elementwise_operation_MAX_quantized", "elementwise_operation_quantized.cl"),
    ("fill_image_borders_constant", "fill_border.cl"),
    ("fill_image_borders_replicate", "fill_border.cl"),
    ("gemm_mm_floating_point", "gemm.cl"),
    ("gemm_mm_floating_point_f32_bifrost", "gemm.cl"),
    ("minmax", "minmaxloc.cl"),
    ("minmaxloc", "minmaxloc.cl"),
    ("pixelwise_mul_float", "pixelwise_mul_float.cl"),
    ("pooling_layer_2", "pooling_layer.cl"),
    ("pooling_layer_3", "pooling_layer.cl"),
    ("pooling_layer_N", "pooling_layer.cl"),
    ("pooling_layer_N_quantized", "pooling_layer_quantized.cl"),
];

// ── Build options ───────────────────────────────────────────────

/// Ordered, de-duplicated set of program build options.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildOptions {
    options: BTreeSet<String>,
}

impl BuildOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_option(&mut self, option: impl Into<String>) {
        self.options.insert(option.into());
    }

    pub fn add_option_if(&mut self, condition: bool, option: impl Into<String>) {
        if condition {
            self.add_option(option);
        }
    }

    pub fn add_option_if_else(
        &mut self,
        condition: bool,
        if_true: impl Into<String>,
        if_false: impl Into<String>,
    ) {
        if condition {
            self.add_option(if_true);
        } else {
            self.add_option(if_false);
        }
    }

    pub fn options(&self) -> &BTreeSet<String> {
        &self.options
    }

    pub fn contains(&self, option: &str) -> bool {
        self.options.contains(option)
    }

    /// The options joined the way they are passed to the compiler: each one
    /// preceded by a space.
    pub fn joined(&self) -> String {
        self.options.iter().map(|o| format!(" {o}")).collect()
    }
}

// ── Compiled kernels ────────────────────────────────────────────

/// A kernel created from a built program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledKernel {
    name: String,
    program: String,
    build_options: String,
}

impl CompiledKernel {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Full option string the program was built with, device options
    /// included.
    pub fn build_options(&self) -> &str {
        &self.build_options
    }
}

/// Hit/miss counters of the built-program cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct ProgramCacheStats {
    pub hits: u64,
    pub misses: u64,
}

impl ProgramCacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Default)]
struct ProgramCache {
    /// `"<program>_<options>"` → build options used.
    built: HashMap<String, String>,
    stats: ProgramCacheStats,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

// ── Library ─────────────────────────────────────────────────────

/// Creates kernels for one device and caches built programs.
///
/// Clones share the cache.
///
/// # Example
/// ```
/// use cl_runtime::{BuildOptions, KernelLibrary};
/// use device_context::DeviceOptions;
///
/// let library = KernelLibrary::new(DeviceOptions::default());
/// let mut opts = BuildOptions::new();
/// opts.add_option("-DDATA_TYPE=float");
///
/// let kernel = library.create_kernel("pooling_layer_2", &opts).unwrap();
/// assert_eq!(kernel.program(), "pooling_layer.cl");
/// library.create_kernel("pooling_layer_3", &opts).unwrap();
/// assert_eq!(library.num_built_programs(), 1);
/// ```
#[derive(Clone)]
pub struct KernelLibrary {
    device: Arc<DeviceOptions>,
    use_lws_heuristics: bool,
    cache: Arc<Mutex<ProgramCache>>,
}

impl KernelLibrary {
    pub fn new(device: DeviceOptions) -> Self {
        Self {
            device: Arc::new(device),
            use_lws_heuristics: true,
            cache: Arc::new(Mutex::new(ProgramCache::default())),
        }
    }

    /// Enables or disables per-category LWS selection at configure time.
    pub fn with_lws_heuristics(mut self, enabled: bool) -> Self {
        self.use_lws_heuristics = enabled;
        self
    }

    pub fn device(&self) -> &DeviceOptions {
        &self.device
    }

    pub fn use_lws_heuristics(&self) -> bool {
        self.use_lws_heuristics
    }

    /// Program containing `kernel_name`.
    pub fn program_name(&self, kernel_name: &str) -> Option<&'static str> {
        KERNEL_PROGRAMS
            .iter()
            .find(|(kernel, _)| *kernel == kernel_name)
            .map(|(_, program)| *program)
    }

    /// Options every program is built with on this device.
    ///
    /// # Errors
    /// [`ClError::BuildProgram`] when the device neither supports
    /// non-uniform work-groups nor OpenCL 2.0.
    pub fn device_build_options(&self) -> Result<String, ClError> {
        let mut options = String::new();
        if self.device.fp16_support() {
            options.push_str(" -DARM_COMPUTE_OPENCL_FP16_ENABLED=1 ");
        }
        if self.device.non_uniform_workgroup_support() {
            options.push_str(" -cl-arm-non-uniform-work-group-size ");
        } else if self.device.cl_version() >= ClVersion::Cl20 {
            options.push_str(" -cl-std=CL2.0 ");
        } else {
            return Err(ClError::BuildProgram {
                program: String::new(),
                detail: "non uniform workgroup size is not supported".to_string(),
            });
        }
        Ok(options)
    }

    /// Creates `kernel_name`, building its program unless a program with
    /// the same options was built before.
    pub fn create_kernel(
        &self,
        kernel_name: &str,
        build_options: &BuildOptions,
    ) -> Result<CompiledKernel, RuntimeError> {
        let program = self
            .program_name(kernel_name)
            .ok_or_else(|| RuntimeError::KernelNotFound(kernel_name.to_string()))?;
        let device_options = self.device_build_options().map_err(|e| match e {
            ClError::BuildProgram { detail, .. } => ClError::BuildProgram {
                program: program.to_string(),
                detail,
            },
            other => other,
        })?;

        let options = build_options.joined() + &device_options;
        let key = format!("{program}_{options}");

        let mut cache = lock(&self.cache);
        if cache.built.contains_key(&key) {
            cache.stats.hits += 1;
        } else {
            tracing::debug!(program, options = %options.trim(), "building program");
            cache.built.insert(key, options.clone());
            cache.stats.misses += 1;
        }
        Ok(CompiledKernel {
            name: kernel_name.to_string(),
            program: program.to_string(),
            build_options: options,
        })
    }

    /// Local size used when a kernel has no better hint: 128 work items
    /// along x, capped by the device work-group limit.
    pub fn default_ndrange(&self) -> NdRange {
        NdRange::new(DEFAULT_LWS.x().min(self.device.max_work_group_size), 1, 1)
    }

    pub fn num_built_programs(&self) -> usize {
        lock(&self.cache).built.len()
    }

    pub fn cache_stats(&self) -> ProgramCacheStats {
        lock(&self.cache).stats
    }

    pub fn clear_cache(&self) {
        let mut cache = lock(&self.cache);
        cache.built.clear();
        cache.stats = ProgramCacheStats::default();
    }
}

impl fmt::Debug for KernelLibrary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KernelLibrary")
            .field("device", &self.device.name)
            .field("built_programs", &self.num_built_programs())
            .field("use_lws_heuristics", &self.use_lws_heuristics)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use device_context::DeviceProperties;

    fn library(props: DeviceProperties) -> KernelLibrary {
        KernelLibrary::new(DeviceOptions::from_properties(&props))
    }

    #[test]
    fn test_build_options_sorted_and_unique() {
        let mut opts = BuildOptions::new();
        opts.add_option("-DB");
        opts.add_option("-DA");
        opts.add_option("-DA");
        opts.add_option_if(false, "-DSKIPPED");
        opts.add_option_if_else(true, "-DWRAP", "-DSATURATE");
        assert_eq!(opts.joined(), " -DA -DB -DWRAP");
        assert!(!opts.contains("-DSATURATE"));
    }

    #[test]
    fn test_device_options_g76() {
        let lib = library(DeviceProperties::mali_g76());
        let options = lib.device_build_options().unwrap();
        assert!(options.contains("-DARM_COMPUTE_OPENCL_FP16_ENABLED=1"));
        assert!(options.contains("-cl-arm-non-uniform-work-group-size"));
        assert!(!options.contains("-cl-std=CL2.0"));
    }

    #[test]
    fn test_device_options_cl20_without_extension() {
        let props = DeviceProperties {
            extensions: "cl_khr_fp16".to_string(),
            ..DeviceProperties::mali_g76()
        };
        let options = library(props).device_build_options().unwrap();
        assert!(options.contains("-cl-std=CL2.0"));
    }

    #[test]
    fn test_device_options_unsupported() {
        let lib = library(DeviceProperties::mali_t860());
        assert!(matches!(
            lib.create_kernel("gemm_mm_floating_point", &BuildOptions::new()),
            Err(RuntimeError::Device(ClError::BuildProgram { program, .. })) if program == "gemm.cl"
        ));
    }

    #[test]
    fn test_unknown_kernel() {
        let lib = library(DeviceProperties::default());
        let err = lib.create_kernel("does_not_exist", &BuildOptions::new()).unwrap_err();
        assert!(matches!(err, RuntimeError::KernelNotFound(name) if name == "does_not_exist"));
    }

    #[test]
    fn test_cache_keyed_by_program_and_options() {
        let lib = library(DeviceProperties::default());
        let mut f32_opts = BuildOptions::new();
        f32_opts.add_option("-DDATA_TYPE=float");
        let mut f16_opts = BuildOptions::new();
        f16_opts.add_option("-DDATA_TYPE=half");

        lib.create_kernel("pooling_layer_2", &f32_opts).unwrap();
        lib.create_kernel("pooling_layer_N", &f32_opts).unwrap();
        lib.create_kernel("pooling_layer_2", &f16_opts).unwrap();
        lib.create_kernel("gemm_mm_floating_point", &f32_opts).unwrap();

        assert_eq!(lib.num_built_programs(), 3);
        let stats = lib.cache_stats();
        assert_eq!(stats, ProgramCacheStats { hits: 1, misses: 3 });
        assert!((stats.hit_rate() - 0.25).abs() < 1e-9);

        // clones share the cache
        let clone = lib.clone();
        clone.clear_cache();
        assert_eq!(lib.num_built_programs(), 0);
    }

    #[test]
    fn test_default_ndrange_capped_by_device() {
        let lib = library(DeviceProperties::default());
        assert_eq!(lib.default_ndrange(), NdRange::new(128, 1, 1));

        let small = library(DeviceProperties {
            max_work_group_size: 64,
            ..DeviceProperties::default()
        });
        assert_eq!(small.default_ndrange(), NdRange::new(64, 1, 1));
    }
}
