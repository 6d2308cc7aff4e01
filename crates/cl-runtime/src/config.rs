// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Runtime configuration loaded from TOML files or constructed programmatically.
//!
//! # TOML Format
//! ```toml
//! memory_budget = "256M"
//! alignment = 64
//! enable_profiling = true
//! use_lws_heuristics = true
//!
//! [device]
//! name = "Mali-G76"
//! version = "OpenCL 2.0 v1.r19p0-01rel0"
//! extensions = "cl_khr_fp16 cl_arm_non_uniform_work_group_size"
//! compute_units = 10
//! ```
//!
//! The configuration is built once at start-up and passed down to the
//! [`crate::Scheduler`]; nothing in it changes afterwards.

use device_context::{DeviceOptions, DeviceProperties};
use memory_manager::MemoryBudget;
use std::path::Path;

use crate::RuntimeError;

/// Configuration for the compute runtime.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct RuntimeConfig {
    /// Memory budget of the blob pool backing memory groups
    /// (human-readable, e.g. `"256M"`).
    pub memory_budget: String,
    /// Alignment in bytes of tensors finalised into a memory group.
    #[serde(default = "default_alignment")]
    pub alignment: usize,
    /// Whether the scheduler records per-dispatch timings.
    #[serde(default = "default_true")]
    pub enable_profiling: bool,
    /// Whether kernels pick their local work size from the per-category
    /// heuristics. When off, every dispatch leaves the choice to the driver.
    #[serde(default = "default_true")]
    pub use_lws_heuristics: bool,
    /// Raw properties of the emulated device.
    #[serde(default)]
    pub device: DeviceProperties,
}

fn default_true() -> bool {
    true
}

fn default_alignment() -> usize {
    64
}

impl RuntimeConfig {
    /// Loads configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, RuntimeError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            RuntimeError::ConfigError(format!("cannot read config '{}': {e}", path.display()))
        })?;
        Self::from_toml(&content)
    }

    /// Parses configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, RuntimeError> {
        toml::from_str(toml_str)
            .map_err(|e| RuntimeError::ConfigError(format!("TOML parse error: {e}")))
    }

    /// Serialises configuration to TOML.
    pub fn to_toml(&self) -> Result<String, RuntimeError> {
        toml::to_string_pretty(self)
            .map_err(|e| RuntimeError::ConfigError(format!("TOML serialise error: {e}")))
    }

    /// Parses the memory budget string into a [`MemoryBudget`].
    pub fn parse_budget(&self) -> Result<MemoryBudget, RuntimeError> {
        MemoryBudget::parse(&self.memory_budget)
            .map_err(|e| RuntimeError::ConfigError(format!("invalid budget: {e}")))
    }

    /// Capability snapshot of the configured device.
    pub fn device_options(&self) -> DeviceOptions {
        DeviceOptions::from_properties(&self.device)
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            memory_budget: "256M".to_string(),
            alignment: default_alignment(),
            enable_profiling: true,
            use_lws_heuristics: true,
            device: DeviceProperties::default(),
        }
    }
}
