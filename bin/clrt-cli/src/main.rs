// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # clrt
//!
//! Command-line interface for the clrt compute runtime.
//!
//! ## Usage
//! ```bash
//! # Describe the configured device and its build options
//! clrt device --config ./clrt.toml
//!
//! # Local work size a kernel category would get for a global size
//! clrt lws --kernel-type depthwise 16 16 8
//!
//! # Run a small GEMM + depthwise + min/max pipeline and print metrics
//! clrt demo --size 32 --json
//! ```

mod commands;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "clrt",
    about = "OpenCL-style tensor runtime with window dispatch and work size heuristics",
    version,
    author
)]
struct Cli {
    /// Path to a TOML configuration file.
    #[arg(short, long, global = true)]
    config: Option<std::path::PathBuf>,

    /// Enable verbose logging (repeat for more: -v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print device capabilities, GPU target and build options.
    Device,

    /// Print the local work size chosen for a kernel category.
    Lws {
        /// Kernel category: gemm, winograd, direct, depthwise, elementwise, pool, unknown.
        #[arg(short, long, default_value = "unknown")]
        kernel_type: String,

        /// Global work size, one to three dimensions.
        #[arg(num_args = 1..=3, required = true)]
        gws: Vec<usize>,
    },

    /// Run a small pipeline of kernels and functions on the emulated device.
    Demo {
        /// Width and height of the demo tensors.
        #[arg(short, long, default_value_t = 16)]
        size: usize,

        /// Print dispatch metrics as JSON.
        #[arg(long)]
        json: bool,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    commands::init_tracing(cli.verbose);
    let config = commands::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Device => commands::device::execute(&config),
        Commands::Lws { kernel_type, gws } => commands::lws::execute(&config, &kernel_type, &gws),
        Commands::Demo { size, json } => commands::demo::execute(&config, size, json),
    }
}
