// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Shapewire CLI
//!
//! Command-line interface for the shapewire traffic-shaping channel.

use clap::{Parser, Subcommand};

mod commands;

/// Shapewire - telemetry and padding channel for tunnel traffic shaping
#[derive(Parser)]
#[command(name = "shapewire")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "shapewire.yaml")]
    pub config: String,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a device and a controller in one process with synthetic traffic
    Simulate {
        /// Number of synthetic peers
        #[arg(short, long, default_value_t = 4)]
        peers: u8,

        /// Nonpadding packets to drive through the device
        #[arg(short = 'n', long, default_value_t = 10_000)]
        packets: u32,

        /// Inject padding after every Nth observed event
        #[arg(long, default_value_t = 8)]
        pad_every: u32,

        /// Back the rings with a named POSIX shm object
        #[arg(long)]
        shm_name: Option<String>,
    },

    /// Validate a configuration file
    Validate {
        /// Path to the configuration file
        file: String,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // RUST_LOG overrides the level picked by --verbose.
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Simulate {
            peers,
            packets,
            pad_every,
            shm_name,
        } => commands::simulate::execute(&cli.config, peers, packets, pad_every, shm_name),
        Commands::Validate { file } => commands::validate::execute(&file),
    }
}
