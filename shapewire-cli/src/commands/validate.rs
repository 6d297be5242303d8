// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! `shapewire validate` command - Validate configuration file.

use shapewire_core::shm::SessionLayout;
use shapewire_core::ConfigLoader;

pub fn execute(file: &str) -> Result<(), Box<dyn std::error::Error>> {
    tracing::info!(file = %file, "Validating configuration");

    match ConfigLoader::load_file(file) {
        Ok(config) => {
            let layout =
                SessionLayout::new(config.session.event_capacity, config.session.action_capacity)?;

            println!("✓ Configuration is valid");
            println!();
            println!("Session:");
            println!("  Event Capacity:     {}", config.session.event_capacity);
            println!("  Action Capacity:    {}", config.session.action_capacity);
            println!("  Ring Region:        {} bytes", layout.total_len);
            println!();
            println!("Device:");
            println!("  IPv4 MTU:           {}", config.device.mtu4);
            println!("  IPv6 MTU:           {}", config.device.mtu6);
            println!(
                "  Constant Size:      {}",
                if config.device.constant_packet_size {
                    "yes"
                } else {
                    "no"
                }
            );
            println!();
            println!(
                "Drop Log Interval:    {}ms",
                config.logging.drop_log_interval.as_millis()
            );
            Ok(())
        }
        Err(e) => {
            eprintln!("✗ Configuration validation failed:");
            eprintln!("  {}", e);
            std::process::exit(1);
        }
    }
}
