// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! `shapewire simulate` command - Drive a device and controller in-process.
//!
//! Packet paths report synthetic traffic to the device; a controller thread
//! reads the events and answers every Nth one with a padding action.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use shapewire_core::{
    ActionRecord, Adapter, ConfigLoader, Device, DrainTransport, EventKind, LocalPlatform, Peer,
    PeerKey, ShapeError, ShapingConfig, UserContext,
};

/// How long to wait for the controller to catch up after traffic stops.
const SETTLE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Default)]
struct ControllerStats {
    events: AtomicU64,
    padding_events: AtomicU64,
    actions_sent: AtomicU64,
    actions_rejected: AtomicU64,
}

fn load_config(path: &str) -> Result<ShapingConfig, ShapeError> {
    if !Path::new(path).exists() {
        tracing::info!(config = %path, "No configuration file, using defaults");
        return Ok(ShapingConfig::default());
    }
    ConfigLoader::load_file(path)
}

fn synthetic_peer(index: u8) -> Peer {
    let mut key = [0u8; 32];
    key[0] = 0x5A;
    key[31] = index;
    let ip = if index % 2 == 0 {
        IpAddr::V4(Ipv4Addr::new(10, 0, 0, index))
    } else {
        IpAddr::V6(Ipv6Addr::new(0xfd00, 0, 0, 0, 0, 0, 0, u16::from(index)))
    };
    Peer::with_endpoint(PeerKey::new(key), SocketAddr::new(ip, 51820))
}

/// Read events until `stop`, sending a padding action for every Nth one.
fn run_controller(
    adapter: Arc<Adapter>,
    pad_every: u32,
    mtu: u16,
    stop: Arc<AtomicBool>,
    stats: Arc<ControllerStats>,
) -> Result<(), ShapeError> {
    let handle = adapter.event_data_available_handle()?;
    let mut batch = Vec::new();
    let mut seen: u64 = 0;

    while !stop.load(Ordering::Acquire) {
        batch.clear();
        match adapter.receive_events(&mut batch) {
            Ok(_) => {}
            Err(ShapeError::NoMoreItems) => {
                handle.wait_timeout(Duration::from_millis(20));
                continue;
            }
            Err(e) => return Err(e),
        }

        for event in &batch {
            stats.events.fetch_add(1, Ordering::Relaxed);
            if event.kind() == Ok(EventKind::PaddingSent) {
                stats.padding_events.fetch_add(1, Ordering::Relaxed);
                continue;
            }

            seen += 1;
            if seen % u64::from(pad_every) != 0 {
                continue;
            }

            // Mirror the observed size, clamped to what the device accepts.
            let length = event.byte_count.max(64).min(mtu);
            let action =
                ActionRecord::inject_padding(&event.peer(), length, true, UserContext(seen as usize));
            match adapter.send_action(&action) {
                Ok(()) => {
                    stats.actions_sent.fetch_add(1, Ordering::Relaxed);
                }
                Err(ShapeError::InsufficientBuffer) => {
                    stats.actions_rejected.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => return Err(e),
            }
        }
    }
    Ok(())
}

pub fn execute(
    config_path: &str,
    peers: u8,
    packets: u32,
    pad_every: u32,
    shm_name: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(config_path)?;
    let pad_every = pad_every.max(1);
    let peers = peers.max(1);

    tracing::info!(
        peers = peers,
        packets = packets,
        pad_every = pad_every,
        "Starting simulation"
    );

    let platform = match shm_name {
        Some(name) => LocalPlatform::with_region_name(name),
        None => LocalPlatform::new(),
    };
    let transport = Arc::new(DrainTransport::new());
    let device = Device::new(
        "sim0",
        &config,
        Arc::new(platform.clone()),
        transport.clone(),
    );
    let keys: Vec<PeerKey> = (1..=peers)
        .map(|i| *device.peers().insert(synthetic_peer(i)).key())
        .collect();

    let adapter = Arc::new(Adapter::new(
        Arc::new(device.clone()),
        Arc::new(platform.clone()),
    ));
    adapter.activate_with(&config.session)?;

    let stop = Arc::new(AtomicBool::new(false));
    let stats = Arc::new(ControllerStats::default());
    let mtu = config.device.mtu4.min(config.device.mtu6);
    let controller = {
        let adapter = Arc::clone(&adapter);
        let stop = Arc::clone(&stop);
        let stats = Arc::clone(&stats);
        thread::Builder::new()
            .name("shapewire-controller".to_string())
            .spawn(move || run_controller(adapter, pad_every, mtu, stop, stats))?
    };

    let started = Instant::now();
    for i in 0..packets {
        let key = &keys[i as usize % keys.len()];
        let length = 64 + (i.wrapping_mul(37) % 1300);
        if i % 3 == 0 {
            device.nonpadding_received(key, length);
        } else {
            device.nonpadding_sent(key, length);
        }
        if i % 256 == 255 {
            thread::yield_now();
        }
    }
    let elapsed = started.elapsed();

    // Let the controller drain what is left.
    let deadline = Instant::now() + SETTLE_TIMEOUT;
    loop {
        let (emitted, _) = device.event_counts();
        if stats.events.load(Ordering::Relaxed) >= emitted || Instant::now() >= deadline {
            break;
        }
        thread::sleep(Duration::from_millis(10));
    }

    stop.store(true, Ordering::Release);
    match controller.join() {
        Ok(result) => result?,
        Err(_) => tracing::error!("Controller thread panicked"),
    }
    adapter.close();

    let (emitted, dropped) = device.event_counts();
    let resources = platform.resources();

    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║                   SHAPEWIRE SIMULATION                       ║");
    println!("╚══════════════════════════════════════════════════════════════╝");
    println!();
    println!("Traffic:");
    println!("  Packets:            {} across {} peers", packets, peers);
    println!("  Elapsed:            {:?}", elapsed);
    println!();
    println!("Events:");
    println!("  Emitted:            {}", emitted);
    println!("  Dropped (ring full): {}", dropped);
    println!("  Observed:           {}", stats.events.load(Ordering::Relaxed));
    println!(
        "  Padding Sent:       {}",
        stats.padding_events.load(Ordering::Relaxed)
    );
    println!();
    println!("Actions:");
    println!(
        "  Sent:               {}",
        stats.actions_sent.load(Ordering::Relaxed)
    );
    println!(
        "  Rejected (full):    {}",
        stats.actions_rejected.load(Ordering::Relaxed)
    );
    println!();
    println!("Transport:");
    println!("  Padding Packets:    {}", transport.padding_sent());
    println!("  Bytes:              {}", transport.bytes_sent());
    println!();
    println!(
        "Leaked resources:     pins={} refs={} tasks={} regions={} signals={}",
        resources.pins, resources.signal_refs, resources.tasks, resources.regions, resources.signals
    );

    Ok(())
}
