//! Basic example: Scan for peripherals advertising the default name
//!
//! Run with: cargo run --example scan_devices -- [name] [seconds]

use bdsk_ble::{
    BleRadio, EventRouter, ProximityBand, Result, RoutedEvent, ScanConfig, ScanSession,
    DEFAULT_DEVICE_NAME,
};
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("bdsk_ble=debug".parse().unwrap()),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let name = args.next().unwrap_or_else(|| DEFAULT_DEVICE_NAME.to_string());
    let seconds = args.next().and_then(|s| s.parse().ok()).unwrap_or(10);
    let config = ScanConfig::new(name, Duration::from_secs(seconds));

    let radio = Arc::new(BleRadio::acquire().await?);
    let scanner = ScanSession::new(radio.clone());
    let (sender, mut events) = EventRouter::channel();

    println!(
        "Scanning for \"{}\" for {:?}...\n",
        config.name_filter, config.duration
    );
    scanner.start(&config, Arc::new(sender)).await?;

    let mut sightings = 0;
    while let Some(event) = events.recv().await {
        match event {
            RoutedEvent::Candidate(candidate) => {
                sightings += 1;
                println!(
                    "[{}] {} {} dBm ({}), {} bytes of advertising data",
                    candidate.seen_at.format("%H:%M:%S%.3f"),
                    candidate.identity,
                    candidate.rssi,
                    ProximityBand::from_rssi(candidate.rssi),
                    candidate.advertisement.len()
                );
            }
            RoutedEvent::ScanStopped => break,
            _ => {}
        }
    }

    println!("\nScan finished with {} sightings", sightings);
    radio.release();
    Ok(())
}
