//! Example: Connect to the first matching peripheral and show temperatures
//!
//! Run with: cargo run --example temperature_monitor -- [table-file]
//!
//! The optional table file holds one `hexkey=display` pair per line.

use bdsk_ble::ble::uuids::{TEMPERATURE_SERVICE_UUID, TEMPERATURE_VALUE_CHARACTERISTIC_UUID};
use bdsk_ble::{
    celsius_to_fahrenheit, hex_string, BleRadio, EventRouter, GattSession, ProximityBand,
    Result, RoutedEvent, ScanConfig, ScanSession, SessionConfig, SessionEvent,
    TemperatureLookup, TemperatureTable,
};
use std::sync::Arc;
use std::time::Duration;

fn load_table(path: Option<String>) -> TemperatureTable {
    let Some(path) = path else {
        return TemperatureTable::new();
    };

    match std::fs::read_to_string(&path) {
        Ok(contents) => contents
            .lines()
            .filter_map(|line| line.split_once('='))
            .map(|(key, display)| (key.to_string(), display.trim().to_string()))
            .collect(),
        Err(e) => {
            eprintln!("Could not read {}: {}", path, e);
            TemperatureTable::new()
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("bdsk_ble=info".parse().unwrap()),
        )
        .init();

    let table = load_table(std::env::args().nth(1));
    println!("Loaded {} temperature entries", table.len());

    let radio = Arc::new(BleRadio::acquire().await?);
    let (sender, mut events) = EventRouter::channel();

    // Find a peripheral
    let scanner = ScanSession::new(radio.clone());
    scanner
        .start(&ScanConfig::default(), Arc::new(sender.clone()))
        .await?;

    let mut peer = None;
    while let Some(event) = events.recv().await {
        match event {
            RoutedEvent::Candidate(candidate) => {
                peer = Some(candidate.identity);
                scanner.stop().await;
            }
            RoutedEvent::ScanStopped => break,
            _ => {}
        }
    }

    let Some(peer) = peer else {
        println!("No peripheral found");
        return Ok(());
    };

    println!("Connecting to {}", peer);
    let session = GattSession::new(
        radio.gatt_transport(),
        sender,
        SessionConfig::default().with_discover_on_connect(true),
    );
    session.connect(peer)?;

    let mut _poller = None;

    loop {
        tokio::select! {
            Some(event) = events.recv() => {
                let RoutedEvent::Session(event) = event else { continue };

                if let Some(display) = table.resolve_event(&event) {
                    match display.parse::<f64>() {
                        Ok(c) => println!("Temperature: {}°C ({:.1}°F)", display, celsius_to_fahrenheit(c)),
                        Err(_) => println!("Temperature: {}", display),
                    }
                    continue;
                }

                match event {
                    SessionEvent::ServicesDiscovered { services, missing } => {
                        println!("{} services discovered", services);
                        if !missing.is_empty() {
                            println!("Missing expected services: {:?}", missing);
                        }
                        if let Err(e) = session.set_indication_state(
                            &TEMPERATURE_SERVICE_UUID,
                            &TEMPERATURE_VALUE_CHARACTERISTIC_UUID,
                            true,
                        ) {
                            println!("Cannot enable temperature indications: {}", e);
                        }
                    }
                    SessionEvent::IndicationStateChanged { enabled: true, .. } => {
                        println!("Temperature monitoring on");
                        _poller = Some(session.start_rssi_polling(Duration::from_secs(2)));
                    }
                    SessionEvent::NotificationReceived { target, value } => {
                        println!("{}: {} (no table entry)", target, hex_string(&value));
                    }
                    SessionEvent::RssiRead { rssi, .. } => {
                        println!("RSSI {} dBm ({})", rssi, ProximityBand::from_rssi(rssi));
                    }
                    SessionEvent::OperationFailed { kind, reason } => {
                        println!("{} failed: {}", kind, reason);
                    }
                    SessionEvent::Disconnected => {
                        println!("Disconnected");
                        break;
                    }
                    other => println!("{:?}", other),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                println!("\nShutting down...");
                let _ = session.disconnect();
                break;
            }
        }
    }

    radio.release();
    Ok(())
}
