//! Multimeter streaming example
//!
//! Demonstrates the configure-then-stream workflow:
//! - Discovering a nearby Pokit device
//! - Connecting and identifying the product
//! - Writing multimeter settings
//! - Streaming readings once the settings are acknowledged
//!
//! Run with: cargo run --example meter
//!
//! To pick a mode and interval:
//!   cargo run --example meter -- --mode resistance --interval 500

use pokit_ble::{
    MeasurementMode, MultimeterEvent, PeripheralTransport, PokitDevice, PokitScanner,
    RangeRequest, Result,
};
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter("warn,pokit_ble=debug")
        .init();

    let args: Vec<String> = std::env::args().collect();
    let option = |name: &str| {
        args.iter()
            .position(|arg| arg == name)
            .and_then(|i| args.get(i + 1))
            .cloned()
    };
    let mode = option("--mode")
        .and_then(|m| {
            MeasurementMode::ALL
                .into_iter()
                .find(|mode| mode.as_str().eq_ignore_ascii_case(&m.replace('-', " ")))
        })
        .unwrap_or(MeasurementMode::DcVoltage);
    let interval = option("--interval")
        .and_then(|i| i.parse().ok())
        .unwrap_or(1000);

    println!("Looking for a Pokit device...\n");

    let scanner = PokitScanner::new().await?;
    let Some(found) = scanner
        .scan_for(Duration::from_secs(5))
        .await?
        .into_iter()
        .next()
    else {
        println!("No Pokit devices found.");
        return Ok(());
    };
    println!(
        "Found {} {} ({})",
        found.product,
        found.local_name.as_deref().unwrap_or("(unnamed)"),
        found.identifier
    );

    let (transport, events) = PeripheralTransport::new(found.peripheral);
    let transport = Arc::new(transport);
    transport.connect().await?;

    let device = Arc::new(PokitDevice::new(transport.clone())?);
    let meter = device.multimeter();
    let mut meter_events = meter.subscribe();

    let dispatcher = tokio::spawn({
        let device = device.clone();
        async move { device.run(events).await }
    });

    let settings = meter.configure(mode, RangeRequest::Auto, interval)?;
    println!("Measuring {} every {}ms\n", settings.mode, settings.update_interval);

    let mut remaining = 20;
    while remaining > 0 {
        let Ok(event) = meter_events.recv().await else {
            break;
        };
        match event {
            MultimeterEvent::SettingsWritten => meter.begin_streaming()?,
            MultimeterEvent::ReadingRead(reading) => {
                println!(
                    "{:>12.6} {:<4} {:<15} {}",
                    reading.value,
                    reading.unit().unwrap_or(""),
                    reading.status,
                    meter
                        .range_to_string(reading.mode, reading.range)
                        .unwrap_or_default()
                );
                remaining -= 1;
            }
            MultimeterEvent::Error(e) => {
                println!("Device reported an error: {}", e);
                break;
            }
        }
    }

    meter.end_streaming()?;
    tokio::time::sleep(Duration::from_millis(500)).await;
    transport.disconnect().await?;
    // Disconnecting closes the event channel, which ends the dispatcher.
    let _ = dispatcher.await;

    Ok(())
}
