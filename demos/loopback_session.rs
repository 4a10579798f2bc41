//! Loopback example: play the module side of a session in memory
//!
//! Simulates a first boot (the module answers every configuration command),
//! then a phone opening the SPP channel, changing a gain and asking for
//! telemetry.
//!
//! Run with: cargo run --example loopback_session

use bt_serial_link::{
    AlwaysOn, DriverConfig, LinkDriver, MemorySettingsStore, MemoryTransport, Result,
    SettingsStore, SharedGains,
};
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("bt_serial_link=debug".parse().unwrap()),
        )
        .init();

    let module = MemoryTransport::new();
    module.set_auto_reply(Some(b"AOK\r\nCMD> "));

    let settings = Arc::new(MemorySettingsStore::default());
    let gains = Arc::new(SharedGains::default());

    let driver = LinkDriver::new(
        DriverConfig::default()
            .with_device_name("Loopback")
            .with_init_timing(Duration::from_millis(50), Duration::from_millis(500)),
        Arc::new(module.clone()),
        settings.clone(),
        gains.clone(),
        Arc::new(AlwaysOn),
    );

    driver.start().await?;

    if let Some(report) = driver.wait_initialized().await? {
        println!("Module configured:");
        for step in &report.steps {
            println!("  {:<12} {:?}", step.command.to_string(), step.outcome);
        }
    }
    module.set_auto_reply(None);
    module.take_writes();

    // Phone connects and opens the serial channel.
    module.push_inbound(b"%REBOOT%%CONNECT,0123456789AB,0%%RFCOMM_OPEN%");
    tokio::time::sleep(Duration::from_millis(100)).await;
    println!("\nStatus: {}", driver.status());

    module.push_inbound(b"svp:2.5\r\nsad:0.01\r\ngo\r\n");
    tokio::time::sleep(Duration::from_millis(100)).await;

    let writer = driver.writer();
    for i in 0..3 {
        let line = format!("v={:.2},i={:.2}", 12.0 + i as f64 * 0.01, 0.5);
        writer.send_telemetry(&line).await;
    }

    println!("\nModule received:");
    for line in module.written_lines() {
        println!("  {:?}", line);
    }

    println!("\nLive gains: voltage {:?}, amps {:?}", gains.voltage(), gains.current());
    println!("Stored voltage P: {}", settings.settings().voltage.p);

    driver.shutdown().await?;
    Ok(())
}
