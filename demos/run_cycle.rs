//! Run one cleaning cycle on the nearest cleaner
//!
//! Scans for cleaners, connects to the one with the strongest signal,
//! starts a cycle and prints progress until it completes.
//!
//! Run with: cargo run --example run_cycle
//!
//! To connect to a specific cleaner:
//!   cargo run --example run_cycle -- --id <identifier>

use cleaning_utility_ble::{
    AdapterConfig, Error, Result, Session, SessionCondition, SessionConfig, SessionEvent,
    SessionState,
};
use tokio::sync::broadcast::error::RecvError;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("cleaning_utility_ble=info".parse().unwrap()),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();
    let target = args
        .iter()
        .position(|arg| arg == "--id")
        .and_then(|i| args.get(i + 1))
        .cloned();

    println!("Cleaning Utility");
    println!("================\n");

    let session = Session::with_bluetooth(SessionConfig::default(), AdapterConfig::default()).await?;

    let _handle = session.subscribe(|event| match event {
        SessionEvent::DevicesChanged(devices) => {
            for device in devices {
                println!("  {}", device);
            }
        }
        SessionEvent::Condition(condition) => println!("! {}", condition),
        _ => {}
    });

    println!("Scanning...");
    let mut scan_events = session.subscribe_events();
    session.request_scan().await?;

    // Let the scan collect devices until it times out. The scan may only
    // start once the adapter reports powered on.
    loop {
        match scan_events.recv().await {
            Ok(SessionEvent::Condition(SessionCondition::ScanTimeout)) => break,
            Ok(SessionEvent::StateChanged {
                from: SessionState::Scanning,
                ..
            }) => break,
            Ok(SessionEvent::Condition(condition)) if condition.is_fatal() => {
                session.shutdown().await?;
                return Err(Error::AdapterUnavailable {
                    state: session.adapter_state(),
                });
            }
            Ok(_) | Err(RecvError::Lagged(_)) => {}
            Err(RecvError::Closed) => return Err(Error::SessionClosed),
        }
    }
    drop(scan_events);

    let device = match target {
        Some(id) => session
            .devices()
            .into_iter()
            .find(|d| d.identifier.as_str() == id)
            .ok_or(Error::DeviceNotFound { identifier: id })?,
        None => session.devices().pop().ok_or(Error::DeviceNotFound {
            identifier: "any".to_string(),
        })?,
    };

    println!("\nConnecting to {}...", device.display_name());
    let mut events = session.subscribe_events();
    session.select_device(device.identifier.clone()).await?;

    loop {
        match events.recv().await {
            Ok(SessionEvent::StateChanged {
                to: SessionState::Connected,
                ..
            }) => break,
            Ok(SessionEvent::StateChanged {
                to: SessionState::Idle,
                ..
            }) => {
                println!("Connection failed");
                return session.shutdown().await;
            }
            Ok(_) | Err(RecvError::Lagged(_)) => {}
            Err(RecvError::Closed) => return Err(Error::SessionClosed),
        }
    }

    println!("Connected, starting cycle\n");
    session.start_cycle().await?;

    loop {
        match events.recv().await {
            Ok(SessionEvent::ProgressChanged(progress)) if progress.running => {
                println!("  Progress: {:>3}%", progress.percent());
            }
            Ok(SessionEvent::CycleCompleted) => {
                println!("\nCycle complete");
                break;
            }
            Ok(SessionEvent::Condition(SessionCondition::UnsolicitedDisconnect { .. })) => {
                println!("\nCleaner disconnected");
                break;
            }
            Ok(_) | Err(RecvError::Lagged(_)) => {}
            Err(RecvError::Closed) => break,
        }
    }

    session.shutdown().await
}
