//! Live voltage monitor demo
//!
//! Connects to an Arduino, prints decoded readings, and flags threshold
//! crossings. This is the headless stand-in for the GUI collaborator.
//!
//! Usage:
//!   cargo run --example voltage_monitor -- /dev/ttyACM0 [baud] [--raw]

use voltmon::{list_ports, ParseMode, SerialSession, SessionConfig, SessionEvent};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "voltmon=info".into()),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();
    let raw = args.iter().any(|a| a == "--raw");
    let positional: Vec<&String> = args[1..].iter().filter(|a| !a.starts_with("--")).collect();

    let (port, baud_rate) = match positional.len() {
        2 => (positional[0].clone(), positional[1].parse().unwrap_or(9600)),
        1 => (positional[0].clone(), 9600),
        _ => {
            println!("Usage: voltage_monitor <port> [baud] [--raw]");
            println!("\nAvailable ports:");
            for port in list_ports()? {
                println!("  {}", port.display_name());
            }
            return Ok(());
        }
    };

    let mode = if raw {
        ParseMode::RawScan
    } else {
        ParseMode::LineTagged
    };
    println!("Connecting to {port} at {baud_rate} baud ({})...", mode.name());

    let session = SerialSession::new();
    let mut rx = session.subscribe();
    session
        .open(SessionConfig::new(&port, baud_rate).parse_mode(mode))
        .await?;

    println!("Connected. Ctrl+C to exit.\n");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!("\nClosing...");
                session.close().await;
                break;
            }
            event = rx.recv() => {
                match event {
                    Ok(SessionEvent::Reading(reading)) => {
                        println!("#{:<4} {:.2} V", reading.sequence, reading.value);
                    }
                    Ok(SessionEvent::Alert(alert)) => {
                        println!(
                            "*** ALERT: {:.2} V exceeded the {:.1} V threshold ***",
                            alert.value, alert.threshold
                        );
                    }
                    Ok(SessionEvent::StateChanged(state)) => {
                        println!("[state: {state}]");
                    }
                    Ok(SessionEvent::ReadFailure(message)) => {
                        eprintln!("read failure: {message}");
                        break;
                    }
                    Ok(SessionEvent::Log(_)) => {}
                    Err(_) => break,
                }
            }
        }
    }

    // chart history stays available after the session closes
    let history = session.buffer().snapshot();
    println!("captured {} readings", history.len());
    Ok(())
}
