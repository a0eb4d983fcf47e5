//! courierd — encrypting MQTT access node.
//!
//! Reads operator lines from stdin, encrypts each to the configured recipient
//! key, and publishes the envelope to the outbound channel. Messages on the
//! inbound channel are echoed to stdout.

use anyhow::{Context, Result};

use courier_core::config::CourierConfig;
use courier_services::SessionError;

mod console;
mod mqtt;
mod startup;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    // ── Shutdown channel ─────────────────────────────────────────────────────
    let (shutdown_tx, mut shutdown_rx) = tokio::sync::broadcast::channel::<()>(1);
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        tracing::info!("shutdown signal received");
        let _ = shutdown_tx.send(());
    });

    // Load config
    if let Err(e) = CourierConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let config = CourierConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        CourierConfig::default()
    });

    // A signal while connecting is a clean exit.
    let Some(startup::Node {
        mut session,
        inbound: inbound_task,
    }) = startup::start_until(&config, shutdown_rx.recv()).await?
    else {
        return Ok(());
    };

    // ── Console loop ─────────────────────────────────────────────────────────
    let mut lines = console::spawn_reader();
    let mut fatal: Option<SessionError> = None;

    loop {
        console::prompt();
        let line = tokio::select! {
            _ = shutdown_rx.recv() => break,
            line = lines.recv() => match line {
                Some(line) => line,
                None => {
                    tracing::info!("stdin closed");
                    break;
                }
            },
        };

        // A signal mid-submit drops the submission; shutdown fails its record.
        let submitted = tokio::select! {
            _ = shutdown_rx.recv() => break,
            result = session.submit_record(line) => result,
        };
        match submitted {
            Ok(record) => println!("{}", console::outcome_line(&record)),
            Err(e) => {
                println!("{e}");
                fatal = Some(e);
                break;
            }
        }
    }

    // ── Shutdown ─────────────────────────────────────────────────────────────
    if let Err(e) = session.shutdown().await {
        tracing::warn!(error = %e, "unclean disconnect");
    }
    let _ = inbound_task.await;
    println!("\nDisconnected from the MQTT broker.");

    match fatal {
        Some(e) => Err(e).context("recipient key cannot encrypt"),
        None => Ok(()),
    }
}
