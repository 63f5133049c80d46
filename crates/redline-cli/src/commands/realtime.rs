//! Realtime command: periodic parameter polling until Ctrl-C

use std::time::Duration;

use anyhow::Result;

use redline_uds::{DiagnosticSession, ParameterSample, RealtimePoller, SessionKind};

use crate::output::{OutputContext, OutputFormat};

pub async fn realtime(
    session: DiagnosticSession,
    dids: Vec<u16>,
    interval_ms: u64,
    ctx: &OutputContext,
) -> Result<()> {
    session.start_session(SessionKind::Default).await?;

    let poller = RealtimePoller::new(session, dids, Duration::from_millis(interval_ms));
    let mut rx = poller.subscribe();
    poller.start();
    ctx.info("Polling (Ctrl-C to stop)");

    loop {
        tokio::select! {
            sample = rx.recv() => {
                match sample {
                    Ok(sample) => print_sample(ctx, &sample),
                    // Lagged receivers skip to the newest samples
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
            _ = tokio::signal::ctrl_c() => {
                break;
            }
        }
    }

    poller.stop();
    ctx.info("Stopped");
    Ok(())
}

fn print_sample(ctx: &OutputContext, sample: &ParameterSample) {
    match ctx.format {
        OutputFormat::Json => {
            if let Ok(line) = serde_json::to_string(sample) {
                println!("{line}");
            }
        }
        OutputFormat::Table => {
            ctx.info(&format!(
                "{}  0x{:04X}  {}",
                sample.timestamp.format("%H:%M:%S%.3f"),
                sample.did,
                hex::encode_upper(&sample.data)
            ));
        }
    }
}
