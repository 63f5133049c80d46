//! Dump command: chunked memory read to a local file

use std::path::Path;

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};

use redline_uds::{DiagnosticSession, SessionKind};

/// Bytes per read request
const CHUNK: u32 = 256;

pub async fn dump(
    session: &DiagnosticSession,
    address: u32,
    len: u32,
    out: &Path,
    ctx: &crate::output::OutputContext,
) -> Result<()> {
    session.start_session(SessionKind::Extended).await?;

    let bar = if ctx.quiet {
        ProgressBar::hidden()
    } else {
        ProgressBar::new(len as u64)
    };
    bar.set_style(
        ProgressStyle::with_template("{bar:40.cyan/blue} {bytes}/{total_bytes} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );

    let mut image = Vec::with_capacity(len as usize);
    let mut offset = 0u32;
    while offset < len {
        let chunk_len = (len - offset).min(CHUNK);
        let chunk = session.read_memory(address + offset, chunk_len).await?;
        image.extend_from_slice(&chunk);
        offset += chunk_len;
        bar.set_position(offset as u64);
        bar.set_message(format!("0x{:08X}", address + offset));
    }
    bar.finish_and_clear();

    std::fs::write(out, &image)
        .with_context(|| format!("Failed to write {}", out.display()))?;
    ctx.success(&format!(
        "Dumped {} bytes from 0x{:08X} to {}",
        len,
        address,
        out.display()
    ));

    session.start_session(SessionKind::Default).await?;
    Ok(())
}
