//! Tune command: show and edit calibration maps

use std::path::Path;

use anyhow::{bail, Context, Result};
use bytes::Bytes;
use tabled::builder::Builder;

use redline_cal::precision::format_physical;
use redline_cal::{Calibration, CalibrationDefinition, CalibrationMapCodec, MapGrid};
use redline_flash::EcuProfile;
use redline_security::SecurityAlgorithmRegistry;
use redline_uds::{DiagnosticSession, SessionKind};

use crate::output::{OutputContext, OutputFormat};

#[allow(clippy::too_many_arguments)]
pub async fn tune(
    session: &DiagnosticSession,
    definition: &Path,
    image: &Path,
    map: &str,
    sets: &[String],
    write: bool,
    profile: Option<&Path>,
    vin: Option<&str>,
    ctx: &OutputContext,
) -> Result<()> {
    let definition_text = std::fs::read_to_string(definition)
        .with_context(|| format!("Failed to read {}", definition.display()))?;
    let definition: CalibrationDefinition = serde_yaml::from_str(&definition_text)
        .with_context(|| "Failed to parse calibration definition")?;
    let blob = std::fs::read(image)
        .with_context(|| format!("Failed to read {}", image.display()))?;

    let calibration = Calibration::from_definition(definition, Bytes::from(blob))?;
    let mut grid = CalibrationMapCodec::decode_map(&calibration, map)?;

    for edit in sets {
        let (row, col, value) = parse_edit(edit)?;
        if !grid.set(row, col, value) {
            bail!(
                "Cell {},{} is outside the {}x{} map '{map}'",
                row,
                col,
                grid.rows,
                grid.cols
            );
        }
    }

    let descriptor = calibration.descriptor(map)?;
    print_grid(ctx, &grid, descriptor);
    for &(row, col) in &grid.out_of_range {
        ctx.warn(&format!(
            "Cell {row},{col} is outside {}..{} {}",
            descriptor.min, descriptor.max, descriptor.unit
        ));
    }

    if !sets.is_empty() {
        // Re-encode before any write so range errors surface locally
        let (address, bytes) = CalibrationMapCodec::encode_map(&calibration, map, &grid)?;

        let mut patched = calibration.data.to_vec();
        let start = (address - calibration.base_address) as usize;
        patched[start..start + bytes.len()].copy_from_slice(&bytes);
        std::fs::write(image, &patched)
            .with_context(|| format!("Failed to update {}", image.display()))?;
        ctx.success(&format!("Updated {} cell(s) in {}", sets.len(), image.display()));

        if write {
            let Some(profile) = profile else {
                bail!("--write requires --profile for security level configuration");
            };
            write_to_ecu(session, profile, vin, address, &bytes).await?;
            ctx.success(&format!(
                "Wrote {} bytes to ECU at 0x{:08X}",
                bytes.len(),
                address
            ));
        }
    }

    Ok(())
}

/// Unlock and write one map region, verifying the readback
async fn write_to_ecu(
    session: &DiagnosticSession,
    profile: &Path,
    vin: Option<&str>,
    address: u32,
    bytes: &[u8],
) -> Result<()> {
    let profile_text = std::fs::read_to_string(profile)
        .with_context(|| format!("Failed to read {}", profile.display()))?;
    let profile: EcuProfile =
        serde_yaml::from_str(&profile_text).with_context(|| "Failed to parse ECU profile")?;

    let mut registry = SecurityAlgorithmRegistry::new();
    for level in &profile.security_levels {
        registry.register_level(&profile.ecu_type, level.clone())?;
    }
    let handle = registry.resolve(&profile.ecu_type, profile.flash_level)?;

    session.start_session(SessionKind::Extended).await?;
    let seed = session.request_seed(profile.flash_level).await?;
    if !seed.is_empty() {
        let key = handle.derive(&seed, vin)?;
        session.send_key(profile.flash_level, &key).await?;
    }

    session.write_memory(address, bytes).await?;
    let readback = session.read_memory(address, bytes.len() as u32).await?;
    if readback != bytes {
        bail!("Readback mismatch at 0x{address:08X}; calibration may be partially written");
    }

    session.start_session(SessionKind::Default).await?;
    Ok(())
}

/// Parse a `row,col=value` edit
fn parse_edit(edit: &str) -> Result<(usize, usize, f64)> {
    let err = || anyhow::anyhow!("Invalid edit '{edit}' (expected row,col=value)");
    let (cell, value) = edit.split_once('=').ok_or_else(err)?;
    let (row, col) = cell.split_once(',').ok_or_else(err)?;
    Ok((
        row.trim().parse().map_err(|_| err())?,
        col.trim().parse().map_err(|_| err())?,
        value.trim().parse().map_err(|_| err())?,
    ))
}

fn print_grid(
    ctx: &OutputContext,
    grid: &MapGrid,
    descriptor: &redline_cal::CalibrationMapDescriptor,
) {
    if ctx.format == OutputFormat::Json {
        let rows: Vec<&[f64]> = grid.values.chunks(grid.cols).collect();
        let body = serde_json::json!({
            "name": descriptor.name,
            "unit": descriptor.unit,
            "rows": rows,
            "out_of_range": grid.out_of_range,
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&body).unwrap_or_else(|_| "{}".to_string())
        );
        return;
    }

    let mut builder = Builder::default();
    let mut header = vec![String::new()];
    for col in 0..grid.cols {
        header.push(axis_label(&descriptor.x_axis, col));
    }
    builder.push_record(header);

    for row in 0..grid.rows {
        let mut record = vec![axis_label(&descriptor.y_axis, row)];
        for col in 0..grid.cols {
            let value = grid.get(row, col).unwrap_or(f64::NAN);
            let mut cell = format_physical(value, descriptor.scale);
            if grid.is_flagged(row, col) {
                cell.push('!');
            }
            record.push(cell);
        }
        builder.push_record(record);
    }

    ctx.info(&format!(
        "{} ({} x {}, {})",
        descriptor.name, grid.rows, grid.cols, descriptor.unit
    ));
    println!("{}", builder.build());
}

fn axis_label(axis: &[f64], index: usize) -> String {
    axis.get(index)
        .map(|v| v.to_string())
        .unwrap_or_else(|| index.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_edit() {
        assert_eq!(parse_edit("2,3=14.5").unwrap(), (2, 3, 14.5));
        assert_eq!(parse_edit(" 0 , 0 = -1.0 ").unwrap(), (0, 0, -1.0));
        assert!(parse_edit("2=14.5").is_err());
        assert!(parse_edit("2,3").is_err());
        assert!(parse_edit("a,b=c").is_err());
    }
}
