//! Scan command: VIN plus stored trouble codes

use anyhow::Result;
use serde::Serialize;
use tabled::Tabled;

use redline_uds::uds::{dtc_group, Dtc};
use redline_uds::{DiagnosticSession, SessionKind};

/// Report all DTCs regardless of status
const ALL_DTCS_MASK: u8 = 0xFF;

#[derive(Tabled, Serialize)]
struct DtcRow {
    #[tabled(rename = "Code")]
    code: String,
    #[tabled(rename = "Category")]
    category: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Raw")]
    raw: String,
}

impl From<&Dtc> for DtcRow {
    fn from(dtc: &Dtc) -> Self {
        let status = if dtc.status.is_active() {
            "active"
        } else if dtc.status.pending {
            "pending"
        } else {
            "stored"
        };
        Self {
            code: dtc.code(),
            category: format!("{:?}", dtc.category()),
            status: status.to_string(),
            raw: format!("0x{:02X}", dtc.status.raw),
        }
    }
}

pub async fn scan(
    session: &DiagnosticSession,
    clear: bool,
    ctx: &crate::output::OutputContext,
) -> Result<()> {
    session.start_session(SessionKind::Default).await?;

    let vin = session.read_vin().await?;
    ctx.info(&format!("VIN: {vin}"));

    let dtcs = session.read_dtcs(ALL_DTCS_MASK).await?;
    if dtcs.is_empty() {
        ctx.success("No trouble codes stored");
    } else {
        let rows: Vec<DtcRow> = dtcs.iter().map(DtcRow::from).collect();
        ctx.print(&rows);
    }

    if clear {
        session.clear_dtcs(dtc_group::ALL).await?;
        ctx.success(&format!("Cleared {} trouble code(s)", dtcs.len()));
    }

    Ok(())
}
