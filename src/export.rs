use std::fmt;
use std::str::FromStr;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::types::{ProtocolResults, ScanSummary};

pub const CSV_HEADER: [&str; 3] = ["Protocol", "Port", "Status"];

/// Serialization targets for finished scans.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum ExportFormat {
    Json,
    Csv,
}

impl ExportFormat {
    pub fn content_type(self) -> &'static str {
        match self {
            ExportFormat::Json => "application/json",
            ExportFormat::Csv => "text/csv; charset=utf-8",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::Json => "json",
            ExportFormat::Csv => "csv",
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ExportFormat::Json => "JSON",
            ExportFormat::Csv => "CSV",
        })
    }
}

impl FromStr for ExportFormat {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "JSON" => Ok(ExportFormat::Json),
            "CSV" => Ok(ExportFormat::Csv),
            _ => Err(ValidationError::UnsupportedFormat(s.to_string())),
        }
    }
}

/// Render per-protocol results. JSON is the map verbatim; CSV is one row per
/// (protocol, port, status), TCP rows first, ports ascending.
pub fn export_results(results: &ProtocolResults, format: ExportFormat) -> Result<String> {
    match format {
        ExportFormat::Json => to_json(results),
        ExportFormat::Csv => to_csv(results),
    }
}

/// Render a summary. JSON is the whole summary object; CSV flattens its
/// outcomes the same way as [`export_results`].
pub fn export_summary(summary: &ScanSummary, format: ExportFormat) -> Result<String> {
    match format {
        ExportFormat::Json => to_json(summary),
        ExportFormat::Csv => to_csv(&summary.results()),
    }
}

pub fn to_json<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    Ok(serde_json::to_string_pretty(value)?)
}

pub fn to_csv(results: &ProtocolResults) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(Vec::new());
    wtr.write_record(CSV_HEADER)?;
    for o in results.triples() {
        let port = o.port.to_string();
        wtr.write_record([o.protocol.as_str(), port.as_str(), o.status.as_str()])?;
    }
    let bytes = wtr
        .into_inner()
        .map_err(|e| anyhow!("failed to flush CSV writer: {e}"))?;
    Ok(String::from_utf8(bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{PortStatus, ProbeOutcome, Protocol};

    #[test]
    fn format_parsing() {
        assert_eq!("json".parse::<ExportFormat>().unwrap(), ExportFormat::Json);
        assert_eq!(" CSV ".parse::<ExportFormat>().unwrap(), ExportFormat::Csv);
        assert!("xml".parse::<ExportFormat>().is_err());
    }

    #[test]
    fn csv_groups_by_protocol_then_port() {
        let mut r = ProtocolResults::default();
        for (port, protocol, status) in [
            (443, Protocol::Udp, PortStatus::OpenFiltered),
            (80, Protocol::Tcp, PortStatus::Open),
            (22, Protocol::Tcp, PortStatus::Closed),
        ] {
            r.insert(ProbeOutcome { port, protocol, status });
        }
        let csv = to_csv(&r).unwrap();
        assert_eq!(
            csv,
            "Protocol,Port,Status\nTCP,22,Closed\nTCP,80,Open\nUDP,443,Open|Filtered\n"
        );
    }
}
