use std::collections::BTreeMap;
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::ports::{self, PortSpec};

pub const MIN_TIMEOUT_MS: u64 = 100;
pub const MAX_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_TIMEOUT_MS: u64 = 1_000;

/// Transport protocol of a single probe.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Protocol {
    #[serde(rename = "TCP")]
    Tcp,
    #[serde(rename = "UDP")]
    Udp,
}

impl Protocol {
    pub fn as_str(self) -> &'static str {
        match self {
            Protocol::Tcp => "TCP",
            Protocol::Udp => "UDP",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Protocol {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "TCP" => Ok(Protocol::Tcp),
            "UDP" => Ok(Protocol::Udp),
            _ => Err(ValidationError::UnsupportedProtocol(s.to_string())),
        }
    }
}

/// Which protocols a scan covers.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum ProtocolSelector {
    #[default]
    Tcp,
    Udp,
    Both,
}

impl ProtocolSelector {
    /// Protocols to probe for every port, TCP first.
    pub fn protocols(self) -> &'static [Protocol] {
        match self {
            ProtocolSelector::Tcp => &[Protocol::Tcp],
            ProtocolSelector::Udp => &[Protocol::Udp],
            ProtocolSelector::Both => &[Protocol::Tcp, Protocol::Udp],
        }
    }
}

impl FromStr for ProtocolSelector {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "TCP" => Ok(ProtocolSelector::Tcp),
            "UDP" => Ok(ProtocolSelector::Udp),
            "BOTH" | "TCP+UDP" => Ok(ProtocolSelector::Both),
            _ => Err(ValidationError::UnsupportedProtocol(s.to_string())),
        }
    }
}

/// Terminal classification of one probe.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PortStatus {
    Open,
    Closed,
    Filtered,
    /// UDP only: nothing came back, so an open-but-silent service and a
    /// filtered path look the same.
    #[serde(rename = "Open|Filtered")]
    OpenFiltered,
    Error,
}

impl PortStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PortStatus::Open => "Open",
            PortStatus::Closed => "Closed",
            PortStatus::Filtered => "Filtered",
            PortStatus::OpenFiltered => "Open|Filtered",
            PortStatus::Error => "Error",
        }
    }
}

impl fmt::Display for PortStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of probing one (port, protocol) pair.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProbeOutcome {
    pub port: u16,
    pub protocol: Protocol,
    pub status: PortStatus,
}

/// Per-protocol port -> status maps, the shape the web API speaks.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct ProtocolResults {
    #[serde(rename = "TCP", default, skip_serializing_if = "Option::is_none")]
    pub tcp: Option<BTreeMap<u16, PortStatus>>,
    #[serde(rename = "UDP", default, skip_serializing_if = "Option::is_none")]
    pub udp: Option<BTreeMap<u16, PortStatus>>,
}

impl ProtocolResults {
    /// Empty maps for every protocol the selector covers.
    pub fn for_selector(selector: ProtocolSelector) -> Self {
        let mut out = ProtocolResults::default();
        for &p in selector.protocols() {
            *out.slot_mut(p) = Some(BTreeMap::new());
        }
        out
    }

    pub fn insert(&mut self, outcome: ProbeOutcome) {
        self.slot_mut(outcome.protocol)
            .get_or_insert_with(BTreeMap::new)
            .insert(outcome.port, outcome.status);
    }

    pub fn get(&self, protocol: Protocol) -> Option<&BTreeMap<u16, PortStatus>> {
        match protocol {
            Protocol::Tcp => self.tcp.as_ref(),
            Protocol::Udp => self.udp.as_ref(),
        }
    }

    /// All (protocol, port, status) triples, grouped by protocol (TCP first)
    /// with ascending ports.
    pub fn triples(&self) -> Vec<ProbeOutcome> {
        let mut out = Vec::new();
        for protocol in [Protocol::Tcp, Protocol::Udp] {
            if let Some(map) = self.get(protocol) {
                out.extend(map.iter().map(|(&port, &status)| ProbeOutcome {
                    port,
                    protocol,
                    status,
                }));
            }
        }
        out
    }

    pub fn len(&self) -> usize {
        self.tcp.as_ref().map_or(0, BTreeMap::len) + self.udp.as_ref().map_or(0, BTreeMap::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn slot_mut(&mut self, protocol: Protocol) -> &mut Option<BTreeMap<u16, PortStatus>> {
        match protocol {
            Protocol::Tcp => &mut self.tcp,
            Protocol::Udp => &mut self.udp,
        }
    }
}

/// Tally of outcomes by status.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StatusCounts {
    pub open: u64,
    pub closed: u64,
    pub filtered: u64,
    pub open_filtered: u64,
    pub error: u64,
}

impl StatusCounts {
    pub fn add(&mut self, status: PortStatus) {
        match status {
            PortStatus::Open => self.open += 1,
            PortStatus::Closed => self.closed += 1,
            PortStatus::Filtered => self.filtered += 1,
            PortStatus::OpenFiltered => self.open_filtered += 1,
            PortStatus::Error => self.error += 1,
        }
    }

    pub fn total(&self) -> u64 {
        self.open + self.closed + self.filtered + self.open_filtered + self.error
    }
}

/// Final (or, after cancellation, partial) result of one scan.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ScanSummary {
    pub target: IpAddr,
    pub protocol: ProtocolSelector,
    /// Number of distinct ports probed.
    pub total_scanned: u64,
    pub counts: StatusCounts,
    pub by_protocol: BTreeMap<Protocol, StatusCounts>,
    /// Sorted ascending by port, TCP before UDP on the same port.
    pub outcomes: Vec<ProbeOutcome>,
    pub started_at: String,
    pub finished_at: String,
    /// False when the scan was cancelled before the last batch.
    pub completed: bool,
}

impl ScanSummary {
    /// Per-protocol map view of the outcomes.
    pub fn results(&self) -> ProtocolResults {
        let mut out = ProtocolResults::for_selector(self.protocol);
        for &o in &self.outcomes {
            out.insert(o);
        }
        out
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ScanPhase {
    Scanning,
    Completed,
}

/// Progress record emitted by the scheduler.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ScanProgress {
    pub scanned: u64,
    pub total: u64,
    pub percentage: u8,
    pub current_port: Option<u16>,
    pub status: ScanPhase,
}

/// One streamed record: progress plus the outcomes it covers. The terminal
/// update carries the complete result map and the summary.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ScanUpdate {
    pub progress: ScanProgress,
    pub results: ProtocolResults,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<ScanSummary>,
}

impl ScanUpdate {
    pub fn is_terminal(&self) -> bool {
        self.progress.status == ScanPhase::Completed
    }
}

/// A validated scan request. Only constructible through [`ScanRequest::new`],
/// so holding one means every field is in bounds and the port set is non-empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanRequest {
    target: IpAddr,
    ports: Vec<u16>,
    protocol: ProtocolSelector,
    timeout: Duration,
    export_format: Option<crate::export::ExportFormat>,
}

impl ScanRequest {
    pub fn new(
        target: &str,
        ports: &PortSpec,
        protocol: &str,
        timeout_ms: Option<u64>,
    ) -> Result<Self, ValidationError> {
        let target: IpAddr = target
            .trim()
            .parse()
            .map_err(|_| ValidationError::InvalidTarget(target.to_string()))?;
        let protocol: ProtocolSelector = protocol.parse()?;
        let timeout_ms = timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS);
        if !(MIN_TIMEOUT_MS..=MAX_TIMEOUT_MS).contains(&timeout_ms) {
            return Err(ValidationError::TimeoutOutOfRange(timeout_ms));
        }
        let ports = ports::resolve(ports)?;
        Ok(Self {
            target,
            ports,
            protocol,
            timeout: Duration::from_millis(timeout_ms),
            export_format: None,
        })
    }

    pub fn with_export_format(mut self, format: Option<&str>) -> Result<Self, ValidationError> {
        self.export_format = format
            .map(str::parse::<crate::export::ExportFormat>)
            .transpose()?;
        Ok(self)
    }

    pub fn target(&self) -> IpAddr {
        self.target
    }

    /// Resolved port set, ascending and distinct.
    pub fn ports(&self) -> &[u16] {
        &self.ports
    }

    pub fn protocol(&self) -> ProtocolSelector {
        self.protocol
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn export_format(&self) -> Option<crate::export::ExportFormat> {
        self.export_format
    }
}
