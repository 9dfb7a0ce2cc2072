use thiserror::Error;

/// A scan request field was malformed or out of range. Raised before any
/// socket is opened.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("invalid target IP address: {0:?}")]
    InvalidTarget(String),

    #[error("{field}: port {value} is outside 1-65535")]
    PortOutOfRange { field: &'static str, value: u32 },

    #[error("portRange: start {start} is greater than end {end}")]
    InvertedRange { start: u32, end: u32 },

    #[error("unsupported protocol: {0:?} (expected TCP, UDP or BOTH)")]
    UnsupportedProtocol(String),

    #[error("timeout: {0}ms is outside {min}-{max}ms", min = crate::types::MIN_TIMEOUT_MS, max = crate::types::MAX_TIMEOUT_MS)]
    TimeoutOutOfRange(u64),

    #[error("portGroups: selection resolves to no ports")]
    EmptyPortSet,

    #[error("portList: {0}")]
    InvalidPortList(String),

    #[error("unsupported export format: {0:?} (expected JSON or CSV)")]
    UnsupportedFormat(String),

    #[error("{0}: required when {1} is given")]
    MissingField(&'static str, &'static str),

    #[error("malformed request: {reason}")]
    Malformed { field: String, reason: String },
}

impl ValidationError {
    /// Name of the request field the error refers to, in wire (camelCase) form.
    pub fn field(&self) -> &str {
        match self {
            ValidationError::InvalidTarget(_) => "targetIp",
            ValidationError::PortOutOfRange { field, .. } => field,
            ValidationError::InvertedRange { .. } => "portRange",
            ValidationError::UnsupportedProtocol(_) => "protocol",
            ValidationError::TimeoutOutOfRange(_) => "timeout",
            ValidationError::EmptyPortSet => "portGroups",
            ValidationError::InvalidPortList(_) => "portList",
            ValidationError::UnsupportedFormat(_) => "exportFormat",
            ValidationError::MissingField(field, _) => field,
            ValidationError::Malformed { field, .. } => field,
        }
    }
}

/// Scan-level failure. Per-port problems never show up here; they are
/// recorded as `PortStatus::Error` on the affected port.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("progress consumer went away; scan stopped")]
    StreamTransport,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_name_their_field() {
        let e = ValidationError::PortOutOfRange { field: "endPort", value: 70000 };
        assert_eq!(e.field(), "endPort");
        assert!(e.to_string().contains("70000"));
        assert_eq!(ValidationError::InvertedRange { start: 9, end: 3 }.field(), "portRange");
        assert_eq!(ValidationError::MissingField("startPort", "endPort").field(), "startPort");
        let e = ValidationError::Malformed { field: "timeout".into(), reason: "timeout: bad".into() };
        assert_eq!(e.field(), "timeout");
    }
}
