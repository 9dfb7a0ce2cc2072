//! Library crate for portsweep: a batched TCP/UDP port-scanning engine and
//! the small web API that streams its progress.
pub mod aggregate;
pub mod config;
pub mod error;
pub mod export;
pub mod ports;
pub mod probe;
pub mod progress;
pub mod scanner;
pub mod server;
pub mod services;
pub mod tcp;
pub mod types;
pub mod udp;

pub use error::{ScanError, ValidationError};
pub use ports::PortSpec;
pub use scanner::Schedule;
pub use types::{PortStatus, ProbeOutcome, Protocol, ScanRequest, ScanSummary, ScanUpdate};
