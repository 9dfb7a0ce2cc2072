use std::future::Future;
use std::net::IpAddr;
use std::time::Duration;

use crate::types::{PortStatus, ProbeOutcome, Protocol};
use crate::{tcp, udp};

/// Something that can classify one (host, port, protocol) tuple.
///
/// The scheduler is generic over this so it can be driven without touching
/// the network; [`NetProber`] is the real implementation.
pub trait Prober: Send + Sync + 'static {
    fn probe(
        &self,
        target: IpAddr,
        port: u16,
        protocol: Protocol,
        timeout: Duration,
    ) -> impl Future<Output = PortStatus> + Send;
}

/// Probes over real sockets, dispatching on the protocol.
#[derive(Debug, Clone, Copy, Default)]
pub struct NetProber;

impl Prober for NetProber {
    async fn probe(
        &self,
        target: IpAddr,
        port: u16,
        protocol: Protocol,
        timeout: Duration,
    ) -> PortStatus {
        match protocol {
            Protocol::Tcp => tcp::probe(target, port, timeout).await,
            Protocol::Udp => udp::probe(target, port, timeout).await,
        }
    }
}

/// Run one probe and wrap its status into an outcome.
pub async fn probe_one<P: Prober + ?Sized>(
    prober: &P,
    target: IpAddr,
    port: u16,
    protocol: Protocol,
    timeout: Duration,
) -> ProbeOutcome {
    let status = prober.probe(target, port, protocol, timeout).await;
    ProbeOutcome { port, protocol, status }
}
