//! UDP probe with service-shaped payloads.
//!
//! A silent UDP port is ambiguous: it may be an open service that ignored a
//! payload it did not understand, or a firewall dropping the datagram. The
//! payloads below are chosen so the common services actually answer.

use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::time;
use tracing::trace;

use crate::types::PortStatus;

const SSDP_MSEARCH: &[u8] = b"M-SEARCH * HTTP/1.1\r\n\
HOST: 239.255.255.250:1900\r\n\
MAN: \"ssdp:discover\"\r\n\
MX: 1\r\n\
ST: ssdp:all\r\n\r\n";

/// sysDescr.0
const SNMP_SYSDESCR_OID: &[u32] = &[1, 3, 6, 1, 2, 1, 1, 1, 0];

/// Send one datagram to `target:port` and classify what comes back.
///
/// - Any datagram before `timeout`: `Open`.
/// - ICMP port unreachable, surfaced as a refused/reset socket error: `Closed`.
/// - Nothing before `timeout`: `OpenFiltered`.
/// - Any other send/receive error: `Filtered`.
/// - The local socket cannot be bound: `Error`.
pub async fn probe(target: IpAddr, port: u16, timeout: Duration) -> PortStatus {
    let addr = SocketAddr::new(target, port);
    let socket = match UdpSocket::bind(local_bind_addr(&target)).await {
        Ok(s) => s,
        Err(e) => {
            trace!(%addr, error = %e, "udp socket bind failed");
            return PortStatus::Error;
        }
    };

    // A connected socket is what lets the kernel hand us the ICMP
    // port-unreachable as ECONNREFUSED on the next recv.
    if let Err(e) = socket.connect(addr).await {
        trace!(%addr, error = %e, "udp connect failed");
        return classify_socket_error(&e);
    }

    let payload = payload_for(port);
    let exchange = async {
        socket.send(&payload).await?;
        let mut buf = [0u8; 1500];
        socket.recv(&mut buf).await
    };

    let status = match time::timeout(timeout, exchange).await {
        Ok(Ok(n)) => {
            trace!(%addr, bytes = n, "udp response");
            PortStatus::Open
        }
        Ok(Err(e)) => {
            trace!(%addr, error = %e, "udp exchange failed");
            classify_socket_error(&e)
        }
        Err(_) => PortStatus::OpenFiltered,
    };
    trace!(%addr, %status, "udp probe done");
    status
}

/// Map a UDP socket error to a port status.
pub fn classify_socket_error(e: &io::Error) -> PortStatus {
    match e.kind() {
        // Linux reports port-unreachable as refused, Windows as reset.
        io::ErrorKind::ConnectionRefused | io::ErrorKind::ConnectionReset => PortStatus::Closed,
        _ => PortStatus::Filtered,
    }
}

/// Probe payload for a destination port. Unknown ports get an empty datagram.
pub fn payload_for(port: u16) -> Vec<u8> {
    match port {
        53 | 5353 => dns_query(),
        123 => ntp_request(),
        161 => snmp_get_request("public", SNMP_SYSDESCR_OID),
        1900 => SSDP_MSEARCH.to_vec(),
        _ => Vec::new(),
    }
}

fn local_bind_addr(target: &IpAddr) -> SocketAddr {
    match target {
        IpAddr::V4(_) => SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0),
        IpAddr::V6(_) => SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), 0),
    }
}

/// Standard recursive query for the A record of example.com.
fn dns_query() -> Vec<u8> {
    let mut q = Vec::with_capacity(32);
    q.extend_from_slice(&0x7073u16.to_be_bytes()); // ID
    q.extend_from_slice(&0x0100u16.to_be_bytes()); // flags: RD
    q.extend_from_slice(&1u16.to_be_bytes()); // QDCOUNT
    q.extend_from_slice(&[0; 6]); // AN/NS/AR counts
    for label in ["example", "com"] {
        q.push(label.len() as u8);
        q.extend_from_slice(label.as_bytes());
    }
    q.push(0);
    q.extend_from_slice(&1u16.to_be_bytes()); // QTYPE A
    q.extend_from_slice(&1u16.to_be_bytes()); // QCLASS IN
    q
}

/// 48-byte SNTP client request: LI=0, VN=4, Mode=3.
fn ntp_request() -> Vec<u8> {
    let mut pkt = vec![0u8; 48];
    pkt[0] = 0b00_100_011;
    pkt
}

/// SNMP v2c GetRequest for a single OID with a NULL value.
fn snmp_get_request(community: &str, oid: &[u32]) -> Vec<u8> {
    let varbind = ber(0x30, &[ber(0x06, &encode_oid(oid)), vec![0x05, 0x00]].concat());
    let varbind_list = ber(0x30, &varbind);
    let pdu_body = [
        vec![0x02, 0x01, 0x01], // request-id
        vec![0x02, 0x01, 0x00], // error-status
        vec![0x02, 0x01, 0x00], // error-index
        varbind_list,
    ]
    .concat();
    let message = [
        vec![0x02, 0x01, 0x01], // version: v2c
        ber(0x04, community.as_bytes()),
        ber(0xA0, &pdu_body),
    ]
    .concat();
    ber(0x30, &message)
}

/// Tag-length-value with a short-form length; every probe body is < 128 bytes.
fn ber(tag: u8, body: &[u8]) -> Vec<u8> {
    debug_assert!(body.len() < 0x80);
    let mut out = Vec::with_capacity(body.len() + 2);
    out.push(tag);
    out.push(body.len() as u8);
    out.extend_from_slice(body);
    out
}

fn encode_oid(oid: &[u32]) -> Vec<u8> {
    let mut out = Vec::new();
    if let [first, second, rest @ ..] = oid {
        out.push((first * 40 + second) as u8);
        for &arc in rest {
            out.extend(encode_base128(arc));
        }
    }
    out
}

fn encode_base128(mut v: u32) -> Vec<u8> {
    let mut out = vec![(v & 0x7F) as u8];
    v >>= 7;
    while v > 0 {
        out.push(((v & 0x7F) as u8) | 0x80);
        v >>= 7;
    }
    out.reverse();
    out
}
