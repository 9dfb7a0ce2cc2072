//! Static well-known port table and named port groups.
//!
//! Purely presentational: nothing in here influences how a port is probed or
//! classified.

use serde::Serialize;

use crate::types::Protocol;

/// Human-readable service information for one (protocol, port) pair.
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortMetadata {
    pub protocol: Protocol,
    pub port: u16,
    pub name: &'static str,
    pub description: &'static str,
}

/// A named, fixed set of ports (e.g. "Email").
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortGroup {
    pub name: &'static str,
    pub ports: &'static [u16],
}

const fn tcp(port: u16, name: &'static str, description: &'static str) -> PortMetadata {
    PortMetadata { protocol: Protocol::Tcp, port, name, description }
}

const fn udp(port: u16, name: &'static str, description: &'static str) -> PortMetadata {
    PortMetadata { protocol: Protocol::Udp, port, name, description }
}

// Sorted by (protocol, port) so lookups can binary search.
const WELL_KNOWN: &[PortMetadata] = &[
    tcp(20, "ftp-data", "FTP data transfer"),
    tcp(21, "ftp", "File Transfer Protocol control"),
    tcp(22, "ssh", "Secure Shell"),
    tcp(23, "telnet", "Telnet remote login"),
    tcp(25, "smtp", "Simple Mail Transfer Protocol"),
    tcp(53, "domain", "DNS zone transfers and large responses"),
    tcp(80, "http", "Hypertext Transfer Protocol"),
    tcp(110, "pop3", "Post Office Protocol v3"),
    tcp(135, "msrpc", "Microsoft RPC endpoint mapper"),
    tcp(139, "netbios-ssn", "NetBIOS session service"),
    tcp(143, "imap", "Internet Message Access Protocol"),
    tcp(389, "ldap", "Lightweight Directory Access Protocol"),
    tcp(443, "https", "HTTP over TLS"),
    tcp(445, "microsoft-ds", "SMB over TCP"),
    tcp(465, "smtps", "SMTP over implicit TLS"),
    tcp(587, "submission", "Mail submission"),
    tcp(636, "ldaps", "LDAP over TLS"),
    tcp(989, "ftps-data", "FTP data over TLS"),
    tcp(990, "ftps", "FTP control over TLS"),
    tcp(993, "imaps", "IMAP over TLS"),
    tcp(995, "pop3s", "POP3 over TLS"),
    tcp(1433, "ms-sql-s", "Microsoft SQL Server"),
    tcp(1521, "oracle", "Oracle database listener"),
    tcp(1883, "mqtt", "MQTT broker"),
    tcp(3306, "mysql", "MySQL / MariaDB"),
    tcp(3389, "ms-wbt-server", "Remote Desktop Protocol"),
    tcp(5432, "postgresql", "PostgreSQL"),
    tcp(5672, "amqp", "AMQP broker"),
    tcp(5900, "vnc", "Virtual Network Computing"),
    tcp(5985, "wsman", "WinRM over HTTP"),
    tcp(6379, "redis", "Redis key-value store"),
    tcp(8080, "http-alt", "Alternate HTTP"),
    tcp(8443, "https-alt", "Alternate HTTPS"),
    tcp(9092, "kafka", "Apache Kafka broker"),
    tcp(11211, "memcache", "Memcached"),
    tcp(27017, "mongodb", "MongoDB"),
    udp(53, "domain", "Domain Name System"),
    udp(67, "dhcps", "DHCP server"),
    udp(68, "dhcpc", "DHCP client"),
    udp(69, "tftp", "Trivial File Transfer Protocol"),
    udp(123, "ntp", "Network Time Protocol"),
    udp(137, "netbios-ns", "NetBIOS name service"),
    udp(138, "netbios-dgm", "NetBIOS datagram service"),
    udp(161, "snmp", "Simple Network Management Protocol"),
    udp(162, "snmptrap", "SNMP traps"),
    udp(389, "ldap", "Connectionless LDAP"),
    udp(500, "isakmp", "IKE key exchange"),
    udp(514, "syslog", "Syslog"),
    udp(1900, "ssdp", "Simple Service Discovery Protocol"),
    udp(5353, "mdns", "Multicast DNS"),
];

const GROUPS: &[PortGroup] = &[
    PortGroup { name: "HTTP/HTTPS", ports: &[80, 443] },
    PortGroup { name: "Email", ports: &[25, 110, 143, 465, 587, 993, 995] },
    PortGroup { name: "Database", ports: &[1433, 1521, 3306, 5432, 6379, 11211, 27017] },
    PortGroup { name: "File Transfer", ports: &[20, 21, 22, 69, 989, 990] },
    PortGroup { name: "Remote Access", ports: &[22, 23, 3389, 5900, 5985] },
    PortGroup { name: "DNS", ports: &[53] },
    PortGroup { name: "Directory", ports: &[389, 636] },
    PortGroup { name: "Network Services", ports: &[53, 67, 68, 123, 137, 138, 161, 162, 514] },
    PortGroup { name: "Messaging", ports: &[1883, 5672, 9092] },
];

/// Look up the well-known service for a (protocol, port) pair.
pub fn lookup(protocol: Protocol, port: u16) -> Option<&'static PortMetadata> {
    WELL_KNOWN
        .binary_search_by(|m| (m.protocol, m.port).cmp(&(protocol, port)))
        .ok()
        .map(|i| &WELL_KNOWN[i])
}

/// Service name for display, `"unknown"` when the port is not in the table.
pub fn service_name(protocol: Protocol, port: u16) -> &'static str {
    lookup(protocol, port).map_or("unknown", |m| m.name)
}

pub fn groups() -> &'static [PortGroup] {
    GROUPS
}

/// Find a group by name, ignoring ASCII case and surrounding whitespace.
pub fn group(name: &str) -> Option<&'static PortGroup> {
    let name = name.trim();
    GROUPS.iter().find(|g| g.name.eq_ignore_ascii_case(name))
}
