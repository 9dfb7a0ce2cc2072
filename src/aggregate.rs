use std::collections::BTreeMap;
use std::net::IpAddr;

use ::time::{format_description::well_known::Rfc3339, OffsetDateTime};

use crate::types::{
    ProbeOutcome, Protocol, ProtocolResults, ProtocolSelector, ScanSummary, StatusCounts,
};

/// Accumulates probe outcomes for one scan. Owned and mutated only by the
/// scheduler; probes hand their outcomes back by value.
#[derive(Debug)]
pub struct ResultAggregator {
    target: IpAddr,
    protocol: ProtocolSelector,
    outcomes: Vec<ProbeOutcome>,
    started_at: String,
}

impl ResultAggregator {
    pub fn new(target: IpAddr, protocol: ProtocolSelector) -> Self {
        Self {
            target,
            protocol,
            outcomes: Vec::new(),
            started_at: now_rfc3339(),
        }
    }

    /// Merge a group of outcomes and return them as a per-protocol map.
    ///
    /// Batches arrive in ascending port order, so sorting each batch before
    /// appending keeps the outcome list sorted.
    pub fn record_batch(&mut self, mut batch: Vec<ProbeOutcome>) -> ProtocolResults {
        batch.sort_by_key(sort_key);
        let mut delta = ProtocolResults::default();
        for &o in &batch {
            delta.insert(o);
        }
        self.outcomes.extend(batch);
        delta
    }

    pub fn outcome_count(&self) -> usize {
        self.outcomes.len()
    }

    /// Freeze into a summary. `completed` is false for a cancelled scan.
    pub fn finish(mut self, completed: bool) -> ScanSummary {
        // No-op for batched scans; pooled scans record out of order.
        self.outcomes.sort_by_key(sort_key);

        let mut counts = StatusCounts::default();
        let mut by_protocol: BTreeMap<Protocol, StatusCounts> = self
            .protocol
            .protocols()
            .iter()
            .map(|&p| (p, StatusCounts::default()))
            .collect();
        for o in &self.outcomes {
            counts.add(o.status);
            by_protocol.entry(o.protocol).or_default().add(o.status);
        }

        let mut ports: Vec<u16> = self.outcomes.iter().map(|o| o.port).collect();
        ports.dedup();

        ScanSummary {
            target: self.target,
            protocol: self.protocol,
            total_scanned: ports.len() as u64,
            counts,
            by_protocol,
            outcomes: self.outcomes,
            started_at: self.started_at,
            finished_at: now_rfc3339(),
            completed,
        }
    }
}

fn sort_key(o: &ProbeOutcome) -> (u16, Protocol) {
    (o.port, o.protocol)
}

fn now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| String::from("1970-01-01T00:00:00Z"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PortStatus;
    use std::net::Ipv4Addr;

    fn o(port: u16, protocol: Protocol, status: PortStatus) -> ProbeOutcome {
        ProbeOutcome { port, protocol, status }
    }

    #[test]
    fn batches_stay_sorted_and_counted() {
        let mut agg = ResultAggregator::new(Ipv4Addr::LOCALHOST.into(), ProtocolSelector::Both);
        let delta = agg.record_batch(vec![
            o(2, Protocol::Udp, PortStatus::OpenFiltered),
            o(1, Protocol::Tcp, PortStatus::Open),
            o(2, Protocol::Tcp, PortStatus::Closed),
            o(1, Protocol::Udp, PortStatus::Closed),
        ]);
        assert_eq!(delta.len(), 4);
        agg.record_batch(vec![
            o(3, Protocol::Udp, PortStatus::Error),
            o(3, Protocol::Tcp, PortStatus::Filtered),
        ]);

        let summary = agg.finish(true);
        let keys: Vec<_> = summary.outcomes.iter().map(|o| (o.port, o.protocol)).collect();
        assert_eq!(
            keys,
            vec![
                (1, Protocol::Tcp),
                (1, Protocol::Udp),
                (2, Protocol::Tcp),
                (2, Protocol::Udp),
                (3, Protocol::Tcp),
                (3, Protocol::Udp),
            ]
        );
        assert_eq!(summary.total_scanned, 3);
        assert_eq!(summary.counts.total(), 6);
        assert_eq!(summary.counts.open, 1);
        assert_eq!(summary.counts.closed, 2);
        assert_eq!(summary.by_protocol[&Protocol::Udp].open_filtered, 1);
        assert_eq!(summary.by_protocol[&Protocol::Tcp].filtered, 1);
        assert!(summary.completed);
    }

    #[test]
    fn empty_protocols_still_reported() {
        let agg = ResultAggregator::new(Ipv4Addr::LOCALHOST.into(), ProtocolSelector::Udp);
        let summary = agg.finish(false);
        assert_eq!(summary.by_protocol.len(), 1);
        assert_eq!(summary.results().udp.map(|m| m.len()), Some(0));
        assert!(!summary.completed);
    }
}
