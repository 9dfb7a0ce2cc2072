use crate::types::{ScanPhase, ScanProgress};

/// Tracks how many ports of a scan have been probed and turns that into
/// [`ScanProgress`] records.
///
/// `scanned` only grows, never passes `total`, and the record that reaches
/// `total` is the only one marked [`ScanPhase::Completed`].
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    scanned: u64,
    total: u64,
}

impl ProgressTracker {
    pub fn new(total: usize) -> Self {
        Self { scanned: 0, total: total as u64 }
    }

    /// Record emitted before the first probe goes out.
    pub fn started(&self) -> ScanProgress {
        self.snapshot(None)
    }

    /// Account for `ports` more probed ports, the highest of which is
    /// `current_port`.
    pub fn advance(&mut self, ports: usize, current_port: u16) -> ScanProgress {
        self.scanned = (self.scanned + ports as u64).min(self.total);
        self.snapshot(Some(current_port))
    }

    fn snapshot(&self, current_port: Option<u16>) -> ScanProgress {
        let status = if self.scanned == self.total && self.total > 0 {
            ScanPhase::Completed
        } else {
            ScanPhase::Scanning
        };
        ScanProgress {
            scanned: self.scanned,
            total: self.total,
            percentage: percentage(self.scanned, self.total),
            current_port,
            status,
        }
    }
}

/// Whole-number percentage, rounded down so 100 is only shown once every
/// port is done.
pub fn percentage(scanned: u64, total: u64) -> u8 {
    if total == 0 {
        return 100;
    }
    (scanned.saturating_mul(100) / total).min(100) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentage_rounds_down_and_caps() {
        assert_eq!(percentage(0, 10), 0);
        assert_eq!(percentage(999, 1000), 99);
        assert_eq!(percentage(1000, 1000), 100);
        assert_eq!(percentage(5000, 1000), 100);
    }

    #[test]
    fn completes_exactly_at_total() {
        let mut t = ProgressTracker::new(100);
        let start = t.started();
        assert_eq!((start.scanned, start.status), (0, ScanPhase::Scanning));
        let p = t.advance(50, 50);
        assert_eq!((p.scanned, p.percentage, p.current_port), (50, 50, Some(50)));
        assert_eq!(p.status, ScanPhase::Scanning);
        let p = t.advance(50, 100);
        assert_eq!(p.status, ScanPhase::Completed);
        assert_eq!(p.scanned, p.total);
    }

    #[test]
    fn never_overshoots_total() {
        let mut t = ProgressTracker::new(3);
        let p = t.advance(10, 3);
        assert_eq!(p.scanned, 3);
        assert_eq!(p.percentage, 100);
    }
}
