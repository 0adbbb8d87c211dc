// Download progress accounting.
//
// Events fire on 5-point percentage threshold crossings (and at 100%),
// which keeps the serial console readable on slow links. Progress never
// gates correctness; it is reporting only.

/// Percentage step between reported events.
const REPORT_STEP: u8 = 5;

#[derive(Debug, Clone, Copy)]
pub struct TransferProgress {
    total_expected: u64,
    bytes_committed: u64,
    last_report_percent: u8,
}

impl TransferProgress {
    pub fn new(total_expected: u64) -> Self {
        Self {
            total_expected,
            bytes_committed: 0,
            last_report_percent: 0,
        }
    }

    pub fn bytes_committed(&self) -> u64 {
        self.bytes_committed
    }

    pub fn percent(&self) -> u8 {
        if self.total_expected == 0 {
            return 0;
        }
        ((self.bytes_committed * 100) / self.total_expected) as u8
    }

    /// Account for `n` committed bytes. Returns the percentage to
    /// report when a threshold was crossed, `None` otherwise.
    pub fn commit(&mut self, n: u64) -> Option<u8> {
        self.bytes_committed = (self.bytes_committed + n).min(self.total_expected);
        let pct = self.percent();
        if pct == 100 && self.last_report_percent != 100 {
            self.last_report_percent = 100;
            return Some(100);
        }
        if pct >= self.last_report_percent + REPORT_STEP {
            self.last_report_percent = pct;
            return Some(pct);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reports_on_threshold_crossings() {
        let mut p = TransferProgress::new(1000);
        assert_eq!(p.commit(10), None); // 1%
        assert_eq!(p.commit(30), None); // 4%
        assert_eq!(p.commit(10), Some(5));
        assert_eq!(p.commit(10), None); // 6%
        assert_eq!(p.commit(440), Some(50));
        assert_eq!(p.commit(500), Some(100));
    }

    #[test]
    fn hundred_percent_fires_exactly_once() {
        let mut p = TransferProgress::new(100);
        assert_eq!(p.commit(100), Some(100));
        assert_eq!(p.commit(50), None);
        assert_eq!(p.bytes_committed(), 100);
    }

    #[test]
    fn quarter_chunks_report_quarters() {
        // 1024 bytes in 256-byte chunks: nothing below 25%, then the
        // four quarter marks.
        let mut p = TransferProgress::new(1024);
        let reports: Vec<_> = (0..4).filter_map(|_| p.commit(256)).collect();
        assert_eq!(reports, vec![25, 50, 75, 100]);
    }

    #[test]
    fn zero_total_never_reports() {
        let mut p = TransferProgress::new(0);
        assert_eq!(p.commit(10), None);
        assert_eq!(p.percent(), 0);
    }

    #[test]
    fn committed_is_clamped_to_total() {
        let mut p = TransferProgress::new(10);
        p.commit(50);
        assert_eq!(p.bytes_committed(), 10);
    }
}
