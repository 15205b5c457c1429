//! Progress accounting for one action.

/// Counters of one action and the cadence at which they are reported.
#[derive(Debug, Clone, Default)]
pub struct Progress {
    pub total_items: u64,
    pub current_item: u64,
    pub total_bytes: u64,
    pub bytes_written: u64,
    units_since_report: usize,
    last_percent: Option<u8>,
}

impl Progress {
    /// Percentage done: by bytes when `by_bytes` and a byte total is known,
    /// otherwise by items. Never above 100.
    pub fn percent(&self, by_bytes: bool) -> u8 {
        let (done, total) = if by_bytes && self.total_bytes > 0 {
            (self.bytes_written, self.total_bytes)
        } else {
            (self.current_item, self.total_items)
        };
        if total == 0 {
            return 100;
        }
        (done.saturating_mul(100) / total).min(100) as u8
    }

    /// Counts one unit. `true` when `step` units passed since the last report.
    pub fn tick(&mut self, step: usize) -> bool {
        self.units_since_report += 1;
        self.units_since_report >= step.max(1)
    }

    /// Records a report of `percent`.
    pub fn reported(&mut self, percent: u8) {
        self.units_since_report = 0;
        self.last_percent = Some(percent);
    }

    /// `true` once 100 was reported.
    pub fn reported_complete(&self) -> bool {
        self.last_percent == Some(100)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percent_prefers_bytes_when_known() {
        let progress = Progress {
            total_items: 4,
            current_item: 1,
            total_bytes: 1000,
            bytes_written: 750,
            ..Default::default()
        };
        assert_eq!(progress.percent(true), 75);
        assert_eq!(progress.percent(false), 25);
    }

    #[test]
    fn percent_is_capped_and_total_zero_is_done() {
        let grown = Progress {
            total_bytes: 10,
            bytes_written: 25,
            ..Default::default()
        };
        assert_eq!(grown.percent(true), 100);
        assert_eq!(Progress::default().percent(false), 100);
    }

    #[test]
    fn tick_follows_step() {
        let mut progress = Progress::default();
        assert!(!progress.tick(3));
        assert!(!progress.tick(3));
        assert!(progress.tick(3));
        progress.reported(50);
        assert!(!progress.tick(3));
        assert!(!progress.reported_complete());
        progress.reported(100);
        assert!(progress.reported_complete());
    }
}
