//! IR repeat squashing
//!
//! A held-down remote key repeats its frame roughly every 114 ms, which
//! is far too chatty for most clients. The filter divides such bursts
//! down: every N-th identical (address, command) pair in a row produces
//! one notification, so a held key keeps emitting at 1/N of the repeat
//! rate. A pair that differs from the running one starts a new run and
//! emits nothing - isolated single presses are deliberately swallowed
//! when N > 1.

/// Rate divider for repeated decoder events
#[derive(Debug, Clone)]
pub struct SquashFilter {
    threshold: u32,
    address: u8,
    command: u8,
    count: u32,
}

impl SquashFilter {
    /// Create a filter emitting every `threshold`-th repeat; a threshold
    /// of 0 or 1 passes everything through
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold,
            address: 0,
            command: 0,
            count: 0,
        }
    }

    /// Feed one decoded pair; returns true when the client should be
    /// notified
    pub fn feed(&mut self, address: u8, command: u8) -> bool {
        if self.threshold <= 1 {
            return true;
        }

        let mut emit = false;
        if self.count > 0 {
            if self.address == address && self.command == command {
                self.count += 1;
                if self.count >= self.threshold {
                    emit = true;
                    self.count = 0;
                }
            } else {
                self.count = 1;
            }
        } else {
            self.count += 1;
        }
        self.address = address;
        self.command = command;

        emit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn emissions(filter: &mut SquashFilter, address: u8, command: u8, repeats: u32) -> u32 {
        (0..repeats)
            .filter(|_| filter.feed(address, command))
            .count() as u32
    }

    #[test]
    fn test_passthrough_below_two() {
        for threshold in [0, 1] {
            let mut filter = SquashFilter::new(threshold);
            assert_eq!(emissions(&mut filter, 4, 9, 5), 5);
        }
    }

    #[test]
    fn test_single_press_is_swallowed() {
        let mut filter = SquashFilter::new(2);
        assert!(!filter.feed(4, 9));
    }

    #[test]
    fn test_emits_every_nth_repeat() {
        let mut filter = SquashFilter::new(3);
        let hits: Vec<bool> = (0..5).map(|_| filter.feed(4, 9)).collect();
        assert_eq!(hits, [false, false, true, false, false]);
    }

    #[test]
    fn test_rate_division_property() {
        for threshold in 2..=5u32 {
            for repeats in 0..=20u32 {
                let mut filter = SquashFilter::new(threshold);
                assert_eq!(
                    emissions(&mut filter, 4, 9, repeats),
                    repeats / threshold,
                    "threshold {threshold}, repeats {repeats}"
                );
            }
        }
    }

    #[test]
    fn test_pair_change_resets_run() {
        let mut filter = SquashFilter::new(3);
        assert!(!filter.feed(4, 9));
        assert!(!filter.feed(4, 9));
        // Different key: run starts over, nothing emitted
        assert!(!filter.feed(4, 10));
        assert!(!filter.feed(4, 10));
        assert!(filter.feed(4, 10));
    }

    #[test]
    fn test_held_key_keeps_emitting() {
        let mut filter = SquashFilter::new(2);
        let hits = (0..8).filter(|_| filter.feed(1, 1)).count();
        assert_eq!(hits, 4);
    }
}
