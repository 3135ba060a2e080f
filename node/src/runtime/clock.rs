use parking_lot::Mutex;

use crate::utilities::time::ChainTime;

/// Wall clock corrected by the skew against the rest of the network.
///
/// The offset stays zero until something calls [`ChainClock::set_offset`].
#[derive(Debug, Default)]
pub struct ChainClock {
    offset_ms: Mutex<i64>,
}

impl ChainClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Coordinated time in milliseconds since the unix epoch.
    pub fn now(&self) -> u64 {
        let offset = *self.offset_ms.lock();
        ChainTime::now().saturating_add_signed(offset)
    }

    pub fn offset(&self) -> i64 {
        *self.offset_ms.lock()
    }

    pub fn set_offset(&self, offset_ms: i64) {
        log::debug!("Clock offset set to {offset_ms}ms");
        *self.offset_ms.lock() = offset_ms;
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn offset_shifts_reading() {
        let clock = ChainClock::new();
        clock.set_offset(-60_000);
        let shifted = clock.now();
        assert!(shifted + 50_000 < ChainTime::now());
        assert_eq!(clock.offset(), -60_000);
    }
}
