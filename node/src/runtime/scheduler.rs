use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::runtime::ChainClock;

#[derive(Debug)]
struct TurnState {
    /// Height of the next block to be produced.
    next_turn: u64,
    own_index: usize,
    peer_count: usize,
}

/// Decides when this node may produce a block.
///
/// Heights are assigned round-robin over the peer list: the producer of
/// height `h` is the peer at index `h % peer_count`, independent of the
/// nominal leader.
#[derive(Debug)]
pub struct TurnScheduler {
    genesis_ms: u64,
    period_ms: u64,
    tick_ms: u64,
    clock: Arc<ChainClock>,
    state: Mutex<TurnState>,
}

impl TurnScheduler {
    pub fn new(
        clock: Arc<ChainClock>,
        genesis_ms: u64,
        period_ms: u64,
        tick_ms: u64,
        own_index: usize,
        peer_count: usize,
    ) -> anyhow::Result<Self> {
        if period_ms == 0 || tick_ms == 0 {
            anyhow::bail!("Period and tick must be positive");
        }
        if own_index >= peer_count {
            anyhow::bail!("Own index {own_index} out of range for {peer_count} peers");
        }
        Ok(Self {
            genesis_ms,
            period_ms,
            tick_ms,
            clock,
            state: Mutex::new(TurnState {
                next_turn: 1,
                own_index,
                peer_count,
            }),
        })
    }

    /// Canonical block height at time `t`. Times before genesis map to 0.
    pub fn height_for_time(&self, t: u64) -> u64 {
        t.saturating_sub(self.genesis_ms) / self.period_ms
    }

    /// Time at which block `height` is due.
    pub fn turn_time(&self, height: u64) -> u64 {
        self.genesis_ms + height * self.period_ms
    }

    /// Current coordinated time and how long to wait before the next turn.
    ///
    /// The wait never exceeds one tick. Zero means the turn is due now.
    pub fn next_tick(&self) -> (u64, Duration) {
        let now = self.clock.now();
        (now, self.wait_at(now))
    }

    pub fn wait_at(&self, now: u64) -> Duration {
        let target = self.turn_time(self.next_turn());
        Duration::from_millis(target.saturating_sub(now).min(self.tick_ms))
    }

    pub fn is_my_turn(&self) -> bool {
        let state = self.state.lock();
        state.next_turn % state.peer_count as u64 == state.own_index as u64
    }

    pub fn next_turn(&self) -> u64 {
        self.state.lock().next_turn
    }

    /// Moves to the next height. Returns the new value.
    pub fn advance_turn(&self) -> u64 {
        let mut state = self.state.lock();
        state.next_turn += 1;
        log::trace!("Next turn {}", state.next_turn);
        state.next_turn
    }

    /// Skips ahead after startup. Never moves backwards.
    pub fn resume_at(&self, turn: u64) {
        let mut state = self.state.lock();
        if turn > state.next_turn {
            log::info!("Resuming production at height {turn}");
            state.next_turn = turn;
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const T0: u64 = 1_700_000_000_000;
    const PERIOD: u64 = 10_000;

    fn scheduler(own_index: usize, peer_count: usize) -> TurnScheduler {
        TurnScheduler::new(
            Arc::new(ChainClock::new()),
            T0,
            PERIOD,
            1_000,
            own_index,
            peer_count,
        )
        .unwrap()
    }

    #[test]
    fn height_for_time_is_monotonic_and_zero_before_first_period() {
        let s = scheduler(0, 3);
        assert_eq!(s.height_for_time(0), 0);
        assert_eq!(s.height_for_time(T0 - 1), 0);
        assert_eq!(s.height_for_time(T0), 0);
        assert_eq!(s.height_for_time(T0 + PERIOD - 1), 0);
        assert_eq!(s.height_for_time(T0 + PERIOD), 1);

        let mut last = 0;
        for t in (T0 - PERIOD..T0 + 10 * PERIOD).step_by(1_234) {
            let h = s.height_for_time(t);
            assert!(h >= last);
            last = h;
        }
    }

    #[test]
    fn exactly_one_producer_per_height() {
        let n = 4;
        let schedulers = (0..n).map(|i| scheduler(i, n)).collect::<Vec<_>>();
        for height in 1..=12u64 {
            let producers = schedulers
                .iter()
                .enumerate()
                .filter(|(_, s)| s.is_my_turn())
                .map(|(i, _)| i)
                .collect::<Vec<_>>();
            assert_eq!(producers, vec![(height % n as u64) as usize]);
            for s in &schedulers {
                assert_eq!(s.advance_turn(), height + 1);
            }
        }
    }

    #[test]
    fn wait_is_clamped_to_tick() {
        let s = scheduler(1, 3);
        // Next turn is height 1, due at T0 + PERIOD.
        assert_eq!(s.wait_at(T0), Duration::from_millis(1_000));
        assert_eq!(s.wait_at(T0 + PERIOD - 300), Duration::from_millis(300));
        assert_eq!(s.wait_at(T0 + PERIOD), Duration::ZERO);
        assert_eq!(s.wait_at(T0 + 5 * PERIOD), Duration::ZERO);
    }

    #[test]
    fn turn_cycle_scenario() {
        let s = scheduler(1, 3);
        let now = T0 + 15_000;
        assert_eq!(s.height_for_time(now), 1);
        assert_eq!(s.next_turn(), 1);
        assert!(s.is_my_turn());
        assert_eq!(s.wait_at(now), Duration::ZERO);

        assert_eq!(s.advance_turn(), 2);
        assert!(!s.is_my_turn());
        assert_eq!(s.wait_at(now), Duration::from_millis(1_000));
    }

    #[test]
    fn resume_never_moves_back() {
        let s = scheduler(0, 2);
        s.resume_at(5);
        assert_eq!(s.next_turn(), 5);
        s.resume_at(3);
        assert_eq!(s.next_turn(), 5);
    }

    #[test]
    fn rejects_invalid_parameters() {
        let clock = Arc::new(ChainClock::new());
        assert!(TurnScheduler::new(clock.clone(), T0, 0, 1, 0, 1).is_err());
        assert!(TurnScheduler::new(clock, T0, 1, 1, 3, 3).is_err());
    }
}
