//! The per-node hybrid logical clock.

use docmesh_types::HlcTimestamp;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

/// A hybrid logical clock.
///
/// Combines wall-clock milliseconds with a logical counter so that
/// stamps are strictly increasing locally even when the wall clock
/// stalls or steps backwards, and so that observing a remote stamp
/// always advances past it. The read-modify-write in [`now`](Self::now)
/// and [`update`](Self::update) is guarded by a mutex; the clock is
/// shared across tasks behind an `Arc`.
#[derive(Debug)]
pub struct HlcClock {
    node_id: String,
    state: Mutex<ClockState>,
}

#[derive(Debug)]
struct ClockState {
    wall_time: u64,
    logical: u32,
}

impl HlcClock {
    /// Create a clock for the given node id, starting at zero.
    pub fn new(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            state: Mutex::new(ClockState {
                wall_time: 0,
                logical: 0,
            }),
        }
    }

    /// The node id stamped onto every timestamp this clock produces.
    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Produce a timestamp for a local event.
    pub fn now(&self) -> HlcTimestamp {
        self.now_at(wall_clock_ms())
    }

    /// Observe a remote timestamp and produce a local stamp that is
    /// strictly greater than both it and every stamp issued so far.
    pub fn update(&self, remote: &HlcTimestamp) -> HlcTimestamp {
        self.update_at(wall_clock_ms(), remote)
    }

    fn now_at(&self, physical: u64) -> HlcTimestamp {
        let mut state = self.state.lock().expect("clock mutex poisoned");
        if physical > state.wall_time {
            state.wall_time = physical;
            state.logical = 0;
        } else {
            state.logical += 1;
        }
        self.stamp(&state)
    }

    fn update_at(&self, physical: u64, remote: &HlcTimestamp) -> HlcTimestamp {
        let mut state = self.state.lock().expect("clock mutex poisoned");
        let max_wall = physical.max(state.wall_time).max(remote.wall_time);

        // Whenever local and remote share the winning wall time, the
        // counter must clear both; otherwise the loser's counter could
        // overtake the produced stamp.
        state.logical = if max_wall == state.wall_time && max_wall == remote.wall_time {
            state.logical.max(remote.logical) + 1
        } else if max_wall == physical && max_wall == state.wall_time {
            state.logical + 1
        } else if max_wall == physical && max_wall == remote.wall_time {
            remote.logical + 1
        } else if max_wall == state.wall_time {
            state.logical + 1
        } else if max_wall == remote.wall_time {
            remote.logical + 1
        } else {
            0
        };
        state.wall_time = max_wall;
        self.stamp(&state)
    }

    fn stamp(&self, state: &ClockState) -> HlcTimestamp {
        HlcTimestamp::new(state.wall_time, state.logical, self.node_id.clone())
    }
}

fn wall_clock_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn now_advances_with_wall_clock() {
        let clock = HlcClock::new("a");
        let t1 = clock.now_at(100);
        let t2 = clock.now_at(200);
        assert_eq!(t1, HlcTimestamp::new(100, 0, "a"));
        assert_eq!(t2, HlcTimestamp::new(200, 0, "a"));
    }

    #[test]
    fn now_is_strictly_increasing_under_frozen_wall_clock() {
        let clock = HlcClock::new("a");
        let mut previous = clock.now_at(100);
        for _ in 0..1000 {
            let next = clock.now_at(100);
            assert!(next > previous);
            previous = next;
        }
    }

    #[test]
    fn now_is_strictly_increasing_when_wall_clock_steps_back() {
        let clock = HlcClock::new("a");
        let t1 = clock.now_at(500);
        let t2 = clock.now_at(100);
        let t3 = clock.now_at(90);
        assert!(t2 > t1);
        assert!(t3 > t2);
        assert_eq!(t3.wall_time, 500);
    }

    #[test]
    fn update_exceeds_the_observed_stamp() {
        let clock = HlcClock::new("a");
        let remote = HlcTimestamp::new(10_000, 42, "b");
        let local = clock.update_at(100, &remote);
        assert!(local > remote);
        assert_eq!(local.wall_time, 10_000);
        assert_eq!(local.logical, 43);
    }

    #[test]
    fn update_with_all_three_walls_equal_takes_max_counter() {
        let clock = HlcClock::new("a");
        clock.now_at(100); // local state now (100, 0)
        let remote = HlcTimestamp::new(100, 9, "b");
        let local = clock.update_at(100, &remote);
        assert_eq!(local, HlcTimestamp::new(100, 10, "a"));
    }

    #[test]
    fn update_with_fresh_physical_time_resets_counter() {
        let clock = HlcClock::new("a");
        clock.now_at(100);
        let remote = HlcTimestamp::new(150, 9, "b");
        let local = clock.update_at(200, &remote);
        assert_eq!(local, HlcTimestamp::new(200, 0, "a"));
        assert!(local > remote);
    }

    #[test]
    fn update_behind_local_wall_bumps_local_counter() {
        let clock = HlcClock::new("a");
        clock.now_at(500);
        let remote = HlcTimestamp::new(100, 3, "b");
        let local = clock.update_at(90, &remote);
        assert_eq!(local, HlcTimestamp::new(500, 1, "a"));
    }

    #[test]
    fn update_with_tied_walls_above_physical_clears_both_counters() {
        let clock = HlcClock::new("a");
        clock.now_at(400); // local (400, 0)
        clock.now_at(100); // local (400, 1), wall clock lagging
        let remote = HlcTimestamp::new(400, 5, "b");
        let local = clock.update_at(100, &remote);
        assert_eq!(local, HlcTimestamp::new(400, 6, "a"));
        assert!(local > remote);
    }

    #[test]
    fn update_ahead_of_both_uses_remote_counter() {
        let clock = HlcClock::new("a");
        clock.now_at(100);
        let remote = HlcTimestamp::new(900, 7, "b");
        let local = clock.update_at(200, &remote);
        assert_eq!(local, HlcTimestamp::new(900, 8, "a"));
    }

    #[test]
    fn interleaved_now_and_update_never_regress() {
        let clock = HlcClock::new("a");
        let mut previous = clock.now_at(100);
        let remotes = [
            HlcTimestamp::new(50, 0, "b"),
            HlcTimestamp::new(100, 20, "b"),
            HlcTimestamp::new(400, 0, "c"),
            HlcTimestamp::new(400, 5, "b"),
        ];
        for remote in &remotes {
            let updated = clock.update_at(100, remote);
            assert!(updated > previous);
            assert!(updated > *remote);
            let local = clock.now_at(100);
            assert!(local > updated);
            previous = local;
        }
    }

    #[test]
    fn wall_clock_now_produces_usable_stamps() {
        let clock = HlcClock::new("a");
        let t1 = clock.now();
        let t2 = clock.now();
        assert!(t2 > t1);
        assert!(t1.wall_time > 0);
    }
}
