//! Unsorted list of interval timers driven by the play/rec worker's tick.
//!
//! Timer callbacks run with the root lock released (the scheduler
//! arranges that by calling [`TimerWheel::fire_due`] itself while not
//! holding any lock it needs to drop); this module only tracks *whether*
//! an entry is due and advances its deadline. It never calls the
//! callback directly, so there's no recursive-firing hazard to guard
//! against here.

pub type TimerId = usize;

struct Entry {
    interval_ms: u32,
    next_deadline: u32,
    alive: bool,
}

/// An unsorted collection of interval timers, scanned linearly every
/// tick.
pub struct TimerWheel {
    entries: Vec<Entry>,
}

impl TimerWheel {
    pub fn new() -> Self {
        TimerWheel { entries: Vec::new() }
    }

    /// Registers a new timer, clamping the interval to `[1, 65535]` ms.
    /// Its first firing is one interval from now.
    pub fn set(&mut self, curr_position: u32, interval_ms: u32) -> TimerId {
        let interval_ms = interval_ms.clamp(1, 65535);
        let next_deadline = curr_position.wrapping_add(interval_ms);
        self.entries.push(Entry { interval_ms, next_deadline, alive: true });
        self.entries.len() - 1
    }

    /// Updates an existing timer's interval, optionally resyncing its
    /// next deadline to `curr_position`.
    pub fn update(&mut self, id: TimerId, curr_position: u32, interval_ms: u32, resync: bool) {
        if let Some(entry) = self.entries.get_mut(id) {
            entry.interval_ms = interval_ms.clamp(1, 65535);
            if resync {
                entry.next_deadline = curr_position;
            }
        }
    }

    /// Marks a timer as no longer active. Since this module calls back
    /// out via `fire_due` rather than owning its own thread, there is no
    /// in-progress spin to wait out here.
    pub fn unset(&mut self, id: TimerId) {
        if let Some(entry) = self.entries.get_mut(id) {
            entry.alive = false;
        }
    }

    /// Scans for a due timer and, if one is found, advances its deadline
    /// and returns its id for the caller to fire. Call in a loop (the
    /// caller invokes the callback itself, outside any lock, then calls
    /// this again) until it returns `None`, since the callback may have
    /// mutated the timer list and a fresh scan is needed after every
    /// firing.
    pub fn next_due(&mut self, curr_position: u32) -> Option<TimerId> {
        for (id, entry) in self.entries.iter_mut().enumerate() {
            if !entry.alive {
                continue;
            }
            let delta = (entry.next_deadline as i64) - (curr_position as i64);
            let stale = delta > entry.interval_ms as i64;
            if delta < 0 || stale {
                if delta < -1000 || stale {
                    entry.next_deadline = curr_position;
                } else {
                    while (entry.next_deadline as i64) < curr_position as i64 {
                        entry.next_deadline = entry.next_deadline.wrapping_add(entry.interval_ms);
                    }
                    entry.next_deadline = entry.next_deadline.wrapping_sub(entry.interval_ms);
                }
                entry.next_deadline = entry.next_deadline.wrapping_add(entry.interval_ms);
                return Some(id);
            }
        }
        None
    }
}

impl Default for TimerWheel {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timer_does_not_fire_before_its_interval() {
        let mut wheel = TimerWheel::new();
        wheel.set(0, 100);
        assert_eq!(wheel.next_due(50), None);
    }

    #[test]
    fn timer_fires_once_interval_elapses() {
        let mut wheel = TimerWheel::new();
        let id = wheel.set(0, 100);
        assert_eq!(wheel.next_due(100), Some(id));
    }

    #[test]
    fn timer_fires_again_after_a_second_interval() {
        let mut wheel = TimerWheel::new();
        let id = wheel.set(0, 100);
        wheel.next_due(100);
        assert_eq!(wheel.next_due(200), Some(id));
    }

    #[test]
    fn unset_timer_is_skipped() {
        let mut wheel = TimerWheel::new();
        let id = wheel.set(0, 100);
        wheel.unset(id);
        assert_eq!(wheel.next_due(100), None);
    }

    #[test]
    fn large_clock_jump_resyncs_instead_of_catching_up() {
        let mut wheel = TimerWheel::new();
        let id = wheel.set(0, 10);
        // Jump far ahead: should resync rather than fire thousands of times.
        assert_eq!(wheel.next_due(1_000_000), Some(id));
        assert_eq!(wheel.next_due(1_000_000), None);
    }
}
