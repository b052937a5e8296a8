//! Engine handle: the process-wide root owning every device, the shared
//! event pool, and the timer list.
//!
//! All device and timer state lives behind one
//! `parking_lot::ReentrantMutex<RefCell<_>>` so a timer callback can
//! re-enter root-guarded code (to start a new song, say) without
//! deadlocking against the lock its own firing already holds.

use crate::clock::Clock;
use crate::config::Config;
use crate::device::{Device, EventCallback};
use crate::errors::EngineError;
use crate::event::EventId;
use crate::pool::EventPool;
use crate::timer::{TimerId, TimerWheel};
use bitflags::bitflags;
use parking_lot::{Mutex, ReentrantMutex};
use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::Arc;

/// A timer's user callback, invoked with no lock held.
pub type TimerCallback = Arc<dyn Fn() + Send + Sync>;

/// Number of record and of playback devices.
pub const NUM_DEVICES: usize = 16;

bitflags! {
    /// Which of a device's two directions an operation applies to.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct StartFlags: u8 {
        const PLAY = 0x01;
        const RECORD = 0x02;
        const BOTH = Self::PLAY.bits() | Self::RECORD.bits();
    }
}

struct RootState {
    rec: Vec<Device>,
    play: Vec<Device>,
    timers: TimerWheel,
    curr_position: u32,
}

/// Owns every record/playback device, the shared event pool, and the
/// timer list. Cheap to share: clone the `Arc` the scheduler hands out
/// rather than constructing a second `Root`.
pub struct Root {
    state: ReentrantMutex<RefCell<RootState>>,
    pool: EventPool,
    clock: Clock,
    timer_callbacks: Mutex<HashMap<TimerId, TimerCallback>>,
}

impl Root {
    /// Builds a fresh root with every device disabled. The scheduler
    /// threads themselves are started separately, see
    /// [`crate::scheduler::Scheduler`].
    pub fn new() -> Self {
        let rec = (0..NUM_DEVICES as u8).map(Device::new).collect();
        let play = (0..NUM_DEVICES as u8).map(Device::new).collect();
        Root {
            state: ReentrantMutex::new(RefCell::new(RootState {
                rec,
                play,
                timers: TimerWheel::new(),
                curr_position: 0,
            })),
            pool: EventPool::new(),
            clock: Clock::new(),
            timer_callbacks: Mutex::new(HashMap::new()),
        }
    }

    pub fn pool(&self) -> &EventPool {
        &self.pool
    }

    pub fn curr_position(&self) -> u32 {
        let guard = self.state.lock();
        guard.borrow().curr_position
    }

    /// Samples the clock and advances `curr_position`. Called once per
    /// play/rec tick by the scheduler; exposed here because the position
    /// itself is root-owned state.
    pub fn sample_clock(&self) -> u32 {
        let position = self.clock.elapsed_ms();
        let guard = self.state.lock();
        guard.borrow_mut().curr_position = position;
        position
    }

    pub fn set_record_callback(&self, device_no: u8, callback: Option<EventCallback>) {
        self.with_rec(device_no, |dev| match callback {
            Some(cb) => dev.set_callback(cb),
            None => dev.clear_callback(),
        });
    }

    pub fn set_play_callback(&self, device_no: u8, callback: Option<EventCallback>) {
        self.with_play(device_no, |dev| match callback {
            Some(cb) => dev.set_callback(cb),
            None => dev.clear_callback(),
        });
    }

    fn with_rec<R>(&self, device_no: u8, f: impl FnOnce(&mut Device) -> R) -> Option<R> {
        let guard = self.state.lock();
        let mut state = guard.borrow_mut();
        state.rec.get_mut(device_no as usize).map(f)
    }

    fn with_play<R>(&self, device_no: u8, f: impl FnOnce(&mut Device) -> R) -> Option<R> {
        let guard = self.state.lock();
        let mut state = guard.borrow_mut();
        state.play.get_mut(device_no as usize).map(f)
    }

    /// Arms the requested directions over `[curr - start_offset, curr -
    /// start_offset + end_offset)`. Always stops first, then validates
    /// the window before arming.
    pub fn start(&self, start_offset: u32, end_offset: u32, flags: StartFlags) -> Result<(), EngineError> {
        if flags.is_empty() {
            return Ok(());
        }
        self.stop(flags);

        if end_offset <= start_offset || start_offset > 0x8000_0000 || end_offset > 0x8000_0000 {
            return Err(EngineError::InvalidTimeWindow);
        }

        let guard = self.state.lock();
        let mut state = guard.borrow_mut();
        let start_position = state.curr_position.wrapping_sub(start_offset);
        if flags.contains(StartFlags::PLAY) {
            for dev in &mut state.play {
                dev.start(start_position, end_offset);
            }
        }
        if flags.contains(StartFlags::RECORD) {
            for dev in &mut state.rec {
                dev.start(start_position, end_offset);
            }
        }
        Ok(())
    }

    /// Disarms the requested directions, draining queues and emitting
    /// panic-off on playback devices that ever started a note.
    pub fn stop(&self, flags: StartFlags) {
        if flags.is_empty() {
            return;
        }
        let guard = self.state.lock();
        let mut state = guard.borrow_mut();
        if flags.contains(StartFlags::PLAY) {
            for dev in &mut state.play {
                dev.stop(&self.pool, true);
            }
        }
        if flags.contains(StartFlags::RECORD) {
            for dev in &mut state.rec {
                dev.stop(&self.pool, false);
            }
        }
    }

    /// Registers a periodic timer, fired by the play/rec worker tick.
    pub fn set_timer(&self, interval_ms: u32, callback: impl Fn() + Send + Sync + 'static) -> TimerId {
        let guard = self.state.lock();
        let mut state = guard.borrow_mut();
        let curr = state.curr_position;
        let id = state.timers.set(curr, interval_ms);
        drop(state);
        self.timer_callbacks.lock().insert(id, Arc::new(callback));
        id
    }

    /// Since this crate's timers fire from a plain scan rather than
    /// their own thread, there is no in-progress firing to spin out
    /// before removal.
    pub fn unset_timer(&self, id: TimerId) {
        let guard = self.state.lock();
        guard.borrow_mut().timers.unset(id);
        drop(guard);
        self.timer_callbacks.lock().remove(&id);
    }

    /// Pops the next due timer id, if any, advancing its deadline.
    /// Intended to be called in a loop by the scheduler until it returns
    /// `None`, invoking the caller's own callback outside this lock
    /// between calls.
    pub fn next_due_timer(&self) -> Option<TimerId> {
        let guard = self.state.lock();
        let mut state = guard.borrow_mut();
        let curr = state.curr_position;
        state.timers.next_due(curr)
    }

    /// Fires every timer due right now, invoking each callback with no
    /// root lock held, then rescans (the callback may itself register or
    /// unset a timer).
    pub fn fire_due_timers(&self) {
        while let Some(id) = self.next_due_timer() {
            let callback = self.timer_callbacks.lock().get(&id).cloned();
            if let Some(callback) = callback {
                callback();
            }
        }
    }

    /// Pops one recorded event off RX device `device_no`'s input queue,
    /// for a song worker to redistribute into a track.
    pub fn dequeue_recorded(&self, device_no: u8) -> Option<EventId> {
        self.with_rec(device_no, |dev| dev.dequeue_recorded()).flatten()
    }

    /// Hands a song-sourced event to TX device `device_no`'s output
    /// queue, or releases it back to the pool if that device isn't
    /// armed.
    pub fn enqueue_playback(&self, device_no: u8, id: EventId) {
        match self.with_play(device_no, |dev| dev.enqueue_for_playback(&self.pool, id)) {
            Some(()) => {}
            None => self.pool.release_chain(Some(id)),
        }
    }

    /// Runs one record-side poll over every RX device.
    pub fn record_tick(&self) {
        let guard = self.state.lock();
        let mut state = guard.borrow_mut();
        let curr = state.curr_position;
        for dev in &mut state.rec {
            dev.record_poll(&self.pool, curr);
        }
    }

    /// Runs one playback-side poll over every TX device.
    pub fn play_tick(&self) {
        let guard = self.state.lock();
        let mut state = guard.borrow_mut();
        let curr = state.curr_position;
        for dev in &mut state.play {
            dev.play_poll(&self.pool, curr);
        }
    }

    /// Refreshes any device flagged `needs_reopen`, closing the stale
    /// backend handle and opening the currently configured one.
    pub fn refresh_files(&self) {
        let guard = self.state.lock();
        let mut state = guard.borrow_mut();
        for dev in &mut state.rec {
            dev.refresh(true);
        }
        for dev in &mut state.play {
            dev.refresh(false);
        }
    }

    /// Snapshots every device's current backend selection.
    pub fn config_export(&self) -> Config {
        let guard = self.state.lock();
        let state = guard.borrow();
        let mut cfg = Config::disabled(NUM_DEVICES);
        for (i, entry) in cfg.devices.iter_mut().enumerate() {
            entry.record_path = state.rec[i].fname().to_string();
            entry.record_backend = state.rec[i].backend_kind();
            entry.play_path = state.play[i].fname().to_string();
            entry.play_backend = state.play[i].backend_kind();
        }
        cfg
    }

    /// Applies a snapshot, marking only the devices whose configuration
    /// actually changed for reopen.
    pub fn config_import(&self, cfg: &Config) {
        let guard = self.state.lock();
        let mut state = guard.borrow_mut();
        for (i, entry) in cfg.devices.iter().enumerate() {
            if i >= state.rec.len() {
                break;
            }
            state.rec[i].import_config(entry.record_backend, &entry.record_path);
            state.play[i].import_config(entry.play_backend, &entry.play_path);
        }
    }
}

impl Default for Root {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_with_empty_flags_is_a_noop() {
        let root = Root::new();
        assert!(root.start(0, 0, StartFlags::empty()).is_ok());
    }

    #[test]
    fn start_rejects_non_increasing_window() {
        let root = Root::new();
        assert_eq!(root.start(100, 50, StartFlags::BOTH), Err(EngineError::InvalidTimeWindow));
    }

    #[test]
    fn start_arms_requested_direction_only() {
        let root = Root::new();
        assert!(root.start(0, 1000, StartFlags::PLAY).is_ok());
    }

    #[test]
    fn config_export_then_import_is_identity() {
        let root = Root::new();
        let cfg = root.config_export();
        root.config_import(&cfg);
        assert_eq!(root.config_export(), cfg);
    }

    #[test]
    fn fresh_timer_is_not_due_immediately() {
        let root = Root::new();
        root.set_timer(50, || {});
        assert_eq!(root.next_due_timer(), None);
    }

    #[test]
    fn enqueue_playback_releases_event_when_device_disarmed() {
        let root = Root::new();
        let id = root.pool().allocate();
        root.enqueue_playback(0, id);
        assert_eq!(root.pool().free_len(), 1);
    }

    #[test]
    fn dequeue_recorded_is_none_on_a_disarmed_device() {
        let root = Root::new();
        assert_eq!(root.dequeue_recorded(0), None);
    }

    #[test]
    fn fire_due_timers_invokes_callback_and_stops_when_dry() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        let root = Root::new();
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = count.clone();
        root.set_timer(1, move || {
            count_clone.fetch_add(1, Ordering::SeqCst);
        });
        root.fire_due_timers();
        assert_eq!(count.load(Ordering::SeqCst), 0, "fresh timer shouldn't fire before its interval");
    }
}
