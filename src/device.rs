//! A single record or playback endpoint: a queue, a parser, a backend
//! handle, and the scheduling window that bounds it.

use crate::backend::{Backend, BackendKind};
use crate::errors::EngineError;
use crate::event::{Event, EventId};
use crate::parser::Converter;
use crate::pool::EventPool;
use crate::queue::{CacheSlot, EventQueue};
use log::warn;

/// A direction-agnostic interception hook: observes (and may mutate)
/// the event, returning `true` to drop it instead of queuing/sending.
pub type EventCallback = Box<dyn FnMut(&mut Event) -> bool + Send>;

/// Maximum bytes read from a backend per record poll.
const RECORD_CHUNK: usize = 16;

pub struct Device {
    pub device_no: u8,
    queue: EventQueue,
    conv: Converter,
    backend: Option<Box<dyn Backend>>,
    backend_kind: BackendKind,
    fname: String,
    start_position: u32,
    end_offset: u32,
    enabled_usr: bool,
    enabled_cfg: bool,
    needs_reopen: bool,
    any_key_start: bool,
    callback: Option<EventCallback>,
}

impl Device {
    pub fn new(device_no: u8) -> Self {
        Device {
            device_no,
            queue: EventQueue::new(i32::MAX),
            conv: Converter::new(),
            backend: None,
            backend_kind: BackendKind::Disabled,
            fname: String::new(),
            start_position: 0,
            end_offset: 0,
            enabled_usr: false,
            enabled_cfg: false,
            needs_reopen: false,
            any_key_start: false,
            callback: None,
        }
    }

    pub fn set_callback(&mut self, callback: EventCallback) {
        self.callback = Some(callback);
    }

    pub fn clear_callback(&mut self) {
        self.callback = None;
    }

    /// Selects which backend and pathname this device should use; takes
    /// effect on the next file-refresh pass.
    pub fn configure(&mut self, kind: BackendKind, fname: impl Into<String>) {
        self.backend_kind = kind;
        self.fname = fname.into();
        self.enabled_cfg = true;
        self.needs_reopen = true;
    }

    pub fn disable_cfg(&mut self) {
        self.enabled_cfg = false;
        self.needs_reopen = true;
    }

    pub fn needs_reopen(&self) -> bool {
        self.needs_reopen
    }

    pub fn fname(&self) -> &str {
        &self.fname
    }

    pub fn backend_kind(&self) -> BackendKind {
        if self.enabled_cfg {
            self.backend_kind
        } else {
            BackendKind::Disabled
        }
    }

    /// Applies a config snapshot, marking `needs_reopen` only when the
    /// backend kind or pathname actually changed.
    pub fn import_config(&mut self, kind: BackendKind, fname: &str) {
        let enabled = !matches!(kind, BackendKind::Disabled);
        if self.backend_kind() != kind || self.fname != fname {
            self.backend_kind = kind;
            self.fname = fname.to_string();
            self.enabled_cfg = enabled;
            self.needs_reopen = true;
        }
    }

    /// Arms the device for a playback/record window starting at
    /// `start_position`, active until `start_position + end_offset`.
    pub fn start(&mut self, start_position: u32, end_offset: u32) {
        self.start_position = start_position;
        self.end_offset = end_offset;
        self.enabled_usr = true;
    }

    /// Disarms the device: resets the parser, drains the queue, and (for
    /// playback devices with an open handle) sends all-notes-off on
    /// every channel if any note-on ever went out.
    pub fn stop(&mut self, pool: &EventPool, is_play: bool) {
        self.enabled_usr = false;
        self.conv.reset(pool);
        self.queue.drain(pool);

        if !is_play || !self.any_key_start {
            return;
        }
        self.any_key_start = false;

        let Some(backend) = self.backend.as_mut() else { return };
        for channel in 0..16u8 {
            let _ = backend.write(&[0xB0 | channel, 0x78, 0]);
        }
        for channel in 0..16u8 {
            let _ = backend.write(&[0xB0 | channel, 0x40, 0]);
        }
    }

    /// Runs the file-refresh worker's per-device step: closes a stale
    /// handle and opens the currently-configured one.
    pub fn refresh(&mut self, is_rx: bool) {
        if !self.needs_reopen {
            return;
        }
        self.needs_reopen = false;

        if let Some(mut backend) = self.backend.take() {
            if is_rx {
                backend.rx_close();
            } else {
                backend.tx_close();
            }
        }

        if !self.enabled_cfg {
            return;
        }

        let mut backend = self.backend_kind.open();
        let opened = if is_rx { backend.rx_open(&self.fname) } else { backend.tx_open(&self.fname) };
        match opened {
            Ok(()) => self.backend = Some(backend),
            Err(err) => {
                warn!("device {}: failed to open backend: {err}", self.device_no);
                self.enabled_cfg = false;
            }
        }
    }

    /// Record-side poll: reads whatever bytes are available, parses
    /// them, and inserts completed events into the input queue (or
    /// drops them per the callback). `curr_position` is the scheduler's
    /// current monotonic position.
    pub fn record_poll(&mut self, pool: &EventPool, curr_position: u32) {
        let relative = curr_position.wrapping_sub(self.start_position);
        if relative >= self.end_offset {
            self.enabled_usr = false;
        }

        let Some(backend) = self.backend.as_mut() else { return };
        let mut buf = [0u8; RECORD_CHUNK];
        let n = match backend.read(&mut buf) {
            Ok(n) => n,
            Err(_) => {
                self.needs_reopen = true;
                return;
            }
        };
        if n == 0 || !self.enabled_usr {
            return;
        }

        for &byte in &buf[..n] {
            let Some(id) = self.conv.feed(pool, byte) else { continue };
            pool.with_mut(id, |e| {
                e.device_no = self.device_no;
                e.position = relative;
            });

            let dropped = match self.callback.as_mut() {
                Some(cb) => pool.with_mut(id, |e| cb(e)),
                None => false,
            };
            if dropped {
                pool.release_chain(Some(id));
            } else {
                self.queue.insert(pool, id, CacheSlot::Input);
            }
        }
    }

    /// Playback-side poll: drains due events from the output queue head,
    /// writing non-meta payloads to the backend in position order.
    /// Stops at the first `WouldBlock` so the remaining events stay
    /// queued for the next tick.
    pub fn play_poll(&mut self, pool: &EventPool, curr_position: u32) {
        let relative = curr_position.wrapping_sub(self.start_position);
        if relative >= self.end_offset {
            self.enabled_usr = false;
            return;
        }

        loop {
            let Some(head) = self.queue.peek_head() else { break };
            let due = pool.get(head).position.wrapping_sub(relative) >= 0x8000_0000;
            if !due {
                break;
            }

            let dropped = match self.callback.as_mut() {
                Some(cb) => pool.with_mut(head, |e| cb(e)),
                None => false,
            };

            let is_meta = pool.get(head).cmd[1] == 0xFF;
            if self.backend.is_some() && self.enabled_usr && !is_meta && !dropped {
                match self.write_chain(pool, head) {
                    WriteOutcome::Sent => {}
                    WriteOutcome::WouldBlock => break,
                    WriteOutcome::Fatal => {
                        self.needs_reopen = true;
                        break;
                    }
                }
            }

            self.queue.remove(head);
            pool.release_chain(Some(head));
        }
    }

    /// Pops one recorded event off this device's input queue for a song
    /// worker to redistribute, or `None` when disabled or empty.
    pub fn dequeue_recorded(&mut self) -> Option<EventId> {
        if !self.enabled_usr || !self.enabled_cfg {
            return None;
        }
        self.queue.dequeue_head()
    }

    /// Hands a song-sourced event to this device's output queue, or
    /// releases it if the device isn't armed to receive it.
    pub fn enqueue_for_playback(&mut self, pool: &EventPool, id: EventId) {
        if self.enabled_usr && self.enabled_cfg {
            self.queue.insert(pool, id, CacheSlot::Input);
        } else {
            pool.release_chain(Some(id));
        }
    }

    fn write_chain(&mut self, pool: &EventPool, head: EventId) -> WriteOutcome {
        let backend = self.backend.as_mut().expect("checked by caller");
        let mut cur = Some(head);
        while let Some(id) = cur {
            let event = pool.get(id);
            if event.is_key_start() {
                self.any_key_start = true;
            }
            let len = event.get_length_first() as usize;
            match backend.write(&event.cmd[1..1 + len]) {
                Ok(n) if n == len => cur = event.next_fragment,
                Ok(_) => return WriteOutcome::WouldBlock,
                Err(EngineError::BackendWouldBlock) => return WriteOutcome::WouldBlock,
                Err(_) => return WriteOutcome::Fatal,
            }
        }
        WriteOutcome::Sent
    }
}

enum WriteOutcome {
    Sent,
    WouldBlock,
    Fatal,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mock;

    #[test]
    fn record_then_play_round_trips_through_mock_backend() {
        mock::reset_channel("device-test-a");
        let pool = EventPool::new();
        let mut rx = Device::new(0);
        rx.configure(BackendKind::CharDev, "device-test-a");
        rx.refresh(true);
        rx.start(0, 1_000_000);

        let mut writer = BackendKind::CharDev.open();
        writer.tx_open("device-test-a").unwrap();
        writer.write(&[0x90, 60, 100]).unwrap();

        rx.record_poll(&pool, 0);
        let head = rx.queue.peek_head().expect("one event recorded");
        let e = pool.get(head);
        assert_eq!(e.cmd[1], 0x90);
        assert_eq!(e.cmd[2], 60);
        assert_eq!(e.cmd[3], 100);
    }

    #[test]
    fn play_poll_skips_future_events() {
        let pool = EventPool::new();
        let mut dev = Device::new(1);
        dev.start(0, 1_000_000);
        let id = pool.allocate();
        pool.set(id, Event { cmd: [1, 0x90, 60, 100, 0, 0, 0, 0], position: 500, ..Event::new() });
        dev.queue.insert(&pool, id, CacheSlot::Output);

        dev.play_poll(&pool, 10);
        assert_eq!(dev.queue.len(), 1, "event due at 500 shouldn't fire at position 10");
    }

    #[test]
    fn dequeue_recorded_is_none_when_disabled() {
        let pool = EventPool::new();
        let mut dev = Device::new(3);
        let id = pool.allocate();
        dev.queue.insert(&pool, id, CacheSlot::Input);
        assert_eq!(dev.dequeue_recorded(), None);
    }

    #[test]
    fn enqueue_for_playback_releases_event_when_not_armed() {
        let pool = EventPool::new();
        let mut dev = Device::new(4);
        let id = pool.allocate();
        dev.enqueue_for_playback(&pool, id);
        assert_eq!(dev.queue.len(), 0);
        assert_eq!(pool.free_len(), 1);
    }

    #[test]
    fn stop_drains_queue_and_resets_parser() {
        let pool = EventPool::new();
        let mut dev = Device::new(2);
        let id = pool.allocate();
        pool.set(id, Event::new());
        dev.queue.insert(&pool, id, CacheSlot::Other);
        dev.stop(&pool, false);
        assert_eq!(dev.queue.len(), 0);
    }
}
