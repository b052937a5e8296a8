//! A named sequence of events plus cached range metadata.
//!
//! Key range, note durations, and meta-derived name/instrument text are
//! all recomputed in one forward pass over the queue whenever the caller
//! asks for it; there is no incremental maintenance.

use crate::event::{Event, EventId, What};
use crate::pool::EventPool;
use crate::queue::EventQueue;

/// How many keys map to one "band" in the editor's piano-roll view.
const BAND_SIZE: u8 = 24;

fn key_to_band(key: u8) -> u8 {
    key.saturating_add(12) / BAND_SIZE
}

/// A named [`EventQueue`] plus cached analysis results. Cached fields are
/// stale until [`Track::compute_max_min`] is called; nothing here updates
/// them incrementally as events are inserted or removed.
pub struct Track {
    pub queue: EventQueue,
    pub position_max: u32,
    pub key_min: u8,
    pub key_max: u8,
    pub band_min: u8,
    pub band_max: u8,
    pub name: String,
    pub instrument: String,
    pub mute: bool,
}

impl Track {
    pub fn new(maxlen: i32) -> Self {
        Track {
            queue: EventQueue::new(maxlen),
            position_max: 0,
            key_min: 0x3C,
            key_max: 0x3C,
            band_min: key_to_band(0x3C),
            band_max: key_to_band(0x3C + BAND_SIZE),
            name: String::new(),
            instrument: String::new(),
            mute: false,
        }
    }

    /// Drains and releases every event.
    pub fn free(&mut self, pool: &EventPool) {
        self.queue.drain(pool);
    }

    /// Concatenates a meta event's payload bytes across its fragment
    /// chain, skipping the 2-byte `0xFF`/meta-number header.
    fn meta_text(pool: &EventPool, head: EventId) -> String {
        let mut bytes = Vec::new();
        let mut cursor = Some(head);
        while let Some(id) = cursor {
            let event = pool.get(id);
            let len = event.get_length_first() as usize;
            bytes.extend_from_slice(&event.cmd[1..1 + len.min(7)]);
            cursor = event.next_fragment;
        }
        if bytes.len() <= 2 {
            return String::new();
        }
        String::from_utf8_lossy(&bytes[2..]).into_owned()
    }

    /// Recomputes `key_min`/`key_max`/`band_min`/`band_max`, `name`,
    /// `instrument`, `position_max`, and every key-press event's
    /// `duration`, in one forward pass. Falls back to `0x3C..0x3C` when
    /// the track carries no key events.
    pub fn compute_max_min(&mut self, pool: &EventPool) {
        let mut last_key_press: [Option<EventId>; 128] = [None; 128];
        self.key_max = 0x00;
        self.key_min = 0xFF;
        self.position_max = 0;

        for id in self.queue.iter() {
            let event = pool.get(id);
            let what = event.get_what();

            if what.contains(What::KEY) {
                let is_on = event.is_key_start();
                let is_off = event.is_key_end();
                let key = event.get_key() & 0x7F;

                if is_on || is_off {
                    if let Some(last_id) = last_key_press[key as usize].take() {
                        let start_position = pool.get(last_id).position;
                        pool.with_mut(last_id, |e| e.duration = event.position - start_position);
                    }
                    if is_on {
                        last_key_press[key as usize] = Some(id);
                    }
                }
                if key > self.key_max {
                    self.key_max = key;
                }
                if key < self.key_min {
                    self.key_min = key;
                }
            }

            if event.is_meta() {
                match event.get_meta_number() {
                    0x03 => self.name = Self::meta_text(pool, id),
                    0x04 => self.instrument = Self::meta_text(pool, id),
                    _ => {}
                }
            }
        }

        if self.key_max == 0x00 && self.key_min == 0xFF {
            self.key_max = 0x3C;
            self.key_min = 0x3C;
        }
        self.band_min = key_to_band(self.key_min);
        self.band_max = key_to_band(self.key_max + BAND_SIZE);

        if let Some(tail) = self.queue.peek_tail() {
            let tail_position = pool.get(tail).position;
            self.position_max = tail_position;
            for pending in last_key_press.iter().flatten() {
                let start_position = pool.get(*pending).position;
                pool.with_mut(*pending, |e| e.duration = tail_position - start_position);
            }
        }
    }
}
