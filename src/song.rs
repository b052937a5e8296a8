//! An ordered list of tracks sharing one tempo map and play window.
//!
//! `Song` owns a plain `Vec<Track>`: nothing about track order needs the
//! four independent search cursors `EventQueue` earns its keep with, so
//! the record track is tracked by index instead of a separate cursor.

use crate::errors::EngineError;
use crate::event::EventId;
use crate::pool::EventPool;
use crate::queue::CacheSlot;
use crate::root::{Root, StartFlags};
use crate::track::Track;

/// Beats per minute scaling factor used by PPQ position math.
const BPM: u32 = 60_000;

/// SMF division type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DivisionType {
    Ppq,
    Smpte24,
    Smpte25,
    Smpte30Drop,
    Smpte30,
}

impl DivisionType {
    fn divisor(self, tempo: u32, resolution: u16) -> u32 {
        let resolution = resolution as u32;
        match self {
            DivisionType::Ppq => tempo * resolution,
            DivisionType::Smpte24 => 24 * resolution,
            DivisionType::Smpte25 => 25 * resolution,
            DivisionType::Smpte30Drop => (29.97 * resolution as f64) as u32,
            DivisionType::Smpte30 => 30 * resolution,
        }
    }

    fn factor(self) -> u32 {
        match self {
            DivisionType::Ppq => BPM,
            _ => BPM / 60,
        }
    }
}

/// A song: an ordered list of tracks (the first is the conductor track,
/// carrying the tempo map), a tick/position division scheme, and
/// play/record window state. The background worker thread driving
/// playback/record lives separately in
/// [`crate::song_worker::SongWorker`].
pub struct Song {
    pub tracks: Vec<Track>,
    record_track: Option<usize>,
    pub file_format: u16,
    pub resolution: u16,
    pub division_type: DivisionType,
    pub play_start_position: u32,
    pub play_start_offset: u32,
    pub play_last_offset: u32,
    pub play_end_offset: u32,
    pub play_enabled: bool,
    pub rec_enabled: bool,
    armed: StartFlags,
}

impl Song {
    /// `resolution` is clamped away from 0 to avoid a division by zero
    /// in the tick/position math.
    pub fn new(file_format: u16, resolution: u16, division_type: DivisionType) -> Self {
        Song {
            tracks: Vec::new(),
            record_track: None,
            file_format,
            resolution: resolution.max(1),
            division_type,
            play_start_position: 0,
            play_start_offset: 0,
            play_last_offset: 0,
            play_end_offset: 0,
            play_enabled: false,
            rec_enabled: false,
            armed: StartFlags::empty(),
        }
    }

    pub fn add_track_last(&mut self, track: Track) {
        self.tracks.push(track);
    }

    pub fn add_track_before(&mut self, ref_index: usize, track: Track) {
        let at = ref_index.min(self.tracks.len());
        self.tracks.insert(at, track);
        self.shift_record_track_on_insert(at);
    }

    pub fn add_track_after(&mut self, ref_index: usize, track: Track) {
        let at = (ref_index + 1).min(self.tracks.len());
        self.tracks.insert(at, track);
        self.shift_record_track_on_insert(at);
    }

    fn shift_record_track_on_insert(&mut self, at: usize) {
        if let Some(rec) = self.record_track {
            if at <= rec {
                self.record_track = Some(rec + 1);
            }
        }
    }

    /// Drains and frees the track at `index`.
    pub fn remove_track(&mut self, index: usize, pool: &EventPool) {
        if index >= self.tracks.len() {
            return;
        }
        let mut track = self.tracks.remove(index);
        track.free(pool);
        self.record_track = match self.record_track {
            Some(rec) if rec == index => None,
            Some(rec) if rec > index => Some(rec - 1),
            other => other,
        };
    }

    /// Designates the track recording pulls into, or disables recording
    /// when `None`.
    pub fn set_record_track(&mut self, index: Option<usize>) {
        self.record_track = index.filter(|&i| i < self.tracks.len());
    }

    pub fn record_track(&self) -> Option<usize> {
        self.record_track
    }

    /// Arms playback and/or recording against `root`'s timeline. Always
    /// stops first, then validates the requested window before arming.
    pub fn start(
        &mut self,
        root: &Root,
        start_offset: u32,
        end_offset: u32,
        flags: StartFlags,
    ) -> Result<(), EngineError> {
        if flags.is_empty() {
            return Ok(());
        }
        self.stop(root, flags);

        root.start(start_offset, end_offset, flags)?;
        let curr_position = root.curr_position();

        if flags.contains(StartFlags::PLAY) {
            self.play_enabled = true;
            self.play_start_position = curr_position;
            self.play_start_offset = start_offset;
            self.play_last_offset = start_offset;
            self.play_end_offset = end_offset;
        }
        if flags.contains(StartFlags::RECORD) {
            self.rec_enabled = true;
        }
        self.armed |= flags;
        Ok(())
    }

    /// Disarms the requested directions, masking `flags` down to the
    /// directions actually armed before forwarding to the root.
    pub fn stop(&mut self, root: &Root, flags: StartFlags) {
        if flags.is_empty() {
            return;
        }
        let flags = flags & self.armed;
        if flags.contains(StartFlags::PLAY) {
            self.play_enabled = false;
        }
        if flags.contains(StartFlags::RECORD) {
            self.rec_enabled = false;
        }
        root.stop(flags);
        self.armed &= !flags;
    }

    /// Converts every track's tick timeline into millisecond positions.
    /// Requires every event's `position` field to already equal its
    /// `tick` (the loader's job), since tracks are walked in `position`
    /// order, which must coincide with tick order here or the delta-tick
    /// math runs backwards. First clones every tempo event from the
    /// conductor track (index 0) into every other track so each owns a
    /// complete tempo map, walks each track converting ticks to
    /// positions against that map, then strips tempo events back out of
    /// the non-conductor tracks.
    pub fn recompute_positions(&mut self, pool: &EventPool) {
        if self.tracks.is_empty() {
            return;
        }

        let conductor_tempos: Vec<EventId> =
            self.tracks[0].queue.iter().filter(|&id| pool.get(id).is_tempo()).collect();

        for track in self.tracks.iter_mut().skip(1) {
            for &tempo_id in &conductor_tempos {
                if let Some(new_id) = pool.copy_chain(Some(tempo_id)) {
                    track.queue.insert(pool, new_id, CacheSlot::Input);
                }
            }
        }

        for track in &mut self.tracks {
            let mut tempo = 120u32;
            let mut last_tick = 0u32;
            let mut position_curr = 0u32;
            let mut position_rem = 0u32;
            let mut divisor = self.division_type.divisor(tempo, self.resolution);
            let factor = self.division_type.factor();

            for id in track.queue.iter() {
                let mut event = pool.get(id);
                let delta_tick = event.tick.wrapping_sub(last_tick);
                last_tick = event.tick;

                position_curr = position_curr.wrapping_add((delta_tick / divisor) * factor);
                position_rem += (delta_tick % divisor) * factor;
                position_curr = position_curr.wrapping_add(position_rem / divisor);
                position_rem %= divisor;

                event.position = position_curr;

                if event.is_tempo() && self.division_type == DivisionType::Ppq {
                    tempo = event.get_tempo();
                    divisor = self.division_type.divisor(tempo, self.resolution);
                    position_rem = 0;
                }
                pool.set(id, event);
            }
        }

        for track in self.tracks.iter_mut().skip(1) {
            let tempo_ids: Vec<EventId> =
                track.queue.iter().filter(|&id| pool.get(id).is_tempo()).collect();
            for id in tempo_ids {
                track.queue.remove(id);
                pool.release(id);
            }
        }
    }

    /// Converts every track's millisecond positions back into a single
    /// shared PPQ tick timeline, dropping tempo events. The resulting
    /// division is always PPQ at resolution 500.
    pub fn recompute_ticks(&mut self, pool: &EventPool) {
        self.division_type = DivisionType::Ppq;
        self.resolution = 500;

        for track in &mut self.tracks {
            let ids: Vec<EventId> = track.queue.iter().collect();
            for id in ids {
                let mut event = pool.get(id);
                event.tick = event.position;
                if event.is_tempo() {
                    track.queue.remove(id);
                    pool.release(id);
                } else {
                    pool.set(id, event);
                }
            }
        }
    }

    /// Recomputes every track's cached ranges and aggregates them into a
    /// song-wide maximum position and band spread.
    pub fn compute_max_min(&mut self, pool: &EventPool) -> (u32, u32) {
        let mut position_max = 0;
        let mut band_max = 0u32;
        for track in &mut self.tracks {
            track.compute_max_min(pool);
            if track.position_max > position_max {
                position_max = track.position_max;
            }
            band_max += (track.band_max - track.band_min) as u32;
        }
        (position_max, band_max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Event;

    fn tempo_event(tick: u32, bpm: u32) -> Event {
        let mut e = Event::new();
        e.cmd[1] = 0xFF;
        e.cmd[2] = 0x51;
        e.set_tempo(bpm);
        e.tick = tick;
        e.position = tick;
        e
    }

    fn push(pool: &EventPool, track: &mut Track, event: Event) -> EventId {
        let id = pool.allocate();
        pool.set(id, event);
        track.queue.insert(pool, id, CacheSlot::Edit);
        id
    }

    #[test]
    fn add_and_remove_track_updates_record_track_index() {
        let pool = EventPool::new();
        let mut song = Song::new(1, 480, DivisionType::Ppq);
        song.add_track_last(Track::new(1024));
        song.add_track_last(Track::new(1024));
        song.set_record_track(Some(1));
        song.add_track_before(0, Track::new(1024));
        assert_eq!(song.record_track(), Some(2));
        song.remove_track(0, &pool);
        assert_eq!(song.record_track(), Some(1));
    }

    #[test]
    fn recompute_ticks_then_positions_is_consistent_at_default_tempo() {
        let pool = EventPool::new();
        let mut song = Song::new(1, 480, DivisionType::Ppq);
        let mut conductor = Track::new(1024);
        push(&pool, &mut conductor, tempo_event(0, 120));
        song.add_track_last(conductor);

        let mut melody = Track::new(1024);
        let note = push(&pool, &mut melody, {
            let mut e = Event::new();
            e.cmd[0] = crate::event::COMMAND_TO_LEN[0x9];
            e.cmd[1] = 0x90;
            e.cmd[2] = 60;
            e.cmd[3] = 100;
            e.tick = 480;
            e.position = 480;
            e
        });
        song.add_track_last(melody);

        song.recompute_positions(&pool);
        assert_eq!(pool.get(note).position, 500);
    }

    #[test]
    fn recompute_ticks_strips_tempo_events() {
        let pool = EventPool::new();
        let mut song = Song::new(1, 480, DivisionType::Ppq);
        let mut conductor = Track::new(1024);
        push(&pool, &mut conductor, {
            let mut e = tempo_event(0, 120);
            e.position = 0;
            e
        });
        song.add_track_last(conductor);
        song.recompute_ticks(&pool);
        assert!(song.tracks[0].queue.peek_head().is_none());
    }
}
