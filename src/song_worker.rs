//! Per-song background worker: pulls recorded events into the record
//! track and pushes due playback events out to their devices.
//!
//! Runs under the song's own mutex every 250ms for as long as the song
//! exists, using the same loop/cancellation shape `scheduler::Scheduler`
//! uses for the root's own workers rather than introducing a second
//! thread-management idiom.

use crate::queue::{CacheSlot, EventQueue};
use crate::root::{Root, NUM_DEVICES};
use crate::song::Song;
use log::trace;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// How far playback reads ahead of the transport clock before sending.
const PREFETCH_MS: u32 = 1500;

/// Tick interval between worker passes.
const TICK_INTERVAL: Duration = Duration::from_millis(250);

/// Runs one song's record-pull / playback-push pass against `root`.
pub fn tick(song: &Mutex<Song>, root: &Root) {
    let mut song = song.lock();

    if song.rec_enabled {
        if let Some(track_index) = song.record_track() {
            for device_no in 0..NUM_DEVICES as u8 {
                while let Some(id) = root.dequeue_recorded(device_no) {
                    song.tracks[track_index as usize].queue.insert(root.pool(), id, CacheSlot::Input);
                }
            }
        }
    }

    if song.play_enabled {
        let curr_position = root.curr_position();
        let mut position = curr_position.wrapping_sub(song.play_start_position);
        position = position.wrapping_add(song.play_start_offset).wrapping_add(PREFETCH_MS);

        if position >= song.play_end_offset {
            song.play_enabled = false;
            position = song.play_end_offset;
        }

        let play_last_offset = song.play_last_offset;
        let mut scratch = EventQueue::new(i32::MAX);
        for track in song.tracks.iter_mut() {
            if !track.mute {
                track.queue.copy_range(
                    &mut scratch,
                    root.pool(),
                    play_last_offset,
                    position,
                    0,
                    u16::MAX,
                    CacheSlot::Output,
                );
            }
        }
        song.play_last_offset = position;

        while let Some(id) = scratch.dequeue_head() {
            let device_no = root.pool().get(id).device_no;
            root.enqueue_playback(device_no, id);
        }
    }
}

/// Owns the background thread driving one song's [`tick`] loop. Dropping
/// it stops and joins the thread.
pub struct SongWorker {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl SongWorker {
    pub fn start(song: Arc<Mutex<Song>>, root: Arc<Root>) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let handle = {
            let stop = stop.clone();
            thread::Builder::new()
                .name("umidi-song".into())
                .spawn(move || {
                    while !stop.load(Ordering::Relaxed) {
                        tick(&song, &root);
                        trace!("song worker tick complete");
                        thread::sleep(TICK_INTERVAL);
                    }
                })
                .expect("failed to spawn song worker")
        };
        SongWorker { stop, handle: Some(handle) }
    }

    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for SongWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::song::DivisionType;
    use crate::track::Track;

    #[test]
    fn tick_is_a_noop_when_song_is_idle() {
        let root = Root::new();
        let song = Mutex::new(Song::new(1, 480, DivisionType::Ppq));
        tick(&song, &root);
        assert_eq!(song.lock().tracks.len(), 0);
    }

    #[test]
    fn recording_pulls_device_events_into_the_record_track() {
        use crate::backend::{mock, BackendKind};

        mock::reset_channel("song-worker-test");
        let root = Root::new();
        let mut cfg = root.config_export();
        cfg.devices[0].record_backend = BackendKind::CharDev;
        cfg.devices[0].record_path = "song-worker-test".to_string();
        root.config_import(&cfg);
        root.refresh_files();
        root.start(0, 1_000_000, crate::root::StartFlags::RECORD).unwrap();

        let mut writer = BackendKind::CharDev.open();
        writer.tx_open("song-worker-test").unwrap();
        writer.write(&[0x90, 60, 100]).unwrap();

        root.record_tick();

        let mut song = Song::new(1, 480, DivisionType::Ppq);
        song.add_track_last(Track::new(1024));
        song.set_record_track(Some(0));
        song.rec_enabled = true;
        let song = Mutex::new(song);

        tick(&song, &root);

        let song = song.lock();
        let id = song.tracks[0].queue.peek_head().expect("recorded note landed in the track");
        let e = root.pool().get(id);
        assert_eq!(e.cmd[1], 0x90);
        assert_eq!(e.cmd[2], 60);
    }

    #[test]
    fn song_worker_starts_and_stops_cleanly() {
        let root = Arc::new(Root::new());
        let song = Arc::new(Mutex::new(Song::new(1, 480, DivisionType::Ppq)));
        let mut worker = SongWorker::start(song, root);
        thread::sleep(Duration::from_millis(20));
        worker.stop();
    }
}
