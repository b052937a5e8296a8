//! The three cooperating background workers that drive a [`Root`] in
//! real time.
//!
//! Each worker is a thread paired with a cooperative `AtomicBool` flag:
//! stopping sets the flag and joins the thread, so the worker notices on
//! its next wakeup instead of being interrupted mid-iteration.

use crate::root::Root;
use log::trace;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Target free-list refill interval.
const ALLOC_INTERVAL: Duration = Duration::from_millis(100);
/// Play/rec tick interval.
const PLAY_REC_INTERVAL: Duration = Duration::from_millis(1);
/// File-refresh poll interval. Kept as a distinct constant from
/// [`ALLOC_INTERVAL`] even though both currently run at 100ms, since the
/// two workers are separate threads that may want to diverge later.
const FILES_INTERVAL: Duration = Duration::from_millis(100);

/// Owns the three worker threads backing one [`Root`]. Dropping a
/// `Scheduler` stops all three workers and joins them.
pub struct Scheduler {
    stop: Arc<AtomicBool>,
    alloc: Option<JoinHandle<()>>,
    play_rec: Option<JoinHandle<()>>,
    files: Option<JoinHandle<()>>,
}

impl Scheduler {
    /// Spawns all three workers against `root`.
    pub fn start(root: Arc<Root>) -> Self {
        let stop = Arc::new(AtomicBool::new(false));

        let alloc = {
            let root = root.clone();
            let stop = stop.clone();
            thread::Builder::new()
                .name("umidi-alloc".into())
                .spawn(move || alloc_worker(root, stop))
                .expect("failed to spawn allocator worker")
        };

        let play_rec = {
            let root = root.clone();
            let stop = stop.clone();
            thread::Builder::new()
                .name("umidi-play-rec".into())
                .spawn(move || play_rec_worker(root, stop))
                .expect("failed to spawn play/rec worker")
        };

        let files = {
            let stop = stop.clone();
            thread::Builder::new()
                .name("umidi-files".into())
                .spawn(move || files_worker(root, stop))
                .expect("failed to spawn file-refresh worker")
        };

        Scheduler { stop, alloc: Some(alloc), play_rec: Some(play_rec), files: Some(files) }
    }

    /// Signals every worker to stop and joins them. No unlock dance is
    /// needed first since none of these workers hold the root lock
    /// across their sleep.
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        for handle in [self.alloc.take(), self.play_rec.take(), self.files.take()].into_iter().flatten() {
            let _ = handle.join();
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

fn alloc_worker(root: Arc<Root>, stop: Arc<AtomicBool>) {
    while !stop.load(Ordering::Relaxed) {
        root.pool().refill();
        thread::sleep(ALLOC_INTERVAL);
    }
}

fn play_rec_worker(root: Arc<Root>, stop: Arc<AtomicBool>) {
    while !stop.load(Ordering::Relaxed) {
        root.sample_clock();
        trace!("play/rec tick at position {}", root.curr_position());

        root.record_tick();
        root.fire_due_timers();
        root.play_tick();

        thread::sleep(PLAY_REC_INTERVAL);
    }
}

fn files_worker(root: Arc<Root>, stop: Arc<AtomicBool>) {
    while !stop.load(Ordering::Relaxed) {
        root.refresh_files();
        thread::sleep(FILES_INTERVAL);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn scheduler_starts_and_stops_cleanly() {
        let root = Arc::new(Root::new());
        let mut scheduler = Scheduler::start(root.clone());
        thread::sleep(Duration::from_millis(20));
        scheduler.stop();
    }

    #[test]
    fn pool_is_refilled_by_the_allocator_worker() {
        let root = Arc::new(Root::new());
        let mut scheduler = Scheduler::start(root.clone());
        thread::sleep(Duration::from_millis(150));
        scheduler.stop();
        assert!(root.pool().free_len() > 0);
    }
}
