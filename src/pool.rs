//! Arena-backed event storage with a background-refilled free list.
//!
//! A free queue of pre-allocated cells is topped up by a dedicated
//! thread so that the record/playback hot path never calls the system
//! allocator. Cells live in a `Vec<Event>` arena addressed by `EventId`;
//! "freeing" pushes the index onto a free list instead of deallocating.

use crate::event::Event;
use parking_lot::Mutex;

/// Background refill keeps the free list at this many cells.
pub const REFILL_TARGET: usize = 1024;

struct Inner {
    arena: Vec<Event>,
    free: Vec<usize>,
}

/// Arena of [`Event`] cells addressed by stable index. Cheap to clone
/// (shares the underlying storage); safe to call from any thread.
pub struct EventPool {
    inner: Mutex<Inner>,
}

impl EventPool {
    pub fn new() -> Self {
        EventPool { inner: Mutex::new(Inner { arena: Vec::new(), free: Vec::new() }) }
    }

    /// Takes a cell off the free list, if any. Returns `None` when the
    /// free list is empty, in which case the caller should fall back to
    /// [`EventPool::allocate`] outside of any lock it's holding.
    pub fn acquire(&self) -> Option<usize> {
        let mut inner = self.inner.lock();
        inner.free.pop()
    }

    /// Grows the arena by one cell and returns its index. Never fails in
    /// this in-process implementation; kept as a distinct call from
    /// [`EventPool::acquire`] so callers can try the free list first and
    /// only pay for growth when it's actually empty.
    pub fn allocate(&self) -> usize {
        let mut inner = self.inner.lock();
        inner.arena.push(Event::new());
        inner.arena.len() - 1
    }

    /// Returns a cell to the free list for reuse. Does not shrink the
    /// arena.
    pub fn release(&self, id: usize) {
        let mut inner = self.inner.lock();
        inner.arena[id] = Event::new();
        inner.free.push(id);
    }

    pub fn get(&self, id: usize) -> Event {
        self.inner.lock().arena[id]
    }

    pub fn set(&self, id: usize, event: Event) {
        self.inner.lock().arena[id] = event;
    }

    pub fn with_mut<R>(&self, id: usize, f: impl FnOnce(&mut Event) -> R) -> R {
        let mut inner = self.inner.lock();
        f(&mut inner.arena[id])
    }

    pub fn free_len(&self) -> usize {
        self.inner.lock().free.len()
    }

    /// Deep-copies an event's fragment chain into fresh cells. The
    /// copy's `duration` is always reset to 0; it is never carried
    /// across from the source.
    pub fn copy_chain(&self, head: Option<usize>) -> Option<usize> {
        let mut result_head = None;
        let mut tail: Option<usize> = None;
        let mut cursor = head;
        while let Some(id) = cursor {
            let src = self.get(id);
            let new_id = self.acquire().unwrap_or_else(|| self.allocate());
            self.set(new_id, Event { next_fragment: None, duration: 0, ..src });
            match tail {
                Some(t) => self.with_mut(t, |e| e.next_fragment = Some(new_id)),
                None => result_head = Some(new_id),
            }
            tail = Some(new_id);
            cursor = src.next_fragment;
        }
        result_head
    }

    /// Releases an entire fragment chain (`head` plus every cell reached
    /// via `next_fragment`) back to the free list.
    pub fn release_chain(&self, mut head: Option<usize>) {
        while let Some(id) = head {
            head = self.get(id).next_fragment;
            self.release(id);
        }
    }

    /// Tops up the free list to [`REFILL_TARGET`] by allocating fresh
    /// cells. Run periodically by the allocator worker thread
    /// (`scheduler::Scheduler`)'s 100ms polling loop.
    pub fn refill(&self) {
        loop {
            let need = {
                let inner = self.inner.lock();
                inner.free.len() < REFILL_TARGET
            };
            if !need {
                break;
            }
            let id = self.allocate();
            self.inner.lock().free.push(id);
        }
    }
}

impl Default for EventPool {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_on_empty_pool_returns_none() {
        let pool = EventPool::new();
        assert_eq!(pool.acquire(), None);
    }

    #[test]
    fn allocate_then_release_then_acquire_roundtrips() {
        let pool = EventPool::new();
        let id = pool.allocate();
        pool.release(id);
        assert_eq!(pool.acquire(), Some(id));
    }

    #[test]
    fn refill_reaches_target() {
        let pool = EventPool::new();
        pool.refill();
        assert_eq!(pool.free_len(), REFILL_TARGET);
    }

    #[test]
    fn refill_does_not_exceed_target_on_repeated_calls() {
        let pool = EventPool::new();
        pool.refill();
        pool.refill();
        assert_eq!(pool.free_len(), REFILL_TARGET);
    }

    #[test]
    fn copy_chain_duplicates_every_fragment() {
        let pool = EventPool::new();
        let a = pool.allocate();
        let b = pool.allocate();
        pool.with_mut(a, |e| {
            e.cmd[1] = 0xF0;
            e.position = 10;
            e.next_fragment = Some(b);
        });
        pool.with_mut(b, |e| e.cmd[1] = 0x01);

        let copy_head = pool.copy_chain(Some(a)).unwrap();
        assert_ne!(copy_head, a);
        let copy = pool.get(copy_head);
        assert_eq!(copy.cmd[1], 0xF0);
        assert_eq!(copy.position, 10);
        let copy_tail = copy.next_fragment.unwrap();
        assert_ne!(copy_tail, b);
        assert_eq!(pool.get(copy_tail).cmd[1], 0x01);
    }

    #[test]
    fn released_cell_is_reset() {
        let pool = EventPool::new();
        let id = pool.allocate();
        pool.with_mut(id, |e| e.cmd[0] = 6);
        pool.release(id);
        let reacquired = pool.acquire().unwrap();
        assert_eq!(pool.get(reacquired).cmd[0], 0);
    }
}
