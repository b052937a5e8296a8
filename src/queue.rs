//! Ordered, position-sorted event queue with four independent search
//! cursors.
//!
//! Events could be linked in place via prev/next pointers embedded in
//! each cell, but the queue instead owns its own link table keyed by
//! [`EventId`], since an event can be a member of at most one queue at a
//! time (the pool cell itself carries only the fragment-chain link).

use crate::event::EventId;
use crate::pool::EventPool;
use std::collections::HashMap;

/// Which of the four independent search cursors to use. Each subsystem
/// (input routing, output routing, the editor, everything else) walks
/// the queue at its own monotonic position, so each gets a cursor that
/// isn't invalidated by the others' scans.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSlot {
    Input = 0,
    Output = 1,
    Edit = 2,
    Other = 3,
}

const CACHE_MAX: usize = 4;

#[derive(Debug, Clone, Copy, Default)]
struct Link {
    prev: Option<EventId>,
    next: Option<EventId>,
}

/// A doubly-linked, position-ordered queue of event chain heads.
pub struct EventQueue {
    head: Option<EventId>,
    tail: Option<EventId>,
    cache: [Option<EventId>; CACHE_MAX],
    links: HashMap<EventId, Link>,
    len: i32,
    maxlen: i32,
}

impl EventQueue {
    pub fn new(maxlen: i32) -> Self {
        EventQueue {
            head: None,
            tail: None,
            cache: [None; CACHE_MAX],
            links: HashMap::new(),
            len: 0,
            maxlen,
        }
    }

    pub fn len(&self) -> i32 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.len >= self.maxlen
    }

    pub fn peek_head(&self) -> Option<EventId> {
        self.head
    }

    pub fn peek_tail(&self) -> Option<EventId> {
        self.tail
    }

    /// The event linked after `id`, or `None` at the tail. `id` must
    /// currently be a member of this queue.
    pub fn next_of(&self, id: EventId) -> Option<EventId> {
        self.link(id).next
    }

    /// Walks the queue head-to-tail in position order, matching
    /// `UMIDI20_QUEUE_FOREACH`.
    pub fn iter(&self) -> impl Iterator<Item = EventId> + '_ {
        std::iter::successors(self.head, move |&id| self.next_of(id))
    }

    fn link(&self, id: EventId) -> Link {
        self.links.get(&id).copied().unwrap_or_default()
    }

    fn check_cache(&mut self, id: EventId) {
        let link = self.link(id);
        for slot in self.cache.iter_mut() {
            if *slot == Some(id) {
                *slot = link.next.or(link.prev);
            }
        }
    }

    /// Unlinks `id` from the queue. `id` must currently be a member.
    pub fn remove(&mut self, id: EventId) {
        self.check_cache(id);
        let link = self.links.remove(&id).unwrap_or_default();
        match link.next {
            Some(next) => self.links.get_mut(&next).unwrap().prev = link.prev,
            None => self.tail = link.prev,
        }
        match link.prev {
            Some(prev) => self.links.get_mut(&prev).unwrap().next = link.next,
            None => self.head = link.next,
        }
        self.len -= 1;
    }

    /// Pops the head of the queue.
    pub fn dequeue_head(&mut self) -> Option<EventId> {
        let id = self.head?;
        self.remove(id);
        Some(id)
    }

    pub fn enqueue_last(&mut self, id: EventId) {
        let prev = self.tail;
        self.links.insert(id, Link { prev, next: None });
        match prev {
            Some(prev) => self.links.get_mut(&prev).unwrap().next = Some(id),
            None => self.head = Some(id),
        }
        self.tail = Some(id);
        self.len += 1;
    }

    pub fn enqueue_first(&mut self, id: EventId) {
        let next = self.head;
        self.links.insert(id, Link { prev: None, next });
        match next {
            Some(next) => self.links.get_mut(&next).unwrap().prev = Some(id),
            None => self.tail = Some(id),
        }
        self.head = Some(id);
        self.len += 1;
    }

    pub fn enqueue_before(&mut self, before: EventId, id: EventId) {
        let prev = self.link(before).prev;
        self.links.insert(id, Link { prev, next: Some(before) });
        if Some(before) == self.head {
            self.head = Some(id);
        } else if let Some(prev) = prev {
            self.links.get_mut(&prev).unwrap().next = Some(id);
        }
        self.links.get_mut(&before).unwrap().prev = Some(id);
        self.len += 1;
    }

    pub fn enqueue_after(&mut self, after: EventId, id: EventId) {
        let next = self.link(after).next;
        self.links.insert(id, Link { prev: Some(after), next });
        if Some(after) == self.tail {
            self.tail = Some(id);
        } else if let Some(next) = next {
            self.links.get_mut(&next).unwrap().prev = Some(id);
        }
        self.links.get_mut(&after).unwrap().next = Some(id);
        self.len += 1;
    }

    /// Finds the first event at or after `position`, walking from the
    /// cached cursor rather than the head when possible. Updates the
    /// cursor as a side effect. Returns `None` (and still updates the
    /// cursor to the tail) when every event precedes `position`.
    pub fn search(&mut self, pool: &EventPool, position: u32, slot: CacheSlot) -> Option<EventId> {
        let idx = slot as usize;
        let mut event = self.cache[idx].or(self.head)?;

        loop {
            if pool.get(event).position < position {
                break;
            }
            match self.link(event).prev {
                Some(prev) => event = prev,
                None => break,
            }
        }

        loop {
            if pool.get(event).position >= position {
                self.cache[idx] = Some(event);
                return Some(event);
            }
            match self.link(event).next {
                Some(next) => event = next,
                None => {
                    self.cache[idx] = Some(event);
                    return None;
                }
            }
        }
    }

    /// Inserts `id` in position order, just before the first existing
    /// event whose position exceeds `id`'s.
    pub fn insert(&mut self, pool: &EventPool, id: EventId, slot: CacheSlot) {
        let position = pool.get(id).position;
        match self.search(pool, position + 1, slot) {
            Some(before) => self.enqueue_before(before, id),
            None => self.enqueue_last(id),
        }
    }

    /// Copies every event in `[pos_a, pos_b)` with `revision` in
    /// `[rev_a, rev_b)` into `dst`, leaving `self` untouched.
    pub fn copy_range(
        &mut self,
        dst: &mut EventQueue,
        pool: &EventPool,
        pos_a: u32,
        pos_b: u32,
        rev_a: u16,
        rev_b: u16,
        slot: CacheSlot,
    ) {
        let pos_b = if pos_b < pos_a { u32::MAX } else { pos_b };
        let event_b = self.search(pool, pos_b, slot);
        let mut event_a = self.search(pool, pos_a, slot);

        while event_a != event_b {
            let Some(id) = event_a else { break };
            let revision = pool.get(id).revision;
            if revision >= rev_a && revision < rev_b {
                if let Some(copy) = pool.copy_chain(Some(id)) {
                    dst.insert(pool, copy, slot);
                }
            }
            event_a = self.link(id).next;
        }
    }

    /// Dequeues and releases every event back to `pool`.
    pub fn drain(&mut self, pool: &EventPool) {
        while let Some(id) = self.dequeue_head() {
            pool.release(id);
        }
    }

    /// Moves every event in `[pos_a, pos_b)` with `revision` in
    /// `[rev_a, rev_b)` from `self` into `dst` (or drops it, releasing
    /// the cell back to `pool`, when `dst` is `None`).
    pub fn move_range(
        &mut self,
        dst: Option<&mut EventQueue>,
        pool: &EventPool,
        pos_a: u32,
        pos_b: u32,
        rev_a: u16,
        rev_b: u16,
        slot: CacheSlot,
    ) {
        let pos_b = if pos_b < pos_a { u32::MAX } else { pos_b };
        let event_b = self.search(pool, pos_b, slot);
        let mut event_a = self.search(pool, pos_a, slot);
        let mut dst = dst;

        while event_a != event_b {
            let Some(id) = event_a else { break };
            let next = self.link(id).next;
            let revision = pool.get(id).revision;
            if revision >= rev_a && revision < rev_b {
                self.remove(id);
                match dst.as_deref_mut() {
                    Some(dst) => dst.insert(pool, id, slot),
                    None => pool.release(id),
                }
            }
            event_a = next;
        }
    }
}
