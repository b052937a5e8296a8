//! Byte-stream to MIDI-packet state machine.
//!
//! Produces USB-MIDI-style 4-byte packets wrapped in an 8-byte cell:
//! `cmd[0]` is the packet-kind nibble, `cmd[1..]` the up-to-7 payload
//! bytes.

use crate::event::{Event, EventId};
use crate::pool::EventPool;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Unknown,
    OneParam,
    TwoParam1,
    TwoParam2,
    Sysex0,
    Sysex1,
    Sysex2,
    Sysex3,
    Sysex4,
    Sysex5,
    Sysex6,
}

/// The raw byte-to-packet state machine, with no knowledge of the event
/// pool or fragment chains.
#[derive(Debug, Clone, Copy)]
struct Parser {
    state: State,
    temp: [u8; 8],
}

impl Parser {
    fn new() -> Self {
        Parser { state: State::Unknown, temp: [0; 8] }
    }

    /// Feeds one byte in; returns a finished 8-byte packet when the
    /// state machine completes one.
    fn feed(&mut self, b: u8) -> Option<[u8; 8]> {
        if b >= 0xf8 {
            let mut cmd = [0u8; 8];
            cmd[0] = 0x8 | 0x1;
            cmd[1] = b;
            return Some(cmd);
        }
        if b >= 0xf0 {
            match b {
                0xf0 => {
                    self.temp[1] = b;
                    self.state = State::Sysex1;
                }
                0xf1 | 0xf3 => {
                    self.temp[1] = b;
                    self.state = State::OneParam;
                }
                0xf2 => {
                    self.temp[1] = b;
                    self.state = State::TwoParam1;
                }
                0xf4 | 0xf5 => {
                    self.state = State::Unknown;
                }
                0xf6 => {
                    let mut cmd = [0u8; 8];
                    cmd[0] = 0x8 | 0x1;
                    cmd[1] = 0xf6;
                    self.state = State::Unknown;
                    return Some(cmd);
                }
                0xf7 => {
                    let result = match self.state {
                        State::Sysex0 => {
                            self.temp[0] = 0x1;
                            self.temp[1] = 0xf7;
                            self.temp[2] = 0;
                            Some(self.temp)
                        }
                        State::Sysex1 => {
                            self.temp[0] = 0x2;
                            self.temp[2] = 0xf7;
                            self.temp[3] = 0;
                            Some(self.temp)
                        }
                        State::Sysex2 => {
                            self.temp[0] = 0x3;
                            self.temp[3] = 0xf7;
                            self.temp[4] = 0;
                            Some(self.temp)
                        }
                        State::Sysex3 => {
                            self.temp[0] = 0x4;
                            self.temp[4] = 0xf7;
                            self.temp[5] = 0;
                            Some(self.temp)
                        }
                        State::Sysex4 => {
                            self.temp[0] = 0x5;
                            self.temp[5] = 0xf7;
                            self.temp[6] = 0;
                            Some(self.temp)
                        }
                        State::Sysex5 => {
                            self.temp[0] = 0x6;
                            self.temp[6] = 0xf7;
                            self.temp[7] = 0;
                            Some(self.temp)
                        }
                        State::Sysex6 => {
                            self.temp[0] = 0x7;
                            self.temp[7] = 0xf7;
                            Some(self.temp)
                        }
                        _ => None,
                    };
                    self.state = State::Unknown;
                    return result;
                }
                _ => unreachable!("0xf0..=0xf7 exhaustively matched above"),
            }
            return None;
        }
        if b >= 0x80 {
            self.temp[1] = b;
            self.state = if (0xc0..=0xdf).contains(&b) { State::OneParam } else { State::TwoParam1 };
            return None;
        }
        // b < 0x80: a data byte, interpreted according to the current state.
        match self.state {
            State::OneParam => {
                if self.temp[1] >= 0xf0 {
                    self.state = State::Unknown;
                }
                self.temp[0] = 0x2 | 0x8;
                self.temp[2] = b;
                Some(self.temp)
            }
            State::TwoParam1 => {
                self.temp[2] = b;
                self.state = State::TwoParam2;
                None
            }
            State::TwoParam2 => {
                self.state = if self.temp[1] < 0xf0 { State::TwoParam1 } else { State::Unknown };
                self.temp[0] = 0x3 | 0x8;
                self.temp[3] = b;
                Some(self.temp)
            }
            State::Sysex0 => {
                self.temp[1] = b;
                self.state = State::Sysex1;
                None
            }
            State::Sysex1 => {
                self.temp[2] = b;
                self.state = State::Sysex2;
                None
            }
            State::Sysex2 => {
                self.temp[3] = b;
                self.state = State::Sysex3;
                None
            }
            State::Sysex3 => {
                self.temp[4] = b;
                self.state = State::Sysex4;
                None
            }
            State::Sysex4 => {
                self.temp[5] = b;
                self.state = State::Sysex5;
                None
            }
            State::Sysex5 => {
                self.temp[6] = b;
                self.state = State::Sysex6;
                None
            }
            State::Sysex6 => {
                self.temp[0] = if self.temp[1] == 0xf0 { 0x0 } else { 0x8 };
                self.temp[7] = b;
                self.state = State::Sysex0;
                Some(self.temp)
            }
            State::Unknown => None,
        }
    }
}

/// Wraps [`Parser`] with fragment-chain accumulation against an
/// [`EventPool`].
pub struct Converter {
    parser: Parser,
    head: Option<EventId>,
    tail: Option<EventId>,
}

impl Converter {
    pub fn new() -> Self {
        Converter { parser: Parser::new(), head: None, tail: None }
    }

    fn alloc(&self, pool: &EventPool) -> EventId {
        pool.acquire().unwrap_or_else(|| pool.allocate())
    }

    /// Feeds one input byte. Returns the chain head of a finished event
    /// once the accumulated packets add up to one: immediately for
    /// short commands, once `0xF7`/7-byte continuation closes out a
    /// sysex run, or never while a chain is still open.
    pub fn feed(&mut self, pool: &EventPool, b: u8) -> Option<EventId> {
        let cmd = self.parser.feed(b)?;
        let kind = cmd[0] & 0xF;

        if kind == 0x0 {
            // Long command begins: discard whatever partial chain we had.
            let stale = self.head.take();
            self.tail = None;
            pool.release_chain(stale);
        }

        let id = self.alloc(pool);
        pool.set(id, Event { cmd, next_fragment: None, ..Event::new() });

        if kind <= 0x8 {
            match self.tail {
                Some(tail) => pool.with_mut(tail, |e| e.next_fragment = Some(id)),
                None => self.head = Some(id),
            }
            self.tail = Some(id);
        }

        if kind == 0x8 || kind == 0x0 {
            None
        } else if kind < 8 {
            let head = self.head.take();
            self.tail = None;
            head
        } else {
            Some(id)
        }
    }

    /// Drops any partially-accumulated chain and resets parser state.
    pub fn reset(&mut self, pool: &EventPool) {
        let stale = self.head.take();
        self.tail = None;
        pool.release_chain(stale);
        self.parser = Parser::new();
    }
}

impl Default for Converter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_command_completes_immediately() {
        let pool = EventPool::new();
        let mut conv = Converter::new();
        assert_eq!(conv.feed(&pool, 0x90), None);
        assert_eq!(conv.feed(&pool, 60), None);
        let id = conv.feed(&pool, 100).expect("note-on completes on 3rd byte");
        let e = pool.get(id);
        assert_eq!(e.cmd[1], 0x90);
        assert_eq!(e.cmd[2], 60);
        assert_eq!(e.cmd[3], 100);
    }

    #[test]
    fn running_status_repeats_without_new_status_byte() {
        let pool = EventPool::new();
        let mut conv = Converter::new();
        conv.feed(&pool, 0x90);
        conv.feed(&pool, 60);
        conv.feed(&pool, 100);
        conv.feed(&pool, 64);
        let id = conv.feed(&pool, 0).expect("running-status note completes");
        let e = pool.get(id);
        assert_eq!(e.cmd[1], 0x90);
        assert_eq!(e.cmd[2], 64);
        assert_eq!(e.cmd[3], 0);
    }

    #[test]
    fn short_sysex_under_7_bytes_completes_on_f7() {
        let pool = EventPool::new();
        let mut conv = Converter::new();
        assert_eq!(conv.feed(&pool, 0xF0), None);
        assert_eq!(conv.feed(&pool, 0x01), None);
        assert_eq!(conv.feed(&pool, 0x02), None);
        let id = conv.feed(&pool, 0xF7).expect("sysex closes on F7");
        let e = pool.get(id);
        assert!(e.next_fragment.is_none());
        assert_eq!(e.cmd[1], 0xF0);
        assert_eq!(e.cmd[2], 0x01);
        assert_eq!(e.cmd[3], 0x02);
        assert_eq!(e.cmd[4], 0xF7);
    }

    #[test]
    fn long_sysex_chains_across_fragments() {
        let pool = EventPool::new();
        let mut conv = Converter::new();
        conv.feed(&pool, 0xF0);
        for b in 0..6u8 {
            assert_eq!(conv.feed(&pool, b), None);
        }
        // 7th data byte closes the first 8-byte fragment and opens the next.
        assert_eq!(conv.feed(&pool, 6), None);
        let head = conv.feed(&pool, 0xF7).expect("sysex closes eventually");
        let first = pool.get(head);
        assert!(first.next_fragment.is_some());
    }

    #[test]
    fn realtime_byte_is_reported_as_1_byte_packet() {
        let pool = EventPool::new();
        let mut conv = Converter::new();
        let id = conv.feed(&pool, 0xF8).expect("realtime clock completes alone");
        assert_eq!(pool.get(id).cmd[1], 0xF8);
    }

    #[test]
    fn reset_frees_partial_chain() {
        let pool = EventPool::new();
        let mut conv = Converter::new();
        conv.feed(&pool, 0xF0);
        conv.feed(&pool, 1);
        conv.reset(&pool);
        assert_eq!(pool.free_len(), 1);
    }
}
