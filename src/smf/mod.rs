//! Standard MIDI File (SMF) reader/writer.
//!
//! Operates on in-memory byte buffers (a `ptr`/`len` contract) rather
//! than `std::io::Read`/`Write`, since nothing here needs partial or
//! streamed I/O; the caller owns moving bytes to and from disk.

pub mod error;
mod vlq;

use crate::event::{Event, EventId};
use crate::pool::EventPool;
use crate::queue::CacheSlot;
use crate::song::{DivisionType, Song};
use crate::track::Track;
use error::{BadChunkSnafu, Result, TruncatedSnafu};
use snafu::{ensure, OptionExt};

/// A read cursor over an immutable byte buffer.
struct Reader<'a> {
    buf: &'a [u8],
    off: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Reader { buf, off: 0 }
    }

    fn read_u8(&mut self) -> Result<u8> {
        let b = self.buf.get(self.off).copied().context(TruncatedSnafu { what: "byte" })?;
        self.off += 1;
        Ok(b)
    }

    fn peek_u8(&mut self) -> Result<u8> {
        self.buf.get(self.off).copied().context(TruncatedSnafu { what: "byte" })
    }

    fn read_multi(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .off
            .checked_add(len)
            .filter(|&end| end <= self.buf.len())
            .context(TruncatedSnafu { what: "chunk data" })?;
        let slice = &self.buf[self.off..end];
        self.off = end;
        Ok(slice)
    }

    fn read_tag(&mut self) -> Result<[u8; 4]> {
        let bytes = self.read_multi(4)?;
        Ok([bytes[0], bytes[1], bytes[2], bytes[3]])
    }

    fn read_u16(&mut self) -> Result<u16> {
        let bytes = self.read_multi(2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    fn read_u32(&mut self) -> Result<u32> {
        let bytes = self.read_multi(4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn offset(&self) -> usize {
        self.off
    }

    /// Clamps to the end of the buffer rather than erroring, since it's
    /// only ever used to skip forward past a chunk whose declared size
    /// may run past what this reader cares about.
    fn seek_set(&mut self, off: usize) {
        self.off = off.min(self.buf.len());
    }
}

fn write_u16(out: &mut Vec<u8>, value: u16) {
    out.extend_from_slice(&value.to_be_bytes());
}

fn write_u32(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_be_bytes());
}

/// Builds a single-cell, self-contained event (anything but sysex/meta)
/// from a status byte plus up to 6 data bytes.
fn push_short(pool: &EventPool, status: u8, data: &[u8]) -> EventId {
    let id = pool.acquire().unwrap_or_else(|| pool.allocate());
    let mut event = Event::new();
    let byte_count = 1 + data.len();
    event.cmd[0] = 0x8 | byte_count as u8;
    event.cmd[1] = status;
    event.cmd[2..2 + data.len()].copy_from_slice(data);
    pool.set(id, event);
    id
}

/// Builds a (possibly multi-cell) fragment chain from raw bytes. Full
/// 7-byte cells that aren't the last get `cmd[0] = 0x0` (first) or
/// `0x8` (continuation); the final cell gets `cmd[0]` set to its own
/// byte count directly (no `0x8` bit), distinguishing a finished chain
/// from one that continues.
fn build_chain(pool: &EventPool, data: &[u8]) -> EventId {
    let mut head = None;
    let mut tail: Option<EventId> = None;
    let mut chunks = data.chunks(7).peekable();
    let mut first = true;

    while let Some(chunk) = chunks.next() {
        let id = pool.acquire().unwrap_or_else(|| pool.allocate());
        let mut event = Event::new();
        event.cmd[1..1 + chunk.len()].copy_from_slice(chunk);
        event.cmd[0] = if chunk.len() == 7 && chunks.peek().is_some() {
            if first { 0x0 } else { 0x8 }
        } else {
            chunk.len() as u8
        };
        first = false;
        pool.set(id, event);

        match tail {
            Some(t) => pool.with_mut(t, |e| e.next_fragment = Some(id)),
            None => head = Some(id),
        }
        tail = Some(id);
    }

    head.expect("build_chain is never called with empty data")
}

/// Concatenates a chain's raw payload bytes back out.
fn chain_bytes(pool: &EventPool, head: EventId) -> Vec<u8> {
    let mut out = Vec::new();
    let mut cursor = Some(head);
    while let Some(id) = cursor {
        let event = pool.get(id);
        let len = event.get_length_first() as usize;
        out.extend_from_slice(&event.cmd[1..1 + len]);
        cursor = event.next_fragment;
    }
    out
}

fn decode_division(bytes: [u8; 2]) -> (DivisionType, u16) {
    match bytes[0] as i8 {
        -24 => (DivisionType::Smpte24, bytes[1] as u16),
        -25 => (DivisionType::Smpte25, bytes[1] as u16),
        -29 => (DivisionType::Smpte30Drop, bytes[1] as u16),
        -30 => (DivisionType::Smpte30, bytes[1] as u16),
        _ => (DivisionType::Ppq, u16::from_be_bytes(bytes)),
    }
}

fn encode_division(out: &mut Vec<u8>, division_type: DivisionType, resolution: u16) {
    match division_type {
        DivisionType::Ppq => write_u16(out, resolution),
        DivisionType::Smpte24 => out.extend_from_slice(&[(-24i8) as u8, resolution as u8]),
        DivisionType::Smpte25 => out.extend_from_slice(&[(-25i8) as u8, resolution as u8]),
        DivisionType::Smpte30Drop => out.extend_from_slice(&[(-29i8) as u8, resolution as u8]),
        DivisionType::Smpte30 => out.extend_from_slice(&[(-30i8) as u8, resolution as u8]),
    }
}

/// Parses an SMF (optionally RIFF/RMID-wrapped) byte buffer into a
/// [`Song`]. New events come from `pool`.
pub fn load(bytes: &[u8], pool: &EventPool) -> Result<Song> {
    let mut r = Reader::new(bytes);

    let mut tag = r.read_tag()?;
    let mut chunk_size = r.read_u32()?;
    let mut chunk_start = r.offset();

    if &tag == b"RIFF" {
        let riff_type = r.read_tag()?;
        ensure!(&riff_type == b"RMID", BadChunkSnafu { expected: "RMID", found: riff_type });

        tag = r.read_tag()?;
        let _data_chunk_size = r.read_u32()?;
        ensure!(&tag == b"data", BadChunkSnafu { expected: "data", found: tag });

        tag = r.read_tag()?;
        chunk_size = r.read_u32()?;
        chunk_start = r.offset();
    }
    ensure!(&tag == b"MThd", BadChunkSnafu { expected: "MThd", found: tag });

    let file_format = r.read_u16()?;
    let number_of_tracks = r.read_u16()?;
    let division_bytes = r.read_multi(2)?;
    let (division_type, resolution) = decode_division([division_bytes[0], division_bytes[1]]);

    let mut song = Song::new(file_format, resolution, division_type);

    // forwards compatibility: skip over any extra header data.
    r.seek_set(chunk_start + chunk_size as usize);

    let mut tracks_read: u16 = 0;
    while tracks_read < number_of_tracks {
        let tag = r.read_tag()?;
        let chunk_size = r.read_u32()? as usize;
        let chunk_start = r.offset();

        if &tag == b"MTrk" {
            let mut track = Track::new(i32::MAX);
            let mut tick: u32 = 0;
            let mut running_status: u8 = 0;
            let mut at_end_of_track = false;

            while r.offset() < chunk_start + chunk_size && !at_end_of_track {
                tick = tick.wrapping_add(vlq::read(&mut r)?);

                let peeked = r.peek_u8()?;
                let status = if peeked & 0x80 != 0 {
                    running_status = r.read_u8()?;
                    running_status
                } else {
                    running_status
                };

                let mut built: Option<EventId> = None;

                match status >> 4 {
                    0x8 | 0x9 | 0xA | 0xB | 0xE => {
                        let d1 = r.read_u8()? & 0x7F;
                        let d2 = r.read_u8()? & 0x7F;
                        built = Some(push_short(pool, status, &[d1, d2]));
                    }
                    0xC | 0xD => {
                        let d1 = r.read_u8()? & 0x7F;
                        built = Some(push_short(pool, status, &[d1]));
                    }
                    0xF => match status {
                        0xF1 | 0xF3 => {
                            let d1 = r.read_u8()? & 0x7F;
                            built = Some(push_short(pool, status, &[d1]));
                        }
                        0xF2 => {
                            let d1 = r.read_u8()? & 0x7F;
                            let d2 = r.read_u8()? & 0x7F;
                            built = Some(push_short(pool, status, &[d1, d2]));
                        }
                        0xF8 | 0xFA | 0xFB | 0xFC => {
                            built = Some(push_short(pool, status, &[]));
                        }
                        0xF0 | 0xF7 => {
                            let data_len = vlq::read(&mut r)? as usize;
                            let payload = r.read_multi(data_len)?;
                            let mut data = Vec::with_capacity(data_len + 2);
                            data.push(0xF0);
                            data.extend_from_slice(payload);
                            data.push(0xF7);
                            built = Some(build_chain(pool, &data));
                        }
                        0xFF => {
                            let meta_number = r.read_u8()? & 0x7F;
                            let data_len = vlq::read(&mut r)? as usize;
                            let payload = r.read_multi(data_len)?;

                            if meta_number == 0x51 && tracks_read != 0 {
                                // discard tempo information on non-conductor tracks
                            } else if meta_number == 0x2F {
                                at_end_of_track = true;
                            } else {
                                let mut data = Vec::with_capacity(data_len + 2);
                                data.push(0xFF);
                                data.push(meta_number);
                                data.extend_from_slice(payload);
                                built = Some(build_chain(pool, &data));
                            }
                        }
                        _ => {}
                    },
                    _ => {}
                }

                if let Some(id) = built {
                    pool.with_mut(id, |e| {
                        e.position = tick;
                        e.tick = tick;
                    });
                    track.queue.insert(pool, id, CacheSlot::Input);
                }
            }

            tracks_read += 1;
            song.add_track_last(track);
        }

        // forwards compatibility: skip over any unrecognized chunks, or
        // extra data at the end of tracks.
        r.seek_set(chunk_start + chunk_size);
    }

    song.recompute_positions(pool);
    Ok(song)
}

/// Serializes `song` to SMF bytes. Converts the song's tracks back to a
/// shared tick timeline first, which also strips tempo events back out;
/// they are regenerated implicitly by `resolution`/`division_type`
/// unless the conductor track still carries explicit tempo events,
/// which it no longer does once recomputed. Callers that need to
/// preserve a tempo map across a round-trip should re-insert it
/// before/instead of calling this on a [`Song`] that was only ever
/// loaded, never played.
pub fn save(song: &mut Song, pool: &EventPool) -> Vec<u8> {
    song.recompute_ticks(pool);

    let mut out = Vec::new();
    out.extend_from_slice(b"MThd");
    write_u32(&mut out, 6);
    write_u16(&mut out, song.file_format);
    write_u16(&mut out, song.tracks.len() as u16);
    encode_division(&mut out, song.division_type, song.resolution);

    for track in &song.tracks {
        out.extend_from_slice(b"MTrk");
        let size_patch_at = out.len();
        write_u32(&mut out, 0);
        let track_start = out.len();

        let mut previous_tick: u32 = 0;
        for id in track.queue.iter() {
            let event = pool.get(id);

            match event.cmd[1] {
                0xF4 | 0xF5 | 0xF6 | 0xF7 | 0xF9 | 0xFD | 0xFE => continue,
                _ => {}
            }

            vlq::write(&mut out, event.tick.wrapping_sub(previous_tick));
            previous_tick = event.tick;

            match event.cmd[1] >> 4 {
                0x8 | 0x9 | 0xA | 0xB | 0xE => {
                    out.push(event.cmd[1]);
                    out.push(event.cmd[2] & 0x7F);
                    out.push(event.cmd[3] & 0x7F);
                }
                0xC | 0xD => {
                    out.push(event.cmd[1]);
                    out.push(event.cmd[2] & 0x7F);
                }
                0xF => match event.cmd[1] {
                    0xF0 => {
                        out.push(0xF0);
                        let data = chain_bytes(pool, id);
                        let payload_len = data.len() - 2;
                        vlq::write(&mut out, payload_len as u32);
                        out.extend_from_slice(&data[1..1 + payload_len]);
                    }
                    0xF1 => {
                        out.push(0xF1);
                        out.push(event.cmd[2] & 0x7F);
                    }
                    0xF2 => {
                        out.push(0xF2);
                        out.push(event.cmd[2] & 0x7F);
                        out.push(event.cmd[3] & 0x7F);
                    }
                    0xF3 => {
                        out.push(0xF3);
                        out.push(event.cmd[2] & 0x7F);
                    }
                    0xF8 => out.push(0xF8),
                    0xFA => out.push(0xFA),
                    0xFB => out.push(0xFB),
                    0xFC => out.push(0xFC),
                    0xFF => {
                        out.push(0xFF);
                        out.push(event.cmd[2] & 0x7F);
                        let data = chain_bytes(pool, id);
                        let payload_len = data.len() - 2;
                        vlq::write(&mut out, payload_len as u32);
                        out.extend_from_slice(&data[2..2 + payload_len]);
                    }
                    _ => out.push(0xFE),
                },
                _ => out.push(0xFE),
            }
        }

        vlq::write(&mut out, 0);
        out.extend_from_slice(&[0xFF, 0x2F, 0x00]);

        let track_len = (out.len() - track_start) as u32;
        out[size_patch_at..size_patch_at + 4].copy_from_slice(&track_len.to_be_bytes());
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn note_on_chunk(tick: &[u8], status: u8, key: u8, velocity: u8) -> Vec<u8> {
        let mut out = tick.to_vec();
        out.push(status);
        out.push(key);
        out.push(velocity);
        out
    }

    fn simple_smf(division: [u8; 2]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(b"MThd");
        out.extend_from_slice(&6u32.to_be_bytes());
        out.extend_from_slice(&1u16.to_be_bytes());
        out.extend_from_slice(&1u16.to_be_bytes());
        out.extend_from_slice(&division);

        let mut track = Vec::new();
        track.extend_from_slice(&note_on_chunk(&[0x00], 0x90, 60, 100));
        track.extend_from_slice(&note_on_chunk(&[0x60], 0x80, 60, 0));
        track.extend_from_slice(&[0x00, 0xFF, 0x2F, 0x00]);

        out.extend_from_slice(b"MTrk");
        out.extend_from_slice(&(track.len() as u32).to_be_bytes());
        out.extend_from_slice(&track);
        out
    }

    #[test]
    fn loads_a_minimal_single_track_file() {
        let pool = EventPool::new();
        let bytes = simple_smf([0x01, 0xE0]);
        let song = load(&bytes, &pool).unwrap();

        assert_eq!(song.tracks.len(), 1);
        let head = song.tracks[0].queue.peek_head().unwrap();
        let e = pool.get(head);
        assert_eq!(e.cmd[1], 0x90);
        assert_eq!(e.cmd[2], 60);
        assert_eq!(e.cmd[3], 100);
    }

    #[test]
    fn negative_division_byte_decodes_to_smpte() {
        let (division_type, resolution) = decode_division([0xE7, 0x28]);
        assert_eq!(division_type, DivisionType::Smpte25);
        assert_eq!(resolution, 40);
    }

    #[test]
    fn truncated_file_is_rejected() {
        let pool = EventPool::new();
        let bytes = simple_smf([0x01, 0xE0]);
        let result = load(&bytes[..bytes.len() - 5], &pool);
        assert!(result.is_err());
    }

    #[test]
    fn riff_rmid_wrapper_is_unwrapped() {
        let pool = EventPool::new();
        let inner = simple_smf([0x01, 0xE0]);
        let mut wrapped = Vec::new();
        wrapped.extend_from_slice(b"RIFF");
        wrapped.extend_from_slice(&((inner.len() + 4) as u32).to_be_bytes());
        wrapped.extend_from_slice(b"RMID");
        wrapped.extend_from_slice(b"data");
        wrapped.extend_from_slice(&(inner.len() as u32).to_be_bytes());
        wrapped.extend_from_slice(&inner);

        let song = load(&wrapped, &pool).unwrap();
        assert_eq!(song.tracks.len(), 1);
    }

    #[test]
    fn round_trip_preserves_note_bytes_and_track_count() {
        let pool = EventPool::new();
        let bytes = simple_smf([0x01, 0xE0]);
        let mut song = load(&bytes, &pool).unwrap();

        let saved = save(&mut song, &pool);
        let reloaded = load(&saved, &pool).unwrap();

        assert_eq!(reloaded.tracks.len(), song.tracks.len());
        let head = reloaded.tracks[0].queue.peek_head().unwrap();
        let e = pool.get(head);
        assert_eq!(e.cmd[1], 0x90);
        assert_eq!(e.cmd[2], 60);
    }

    #[test]
    fn sysex_chain_round_trips_through_save_and_load() {
        let pool = EventPool::new();
        let mut song = Song::new(1, 480, DivisionType::Ppq);
        let mut track = Track::new(i32::MAX);

        let payload: Vec<u8> = (0u8..20).collect();
        let mut data = Vec::new();
        data.push(0xF0);
        data.extend_from_slice(&payload);
        data.push(0xF7);
        let id = build_chain(&pool, &data);
        pool.with_mut(id, |e| {
            e.tick = 10;
            e.position = 10;
        });
        track.queue.insert(&pool, id, CacheSlot::Input);
        song.add_track_last(track);

        let bytes = save(&mut song, &pool);
        let reloaded = load(&bytes, &pool).unwrap();

        let head = reloaded.tracks[0].queue.peek_head().unwrap();
        let restored = chain_bytes(&pool, head);
        assert_eq!(restored, data);
    }

    #[test]
    fn meta_track_name_round_trips() {
        let pool = EventPool::new();
        let mut song = Song::new(1, 480, DivisionType::Ppq);
        let mut track = Track::new(i32::MAX);

        let mut data = vec![0xFF, 0x03];
        data.extend_from_slice(b"bass");
        let id = build_chain(&pool, &data);
        track.queue.insert(&pool, id, CacheSlot::Input);
        song.add_track_last(track);

        let bytes = save(&mut song, &pool);
        let mut reloaded = load(&bytes, &pool).unwrap();
        reloaded.tracks[0].compute_max_min(&pool);
        assert_eq!(reloaded.tracks[0].name, "bass");
    }
}
