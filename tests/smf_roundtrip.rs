mod common;

use std::fs;
use std::io::Write;

use umidi::{EventPool, Song};

fn note_on_chunk(tick: &[u8], status: u8, key: u8, velocity: u8) -> Vec<u8> {
    let mut out = tick.to_vec();
    out.push(status);
    out.push(key);
    out.push(velocity);
    out
}

fn minimal_smf() -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(b"MThd");
    out.extend_from_slice(&6u32.to_be_bytes());
    out.extend_from_slice(&1u16.to_be_bytes());
    out.extend_from_slice(&1u16.to_be_bytes());
    out.extend_from_slice(&[0x01, 0xE0]);

    let mut track = Vec::new();
    track.extend_from_slice(&note_on_chunk(&[0x00], 0x90, 60, 100));
    track.extend_from_slice(&note_on_chunk(&[0x60], 0x80, 60, 0));
    track.extend_from_slice(&[0x00, 0xFF, 0x2F, 0x00]);

    out.extend_from_slice(b"MTrk");
    out.extend_from_slice(&(track.len() as u32).to_be_bytes());
    out.extend_from_slice(&track);
    out
}

/// Writes a minimal SMF to a real file, loads it back through
/// [`umidi::smf::load`], re-saves it to a second real file, and checks
/// the two files agree on the note that survived the round trip.
#[test]
fn smf_round_trips_through_real_files() {
    common::enable_logging();

    let dir = tempfile::tempdir().expect("create temp dir");
    let in_path = dir.path().join("input.mid");
    let out_path = dir.path().join("output.mid");

    {
        let mut f = fs::File::create(&in_path).expect("create input file");
        f.write_all(&minimal_smf()).expect("write input file");
    }

    let pool = EventPool::new();
    let bytes = fs::read(&in_path).expect("read input file");
    let mut song: Song = umidi::smf::load(&bytes, &pool).expect("parse smf");

    let saved = umidi::smf::save(&mut song, &pool);
    fs::write(&out_path, &saved).expect("write output file");

    let reread = fs::read(&out_path).expect("read output file");
    let pool2 = EventPool::new();
    let song2 = umidi::smf::load(&reread, &pool2).expect("parse re-saved smf");

    assert_eq!(song2.tracks.len(), song.tracks.len());
    let head = song2.tracks[0].queue.peek_head().expect("note survived the round trip");
    let e = pool2.get(head);
    assert_eq!(e.cmd[1], 0x90);
    assert_eq!(e.cmd[2], 60);
    assert_eq!(e.cmd[3], 100);
}
