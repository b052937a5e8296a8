//! Errors raised while reading or writing a Standard MIDI File.
//!
//! Grounded on `webern-midi_file/src/error.rs`'s call-site-tagged `Snafu`
//! enum shape; simplified to the two failure modes the byte-buffer reader
//! actually has (the writer never fails).

use snafu::Snafu;

#[derive(Debug, Snafu, PartialEq, Eq)]
#[snafu(visibility(pub(crate)))]
pub enum SmfError {
    #[snafu(display("unexpected end of input while reading {what}"))]
    Truncated { what: &'static str },

    #[snafu(display("expected {expected} chunk, found {found:?}"))]
    BadChunk { expected: &'static str, found: [u8; 4] },
}

pub type Result<T> = std::result::Result<T, SmfError>;
