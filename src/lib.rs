//! A real-time MIDI routing and sequencing engine.
//!
//! A shared [`Event`] arena ([`pool`]) feeds per-device
//! [`queue::EventQueue`]s through a byte-stream [`parser`], behind a
//! [`Root`] engine handle that owns every device and runs the background
//! [`scheduler::Scheduler`], [`song`]/[`song_worker`] on top for
//! multi-track playback and recording, and a [`smf`] codec for Standard
//! MIDI Files.
//!
//! Transport is pluggable through the [`backend::Backend`] trait;
//! concrete OS transports (ALSA, CoreMIDI, JACK) are out of scope, so
//! [`backend::MockBackend`] is the one backend with a working body.

pub mod clock;
pub mod pipe;
pub mod event;
pub mod pool;
pub mod queue;
pub mod parser;
pub mod backend;
pub mod device;
pub mod timer;
pub mod root;
pub mod scheduler;
pub mod track;
pub mod song;
pub mod song_worker;
pub mod config;
pub mod smf;

mod errors;

pub use errors::EngineError;
pub use event::{Event, EventId};
pub use pool::EventPool;
pub use queue::{CacheSlot, EventQueue};
pub use root::{Root, StartFlags, NUM_DEVICES};
pub use song::{DivisionType, Song};
pub use song_worker::SongWorker;
pub use track::Track;
pub use config::{Config, DeviceConfig};
pub use backend::{Backend, BackendKind};
