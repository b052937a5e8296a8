//! Transport plug-in layer: one trait implemented by anything that can
//! move raw MIDI bytes in or out, and a `BackendKind` that names which
//! implementation a device is configured to use.
//!
//! Each OS transport is selected at runtime rather than compiled in
//! exclusively per target: `Device` holds a `BackendKind` and looks up
//! the matching `Backend` at open time. Concrete OS transports (ALSA,
//! CoreMIDI, JACK) are out of scope; their variants exist to document
//! that the trait is satisfiable by the whole closed backend set, but
//! carry only an `unimplemented!()` body. `MockBackend` is the one
//! concrete, fully-working implementation, used for loopback testing
//! and standing in for `CharDev`.

pub(crate) mod mock;

pub use mock::MockBackend;

use crate::errors::EngineError;
use std::collections::HashMap;

/// Which transport a device is configured to use: `{Disabled, CharDev,
/// Jack, CoreMidi, Alsa}`.
#[cfg_attr(feature = "serde", derive(serde_derive::Serialize, serde_derive::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Disabled,
    CharDev,
    Jack,
    CoreMidi,
    Alsa,
}

/// A full-duplex byte transport. One instance handles both the receive
/// and transmit side of a single named endpoint, used for both
/// directions at different times.
pub trait Backend: Send {
    /// Registers this backend's client-visible name with the transport.
    /// Must be called before `enumerate_inputs`/`enumerate_outputs` can
    /// return qualified port names.
    fn init(&mut self, client_name: &str) -> Result<(), EngineError>;

    /// Lists currently available input ports as `"<client_name>:<port>"`
    /// strings, with a `#N` suffix (`N` starting at 1) appended to every
    /// occurrence after the first when two ports share a name.
    fn enumerate_inputs(&self) -> Vec<String>;

    /// Lists currently available output ports; see
    /// [`Backend::enumerate_inputs`] for the naming rule.
    fn enumerate_outputs(&self) -> Vec<String>;

    /// Opens (or re-opens) the receive side of `fname`.
    fn rx_open(&mut self, fname: &str) -> Result<(), EngineError>;

    /// Opens (or re-opens) the transmit side of `fname`.
    fn tx_open(&mut self, fname: &str) -> Result<(), EngineError>;

    fn rx_close(&mut self);

    fn tx_close(&mut self);

    /// Non-blocking read into `buf`; `Ok(0)` means no data available
    /// right now (`EWOULDBLOCK`), not end-of-stream.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, EngineError>;

    /// Non-blocking write of `buf`; returns the number of bytes
    /// actually accepted, which may be less than `buf.len()` or zero.
    fn write(&mut self, buf: &[u8]) -> Result<usize, EngineError>;
}

/// Builds `"<client_name>:<port_name>"` identifiers for a list of raw
/// port names, appending `#N` (`N` starting at 1) to every occurrence
/// after the first when two ports report the same name. The first
/// occurrence of a name is always left unsuffixed.
pub fn disambiguate(client_name: &str, port_names: &[String]) -> Vec<String> {
    let mut seen: HashMap<&str, u32> = HashMap::new();
    port_names
        .iter()
        .map(|name| {
            let count = seen.entry(name.as_str()).or_insert(0);
            let qualified = if *count == 0 {
                format!("{client_name}:{name}")
            } else {
                format!("{client_name}:{name}#{count}")
            };
            *count += 1;
            qualified
        })
        .collect()
}

struct DisabledBackend;

impl Backend for DisabledBackend {
    fn init(&mut self, _client_name: &str) -> Result<(), EngineError> {
        Err(EngineError::BackendOpenFailed)
    }
    fn enumerate_inputs(&self) -> Vec<String> {
        Vec::new()
    }
    fn enumerate_outputs(&self) -> Vec<String> {
        Vec::new()
    }
    fn rx_open(&mut self, _fname: &str) -> Result<(), EngineError> {
        Err(EngineError::BackendOpenFailed)
    }
    fn tx_open(&mut self, _fname: &str) -> Result<(), EngineError> {
        Err(EngineError::BackendOpenFailed)
    }
    fn rx_close(&mut self) {}
    fn tx_close(&mut self) {}
    fn read(&mut self, _buf: &mut [u8]) -> Result<usize, EngineError> {
        Err(EngineError::BackendFatalIo)
    }
    fn write(&mut self, _buf: &[u8]) -> Result<usize, EngineError> {
        Err(EngineError::BackendFatalIo)
    }
}

struct UnimplementedBackend(&'static str);

impl Backend for UnimplementedBackend {
    fn init(&mut self, _client_name: &str) -> Result<(), EngineError> {
        unimplemented!("{} transport is an external collaborator, not implemented here", self.0)
    }
    fn enumerate_inputs(&self) -> Vec<String> {
        unimplemented!("{} transport is an external collaborator, not implemented here", self.0)
    }
    fn enumerate_outputs(&self) -> Vec<String> {
        unimplemented!("{} transport is an external collaborator, not implemented here", self.0)
    }
    fn rx_open(&mut self, _fname: &str) -> Result<(), EngineError> {
        unimplemented!("{} transport is an external collaborator, not implemented here", self.0)
    }
    fn tx_open(&mut self, _fname: &str) -> Result<(), EngineError> {
        unimplemented!("{} transport is an external collaborator, not implemented here", self.0)
    }
    fn rx_close(&mut self) {}
    fn tx_close(&mut self) {}
    fn read(&mut self, _buf: &mut [u8]) -> Result<usize, EngineError> {
        unimplemented!("{} transport is an external collaborator, not implemented here", self.0)
    }
    fn write(&mut self, _buf: &[u8]) -> Result<usize, EngineError> {
        unimplemented!("{} transport is an external collaborator, not implemented here", self.0)
    }
}

impl BackendKind {
    /// Constructs the concrete backend this kind names. Only `CharDev`
    /// (backed by [`MockBackend`]) has a working body; the OS-specific
    /// kinds are out of scope and panic if actually opened.
    pub fn open(self) -> Box<dyn Backend> {
        match self {
            BackendKind::Disabled => Box::new(DisabledBackend),
            BackendKind::CharDev => Box::new(MockBackend::new()),
            BackendKind::Jack => Box::new(UnimplementedBackend("JACK")),
            BackendKind::CoreMidi => Box::new(UnimplementedBackend("CoreMIDI")),
            BackendKind::Alsa => Box::new(UnimplementedBackend("ALSA")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_backend_refuses_to_open() {
        let mut backend = BackendKind::Disabled.open();
        assert!(backend.rx_open("anything").is_err());
    }

    #[test]
    fn char_dev_opens_a_mock_backend() {
        let mut backend = BackendKind::CharDev.open();
        assert!(backend.tx_open("backend-mod-test").is_ok());
    }

    #[test]
    fn disambiguate_suffixes_only_repeated_names() {
        let names = vec!["Port A".to_string(), "Port B".to_string(), "Port A".to_string()];
        let qualified = disambiguate("Client", &names);
        assert_eq!(
            qualified,
            vec!["Client:Port A".to_string(), "Client:Port B".to_string(), "Client:Port A#1".to_string()]
        );
    }

    #[test]
    fn disambiguate_numbers_each_repeat_in_order() {
        let names = vec!["X".to_string(), "X".to_string(), "X".to_string()];
        let qualified = disambiguate("C", &names);
        assert_eq!(qualified, vec!["C:X".to_string(), "C:X#1".to_string(), "C:X#2".to_string()]);
    }
}
