//! In-process loopback transport: the one backend with a real body.
//!
//! Virtual ports are just names in a shared registry: opening the same
//! name for both rx and tx from two different `MockBackend` instances
//! wires them together, so tests and demos can exercise the full
//! send/receive path without any real device.

use crate::backend::{disambiguate, Backend};
use crate::errors::EngineError;
use crate::pipe::Pipe;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::OnceLock;

static REGISTRY: OnceLock<Mutex<HashMap<String, Pipe>>> = OnceLock::new();

fn registry() -> &'static Mutex<HashMap<String, Pipe>> {
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

fn named_pipe(name: &str) -> Pipe {
    registry().lock().entry(name.to_string()).or_insert_with(Pipe::new).clone()
}

/// Drops the named loopback channel. Exposed for tests that need a
/// clean slate between cases sharing the process-global registry.
pub fn reset_channel(name: &str) {
    registry().lock().remove(name);
}

pub struct MockBackend {
    rx: Option<Pipe>,
    tx: Option<Pipe>,
    client_name: String,
}

impl MockBackend {
    pub fn new() -> Self {
        MockBackend { rx: None, tx: None, client_name: String::new() }
    }

    /// Every currently registered virtual port name, in a stable order.
    fn known_ports() -> Vec<String> {
        let registry = registry().lock();
        let mut names: Vec<String> = registry.keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl Backend for MockBackend {
    fn init(&mut self, client_name: &str) -> Result<(), EngineError> {
        self.client_name = client_name.to_string();
        Ok(())
    }

    fn enumerate_inputs(&self) -> Vec<String> {
        disambiguate(&self.client_name, &Self::known_ports())
    }

    fn enumerate_outputs(&self) -> Vec<String> {
        disambiguate(&self.client_name, &Self::known_ports())
    }

    fn rx_open(&mut self, fname: &str) -> Result<(), EngineError> {
        self.rx = Some(named_pipe(fname));
        Ok(())
    }

    fn tx_open(&mut self, fname: &str) -> Result<(), EngineError> {
        self.tx = Some(named_pipe(fname));
        Ok(())
    }

    fn rx_close(&mut self) {
        self.rx = None;
    }

    fn tx_close(&mut self) {
        self.tx = None;
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, EngineError> {
        match &self.rx {
            Some(pipe) => Ok(pipe.read(buf)),
            None => Ok(0),
        }
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize, EngineError> {
        match &self.tx {
            Some(pipe) => Ok(pipe.write(buf)),
            None => Err(EngineError::BackendOpenFailed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn two_instances_on_the_same_name_loop_back() {
        reset_channel("test-loopback-a");
        let mut writer = MockBackend::new();
        let mut reader = MockBackend::new();
        writer.tx_open("test-loopback-a").unwrap();
        reader.rx_open("test-loopback-a").unwrap();

        assert_eq!(writer.write(&[0x90, 60, 100]).unwrap(), 3);
        let mut buf = [0u8; 3];
        assert_eq!(reader.read(&mut buf).unwrap(), 3);
        assert_eq!(buf, [0x90, 60, 100]);
    }

    #[test]
    fn write_without_open_tx_fails() {
        let mut backend = MockBackend::new();
        assert!(backend.write(&[1]).is_err());
    }

    #[test]
    fn read_without_open_rx_returns_zero() {
        let mut backend = MockBackend::new();
        let mut buf = [0u8; 4];
        assert_eq!(backend.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn enumerate_ports_qualifies_names_with_the_client_name() {
        reset_channel("enum-test-port");
        let mut backend = MockBackend::new();
        backend.init("my-app").unwrap();
        let mut opener = MockBackend::new();
        opener.rx_open("enum-test-port").unwrap();

        let inputs = backend.enumerate_inputs();
        assert!(inputs.contains(&"my-app:enum-test-port".to_string()));
        assert_eq!(backend.enumerate_outputs(), inputs);
    }
}
