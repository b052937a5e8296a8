//! Per-device backend configuration, batch-applied to a [`crate::root::Root`].
//!
//! One entry per device number, each entry carrying both the record and
//! playback settings for that number, not a separate RX/TX array. The
//! `serde` derives are kept behind the crate's `serde` feature so the
//! default build carries no extra dependency weight.

use crate::backend::BackendKind;

#[cfg_attr(feature = "serde", derive(serde_derive::Serialize, serde_derive::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceConfig {
    pub record_path: String,
    pub record_backend: BackendKind,
    pub play_path: String,
    pub play_backend: BackendKind,
}

impl DeviceConfig {
    pub fn disabled() -> Self {
        DeviceConfig {
            record_path: String::new(),
            record_backend: BackendKind::Disabled,
            play_path: String::new(),
            play_backend: BackendKind::Disabled,
        }
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self::disabled()
    }
}

/// A full snapshot of every device's backend selection, suitable for
/// persisting and restoring verbatim.
#[cfg_attr(feature = "serde", derive(serde_derive::Serialize, serde_derive::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub devices: Vec<DeviceConfig>,
}

impl Config {
    /// A config with every device disabled, sized to `crate::root::NUM_DEVICES`.
    pub fn disabled(num_devices: usize) -> Self {
        Config { devices: (0..num_devices).map(|_| DeviceConfig::disabled()).collect() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_config_has_every_device_disabled() {
        let cfg = Config::disabled(16);
        assert_eq!(cfg.devices.len(), 16);
        assert!(cfg.devices.iter().all(|d| d.record_backend == BackendKind::Disabled));
        assert!(cfg.devices.iter().all(|d| d.play_backend == BackendKind::Disabled));
    }

    #[test]
    fn config_clone_is_equal() {
        let mut cfg = Config::disabled(2);
        cfg.devices[0].record_backend = BackendKind::CharDev;
        cfg.devices[0].record_path = "device-a".into();
        assert_eq!(cfg.clone(), cfg);
    }
}
