//! Connection configuration.

use serde::{Deserialize, Serialize};

/// Serial line parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mode {
    /// Baud rate in bits per second.
    pub baud_rate: u32,
    /// Number of data bits per character (5-8).
    pub data_bits: u8,
    /// Parity checking mode.
    pub parity: Parity,
    /// Number of stop bits (1 or 2).
    pub stop_bits: u8,
}

/// Serial parity checking mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Parity {
    /// No parity bit.
    None,
    /// Odd parity.
    Odd,
    /// Even parity.
    Even,
}

impl Default for Mode {
    /// The command station default of 115200-8-N-1.
    fn default() -> Self {
        Mode {
            baud_rate: 115_200,
            data_bits: 8,
            parity: Parity::None,
            stop_bits: 1,
        }
    }
}

/// Configuration for a command station connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Filesystem path of the serial device, e.g. `/dev/ttyACM0`.
    pub device: String,
    /// Serial line parameters.
    pub mode: Mode,
    /// Whether the protocol listener waits for the first subscriber before
    /// consuming bytes from the transport.
    ///
    /// The default is `true`, which guarantees early broadcasts (notably
    /// the ready message emitted on boot) are observable by the first
    /// subscriber instead of being read and dropped before it exists.
    pub require_subscriber: bool,
}

impl Config {
    /// Create a configuration for the given device with default line mode
    /// and subscriber gating enabled.
    pub fn new(device: impl Into<String>) -> Self {
        Config {
            device: device.into(),
            mode: Mode::default(),
            require_subscriber: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_mode() {
        let mode = Mode::default();
        assert_eq!(mode.baud_rate, 115_200);
        assert_eq!(mode.data_bits, 8);
        assert_eq!(mode.parity, Parity::None);
        assert_eq!(mode.stop_bits, 1);
    }

    #[test]
    fn test_new_config_requires_subscriber() {
        let config = Config::new("/dev/ttyACM0");
        assert!(config.require_subscriber);
        assert_eq!(config.mode, Mode::default());
    }
}
