//! Connection root.
//!
//! A [`Connection`] owns the channel over the serial port and hands out
//! entity handles. The object graph is a DAG rooted here: entities hold a
//! reference to the channel, the channel owns the protocol endpoint, the
//! protocol owns the transport. There is no global state.

use tokio::io::{AsyncRead, AsyncWrite};
use tokio_serial::SerialPortBuilderExt;
use tracing::debug;

use crate::cab::{Address, Cab};
use crate::channel::Channel;
use crate::config::{Config, Parity};
use crate::error::{Error, Result};
use crate::output::{Output, OutputHeadless};
use crate::protocol::Protocol;
use crate::sensor::Sensor;
use crate::station::CommandStation;
use crate::turnout::TurnoutServo;
use crate::{output, sensor, turnout};

/// A connection to a command station.
pub struct Connection {
    channel: Channel,
}

impl Connection {
    /// Open the serial device named by the configuration.
    ///
    /// Must be called from within a tokio runtime.
    pub fn open(config: &Config) -> Result<Connection> {
        let mode = &config.mode;
        let builder = tokio_serial::new(&config.device, mode.baud_rate)
            .data_bits(data_bits(mode.data_bits))
            .parity(parity(mode.parity))
            .stop_bits(stop_bits(mode.stop_bits));

        let port = builder
            .open_native_async()
            .map_err(|source| Error::Open {
                device: config.device.clone(),
                source,
            })?;

        debug!("Opened {} at {} baud", config.device, mode.baud_rate);
        Ok(Connection::new(port, config.require_subscriber))
    }

    /// Wrap an already connected byte-stream transport.
    ///
    /// Used by tests and by callers bringing their own transport, e.g. a
    /// TCP bridge to the station.
    pub fn new<T>(transport: T, require_subscriber: bool) -> Connection
    where
        T: AsyncRead + AsyncWrite + Send + 'static,
    {
        Connection {
            channel: Channel::new(Protocol::new(transport, require_subscriber)),
        }
    }

    /// The connection's channel.
    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    /// A handle for the cab at the given address.
    pub fn cab(&self, address: Address) -> Cab<'_> {
        Cab::new(address, &self.channel)
    }

    /// A handle for the sensor with the given id.
    pub fn sensor(&self, id: sensor::Id) -> Sensor<'_> {
        Sensor::new(id, &self.channel)
    }

    /// A handle for the servo turnout with the given id.
    pub fn turnout_servo(&self, id: turnout::Id) -> TurnoutServo<'_> {
        TurnoutServo::new(id, &self.channel)
    }

    /// A handle for the defined output with the given id.
    pub fn output(&self, id: output::Id) -> Output<'_> {
        Output::new(id, &self.channel)
    }

    /// A handle for direct virtual pin control.
    pub fn output_headless(&self) -> OutputHeadless<'_> {
        OutputHeadless::new(&self.channel)
    }

    /// A handle for the command station itself.
    pub fn command_station(&self) -> CommandStation<'_> {
        CommandStation::new(&self.channel)
    }

    /// Close the connection.
    ///
    /// Runs inside an exclusive session so in-flight conversations finish
    /// first; waits for the protocol listener to exit.
    pub async fn close(&self) -> Result<()> {
        self.channel
            .session(|session| async move { session.close().await })
            .await
    }
}

fn data_bits(bits: u8) -> tokio_serial::DataBits {
    match bits {
        5 => tokio_serial::DataBits::Five,
        6 => tokio_serial::DataBits::Six,
        7 => tokio_serial::DataBits::Seven,
        _ => tokio_serial::DataBits::Eight,
    }
}

fn parity(parity: Parity) -> tokio_serial::Parity {
    match parity {
        Parity::None => tokio_serial::Parity::None,
        Parity::Odd => tokio_serial::Parity::Odd,
        Parity::Even => tokio_serial::Parity::Even,
    }
}

fn stop_bits(bits: u8) -> tokio_serial::StopBits {
    match bits {
        2 => tokio_serial::StopBits::Two,
        _ => tokio_serial::StopBits::One,
    }
}
