//! Async client for DCC-EX command stations.
//!
//! The command station speaks a framed textual protocol over a serial
//! connection. It accepts commands and emits asynchronous, unsolicited
//! responses and broadcasts on the same channel, with no request/response
//! correlation. This crate layers the coordination needed to use it
//! safely:
//!
//! - a protocol listener that reassembles frames and fans them out to
//!   subscribers by scope ([`protocol`]),
//! - a session gate that makes multi-frame conversations atomic with
//!   respect to each other ([`channel`]),
//! - entity handles for cabs, sensors, turnouts, outputs and the station
//!   itself, composing the two.
//!
//! # Example
//!
//! ```rust,no_run
//! use dccex_client::{Config, Connection};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> dccex_client::Result<()> {
//! let connection = Connection::open(&Config::new("/dev/ttyACM0"))?;
//! let station = connection.command_station();
//!
//! let cancel = CancellationToken::new();
//! station.ready(&cancel).await?;
//!
//! let cab = connection.cab(3);
//! cab.speed(100, dccex_client::cab::Direction::Forward).await?;
//! # Ok(())
//! # }
//! ```

pub mod cab;
pub mod channel;
pub mod config;
pub mod connection;
mod error;
pub mod output;
pub mod protocol;
pub mod sensor;
pub mod station;
pub mod turnout;

pub use config::{Config, Mode, Parity};
pub use connection::Connection;
pub use error::{Error, Result};

pub use dccex_protocol::{Command, CommandError, FrameCodec, OpCode, Parameter};
