//! Command station wide operations.

use dccex_protocol::{Command, OpCode, Parameter};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::channel::Channel;
use crate::error::{Error, Result};
use crate::protocol::{Protocol, Subscription};

/// Track power state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerState {
    /// Power off.
    Off,
    /// Power on.
    On,
}

impl PowerState {
    /// The op code carrying this power state.
    pub fn op_code(self) -> OpCode {
        match self {
            PowerState::Off => OpCode::new('0'),
            PowerState::On => OpCode::new('1'),
        }
    }
}

/// A track selector for per-track power control.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Track {
    /// The main track.
    Main,
    /// The programming track.
    Prog,
    /// Both tracks joined.
    Join,
}

impl Track {
    /// The track name as it appears on the wire.
    pub fn as_str(self) -> &'static str {
        match self {
            Track::Main => "MAIN",
            Track::Prog => "PROG",
            Track::Join => "JOIN",
        }
    }
}

/// Version and hardware information reported by the station.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    /// Firmware version, e.g. `V-5.4.0`.
    pub version: String,
    /// Microprocessor type, e.g. `MEGA`.
    pub microprocessor_type: String,
    /// Motor controller type, e.g. `EX8874`.
    pub motorcontroller_type: String,
    /// Firmware build number, e.g. `G-c389fe9`.
    pub build_number: String,
}

/// The command station itself.
pub struct CommandStation<'a> {
    channel: &'a Channel,
}

impl<'a> CommandStation<'a> {
    /// Create a handle for the station behind the channel.
    pub fn new(channel: &'a Channel) -> Self {
        CommandStation { channel }
    }

    /// Set the global track power.
    pub async fn power(&self, state: PowerState) -> Result<()> {
        let command = Command::new(state.op_code(), "", vec![]);
        self.channel
            .session(|session| async move { session.write(&command).await })
            .await
    }

    /// Set the power of a single track.
    pub async fn power_track(&self, state: PowerState, track: Track) -> Result<()> {
        let command = Command::new(state.op_code(), "%s", vec![track.as_str().into()]);
        self.channel
            .session(|session| async move { session.write(&command).await })
            .await
    }

    /// Wait for the ready broadcast the station emits once it accepts
    /// commands.
    pub async fn ready(&self, cancel: &CancellationToken) -> Result<()> {
        let ready = Command::new(OpCode::INFO, "%d %d %q", vec![Parameter::Int(0), Parameter::Int(3), "Ready".into()]);
        self.channel
            .rsession(|session| async move { session.wait_command(cancel, &ready).await })
            .await
    }

    /// Request the station's version and hardware information.
    pub async fn status(&self, cancel: &CancellationToken) -> Result<Status> {
        let response = self
            .channel
            .session(|session| async move {
                let mut replies = session.read_op_code(OpCode::STATUS_RESPONSE).await;
                let written = session.write(&Command::new(OpCode::STATUS, "", vec![])).await;

                let result = match written {
                    Ok(()) => tokio::select! {
                        received = replies.recv() => received.ok_or(Error::TransportClosed),
                        _ = cancel.cancelled() => Err(Error::Cancelled),
                    },
                    Err(error) => Err(error),
                };

                replies.cleanup().await;
                result
            })
            .await?;

        let parameters = response.parameter_strings()?;
        if parameters.len() != 7 {
            return Err(Error::invalid_response(&response, "expected 7 parameters"));
        }

        let status = Status {
            version: parameters[1].clone(),
            microprocessor_type: parameters[3].clone(),
            motorcontroller_type: parameters[5].clone(),
            build_number: parameters[6].clone(),
        };

        debug!("Station reported status {:?}", status);
        Ok(status)
    }

    /// Request the number of cabs the station supports.
    pub async fn supported_cabs(&self, cancel: &CancellationToken) -> Result<u32> {
        let response = self
            .channel
            .session(|session| async move {
                let mut replies = session.read_op_code(OpCode::SUPPORTED_CABS).await;
                let written = session
                    .write(&Command::new(OpCode::SUPPORTED_CABS, "", vec![]))
                    .await;

                let result = match written {
                    Ok(()) => tokio::select! {
                        received = replies.recv() => received.ok_or(Error::TransportClosed),
                        _ = cancel.cancelled() => Err(Error::Cancelled),
                    },
                    Err(error) => Err(error),
                };

                replies.cleanup().await;
                result
            })
            .await?;

        let parameters = response.parameter_strings()?;
        if parameters.len() != 1 {
            return Err(Error::invalid_response(&response, "expected 1 parameter"));
        }

        parameters[0].parse().map_err(|_| {
            Error::invalid_response(
                &response,
                format!("invalid supported cab count {:?}", parameters[0]),
            )
        })
    }

    /// Open a console on the station: the raw stream of every incoming
    /// command plus an ungated writer.
    ///
    /// The console bypasses session serialization; writing through it can
    /// influence concurrent sessions. Use it with care.
    pub async fn console(&self) -> Console<'a> {
        Console {
            subscription: self.channel.protocol().read().await,
            protocol: self.channel.protocol(),
        }
    }
}

/// Raw access to the command stream, outside any session.
pub struct Console<'a> {
    subscription: Subscription<Command>,
    protocol: &'a Protocol,
}

impl Console<'_> {
    /// Receive the next incoming command.
    pub async fn recv(&mut self) -> Option<Command> {
        self.subscription.recv().await
    }

    /// Write a command, unserialized with respect to sessions.
    pub async fn write(&self, command: &Command) -> Result<()> {
        self.protocol.write(command).await
    }

    /// Settle the console's subscription.
    pub async fn cleanup(self) {
        self.subscription.cleanup().await;
    }
}
