//! Digital input sensors.
//!
//! Sensors report their state asynchronously: the station broadcasts
//! `<Q ID>` when a sensor becomes active and `<q ID>` when it becomes
//! inactive.

use dccex_protocol::{Command, OpCode};
use tokio::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::channel::Channel;
use crate::error::{Error, Result};

/// Identifier of a sensor.
pub type Id = u16;

/// Virtual pin a sensor is attached to.
pub type VPin = i32;

/// A sensor state as broadcast by the station.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// The sensor is active.
    Active,
    /// The sensor is inactive.
    Inactive,
}

impl State {
    /// The op code broadcasting this state.
    pub fn op_code(self) -> OpCode {
        match self {
            State::Active => OpCode::SENSOR_ACTIVE,
            State::Inactive => OpCode::SENSOR_INACTIVE,
        }
    }

    /// The other state.
    pub fn opposite(self) -> State {
        match self {
            State::Active => State::Inactive,
            State::Inactive => State::Active,
        }
    }
}

/// Input pull-up configuration of a sensor pin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullUp {
    /// Pull-up disabled.
    Off,
    /// Pull-up enabled.
    On,
}

/// A digital input sensor addressed over the channel.
pub struct Sensor<'a> {
    id: Id,
    channel: &'a Channel,
}

impl<'a> Sensor<'a> {
    /// Create a handle for the sensor with the given id.
    pub fn new(id: Id, channel: &'a Channel) -> Self {
        Sensor { id, channel }
    }

    fn state_command(&self, state: State) -> Command {
        Command::new(state.op_code(), "%d", vec![self.id.into()])
    }

    /// Wait until the sensor broadcasts the given state.
    pub async fn wait(&self, cancel: &CancellationToken, state: State) -> Result<()> {
        let command = self.state_command(state);
        self.channel
            .rsession(|session| async move { session.wait_command(cancel, &command).await })
            .await
    }

    /// Wait until the sensor has held the given state continuously for
    /// `duration`.
    ///
    /// Helps with sensors whose readings flicker during a transition, e.g.
    /// block detection. A timer is armed on every sighting of the target
    /// state and disarmed on every sighting of the opposite state; the
    /// wait ends when the timer expires.
    pub async fn wait_consistent(
        &self,
        cancel: &CancellationToken,
        state: State,
        duration: Duration,
    ) -> Result<()> {
        let target = self.state_command(state).to_string();
        let opposite = self.state_command(state.opposite()).to_string();

        self.channel
            .rsession(|session| async move {
                let mut subscription = session.read().await;

                let timer = tokio::time::sleep(Duration::ZERO);
                tokio::pin!(timer);
                let mut armed = false;

                let result = loop {
                    tokio::select! {
                        received = subscription.recv() => match received {
                            Some(command) => {
                                let rendered = command.to_string();
                                if rendered == target {
                                    timer.as_mut().reset(Instant::now() + duration);
                                    armed = true;
                                } else if rendered == opposite {
                                    armed = false;
                                }
                            }
                            None => break Err(Error::TransportClosed),
                        },
                        _ = timer.as_mut(), if armed => break Ok(()),
                        _ = cancel.cancelled() => break Err(Error::Cancelled),
                    }
                };

                subscription.cleanup().await;
                result
            })
            .await
    }

    /// Create the sensor on the station and persist its definition in the
    /// EEPROM.
    pub async fn persist(&self, cancel: &CancellationToken, vpin: VPin, pull_up: PullUp) -> Result<()> {
        let create = Command::new(
            OpCode::SENSOR_CREATE,
            "%d %d %d",
            vec![self.id.into(), vpin.into(), (pull_up as u8).into()],
        );

        debug!("Persisting sensor {}", self.id);
        self.channel
            .session(|session| async move {
                let mut success = session.read_op_code(OpCode::SUCCESS).await;

                let written = async {
                    session.write(&create).await?;
                    session.write(&Command::new(OpCode::EEPROM, "", vec![])).await
                }
                .await;

                let result = match written {
                    Ok(()) => tokio::select! {
                        observed = success.recv() => match observed {
                            Some(_) => Ok(()),
                            None => Err(Error::TransportClosed),
                        },
                        _ = cancel.cancelled() => Err(Error::Cancelled),
                    },
                    Err(error) => Err(error),
                };

                success.cleanup().await;
                result
            })
            .await
    }

    /// Whether the station currently lists this sensor as active.
    ///
    /// Requests the active-sensor listing followed by a control command;
    /// the station answers the listing and then fails the control command,
    /// which bounds the output.
    pub async fn active(&self, cancel: &CancellationToken) -> Result<bool> {
        let id = self.id;

        self.channel
            .session(|session| async move {
                let mut subscription = session.read().await;
                let written = session.write(&Command::control(State::Active.op_code())).await;

                let result = match written {
                    Err(error) => Err(error),
                    Ok(()) => {
                        let mut active = false;
                        loop {
                            tokio::select! {
                                received = subscription.recv() => match received {
                                    Some(command) => {
                                        if command.op_code() == OpCode::FAIL {
                                            break Ok(active);
                                        }

                                        if command.op_code() == State::Active.op_code() {
                                            if let Ok(parameters) = command.parameter_strings() {
                                                if parameters.len() == 1
                                                    && parameters[0] == id.to_string()
                                                {
                                                    active = true;
                                                }
                                            }
                                        }
                                    }
                                    None => break Err(Error::TransportClosed),
                                },
                                _ = cancel.cancelled() => break Err(Error::Cancelled),
                            }
                        }
                    }
                };

                subscription.cleanup().await;
                result
            })
            .await
    }
}
