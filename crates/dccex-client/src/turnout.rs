//! Servo-driven turnouts.

use dccex_protocol::{Command, OpCode, Parameter};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::channel::Channel;
use crate::error::{Error, Result};

/// Identifier of a turnout.
pub type Id = u16;

/// Virtual pin a turnout servo is attached to.
pub type VPin = i32;

/// Servo position value.
pub type Position = u16;

/// A turnout state on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// The turnout is thrown.
    Thrown,
    /// The turnout is closed.
    Closed,
    /// Request to examine the turnout.
    Examine,
}

impl State {
    /// The wire character of this state.
    pub fn as_char(self) -> char {
        match self {
            State::Thrown => 'T',
            State::Closed => 'C',
            State::Examine => 'X',
        }
    }
}

impl From<State> for Parameter {
    fn from(state: State) -> Self {
        Parameter::Char(state.as_char())
    }
}

/// Servo motion profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Profile {
    /// Move instantly.
    Instant,
    /// Fast motion.
    Fast,
    /// Medium motion.
    Medium,
    /// Slow motion.
    Slow,
    /// Bouncing motion.
    Bounce,
}

impl Profile {
    fn from_ordinal(ordinal: u8) -> Option<Profile> {
        match ordinal {
            0 => Some(Profile::Instant),
            1 => Some(Profile::Fast),
            2 => Some(Profile::Medium),
            3 => Some(Profile::Slow),
            4 => Some(Profile::Bounce),
            _ => None,
        }
    }
}

impl From<Profile> for Parameter {
    fn from(profile: Profile) -> Self {
        Parameter::Int(profile as i64)
    }
}

/// Configuration and state of a servo turnout as reported by an examine
/// request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnoutServoStatus {
    /// Virtual pin the servo is attached to.
    pub vpin: VPin,
    /// Servo position when thrown.
    pub thrown_position: Position,
    /// Servo position when closed.
    pub closed_position: Position,
    /// Motion profile.
    pub profile: Profile,
    /// Current state character as reported by the station.
    pub state: char,
}

/// A servo-driven turnout addressed over the channel.
pub struct TurnoutServo<'a> {
    id: Id,
    channel: &'a Channel,
}

impl<'a> TurnoutServo<'a> {
    /// Create a handle for the turnout with the given id.
    pub fn new(id: Id, channel: &'a Channel) -> Self {
        TurnoutServo { id, channel }
    }

    /// Create the turnout on the station and persist its definition in the
    /// EEPROM.
    pub async fn persist(
        &self,
        cancel: &CancellationToken,
        vpin: VPin,
        thrown_position: Position,
        closed_position: Position,
        profile: Profile,
    ) -> Result<()> {
        let create = Command::new(
            OpCode::TURNOUT,
            "%d SERVO %d %d %d %d",
            vec![
                self.id.into(),
                vpin.into(),
                thrown_position.into(),
                closed_position.into(),
                profile.into(),
            ],
        );

        debug!("Persisting turnout {}", self.id);
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

    async fn set_state(&self, state: State) -> Result<()> {
        let command = Command::new(OpCode::TURNOUT, "%d %c", vec![self.id.into(), state.into()]);
        self.channel
            .session(|session| async move { session.write(&command).await })
            .await
    }

    /// Throw the turnout.
    pub async fn throw(&self) -> Result<()> {
        self.set_state(State::Thrown).await
    }

    /// Close the turnout.
    pub async fn close(&self) -> Result<()> {
        self.set_state(State::Closed).await
    }

    /// Examine the turnout's configuration and current state.
    pub async fn examine(&self, cancel: &CancellationToken) -> Result<TurnoutServoStatus> {
        let examine = Command::new(
            OpCode::TURNOUT,
            "%d %c",
            vec![self.id.into(), State::Examine.into()],
        );

        let response = self
            .channel
            .session(|session| async move {
                let mut replies = session.read_op_code(OpCode::TURNOUT_RESPONSE).await;
                let written = session.write(&examine).await;

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

        let vpin = parameters[2].parse().map_err(|_| {
            Error::invalid_response(&response, format!("invalid vpin {:?}", parameters[2]))
        })?;
        let thrown_position = parameters[3].parse().map_err(|_| {
            Error::invalid_response(
                &response,
                format!("invalid thrown position {:?}", parameters[3]),
            )
        })?;
        let closed_position = parameters[4].parse().map_err(|_| {
            Error::invalid_response(
                &response,
                format!("invalid closed position {:?}", parameters[4]),
            )
        })?;
        let profile = parameters[5]
            .parse()
            .ok()
            .and_then(Profile::from_ordinal)
            .ok_or_else(|| {
                Error::invalid_response(&response, format!("invalid profile {:?}", parameters[5]))
            })?;

        let mut state = parameters[6].chars();
        let state = match (state.next(), state.next()) {
            (Some(state), None) => state,
            _ => {
                return Err(Error::invalid_response(
                    &response,
                    format!("invalid state {:?}", parameters[6]),
                ))
            }
        };

        Ok(TurnoutServoStatus {
            vpin,
            thrown_position,
            closed_position,
            profile,
            state,
        })
    }
}
