//! Digital and analog outputs on the virtual pin space.

use dccex_protocol::{Command, OpCode, Parameter};
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::channel::Channel;
use crate::error::{Error, Result};

/// Identifier of a defined output.
pub type Id = u16;

/// Virtual pin of an output.
pub type VPin = u16;

/// Analog output value.
pub type AnalogValue = u16;

/// Flag byte of a defined output.
pub type IFlag = u8;

/// Analog output profile.
pub type Profile = u16;

/// Profile flag that keeps the pin powered after the value is reached.
pub const PROFILE_NO_POWER_OFF: Profile = 0x80;

/// Lowest LED brightness.
pub const LED_LOW: AnalogValue = 0;

/// Highest LED brightness.
pub const LED_HIGH: AnalogValue = 4095;

/// Digital pin level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigitalValue {
    /// Pin low.
    Low,
    /// Pin high.
    High,
}

impl DigitalValue {
    /// The wire character of this level.
    pub fn as_char(self) -> char {
        match self {
            DigitalValue::Low => '0',
            DigitalValue::High => '1',
        }
    }

    fn from_char(value: char) -> Option<DigitalValue> {
        match value {
            '0' => Some(DigitalValue::Low),
            '1' => Some(DigitalValue::High),
            _ => None,
        }
    }
}

impl From<DigitalValue> for Parameter {
    fn from(value: DigitalValue) -> Self {
        Parameter::Char(value.as_char())
    }
}

/// Configuration and state of a defined output as reported by the station.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputStatus {
    /// Virtual pin of the output.
    pub vpin: VPin,
    /// Flag byte the output was defined with.
    pub iflag: IFlag,
    /// Current pin level.
    pub state: DigitalValue,
}

/// A defined output addressed over the channel.
pub struct Output<'a> {
    id: Id,
    channel: &'a Channel,
}

impl<'a> Output<'a> {
    /// Create a handle for the output with the given id.
    pub fn new(id: Id, channel: &'a Channel) -> Self {
        Output { id, channel }
    }

    /// Define the output on the station and persist it in the EEPROM.
    ///
    /// Runs under a success-monitored session: a failure reply anywhere in
    /// the conversation surfaces as an error naming the rejected command.
    pub async fn persist(&self, cancel: &CancellationToken, vpin: VPin, iflag: IFlag) -> Result<()> {
        let create = Command::new(
            OpCode::OUTPUT,
            "%d %d %d",
            vec![self.id.into(), vpin.into(), iflag.into()],
        );

        debug!("Persisting output {}", self.id);
        self.channel
            .session_success(cancel, |session| async move {
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

    async fn set(&self, value: DigitalValue) -> Result<()> {
        let command = Command::new(OpCode::OUTPUT, "%d %c", vec![self.id.into(), value.into()]);
        self.channel
            .session(|session| async move { session.write(&command).await })
            .await
    }

    /// Drive the output high.
    pub async fn high(&self) -> Result<()> {
        self.set(DigitalValue::High).await
    }

    /// Drive the output low.
    pub async fn low(&self) -> Result<()> {
        self.set(DigitalValue::Low).await
    }

    /// Request the output's definition and current state.
    ///
    /// Requests the output listing followed by a control command; the
    /// station answers the listing and then fails the control command,
    /// which bounds the output.
    pub async fn status(&self, cancel: &CancellationToken) -> Result<OutputStatus> {
        let id = self.id;

        let status = self
            .channel
            .session(|session| async move {
                let mut subscription = session.read().await;
                let written = session.write(&Command::control(OpCode::OUTPUT)).await;

                let result = match written {
                    Err(error) => Err(error),
                    Ok(()) => {
                        let mut status = None;
                        loop {
                            tokio::select! {
                                received = subscription.recv() => match received {
                                    Some(command) => {
                                        if command.op_code() == OpCode::FAIL {
                                            break Ok(status);
                                        }

                                        if command.op_code() == OpCode::OUTPUT_RESPONSE {
                                            match parse_status(id, &command) {
                                                Ok(Some(parsed)) => status = Some(parsed),
                                                Ok(None) => {}
                                                Err(error) => break Err(error),
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
            .await?;

        status.ok_or_else(|| {
            Error::invalid_response(format!("output {}", self.id), "status not reported")
        })
    }
}

/// Parse a `Y` reply if it belongs to the given output.
fn parse_status(id: Id, command: &Command) -> Result<Option<OutputStatus>> {
    let Ok(parameters) = command.parameter_strings() else {
        return Ok(None);
    };

    if parameters.len() != 4 || parameters[0] != id.to_string() {
        return Ok(None);
    }

    let vpin = parameters[1].parse().map_err(|_| {
        Error::invalid_response(command, format!("invalid vpin {:?}", parameters[1]))
    })?;
    let iflag = parameters[2].parse().map_err(|_| {
        Error::invalid_response(command, format!("invalid iflag {:?}", parameters[2]))
    })?;

    let mut state_chars = parameters[3].chars();
    let state = match (state_chars.next(), state_chars.next()) {
        (Some(state), None) => DigitalValue::from_char(state),
        _ => None,
    }
    .ok_or_else(|| {
        Error::invalid_response(command, format!("invalid state {:?}", parameters[3]))
    })?;

    Ok(Some(OutputStatus { vpin, iflag, state }))
}

/// Direct virtual pin control, without a defined output.
pub struct OutputHeadless<'a> {
    channel: &'a Channel,
}

impl<'a> OutputHeadless<'a> {
    /// Create a handle for direct pin control over the channel.
    pub fn new(channel: &'a Channel) -> Self {
        OutputHeadless { channel }
    }

    /// Set a digital value on a virtual pin.
    pub async fn set(&self, vpin: VPin, value: DigitalValue) -> Result<()> {
        let prefix = match value {
            DigitalValue::Low => "-",
            DigitalValue::High => "",
        };

        let command = Command::new(
            OpCode::OUTPUT_CONTROL,
            "%s%d",
            vec![prefix.into(), vpin.into()],
        );
        self.channel
            .session(|session| async move { session.write(&command).await })
            .await
    }

    /// Set an analog value on a virtual pin using the given profile.
    pub async fn set_analog(&self, vpin: VPin, value: AnalogValue, profile: Profile) -> Result<()> {
        let command = Command::new(
            OpCode::OUTPUT_CONTROL,
            "%d %d %d",
            vec![vpin.into(), value.into(), profile.into()],
        );
        self.channel
            .session(|session| async move { session.write(&command).await })
            .await
    }

    /// Set an analog value on a virtual pin, ramping over the given
    /// duration.
    pub async fn set_analog_duration(
        &self,
        vpin: VPin,
        value: AnalogValue,
        profile: Profile,
        duration: Duration,
    ) -> Result<()> {
        // The station expects the duration in 100 ms units.
        let ticks = (duration.as_millis() / 100) as i64;
        let command = Command::new(
            OpCode::OUTPUT_CONTROL,
            "%d %d %d %d",
            vec![
                vpin.into(),
                value.into(),
                profile.into(),
                Parameter::Int(ticks),
            ],
        );
        self.channel
            .session(|session| async move { session.write(&command).await })
            .await
    }
}
