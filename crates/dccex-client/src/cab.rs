//! Locomotive (cab) control.

use dccex_protocol::{Command, OpCode, Parameter};

use crate::channel::Channel;
use crate::error::Result;

/// DCC address of a cab.
pub type Address = u16;

/// Decoder function number.
pub type Function = u8;

/// Speed step: -1 for emergency stop, 0-127 otherwise.
pub type Speed = i8;

/// Travel direction of a cab.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Forward travel.
    Forward,
    /// Backward travel.
    Backward,
}

impl From<Direction> for Parameter {
    fn from(direction: Direction) -> Self {
        Parameter::Int(match direction {
            Direction::Forward => 0,
            Direction::Backward => 1,
        })
    }
}

/// On/off state of a decoder function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionState {
    /// Function off.
    Off,
    /// Function on.
    On,
}

impl From<FunctionState> for Parameter {
    fn from(state: FunctionState) -> Self {
        Parameter::Int(match state {
            FunctionState::Off => 0,
            FunctionState::On => 1,
        })
    }
}

/// A locomotive decoder addressed over the channel.
pub struct Cab<'a> {
    address: Address,
    channel: &'a Channel,
}

impl<'a> Cab<'a> {
    /// Create a handle for the cab at the given address.
    pub fn new(address: Address, channel: &'a Channel) -> Self {
        Cab { address, channel }
    }

    /// Set the cab's speed and direction.
    pub async fn speed(&self, speed: Speed, direction: Direction) -> Result<()> {
        let command = Command::new(
            OpCode::CAB_SPEED,
            "%d %d %d",
            vec![self.address.into(), speed.into(), direction.into()],
        );

        self.channel
            .session(|session| async move { session.write(&command).await })
            .await
    }

    /// Switch a decoder function on or off.
    pub async fn function(&self, function: Function, state: FunctionState) -> Result<()> {
        let command = Command::new(
            OpCode::CAB_FUNCTION,
            "%d %d %d",
            vec![self.address.into(), function.into(), state.into()],
        );

        self.channel
            .session(|session| async move { session.write(&command).await })
            .await
    }
}
