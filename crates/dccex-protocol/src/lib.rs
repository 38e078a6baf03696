//! DCC-EX Native Command Protocol Codec
//!
//! This crate provides types and utilities for the textual command protocol
//! spoken by DCC-EX command stations over a serial connection. Commands are
//! framed messages where each frame carries a single-character op code
//! followed by whitespace-separated parameters:
//!
//! ```text
//! <s>                     status request
//! <t 3 100 1>             cab 3, speed 100, forward
//! <@ 0 3 "Ready">         broadcast with a quoted parameter
//! ```
//!
//! Frames are delimited by `<` and `>` and optionally followed by a newline.
//! The same channel carries solicited replies and unsolicited broadcasts;
//! there is no request/response correlation on the wire.
//!
//! # Example
//!
//! ```rust
//! use dccex_protocol::{Command, OpCode, Parameter};
//!
//! // Build a command
//! let cmd = Command::new(
//!     OpCode::CAB_SPEED,
//!     "%d %d %d",
//!     vec![Parameter::Int(3), Parameter::Int(100), Parameter::Int(1)],
//! );
//! assert_eq!(cmd.to_string(), "<t 3 100 1>");
//!
//! // Parse an incoming frame body
//! let reply = Command::parse("# 12")?;
//! assert_eq!(reply.op_code(), OpCode::SUPPORTED_CABS);
//! # Ok::<(), dccex_protocol::CommandError>(())
//! ```

mod command;
mod error;
mod frame;

pub use command::*;
pub use error::*;
pub use frame::*;
