//! Protocol module - Nordic Secure DFU control point definitions.

pub mod constants;
pub mod opcode;
pub mod response;

pub use constants::*;
pub use opcode::{ObjectType, Opcode, Request, ResultCode, extended_error_message};
pub use response::{
    ChecksumResponse, ControlResponse, ProtocolError, SelectResponse, parse_buttonless_response,
};
