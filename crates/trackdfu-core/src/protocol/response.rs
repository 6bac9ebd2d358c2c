//! Control point response parsing.

use byteorder::{LittleEndian, ReadBytesExt};
use std::io::Cursor;
use thiserror::Error;

use super::constants::{BUTTONLESS_RESPONSE_CODE, BUTTONLESS_SUCCESS, RESPONSE_CODE};
use super::opcode::{Opcode, ResultCode, extended_error_message};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Response too short: expected {expected}, got {actual}")]
    TooShort { expected: usize, actual: usize },

    #[error("Unexpected response code 0x{0:02X}")]
    UnexpectedResponseCode(u8),

    #[error("Response for opcode 0x{actual:02X}, expected {expected}")]
    OpcodeMismatch { expected: Opcode, actual: u8 },

    #[error("{0}")]
    Rejected(ResultCode),

    #[error("Extended error 0x{0:02X}: {}", extended_error_message(*.0))]
    Extended(u8),

    #[error("Buttonless DFU failed with status 0x{0:02X}")]
    Buttonless(u8),
}

/// A successful control point response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlResponse {
    pub opcode: Opcode,
    /// Bytes after the result code.
    pub payload: Vec<u8>,
}

impl ControlResponse {
    /// Parse a notification answering `expected`.
    pub fn parse(data: &[u8], expected: Opcode) -> Result<Self, ProtocolError> {
        if data.len() < 3 {
            return Err(ProtocolError::TooShort {
                expected: 3,
                actual: data.len(),
            });
        }
        if data[0] != RESPONSE_CODE {
            return Err(ProtocolError::UnexpectedResponseCode(data[0]));
        }
        if data[1] != expected as u8 {
            return Err(ProtocolError::OpcodeMismatch {
                expected,
                actual: data[1],
            });
        }

        match ResultCode::from_u8(data[2]) {
            ResultCode::Success => Ok(Self {
                opcode: expected,
                payload: data[3..].to_vec(),
            }),
            ResultCode::ExtendedError => {
                Err(ProtocolError::Extended(data.get(3).copied().unwrap_or(0)))
            }
            other => Err(ProtocolError::Rejected(other)),
        }
    }
}

/// Payload of a SELECT response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectResponse {
    /// Largest object the bootloader accepts.
    pub max_size: u32,
    /// Bytes of the current object already received.
    pub offset: u32,
    /// CRC-32 over the received bytes.
    pub crc: u32,
}

impl SelectResponse {
    pub const SIZE: usize = 12;

    pub fn parse(payload: &[u8]) -> Result<Self, ProtocolError> {
        if payload.len() < Self::SIZE {
            return Err(ProtocolError::TooShort {
                expected: Self::SIZE,
                actual: payload.len(),
            });
        }
        let mut cursor = Cursor::new(payload);
        let too_short = |_| ProtocolError::TooShort {
            expected: Self::SIZE,
            actual: payload.len(),
        };
        Ok(Self {
            max_size: cursor.read_u32::<LittleEndian>().map_err(too_short)?,
            offset: cursor.read_u32::<LittleEndian>().map_err(too_short)?,
            crc: cursor.read_u32::<LittleEndian>().map_err(too_short)?,
        })
    }
}

/// Payload of a CALCULATE_CHECKSUM response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChecksumResponse {
    pub offset: u32,
    pub crc: u32,
}

impl ChecksumResponse {
    pub const SIZE: usize = 8;

    pub fn parse(payload: &[u8]) -> Result<Self, ProtocolError> {
        if payload.len() < Self::SIZE {
            return Err(ProtocolError::TooShort {
                expected: Self::SIZE,
                actual: payload.len(),
            });
        }
        let mut cursor = Cursor::new(payload);
        let too_short = |_| ProtocolError::TooShort {
            expected: Self::SIZE,
            actual: payload.len(),
        };
        Ok(Self {
            offset: cursor.read_u32::<LittleEndian>().map_err(too_short)?,
            crc: cursor.read_u32::<LittleEndian>().map_err(too_short)?,
        })
    }
}

/// Check the notification answering a buttonless "enter bootloader" write.
pub fn parse_buttonless_response(data: &[u8]) -> Result<(), ProtocolError> {
    if data.len() < 3 {
        return Err(ProtocolError::TooShort {
            expected: 3,
            actual: data.len(),
        });
    }
    if data[0] != BUTTONLESS_RESPONSE_CODE {
        return Err(ProtocolError::UnexpectedResponseCode(data[0]));
    }
    if data[2] != BUTTONLESS_SUCCESS {
        return Err(ProtocolError::Buttonless(data[2]));
    }
    Ok(())
}
