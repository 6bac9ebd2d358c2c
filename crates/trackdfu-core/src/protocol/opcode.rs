//! Control point opcodes and result codes.

use std::fmt;

use byteorder::{ByteOrder, LittleEndian};

/// Control point operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    Create = 0x01,
    SetPrn = 0x02,
    CalculateChecksum = 0x03,
    Execute = 0x04,
    Select = 0x06,
}

impl Opcode {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(Opcode::Create),
            0x02 => Some(Opcode::SetPrn),
            0x03 => Some(Opcode::CalculateChecksum),
            0x04 => Some(Opcode::Execute),
            0x06 => Some(Opcode::Select),
            _ => None,
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Opcode::Create => write!(f, "CREATE"),
            Opcode::SetPrn => write!(f, "SET_PRN"),
            Opcode::CalculateChecksum => write!(f, "CALCULATE_CHECKSUM"),
            Opcode::Execute => write!(f, "EXECUTE"),
            Opcode::Select => write!(f, "SELECT"),
        }
    }
}

/// Kind of object on the bootloader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ObjectType {
    /// Init packet.
    Command = 0x01,
    /// Firmware data.
    Data = 0x02,
}

impl ObjectType {
    /// Label used in log lines and progress events.
    pub fn label(&self) -> &'static str {
        match self {
            ObjectType::Command => "init",
            ObjectType::Data => "firmware",
        }
    }
}

/// A control point request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Request {
    Create { object: ObjectType, size: u32 },
    SetPrn(u16),
    CalculateChecksum,
    Execute,
    Select(ObjectType),
}

impl Request {
    pub fn opcode(&self) -> Opcode {
        match self {
            Request::Create { .. } => Opcode::Create,
            Request::SetPrn(_) => Opcode::SetPrn,
            Request::CalculateChecksum => Opcode::CalculateChecksum,
            Request::Execute => Opcode::Execute,
            Request::Select(_) => Opcode::Select,
        }
    }

    /// Encode for a control point write.
    pub fn to_bytes(&self) -> Vec<u8> {
        let opcode = self.opcode() as u8;
        match *self {
            Request::Create { object, size } => {
                let mut buf = vec![opcode, object as u8, 0, 0, 0, 0];
                LittleEndian::write_u32(&mut buf[2..], size);
                buf
            }
            Request::SetPrn(prn) => {
                let mut buf = vec![opcode, 0, 0];
                LittleEndian::write_u16(&mut buf[1..], prn);
                buf
            }
            Request::CalculateChecksum | Request::Execute => vec![opcode],
            Request::Select(object) => vec![opcode, object as u8],
        }
    }
}

/// Result code of a control point response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultCode {
    Invalid,
    Success,
    OpcodeNotSupported,
    InvalidParameter,
    InsufficientResources,
    InvalidObject,
    UnsupportedType,
    OperationNotPermitted,
    OperationFailed,
    ExtendedError,
    Unknown(u8),
}

impl ResultCode {
    pub fn from_u8(value: u8) -> Self {
        match value {
            0x00 => ResultCode::Invalid,
            0x01 => ResultCode::Success,
            0x02 => ResultCode::OpcodeNotSupported,
            0x03 => ResultCode::InvalidParameter,
            0x04 => ResultCode::InsufficientResources,
            0x05 => ResultCode::InvalidObject,
            0x07 => ResultCode::UnsupportedType,
            0x08 => ResultCode::OperationNotPermitted,
            0x0A => ResultCode::OperationFailed,
            0x0B => ResultCode::ExtendedError,
            other => ResultCode::Unknown(other),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ResultCode::Success)
    }

    pub fn message(&self) -> &'static str {
        match self {
            ResultCode::Invalid => "Invalid opcode",
            ResultCode::Success => "Operation successful",
            ResultCode::OpcodeNotSupported => "Opcode not supported",
            ResultCode::InvalidParameter => "Missing or invalid parameter value",
            ResultCode::InsufficientResources => "Not enough memory for the data object",
            ResultCode::InvalidObject => {
                "Data object does not match the firmware and hardware requirements, the signature is wrong, or parsing the command failed"
            }
            ResultCode::UnsupportedType => "Not a valid object type for a Create request",
            ResultCode::OperationNotPermitted => {
                "The state of the DFU process does not allow this operation"
            }
            ResultCode::OperationFailed => "Operation failed",
            ResultCode::ExtendedError => "Extended error",
            ResultCode::Unknown(_) => "Unknown result code",
        }
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResultCode::Unknown(code) => write!(f, "Unknown result code 0x{:02X}", code),
            other => f.write_str(other.message()),
        }
    }
}

/// Message for an extended error code (third byte after `0x0B`).
pub fn extended_error_message(code: u8) -> &'static str {
    match code {
        0x00 => "No extended error code has been set",
        0x01 => "Invalid error code",
        0x02 => "The format of the command was incorrect",
        0x03 => "The command was parsed but is not supported or unknown",
        0x04 => "The init command is invalid for its update type",
        0x05 => "The firmware version is too low",
        0x06 => "The hardware version of the device does not match the update",
        0x07 => "The update does not support the current SoftDevice",
        0x08 => "The init packet is not signed but the bootloader requires a signature",
        0x09 => "The hash type in the init packet is not supported",
        0x0A => "The hash of the firmware image cannot be calculated",
        0x0B => "The signature type is unknown or not supported",
        0x0C => "The firmware hash does not match the hash in the init packet",
        0x0D => "Not enough space on the device for the firmware",
        _ => "Unknown extended error",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_encoding() {
        let req = Request::Create {
            object: ObjectType::Data,
            size: 0x1000,
        };
        assert_eq!(req.to_bytes(), vec![0x01, 0x02, 0x00, 0x10, 0x00, 0x00]);
    }

    #[test]
    fn test_short_requests() {
        assert_eq!(Request::SetPrn(0).to_bytes(), vec![0x02, 0x00, 0x00]);
        assert_eq!(Request::CalculateChecksum.to_bytes(), vec![0x03]);
        assert_eq!(Request::Execute.to_bytes(), vec![0x04]);
        assert_eq!(Request::Select(ObjectType::Command).to_bytes(), vec![0x06, 0x01]);
    }

    #[test]
    fn test_result_codes() {
        assert!(ResultCode::from_u8(0x01).is_success());
        assert_eq!(ResultCode::from_u8(0x0B), ResultCode::ExtendedError);
        assert_eq!(ResultCode::from_u8(0x06), ResultCode::Unknown(0x06));
        assert_eq!(ResultCode::Unknown(0x06).to_string(), "Unknown result code 0x06");
    }
}
