//! The fixed 9-byte frame header (§3, §4.2).

use crate::error::{Error, Result};

pub const HEADER_LEN: usize = 9;

pub const FLAG_COMPRESSION: u8 = 0x01;
pub const FLAG_TRACING: u8 = 0x02;

/// Stream id reserved for server-initiated `EVENT` frames.
pub const EVENT_STREAM_ID: i16 = 0;

/// Recognized request opcodes (§6).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum RequestOpcode {
    Startup = 0x01,
    Options = 0x05,
    Query = 0x07,
    Prepare = 0x09,
    Execute = 0x0A,
    Register = 0x0B,
    Batch = 0x0D,
    AuthResponse = 0x0F,
}

/// Recognized response opcodes (§4.2).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum ResponseOpcode {
    Error = 0x00,
    Ready = 0x02,
    Authenticate = 0x03,
    Supported = 0x06,
    Result = 0x08,
    Event = 0x0C,
    AuthChallenge = 0x0E,
    AuthSuccess = 0x10,
}

impl ResponseOpcode {
    pub fn from_byte(b: u8) -> Result<Self> {
        Ok(match b {
            0x00 => ResponseOpcode::Error,
            0x02 => ResponseOpcode::Ready,
            0x03 => ResponseOpcode::Authenticate,
            0x06 => ResponseOpcode::Supported,
            0x08 => ResponseOpcode::Result,
            0x0C => ResponseOpcode::Event,
            0x0E => ResponseOpcode::AuthChallenge,
            0x10 => ResponseOpcode::AuthSuccess,
            other => {
                return Err(Error::protocol(format!(
                    "unrecognized response opcode {other:#04x}"
                )))
            }
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Request,
    Response,
}

/// Protocol version byte: high bit is direction, low 7 bits are the version number.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Version(pub u8);

impl Version {
    pub const PROTOCOL_V4_REQUEST: Version = Version(0x04);
    pub const PROTOCOL_V4_RESPONSE: Version = Version(0x84);

    pub fn direction(self) -> Direction {
        if self.0 & 0x80 == 0 {
            Direction::Request
        } else {
            Direction::Response
        }
    }

    pub fn protocol_version(self) -> u8 {
        self.0 & 0x7f
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Flags(pub u8);

impl Flags {
    pub fn compression(self) -> bool {
        self.0 & FLAG_COMPRESSION != 0
    }

    pub fn tracing(self) -> bool {
        self.0 & FLAG_TRACING != 0
    }

    pub fn with_compression(mut self, on: bool) -> Self {
        if on {
            self.0 |= FLAG_COMPRESSION;
        } else {
            self.0 &= !FLAG_COMPRESSION;
        }
        self
    }

    pub fn with_tracing(mut self, on: bool) -> Self {
        if on {
            self.0 |= FLAG_TRACING;
        } else {
            self.0 &= !FLAG_TRACING;
        }
        self
    }
}

/// The fixed 9-byte frame header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Header {
    pub version: Version,
    pub flags: Flags,
    pub stream: i16,
    pub opcode: u8,
    pub body_len: u32,
}

impl Header {
    pub fn encode(self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[0] = self.version.0;
        out[1] = self.flags.0;
        out[2..4].copy_from_slice(&self.stream.to_be_bytes());
        out[4] = self.opcode;
        out[5..9].copy_from_slice(&self.body_len.to_be_bytes());
        out
    }

    pub fn decode(raw: &[u8; HEADER_LEN]) -> Self {
        Header {
            version: Version(raw[0]),
            flags: Flags(raw[1]),
            stream: i16::from_be_bytes([raw[2], raw[3]]),
            opcode: raw[4],
            body_len: u32::from_be_bytes([raw[5], raw[6], raw[7], raw[8]]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trip_supported() {
        let header = Header {
            version: Version::PROTOCOL_V4_RESPONSE,
            flags: Flags(0),
            stream: 0,
            opcode: ResponseOpcode::Supported as u8,
            body_len: 0,
        };
        let encoded = header.encode();
        assert_eq!(encoded, [0x84, 0x00, 0x00, 0x00, 0x06, 0x00, 0x00, 0x00, 0x00]);
        assert_eq!(Header::decode(&encoded), header);
    }

    #[test]
    fn version_direction_and_number() {
        assert_eq!(Version(0x04).direction(), Direction::Request);
        assert_eq!(Version(0x04).protocol_version(), 4);
        assert_eq!(Version(0x84).direction(), Direction::Response);
        assert_eq!(Version(0x84).protocol_version(), 4);
    }

    #[test]
    fn flags_roundtrip() {
        let f = Flags::default().with_compression(true).with_tracing(true);
        assert!(f.compression());
        assert!(f.tracing());
        let f = f.with_compression(false);
        assert!(!f.compression());
        assert!(f.tracing());
    }

    #[test]
    fn unrecognized_opcode_is_protocol_error() {
        assert!(ResponseOpcode::from_byte(0x7f).is_err());
    }
}
