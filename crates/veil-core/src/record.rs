use thiserror::Error;

/// Length of the record header: type, wire version, payload length.
pub const RECORD_HEADER_LEN: usize = 5;

/// Maximum payload a single record may declare, ciphertext expansion
/// included. Anything larger fails closed before allocation.
pub const MAX_RECORD_PAYLOAD: usize = 16 * 1024 + 256;

/// Wire version tag carried by every record.
pub const WIRE_VERSION: u16 = 0x5601;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RecordError {
    #[error("record header needs {need} bytes, only {have} available")]
    Incomplete { need: usize, have: usize },
    #[error("unknown record type {0:#04x}")]
    UnknownType(u8),
    #[error("unsupported wire version {0:#06x}")]
    VersionMismatch(u16),
    #[error("record declares {0} payload bytes, beyond protocol limits")]
    PayloadTooLarge(usize),
}

/// Content carried by a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RecordType {
    Handshake = 0x16,
    ApplicationData = 0x17,
}

impl TryFrom<u8> for RecordType {
    type Error = RecordError;

    fn try_from(value: u8) -> Result<Self, RecordError> {
        match value {
            0x16 => Ok(RecordType::Handshake),
            0x17 => Ok(RecordType::ApplicationData),
            other => Err(RecordError::UnknownType(other)),
        }
    }
}

/// Parsed record header. The length field must exactly match the encoded
/// payload length; consumers verify that before trusting a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    pub record_type: RecordType,
    pub payload_len: usize,
}

impl RecordHeader {
    pub fn new(record_type: RecordType, payload_len: usize) -> Result<Self, RecordError> {
        if payload_len > MAX_RECORD_PAYLOAD {
            return Err(RecordError::PayloadTooLarge(payload_len));
        }
        Ok(Self {
            record_type,
            payload_len,
        })
    }

    pub fn encode(&self) -> [u8; RECORD_HEADER_LEN] {
        let mut header = [0u8; RECORD_HEADER_LEN];
        header[0] = self.record_type as u8;
        header[1..3].copy_from_slice(&WIRE_VERSION.to_be_bytes());
        header[3..5].copy_from_slice(&(self.payload_len as u16).to_be_bytes());
        header
    }

    /// Parse a header from the front of `bytes` without consuming anything.
    /// Fewer than five bytes is reported as [`RecordError::Incomplete`] so
    /// the caller can wait for more input.
    pub fn decode(bytes: &[u8]) -> Result<Self, RecordError> {
        if bytes.len() < RECORD_HEADER_LEN {
            return Err(RecordError::Incomplete {
                need: RECORD_HEADER_LEN,
                have: bytes.len(),
            });
        }

        let record_type = RecordType::try_from(bytes[0])?;
        let version = u16::from_be_bytes([bytes[1], bytes[2]]);
        if version != WIRE_VERSION {
            return Err(RecordError::VersionMismatch(version));
        }

        let payload_len = u16::from_be_bytes([bytes[3], bytes[4]]) as usize;
        if payload_len > MAX_RECORD_PAYLOAD {
            return Err(RecordError::PayloadTooLarge(payload_len));
        }

        Ok(Self {
            record_type,
            payload_len,
        })
    }

    /// Total record size on the wire, header included.
    pub fn total_len(&self) -> usize {
        RECORD_HEADER_LEN + self.payload_len
    }
}
