//! Frame types shared by the transport, table, log and scheduler

use serde::{Deserialize, Serialize};

use crate::ValidationError;

/// Maximum payload length of a classic CAN frame.
pub const MAX_DLC: usize = 8;

/// Largest valid 11-bit identifier plus one.
pub const STANDARD_ID_LIMIT: u32 = 0x800;

/// Largest valid 29-bit identifier plus one.
pub const EXTENDED_ID_LIMIT: u32 = 0x2000_0000;

/// Identifier format selected by the operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameFormat {
    /// 11-bit identifier
    #[default]
    Standard,
    /// 29-bit identifier
    Extended,
}

impl FrameFormat {
    /// Exclusive upper bound of identifiers in this format.
    pub fn id_limit(self) -> u32 {
        match self {
            FrameFormat::Standard => STANDARD_ID_LIMIT,
            FrameFormat::Extended => EXTENDED_ID_LIMIT,
        }
    }

    /// Whether `id` fits this format.
    pub fn accepts_id(self, id: u32) -> bool {
        id < self.id_limit()
    }
}

/// Kind tag carried by every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameKind {
    StandardData,
    StandardRemote,
    ExtendedData,
    ExtendedRemote,
    Error,
}

impl FrameKind {
    pub fn new(format: FrameFormat, remote: bool) -> Self {
        match (format, remote) {
            (FrameFormat::Standard, false) => FrameKind::StandardData,
            (FrameFormat::Standard, true) => FrameKind::StandardRemote,
            (FrameFormat::Extended, false) => FrameKind::ExtendedData,
            (FrameFormat::Extended, true) => FrameKind::ExtendedRemote,
        }
    }

    /// Identifier format, `None` for error frames.
    pub fn format(self) -> Option<FrameFormat> {
        match self {
            FrameKind::StandardData | FrameKind::StandardRemote => Some(FrameFormat::Standard),
            FrameKind::ExtendedData | FrameKind::ExtendedRemote => Some(FrameFormat::Extended),
            FrameKind::Error => None,
        }
    }

    pub fn is_remote(self) -> bool {
        matches!(self, FrameKind::StandardRemote | FrameKind::ExtendedRemote)
    }

    pub fn is_error(self) -> bool {
        self == FrameKind::Error
    }
}

/// A single bus frame.
///
/// The payload lives inline so frames are `Copy` and cheap to fan out to
/// the table, the log and the statistics without allocation. Remote and
/// error frames keep their DLC but expose an empty payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame {
    id: u32,
    kind: FrameKind,
    dlc: u8,
    data: [u8; MAX_DLC],
}

impl Frame {
    /// Build a data frame, validating the identifier range and payload length.
    pub fn data(format: FrameFormat, id: u32, payload: &[u8]) -> Result<Self, ValidationError> {
        check_id(format, id)?;
        if payload.len() > MAX_DLC {
            return Err(ValidationError::PayloadTooLong { len: payload.len() });
        }
        let mut data = [0u8; MAX_DLC];
        data[..payload.len()].copy_from_slice(payload);
        Ok(Self { id, kind: FrameKind::new(format, false), dlc: payload.len() as u8, data })
    }

    /// Build a remote-request frame asking for `dlc` bytes.
    pub fn remote(format: FrameFormat, id: u32, dlc: u8) -> Result<Self, ValidationError> {
        check_id(format, id)?;
        if dlc as usize > MAX_DLC {
            return Err(ValidationError::InvalidLength { input: dlc.to_string() });
        }
        Ok(Self { id, kind: FrameKind::new(format, true), dlc, data: [0; MAX_DLC] })
    }

    /// Build an error-indication frame. The identifier carries the error class bits.
    pub fn error(id: u32) -> Self {
        Self { id, kind: FrameKind::Error, dlc: 0, data: [0; MAX_DLC] }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn kind(&self) -> FrameKind {
        self.kind
    }

    /// Data length code (requested length for remote frames).
    pub fn dlc(&self) -> u8 {
        self.dlc
    }

    /// Payload bytes; empty for remote and error frames.
    pub fn payload(&self) -> &[u8] {
        match self.kind {
            FrameKind::StandardData | FrameKind::ExtendedData => &self.data[..self.dlc as usize],
            _ => &[],
        }
    }

    pub fn is_error(&self) -> bool {
        self.kind.is_error()
    }

    pub fn is_remote(&self) -> bool {
        self.kind.is_remote()
    }
}

fn check_id(format: FrameFormat, id: u32) -> Result<(), ValidationError> {
    if format.accepts_id(id) {
        Ok(())
    } else {
        Err(ValidationError::IdOutOfRange { id, limit: format.id_limit() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_range_is_eleven_bits() {
        assert!(Frame::data(FrameFormat::Standard, 0x7FF, &[]).is_ok());
        assert!(matches!(
            Frame::data(FrameFormat::Standard, 0x800, &[]),
            Err(ValidationError::IdOutOfRange { id: 0x800, limit: 0x800 })
        ));
        assert!(Frame::data(FrameFormat::Extended, 0x1FFF_FFFF, &[]).is_ok());
        assert!(Frame::data(FrameFormat::Extended, 0x2000_0000, &[]).is_err());
    }

    #[test]
    fn payload_longer_than_eight_is_rejected() {
        let err = Frame::data(FrameFormat::Standard, 1, &[0; 9]).unwrap_err();
        assert!(matches!(err, ValidationError::PayloadTooLong { len: 9 }));
    }

    #[test]
    fn remote_frames_expose_no_payload() {
        let frame = Frame::remote(FrameFormat::Extended, 0x1234, 4).unwrap();
        assert_eq!(frame.kind(), FrameKind::ExtendedRemote);
        assert_eq!(frame.dlc(), 4);
        assert!(frame.payload().is_empty());
        assert!(frame.is_remote());
    }

    #[test]
    fn data_frame_keeps_payload() {
        let frame = Frame::data(FrameFormat::Standard, 0x123, &[1, 2, 3]).unwrap();
        assert_eq!(frame.payload(), &[1, 2, 3]);
        assert_eq!(frame.kind().format(), Some(FrameFormat::Standard));
        assert_eq!(Frame::error(0x4).kind().format(), None);
    }
}
