//! Binary message frame.
//!
//! Layout, network byte order for multi-byte fields:
//!
//! ```text
//! [magic:1][version:1][control:1][sequence_id:8][source:N][0x00][body:rest]
//! ```
//!
//! `magic` and `version` must match between all communicating roles; a
//! mismatch is rejected before the frame is otherwise interpreted.

use crate::address::{AddressError, SourceAddress};

/// Sentinel byte identifying an edgebus frame.
pub const FRAME_MAGIC: u8 = 0xED;

/// Protocol version byte.
pub const FRAME_VERSION: u8 = 0x01;

/// Terminator byte ending the source identifier.
pub const SOURCE_TERMINATOR: u8 = 0x00;

/// Smallest well-formed frame: fixed header plus the source terminator.
pub const MIN_FRAME_LEN: usize = 12;

/// Message kind discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ControlVar {
    /// Application payload.
    Data = 0x01,
    /// Liveness probe, answered by [`ControlVar::Pong`].
    Ping = 0x02,
    /// Liveness probe answer.
    Pong = 0x03,
}

impl ControlVar {
    fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(Self::Data),
            0x02 => Some(Self::Ping),
            0x03 => Some(Self::Pong),
            _ => None,
        }
    }
}

/// A decoded message envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Message kind.
    pub control: ControlVar,
    /// Correlation id, unique per outgoing call from a given source.
    pub sequence_id: u64,
    /// Identifier of the virtual sub-device that produced or targets the
    /// message, `nodeId[:groupId[:majorId[:minorId]]]`.
    pub source: String,
    /// Opaque payload.
    pub body: Vec<u8>,
}

impl Message {
    /// Create a data message.
    #[must_use]
    pub fn data(source: impl Into<String>, sequence_id: u64, body: Vec<u8>) -> Self {
        Self {
            control: ControlVar::Data,
            sequence_id,
            source: source.into(),
            body,
        }
    }

    /// Create a ping probe sourced from `node_id`.
    #[must_use]
    pub fn ping(node_id: impl Into<String>, sequence_id: u64) -> Self {
        Self {
            control: ControlVar::Ping,
            sequence_id,
            source: node_id.into(),
            body: Vec::new(),
        }
    }

    /// Create the pong answer to a ping, echoing its sequence id.
    #[must_use]
    pub fn pong(node_id: impl Into<String>, sequence_id: u64) -> Self {
        Self {
            control: ControlVar::Pong,
            sequence_id,
            source: node_id.into(),
            body: Vec::new(),
        }
    }

    /// Encode to wire bytes.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(MIN_FRAME_LEN + self.source.len() + self.body.len());
        bytes.push(FRAME_MAGIC);
        bytes.push(FRAME_VERSION);
        bytes.push(self.control as u8);
        bytes.extend_from_slice(&self.sequence_id.to_be_bytes());
        bytes.extend_from_slice(self.source.as_bytes());
        bytes.push(SOURCE_TERMINATOR);
        bytes.extend_from_slice(&self.body);
        bytes
    }

    /// Decode from wire bytes.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError`] if the buffer is shorter than
    /// [`MIN_FRAME_LEN`], the magic, version or control byte is wrong, the
    /// source terminator is missing, or the source is not UTF-8.
    pub fn decode(bytes: &[u8]) -> Result<Self, FrameError> {
        if bytes.len() < MIN_FRAME_LEN {
            return Err(FrameError::Truncated { len: bytes.len() });
        }
        if bytes[0] != FRAME_MAGIC {
            return Err(FrameError::BadMagic(bytes[0]));
        }
        if bytes[1] != FRAME_VERSION {
            return Err(FrameError::BadVersion(bytes[1]));
        }
        let control = ControlVar::from_byte(bytes[2]).ok_or(FrameError::BadControl(bytes[2]))?;
        let sequence_id = u64::from_be_bytes(
            bytes[3..11]
                .try_into()
                .map_err(|_| FrameError::Truncated { len: bytes.len() })?,
        );
        let rest = &bytes[11..];
        let terminator = rest
            .iter()
            .position(|&b| b == SOURCE_TERMINATOR)
            .ok_or(FrameError::MissingTerminator)?;
        let source = std::str::from_utf8(&rest[..terminator])
            .map_err(|_| FrameError::SourceNotUtf8)?
            .to_string();
        let body = rest[terminator + 1..].to_vec();

        Ok(Self {
            control,
            sequence_id,
            source,
            body,
        })
    }

    /// Cheap pre-filter for the hot receive path: length, magic and version
    /// only. Used to discard foreign traffic on a shared broker before a
    /// full decode.
    #[must_use]
    pub fn validate(bytes: &[u8]) -> bool {
        bytes.len() >= MIN_FRAME_LEN && bytes[0] == FRAME_MAGIC && bytes[1] == FRAME_VERSION
    }

    /// Parse the source identifier into its components.
    ///
    /// # Errors
    ///
    /// Returns error if the source string is not a well-formed address.
    pub fn source_address(&self) -> Result<SourceAddress, AddressError> {
        SourceAddress::parse(&self.source)
    }
}

/// Errors raised while decoding a frame.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    /// Buffer shorter than the minimum frame size
    #[error("frame truncated: {len} bytes")]
    Truncated {
        /// Observed buffer length
        len: usize,
    },
    /// Wrong magic byte
    #[error("bad magic byte: 0x{0:02X}")]
    BadMagic(u8),
    /// Wrong protocol version
    #[error("unsupported protocol version: 0x{0:02X}")]
    BadVersion(u8),
    /// Unknown control byte
    #[error("unknown control byte: 0x{0:02X}")]
    BadControl(u8),
    /// Source identifier not terminated
    #[error("source identifier missing terminator")]
    MissingTerminator,
    /// Source identifier is not valid UTF-8
    #[error("source identifier is not UTF-8")]
    SourceNotUtf8,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_roundtrip() {
        let message = Message::data("gate:door1", 2019, vec![0xAA, 0x00, 0xBB, 0xCC]);

        let bytes = message.encode();
        let decoded = Message::decode(&bytes).unwrap();

        assert_eq!(decoded, message);
        assert_eq!(decoded.encode(), bytes);
    }

    #[test]
    fn empty_body_and_source_roundtrip() {
        let ping = Message::ping("node", u64::MAX);
        assert_eq!(Message::decode(&ping.encode()).unwrap(), ping);

        let bare = Message::data("n", 0, Vec::new());
        assert_eq!(Message::decode(&bare.encode()).unwrap(), bare);
    }

    #[test]
    fn body_may_contain_terminator_byte() {
        // Only the first NUL ends the source; the body is opaque.
        let message = Message::data("src", 7, vec![0x00, 0x01, 0x00]);
        let decoded = Message::decode(&message.encode()).unwrap();
        assert_eq!(decoded.body, vec![0x00, 0x01, 0x00]);
    }

    #[test]
    fn validate_rejects_short_and_foreign_frames() {
        for len in 0..MIN_FRAME_LEN {
            assert!(!Message::validate(&vec![FRAME_MAGIC; len]));
        }

        let mut bytes = Message::ping("n", 1).encode();
        assert!(Message::validate(&bytes));

        bytes[0] = 0x42;
        assert!(!Message::validate(&bytes));
        bytes[0] = FRAME_MAGIC;
        bytes[1] = 0x7F;
        assert!(!Message::validate(&bytes));
    }

    #[test]
    fn decode_rejects_bad_header() {
        let good = Message::data("n", 1, vec![1, 2, 3]).encode();

        let mut bad_magic = good.clone();
        bad_magic[0] = 0x00;
        assert_eq!(Message::decode(&bad_magic), Err(FrameError::BadMagic(0x00)));

        let mut bad_version = good.clone();
        bad_version[1] = 0x02;
        assert_eq!(
            Message::decode(&bad_version),
            Err(FrameError::BadVersion(0x02))
        );

        let mut bad_control = good;
        bad_control[2] = 0x99;
        assert_eq!(
            Message::decode(&bad_control),
            Err(FrameError::BadControl(0x99))
        );
    }

    #[test]
    fn decode_rejects_unterminated_source() {
        let mut bytes = vec![FRAME_MAGIC, FRAME_VERSION, 0x01];
        bytes.extend_from_slice(&1u64.to_be_bytes());
        bytes.extend_from_slice(b"x");
        assert_eq!(Message::decode(&bytes), Err(FrameError::MissingTerminator));
    }

    #[test]
    fn sequence_id_is_big_endian() {
        let bytes = Message::data("n", 0x0102_0304_0506_0708, Vec::new()).encode();
        assert_eq!(&bytes[3..11], &[1, 2, 3, 4, 5, 6, 7, 8]);
    }
}
