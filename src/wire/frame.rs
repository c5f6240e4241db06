//! Cluster message framing.
//!
//! Every message exchanged with the cluster daemon's local socket carries a
//! fixed 20 byte header followed by the payload:
//!
//! ```text
//! offset 0  : counter      u32 (big-endian)
//! offset 4  : payload_len  u32 (big-endian)
//! offset 8  : command      12 bytes, `command + b' ' + b'-'...`, truncated to 12
//! offset 20 : payload      payload_len bytes (plaintext or sealed)
//! ```
//!
//! Whether the payload is sealed is not carried on the wire; both peers agree
//! on it by convention. [`parse`] therefore never decrypts.

use super::cipher::{CipherError, PayloadCipher};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Header Constants
// ---------------------------------------------------------------------------

/// Width of the command field.
pub const CLUSTER_CMD_HEADER_SIZE: usize = 12;

/// Total header length ("cluster data header size").
pub const CLUSTER_DATA_HEADER_SIZE: usize = 4 + 4 + CLUSTER_CMD_HEADER_SIZE;

/// Separator written right after the command name.
const COMMAND_SEPARATOR: u8 = b' ';

/// Filler used for the rest of the command field.
const COMMAND_FILLER: u8 = b'-';

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FramingError {
    #[error("frame shorter than header: {len} bytes")]
    ShortHeader { len: usize },
    #[error("truncated frame: header declares {declared} payload bytes, {available} present")]
    Truncated { declared: usize, available: usize },
    #[error("command {command:?} does not fit the command field")]
    CommandTooLong { command: String },
    #[error("command {command:?} contains the padding separator")]
    InvalidCommand { command: String },
    #[error("payload length {0} does not fit the header length field")]
    PayloadTooLarge(usize),
    #[error(transparent)]
    Cipher(#[from] CipherError),
}

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Decoded header fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterHeader {
    pub counter: u32,
    pub payload_len: u32,
    /// Command name with the padding removed.
    pub command: Bytes,
}

impl ClusterHeader {
    /// Command name as text, for logging and assertions.
    pub fn command_str(&self) -> String {
        String::from_utf8_lossy(&self.command).into_owned()
    }
}

/// The unit exchanged on the relay socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterMessage {
    pub command: Bytes,
    pub counter: u32,
    pub payload: Bytes,
    /// True when `payload` holds sealed bytes.
    pub encrypted: bool,
}

impl ClusterMessage {
    /// Plaintext message.
    pub fn new(command: impl Into<Bytes>, counter: u32, payload: impl Into<Bytes>) -> Self {
        Self {
            command: command.into(),
            counter,
            payload: payload.into(),
            encrypted: false,
        }
    }

    /// Decode a frame whose payload is known (by convention) to be sealed or not.
    pub fn decode(frame: &[u8], encrypted: bool) -> Result<Self, FramingError> {
        let (header, payload) = parse(frame)?;
        Ok(Self {
            command: header.command,
            counter: header.counter,
            payload,
            encrypted,
        })
    }

    /// Encode this message. Plaintext messages are sealed first when `encrypt` is set.
    pub fn encode(
        &self,
        encrypt: bool,
        cipher: Option<&dyn PayloadCipher>,
    ) -> Result<EncodedFrame, FramingError> {
        if self.encrypted {
            // Already sealed, carry verbatim.
            return build(&self.command, self.counter, &self.payload, false, None);
        }
        build(&self.command, self.counter, &self.payload, encrypt, cipher)
    }

    /// Return the plaintext payload, opening it with `cipher` when sealed.
    pub fn plaintext(&self, cipher: Option<&dyn PayloadCipher>) -> Result<Bytes, FramingError> {
        if !self.encrypted {
            return Ok(self.payload.clone());
        }
        let cipher = cipher.ok_or(CipherError::Unavailable)?;
        Ok(Bytes::from(cipher.open(&self.payload)?))
    }
}

/// A built frame together with the payload actually placed on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedFrame {
    pub frame: Bytes,
    /// Payload after optional sealing; its length is the declared length.
    pub payload: Bytes,
}

impl EncodedFrame {
    pub fn declared_len(&self) -> usize {
        self.payload.len()
    }
}

// ---------------------------------------------------------------------------
// Build / Parse
// ---------------------------------------------------------------------------

/// Build a frame: header followed by payload.
///
/// When `encrypt` is set the payload is sealed by `cipher` before being
/// embedded; a missing cipher is an error rather than a silent plaintext frame.
pub fn build(
    command: &[u8],
    counter: u32,
    payload: &[u8],
    encrypt: bool,
    cipher: Option<&dyn PayloadCipher>,
) -> Result<EncodedFrame, FramingError> {
    if command.len() > CLUSTER_CMD_HEADER_SIZE {
        return Err(FramingError::CommandTooLong {
            command: String::from_utf8_lossy(command).into_owned(),
        });
    }
    if command.contains(&COMMAND_SEPARATOR) {
        return Err(FramingError::InvalidCommand {
            command: String::from_utf8_lossy(command).into_owned(),
        });
    }

    let body = if encrypt {
        let cipher = cipher.ok_or(CipherError::Unavailable)?;
        Bytes::from(cipher.seal(payload)?)
    } else {
        Bytes::copy_from_slice(payload)
    };
    let declared =
        u32::try_from(body.len()).map_err(|_| FramingError::PayloadTooLarge(body.len()))?;

    let mut buf = BytesMut::with_capacity(CLUSTER_DATA_HEADER_SIZE + body.len());
    buf.put_u32(counter);
    buf.put_u32(declared);
    buf.put_slice(&pad_command(command));
    buf.put_slice(&body);

    Ok(EncodedFrame {
        frame: buf.freeze(),
        payload: body,
    })
}

/// Split a frame into header fields and payload.
///
/// Bytes beyond the declared payload length are not part of the frame and
/// are ignored here; [`ClusterDecoder`](super::codec::ClusterDecoder) keeps
/// them for the next frame.
pub fn parse(data: &[u8]) -> Result<(ClusterHeader, Bytes), FramingError> {
    let header = parse_header(data)?;
    let declared = header.payload_len as usize;
    let available = data.len() - CLUSTER_DATA_HEADER_SIZE;
    if available < declared {
        return Err(FramingError::Truncated {
            declared,
            available,
        });
    }
    let start = CLUSTER_DATA_HEADER_SIZE;
    let payload = Bytes::copy_from_slice(&data[start..start + declared]);
    Ok((header, payload))
}

/// Decode only the header.
pub fn parse_header(data: &[u8]) -> Result<ClusterHeader, FramingError> {
    if data.len() < CLUSTER_DATA_HEADER_SIZE {
        return Err(FramingError::ShortHeader { len: data.len() });
    }
    let mut buf = &data[..CLUSTER_DATA_HEADER_SIZE];
    let counter = buf.get_u32();
    let payload_len = buf.get_u32();
    Ok(ClusterHeader {
        counter,
        payload_len,
        command: unpad_command(buf),
    })
}

/// Everything after the header, without consulting the declared length.
///
/// This is the view used when asserting on captured traffic.
pub fn payload_after_header(data: &[u8]) -> &[u8] {
    data.get(CLUSTER_DATA_HEADER_SIZE..).unwrap_or_default()
}

fn pad_command(command: &[u8]) -> [u8; CLUSTER_CMD_HEADER_SIZE] {
    let mut field = [COMMAND_FILLER; CLUSTER_CMD_HEADER_SIZE];
    field[..command.len()].copy_from_slice(command);
    if command.len() < CLUSTER_CMD_HEADER_SIZE {
        field[command.len()] = COMMAND_SEPARATOR;
    }
    field
}

fn unpad_command(field: &[u8]) -> Bytes {
    let end = field
        .iter()
        .position(|b| *b == COMMAND_SEPARATOR)
        .unwrap_or(field.len());
    Bytes::copy_from_slice(&field[..end])
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::cipher::Aes256GcmCipher;
    use proptest::prelude::*;

    prop_compose! {
        fn arb_command()(
            command in proptest::collection::vec(
                any::<u8>().prop_filter("separator", |b| *b != COMMAND_SEPARATOR),
                0..=CLUSTER_CMD_HEADER_SIZE,
            ),
        ) -> Vec<u8> {
            command
        }
    }

    proptest! {
        #[test]
        fn test_build_then_parse_round_trips(
            command in arb_command(),
            counter in any::<u32>(),
            payload in any::<Vec<u8>>(),
        ) {
            let encoded = build(&command, counter, &payload, false, None).unwrap();
            prop_assert_eq!(encoded.frame.len(), CLUSTER_DATA_HEADER_SIZE + payload.len());

            let (header, parsed) = parse(&encoded.frame).unwrap();
            prop_assert_eq!(&header.command[..], &command[..]);
            prop_assert_eq!(header.counter, counter);
            prop_assert_eq!(header.payload_len as usize, payload.len());
            prop_assert_eq!(&parsed[..], &payload[..]);
        }

        #[test]
        fn test_any_command_with_separator_is_rejected(
            prefix in proptest::collection::vec(any::<u8>(), 0..6),
            suffix in proptest::collection::vec(any::<u8>(), 0..6),
        ) {
            let mut command = prefix;
            command.push(COMMAND_SEPARATOR);
            command.extend(suffix);
            let rejected = matches!(
                build(&command, 1, b"", false, None),
                Err(FramingError::InvalidCommand { .. })
            );
            prop_assert!(rejected);
        }
    }

    #[test]
    fn test_build_then_parse_send_sync() {
        let encoded = build(b"send_sync", 2, b"hello", false, None).unwrap();
        assert_eq!(encoded.declared_len(), 5);
        assert_eq!(encoded.frame.len(), CLUSTER_DATA_HEADER_SIZE + 5);

        let (header, payload) = parse(&encoded.frame).unwrap();
        assert_eq!(header.command, Bytes::from_static(b"send_sync"));
        assert_eq!(header.counter, 2);
        assert_eq!(header.payload_len, 5);
        assert_eq!(payload, Bytes::from_static(b"hello"));
    }

    #[test]
    fn test_header_layout() {
        let encoded = build(b"send_sync", 7, b"abc", false, None).unwrap();
        let frame = &encoded.frame;
        assert_eq!(&frame[0..4], &[0, 0, 0, 7]);
        assert_eq!(&frame[4..8], &[0, 0, 0, 3]);
        assert_eq!(&frame[8..20], b"send_sync --");
        assert_eq!(&frame[20..], b"abc");
    }

    #[test]
    fn test_full_width_command_has_no_separator() {
        let encoded = build(b"twelve_bytes", 1, b"", false, None).unwrap();
        assert_eq!(&encoded.frame[8..20], b"twelve_bytes");
        let (header, _) = parse(&encoded.frame).unwrap();
        assert_eq!(header.command_str(), "twelve_bytes");
    }

    #[test]
    fn test_command_too_long() {
        let err = build(b"thirteen_byte", 1, b"", false, None).unwrap_err();
        assert!(matches!(err, FramingError::CommandTooLong { .. }));
    }

    #[test]
    fn test_command_with_separator_is_rejected() {
        let err = build(b"send sync", 2, b"hello", false, None).unwrap_err();
        assert_eq!(
            err,
            FramingError::InvalidCommand {
                command: "send sync".to_string()
            }
        );
    }

    #[test]
    fn test_empty_payload_round_trips() {
        let encoded = build(b"ok", 0, b"", false, None).unwrap();
        assert_eq!(encoded.frame.len(), CLUSTER_DATA_HEADER_SIZE);
        let (header, payload) = parse(&encoded.frame).unwrap();
        assert_eq!(header.payload_len, 0);
        assert!(payload.is_empty());
    }

    #[test]
    fn test_short_input_is_always_a_framing_error() {
        let encoded = build(b"send_sync", 2, b"hello", false, None).unwrap();
        for len in 0..CLUSTER_DATA_HEADER_SIZE {
            assert_eq!(
                parse(&encoded.frame[..len]),
                Err(FramingError::ShortHeader { len })
            );
        }
    }

    #[test]
    fn test_truncated_payload() {
        let encoded = build(b"send_sync", 2, b"hello", false, None).unwrap();
        let cut = &encoded.frame[..encoded.frame.len() - 2];
        assert_eq!(
            parse(cut),
            Err(FramingError::Truncated {
                declared: 5,
                available: 3
            })
        );
    }

    #[test]
    fn test_trailing_bytes_are_not_payload() {
        let encoded = build(b"send_sync", 2, b"hello", false, None).unwrap();
        let mut data = encoded.frame.to_vec();
        data.extend_from_slice(b"extra");
        let (_, payload) = parse(&data).unwrap();
        assert_eq!(payload, Bytes::from_static(b"hello"));
        assert_eq!(payload_after_header(&data), b"helloextra");
    }

    #[test]
    fn test_encrypt_requires_cipher() {
        let err = build(b"send_sync", 2, b"hello", true, None).unwrap_err();
        assert_eq!(err, FramingError::Cipher(CipherError::Unavailable));
    }

    #[test]
    fn test_sealed_payload_is_not_decrypted_by_parse() {
        let cipher = Aes256GcmCipher::new([7u8; 32]);
        let encoded = build(b"send_sync", 3, b"secret", true, Some(&cipher)).unwrap();
        let (header, payload) = parse(&encoded.frame).unwrap();
        assert_eq!(header.payload_len as usize, encoded.declared_len());
        assert_ne!(payload, Bytes::from_static(b"secret"));

        let message = ClusterMessage::decode(&encoded.frame, true).unwrap();
        assert_eq!(
            message.plaintext(Some(&cipher)).unwrap(),
            Bytes::from_static(b"secret")
        );
    }

    #[test]
    fn test_message_encode_keeps_sealed_payload() {
        let cipher = Aes256GcmCipher::new([1u8; 32]);
        let sealed = build(b"send_sync", 9, b"x", true, Some(&cipher)).unwrap();
        let message = ClusterMessage::decode(&sealed.frame, true).unwrap();
        let again = message.encode(true, Some(&cipher)).unwrap();
        assert_eq!(again.frame, sealed.frame);
    }
}
