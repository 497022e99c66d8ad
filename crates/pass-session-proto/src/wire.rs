// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Packet framing and CBOR helpers.
//!
//! Packet layout:
//!
//! ``MAGIC(4) || VERSION(2) || FLAGS(2) || LENGTH(4) || PAYLOAD || CHECKSUM(32)``
//!
//! * PAYLOAD is a CBOR [`Frame`]
//! * CHECKSUM = blake3-256 over HEADER (first 12 bytes) || PAYLOAD

use blake3::Hasher;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;

use crate::{Message, Response, WorkerMessage};

/// Protocol magic constant "PAS!".
pub const MAGIC: [u8; 4] = [0x50, 0x41, 0x53, 0x21];
/// Wire protocol version (big-endian u16).
pub const VERSION: u16 = 0x0001;
/// Reserved flags (zero for v1).
pub const FLAGS: u16 = 0x0000;
/// Header size in bytes.
pub const HEADER_LEN: usize = 12;
/// Checksum size in bytes.
pub const CHECKSUM_LEN: usize = 32;
/// Largest accepted payload.
pub const MAX_PAYLOAD: usize = 8 * 1024 * 1024;

/// Framing and codec failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WireError {
    /// Not enough bytes for a full packet.
    #[error("incomplete packet")]
    Incomplete,
    /// Magic mismatch.
    #[error("bad magic")]
    BadMagic,
    /// Unknown protocol version.
    #[error("unsupported version {0}")]
    UnsupportedVersion(u16),
    /// Payload over [`MAX_PAYLOAD`].
    #[error("payload of {0} bytes exceeds limit")]
    TooLarge(usize),
    /// Checksum mismatch.
    #[error("checksum mismatch")]
    Checksum,
    /// CBOR encode failure.
    #[error("encode: {0}")]
    Encode(String),
    /// CBOR decode failure.
    #[error("decode: {0}")]
    Decode(String),
}

/// Unit of transport between a replica and the worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Frame {
    /// Replica request, answered by a `Response` frame with the same id.
    Request {
        /// Correlation id, chosen by the replica.
        id: u64,
        /// Tagged message.
        message: WorkerMessage,
    },
    /// Worker answer to a request.
    Response {
        /// Correlation id of the request.
        id: u64,
        /// Outcome.
        response: Response,
    },
    /// Worker-initiated message (broadcast or unicast).
    Push(Message),
}

/// Encode to CBOR bytes.
pub fn to_cbor<T: Serialize>(value: &T) -> Result<Vec<u8>, WireError> {
    let mut out = Vec::new();
    ciborium::ser::into_writer(value, &mut out).map_err(|e| WireError::Encode(e.to_string()))?;
    Ok(out)
}

/// Decode from CBOR bytes.
pub fn from_cbor<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, WireError> {
    ciborium::de::from_reader(bytes).map_err(|e| WireError::Decode(e.to_string()))
}

fn checksum(header: &[u8], payload: &[u8]) -> [u8; CHECKSUM_LEN] {
    let mut hasher = Hasher::new();
    hasher.update(header);
    hasher.update(payload);
    *hasher.finalize().as_bytes()
}

/// Wraps a payload into a full packet.
pub fn encode_packet(payload: &[u8]) -> Result<Vec<u8>, WireError> {
    if payload.len() > MAX_PAYLOAD {
        return Err(WireError::TooLarge(payload.len()));
    }
    let len = u32::try_from(payload.len()).map_err(|_| WireError::TooLarge(payload.len()))?;
    let mut out = Vec::with_capacity(HEADER_LEN + payload.len() + CHECKSUM_LEN);
    out.extend_from_slice(&MAGIC);
    out.extend_from_slice(&VERSION.to_be_bytes());
    out.extend_from_slice(&FLAGS.to_be_bytes());
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(payload);
    let sum = checksum(&out[..HEADER_LEN], payload);
    out.extend_from_slice(&sum);
    Ok(out)
}

/// Total size of the packet at the start of `bytes`, or `None` while the
/// header is still incomplete. Validates the header as soon as it is in.
pub fn frame_len(bytes: &[u8]) -> Result<Option<usize>, WireError> {
    if bytes.len() < HEADER_LEN {
        return Ok(None);
    }
    if bytes[0..4] != MAGIC {
        return Err(WireError::BadMagic);
    }
    let version = u16::from_be_bytes([bytes[4], bytes[5]]);
    if version != VERSION {
        return Err(WireError::UnsupportedVersion(version));
    }
    let len = u32::from_be_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]) as usize;
    if len > MAX_PAYLOAD {
        return Err(WireError::TooLarge(len));
    }
    Ok(Some(HEADER_LEN + len + CHECKSUM_LEN))
}

/// Verifies the packet at the start of `bytes` and returns its payload and
/// the number of bytes consumed.
pub fn decode_packet(bytes: &[u8]) -> Result<(&[u8], usize), WireError> {
    let total = frame_len(bytes)?.ok_or(WireError::Incomplete)?;
    if bytes.len() < total {
        return Err(WireError::Incomplete);
    }
    let header = &bytes[..HEADER_LEN];
    let payload = &bytes[HEADER_LEN..total - CHECKSUM_LEN];
    if checksum(header, payload) != bytes[total - CHECKSUM_LEN..total] {
        return Err(WireError::Checksum);
    }
    Ok((payload, total))
}

/// Encodes a frame into a full packet.
pub fn encode_frame(frame: &Frame) -> Result<Vec<u8>, WireError> {
    encode_packet(&to_cbor(frame)?)
}

/// Decodes one frame, returning it with the number of bytes consumed.
pub fn decode_frame(bytes: &[u8]) -> Result<(Frame, usize), WireError> {
    let (payload, used) = decode_packet(bytes)?;
    Ok((from_cbor(payload)?, used))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::{Endpoint, Envelope, ResponsePayload, WorkerState, WorkerStatus};
    use pass_store::action::item_creation_intent;
    use pass_store::ItemData;

    fn sample() -> Frame {
        Frame::Request {
            id: 7,
            message: WorkerMessage::new(
                Endpoint::Popup,
                Message::store_action(
                    item_creation_intent("x", "s1", ItemData::default(), 1_700_000_000)
                        .with_sender(Endpoint::Popup),
                ),
            ),
        }
    }

    #[test]
    fn action_frame_survives_the_wire() {
        let frame = sample();
        let bytes = encode_frame(&frame).unwrap();
        let (back, used) = decode_frame(&bytes).unwrap();
        assert_eq!(used, bytes.len());
        assert_eq!(back, frame);
    }

    #[test]
    fn wakeup_response_carries_buffer() {
        let frame = Frame::Response {
            id: 1,
            response: Response::Success {
                payload: ResponsePayload::Wakeup {
                    state: WorkerState {
                        logged_in: true,
                        status: WorkerStatus::Ready,
                        uid: Some("u".into()),
                    },
                    buffered: vec![Message::store_action(Envelope::new(
                        pass_store::Action::Lock,
                    ))],
                },
            },
        };
        let bytes = encode_frame(&frame).unwrap();
        assert_eq!(decode_frame(&bytes).unwrap().0, frame);
    }

    #[test]
    fn corrupted_payload_is_rejected() {
        let mut bytes = encode_frame(&sample()).unwrap();
        bytes[HEADER_LEN + 2] ^= 0xff;
        assert_eq!(decode_frame(&bytes).err(), Some(WireError::Checksum));
    }

    #[test]
    fn frame_len_waits_for_header_then_validates() {
        let bytes = encode_frame(&sample()).unwrap();
        assert_eq!(frame_len(&bytes[..5]), Ok(None));
        assert_eq!(frame_len(&bytes), Ok(Some(bytes.len())));
        assert_eq!(
            decode_frame(&bytes[..bytes.len() - 1]).err(),
            Some(WireError::Incomplete)
        );

        let mut bad = bytes.clone();
        bad[0] = b'X';
        assert_eq!(frame_len(&bad), Err(WireError::BadMagic));

        let mut huge = bytes;
        huge[8..12].copy_from_slice(&u32::MAX.to_be_bytes());
        assert_eq!(
            frame_len(&huge),
            Err(WireError::TooLarge(u32::MAX as usize))
        );
    }
}
