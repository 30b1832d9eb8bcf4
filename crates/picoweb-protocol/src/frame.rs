//! WebSocket frame encoding and decoding (RFC 6455 section 5).
//!
//! Frames are decoded in place: once a whole frame is present its payload
//! is unmasked inside the caller's buffer and the header tells the caller
//! where the payload sits and how many bytes to consume. A partial frame
//! leaves the buffer untouched.

use crate::ParseStatus;
use thiserror::Error;

/// Close status codes used by the server.
pub mod close_code {
    pub const NORMAL: u16 = 1000;
    pub const GOING_AWAY: u16 = 1001;
    pub const PROTOCOL_ERROR: u16 = 1002;
    pub const INVALID_PAYLOAD: u16 = 1007;
    pub const MESSAGE_TOO_BIG: u16 = 1009;
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("Frame payload of {len} bytes exceeds the {max} byte limit")]
    TooLarge { len: u64, max: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpCode {
    Continuation,
    Text,
    Binary,
    Close,
    Ping,
    Pong,
    /// An opcode RFC 6455 reserves.
    Reserved(u8),
}

impl OpCode {
    pub fn from_u8(value: u8) -> Self {
        match value & 0x0F {
            0x0 => OpCode::Continuation,
            0x1 => OpCode::Text,
            0x2 => OpCode::Binary,
            0x8 => OpCode::Close,
            0x9 => OpCode::Ping,
            0xA => OpCode::Pong,
            other => OpCode::Reserved(other),
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            OpCode::Continuation => 0x0,
            OpCode::Text => 0x1,
            OpCode::Binary => 0x2,
            OpCode::Close => 0x8,
            OpCode::Ping => 0x9,
            OpCode::Pong => 0xA,
            OpCode::Reserved(value) => value & 0x0F,
        }
    }

    /// Close, ping and pong frames.
    pub fn is_control(self) -> bool {
        self.as_u8() & 0x08 != 0
    }
}

/// A decoded frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub fin: bool,
    /// The three reserved bits, right aligned.
    pub rsv: u8,
    pub opcode: OpCode,
    pub masked: bool,
    /// The 7-bit length field as sent (126 and 127 select extended lengths).
    pub length_code: u8,
    pub mask_key: Option<[u8; 4]>,
    /// Offset of the payload from the start of the frame.
    pub payload_start: usize,
    pub payload_len: usize,
}

impl FrameHeader {
    /// Total bytes the frame occupies.
    pub fn frame_len(&self) -> usize {
        self.payload_start + self.payload_len
    }

    /// Payload range within the buffer the frame was decoded from.
    pub fn payload_range(&self) -> std::ops::Range<usize> {
        self.payload_start..self.frame_len()
    }
}

/// XOR `data` with the 4-byte masking key.
pub fn apply_mask(data: &mut [u8], key: [u8; 4]) {
    for (i, byte) in data.iter_mut().enumerate() {
        *byte ^= key[i & 3];
    }
}

/// Encode a final frame, masking it with a fresh random key if `mask` is set.
pub fn encode_frame(opcode: OpCode, payload: &[u8], mask: bool) -> Vec<u8> {
    let key = mask.then(rand::random::<[u8; 4]>);
    encode_frame_with_key(opcode, payload, key)
}

/// Encode a final frame with an explicit masking key.
///
/// The shortest length encoding that fits the payload is always chosen.
pub fn encode_frame_with_key(opcode: OpCode, payload: &[u8], key: Option<[u8; 4]>) -> Vec<u8> {
    let len = payload.len();
    let mut frame = Vec::with_capacity(len + 14);
    frame.push(0x80 | opcode.as_u8());

    let mask_bit = if key.is_some() { 0x80 } else { 0x00 };
    if len < 126 {
        frame.push(mask_bit | len as u8);
    } else if len <= u16::MAX as usize {
        frame.push(mask_bit | 126);
        frame.extend_from_slice(&(len as u16).to_be_bytes());
    } else {
        frame.push(mask_bit | 127);
        frame.extend_from_slice(&(len as u64).to_be_bytes());
    }

    let start = match key {
        Some(key) => {
            frame.extend_from_slice(&key);
            let start = frame.len();
            frame.extend_from_slice(payload);
            apply_mask(&mut frame[start..], key);
            start
        }
        None => {
            let start = frame.len();
            frame.extend_from_slice(payload);
            start
        }
    };
    debug_assert_eq!(frame.len(), start + len);
    frame
}

/// Decode the frame at the start of `buf`.
///
/// When the frame is complete its payload is unmasked in place. Payloads
/// declaring more than `max_payload` bytes are rejected as soon as the
/// length field is readable.
pub fn decode_frame(
    buf: &mut [u8],
    max_payload: usize,
) -> Result<ParseStatus<FrameHeader>, FrameError> {
    if buf.len() < 2 {
        return Ok(ParseStatus::NotYet);
    }
    let fin = buf[0] & 0x80 != 0;
    let rsv = (buf[0] >> 4) & 0x07;
    let opcode = OpCode::from_u8(buf[0]);
    let masked = buf[1] & 0x80 != 0;
    let length_code = buf[1] & 0x7F;

    let (declared, mut pos) = match length_code {
        126 => {
            if buf.len() < 4 {
                return Ok(ParseStatus::NotYet);
            }
            (u64::from(u16::from_be_bytes([buf[2], buf[3]])), 4)
        }
        127 => {
            if buf.len() < 10 {
                return Ok(ParseStatus::NotYet);
            }
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(&buf[2..10]);
            (u64::from_be_bytes(bytes), 10)
        }
        n => (u64::from(n), 2),
    };
    if declared > max_payload as u64 {
        return Err(FrameError::TooLarge {
            len: declared,
            max: max_payload,
        });
    }
    let payload_len = declared as usize;

    let mask_key = if masked {
        if buf.len() < pos + 4 {
            return Ok(ParseStatus::NotYet);
        }
        let key = [buf[pos], buf[pos + 1], buf[pos + 2], buf[pos + 3]];
        pos += 4;
        Some(key)
    } else {
        None
    };

    if buf.len() < pos + payload_len {
        return Ok(ParseStatus::NotYet);
    }
    if let Some(key) = mask_key {
        apply_mask(&mut buf[pos..pos + payload_len], key);
    }

    Ok(ParseStatus::Ready(FrameHeader {
        fin,
        rsv,
        opcode,
        masked,
        length_code,
        mask_key,
        payload_start: pos,
        payload_len,
    }))
}

/// Payload of a CLOSE frame: big-endian status code then a UTF-8 reason.
pub fn close_payload(code: u16, reason: &str) -> Vec<u8> {
    let mut payload = Vec::with_capacity(2 + reason.len());
    payload.extend_from_slice(&code.to_be_bytes());
    payload.extend_from_slice(reason.as_bytes());
    payload
}

/// Status code carried by a CLOSE payload, if any.
pub fn parse_close_code(payload: &[u8]) -> Option<u16> {
    match payload {
        [hi, lo, ..] => Some(u16::from_be_bytes([*hi, *lo])),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn decode(bytes: &[u8]) -> (FrameHeader, Vec<u8>) {
        let mut buf = bytes.to_vec();
        let header = decode_frame(&mut buf, usize::MAX).unwrap().ready().unwrap();
        let payload = buf[header.payload_range()].to_vec();
        (header, payload)
    }

    #[test]
    fn test_unmasked_text() {
        let frame = encode_frame_with_key(OpCode::Text, b"hi", None);
        assert_eq!(frame, vec![0x81, 0x02, b'h', b'i']);
        let (header, payload) = decode(&frame);
        assert!(header.fin);
        assert_eq!(header.opcode, OpCode::Text);
        assert!(!header.masked);
        assert_eq!(payload, b"hi");
    }

    #[test]
    fn test_masked_text() {
        let key = [0x37, 0xfa, 0x21, 0x3d];
        let frame = encode_frame_with_key(OpCode::Text, b"Hello", Some(key));
        // RFC 6455 section 5.7 sample.
        assert_eq!(
            frame,
            vec![0x81, 0x85, 0x37, 0xfa, 0x21, 0x3d, 0x7f, 0x9f, 0x4d, 0x51, 0x58]
        );
        let (header, payload) = decode(&frame);
        assert_eq!(header.mask_key, Some(key));
        assert_eq!(header.payload_start, 6);
        assert_eq!(payload, b"Hello");
    }

    #[test]
    fn test_random_mask_round_trip() {
        let frame = encode_frame(OpCode::Binary, b"\x00\x01\x02", true);
        assert_eq!(frame[1] & 0x80, 0x80);
        let (header, payload) = decode(&frame);
        assert_eq!(header.opcode, OpCode::Binary);
        assert_eq!(payload, b"\x00\x01\x02");
    }

    #[test]
    fn test_length_boundaries() {
        for (len, code, start) in [
            (0usize, 0u8, 2usize),
            (125, 125, 2),
            (126, 126, 4),
            (65535, 126, 4),
            (65536, 127, 10),
        ] {
            let payload = vec![0x5a; len];
            let frame = encode_frame_with_key(OpCode::Binary, &payload, None);
            assert_eq!(frame.len(), start + len, "len {len}");
            let (header, decoded) = decode(&frame);
            assert_eq!(header.length_code, code, "len {len}");
            assert_eq!(header.payload_start, start);
            assert_eq!(decoded.len(), len);
        }
    }

    #[test]
    fn test_partial_frames_are_not_ready() {
        let frame = encode_frame_with_key(OpCode::Text, &[b'x'; 300], Some([1, 2, 3, 4]));
        for cut in 0..frame.len() {
            let mut buf = frame[..cut].to_vec();
            let status = decode_frame(&mut buf, usize::MAX).unwrap();
            assert_eq!(status, ParseStatus::NotYet, "cut at {cut}");
            assert_eq!(buf, &frame[..cut], "partial buffer must be untouched");
        }
    }

    #[test]
    fn test_oversized_rejected_from_header() {
        let frame = encode_frame_with_key(OpCode::Binary, &[0u8; 200], None);
        let mut head = frame[..4].to_vec();
        let err = decode_frame(&mut head, 100).unwrap_err();
        assert_eq!(err, FrameError::TooLarge { len: 200, max: 100 });
    }

    #[test]
    fn test_rsv_and_reserved_opcode_reported() {
        let (header, _) = decode(&[0xB3, 0x00]);
        assert_eq!(header.rsv, 0b011);
        assert_eq!(header.opcode, OpCode::Reserved(3));
    }

    #[test]
    fn test_fragment_flag() {
        let (header, _) = decode(&[0x01, 0x01, b'a']);
        assert!(!header.fin);
        assert_eq!(header.opcode, OpCode::Text);
        let (header, _) = decode(&[0x80, 0x01, b'b']);
        assert!(header.fin);
        assert_eq!(header.opcode, OpCode::Continuation);
    }

    #[test]
    fn test_opcode_classes() {
        assert!(OpCode::Ping.is_control());
        assert!(OpCode::Close.is_control());
        assert!(!OpCode::Text.is_control());
        assert_eq!(OpCode::from_u8(0x8A), OpCode::Pong);
    }

    #[test]
    fn test_close_payload() {
        let payload = close_payload(close_code::INVALID_PAYLOAD, "bad utf-8");
        assert_eq!(parse_close_code(&payload), Some(1007));
        assert_eq!(&payload[2..], b"bad utf-8");
        assert_eq!(parse_close_code(&[0x03]), None);
    }
}
