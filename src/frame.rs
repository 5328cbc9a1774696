use bytes::{BufMut, Bytes, BytesMut};

use crate::close::CloseInfo;

/// Defines the interpretation of the "Payload data".  If an unknown
/// opcode is received, the receiving endpoint MUST _Fail the
/// WebSocket Connection_.  The following values are defined.
/// - x0 denotes a continuation frame
/// - x1 denotes a text frame
/// - x2 denotes a binary frame
/// - x3-7 are reserved for further non-control frames
/// - x8 denotes a connection close
/// - x9 denotes a ping
/// - xA denotes a pong
/// - xB-F are reserved for further control frames
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpCode {
    /// - x0 denotes a continuation frame
    Continue,
    /// - x1 denotes a text frame
    Text,
    /// - x2 denotes a binary frame
    Binary,
    /// - x3-7 are reserved for further non-control frames
    ReservedNonControl,
    /// - x8 denotes a connection close
    Close,
    /// - x9 denotes a ping
    Ping,
    /// - xA denotes a pong
    Pong,
    /// - xB-F are reserved for further control frames
    ReservedControl,
}

impl Default for OpCode {
    fn default() -> Self {
        Self::Text
    }
}

impl OpCode {
    /// get corresponding u8 value
    pub fn as_u8(&self) -> u8 {
        match self {
            OpCode::Continue => 0,
            OpCode::Text => 1,
            OpCode::Binary => 2,
            OpCode::ReservedNonControl => 3,
            OpCode::Close => 8,
            OpCode::Ping => 9,
            OpCode::Pong => 10,
            OpCode::ReservedControl => 11,
        }
    }

    /// check is close/ping/pong
    pub fn is_control(&self) -> bool {
        matches!(self, Self::Close | Self::Ping | Self::Pong)
    }

    /// check is text/binary/continuation
    pub fn is_data(&self) -> bool {
        matches!(self, Self::Text | Self::Binary | Self::Continue)
    }

    /// check is reserved range
    pub fn is_reserved(&self) -> bool {
        matches!(self, Self::ReservedNonControl | Self::ReservedControl)
    }
}

#[inline]
pub(crate) fn parse_opcode(val: u8) -> OpCode {
    match val & 0x0F {
        0 => OpCode::Continue,
        1 => OpCode::Text,
        2 => OpCode::Binary,
        3..=7 => OpCode::ReservedNonControl,
        8 => OpCode::Close,
        9 => OpCode::Ping,
        10 => OpCode::Pong,
        _ => OpCode::ReservedControl,
    }
}

/// xor payload with mask key, byte by byte
#[inline]
pub fn apply_mask(buf: &mut [u8], mask: [u8; 4]) {
    for (i, byte) in buf.iter_mut().enumerate() {
        *byte ^= mask[i % 4];
    }
}

/// xor payload with mask key, u32 chunks on the aligned middle
pub fn apply_mask_fast32(buf: &mut [u8], mask: [u8; 4]) {
    let mask_u32 = u32::from_ne_bytes(mask);
    let (prefix, middle, suffix) = unsafe { buf.align_to_mut::<u32>() };
    apply_mask(prefix, mask);
    let head = prefix.len() & 3;
    let mask_u32 = if head > 0 {
        if cfg!(target_endian = "big") {
            mask_u32.rotate_left(8 * head as u32)
        } else {
            mask_u32.rotate_right(8 * head as u32)
        }
    } else {
        mask_u32
    };
    for word in middle.iter_mut() {
        *word ^= mask_u32;
    }
    apply_mask(suffix, mask_u32.to_ne_bytes());
}

/// draw a fresh masking key from the thread rng
pub fn gen_mask() -> [u8; 4] {
    rand::random()
}

/// a single websocket frame
///
/// `payload` always holds the clear (unmasked) bytes; `masking_key`
/// records whether the wire form is masked and with which key.
#[derive(Debug, Clone, Default)]
pub struct Frame {
    /// final fragment flag
    pub fin: bool,
    /// reserved bit 1
    pub rsv1: bool,
    /// reserved bit 2
    pub rsv2: bool,
    /// reserved bit 3
    pub rsv3: bool,
    /// frame type
    pub opcode: OpCode,
    /// mask key, present iff the wire form is masked
    pub masking_key: Option<[u8; 4]>,
    /// clear payload bytes
    pub payload: BytesMut,
}

impl Frame {
    /// construct a final frame with the given opcode and payload
    pub fn new(opcode: OpCode, masking_key: Option<[u8; 4]>, data: &[u8]) -> Self {
        Self {
            fin: true,
            rsv1: false,
            rsv2: false,
            rsv3: false,
            opcode,
            masking_key,
            payload: BytesMut::from(data),
        }
    }

    /// helper function to construct a text frame
    pub fn text(masking_key: Option<[u8; 4]>, data: &str) -> Self {
        Self::new(OpCode::Text, masking_key, data.as_bytes())
    }

    /// helper function to construct a binary frame
    pub fn binary(masking_key: Option<[u8; 4]>, data: &[u8]) -> Self {
        Self::new(OpCode::Binary, masking_key, data)
    }

    /// helper function to construct a ping frame
    pub fn ping(masking_key: Option<[u8; 4]>, data: &[u8]) -> Self {
        assert!(data.len() <= 125);
        Self::new(OpCode::Ping, masking_key, data)
    }

    /// helper function to construct a pong frame
    pub fn pong(masking_key: Option<[u8; 4]>, data: &[u8]) -> Self {
        assert!(data.len() <= 125);
        Self::new(OpCode::Pong, masking_key, data)
    }

    /// helper function to construct a close frame carrying code and reason
    pub fn close(masking_key: Option<[u8; 4]>, code: u16, reason: &str) -> Self {
        assert!(reason.len() <= 123);
        let mut payload = BytesMut::with_capacity(2 + reason.len());
        payload.put_u16(code);
        payload.extend_from_slice(reason.as_bytes());
        Self::new(OpCode::Close, masking_key, &payload)
    }

    /// payload length
    pub fn payload_len(&self) -> u64 {
        self.payload.len() as u64
    }

    /// header length of the encoded form
    pub fn header_len(&self) -> usize {
        let mut len = 2;
        if self.payload.len() > 125 {
            len += if self.payload.len() <= 65535 { 2 } else { 8 };
        }
        if self.masking_key.is_some() {
            len += 4;
        }
        len
    }

    /// serialize into `dst`
    ///
    /// byte 0 is fin/rsv/opcode, byte 1 is mask bit plus the length
    /// field (125 direct, 126 + u16, 127 + u64, big-endian), then the
    /// mask key iff masked, then the payload xor-ed with the key.
    pub fn encode(&self, dst: &mut BytesMut) {
        dst.reserve(self.header_len() + self.payload.len());
        let mut byte0 = self.opcode.as_u8() & 0x0F;
        if self.fin {
            byte0 |= 0x80;
        }
        if self.rsv1 {
            byte0 |= 0x40;
        }
        if self.rsv2 {
            byte0 |= 0x20;
        }
        if self.rsv3 {
            byte0 |= 0x10;
        }
        dst.put_u8(byte0);

        let mask_bit = if self.masking_key.is_some() { 0x80 } else { 0 };
        let len = self.payload.len() as u64;
        if len <= 125 {
            dst.put_u8(mask_bit | len as u8);
        } else if len <= 65535 {
            dst.put_u8(mask_bit | 126);
            dst.put_u16(len as u16);
        } else {
            dst.put_u8(mask_bit | 127);
            dst.put_u64(len);
        }

        match self.masking_key {
            Some(key) => {
                dst.put_slice(&key);
                let start = dst.len();
                dst.extend_from_slice(&self.payload);
                apply_mask_fast32(&mut dst[start..], key);
            }
            None => dst.extend_from_slice(&self.payload),
        }
    }

    /// serialize into a fresh buffer
    pub fn encode_to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::new();
        self.encode(&mut buf);
        buf.freeze()
    }
}

/// parse a close frame payload
///
/// an empty payload carries no status; it maps to a normal 1000 closure
/// with the default reason.
pub fn parse_close_payload(payload: &[u8]) -> CloseInfo {
    if payload.len() >= 2 {
        let code = u16::from_be_bytes([payload[0], payload[1]]);
        let reason = String::from_utf8_lossy(&payload[2..]).to_string();
        CloseInfo::new(code, reason)
    } else {
        CloseInfo::new(1000, "Shutdown connection")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mask_symmetry() {
        let key = [0x37, 0xFA, 0x21, 0x3D];
        let data: Vec<u8> = (0..=255u8).cycle().take(1031).collect();
        let mut masked = data.clone();
        apply_mask(&mut masked, key);
        assert_ne!(masked, data);
        apply_mask(&mut masked, key);
        assert_eq!(masked, data);
    }

    #[test]
    fn fast_mask_matches_slow() {
        let key = [0xA1, 0x02, 0xC3, 0x44];
        for len in [0usize, 1, 3, 4, 5, 7, 8, 63, 64, 65, 1000] {
            let data: Vec<u8> = (0..len as u32).map(|i| (i * 7) as u8).collect();
            let mut slow = data.clone();
            let mut fast = data;
            apply_mask(&mut slow, key);
            apply_mask_fast32(&mut fast, key);
            assert_eq!(slow, fast, "len {len}");
        }
    }

    #[test]
    fn encode_short_text() {
        let frame = Frame::text(None, "hello");
        let buf = frame.encode_to_bytes();
        assert_eq!(&buf[..], &[0x81, 0x05, b'h', b'e', b'l', b'l', b'o']);
    }

    #[test]
    fn encode_masked_text() {
        let key = [1, 2, 3, 4];
        let frame = Frame::text(Some(key), "hi");
        let buf = frame.encode_to_bytes();
        assert_eq!(buf[0], 0x81);
        assert_eq!(buf[1], 0x80 | 2);
        assert_eq!(&buf[2..6], &key);
        assert_eq!(buf[6], b'h' ^ 1);
        assert_eq!(buf[7], b'i' ^ 2);
    }

    #[test]
    fn encode_extended_u16_len() {
        let frame = Frame::binary(None, &vec![0u8; 126]);
        let buf = frame.encode_to_bytes();
        assert_eq!(buf[1], 126);
        assert_eq!(u16::from_be_bytes([buf[2], buf[3]]), 126);
        assert_eq!(buf.len(), 4 + 126);
    }

    #[test]
    fn encode_extended_u64_len() {
        let frame = Frame::binary(None, &vec![0x5A; 70_000]);
        let buf = frame.encode_to_bytes();
        assert_eq!(buf[1] & 0x7F, 127);
        let mut be = [0u8; 8];
        be.copy_from_slice(&buf[2..10]);
        assert_eq!(u64::from_be_bytes(be), 70_000);
        assert_eq!(buf.len(), 10 + 70_000);
    }

    #[test]
    fn close_payload_round_trip() {
        let frame = Frame::close(None, 1000, "bye");
        let info = parse_close_payload(&frame.payload);
        assert_eq!(info.code, 1000);
        assert_eq!(info.reason, "bye");
    }

    #[test]
    fn close_payload_empty_is_normal() {
        assert_eq!(parse_close_payload(&[]).code, 1000);
    }

    #[test]
    fn opcode_parse_covers_reserved() {
        assert_eq!(parse_opcode(0x83), OpCode::ReservedNonControl);
        assert_eq!(parse_opcode(0x0B), OpCode::ReservedControl);
        assert_eq!(parse_opcode(0x89), OpCode::Ping);
    }
}
