use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::errors::{ProtocolError, WsError};
use crate::frame::{apply_mask_fast32, parse_opcode, Frame};

/// incremental websocket frame codec
///
/// `decode` consumes at most one complete frame per call and returns
/// `Ok(None)` while the buffer does not yet hold one. It unmasks the
/// payload in place but performs no opcode or control-size validation;
/// legality is judged by the connection (so a decoder user can still
/// observe reserved opcodes and oversized control frames).
#[derive(Debug, Clone, Default)]
pub struct FrameCodec {}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = WsError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, WsError> {
        if src.len() < 2 {
            return Ok(None);
        }
        let byte0 = src[0];
        let byte1 = src[1];
        let masked = byte1 & 0x80 != 0;

        let (len_occupied, payload_len) = match byte1 & 0x7F {
            len @ 0..=125 => (0usize, len as u64),
            126 => {
                if src.len() < 4 {
                    return Ok(None);
                }
                (2, u16::from_be_bytes([src[2], src[3]]) as u64)
            }
            _ => {
                if src.len() < 10 {
                    return Ok(None);
                }
                let mut be = [0u8; 8];
                be.copy_from_slice(&src[2..10]);
                (8, u64::from_be_bytes(be))
            }
        };

        let mut header_len = 2 + len_occupied;
        if masked {
            header_len += 4;
        }
        let payload_len: usize = payload_len
            .try_into()
            .map_err(|_| WsError::protocol(1009, ProtocolError::PayloadTooLarge(payload_len)))?;
        let frame_len = header_len + payload_len;
        if src.len() < frame_len {
            src.reserve(frame_len - src.len());
            return Ok(None);
        }

        let masking_key = if masked {
            let at = 2 + len_occupied;
            Some([src[at], src[at + 1], src[at + 2], src[at + 3]])
        } else {
            None
        };

        let mut frame_bytes = src.split_to(frame_len);
        frame_bytes.advance(header_len);
        let mut payload = frame_bytes;
        if let Some(key) = masking_key {
            apply_mask_fast32(&mut payload, key);
        }

        Ok(Some(Frame {
            fin: byte0 & 0x80 != 0,
            rsv1: byte0 & 0x40 != 0,
            rsv2: byte0 & 0x20 != 0,
            rsv3: byte0 & 0x10 != 0,
            opcode: parse_opcode(byte0),
            masking_key,
            payload,
        }))
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = WsError;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), WsError> {
        item.encode(dst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::OpCode;

    fn decode_all(bytes: &[u8]) -> Vec<Frame> {
        let mut codec = FrameCodec::default();
        let mut buf = BytesMut::from(bytes);
        let mut out = vec![];
        while let Some(frame) = codec.decode(&mut buf).unwrap() {
            out.push(frame);
        }
        out
    }

    #[test]
    fn need_more_on_partial_header() {
        let mut codec = FrameCodec::default();
        let mut buf = BytesMut::from(&[0x81u8][..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        assert_eq!(buf.len(), 1);
    }

    #[test]
    fn need_more_on_partial_extended_len() {
        let mut codec = FrameCodec::default();
        // 126 announces a u16 length, only one length byte present
        let mut buf = BytesMut::from(&[0x82u8, 126, 0x01][..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn need_more_on_partial_mask_key() {
        let mut codec = FrameCodec::default();
        let mut buf = BytesMut::from(&[0x81u8, 0x80 | 1, 0xAA, 0xBB][..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn need_more_on_partial_payload() {
        let mut codec = FrameCodec::default();
        let mut buf = BytesMut::from(&[0x81u8, 3, b'h', b'i'][..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(b"!");
        let frame = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(&frame.payload[..], b"hi!");
    }

    #[test]
    fn round_trip_preserves_mask_and_payload() {
        let key = [9, 8, 7, 6];
        let frame = Frame::binary(Some(key), &[1, 2, 3, 4, 5]);
        let encoded = frame.encode_to_bytes();
        let decoded = decode_all(&encoded);
        assert_eq!(decoded.len(), 1);
        let got = &decoded[0];
        assert!(got.fin);
        assert_eq!(got.opcode, OpCode::Binary);
        assert_eq!(got.masking_key, Some(key));
        assert_eq!(&got.payload[..], &[1, 2, 3, 4, 5]);
    }

    #[test]
    fn round_trip_all_length_classes() {
        for len in [0usize, 1, 125, 126, 65535, 65536, 70_000] {
            let data = vec![0x5A; len];
            for key in [None, Some([1, 2, 3, 4])] {
                let frame = Frame::binary(key, &data);
                let encoded = frame.encode_to_bytes();
                let got = &decode_all(&encoded)[0];
                assert_eq!(got.payload_len(), len as u64, "len {len} key {key:?}");
                assert_eq!(got.masking_key, key);
                assert_eq!(&got.payload[..], &data[..]);
            }
        }
    }

    #[test]
    fn decodes_back_to_back_frames() {
        let mut bytes = BytesMut::new();
        Frame::text(None, "one").encode(&mut bytes);
        Frame::text(None, "two").encode(&mut bytes);
        Frame::ping(None, b"").encode(&mut bytes);
        let frames = decode_all(&bytes);
        assert_eq!(frames.len(), 3);
        assert_eq!(&frames[0].payload[..], b"one");
        assert_eq!(&frames[1].payload[..], b"two");
        assert_eq!(frames[2].opcode, OpCode::Ping);
    }

    #[test]
    fn reserved_opcode_passes_decoder() {
        // opcode legality is the caller's concern
        let frames = decode_all(&[0x83, 0x00]);
        assert_eq!(frames.len(), 1);
        assert!(frames[0].opcode.is_reserved());
    }
}
