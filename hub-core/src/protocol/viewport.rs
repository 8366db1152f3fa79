//! Viewport streamer binary frame format.
//!
//! Frame header is fixed-layout little-endian with a magic marker; the ack
//! is a 4-byte big-endian `frameNum`. Byte-for-byte layout, not a generic
//! serializer.

pub const MAGIC: u32 = 0x564C_464F; // "VLFO"
pub const HEADER_LEN: usize = 16;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum FrameDecodeError {
    #[error("frame too short: {0} bytes")]
    TooShort(usize),
    #[error("bad magic: {0:#010x}")]
    BadMagic(u32),
}

/// One viewport frame: fixed header + JPEG payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    pub frame_num: u32,
    pub width: u16,
    pub height: u16,
    pub quality: u8,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN + self.payload.len());
        out.extend_from_slice(&MAGIC.to_le_bytes());
        out.extend_from_slice(&self.frame_num.to_le_bytes());
        out.extend_from_slice(&self.width.to_le_bytes());
        out.extend_from_slice(&self.height.to_le_bytes());
        out.push(self.quality);
        out.extend_from_slice(&[0u8; 3]); // reserved
        out.extend_from_slice(&self.payload);
        out
    }

    pub fn decode(buf: &[u8]) -> Result<Self, FrameDecodeError> {
        if buf.len() < HEADER_LEN {
            return Err(FrameDecodeError::TooShort(buf.len()));
        }
        let magic = u32::from_le_bytes(buf[0..4].try_into().unwrap());
        if magic != MAGIC {
            return Err(FrameDecodeError::BadMagic(magic));
        }
        let frame_num = u32::from_le_bytes(buf[4..8].try_into().unwrap());
        let width = u16::from_le_bytes(buf[8..10].try_into().unwrap());
        let height = u16::from_le_bytes(buf[10..12].try_into().unwrap());
        let quality = buf[12];
        let payload = buf[HEADER_LEN..].to_vec();
        Ok(Frame {
            frame_num,
            width,
            height,
            quality,
            payload,
        })
    }
}

/// Encodes a client ack: 4-byte big-endian frame number.
pub fn encode_ack(frame_num: u32) -> [u8; 4] {
    frame_num.to_be_bytes()
}

/// Decodes a client ack.
pub fn decode_ack(buf: &[u8]) -> Option<u32> {
    let arr: [u8; 4] = buf.get(0..4)?.try_into().ok()?;
    Some(u32::from_be_bytes(arr))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let f = Frame {
            frame_num: 7,
            width: 1280,
            height: 720,
            quality: 40,
            payload: vec![1, 2, 3, 4],
        };
        let bytes = f.encode();
        assert_eq!(&bytes[0..4], &MAGIC.to_le_bytes());
        let decoded = Frame::decode(&bytes).unwrap();
        assert_eq!(decoded, f);
    }

    #[test]
    fn bad_magic_rejected() {
        let mut bytes = vec![0u8; HEADER_LEN];
        bytes[0..4].copy_from_slice(&0u32.to_le_bytes());
        assert!(matches!(
            Frame::decode(&bytes),
            Err(FrameDecodeError::BadMagic(_))
        ));
    }

    #[test]
    fn too_short_rejected() {
        assert!(matches!(
            Frame::decode(&[1, 2, 3]),
            Err(FrameDecodeError::TooShort(3))
        ));
    }

    #[test]
    fn ack_roundtrip() {
        let enc = encode_ack(99);
        assert_eq!(decode_ack(&enc), Some(99));
    }
}
