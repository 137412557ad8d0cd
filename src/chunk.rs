//! Media chunks
//!
//! The wire unit handed over by the source: a fixed-layout little-endian
//! header followed by an opaque payload. Only `Miv` and `Vpcc` chunks carry
//! V-PCC/MIV metadata; the other kinds are forwarded to their subsystems
//! unchanged.

use crate::error::Error;
use bytes::Bytes;

/// Serialized header size in bytes.
pub const HEADER_SIZE: usize = 41;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkType {
    Audio,
    Hevc,
    Vvc,
    Miv,
    Vpcc,
    Haptic,
}

impl ChunkType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Audio),
            1 => Some(Self::Hevc),
            2 => Some(Self::Vvc),
            3 => Some(Self::Miv),
            4 => Some(Self::Vpcc),
            5 => Some(Self::Haptic),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            Self::Audio => 0,
            Self::Hevc => 1,
            Self::Vvc => 2,
            Self::Miv => 3,
            Self::Vpcc => 4,
            Self::Haptic => 5,
        }
    }

    /// True for the chunk kinds that carry video payloads and drive the
    /// presentation clock.
    pub fn is_video(self) -> bool {
        matches!(self, Self::Hevc | Self::Vvc | Self::Miv | Self::Vpcc)
    }
}

/// Fixed-layout chunk header. Times are in seconds.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkHeader {
    pub type_id: ChunkType,
    pub media_id: u16,
    pub segment_id: u32,
    pub number_of_frames: u32,
    pub pts: f64,
    pub duration: f64,
    pub segment_duration: f64,
    pub data_size: u32,
    /// Zero on success; a non-zero value is the upstream streamer's error
    /// code and triggers the host error callback.
    pub error_streamer: u16,
}

impl ChunkHeader {
    pub fn parse(buffer: &[u8]) -> Result<Self, Error> {
        if buffer.len() < HEADER_SIZE {
            return Err(Error::TruncatedChunk(format!(
                "header needs {HEADER_SIZE} bytes, got {}",
                buffer.len()
            )));
        }

        let type_id = ChunkType::from_u8(buffer[0])
            .ok_or_else(|| Error::TruncatedChunk(format!("unknown chunk type {}", buffer[0])))?;

        let u16_at = |o: usize| u16::from_le_bytes([buffer[o], buffer[o + 1]]);
        let u32_at = |o: usize| {
            u32::from_le_bytes([buffer[o], buffer[o + 1], buffer[o + 2], buffer[o + 3]])
        };
        let f64_at = |o: usize| {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&buffer[o..o + 8]);
            f64::from_le_bytes(raw)
        };

        Ok(Self {
            type_id,
            media_id: u16_at(1),
            segment_id: u32_at(3),
            number_of_frames: u32_at(7),
            pts: f64_at(11),
            duration: f64_at(19),
            segment_duration: f64_at(27),
            data_size: u32_at(35),
            error_streamer: u16_at(39),
        })
    }

    pub fn write_to(&self, buffer: &mut Vec<u8>) {
        buffer.push(self.type_id.as_u8());
        buffer.extend_from_slice(&self.media_id.to_le_bytes());
        buffer.extend_from_slice(&self.segment_id.to_le_bytes());
        buffer.extend_from_slice(&self.number_of_frames.to_le_bytes());
        buffer.extend_from_slice(&self.pts.to_le_bytes());
        buffer.extend_from_slice(&self.duration.to_le_bytes());
        buffer.extend_from_slice(&self.segment_duration.to_le_bytes());
        buffer.extend_from_slice(&self.data_size.to_le_bytes());
        buffer.extend_from_slice(&self.error_streamer.to_le_bytes());
    }
}

/// A parsed chunk: header plus payload bytes.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub header: ChunkHeader,
    pub payload: Bytes,
}

impl Chunk {
    pub fn new(header: ChunkHeader, payload: Bytes) -> Self {
        Self { header, payload }
    }

    /// Parses `header || payload` off the wire. The payload length is taken
    /// from the header's `data_size`.
    pub fn from_bytes(buffer: &[u8]) -> Result<Self, Error> {
        let header = ChunkHeader::parse(buffer)?;
        let end = HEADER_SIZE + header.data_size as usize;
        if buffer.len() < end {
            return Err(Error::TruncatedChunk(format!(
                "payload needs {} bytes, got {}",
                header.data_size,
                buffer.len() - HEADER_SIZE
            )));
        }
        let payload = Bytes::copy_from_slice(&buffer[HEADER_SIZE..end]);
        Ok(Self { header, payload })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_header() -> ChunkHeader {
        ChunkHeader {
            type_id: ChunkType::Vpcc,
            media_id: 3,
            segment_id: 17,
            number_of_frames: 30,
            pts: 1.25,
            duration: 1.0,
            segment_duration: 1.0,
            data_size: 4,
            error_streamer: 0,
        }
    }

    #[test]
    fn test_header_roundtrip() {
        let header = sample_header();
        let mut wire = Vec::new();
        header.write_to(&mut wire);
        assert_eq!(wire.len(), HEADER_SIZE);
        assert_eq!(ChunkHeader::parse(&wire).unwrap(), header);
    }

    #[test]
    fn test_chunk_parse_with_payload() {
        let header = sample_header();
        let mut wire = Vec::new();
        header.write_to(&mut wire);
        wire.extend_from_slice(&[0xDE, 0xAD, 0xBE, 0xEF]);
        // Trailing bytes beyond data_size belong to the next chunk.
        wire.push(0xFF);

        let chunk = Chunk::from_bytes(&wire).unwrap();
        assert_eq!(chunk.header, header);
        assert_eq!(chunk.payload.as_ref(), &[0xDE, 0xAD, 0xBE, 0xEF]);
    }

    #[test]
    fn test_truncated_header_rejected() {
        assert!(ChunkHeader::parse(&[0u8; 10]).is_err());
    }

    #[test]
    fn test_truncated_payload_rejected() {
        let mut wire = Vec::new();
        sample_header().write_to(&mut wire);
        wire.extend_from_slice(&[1, 2]);
        assert!(Chunk::from_bytes(&wire).is_err());
    }

    #[test]
    fn test_unknown_type_rejected() {
        let mut wire = Vec::new();
        sample_header().write_to(&mut wire);
        wire[0] = 42;
        assert!(ChunkHeader::parse(&wire).is_err());
    }

    #[test]
    fn test_video_kinds() {
        assert!(ChunkType::Vpcc.is_video());
        assert!(ChunkType::Miv.is_video());
        assert!(ChunkType::Hevc.is_video());
        assert!(!ChunkType::Audio.is_video());
        assert!(!ChunkType::Haptic.is_video());
    }
}
