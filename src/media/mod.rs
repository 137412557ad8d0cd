//! Media Pipeline
//!
//! Decoded video frames, pixel format descriptions, and the per-stream
//! decoding / frame assembly workers.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

pub mod assembler;
pub mod decoder;

pub use assembler::{FrameAssembler, TimestampPolicy};
pub use decoder::{StreamDecoder, VideoDecode};

use crate::packet::Packet;
use crate::vpcc::GenericMetadata;

/// Global frame ID counter for unique frame identification
static FRAME_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Generate a new unique frame ID
pub fn next_frame_id() -> u64 {
    FRAME_ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// The four atlas video streams of a V-PCC item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    Texture,
    Occupancy,
    Geometry,
    Transparency,
}

impl StreamKind {
    pub const ALL: [StreamKind; 4] = [
        StreamKind::Texture,
        StreamKind::Occupancy,
        StreamKind::Geometry,
        StreamKind::Transparency,
    ];

    pub const COUNT: usize = 4;

    pub fn index(self) -> usize {
        match self {
            StreamKind::Texture => 0,
            StreamKind::Occupancy => 1,
            StreamKind::Geometry => 2,
            StreamKind::Transparency => 3,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            StreamKind::Texture => "texture",
            StreamKind::Occupancy => "occupancy",
            StreamKind::Geometry => "geometry",
            StreamKind::Transparency => "transparency",
        }
    }
}

/// Pixel format of a decoded video frame.
///
/// The `MediaCodec*` variants are opaque hardware-decoder outputs whose
/// planes never cross the CPU; they report zero planes here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PixelFormat {
    Rgb8,
    Rgba8,
    Bgr8,
    Yuv400P8,
    Yuv400P10Le,
    Yuv400P16Le,
    #[default]
    Yuv420P8,
    Yuv420P10Le,
    Yuv420P16Le,
    Yuv422P8,
    Yuv444P8,
    Nv8,
    Nv10,
    MediaCodec,
    MediaCodecYuv,
    MediaCodecRgb,
}

impl PixelFormat {
    /// Number of planes the format stores on the CPU side.
    pub fn plane_count(self) -> usize {
        match self {
            Self::Rgb8 | Self::Rgba8 | Self::Bgr8 => 1,
            Self::Yuv400P8 | Self::Yuv400P10Le | Self::Yuv400P16Le => 1,
            Self::Yuv420P8
            | Self::Yuv420P10Le
            | Self::Yuv420P16Le
            | Self::Yuv422P8
            | Self::Yuv444P8 => 3,
            Self::Nv8 | Self::Nv10 => 2,
            Self::MediaCodec | Self::MediaCodecYuv | Self::MediaCodecRgb => 0,
        }
    }

    /// Bytes per sample in the given plane. For packed RGB a sample is the
    /// whole pixel; for the NV formats the chroma plane sample is the
    /// interleaved UV pair.
    pub fn bytes_per_sample(self, plane: usize) -> usize {
        match self {
            Self::Rgb8 | Self::Bgr8 => 3,
            Self::Rgba8 => 4,
            Self::Yuv400P8 | Self::Yuv420P8 | Self::Yuv422P8 | Self::Yuv444P8 => 1,
            Self::Yuv400P10Le
            | Self::Yuv400P16Le
            | Self::Yuv420P10Le
            | Self::Yuv420P16Le => 2,
            Self::Nv8 => {
                if plane == 0 {
                    1
                } else {
                    2
                }
            }
            Self::Nv10 => {
                if plane == 0 {
                    2
                } else {
                    4
                }
            }
            Self::MediaCodec | Self::MediaCodecYuv | Self::MediaCodecRgb => 0,
        }
    }

    /// Horizontal and vertical subsampling shifts for the given plane
    /// (plane width = frame width >> shift).
    pub fn subsampling(self, plane: usize) -> (u32, u32) {
        if plane == 0 {
            return (0, 0);
        }
        match self {
            Self::Yuv420P8 | Self::Yuv420P10Le | Self::Yuv420P16Le | Self::Nv8 | Self::Nv10 => {
                (1, 1)
            }
            Self::Yuv422P8 => (1, 0),
            _ => (0, 0),
        }
    }

    /// Row stride in bytes for the given plane, rounded up to the stride
    /// granularity `lcm(bytes_per_sample, alignment)`.
    pub fn line_stride(self, plane: usize, frame_width: u32, alignment: usize) -> usize {
        let bps = self.bytes_per_sample(plane);
        if bps == 0 {
            return 0;
        }
        let (h_shift, _) = self.subsampling(plane);
        let samples = (frame_width >> h_shift) as usize;
        let granularity = lcm(bps, alignment.max(1));
        let row = samples * bps;
        row.div_ceil(granularity) * granularity
    }

    /// True when the payload lives in opaque decoder-owned surfaces.
    pub fn is_hardware(self) -> bool {
        matches!(
            self,
            Self::MediaCodec | Self::MediaCodecYuv | Self::MediaCodecRgb
        )
    }
}

fn gcd(a: usize, b: usize) -> usize {
    if b == 0 {
        a
    } else {
        gcd(b, a % b)
    }
}

fn lcm(a: usize, b: usize) -> usize {
    a / gcd(a, b) * b
}

/// One planar image delivered by a decoder.
///
/// Instances live in a decoder-owned `Factory` pool: the decoder acquires a
/// slot, fills the planes in place, and pushes the packet downstream; when
/// the assembler releases it the slot is recycled.
#[derive(Debug, Clone, Default)]
pub struct VideoFrame {
    pub frame_id: u64,
    pub pixel_format: PixelFormat,
    pub width: u32,
    pub height: u32,
    /// Plane byte buffers, `pixel_format.plane_count()` of them.
    pub planes: Vec<Vec<u8>>,
    /// Matching row strides in bytes.
    pub strides: Vec<u32>,
    pub timestamp: Duration,
    /// Copied from the source chunk's media id.
    pub stream_id: u16,
}

impl VideoFrame {
    /// Resets the frame for reuse, sizing its planes for `format` at
    /// `width` x `height` with the given stride alignment.
    pub fn reset(&mut self, format: PixelFormat, width: u32, height: u32, alignment: usize) {
        self.frame_id = next_frame_id();
        self.pixel_format = format;
        self.width = width;
        self.height = height;
        self.timestamp = Duration::ZERO;

        let planes = format.plane_count();
        self.planes.resize(planes, Vec::new());
        self.strides.resize(planes, 0);
        for plane in 0..planes {
            let stride = format.line_stride(plane, width, alignment);
            let (_, v_shift) = format.subsampling(plane);
            let rows = (height >> v_shift) as usize;
            self.planes[plane].resize(stride * rows, 0);
            self.strides[plane] = stride as u32;
        }
    }
}

/// The synchronized unit handed to the synthesizer: one metadata envelope
/// plus the decoded frame of every expected stream.
#[derive(Clone, Default)]
pub struct DecodedFrame {
    pub metadata: Option<Packet<GenericMetadata>>,
    pub frames: [Option<Packet<VideoFrame>>; StreamKind::COUNT],
    pub content_id: i32,
    pub segment_id: i32,
}

impl DecodedFrame {
    pub fn frame(&self, kind: StreamKind) -> Option<&Packet<VideoFrame>> {
        self.frames[kind.index()].as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plane_counts() {
        assert_eq!(PixelFormat::Rgba8.plane_count(), 1);
        assert_eq!(PixelFormat::Yuv420P8.plane_count(), 3);
        assert_eq!(PixelFormat::Nv8.plane_count(), 2);
        assert_eq!(PixelFormat::MediaCodec.plane_count(), 0);
    }

    #[test]
    fn test_yuv420_10bit_strides() {
        let format = PixelFormat::Yuv420P10Le;
        // 2-byte samples, 4-byte alignment: lcm = 4, 321 * 2 rounds to 644.
        assert_eq!(format.line_stride(0, 321, 4), 644);
        // Chroma plane is half width: 160 samples * 2 bytes.
        assert_eq!(format.line_stride(1, 321, 4), 320);
    }

    #[test]
    fn test_packed_rgb_stride_granularity() {
        // 3-byte pixels with 4-byte alignment round to lcm = 12.
        assert_eq!(PixelFormat::Rgb8.line_stride(0, 5, 4), 24);
        // Alignment 1 keeps the tight stride.
        assert_eq!(PixelFormat::Rgb8.line_stride(0, 5, 1), 15);
    }

    #[test]
    fn test_nv12_chroma_sampling() {
        assert_eq!(PixelFormat::Nv8.subsampling(1), (1, 1));
        assert_eq!(PixelFormat::Nv8.bytes_per_sample(1), 2);
        // Interleaved UV plane covers full frame width in bytes.
        assert_eq!(PixelFormat::Nv8.line_stride(1, 64, 1), 64);
    }

    #[test]
    fn test_frame_reset_sizes_planes() {
        let mut frame = VideoFrame::default();
        frame.reset(PixelFormat::Yuv420P8, 64, 48, 1);
        assert_eq!(frame.planes.len(), 3);
        assert_eq!(frame.planes[0].len(), 64 * 48);
        assert_eq!(frame.planes[1].len(), 32 * 24);
        assert_eq!(frame.strides[0], 64);

        let first_id = frame.frame_id;
        frame.reset(PixelFormat::Yuv420P8, 64, 48, 1);
        assert!(frame.frame_id > first_id);
    }
}
