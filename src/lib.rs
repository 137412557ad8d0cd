//! V-PCC Playback Core
//!
//! Reconstructs 3D point clouds from decoded 2D video atlases in real time.
//! The host feeds media chunks in and owns the draw pass; this crate owns
//! everything in between: bounded packet pools and queues, per-stream
//! decoder workers, the decoded-frame assembler, and the wgpu compute
//! pipeline that unprojects occupancy-masked atlas pixels into a densely
//! packed vertex image with an indirect draw count.

pub mod chunk;
pub mod config;
pub mod error;
pub mod gpu;
pub mod media;
pub mod packet;
pub mod queue;
pub mod session;
pub mod synth;
pub mod vpcc;
pub mod worker;

pub use chunk::{Chunk, ChunkHeader, ChunkType};
pub use config::{DecoderCodecConfig, DecoderConfig, PlayerConfig, SynthesizerConfig};
pub use error::{Error, ErrorCallback, Severity};
pub use gpu::{GpuContext, TextureProperty};
pub use media::{DecodedFrame, PixelFormat, StreamKind, VideoFrame};
pub use packet::{Factory, Packet};
pub use queue::{connect, disconnect, Input, Output};
pub use session::PlaybackSession;
pub use synth::Synthesizer;
pub use vpcc::{ContentType, FrameMetadata, GenericMetadata, Patch};
