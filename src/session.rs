//! Playback session
//!
//! The chunk-facing front of the pipeline: routes incoming media chunks to
//! the bitstream parser and the per-stream decoders, feeds the assembler's
//! metadata and timestamp queues, and hands synchronized frames to the
//! render thread. The parser itself is an external collaborator injected
//! at construction.

use crate::chunk::{Chunk, ChunkType};
use crate::config::{DecoderCodecConfig, DecoderConfig, PlayerConfig};
use crate::error::{ErrorCallback, Severity};
use crate::media::{
    DecodedFrame, FrameAssembler, StreamDecoder, StreamKind, TimestampPolicy, VideoDecode,
};
use crate::packet::Packet;
use crate::queue::{connect, Input};
use crate::vpcc::{FrameMetadata, GenericMetadata};
use bytes::Bytes;
use log::{info, warn};
use std::sync::Arc;
use std::time::Duration;

/// Per-stream compressed payloads produced by the parser for one chunk.
/// Only the first atlas is decoded.
pub type StreamPayloads = [Option<Bytes>; StreamKind::COUNT];

/// The bitstream parser contract: a V-PCC access-unit buffer in, the
/// per-frame metadata plus per-stream video payloads out.
pub type VpccParser = Box<dyn Fn(&[u8]) -> (Vec<FrameMetadata>, StreamPayloads) + Send + Sync>;

/// Factory producing a decoder backend for one stream kind, handed the
/// codec's configured settings on first open.
pub type DecoderFactory =
    Box<dyn Fn(StreamKind, &DecoderCodecConfig) -> Box<dyn VideoDecode> + Send>;

/// Sink for chunk kinds the core forwards unchanged.
pub type ChunkSink = Box<dyn Fn(Chunk) + Send + Sync>;

/// Decoded frame slots per stream pool; bounds decoder memory.
const FRAME_POOL_CAPACITY: usize = 10;

/// Error code reported when a chunk arrives with no codec configured.
const NO_CODEC_ERROR_CODE: u32 = 201;

pub struct PlaybackSession {
    parser: VpccParser,
    decoder_factory: DecoderFactory,
    decoder_config: DecoderConfig,
    decoders: Vec<StreamDecoder>,
    assembler: FrameAssembler,
    decoded_input: Arc<Input<DecodedFrame>>,
    requested_media_id: Option<u16>,
    atlas_size: (u32, u32),
    error_callback: Option<ErrorCallback>,
    audio_sink: Option<ChunkSink>,
    haptic_sink: Option<ChunkSink>,
    measure_fps: bool,
    started: bool,
}

impl PlaybackSession {
    pub fn new(
        config: &PlayerConfig,
        policy: TimestampPolicy,
        parser: VpccParser,
        decoder_factory: DecoderFactory,
    ) -> Self {
        Self {
            parser,
            decoder_factory,
            decoder_config: config.decoder.clone(),
            decoders: Vec::new(),
            assembler: FrameAssembler::new(policy, config.decoder.measure_fps),
            decoded_input: Arc::new(Input::new()),
            requested_media_id: None,
            atlas_size: (0, 0),
            error_callback: None,
            audio_sink: None,
            haptic_sink: None,
            measure_fps: config.decoder.measure_fps,
            started: false,
        }
    }

    pub fn set_error_callback(&mut self, callback: ErrorCallback) {
        self.error_callback = Some(callback);
    }

    pub fn set_audio_sink(&mut self, sink: ChunkSink) {
        self.audio_sink = Some(sink);
    }

    pub fn set_haptic_sink(&mut self, sink: ChunkSink) {
        self.haptic_sink = Some(sink);
    }

    /// Starts the assembler and begins accepting chunks for `media_id`.
    /// The stream decoders open lazily on the first video chunk, once the
    /// arriving codec is known.
    pub fn start(&mut self, media_id: u16) {
        if self.started {
            return;
        }
        self.requested_media_id = Some(media_id);

        self.decoded_input.open();
        connect(self.assembler.output(), &self.decoded_input);
        self.assembler.start();
        self.started = true;
        info!("playback session started for media {media_id}");
    }

    /// Opens the four stream decoders for `codec` if not already open,
    /// handing the codec's configured settings to the factory. A chunk
    /// arriving with no codec configured is a fatal condition.
    fn ensure_decoders(&mut self, codec: &str) -> bool {
        if !self.decoders.is_empty() {
            return true;
        }

        let Some(entry) = self.decoder_config.codec(codec) else {
            warn!("no decoder configured for codec {codec}, chunk dropped");
            if let Some(callback) = &self.error_callback {
                callback(Severity::Fatal, NO_CODEC_ERROR_CODE);
            }
            return false;
        };
        info!(
            "opening {codec} decoders: {} threads, hardware acceleration: {}",
            entry.threads, entry.hardware_acceleration
        );

        for kind in StreamKind::ALL {
            let backend = (self.decoder_factory)(kind, entry);
            let decoder = StreamDecoder::spawn(kind, backend, FRAME_POOL_CAPACITY);
            connect(decoder.output(), self.assembler.video_input(kind));
            self.decoders.push(decoder);
        }
        true
    }

    /// Switches the session to another media item; chunks for other items
    /// are dropped.
    pub fn request_media(&mut self, media_id: u16) {
        self.requested_media_id = Some(media_id);
        info!("media request set to {media_id}");
    }

    /// Atlas dimensions observed on the latest metadata, `(0, 0)` until
    /// the first V-PCC chunk arrives.
    pub fn atlas_size(&self) -> (u32, u32) {
        self.atlas_size
    }

    /// Routes one chunk from the source. Never blocks on the GPU; may
    /// block on decoder backpressure.
    pub fn on_chunk(&mut self, chunk: Chunk) {
        if !self.started {
            return;
        }
        if Some(chunk.header.media_id) != self.requested_media_id {
            return;
        }

        if chunk.header.error_streamer != 0 {
            // Upstream trouble is surfaced but playback carries on; the
            // host decides whether the condition is terminal.
            if let Some(callback) = &self.error_callback {
                callback(Severity::Warning, u32::from(chunk.header.error_streamer));
            }
        }

        match chunk.header.type_id {
            ChunkType::Vpcc => self.on_vpcc_chunk(chunk),
            ChunkType::Hevc | ChunkType::Vvc => self.on_planar_video_chunk(chunk),
            ChunkType::Miv => {
                // NOTE: MIV content routes through its own access-unit
                // decoder, which this core does not carry.
                warn!("MIV chunk ignored: unsupported content type");
            }
            ChunkType::Audio => {
                if let Some(sink) = &self.audio_sink {
                    sink(chunk);
                }
            }
            ChunkType::Haptic => {
                if let Some(sink) = &self.haptic_sink {
                    sink(chunk);
                }
            }
        }
    }

    fn on_vpcc_chunk(&mut self, chunk: Chunk) {
        if !self.ensure_decoders("vpcc") {
            return;
        }

        let (frames_metadata, payloads) = (self.parser)(&chunk.payload);
        if frames_metadata.is_empty() {
            warn!("V-PCC chunk produced no metadata, segment {}", chunk.header.segment_id);
            return;
        }

        if frames_metadata.len() != chunk.header.number_of_frames as usize {
            warn!(
                "V-PCC chunk advertises {} frames but carries {}",
                chunk.header.number_of_frames,
                frames_metadata.len()
            );
        }

        self.atlas_size = (
            frames_metadata[0].frame_width,
            frames_metadata[0].frame_height,
        );

        // One ticket per frame, all sharing the chunk's header so the
        // assembler can advance its PTS in place.
        let ticket = Packet::new(chunk.header.clone());
        let content_id = i32::from(chunk.header.media_id);
        let segment_id = chunk.header.segment_id as i32;

        for metadata in frames_metadata {
            let envelope = GenericMetadata::vpcc(metadata, content_id, segment_id);
            self.assembler.metadata_input().push(Packet::new(envelope));
            self.assembler.ticket_input().push(ticket.clone());
        }

        for kind in StreamKind::ALL {
            if let Some(payload) = &payloads[kind.index()] {
                self.decoders[kind.index()]
                    .input()
                    .push(Packet::new(payload.clone()));
            }
        }
    }

    /// Plain 2D video: an empty metadata envelope that expects only the
    /// texture stream.
    fn on_planar_video_chunk(&mut self, chunk: Chunk) {
        let codec = match chunk.header.type_id {
            ChunkType::Vvc => "vvc",
            _ => "hevc",
        };
        if !self.ensure_decoders(codec) {
            return;
        }

        let envelope = GenericMetadata {
            content_id: i32::from(chunk.header.media_id),
            segment_id: chunk.header.segment_id as i32,
            ..GenericMetadata::default()
        };

        let ticket = Packet::new(chunk.header.clone());
        for _ in 0..chunk.header.number_of_frames.max(1) {
            self.assembler
                .metadata_input()
                .push(Packet::new(envelope.clone()));
            self.assembler.ticket_input().push(ticket.clone());
        }

        self.decoders[StreamKind::Texture.index()]
            .input()
            .push(Packet::new(chunk.payload));
    }

    /// Blocks up to `timeout` for the next synchronized frame.
    pub fn poll_frame(&self, timeout: Duration) -> Option<Packet<DecodedFrame>> {
        if self.decoded_input.wait_for(timeout) {
            self.decoded_input.pop()
        } else {
            None
        }
    }

    /// Drains the decode-rate samples collected when `MeasureFPS` is on.
    pub fn take_fps_samples(&self) -> Vec<Duration> {
        self.assembler.take_fps_samples()
    }

    pub fn measures_fps(&self) -> bool {
        self.measure_fps
    }

    /// Closes every input first so blocked workers wake, then joins them.
    pub fn stop(&mut self) {
        if !self.started {
            return;
        }
        for decoder in &self.decoders {
            decoder.input().close();
        }
        self.decoded_input.close();
        self.assembler.stop();
        for decoder in &mut self.decoders {
            decoder.stop();
        }
        self.decoders.clear();
        self.decoded_input.clear();
        self.started = false;
        info!("playback session stopped");
    }
}

impl Drop for PlaybackSession {
    fn drop(&mut self) {
        self.stop();
    }
}
