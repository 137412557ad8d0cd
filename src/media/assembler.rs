//! Decoded-frame assembler
//!
//! Pairs each metadata envelope with the matching decoded frame of every
//! expected stream and emits one synchronized `DecodedFrame`, in metadata
//! order. The streams decode at unequal rates, so availability is checked
//! non-destructively and nothing is popped until the whole set is ready.
//! Presentation timestamps ride a per-chunk ticket queue.

use crate::chunk::ChunkHeader;
use crate::media::{DecodedFrame, StreamKind, VideoFrame};
use crate::packet::Packet;
use crate::queue::{Input, Output};
use crate::vpcc::GenericMetadata;
use crate::worker::{Service, ServiceHandle};
use log::warn;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// How presentation timestamps advance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimestampPolicy {
    /// File playback: each texture frame advances the source chunk's PTS
    /// by `duration / number_of_frames`.
    Offline,
    /// Live playback: the first ticket's PTS (wall-clock anchored
    /// upstream) is pinned, then each segment advances it by its duration.
    Streaming,
}

/// Decode-rate samples kept when FPS measurement is on.
const MAX_FPS_SAMPLES: usize = 100;

struct AssemblerWorker {
    metadata_input: Arc<Input<GenericMetadata>>,
    video_inputs: [Arc<Input<VideoFrame>>; StreamKind::COUNT],
    ticket_input: Arc<Input<ChunkHeader>>,
    output: Arc<Output<DecodedFrame>>,
    policy: TimestampPolicy,
    origin_pts: f64,
    first_pts_pending: bool,
    measure_fps: bool,
    last_frame_at: Instant,
    fps_samples: Arc<Mutex<VecDeque<Duration>>>,
}

impl AssemblerWorker {
    /// Takes the next presentation timestamp off the ticket queue,
    /// advancing the shared chunk header for the frames that follow.
    fn next_pts(&mut self) -> Option<(f64, u16)> {
        let ticket = self.ticket_input.front()?;
        let (pts, media_id) = {
            let mut header = ticket.lock();
            match self.policy {
                TimestampPolicy::Offline => {
                    let pts = header.pts;
                    header.pts += header.duration / f64::from(header.number_of_frames.max(1));
                    (pts, header.media_id)
                }
                TimestampPolicy::Streaming => {
                    if self.first_pts_pending {
                        self.origin_pts = header.pts;
                        self.first_pts_pending = false;
                    } else {
                        self.origin_pts += header.duration;
                    }
                    (self.origin_pts, header.media_id)
                }
            }
        };
        self.ticket_input.pop();
        Some((pts, media_id))
    }

    fn record_fps_sample(&mut self) {
        if !self.measure_fps {
            return;
        }
        let now = Instant::now();
        let delta = now - self.last_frame_at;
        self.last_frame_at = now;

        let mut samples = self.fps_samples.lock();
        samples.push_back(delta);
        if samples.len() > MAX_FPS_SAMPLES {
            samples.clear();
            warn!(
                "flushing decoder FPS measures as they were not consumed; \
                 disable MeasureFPS if unneeded"
            );
        }
    }
}

impl Service for AssemblerWorker {
    fn name(&self) -> &'static str {
        "frame-assembler"
    }

    fn idle(&mut self) {
        if !self.metadata_input.wait() {
            std::thread::sleep(Duration::from_micros(100));
            return;
        }
        let Some(metadata_packet) = self.metadata_input.front() else {
            return;
        };

        // Decide which streams this frame needs, without popping anything.
        let mut expected = [false; StreamKind::COUNT];
        {
            let metadata = metadata_packet.lock();
            for kind in StreamKind::ALL {
                expected[kind.index()] = metadata.expects(kind);
            }
        }

        let ready = StreamKind::ALL.iter().all(|kind| {
            !expected[kind.index()] || !self.video_inputs[kind.index()].is_empty()
        });
        if !ready || self.ticket_input.is_empty() {
            // A stream is lagging; retry shortly without tearing the set.
            std::thread::sleep(Duration::from_micros(100));
            return;
        }

        self.record_fps_sample();
        let Some((pts, media_id)) = self.next_pts() else {
            return;
        };

        let mut decoded = DecodedFrame::default();
        {
            let metadata = metadata_packet.lock();
            decoded.content_id = metadata.content_id;
            decoded.segment_id = metadata.segment_id;
        }

        for kind in StreamKind::ALL {
            if !expected[kind.index()] {
                continue;
            }
            let Some(frame) = self.video_inputs[kind.index()].pop() else {
                // Checked non-empty above; a racing close drops the set.
                return;
            };
            if kind == StreamKind::Texture {
                let mut texture = frame.lock();
                texture.timestamp = Duration::from_secs_f64(pts.max(0.0));
                texture.stream_id = media_id;
            }
            decoded.frames[kind.index()] = Some(frame);
        }

        decoded.metadata = Some(metadata_packet.clone());
        self.metadata_input.pop();
        self.output.push(Packet::new(decoded));
    }

    fn finalize(&mut self) {
        // Remaining stream packets go back to their pools on close.
        for input in &self.video_inputs {
            input.clear();
        }
        self.ticket_input.clear();
        self.metadata_input.clear();
    }
}

/// Owning handle for the assembler worker and its queues.
pub struct FrameAssembler {
    metadata_input: Arc<Input<GenericMetadata>>,
    video_inputs: [Arc<Input<VideoFrame>>; StreamKind::COUNT],
    ticket_input: Arc<Input<ChunkHeader>>,
    output: Arc<Output<DecodedFrame>>,
    fps_samples: Arc<Mutex<VecDeque<Duration>>>,
    policy: TimestampPolicy,
    measure_fps: bool,
    handle: Option<ServiceHandle>,
}

impl FrameAssembler {
    pub fn new(policy: TimestampPolicy, measure_fps: bool) -> Self {
        Self {
            metadata_input: Arc::new(Input::new()),
            video_inputs: std::array::from_fn(|_| Arc::new(Input::new())),
            ticket_input: Arc::new(Input::new()),
            output: Arc::new(Output::new()),
            fps_samples: Arc::new(Mutex::new(VecDeque::new())),
            policy,
            measure_fps,
            handle: None,
        }
    }

    /// Opens every queue and spawns the worker.
    pub fn start(&mut self) {
        if self.handle.is_some() {
            return;
        }
        self.metadata_input.open();
        self.ticket_input.open();
        for input in &self.video_inputs {
            input.open();
        }

        self.handle = Some(ServiceHandle::spawn(AssemblerWorker {
            metadata_input: Arc::clone(&self.metadata_input),
            video_inputs: std::array::from_fn(|i| Arc::clone(&self.video_inputs[i])),
            ticket_input: Arc::clone(&self.ticket_input),
            output: Arc::clone(&self.output),
            policy: self.policy,
            origin_pts: 0.0,
            first_pts_pending: true,
            measure_fps: self.measure_fps,
            last_frame_at: Instant::now(),
            fps_samples: Arc::clone(&self.fps_samples),
        }));
    }

    pub fn metadata_input(&self) -> &Arc<Input<GenericMetadata>> {
        &self.metadata_input
    }

    pub fn video_input(&self, kind: StreamKind) -> &Arc<Input<VideoFrame>> {
        &self.video_inputs[kind.index()]
    }

    pub fn ticket_input(&self) -> &Arc<Input<ChunkHeader>> {
        &self.ticket_input
    }

    /// Synchronized frame fan-out; connect the consumer's input here.
    pub fn output(&self) -> &Arc<Output<DecodedFrame>> {
        &self.output
    }

    /// Drains the collected decode-rate samples.
    pub fn take_fps_samples(&self) -> Vec<Duration> {
        self.fps_samples.lock().drain(..).collect()
    }

    /// Closes the inputs first so the worker unblocks, then joins it.
    pub fn stop(&mut self) {
        self.metadata_input.close();
        self.ticket_input.close();
        for input in &self.video_inputs {
            input.close();
        }
        if let Some(mut handle) = self.handle.take() {
            handle.stop();
        }
    }
}

impl Drop for FrameAssembler {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::ChunkType;
    use crate::media::PixelFormat;
    use crate::queue::connect;
    use crate::vpcc::{FrameMetadata, Patch};

    fn test_metadata(frame_index: i32) -> GenericMetadata {
        GenericMetadata::vpcc(
            FrameMetadata {
                frame_index,
                frame_width: 16,
                frame_height: 16,
                patches: vec![Patch::default()],
                block_to_patch: vec![1],
            },
            7,
            frame_index,
        )
    }

    fn test_frame() -> Packet<VideoFrame> {
        let mut frame = VideoFrame::default();
        frame.reset(PixelFormat::Yuv400P8, 16, 16, 1);
        Packet::new(frame)
    }

    fn test_ticket(frames: u32, pts: f64, duration: f64) -> Packet<ChunkHeader> {
        Packet::new(ChunkHeader {
            type_id: ChunkType::Vpcc,
            media_id: 3,
            segment_id: 0,
            number_of_frames: frames,
            pts,
            duration,
            segment_duration: duration,
            data_size: 0,
            error_streamer: 0,
        })
    }

    fn push_streams(assembler: &FrameAssembler, kinds: &[StreamKind]) {
        for &kind in kinds {
            assembler.video_input(kind).push(test_frame());
        }
    }

    #[test]
    fn test_assembles_in_metadata_order() {
        let mut assembler = FrameAssembler::new(TimestampPolicy::Offline, false);
        assembler.start();

        let sink = Arc::new(Input::new());
        sink.open();
        connect(assembler.output(), &sink);

        let ticket = test_ticket(3, 0.0, 3.0);
        for index in 0..3 {
            assembler.metadata_input().push(Packet::new(test_metadata(index)));
            assembler.ticket_input().push(ticket.clone());
            push_streams(
                &assembler,
                &[StreamKind::Texture, StreamKind::Occupancy, StreamKind::Geometry],
            );
        }

        for expected_index in 0..3 {
            assert!(sink.wait_for(Duration::from_secs(1)));
            let decoded = sink.pop().unwrap();
            let decoded = decoded.lock();
            let metadata = decoded.metadata.as_ref().unwrap().lock();
            assert_eq!(
                metadata.vpcc.as_ref().unwrap().frame_index,
                expected_index
            );
            assert!(decoded.frame(StreamKind::Texture).is_some());
            assert!(decoded.frame(StreamKind::Transparency).is_none());
            assert_eq!(decoded.content_id, 7);
        }

        assembler.stop();
    }

    #[test]
    fn test_waits_for_every_expected_stream() {
        let mut assembler = FrameAssembler::new(TimestampPolicy::Offline, false);
        assembler.start();

        let sink = Arc::new(Input::new());
        sink.open();
        connect(assembler.output(), &sink);

        assembler.metadata_input().push(Packet::new(test_metadata(0)));
        assembler.ticket_input().push(test_ticket(1, 0.0, 1.0));
        // Geometry is missing: nothing may be emitted or consumed.
        push_streams(&assembler, &[StreamKind::Texture, StreamKind::Occupancy]);

        assert!(!sink.wait_for(Duration::from_millis(50)));
        assert_eq!(assembler.video_input(StreamKind::Texture).pending(), 1);

        push_streams(&assembler, &[StreamKind::Geometry]);
        assert!(sink.wait_for(Duration::from_secs(1)));

        assembler.stop();
    }

    #[test]
    fn test_offline_timestamps_advance_per_frame() {
        let mut assembler = FrameAssembler::new(TimestampPolicy::Offline, false);
        assembler.start();

        let sink = Arc::new(Input::new());
        sink.open();
        connect(assembler.output(), &sink);

        // One 2-frame chunk of 1s: frame PTS 4.0 then 4.5.
        let ticket = test_ticket(2, 4.0, 1.0);
        for index in 0..2 {
            assembler.metadata_input().push(Packet::new(test_metadata(index)));
            assembler.ticket_input().push(ticket.clone());
            push_streams(
                &assembler,
                &[StreamKind::Texture, StreamKind::Occupancy, StreamKind::Geometry],
            );
        }

        let mut timestamps = Vec::new();
        for _ in 0..2 {
            assert!(sink.wait_for(Duration::from_secs(1)));
            let decoded = sink.pop().unwrap();
            let decoded = decoded.lock();
            let texture = decoded.frame(StreamKind::Texture).unwrap().lock();
            timestamps.push(texture.timestamp);
        }
        assert_eq!(timestamps[0], Duration::from_secs_f64(4.0));
        assert_eq!(timestamps[1], Duration::from_secs_f64(4.5));

        assembler.stop();
    }

    #[test]
    fn test_streaming_timestamps_pin_first_then_advance() {
        let mut assembler = FrameAssembler::new(TimestampPolicy::Streaming, false);
        assembler.start();

        let sink = Arc::new(Input::new());
        sink.open();
        connect(assembler.output(), &sink);

        for segment in 0..2 {
            assembler.metadata_input().push(Packet::new(test_metadata(segment)));
            assembler
                .ticket_input()
                .push(test_ticket(1, 100.0, 2.0));
            push_streams(
                &assembler,
                &[StreamKind::Texture, StreamKind::Occupancy, StreamKind::Geometry],
            );
        }

        let mut timestamps = Vec::new();
        for _ in 0..2 {
            assert!(sink.wait_for(Duration::from_secs(1)));
            let decoded = sink.pop().unwrap();
            let decoded = decoded.lock();
            timestamps.push(decoded.frame(StreamKind::Texture).unwrap().lock().timestamp);
        }
        // First PTS pinned from the ticket, then advanced by duration.
        assert_eq!(timestamps[0], Duration::from_secs_f64(100.0));
        assert_eq!(timestamps[1], Duration::from_secs_f64(102.0));

        assembler.stop();
    }

    #[test]
    fn test_stop_with_draining_streams_releases_packets() {
        let mut assembler = FrameAssembler::new(TimestampPolicy::Offline, false);
        assembler.start();

        push_streams(&assembler, &[StreamKind::Texture, StreamKind::Occupancy]);
        assembler.stop();

        assert_eq!(assembler.video_input(StreamKind::Texture).pending(), 0);
        assert_eq!(assembler.video_input(StreamKind::Occupancy).pending(), 0);
    }
}
