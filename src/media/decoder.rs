//! Per-stream video decoding
//!
//! The underlying decoder is an external collaborator; only its
//! packet-in / frame-out contract lives here. Each of the four atlas
//! streams gets one `StreamDecoder` worker that feeds compressed access
//! units to a `VideoDecode` implementation and fans the decoded frames out
//! to the assembler. Frame buffers come from a bounded pool, so a stalled
//! consumer pauses the decoder instead of growing memory.

use crate::media::{StreamKind, VideoFrame};
use crate::packet::{Factory, Packet};
use crate::queue::{Input, Output};
use crate::worker::{Service, ServiceHandle};
use bytes::Bytes;
use log::{error, info};
use std::sync::Arc;
use std::time::Duration;

/// Packet-in / frame-out contract of a video decoder backend.
pub trait VideoDecode: Send + 'static {
    /// Feeds one compressed access unit. Ready frames are written into
    /// pool slots and appended to `out`; a decoder with internal delay may
    /// produce zero frames for several calls.
    fn decode(
        &mut self,
        data: &[u8],
        pool: &Factory<VideoFrame>,
        out: &mut Vec<Packet<VideoFrame>>,
    ) -> anyhow::Result<()>;

    /// Drains any delayed frames at end of stream.
    fn flush(
        &mut self,
        pool: &Factory<VideoFrame>,
        out: &mut Vec<Packet<VideoFrame>>,
    ) -> anyhow::Result<()> {
        let _ = (pool, out);
        Ok(())
    }
}

fn worker_name(kind: StreamKind) -> &'static str {
    match kind {
        StreamKind::Texture => "texture-decoder",
        StreamKind::Occupancy => "occupancy-decoder",
        StreamKind::Geometry => "geometry-decoder",
        StreamKind::Transparency => "transparency-decoder",
    }
}

struct DecoderWorker {
    kind: StreamKind,
    backend: Box<dyn VideoDecode>,
    input: Arc<Input<Bytes>>,
    output: Arc<Output<VideoFrame>>,
    pool: Arc<Factory<VideoFrame>>,
    ready: Vec<Packet<VideoFrame>>,
}

impl Service for DecoderWorker {
    fn name(&self) -> &'static str {
        worker_name(self.kind)
    }

    fn idle(&mut self) {
        if !self.input.wait() {
            // Input closed; the owning handle flips the running flag next.
            std::thread::sleep(Duration::from_micros(100));
            return;
        }
        let Some(packet) = self.input.pop() else {
            return;
        };

        let data = packet.lock().clone();
        self.ready.clear();
        if let Err(e) = self.backend.decode(&data, &self.pool, &mut self.ready) {
            error!("{}: decode failed: {e}", self.name());
        }
        for frame in self.ready.drain(..) {
            self.output.push(frame);
        }
    }

    fn finalize(&mut self) {
        self.ready.clear();
        if let Err(e) = self.backend.flush(&self.pool, &mut self.ready) {
            error!("{}: flush failed: {e}", self.name());
        }
        for frame in self.ready.drain(..) {
            self.output.push(frame);
        }
        info!("{}: {} frame slots pooled", self.name(), self.pool.size());
    }
}

/// One decoding worker bound to a stream kind.
pub struct StreamDecoder {
    kind: StreamKind,
    input: Arc<Input<Bytes>>,
    output: Arc<Output<VideoFrame>>,
    handle: ServiceHandle,
}

impl StreamDecoder {
    /// Spawns the worker with a frame pool of `pool_capacity` slots.
    pub fn spawn(
        kind: StreamKind,
        backend: Box<dyn VideoDecode>,
        pool_capacity: usize,
    ) -> Self {
        let input = Arc::new(Input::new());
        input.open();
        let output = Arc::new(Output::new());
        let pool = Arc::new(Factory::new(pool_capacity));

        let handle = ServiceHandle::spawn(DecoderWorker {
            kind,
            backend,
            input: Arc::clone(&input),
            output: Arc::clone(&output),
            pool,
            ready: Vec::new(),
        });

        Self {
            kind,
            input,
            output,
            handle,
        }
    }

    pub fn kind(&self) -> StreamKind {
        self.kind
    }

    /// Compressed access-unit queue fed by the chunk router.
    pub fn input(&self) -> &Arc<Input<Bytes>> {
        &self.input
    }

    /// Decoded-frame fan-out; connect the assembler's stream input here.
    pub fn output(&self) -> &Arc<Output<VideoFrame>> {
        &self.output
    }

    /// Close the input first so a blocked `wait` returns, then stop.
    pub fn stop(&mut self) {
        self.input.close();
        self.input.clear();
        self.handle.stop();
    }
}

impl Drop for StreamDecoder {
    fn drop(&mut self) {
        // The handle joins on drop; close the input first so the worker
        // cannot be stuck waiting on it.
        self.input.close();
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::media::PixelFormat;

    /// Emits one flat gray frame per access unit, sized from construction.
    pub struct GrayFrameDecoder {
        pub width: u32,
        pub height: u32,
    }

    impl VideoDecode for GrayFrameDecoder {
        fn decode(
            &mut self,
            _data: &[u8],
            pool: &Factory<VideoFrame>,
            out: &mut Vec<Packet<VideoFrame>>,
        ) -> anyhow::Result<()> {
            let packet = pool.acquire();
            {
                let mut frame = packet.lock();
                frame.reset(PixelFormat::Yuv400P8, self.width, self.height, 1);
                frame.planes[0].fill(0x80);
            }
            out.push(packet);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::GrayFrameDecoder;
    use super::*;
    use crate::queue::connect;

    #[test]
    fn test_decoder_produces_frames_in_order() {
        let mut decoder = StreamDecoder::spawn(
            StreamKind::Texture,
            Box::new(GrayFrameDecoder {
                width: 16,
                height: 16,
            }),
            4,
        );
        assert_eq!(decoder.kind(), StreamKind::Texture);

        let sink = Arc::new(Input::new());
        sink.open();
        connect(decoder.output(), &sink);

        for _ in 0..3 {
            decoder.input().push(Packet::new(Bytes::from_static(&[0u8; 8])));
        }

        let mut ids = Vec::new();
        for _ in 0..3 {
            assert!(sink.wait_for(Duration::from_secs(1)));
            let frame = sink.pop().unwrap();
            let frame = frame.lock();
            assert_eq!(frame.width, 16);
            assert_eq!(frame.planes[0][0], 0x80);
            ids.push(frame.frame_id);
        }
        assert!(ids.windows(2).all(|pair| pair[0] < pair[1]));

        decoder.stop();
    }

    #[test]
    fn test_pool_backpressure_bounds_outstanding_frames() {
        let mut decoder = StreamDecoder::spawn(
            StreamKind::Geometry,
            Box::new(GrayFrameDecoder {
                width: 8,
                height: 8,
            }),
            2,
        );

        let sink = Arc::new(Input::new());
        sink.open();
        connect(decoder.output(), &sink);

        // Four access units against a two-slot pool: the worker stalls on
        // the third until the sink releases a frame.
        for _ in 0..4 {
            decoder.input().push(Packet::new(Bytes::from_static(&[1u8; 4])));
        }

        for _ in 0..2 {
            assert!(sink.wait_for(Duration::from_secs(1)));
        }
        assert_eq!(sink.pending(), 2);
        std::thread::sleep(Duration::from_millis(30));
        // Still two: the pool is exhausted while the sink holds both.
        assert_eq!(sink.pending(), 2);

        // Releasing one recycles a slot and the worker resumes.
        drop(sink.pop());
        assert!(sink.wait_for(Duration::from_secs(1)));

        // Drain so the blocked worker can exit before stop().
        while sink.pop().is_some() {}
        std::thread::sleep(Duration::from_millis(10));
        while sink.pop().is_some() {}
        decoder.stop();
    }
}
