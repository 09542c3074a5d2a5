//! The acquire -> encode -> send -> release loop.
//!
//! The loop is generic over three seams so the firmware can plug in the
//! sensor driver, the JPEG converter and the HTTP response while the same
//! code runs against mocks on the host. Buffer disposal is structural:
//! a frame is consumed by the encoder and the resulting payload releases it
//! (or frees the transient conversion buffer) when dropped, so exactly one
//! of {release, free} happens on every exit path.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::fault::Fault;
use crate::frame::PixelFormat;
use crate::mjpeg;

/// A frame checked out of the sensor's buffer pool. Returning it to the pool
/// happens in `Drop`; a frame cannot be released twice or leaked past the
/// end of an iteration.
pub trait Frame {
    fn width(&self) -> u32;
    fn height(&self) -> u32;
    fn pixel_format(&self) -> PixelFormat;
    fn data(&self) -> &[u8];
}

/// Sensor driver seam.
pub trait FrameSource {
    type Frame: Frame;

    /// Blocks until a frame is available or the driver reports a hard
    /// capture failure. No retry loop inside: recovery is the stream
    /// loop's decision.
    fn acquire(&mut self) -> Result<Self::Frame, Fault>;

    /// Deinitializes and reinitializes the sensor with the last known-good
    /// configuration. Called exactly once per failed acquire.
    fn reinit_on_fault(&mut self) -> Result<(), Fault>;
}

/// One part's JPEG payload: either the source frame itself (already JPEG,
/// zero copy, stays checked out until the part is sent) or a freshly
/// converted buffer that owns its allocation. Dropping the value performs
/// the release or the free, never both.
pub enum JpegFrame<F, O> {
    Borrowed(F),
    Owned(O),
}

impl<F: Frame, O: AsRef<[u8]>> JpegFrame<F, O> {
    pub fn bytes(&self) -> &[u8] {
        match self {
            JpegFrame::Borrowed(frame) => frame.data(),
            JpegFrame::Owned(buf) => buf.as_ref(),
        }
    }

    pub fn is_borrowed(&self) -> bool {
        matches!(self, JpegFrame::Borrowed(_))
    }
}

/// Encoder seam. Consumes the frame on every path: on the owned path the
/// source buffer is returned to the pool before the call reports its
/// outcome, on the borrowed path ownership moves into the payload.
pub trait FrameEncoder<F: Frame> {
    type Owned: AsRef<[u8]>;

    fn ensure_jpeg(&mut self, frame: F) -> Result<JpegFrame<F, Self::Owned>, Fault>;
}

/// Teardown signal shared between the listener's owner and its in-flight
/// streaming connections. The HTTP server processes a stop request only
/// once its handler task is idle; a handler parked in [`run_stream`] with a
/// healthy client never returns on its own. Tripping the flag makes the
/// connection's next write fail, so the loop exits, the handler returns,
/// and the listener can actually stop.
#[derive(Clone, Debug, Default)]
pub struct ShutdownFlag(Arc<AtomicBool>);

impl ShutdownFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trip(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_tripped(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Transport seam for the open chunked response.
pub trait PartSink {
    /// Writes one complete chunk; `Fault::SendFailed` when the peer is gone
    /// or the listener was stopped underneath the response.
    fn write_all(&mut self, buf: &[u8]) -> Result<(), Fault>;

    /// Called between parts so the update channel and link-event callbacks
    /// stay responsive on the shared execution context.
    fn yield_now(&mut self) {}
}

/// Why a streaming connection ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEnd {
    /// Peer disconnected or the listener was torn down.
    ClientClosed,
    /// A per-frame fault aborted the current response.
    Aborted(Fault),
}

/// Drives one streaming connection until the client disconnects or a fault
/// aborts the response. Per iteration: acquire, encode, three discrete
/// writes (boundary, exact-length header, payload), release, yield.
pub fn run_stream<S, E, W>(source: &mut S, encoder: &mut E, sink: &mut W) -> StreamEnd
where
    S: FrameSource,
    E: FrameEncoder<S::Frame>,
    W: PartSink,
{
    loop {
        let frame = match source.acquire() {
            Ok(frame) => frame,
            Err(fault) => {
                if fault == Fault::CaptureTimeout {
                    // One recovery attempt for a wedged driver, then abort
                    // this response. The client reconnects; we never retry
                    // within a single exchange.
                    if let Err(reinit) = source.reinit_on_fault() {
                        log::error!("sensor reinit failed: {reinit}");
                    }
                }
                return StreamEnd::Aborted(fault);
            }
        };

        let payload = match encoder.ensure_jpeg(frame) {
            Ok(payload) => payload,
            // Source frame already released by the encoder contract.
            Err(fault) => return StreamEnd::Aborted(fault),
        };

        let header = mjpeg::part_header(payload.bytes().len());
        if sink.write_all(mjpeg::BOUNDARY_LINE.as_bytes()).is_err()
            || sink.write_all(header.as_bytes()).is_err()
            || sink.write_all(payload.bytes()).is_err()
        {
            // Dropping the payload releases the frame / frees the buffer.
            return StreamEnd::ClientClosed;
        }

        drop(payload);
        sink.yield_now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::collections::VecDeque;
    use std::rc::Rc;

    #[derive(Default)]
    struct Counters {
        acquired: Cell<usize>,
        released: Cell<usize>,
        reinits: Cell<usize>,
        conversions: Cell<usize>,
    }

    struct TestFrame {
        data: Vec<u8>,
        format: PixelFormat,
        counters: Rc<Counters>,
    }

    impl Frame for TestFrame {
        fn width(&self) -> u32 {
            320
        }
        fn height(&self) -> u32 {
            240
        }
        fn pixel_format(&self) -> PixelFormat {
            self.format
        }
        fn data(&self) -> &[u8] {
            &self.data
        }
    }

    impl Drop for TestFrame {
        fn drop(&mut self) {
            self.counters.released.set(self.counters.released.get() + 1);
        }
    }

    const JPEG_BYTES: &[u8] = &[0xFF, 0xD8, 0x01, 0x02, 0x03, 0xFF, 0xD9];

    struct TestSource {
        counters: Rc<Counters>,
        /// Scripted outcomes; once exhausted, produces JPEG frames forever.
        script: VecDeque<Result<(Vec<u8>, PixelFormat), Fault>>,
    }

    impl TestSource {
        fn new(counters: &Rc<Counters>) -> Self {
            Self {
                counters: counters.clone(),
                script: VecDeque::new(),
            }
        }

        fn push(&mut self, outcome: Result<(Vec<u8>, PixelFormat), Fault>) {
            self.script.push_back(outcome);
        }
    }

    impl FrameSource for TestSource {
        type Frame = TestFrame;

        fn acquire(&mut self) -> Result<TestFrame, Fault> {
            let (data, format) = match self.script.pop_front() {
                Some(Ok(frame)) => frame,
                Some(Err(fault)) => return Err(fault),
                None => (JPEG_BYTES.to_vec(), PixelFormat::Jpeg),
            };
            self.counters.acquired.set(self.counters.acquired.get() + 1);
            Ok(TestFrame {
                data,
                format,
                counters: self.counters.clone(),
            })
        }

        fn reinit_on_fault(&mut self) -> Result<(), Fault> {
            self.counters.reinits.set(self.counters.reinits.get() + 1);
            Ok(())
        }
    }

    struct TestEncoder {
        counters: Rc<Counters>,
        fail: bool,
    }

    impl TestEncoder {
        fn new(counters: &Rc<Counters>) -> Self {
            Self {
                counters: counters.clone(),
                fail: false,
            }
        }
    }

    impl FrameEncoder<TestFrame> for TestEncoder {
        type Owned = Vec<u8>;

        fn ensure_jpeg(&mut self, frame: TestFrame) -> Result<JpegFrame<TestFrame, Vec<u8>>, Fault> {
            if self.fail {
                drop(frame);
                return Err(Fault::EncodeFailed);
            }
            if frame.pixel_format() == PixelFormat::Jpeg {
                return Ok(JpegFrame::Borrowed(frame));
            }
            self.counters
                .conversions
                .set(self.counters.conversions.get() + 1);
            let mut out = vec![0xFF, 0xD8];
            out.extend_from_slice(frame.data());
            out.extend_from_slice(&[0xFF, 0xD9]);
            drop(frame);
            Ok(JpegFrame::Owned(out))
        }
    }

    struct TestSink {
        writes: Vec<Vec<u8>>,
        fail_at: Option<usize>,
        yields: usize,
    }

    impl TestSink {
        fn failing_at(write_index: usize) -> Self {
            Self {
                writes: Vec::new(),
                fail_at: Some(write_index),
                yields: 0,
            }
        }

        /// Complete parts received, as (declared length, payload) pairs.
        fn parts(&self) -> Vec<(usize, &[u8])> {
            self.writes
                .chunks_exact(3)
                .map(|part| {
                    let header = std::str::from_utf8(&part[1]).unwrap();
                    assert_eq!(part[0], mjpeg::BOUNDARY_LINE.as_bytes());
                    assert!(header.starts_with("Content-Type: image/jpeg\r\n"));
                    let declared = header
                        .split("Content-Length: ")
                        .nth(1)
                        .and_then(|rest| rest.split('\r').next())
                        .and_then(|n| n.parse().ok())
                        .expect("header declares a length");
                    (declared, part[2].as_slice())
                })
                .collect()
        }
    }

    impl PartSink for TestSink {
        fn write_all(&mut self, buf: &[u8]) -> Result<(), Fault> {
            if self.fail_at == Some(self.writes.len()) {
                return Err(Fault::SendFailed);
            }
            self.writes.push(buf.to_vec());
            Ok(())
        }

        fn yield_now(&mut self) {
            self.yields += 1;
        }
    }

    #[test]
    fn three_parts_then_disconnect_balances_pool() {
        let counters = Rc::new(Counters::default());
        let mut source = TestSource::new(&counters);
        let mut encoder = TestEncoder::new(&counters);
        // Three full parts (nine writes), then the boundary write of part
        // four observes the broken connection.
        let mut sink = TestSink::failing_at(9);

        let end = run_stream(&mut source, &mut encoder, &mut sink);

        assert_eq!(end, StreamEnd::ClientClosed);
        assert_eq!(counters.acquired.get(), 4);
        assert_eq!(counters.released.get(), 4);
        let parts = sink.parts();
        assert_eq!(parts.len(), 3);
        for (declared, payload) in parts {
            assert_eq!(declared, payload.len());
        }
        // Yielded once after each completed part.
        assert_eq!(sink.yields, 3);
    }

    #[test]
    fn jpeg_frames_pass_through_unreencoded() {
        let counters = Rc::new(Counters::default());
        let mut source = TestSource::new(&counters);
        source.push(Ok((JPEG_BYTES.to_vec(), PixelFormat::Jpeg)));
        let mut encoder = TestEncoder::new(&counters);
        let mut sink = TestSink::failing_at(3);

        let end = run_stream(&mut source, &mut encoder, &mut sink);

        assert_eq!(end, StreamEnd::ClientClosed);
        assert_eq!(counters.conversions.get(), 0);
        assert_eq!(sink.parts()[0].1, JPEG_BYTES);
    }

    #[test]
    fn raw_frames_are_converted_and_freed() {
        let counters = Rc::new(Counters::default());
        let mut source = TestSource::new(&counters);
        source.push(Ok((vec![0x10, 0x20, 0x30], PixelFormat::Rgb565)));
        let mut encoder = TestEncoder::new(&counters);
        let mut sink = TestSink::failing_at(3);

        run_stream(&mut source, &mut encoder, &mut sink);

        assert_eq!(counters.conversions.get(), 1);
        // Source buffer went back to the pool during conversion; the
        // follow-up frame was released when the disconnect was observed.
        assert_eq!(counters.acquired.get(), 2);
        assert_eq!(counters.released.get(), 2);
        let (declared, payload) = (sink.parts()[0].0, sink.parts()[0].1.to_vec());
        assert_eq!(declared, payload.len());
        assert_eq!(&payload[..2], &[0xFF, 0xD8]);
    }

    #[test]
    fn small_frames_are_streamed_not_gated() {
        let counters = Rc::new(Counters::default());
        let mut source = TestSource::new(&counters);
        // Far below the 400px width some predecessors gated on.
        source.push(Ok((vec![0x01], PixelFormat::Grayscale)));
        let mut encoder = TestEncoder::new(&counters);
        let mut sink = TestSink::failing_at(3);

        run_stream(&mut source, &mut encoder, &mut sink);

        assert_eq!(sink.parts().len(), 1);
    }

    #[test]
    fn capture_fault_reinits_once_and_aborts() {
        let counters = Rc::new(Counters::default());
        let mut source = TestSource::new(&counters);
        source.push(Err(Fault::CaptureTimeout));
        let mut encoder = TestEncoder::new(&counters);
        let mut sink = TestSink::failing_at(usize::MAX);

        let end = run_stream(&mut source, &mut encoder, &mut sink);

        assert_eq!(end, StreamEnd::Aborted(Fault::CaptureTimeout));
        assert_eq!(counters.reinits.get(), 1);
        assert!(sink.writes.is_empty());

        // Next response succeeds after the reinit; no device restart needed.
        let mut sink = TestSink::failing_at(3);
        let end = run_stream(&mut source, &mut encoder, &mut sink);
        assert_eq!(end, StreamEnd::ClientClosed);
        assert_eq!(sink.parts().len(), 1);
        assert_eq!(counters.reinits.get(), 1);
        assert_eq!(counters.acquired.get(), counters.released.get());
    }

    #[test]
    fn encode_fault_still_releases_frame() {
        let counters = Rc::new(Counters::default());
        let mut source = TestSource::new(&counters);
        source.push(Ok((vec![0x10], PixelFormat::Yuv422)));
        let mut encoder = TestEncoder::new(&counters);
        encoder.fail = true;
        let mut sink = TestSink::failing_at(usize::MAX);

        let end = run_stream(&mut source, &mut encoder, &mut sink);

        assert_eq!(end, StreamEnd::Aborted(Fault::EncodeFailed));
        assert_eq!(counters.acquired.get(), 1);
        assert_eq!(counters.released.get(), 1);
        assert!(sink.writes.is_empty());
    }

    /// Sink wired to a [`ShutdownFlag`] the way the firmware's HTTP sink
    /// is: every write observes the flag before touching the transport.
    /// The flag trips itself after a scripted number of successful writes,
    /// standing in for the update coordinator tripping it from another
    /// task.
    struct FlaggedSink {
        writes: usize,
        flag: ShutdownFlag,
        trip_after: usize,
    }

    impl PartSink for FlaggedSink {
        fn write_all(&mut self, _buf: &[u8]) -> Result<(), Fault> {
            if self.flag.is_tripped() {
                return Err(Fault::SendFailed);
            }
            self.writes += 1;
            if self.writes == self.trip_after {
                self.flag.trip();
            }
            Ok(())
        }
    }

    #[test]
    fn tripped_shutdown_flag_ends_stream() {
        let counters = Rc::new(Counters::default());
        let mut source = TestSource::new(&counters);
        let mut encoder = TestEncoder::new(&counters);
        // Two complete parts go out to a perfectly healthy client, then
        // the teardown trips the flag; the very next write must fail.
        let mut sink = FlaggedSink {
            writes: 0,
            flag: ShutdownFlag::new(),
            trip_after: 6,
        };

        let end = run_stream(&mut source, &mut encoder, &mut sink);

        assert_eq!(end, StreamEnd::ClientClosed);
        assert_eq!(sink.writes, 6);
        assert!(sink.flag.is_tripped());
        // The frame in flight when the teardown landed still went back.
        assert_eq!(counters.acquired.get(), 3);
        assert_eq!(counters.released.get(), 3);
    }

    #[test]
    fn header_write_failure_releases_in_flight_frame() {
        let counters = Rc::new(Counters::default());
        let mut source = TestSource::new(&counters);
        let mut encoder = TestEncoder::new(&counters);
        // Boundary goes through, the header write observes the teardown.
        let mut sink = TestSink::failing_at(1);

        let end = run_stream(&mut source, &mut encoder, &mut sink);

        assert_eq!(end, StreamEnd::ClientClosed);
        assert_eq!(counters.acquired.get(), 1);
        assert_eq!(counters.released.get(), 1);
    }
}
