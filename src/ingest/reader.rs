use anyhow::Result;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::FrameSource;
use crate::frame::FrameDecoder;
use crate::queue::FrameQueue;
use crate::stats::{StatsSink, ThroughputMeter};
use crate::worker::{StopSignal, Worker};

/// Background producer: pulls frames from a `FrameSource`, decodes them and
/// pushes them into the shared frame queue.
///
/// The loop ends on stop, or on the first transport error; it never
/// reconnects. Either way a final throughput summary is emitted.
pub struct TransportReader {
    source: Box<dyn FrameSource>,
    decoder: FrameDecoder,
    queue: FrameQueue,
    stats_interval: Duration,
    sink: Arc<dyn StatsSink>,
}

/// Counters returned when the read loop exits.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReaderSummary {
    pub frames_read: u64,
    pub frames_lost: u64,
    pub decode_errors: u64,
}

impl TransportReader {
    pub fn new(
        source: Box<dyn FrameSource>,
        decoder: FrameDecoder,
        queue: FrameQueue,
        stats_interval: Duration,
        sink: Arc<dyn StatsSink>,
    ) -> Self {
        Self {
            source,
            decoder,
            queue,
            stats_interval,
            sink,
        }
    }

    /// Run the read loop on a dedicated thread.
    pub fn spawn(self, stop: StopSignal) -> Result<Worker> {
        let name = format!("reader-{}", self.source.name());
        Worker::spawn(name, stop, move |stop| {
            let mut reader = self;
            reader.run(&stop);
        })
    }

    /// Run the read loop on the calling thread until stop or transport error.
    pub fn run(&mut self, stop: &StopSignal) -> ReaderSummary {
        let name = self.source.name();
        let mut meter = ThroughputMeter::new(name, self.stats_interval);
        let mut decode_errors = 0u64;

        match self.source.open(stop) {
            Ok(()) => {
                log::info!("{} started", name);
                if let Err(err) = self.read_loop(stop, &mut meter, &mut decode_errors) {
                    log::warn!("{} transport ended: {:#}", name, err);
                }
            }
            Err(err) => log::error!("{} failed to open: {:#}", name, err),
        }

        let frames_lost = self.source.frames_lost();
        self.source.close();
        meter.finish(Instant::now(), frames_lost, self.sink.as_ref());
        if decode_errors > 0 {
            log::warn!("{} skipped {} undecodable frames", name, decode_errors);
        }
        ReaderSummary {
            frames_read: meter.total_frames(),
            frames_lost,
            decode_errors,
        }
    }

    fn read_loop(
        &mut self,
        stop: &StopSignal,
        meter: &mut ThroughputMeter,
        decode_errors: &mut u64,
    ) -> Result<()> {
        while !stop.is_stopped() {
            if let Some(compressed) = self.source.next_frame(stop)? {
                match self.decoder.decode(&compressed) {
                    Ok(frame) => {
                        meter.record_frame();
                        if !self.queue.push(frame, stop)? {
                            break;
                        }
                    }
                    Err(err) => {
                        *decode_errors += 1;
                        log::debug!(
                            "{} dropped {} byte frame: {:#}",
                            self.source.name(),
                            compressed.len(),
                            err
                        );
                    }
                }
            }
            meter.tick(
                Instant::now(),
                self.source.frames_lost(),
                self.sink.as_ref(),
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::tests::jpeg_bytes;
    use crate::frame::CompressedFrame;
    use crate::stats::tests::RecordingSink;
    use crate::stats::ReportKind;
    use anyhow::anyhow;
    use std::collections::VecDeque;

    /// Scripted source: `Some(bytes)` yields a frame, `None` a timeout; the
    /// script running out is a transport error.
    struct ScriptedSource {
        script: VecDeque<Option<Vec<u8>>>,
        lost: u64,
    }

    impl FrameSource for ScriptedSource {
        fn name(&self) -> &'static str {
            "Scripted"
        }

        fn open(&mut self, _stop: &StopSignal) -> Result<()> {
            Ok(())
        }

        fn next_frame(&mut self, _stop: &StopSignal) -> Result<Option<CompressedFrame>> {
            match self.script.pop_front() {
                Some(step) => Ok(step.map(CompressedFrame::new)),
                None => Err(anyhow!("connection reset")),
            }
        }

        fn frames_lost(&self) -> u64 {
            self.lost
        }
    }

    #[test]
    fn decodes_in_arrival_order_and_reports_on_transport_error() {
        let script = VecDeque::from(vec![
            Some(jpeg_bytes(8, 8, [0, 0, 0])),
            None,
            Some(vec![1, 2, 3]),
            Some(jpeg_bytes(16, 8, [0, 0, 0])),
            Some(jpeg_bytes(24, 8, [0, 0, 0])),
        ]);
        let queue = FrameQueue::new(8);
        let sink = Arc::new(RecordingSink::default());
        let mut reader = TransportReader::new(
            Box::new(ScriptedSource { script, lost: 2 }),
            FrameDecoder::default(),
            queue.clone(),
            Duration::from_secs(60),
            sink.clone(),
        );

        let summary = reader.run(&StopSignal::new());
        assert_eq!(
            summary,
            ReaderSummary {
                frames_read: 3,
                frames_lost: 2,
                decode_errors: 1
            }
        );

        let widths: Vec<u32> = std::iter::from_fn(|| queue.pop_timeout(Duration::from_millis(10)))
            .map(|frame| frame.width)
            .collect();
        assert_eq!(widths, vec![8, 16, 24]);

        let reports = sink.throughput.lock().unwrap();
        let last = reports.last().unwrap();
        assert_eq!(last.kind, ReportKind::Final);
        assert_eq!(last.frames, 3);
        assert_eq!(last.lost, 2);
    }

    #[test]
    fn stops_while_blocked_on_full_queue() {
        let script: VecDeque<_> = (0..10).map(|_| Some(jpeg_bytes(8, 8, [0, 0, 0]))).collect();
        let queue = FrameQueue::new(1);
        let reader = TransportReader::new(
            Box::new(ScriptedSource { script, lost: 0 }),
            FrameDecoder::default(),
            queue.clone(),
            Duration::from_secs(60),
            Arc::new(RecordingSink::default()),
        );
        let worker = reader.spawn(StopSignal::new()).unwrap();
        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(queue.len(), 1);
        worker.shutdown().unwrap();
    }
}
