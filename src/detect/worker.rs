use anyhow::Result;
use std::time::{Duration, Instant};

use super::backend::DetectorBackend;
use super::result::FaceResult;
use crate::queue::{FaceQueue, FrameQueue, POLL_INTERVAL};
use crate::worker::{StopSignal, Worker};

/// Counters returned when the detector loop exits.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DetectorSummary {
    pub frames_processed: u64,
    pub faces_found: u64,
    pub errors: u64,
}

/// Consumer of the frame queue, producer of the face queue.
pub struct DetectorWorker {
    backend: Box<dyn DetectorBackend>,
    frames: FrameQueue,
    faces: FaceQueue,
    stats_interval: Duration,
}

impl DetectorWorker {
    pub fn new(
        backend: Box<dyn DetectorBackend>,
        frames: FrameQueue,
        faces: FaceQueue,
        stats_interval: Duration,
    ) -> Self {
        Self {
            backend,
            frames,
            faces,
            stats_interval,
        }
    }

    pub fn spawn(self, stop: StopSignal) -> Result<Worker> {
        let name = format!("detector-{}", self.backend.name());
        Worker::spawn(name, stop, move |stop| {
            let mut worker = self;
            worker.run(&stop);
        })
    }

    /// Detect until stopped. Backend errors skip the frame; they never end
    /// the loop.
    pub fn run(&mut self, stop: &StopSignal) -> DetectorSummary {
        let name = self.backend.name();
        let mut summary = DetectorSummary::default();
        if let Err(err) = self.backend.warm_up() {
            log::warn!("detector {} warm-up failed: {:#}", name, err);
        }
        log::info!("detector {} started", name);

        let mut last_report = Instant::now();
        while !stop.is_stopped() {
            if let Some(frame) = self.frames.pop_timeout(POLL_INTERVAL) {
                let result = match self.backend.detect(&frame) {
                    Ok(faces) => FaceResult::largest(&faces),
                    Err(err) => {
                        summary.errors += 1;
                        log::debug!("detector {} failed on frame: {:#}", name, err);
                        continue;
                    }
                };
                summary.frames_processed += 1;
                if let Some(face) = result.face() {
                    summary.faces_found += 1;
                    log::trace!(
                        "detector {} face at ({:.0}, {:.0}), frame age {} ms",
                        name,
                        face.center_x,
                        face.center_y,
                        frame.age_ms()
                    );
                }
                match self.faces.push(result, stop) {
                    Ok(true) => {}
                    Ok(false) => break,
                    Err(err) => {
                        log::warn!("detector {} output closed: {:#}", name, err);
                        break;
                    }
                }
            }

            if !self.stats_interval.is_zero() && last_report.elapsed() > self.stats_interval {
                last_report = Instant::now();
                log::info!(
                    target: "stats",
                    "detector {} processed {} frames, {} with a face",
                    name,
                    summary.frames_processed,
                    summary.faces_found
                );
            }
        }

        log::info!(
            target: "stats",
            "detector {} done: {} frames, {} with a face, {} errors",
            name,
            summary.frames_processed,
            summary.faces_found,
            summary.errors
        );
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::FaceBox;
    use crate::frame::DecodedFrame;
    use anyhow::anyhow;

    /// Returns one box per frame whose width equals the frame width, plus a
    /// smaller decoy; frames 3 pixels wide fail.
    struct WidthBackend;

    impl DetectorBackend for WidthBackend {
        fn name(&self) -> &'static str {
            "width"
        }

        fn detect(&mut self, frame: &DecodedFrame) -> Result<Vec<FaceBox>> {
            match frame.width {
                1 => Ok(Vec::new()),
                3 => Err(anyhow!("bad frame")),
                w => Ok(vec![
                    FaceBox::new(1.0, 1.0, 1.0, 1.0),
                    FaceBox::new(5.0, 5.0, f64::from(w), 1.0),
                ]),
            }
        }
    }

    fn frame(width: u32) -> DecodedFrame {
        DecodedFrame::new(vec![0; width as usize], width, 1, 1).unwrap()
    }

    #[test]
    fn forwards_largest_face_or_empty_in_order() {
        let frames = FrameQueue::new(8);
        let faces = FaceQueue::new(8);
        for width in [4, 1, 3, 6] {
            frames.try_push(frame(width)).unwrap();
        }

        let worker = DetectorWorker::new(
            Box::new(WidthBackend),
            frames.clone(),
            faces.clone(),
            Duration::from_secs(60),
        )
        .spawn(StopSignal::new())
        .unwrap();

        let mut results = Vec::new();
        while results.len() < 3 {
            if let Some(result) = faces.pop_timeout(Duration::from_secs(2)) {
                results.push(result);
            } else {
                break;
            }
        }
        worker.shutdown().unwrap();

        assert_eq!(
            results,
            vec![
                FaceResult::Face(FaceBox::new(5.0, 5.0, 4.0, 1.0)),
                FaceResult::Empty,
                FaceResult::Face(FaceBox::new(5.0, 5.0, 6.0, 1.0)),
            ]
        );
    }

    #[test]
    fn summary_counts_errors() {
        let frames = FrameQueue::new(8);
        let faces = FaceQueue::new(8);
        frames.try_push(frame(3)).unwrap();
        frames.try_push(frame(2)).unwrap();

        let stop = StopSignal::new();
        let stopper = stop.clone();
        let faces_out = faces.clone();
        let watcher = std::thread::spawn(move || {
            let got = faces_out.pop_timeout(Duration::from_secs(2));
            stopper.stop();
            got
        });
        let mut worker =
            DetectorWorker::new(Box::new(WidthBackend), frames, faces, Duration::ZERO);
        let summary = worker.run(&stop);
        assert!(watcher.join().unwrap().is_some());
        assert_eq!(
            summary,
            DetectorSummary {
                frames_processed: 1,
                faces_found: 1,
                errors: 1
            }
        );
    }
}
