#[cfg(feature = "camera-nokhwa")]
pub mod camera;
pub mod features;
pub mod hub;
pub mod labels;
#[cfg(feature = "camera-nokhwa")]
pub mod rgb_converter;
pub mod source;
pub mod throttle;

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::Duration,
};

use anyhow::{Context, Result};

use crate::{
    classifier::GestureClassifier,
    detector::LandmarkDetector,
    types::{ClassLabel, Frame, HandLandmarkSet, HandReading, Recognition},
};

pub use hub::{LabelEvent, PipelineHub, PublishedFrame, StopReason, StreamEvent};
pub use source::{CaptureError, FrameSource};
use throttle::ThrottleSet;

#[derive(Clone, Debug)]
pub struct PipelineConfig {
    pub stream_window: Duration,
    pub push_window: Duration,
    /// One global gate (using `stream_window`) instead of one per sink.
    pub shared_throttle: bool,
}

impl PipelineConfig {
    fn throttles(&self) -> ThrottleSet {
        if self.shared_throttle {
            ThrottleSet::shared(self.stream_window)
        } else {
            ThrottleSet::per_sink(self.stream_window, self.push_window)
        }
    }
}

/// Owns the detector, classifier and throttle state; turns frames into
/// published events. Frames arrive from exactly one capture loop.
pub struct FramePipeline<D, C> {
    detector: D,
    classifier: C,
    throttles: ThrottleSet,
    hub: Arc<PipelineHub>,
    sequence: u64,
}

impl<D: LandmarkDetector, C: GestureClassifier> FramePipeline<D, C> {
    pub fn new(detector: D, classifier: C, config: &PipelineConfig, hub: Arc<PipelineHub>) -> Self {
        Self {
            detector,
            classifier,
            throttles: config.throttles(),
            hub,
            sequence: 0,
        }
    }

    /// Drives the loop until the source ends, fails, or `stop` is raised.
    pub fn run<S: FrameSource>(&mut self, source: &mut S, stop: &AtomicBool) -> StopReason {
        while !stop.load(Ordering::Relaxed) {
            match source.next_frame() {
                Ok(Some(frame)) => self.process(frame),
                Ok(None) => return StopReason::SourceExhausted,
                Err(err) => {
                    log::error!("capture failed: {err}");
                    return StopReason::CaptureUnavailable(err.to_string());
                }
            }
        }
        StopReason::Shutdown
    }

    /// Handles one frame, gated by the throttle at the frame's capture time.
    pub fn process(&mut self, frame: Frame) {
        self.sequence += 1;
        let sequence = self.sequence;
        let now = frame.timestamp;
        let frame = Arc::new(frame);

        let due = self.throttles.due(now);
        if !due.any() {
            self.hub.publish_frame(PublishedFrame {
                sequence,
                frame,
                recognition: None,
            });
            return;
        }

        let recognition = Arc::new(self.recognize(&frame));
        self.throttles.record(due, now);
        log::debug!(
            "frame {sequence}: {} hand(s), label {}",
            recognition.hands().len(),
            recognition.label()
        );

        if due.push {
            self.hub.publish_label(sequence, recognition.label());
        }
        // Every produced result is drawn, even when only the push gate opened.
        self.hub.publish_frame(PublishedFrame {
            sequence,
            frame,
            recognition: Some(recognition),
        });
    }

    fn recognize(&mut self, frame: &Frame) -> Recognition {
        let raw_hands = match self.detector.detect(frame) {
            Ok(hands) => hands,
            Err(err) => {
                log::warn!("landmark detection failed: {err:?}");
                return Recognition::NoHand;
            }
        };

        let mut readings = Vec::with_capacity(raw_hands.len());
        for points in raw_hands {
            let landmarks = match HandLandmarkSet::new(points) {
                Ok(set) => set,
                Err(err) => {
                    log::debug!("rejecting hand: {err}");
                    continue;
                }
            };
            let label = self.classify(&landmarks);
            let bbox = landmarks.bounding_box(frame.width, frame.height);
            readings.push(HandReading {
                landmarks,
                label,
                bbox,
            });
        }

        Recognition::from_hands(readings)
    }

    fn classify(&mut self, landmarks: &HandLandmarkSet) -> ClassLabel {
        let features = match features::normalize(landmarks.points()) {
            Ok(features) => features,
            Err(err) => {
                log::debug!("hand not eligible for classification: {err}");
                return ClassLabel::Unknown;
            }
        };
        match self.classifier.predict(&features) {
            Ok(class_id) => labels::resolve(class_id),
            Err(err) => {
                log::warn!("sign classification failed: {err:?}");
                ClassLabel::Unknown
            }
        }
    }
}

#[derive(Debug)]
pub struct PipelineHandle {
    stop: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl PipelineHandle {
    /// Stops the loop and waits for the capture resource to be released.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("pipeline thread panicked");
            }
        }
    }
}

impl Drop for PipelineHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Spawns the single capture loop. The source is dropped (and the device
/// released) on the pipeline thread before the handle's join returns.
pub fn start_pipeline<S, D, C>(
    mut source: S,
    detector: D,
    classifier: C,
    config: PipelineConfig,
    hub: Arc<PipelineHub>,
) -> Result<PipelineHandle>
where
    S: FrameSource,
    D: LandmarkDetector,
    C: GestureClassifier,
{
    let stop = Arc::new(AtomicBool::new(false));
    let stop_flag = stop.clone();

    let handle = thread::Builder::new()
        .name("sign-pipeline".into())
        .spawn(move || {
            log::info!(
                "pipeline started (stream window {:?}, push window {:?}, shared throttle: {})",
                config.stream_window,
                config.push_window,
                config.shared_throttle
            );
            let mut pipeline = FramePipeline::new(detector, classifier, &config, hub.clone());
            let reason = pipeline.run(&mut source, &stop_flag);
            drop(source);
            hub.stop(reason);
        })
        .context("failed to spawn pipeline thread")?;

    Ok(PipelineHandle {
        stop,
        handle: Some(handle),
    })
}

#[cfg(test)]
mod tests {
    use std::{
        collections::VecDeque,
        sync::atomic::AtomicUsize,
        time::{Duration, Instant},
    };

    use anyhow::anyhow;
    use tokio::sync::mpsc::{Receiver, error::TryRecvError};

    use super::*;
    use crate::{pipeline::features::FeatureVector, types::BoundingBox};

    type RawHands = Vec<Vec<(f32, f32)>>;

    struct ScriptedDetector {
        script: VecDeque<Result<RawHands>>,
        calls: Arc<AtomicUsize>,
    }

    impl LandmarkDetector for ScriptedDetector {
        fn detect(&mut self, _frame: &Frame) -> Result<RawHands> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.script.pop_front().unwrap_or_else(|| Ok(Vec::new()))
        }
    }

    struct ScriptedClassifier {
        ids: VecDeque<Result<i64>>,
        calls: Arc<AtomicUsize>,
    }

    impl GestureClassifier for ScriptedClassifier {
        fn predict(&mut self, features: &FeatureVector) -> Result<i64> {
            assert_eq!(features.as_slice().len(), features::FEATURE_LEN);
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.ids.pop_front().unwrap_or(Ok(0))
        }
    }

    struct ScriptedSource {
        frames: VecDeque<Result<Option<Frame>, CaptureError>>,
    }

    impl FrameSource for ScriptedSource {
        fn next_frame(&mut self) -> Result<Option<Frame>, CaptureError> {
            self.frames.pop_front().unwrap_or(Ok(None))
        }
    }

    struct Harness {
        pipeline: FramePipeline<ScriptedDetector, ScriptedClassifier>,
        hub: Arc<PipelineHub>,
        stream: Receiver<StreamEvent>,
        labels: Receiver<LabelEvent>,
        detect_calls: Arc<AtomicUsize>,
        classify_calls: Arc<AtomicUsize>,
    }

    fn harness(detections: Vec<Result<RawHands>>, ids: Vec<Result<i64>>) -> Harness {
        let detect_calls = Arc::new(AtomicUsize::new(0));
        let classify_calls = Arc::new(AtomicUsize::new(0));
        let hub = Arc::new(PipelineHub::new());
        let config = PipelineConfig {
            stream_window: Duration::from_secs(1),
            push_window: Duration::from_secs(3),
            shared_throttle: false,
        };
        let pipeline = FramePipeline::new(
            ScriptedDetector {
                script: detections.into(),
                calls: detect_calls.clone(),
            },
            ScriptedClassifier {
                ids: ids.into(),
                calls: classify_calls.clone(),
            },
            &config,
            hub.clone(),
        );
        Harness {
            pipeline,
            stream: hub.subscribe_stream(),
            labels: hub.subscribe_labels(),
            hub,
            detect_calls,
            classify_calls,
        }
    }

    fn frame_at(timestamp: Instant) -> Frame {
        Frame {
            rgb: vec![0; 64 * 48 * 3],
            width: 64,
            height: 48,
            timestamp,
        }
    }

    fn hand(min: (f32, f32), max: (f32, f32)) -> Vec<(f32, f32)> {
        let mut points = vec![min, max];
        points.resize(21, ((min.0 + max.0) / 2.0, (min.1 + max.1) / 2.0));
        points
    }

    fn next_recognition(rx: &mut Receiver<StreamEvent>) -> Option<Arc<Recognition>> {
        match rx.try_recv() {
            Ok(StreamEvent::Frame(published)) => published.recognition,
            other => panic!("expected a frame event, got {other:?}"),
        }
    }

    fn next_label(rx: &mut Receiver<LabelEvent>) -> ClassLabel {
        match rx.try_recv() {
            Ok(LabelEvent::Label { label, .. }) => label,
            other => panic!("expected a label event, got {other:?}"),
        }
    }

    #[test]
    fn frame_without_hands_yields_no_prediction() {
        let mut h = harness(vec![Ok(Vec::new())], Vec::new());
        h.pipeline.process(frame_at(Instant::now()));

        let recognition = next_recognition(&mut h.stream).expect("detection ran");
        assert_eq!(*recognition, Recognition::NoHand);
        assert_eq!(next_label(&mut h.labels), ClassLabel::NoPrediction);
        assert_eq!(h.classify_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn single_hand_mapped_to_class_zero_reads_a() {
        let mut h = harness(
            vec![Ok(vec![hand((0.25, 0.25), (0.5, 0.75))])],
            vec![Ok(0)],
        );
        h.pipeline.process(frame_at(Instant::now()));

        let recognition = next_recognition(&mut h.stream).expect("detection ran");
        assert_eq!(recognition.label(), ClassLabel::Sign("A"));
        assert_eq!(
            recognition.hands()[0].bbox,
            BoundingBox {
                x1: 16,
                y1: 12,
                x2: 32,
                y2: 36
            }
        );
        assert_eq!(next_label(&mut h.labels).to_string(), "A");
    }

    #[test]
    fn two_hands_emit_one_label_from_the_last_hand() {
        let mut h = harness(
            vec![Ok(vec![
                hand((0.1, 0.1), (0.3, 0.3)),
                hand((0.6, 0.6), (0.9, 0.9)),
            ])],
            vec![Ok(0), Ok(1)],
        );
        h.pipeline.process(frame_at(Instant::now()));

        assert_eq!(next_label(&mut h.labels), ClassLabel::Sign("B"));
        assert_eq!(h.labels.try_recv(), Err(TryRecvError::Empty));

        let recognition = next_recognition(&mut h.stream).expect("detection ran");
        let labels: Vec<_> = recognition.hands().iter().map(|r| r.label).collect();
        assert_eq!(labels, vec![ClassLabel::Sign("A"), ClassLabel::Sign("B")]);
    }

    #[test]
    fn frames_inside_window_classify_once() {
        let start = Instant::now();
        let mut h = harness(
            vec![
                Ok(vec![hand((0.2, 0.2), (0.4, 0.4))]),
                Ok(vec![hand((0.2, 0.2), (0.4, 0.4))]),
            ],
            vec![Ok(2), Ok(3)],
        );
        h.pipeline.process(frame_at(start));
        h.pipeline.process(frame_at(start + Duration::from_millis(300)));

        assert_eq!(h.detect_calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.classify_calls.load(Ordering::SeqCst), 1);

        assert!(next_recognition(&mut h.stream).is_some());
        assert!(
            next_recognition(&mut h.stream).is_none(),
            "second frame passes through without a result"
        );
        assert_eq!(next_label(&mut h.labels), ClassLabel::Sign("C"));
        assert_eq!(h.labels.try_recv(), Err(TryRecvError::Empty));
    }

    #[test]
    fn push_window_outlasts_stream_window() {
        let start = Instant::now();
        let mut h = harness(Vec::new(), Vec::new());
        h.pipeline.process(frame_at(start));
        h.pipeline.process(frame_at(start + Duration::from_millis(1_500)));
        h.pipeline.process(frame_at(start + Duration::from_millis(3_000)));

        assert_eq!(h.detect_calls.load(Ordering::SeqCst), 3);
        for _ in 0..3 {
            assert!(next_recognition(&mut h.stream).is_some());
        }
        assert_eq!(next_label(&mut h.labels), ClassLabel::NoPrediction);
        assert_eq!(next_label(&mut h.labels), ClassLabel::NoPrediction);
        assert_eq!(h.labels.try_recv(), Err(TryRecvError::Empty));
    }

    #[test]
    fn push_only_attempt_still_reaches_the_stream() {
        let start = Instant::now();
        let mut h = harness(
            vec![
                Ok(vec![hand((0.2, 0.2), (0.4, 0.4))]),
                Ok(vec![hand((0.2, 0.2), (0.4, 0.4))]),
                Ok(vec![hand((0.2, 0.2), (0.4, 0.4))]),
            ],
            vec![Ok(0), Ok(1), Ok(2)],
        );
        h.pipeline.process(frame_at(start));
        h.pipeline.process(frame_at(start + Duration::from_millis(2_500)));
        h.pipeline.process(frame_at(start + Duration::from_millis(3_000)));

        assert_eq!(h.detect_calls.load(Ordering::SeqCst), 3);
        let drawn: Vec<_> = (0..3)
            .map(|_| next_recognition(&mut h.stream).map(|r| r.label()))
            .collect();
        assert_eq!(
            drawn,
            vec![
                Some(ClassLabel::Sign("A")),
                Some(ClassLabel::Sign("B")),
                Some(ClassLabel::Sign("C")),
            ]
        );
        assert_eq!(next_label(&mut h.labels), ClassLabel::Sign("A"));
        assert_eq!(next_label(&mut h.labels), ClassLabel::Sign("C"));
        assert_eq!(h.hub.status().detections, 3);
    }

    #[test]
    fn malformed_hands_and_failures_never_escape() {
        let start = Instant::now();
        let mut h = harness(
            vec![
                Ok(vec![vec![(0.5, 0.5); 20]]),
                Err(anyhow!("detector blew up")),
                Ok(vec![hand((0.2, 0.2), (0.4, 0.4))]),
            ],
            vec![Err(anyhow!("classifier blew up"))],
        );
        for step in 0..3 {
            h.pipeline.process(frame_at(start + Duration::from_secs(3 * step)));
        }

        assert_eq!(next_label(&mut h.labels), ClassLabel::NoPrediction);
        assert_eq!(next_label(&mut h.labels), ClassLabel::NoPrediction);
        assert_eq!(next_label(&mut h.labels), ClassLabel::Unknown);
        assert_eq!(h.classify_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn out_of_range_class_id_is_unknown() {
        let mut h = harness(vec![Ok(vec![hand((0.2, 0.2), (0.4, 0.4))])], vec![Ok(42)]);
        h.pipeline.process(frame_at(Instant::now()));
        assert_eq!(next_label(&mut h.labels), ClassLabel::Unknown);
    }

    #[test]
    fn run_stops_on_exhaustion_and_capture_failure() {
        let stop = AtomicBool::new(false);

        let mut h = harness(Vec::new(), Vec::new());
        let mut source = ScriptedSource {
            frames: vec![Ok(Some(frame_at(Instant::now())))].into(),
        };
        assert_eq!(
            h.pipeline.run(&mut source, &stop),
            StopReason::SourceExhausted
        );

        let mut h = harness(Vec::new(), Vec::new());
        let mut source = ScriptedSource {
            frames: vec![Err(CaptureError::Disconnected)].into(),
        };
        assert!(matches!(
            h.pipeline.run(&mut source, &stop),
            StopReason::CaptureUnavailable(_)
        ));
        assert_eq!(h.detect_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn raised_stop_flag_ends_run_as_shutdown() {
        let stop = AtomicBool::new(true);
        let mut h = harness(Vec::new(), Vec::new());
        let mut source = ScriptedSource {
            frames: vec![Ok(Some(frame_at(Instant::now())))].into(),
        };
        assert_eq!(h.pipeline.run(&mut source, &stop), StopReason::Shutdown);
        assert_eq!(h.detect_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn started_pipeline_closes_sinks_when_source_ends() {
        let hub = Arc::new(PipelineHub::new());
        let mut labels = hub.subscribe_labels();
        let config = PipelineConfig {
            stream_window: Duration::from_secs(1),
            push_window: Duration::from_secs(3),
            shared_throttle: true,
        };
        let handle = start_pipeline(
            ScriptedSource {
                frames: vec![Ok(Some(frame_at(Instant::now())))].into(),
            },
            ScriptedDetector {
                script: VecDeque::new(),
                calls: Arc::new(AtomicUsize::new(0)),
            },
            ScriptedClassifier {
                ids: VecDeque::new(),
                calls: Arc::new(AtomicUsize::new(0)),
            },
            config,
            hub.clone(),
        )
        .unwrap();
        for _ in 0..500 {
            if hub.status().state == hub::PipelineState::Stopped {
                break;
            }
            thread::sleep(Duration::from_millis(10));
        }
        handle.stop();

        assert_eq!(
            labels.try_recv(),
            Ok(LabelEvent::Label {
                sequence: 1,
                label: ClassLabel::NoPrediction
            })
        );
        assert_eq!(
            labels.try_recv(),
            Ok(LabelEvent::Stopped(StopReason::SourceExhausted))
        );
        assert_eq!(labels.try_recv(), Err(TryRecvError::Disconnected));
        assert_eq!(hub.status().frames, 1);
    }
}
