//! Wires correlator, normalizer, temporal buffer, classifier and segmenter
//! into one running pipeline.
//!
//! A single loop thread owns every piece of mutable state. Detector
//! completions and classifier results come back to it as messages, so the
//! two callbacks for a frame are serialized without any locking. The
//! classifier runs on its own worker and at most one window is in flight.

mod detector;

use std::{
    panic::{self, AssertUnwindSafe},
    thread,
    time::{Duration, Instant},
};

use anyhow::anyhow;
use crossbeam_channel::{Receiver, Sender, TrySendError, bounded, select, unbounded};

pub use self::detector::{HandDetector, HandReply, PoseDetector, PoseReply};
use self::detector::{ClassifyJob, PipelineEvent};
use crate::classifier::{LabelSet, SignClassifier, argmax};
use crate::correlator::{Correlator, CorrelatorConfig, FrameOutcome};
use crate::error::PipelineError;
use crate::features::{FeatureConfig, build_window_features_at, normalize_frame};
use crate::keypoints::KeypointFrame;
use crate::segmenter::{SegmentEvent, SegmenterConfig, SignSegmenter};
use crate::temporal::{ProbabilitySmoother, TemporalBuffer, TemporalConfig, WindowSnapshot};
use crate::types::{Frame, RecognitionState, Timestamp};

#[derive(Clone, Debug)]
pub struct PipelineConfig {
    pub correlator: CorrelatorConfig,
    pub temporal: TemporalConfig,
    pub segmenter: SegmenterConfig,
    pub features: FeatureConfig,
    /// Background class; never tracked or committed.
    pub idle_label: String,
    /// Frames waiting for the loop. `submit` drops when full.
    pub frame_queue: usize,
    /// Unread states kept for the consumer; the oldest is replaced when full.
    pub state_queue: usize,
    /// How long shutdown waits for detector results of frames already
    /// dispatched.
    pub shutdown_grace: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            correlator: CorrelatorConfig::default(),
            temporal: TemporalConfig::default(),
            segmenter: SegmenterConfig::default(),
            features: FeatureConfig::default(),
            idle_label: "idle".to_string(),
            frame_queue: 4,
            state_queue: 8,
            shutdown_grace: Duration::from_secs(2),
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<(), PipelineError> {
        let invalid = |msg: &str| Err(PipelineError::InvalidConfig(msg.to_string()));

        if self.temporal.capacity == 0 {
            return invalid("window capacity must be positive");
        }
        if self.temporal.stride == 0 {
            return invalid("classification stride must be positive");
        }
        for alpha in [self.temporal.input_alpha, self.temporal.output_alpha] {
            if !(alpha > 0.0 && alpha <= 1.0) {
                return invalid("smoothing factors must be in (0, 1]");
            }
        }
        if self.correlator.max_in_flight == 0 {
            return invalid("max_in_flight must be positive");
        }
        if self.features.model_window_len == Some(0) {
            return invalid("model window length must be positive");
        }
        if self.frame_queue == 0 || self.state_queue == 0 {
            return invalid("queue sizes must be positive");
        }
        Ok(())
    }

    fn model_window_len(&self) -> usize {
        self.features
            .model_window_len
            .unwrap_or(self.temporal.capacity)
    }
}

enum PipelineInput {
    Frame(Frame),
    Keypoints {
        timestamp: Timestamp,
        keypoints: Option<KeypointFrame>,
    },
    Reset,
    Shutdown,
}

/// Handle to a running pipeline. Dropping it stops both threads.
#[derive(Debug)]
pub struct SignPipeline {
    input_tx: Sender<PipelineInput>,
    loop_handle: Option<thread::JoinHandle<()>>,
    worker_handle: Option<thread::JoinHandle<()>>,
}

impl SignPipeline {
    /// Validates the setup and spawns the pipeline loop and the classifier
    /// worker. Recognition states arrive on the returned receiver.
    pub fn start<P, H, C>(
        config: PipelineConfig,
        pose_detector: P,
        hand_detector: H,
        classifier: C,
        labels: LabelSet,
    ) -> Result<(Self, Receiver<RecognitionState>), PipelineError>
    where
        P: PoseDetector,
        H: HandDetector,
        C: SignClassifier,
    {
        config.validate()?;
        if labels.is_empty() {
            return Err(PipelineError::EmptyLabels);
        }
        if let Some(classes) = classifier.num_classes() {
            if classes != labels.len() {
                return Err(PipelineError::ClassCountMismatch {
                    labels: labels.len(),
                    classes,
                });
            }
        }
        let idle_class = labels.index_of(&config.idle_label);
        if idle_class.is_none() {
            log::warn!(
                "idle label {:?} not in label list; only low confidence counts as idle",
                config.idle_label
            );
        }

        let (input_tx, input_rx) = bounded(config.frame_queue);
        let (event_tx, event_rx) = unbounded();
        let (job_tx, job_rx) = bounded(1);
        let (state_tx, state_rx) = bounded(config.state_queue);

        let window_len = config.model_window_len();
        let worker_events = event_tx.clone();
        let worker_handle = thread::Builder::new()
            .name("sign-classifier".to_string())
            .spawn(move || run_classifier_worker(classifier, window_len, job_rx, worker_events))?;

        log::info!(
            "sign pipeline started: {} labels, window {}, stride {}, model window {}",
            labels.len(),
            config.temporal.capacity,
            config.temporal.stride,
            window_len
        );

        let pipeline_loop = PipelineLoop {
            pose_detector,
            hand_detector,
            correlator: Correlator::new(config.correlator.clone()),
            buffer: TemporalBuffer::new(config.temporal.clone()),
            probabilities: ProbabilitySmoother::new(config.temporal.output_alpha),
            segmenter: SignSegmenter::new(config.segmenter.clone(), idle_class),
            labels,
            event_tx,
            job_tx,
            state_tx,
            state_drain: state_rx.clone(),
            generation: 0,
            in_flight: false,
            shutdown_grace: config.shutdown_grace,
            state: RecognitionState::default(),
        };
        let loop_handle = thread::Builder::new()
            .name("sign-pipeline".to_string())
            .spawn(move || pipeline_loop.run(input_rx, event_rx))?;

        Ok((
            Self {
                input_tx,
                loop_handle: Some(loop_handle),
                worker_handle: Some(worker_handle),
            },
            state_rx,
        ))
    }

    /// Queues a captured frame. Returns `false` when the frame was dropped
    /// because the pipeline is behind.
    pub fn submit(&self, frame: Frame) -> bool {
        match self.input_tx.try_send(PipelineInput::Frame(frame)) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                log::debug!("pipeline busy, dropping frame");
                false
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }

    /// Feeds an already merged keypoint frame, bypassing the detectors.
    /// `None` is a frame without detections. Blocks while the queue is full.
    pub fn submit_keypoints(&self, timestamp: Timestamp, keypoints: Option<KeypointFrame>) -> bool {
        self.input_tx
            .send(PipelineInput::Keypoints {
                timestamp,
                keypoints,
            })
            .is_ok()
    }

    /// Clears the window, smoothing and segmenter state. Detector and
    /// classifier results that belong to earlier frames are discarded.
    pub fn reset(&self) {
        let _ = self.input_tx.send(PipelineInput::Reset);
    }

    /// Processes everything already queued, waits for pending detector
    /// results and an outstanding classification, then stops both threads.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if let Some(handle) = self.loop_handle.take() {
            let _ = self.input_tx.send(PipelineInput::Shutdown);
            let _ = handle.join();
        }
        if let Some(handle) = self.worker_handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for SignPipeline {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_classifier_worker<C: SignClassifier>(
    mut classifier: C,
    window_len: usize,
    job_rx: Receiver<ClassifyJob>,
    event_tx: Sender<PipelineEvent>,
) {
    while let Ok(job) = job_rx.recv() {
        let tensor = build_window_features_at(&job.window, window_len);
        let result = panic::catch_unwind(AssertUnwindSafe(|| classifier.classify(&tensor)))
            .unwrap_or_else(|_| Err(anyhow!("sign classifier panicked")));
        let event = PipelineEvent::Classified {
            generation: job.generation,
            continuity_break: job.continuity_break,
            result,
        };
        if event_tx.send(event).is_err() {
            break;
        }
    }
}

struct PipelineLoop<P, H> {
    pose_detector: P,
    hand_detector: H,
    correlator: Correlator,
    buffer: TemporalBuffer,
    probabilities: ProbabilitySmoother,
    segmenter: SignSegmenter,
    labels: LabelSet,
    event_tx: Sender<PipelineEvent>,
    job_tx: Sender<ClassifyJob>,
    state_tx: Sender<RecognitionState>,
    state_drain: Receiver<RecognitionState>,
    generation: u64,
    in_flight: bool,
    shutdown_grace: Duration,
    state: RecognitionState,
}

impl<P: PoseDetector, H: HandDetector> PipelineLoop<P, H> {
    fn run(mut self, input_rx: Receiver<PipelineInput>, event_rx: Receiver<PipelineEvent>) {
        loop {
            select! {
                recv(input_rx) -> input => match input {
                    Ok(PipelineInput::Frame(frame)) => self.dispatch_frame(frame),
                    Ok(PipelineInput::Keypoints { timestamp, keypoints }) => {
                        self.ingest(timestamp, keypoints.as_ref())
                    }
                    Ok(PipelineInput::Reset) => self.reset(),
                    Ok(PipelineInput::Shutdown) | Err(_) => break,
                },
                recv(event_rx) -> event => match event {
                    Ok(event) => self.handle_event(event),
                    Err(_) => break,
                },
            }
        }

        self.drain(&event_rx);
        log::info!("sign pipeline stopped");
    }

    /// Lets detector results for frames already dispatched, and then an
    /// outstanding classification, land before the loop exits. Detectors
    /// that never answer are given up on after `shutdown_grace`.
    fn drain(&mut self, event_rx: &Receiver<PipelineEvent>) {
        let deadline = Instant::now() + self.shutdown_grace;
        while self.correlator.in_flight() > 0 {
            match event_rx.recv_deadline(deadline) {
                Ok(event) => self.handle_event(event),
                Err(_) => {
                    log::warn!(
                        "stopping with {} frames still awaiting detectors",
                        self.correlator.in_flight()
                    );
                    break;
                }
            }
        }

        while self.in_flight {
            match event_rx.recv() {
                Ok(event) => self.handle_event(event),
                Err(_) => break,
            }
        }
    }

    fn dispatch_frame(&mut self, frame: Frame) {
        let timestamp = frame.timestamp;
        let Some(dispatch) = self.correlator.submit(frame) else {
            return;
        };
        self.pose_detector
            .detect(dispatch.pose, PoseReply::new(timestamp, self.event_tx.clone()));
        self.hand_detector
            .detect(dispatch.hands, HandReply::new(timestamp, self.event_tx.clone()));
    }

    fn handle_event(&mut self, event: PipelineEvent) {
        match event {
            PipelineEvent::Pose { timestamp, result } => {
                if let Some(outcome) = self.correlator.complete_pose(timestamp, result) {
                    self.ingest_outcome(outcome);
                }
            }
            PipelineEvent::Hands { timestamp, result } => {
                if let Some(outcome) = self.correlator.complete_hands(timestamp, result) {
                    self.ingest_outcome(outcome);
                }
            }
            PipelineEvent::Classified {
                generation,
                continuity_break,
                result,
            } => {
                self.in_flight = false;
                if generation != self.generation {
                    log::debug!("dropping classification from before reset");
                    return;
                }
                if continuity_break {
                    self.probabilities.reset();
                }
                self.apply_classification(result);
            }
        }
    }

    fn ingest_outcome(&mut self, outcome: FrameOutcome) {
        self.ingest(outcome.timestamp(), outcome.keypoints());
    }

    fn ingest(&mut self, timestamp: Timestamp, raw: Option<&KeypointFrame>) {
        let normalized = raw.filter(|frame| !frame.is_empty()).map(normalize_frame);
        if let Some(window) = self.buffer.push(normalized.as_ref()) {
            self.request_classification(timestamp, window);
        }
        self.state.window_progress = self.buffer.progress();
        self.publish();
    }

    fn request_classification(&mut self, timestamp: Timestamp, window: WindowSnapshot) {
        if self.in_flight {
            log::debug!("classifier busy, skipping window at {timestamp}");
            return;
        }
        let continuity_break = self.buffer.take_continuity_break();
        let job = ClassifyJob {
            generation: self.generation,
            continuity_break,
            window,
        };
        match self.job_tx.try_send(job) {
            Ok(()) => self.in_flight = true,
            Err(TrySendError::Full(_)) => {
                log::debug!("classifier queue full, skipping window at {timestamp}");
                self.buffer.restore_continuity_break(continuity_break);
            }
            Err(TrySendError::Disconnected(_)) => {
                log::warn!("classifier worker has stopped");
                self.buffer.restore_continuity_break(continuity_break);
            }
        }
    }

    fn apply_classification(&mut self, result: anyhow::Result<Vec<f32>>) {
        let probabilities = match result {
            Ok(probabilities) if probabilities.len() == self.labels.len() => probabilities,
            Ok(probabilities) => {
                log::warn!(
                    "classifier returned {} scores for {} labels",
                    probabilities.len(),
                    self.labels.len()
                );
                self.clear_prediction();
                return;
            }
            Err(err) => {
                log::warn!("sign classification failed: {err:?}");
                self.clear_prediction();
                return;
            }
        };

        let smoothed = self.probabilities.apply(&probabilities);
        let Some((class, confidence)) = argmax(&smoothed) else {
            self.clear_prediction();
            return;
        };

        match self.segmenter.process(class, confidence) {
            SegmentEvent::Idle | SegmentEvent::Cooldown => {
                self.state.tentative = None;
                self.state.confidence = confidence;
                self.state.is_confident = false;
            }
            SegmentEvent::Update {
                class,
                confidence,
                confident,
            } => {
                self.state.tentative = self.label(class);
                self.state.confidence = confidence;
                self.state.is_confident = confident;
            }
            SegmentEvent::Commit { class, confidence } => {
                let label = self.label(class);
                if let Some(word) = &label {
                    log::info!("committed {word:?} ({:.0}%)", confidence * 100.0);
                    self.state.committed.push(word.clone());
                }
                self.state.newly_committed = label.clone();
                self.state.tentative = label;
                self.state.confidence = confidence;
                self.state.is_confident = true;
            }
        }
        self.publish();
    }

    fn label(&self, class: usize) -> Option<String> {
        self.labels.get(class).map(str::to_string)
    }

    fn clear_prediction(&mut self) {
        self.state.tentative = None;
        self.state.confidence = 0.0;
        self.state.is_confident = false;
        self.publish();
    }

    fn reset(&mut self) {
        self.generation += 1;
        self.correlator.clear();
        self.buffer.reset();
        self.probabilities.reset();
        self.segmenter.reset();
        self.state = RecognitionState::default();
        log::info!("sign pipeline reset");
        self.publish();
    }

    /// Latest wins: when the consumer lags, its oldest unread state is
    /// replaced.
    fn publish(&mut self) {
        let state = self.state.clone();
        self.state.newly_committed = None;
        if let Err(TrySendError::Full(state)) = self.state_tx.try_send(state) {
            let _ = self.state_drain.try_recv();
            let _ = self.state_tx.try_send(state);
        }
    }
}
