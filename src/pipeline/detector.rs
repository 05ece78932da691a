use anyhow::Result;
use crossbeam_channel::Sender;

use crate::correlator::DetectionRequest;
use crate::temporal::WindowSnapshot;
use crate::types::{HandDetection, PoseDetection, Timestamp};

/// Completions funneled into the pipeline loop from detector callbacks and
/// the classifier worker.
pub(crate) enum PipelineEvent {
    Pose {
        timestamp: Timestamp,
        result: Result<PoseDetection>,
    },
    Hands {
        timestamp: Timestamp,
        result: Result<HandDetection>,
    },
    Classified {
        generation: u64,
        /// The classified window follows a no-detection frame.
        continuity_break: bool,
        result: Result<Vec<f32>>,
    },
}

pub(crate) struct ClassifyJob {
    pub generation: u64,
    pub continuity_break: bool,
    pub window: WindowSnapshot,
}

/// Completion handle for one body-detector request. May be moved to any
/// thread; sending an `Err` still marks the detector as finished for the
/// frame.
pub struct PoseReply {
    timestamp: Timestamp,
    tx: Sender<PipelineEvent>,
}

impl PoseReply {
    pub(crate) fn new(timestamp: Timestamp, tx: Sender<PipelineEvent>) -> Self {
        Self { timestamp, tx }
    }

    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    pub fn send(self, result: Result<PoseDetection>) {
        let event = PipelineEvent::Pose {
            timestamp: self.timestamp,
            result,
        };
        if self.tx.send(event).is_err() {
            log::debug!("pipeline stopped before pose result {}", self.timestamp);
        }
    }
}

/// Completion handle for one hand-detector request.
pub struct HandReply {
    timestamp: Timestamp,
    tx: Sender<PipelineEvent>,
}

impl HandReply {
    pub(crate) fn new(timestamp: Timestamp, tx: Sender<PipelineEvent>) -> Self {
        Self { timestamp, tx }
    }

    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    pub fn send(self, result: Result<HandDetection>) {
        let event = PipelineEvent::Hands {
            timestamp: self.timestamp,
            result,
        };
        if self.tx.send(event).is_err() {
            log::debug!("pipeline stopped before hand result {}", self.timestamp);
        }
    }
}

/// Body landmark detector. Runs on the full frame and answers through
/// `reply`, synchronously or later from another thread.
pub trait PoseDetector: Send + 'static {
    fn detect(&mut self, request: DetectionRequest, reply: PoseReply);
}

/// Hand landmark detector. `request.image` may be a crop; landmarks are
/// reported relative to the image it was given.
pub trait HandDetector: Send + 'static {
    fn detect(&mut self, request: DetectionRequest, reply: HandReply);
}

impl<F> PoseDetector for F
where
    F: FnMut(DetectionRequest, PoseReply) + Send + 'static,
{
    fn detect(&mut self, request: DetectionRequest, reply: PoseReply) {
        self(request, reply)
    }
}

impl<F> HandDetector for F
where
    F: FnMut(DetectionRequest, HandReply) + Send + 'static,
{
    fn detect(&mut self, request: DetectionRequest, reply: HandReply) {
        self(request, reply)
    }
}
