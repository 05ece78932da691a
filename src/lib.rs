//! Real-time sign recognition: joins body and hand landmark detections per
//! frame, builds classifier windows from them and segments the classifier's
//! stream into committed words.

pub mod classifier;
pub mod correlator;
pub mod error;
pub mod features;
pub mod keypoints;
pub mod model_download;
pub mod pipeline;
pub mod segmenter;
pub mod temporal;
pub mod types;

pub use classifier::{LabelSet, OrtClassifierConfig, OrtSignClassifier, SignClassifier};
pub use correlator::{Correlator, CorrelatorConfig, DetectionRequest, FrameOutcome};
pub use error::PipelineError;
pub use keypoints::KeypointFrame;
pub use pipeline::{HandDetector, HandReply, PipelineConfig, PoseDetector, PoseReply, SignPipeline};
pub use types::{
    DetectedHand, Frame, HandDetection, Handedness, Landmark, PoseDetection, RecognitionState,
    Timestamp,
};
