/// Monotonic capture timestamp in milliseconds. Used as the correlation key
/// for detector results.
pub type Timestamp = u64;

#[derive(Clone, Debug)]
pub struct Frame {
    pub rgba: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub timestamp: Timestamp,
    /// Rear-camera capture; landmarks are mirrored back so that left/right
    /// stay relative to the signer.
    pub mirrored: bool,
}

impl Frame {
    pub fn new(rgba: Vec<u8>, width: u32, height: u32, timestamp: Timestamp) -> Self {
        Self {
            rgba,
            width,
            height,
            timestamp,
            mirrored: false,
        }
    }

    pub fn with_mirrored(mut self, mirrored: bool) -> Self {
        self.mirrored = mirrored;
        self
    }
}

/// A single detected point, normalized to the image handed to the detector.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Landmark {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub visibility: f32,
}

impl Landmark {
    pub fn new(x: f32, y: f32, z: f32, visibility: f32) -> Self {
        Self {
            x,
            y,
            z,
            visibility,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Handedness {
    Left,
    Right,
}

impl Handedness {
    pub fn label(&self) -> &'static str {
        match self {
            Handedness::Left => "left",
            Handedness::Right => "right",
        }
    }
}

/// Body detector output; empty when no person was found.
#[derive(Clone, Debug, Default)]
pub struct PoseDetection {
    pub landmarks: Vec<Landmark>,
}

#[derive(Clone, Debug)]
pub struct DetectedHand {
    pub handedness: Handedness,
    pub score: f32,
    pub landmarks: Vec<Landmark>,
}

/// Hand detector output; zero, one or two hands.
#[derive(Clone, Debug, Default)]
pub struct HandDetection {
    pub hands: Vec<DetectedHand>,
}

/// Snapshot pushed to the consumer after every processed frame or
/// classification.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RecognitionState {
    pub tentative: Option<String>,
    pub confidence: f32,
    pub is_confident: bool,
    pub window_progress: f32,
    pub committed: Vec<String>,
    pub newly_committed: Option<String>,
}

impl RecognitionState {
    pub fn display_text(&self) -> String {
        match &self.tentative {
            Some(label) => format!("{} ({:.0}%)", label, self.confidence * 100.0),
            None => format!("... ({:.0}%)", self.window_progress * 100.0),
        }
    }

    pub fn sentence(&self) -> String {
        self.committed.join(" ")
    }
}
