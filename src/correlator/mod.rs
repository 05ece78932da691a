//! Per-frame join of the body and hand detector results.
//!
//! Every submitted frame gets a [`PendingFrame`] keyed by its timestamp. The
//! two detector completions may arrive in either order; the record is
//! removed and its merged keypoints delivered once both have reported.

mod roi;

use std::{collections::BTreeMap, sync::Arc};

use anyhow::Result;

pub use roi::{CropRegion, RoiCache, RoiConfig, crop_frame};

use crate::keypoints::{HAND_LANDMARKS, KeypointFrame, POSE_LANDMARKS};
use crate::types::{DetectedHand, Frame, HandDetection, Handedness, PoseDetection, Timestamp};

#[derive(Clone, Debug)]
pub struct CorrelatorConfig {
    /// Frames awaiting detector results beyond this are evicted oldest first.
    pub max_in_flight: usize,
    pub roi: RoiConfig,
}

impl Default for CorrelatorConfig {
    fn default() -> Self {
        Self {
            max_in_flight: 8,
            roi: RoiConfig::default(),
        }
    }
}

/// Image handed to one detector. `crop` is set when `image` is a sub-region
/// of the captured frame.
#[derive(Clone, Debug)]
pub struct DetectionRequest {
    pub image: Arc<Frame>,
    pub crop: Option<CropRegion>,
}

impl DetectionRequest {
    pub fn timestamp(&self) -> Timestamp {
        self.image.timestamp
    }
}

#[derive(Clone, Debug)]
pub struct FrameDispatch {
    pub pose: DetectionRequest,
    pub hands: DetectionRequest,
}

#[derive(Clone, Debug, PartialEq)]
pub enum FrameOutcome {
    Detected {
        timestamp: Timestamp,
        keypoints: KeypointFrame,
    },
    NoDetection {
        timestamp: Timestamp,
    },
}

impl FrameOutcome {
    pub fn timestamp(&self) -> Timestamp {
        match self {
            FrameOutcome::Detected { timestamp, .. } | FrameOutcome::NoDetection { timestamp } => {
                *timestamp
            }
        }
    }

    pub fn keypoints(&self) -> Option<&KeypointFrame> {
        match self {
            FrameOutcome::Detected { keypoints, .. } => Some(keypoints),
            FrameOutcome::NoDetection { .. } => None,
        }
    }
}

#[derive(Debug)]
struct PendingFrame {
    pose_done: bool,
    hands_done: bool,
    merged: Option<KeypointFrame>,
    crop: Option<CropRegion>,
    source_width: u32,
    source_height: u32,
    mirrored: bool,
}

impl PendingFrame {
    fn merged_mut(&mut self) -> &mut KeypointFrame {
        self.merged.get_or_insert_with(KeypointFrame::zeros)
    }
}

pub struct Correlator {
    cfg: CorrelatorConfig,
    pending: BTreeMap<Timestamp, PendingFrame>,
    cache: RoiCache,
    /// Frame whose pose result last wrote `cache`.
    cache_timestamp: Option<Timestamp>,
    last_timestamp: Option<Timestamp>,
}

impl Correlator {
    pub fn new(cfg: CorrelatorConfig) -> Self {
        Self {
            cfg,
            pending: BTreeMap::new(),
            cache: RoiCache::default(),
            cache_timestamp: None,
            last_timestamp: None,
        }
    }

    pub fn in_flight(&self) -> usize {
        self.pending.len()
    }

    pub fn roi_cache(&self) -> &RoiCache {
        &self.cache
    }

    /// Drops every pending record and the cached body geometry. Results for
    /// the dropped frames are discarded when they arrive.
    pub fn clear(&mut self) {
        if !self.pending.is_empty() {
            log::debug!("dropping {} pending frames", self.pending.len());
        }
        self.pending.clear();
        self.cache.clear();
        self.cache_timestamp = None;
    }

    /// Registers a frame and decides what each detector should run on.
    /// Returns `None` for a timestamp that does not move forward.
    pub fn submit(&mut self, frame: Frame) -> Option<FrameDispatch> {
        let timestamp = frame.timestamp;
        if self.last_timestamp.is_some_and(|last| timestamp <= last) {
            log::warn!(
                "rejecting frame {timestamp}: timestamps must increase (last {:?})",
                self.last_timestamp
            );
            return None;
        }
        self.last_timestamp = Some(timestamp);

        while self.pending.len() >= self.cfg.max_in_flight.max(1) {
            if let Some((evicted, _)) = self.pending.pop_first() {
                log::debug!("evicting frame {evicted}: detectors never completed");
            }
        }

        let (width, height) = (frame.width, frame.height);
        let image = Arc::new(frame);
        let hands = match self.cache.region(width, height, &self.cfg.roi) {
            Some(region) => match crop_frame(&image, &region) {
                Ok(cropped) => DetectionRequest {
                    image: Arc::new(cropped),
                    crop: Some(region),
                },
                Err(err) => {
                    log::warn!("hand crop failed, using full frame: {err:?}");
                    DetectionRequest {
                        image: image.clone(),
                        crop: None,
                    }
                }
            },
            None => DetectionRequest {
                image: image.clone(),
                crop: None,
            },
        };

        self.pending.insert(
            timestamp,
            PendingFrame {
                pose_done: false,
                hands_done: false,
                merged: None,
                crop: hands.crop,
                source_width: width,
                source_height: height,
                mirrored: image.mirrored,
            },
        );

        Some(FrameDispatch {
            pose: DetectionRequest { image, crop: None },
            hands,
        })
    }

    pub fn complete_pose(
        &mut self,
        timestamp: Timestamp,
        result: Result<PoseDetection>,
    ) -> Option<FrameOutcome> {
        let Some(record) = self.pending.get_mut(&timestamp) else {
            log::debug!("discarding pose result for untracked frame {timestamp}");
            return None;
        };
        if record.pose_done {
            log::debug!("duplicate pose result for frame {timestamp}");
            return None;
        }
        record.pose_done = true;

        let landmarks = match result {
            Ok(detection) => detection.landmarks,
            Err(err) => {
                log::warn!("pose detector failed for frame {timestamp}: {err:?}");
                Vec::new()
            }
        };

        // Only the newest pose result may steer the next crop.
        let newest = self.cache_timestamp.is_none_or(|cached| timestamp > cached);
        if !newest {
            log::debug!(
                "pose result for frame {timestamp} is older than cached frame {:?}",
                self.cache_timestamp
            );
        }

        if landmarks.len() == POSE_LANDMARKS {
            if newest {
                self.cache.update(
                    &landmarks,
                    record.source_width,
                    record.source_height,
                    self.cfg.roi.visibility_threshold,
                );
            }
            record.merged_mut().set_pose(&landmarks);
        } else {
            if !landmarks.is_empty() {
                log::warn!(
                    "pose result for frame {timestamp} has {} landmarks, expected {POSE_LANDMARKS}",
                    landmarks.len()
                );
            }
            if newest {
                self.cache.clear();
            }
        }
        if newest {
            self.cache_timestamp = Some(timestamp);
        }

        self.finish_if_complete(timestamp)
    }

    pub fn complete_hands(
        &mut self,
        timestamp: Timestamp,
        result: Result<HandDetection>,
    ) -> Option<FrameOutcome> {
        let Some(record) = self.pending.get_mut(&timestamp) else {
            log::debug!("discarding hand result for untracked frame {timestamp}");
            return None;
        };
        if record.hands_done {
            log::debug!("duplicate hand result for frame {timestamp}");
            return None;
        }
        record.hands_done = true;

        let hands = match result {
            Ok(detection) => detection.hands,
            Err(err) => {
                log::warn!("hand detector failed for frame {timestamp}: {err:?}");
                Vec::new()
            }
        };

        for hand in [Handedness::Left, Handedness::Right] {
            let Some(best) = pick_hand(&hands, hand) else {
                continue;
            };
            match record.crop {
                Some(region) => {
                    let remapped: Vec<_> =
                        best.landmarks.iter().map(|lm| region.remap(lm)).collect();
                    record.merged_mut().set_hand(hand, &remapped);
                }
                None => record.merged_mut().set_hand(hand, &best.landmarks),
            }
        }

        self.finish_if_complete(timestamp)
    }

    fn finish_if_complete(&mut self, timestamp: Timestamp) -> Option<FrameOutcome> {
        let done = self
            .pending
            .get(&timestamp)
            .is_some_and(|record| record.pose_done && record.hands_done);
        if !done {
            return None;
        }
        let record = self.pending.remove(&timestamp)?;

        match record.merged {
            Some(mut keypoints) if !keypoints.is_empty() => {
                if record.mirrored {
                    keypoints.mirror();
                }
                Some(FrameOutcome::Detected {
                    timestamp,
                    keypoints,
                })
            }
            _ => Some(FrameOutcome::NoDetection { timestamp }),
        }
    }
}

/// Highest-scoring hand of the given side with a complete landmark set.
fn pick_hand(hands: &[DetectedHand], side: Handedness) -> Option<&DetectedHand> {
    hands
        .iter()
        .filter(|h| h.handedness == side)
        .filter(|h| {
            let complete = h.landmarks.len() == HAND_LANDMARKS;
            if !complete {
                log::warn!(
                    "{} hand has {} landmarks, expected {HAND_LANDMARKS}",
                    side.label(),
                    h.landmarks.len()
                );
            }
            complete
        })
        .max_by(|a, b| a.score.total_cmp(&b.score))
}
