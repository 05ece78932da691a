//! Frame normalization and window feature assembly.
//!
//! Both functions must reproduce the offline transform the classifier was
//! trained with, bit for bit where possible: anchor, scale, then derivatives
//! on the final-resolution sequence.

use rayon::prelude::*;

use crate::keypoints::{
    HAND_LANDMARKS, HAND_STRIDE, HAND_WRIST, KEYPOINT_WIDTH, KeypointFrame, LEFT_SHOULDER,
    LEFT_WRIST, NOSE, POSE_LANDMARKS, POSE_OFFSET, POSE_STRIDE, RIGHT_SHOULDER, RIGHT_WRIST,
    hand_offset,
};
use crate::types::Handedness;

pub const ENGINEERED_FEATURES: usize = 6;
/// position | velocity | acceleration | engineered
pub const FEATURE_WIDTH: usize = 3 * KEYPOINT_WIDTH + ENGINEERED_FEATURES;

const SCALE_EPSILON: f32 = 1e-6;

#[derive(Clone, Debug, Default)]
pub struct FeatureConfig {
    /// Frames per classifier input when the model was trained on a different
    /// length than the sliding window. The window is resampled before any
    /// derivative is taken.
    pub model_window_len: Option<usize>,
}

/// Row-major `[frames x FEATURE_WIDTH]` classifier input.
#[derive(Clone, Debug, PartialEq)]
pub struct FeatureTensor {
    frames: usize,
    data: Vec<f32>,
}

impl FeatureTensor {
    pub fn frames(&self) -> usize {
        self.frames
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.frames, FEATURE_WIDTH)
    }

    pub fn row(&self, index: usize) -> &[f32] {
        &self.data[index * FEATURE_WIDTH..(index + 1) * FEATURE_WIDTH]
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    pub fn into_vec(self) -> Vec<f32> {
        self.data
    }
}

fn is_zero3(p: [f32; 3]) -> bool {
    p[0] == 0.0 && p[1] == 0.0 && p[2] == 0.0
}

fn distance3(a: [f32; 3], b: [f32; 3]) -> f32 {
    ((a[0] - b[0]).powi(2) + (a[1] - b[1]).powi(2) + (a[2] - b[2]).powi(2)).sqrt()
}

fn xyz(p: [f32; 4]) -> [f32; 3] {
    [p[0], p[1], p[2]]
}

/// Translates the pose to the shoulder midpoint and each hand to its wrist,
/// then divides every coordinate by the shoulder width. Sub-blocks whose
/// anchor is the zero sentinel are left in place, and scaling is skipped when
/// the shoulder width is degenerate.
pub fn normalize_frame(raw: &KeypointFrame) -> KeypointFrame {
    let mut out = raw.clone();
    let ls = raw.pose_point(LEFT_SHOULDER);
    let rs = raw.pose_point(RIGHT_SHOULDER);
    let anchor = [
        (ls[0] + rs[0]) / 2.0,
        (ls[1] + rs[1]) / 2.0,
        (ls[2] + rs[2]) / 2.0,
    ];
    let shoulder_width = ((ls[0] - rs[0]).powi(2) + (ls[1] - rs[1]).powi(2)).sqrt();

    let values = out.as_mut_slice();

    if !is_zero3(anchor) {
        for idx in 0..POSE_LANDMARKS {
            let at = POSE_OFFSET + idx * POSE_STRIDE;
            for k in 0..3 {
                values[at + k] -= anchor[k];
            }
        }
    }

    for hand in [Handedness::Left, Handedness::Right] {
        let offset = hand_offset(hand);
        let wrist_at = offset + HAND_WRIST * HAND_STRIDE;
        let wrist = [values[wrist_at], values[wrist_at + 1], values[wrist_at + 2]];
        if is_zero3(wrist) {
            continue;
        }
        for idx in 0..HAND_LANDMARKS {
            let at = offset + idx * HAND_STRIDE;
            for k in 0..3 {
                values[at + k] -= wrist[k];
            }
        }
    }

    if shoulder_width >= SCALE_EPSILON {
        for idx in 0..POSE_LANDMARKS {
            let at = POSE_OFFSET + idx * POSE_STRIDE;
            for k in 0..3 {
                values[at + k] /= shoulder_width;
            }
        }
        for hand in [Handedness::Left, Handedness::Right] {
            let offset = hand_offset(hand);
            for idx in 0..HAND_LANDMARKS {
                let at = offset + idx * HAND_STRIDE;
                for k in 0..3 {
                    values[at + k] /= shoulder_width;
                }
            }
        }
    }

    out
}

/// Wrist-to-wrist distance, the left-minus-right wrist vector and each
/// wrist's distance to the nose, from a normalized pose block.
pub fn engineered_features(frame: &KeypointFrame) -> [f32; ENGINEERED_FEATURES] {
    let lw = xyz(frame.pose_point(LEFT_WRIST));
    let rw = xyz(frame.pose_point(RIGHT_WRIST));
    let nose = xyz(frame.pose_point(NOSE));
    [
        distance3(lw, rw),
        lw[0] - rw[0],
        lw[1] - rw[1],
        lw[2] - rw[2],
        distance3(lw, nose),
        distance3(rw, nose),
    ]
}

/// Builds the classifier tensor from a normalized sequence.
///
/// `velocity[0]` is zero; `acceleration[0]` and `acceleration[1]` are zero,
/// after which `acceleration[i] = velocity[i] - velocity[i - 1]`. Derivatives
/// are taken on `frames` as given, so any resampling must happen before this
/// call (see [`build_window_features_at`]).
pub fn build_window_features(frames: &[KeypointFrame]) -> FeatureTensor {
    let mut data = vec![0.0f32; frames.len() * FEATURE_WIDTH];

    data.par_chunks_mut(FEATURE_WIDTH)
        .enumerate()
        .for_each(|(i, row)| {
            let (position, rest) = row.split_at_mut(KEYPOINT_WIDTH);
            let (velocity, rest) = rest.split_at_mut(KEYPOINT_WIDTH);
            let (acceleration, engineered) = rest.split_at_mut(KEYPOINT_WIDTH);

            let current = frames[i].as_slice();
            position.copy_from_slice(current);

            if i >= 1 {
                let prev = frames[i - 1].as_slice();
                for k in 0..KEYPOINT_WIDTH {
                    velocity[k] = current[k] - prev[k];
                }
            }
            if i >= 2 {
                let prev = frames[i - 1].as_slice();
                let prev2 = frames[i - 2].as_slice();
                for k in 0..KEYPOINT_WIDTH {
                    let prev_velocity = prev[k] - prev2[k];
                    acceleration[k] = velocity[k] - prev_velocity;
                }
            }

            engineered.copy_from_slice(&engineered_features(&frames[i]));
        });

    FeatureTensor {
        frames: frames.len(),
        data,
    }
}

/// Linearly interpolates a normalized sequence to `len` frames, sampling at
/// evenly spaced positions from the first to the last frame.
pub fn resample_sequence(frames: &[KeypointFrame], len: usize) -> Vec<KeypointFrame> {
    if len == 0 || frames.is_empty() {
        return Vec::new();
    }
    if frames.len() == len {
        return frames.to_vec();
    }
    if frames.len() == 1 || len == 1 {
        return vec![frames[0].clone(); len];
    }

    let last = (frames.len() - 1) as f32;
    (0..len)
        .map(|i| {
            let pos = i as f32 * last / (len - 1) as f32;
            let lo = (pos.floor() as usize).min(frames.len() - 1);
            let hi = (lo + 1).min(frames.len() - 1);
            let t = pos - lo as f32;
            if t == 0.0 || lo == hi {
                return frames[lo].clone();
            }
            let mut out = KeypointFrame::zeros();
            let a = frames[lo].as_slice();
            let b = frames[hi].as_slice();
            for (k, v) in out.as_mut_slice().iter_mut().enumerate() {
                *v = a[k] + (b[k] - a[k]) * t;
            }
            out
        })
        .collect()
}

/// Resamples to the model's window length first, then differentiates.
pub fn build_window_features_at(frames: &[KeypointFrame], len: usize) -> FeatureTensor {
    if frames.len() == len {
        return build_window_features(frames);
    }
    let resampled = resample_sequence(frames, len);
    build_window_features(&resampled)
}
