//! Fixed keypoint layout shared with the sign classifier.
//!
//! ```text
//! [0, 132)    33 body landmarks   x, y, z, visibility
//! [132, 195)  21 left-hand points x, y, z
//! [195, 258)  21 right-hand points x, y, z
//! ```
//!
//! Missing detections stay zero-filled. Changing any range here requires
//! retraining the classifier.

use crate::types::{Handedness, Landmark};

pub const POSE_LANDMARKS: usize = 33;
pub const POSE_STRIDE: usize = 4;
pub const HAND_LANDMARKS: usize = 21;
pub const HAND_STRIDE: usize = 3;

pub const POSE_OFFSET: usize = 0;
pub const POSE_WIDTH: usize = POSE_LANDMARKS * POSE_STRIDE;
pub const LEFT_HAND_OFFSET: usize = POSE_OFFSET + POSE_WIDTH;
pub const HAND_WIDTH: usize = HAND_LANDMARKS * HAND_STRIDE;
pub const RIGHT_HAND_OFFSET: usize = LEFT_HAND_OFFSET + HAND_WIDTH;
pub const KEYPOINT_WIDTH: usize = RIGHT_HAND_OFFSET + HAND_WIDTH;

pub const NOSE: usize = 0;
pub const LEFT_SHOULDER: usize = 11;
pub const RIGHT_SHOULDER: usize = 12;
pub const LEFT_WRIST: usize = 15;
pub const RIGHT_WRIST: usize = 16;
pub const HAND_WRIST: usize = 0;

/// Left/right body landmark pairs swapped when un-mirroring a capture.
pub const POSE_MIRROR_PAIRS: &[(usize, usize)] = &[
    (1, 4),
    (2, 5),
    (3, 6),
    (7, 8),
    (9, 10),
    (11, 12),
    (13, 14),
    (15, 16),
    (17, 18),
    (19, 20),
    (21, 22),
    (23, 24),
    (25, 26),
    (27, 28),
    (29, 30),
    (31, 32),
];

pub fn hand_offset(hand: Handedness) -> usize {
    match hand {
        Handedness::Left => LEFT_HAND_OFFSET,
        Handedness::Right => RIGHT_HAND_OFFSET,
    }
}

#[derive(Clone, PartialEq)]
pub struct KeypointFrame {
    values: [f32; KEYPOINT_WIDTH],
}

impl std::fmt::Debug for KeypointFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeypointFrame")
            .field("pose", &self.has_pose())
            .field("left_hand", &self.has_hand(Handedness::Left))
            .field("right_hand", &self.has_hand(Handedness::Right))
            .finish()
    }
}

impl Default for KeypointFrame {
    fn default() -> Self {
        Self::zeros()
    }
}

impl KeypointFrame {
    pub fn zeros() -> Self {
        Self {
            values: [0.0; KEYPOINT_WIDTH],
        }
    }

    pub fn from_slice(values: &[f32]) -> Option<Self> {
        let values: [f32; KEYPOINT_WIDTH] = values.try_into().ok()?;
        Some(Self { values })
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.values
    }

    pub fn as_mut_slice(&mut self) -> &mut [f32] {
        &mut self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        !self.has_pose()
            && !self.has_hand(Handedness::Left)
            && !self.has_hand(Handedness::Right)
    }

    pub fn pose_block(&self) -> &[f32] {
        &self.values[POSE_OFFSET..POSE_OFFSET + POSE_WIDTH]
    }

    pub fn hand_block(&self, hand: Handedness) -> &[f32] {
        let offset = hand_offset(hand);
        &self.values[offset..offset + HAND_WIDTH]
    }

    pub fn has_pose(&self) -> bool {
        self.pose_block().iter().any(|v| *v != 0.0)
    }

    pub fn has_hand(&self, hand: Handedness) -> bool {
        self.hand_block(hand).iter().any(|v| *v != 0.0)
    }

    /// `[x, y, z, visibility]` of a body landmark.
    pub fn pose_point(&self, index: usize) -> [f32; 4] {
        let at = POSE_OFFSET + index * POSE_STRIDE;
        [
            self.values[at],
            self.values[at + 1],
            self.values[at + 2],
            self.values[at + 3],
        ]
    }

    pub fn hand_point(&self, hand: Handedness, index: usize) -> [f32; 3] {
        let at = hand_offset(hand) + index * HAND_STRIDE;
        [self.values[at], self.values[at + 1], self.values[at + 2]]
    }

    pub fn set_pose(&mut self, landmarks: &[Landmark]) {
        for (idx, lm) in landmarks.iter().take(POSE_LANDMARKS).enumerate() {
            let at = POSE_OFFSET + idx * POSE_STRIDE;
            self.values[at] = lm.x;
            self.values[at + 1] = lm.y;
            self.values[at + 2] = lm.z;
            self.values[at + 3] = lm.visibility;
        }
    }

    pub fn set_hand(&mut self, hand: Handedness, landmarks: &[Landmark]) {
        let offset = hand_offset(hand);
        for (idx, lm) in landmarks.iter().take(HAND_LANDMARKS).enumerate() {
            let at = offset + idx * HAND_STRIDE;
            self.values[at] = lm.x;
            self.values[at + 1] = lm.y;
            self.values[at + 2] = lm.z;
        }
    }

    /// Converts a rear-camera capture to subject-relative coordinates: left
    /// and right blocks swap and x maps to `1 - x`. Absent blocks stay zero,
    /// so applying this twice restores the original frame.
    pub fn mirror(&mut self) {
        if self.has_pose() {
            for &(a, b) in POSE_MIRROR_PAIRS {
                let a_at = POSE_OFFSET + a * POSE_STRIDE;
                let b_at = POSE_OFFSET + b * POSE_STRIDE;
                for k in 0..POSE_STRIDE {
                    self.values.swap(a_at + k, b_at + k);
                }
            }
            for idx in 0..POSE_LANDMARKS {
                let at = POSE_OFFSET + idx * POSE_STRIDE;
                self.values[at] = 1.0 - self.values[at];
            }
        }

        for k in 0..HAND_WIDTH {
            self.values.swap(LEFT_HAND_OFFSET + k, RIGHT_HAND_OFFSET + k);
        }
        for hand in [Handedness::Left, Handedness::Right] {
            if !self.has_hand(hand) {
                continue;
            }
            let offset = hand_offset(hand);
            for idx in 0..HAND_LANDMARKS {
                let at = offset + idx * HAND_STRIDE;
                self.values[at] = 1.0 - self.values[at];
            }
        }
    }
}
