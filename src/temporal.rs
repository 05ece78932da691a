//! Sliding window and the two EMA stages around the classifier.

use std::{collections::VecDeque, sync::Arc};

use crate::keypoints::{
    HAND_WIDTH, KEYPOINT_WIDTH, KeypointFrame, LEFT_HAND_OFFSET, POSE_OFFSET, POSE_WIDTH,
    RIGHT_HAND_OFFSET,
};

pub const WINDOW_CAPACITY: usize = 30;

/// Sub-blocks smoothed independently so a block that drops out and comes back
/// restarts from its raw value.
const BLOCKS: [(usize, usize); 3] = [
    (POSE_OFFSET, POSE_WIDTH),
    (LEFT_HAND_OFFSET, HAND_WIDTH),
    (RIGHT_HAND_OFFSET, HAND_WIDTH),
];

pub type WindowSnapshot = Arc<[KeypointFrame]>;

#[derive(Clone, Debug)]
pub struct TemporalConfig {
    pub capacity: usize,
    /// Weight of the newest normalized frame.
    pub input_alpha: f32,
    /// Weight of the newest probability vector.
    pub output_alpha: f32,
    /// Classify on every `stride`-th inserted frame once the window is full.
    pub stride: usize,
}

impl Default for TemporalConfig {
    fn default() -> Self {
        Self {
            capacity: WINDOW_CAPACITY,
            input_alpha: 0.4,
            output_alpha: 0.4,
            stride: 2,
        }
    }
}

fn block_present(values: &[f32], (offset, width): (usize, usize)) -> bool {
    values[offset..offset + width].iter().any(|v| *v != 0.0)
}

/// Input-side EMA over normalized frames.
pub struct FeatureSmoother {
    alpha: f32,
    prev: Option<KeypointFrame>,
}

impl FeatureSmoother {
    pub fn new(alpha: f32) -> Self {
        Self { alpha, prev: None }
    }

    /// Smooths `frame` against the previous output. `None` means nothing was
    /// detected: a zero frame is returned and continuity is broken.
    pub fn apply(&mut self, frame: Option<&KeypointFrame>) -> KeypointFrame {
        let Some(frame) = frame else {
            self.prev = None;
            return KeypointFrame::zeros();
        };

        let mut out = frame.clone();
        if let Some(prev) = &self.prev {
            let prev = prev.as_slice();
            let raw = frame.as_slice();
            let values = out.as_mut_slice();
            for block in BLOCKS {
                if !block_present(raw, block) || !block_present(prev, block) {
                    continue;
                }
                let (offset, width) = block;
                for k in offset..offset + width {
                    values[k] = self.alpha * raw[k] + (1.0 - self.alpha) * prev[k];
                }
            }
        }

        self.prev = Some(out.clone());
        out
    }

    pub fn reset(&mut self) {
        self.prev = None;
    }
}

/// Output-side EMA over the full class probability vector.
pub struct ProbabilitySmoother {
    alpha: f32,
    prev: Option<Vec<f32>>,
}

impl ProbabilitySmoother {
    pub fn new(alpha: f32) -> Self {
        Self { alpha, prev: None }
    }

    pub fn apply(&mut self, probabilities: &[f32]) -> Vec<f32> {
        let smoothed: Vec<f32> = match &self.prev {
            Some(prev) if prev.len() == probabilities.len() => probabilities
                .iter()
                .zip(prev)
                .map(|(raw, prev)| self.alpha * raw + (1.0 - self.alpha) * prev)
                .collect(),
            _ => probabilities.to_vec(),
        };
        self.prev = Some(smoothed.clone());
        smoothed
    }

    pub fn reset(&mut self) {
        self.prev = None;
    }
}

/// Fixed-capacity FIFO of smoothed frames.
pub struct SlidingWindow {
    capacity: usize,
    frames: VecDeque<KeypointFrame>,
}

impl SlidingWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            frames: VecDeque::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, frame: KeypointFrame) {
        if self.frames.len() >= self.capacity {
            self.frames.pop_front();
        }
        self.frames.push_back(frame);
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_full(&self) -> bool {
        self.frames.len() >= self.capacity
    }

    pub fn progress(&self) -> f32 {
        if self.capacity == 0 {
            return 1.0;
        }
        self.frames.len() as f32 / self.capacity as f32
    }

    /// Oldest-first copy that stays valid while the window keeps moving.
    pub fn snapshot(&self) -> WindowSnapshot {
        self.frames.iter().cloned().collect()
    }

    pub fn clear(&mut self) {
        self.frames.clear();
    }
}

/// Window insertion and the "classify now" decision, kept together so the
/// classifier only ever sees a fully inserted window.
pub struct TemporalBuffer {
    cfg: TemporalConfig,
    smoother: FeatureSmoother,
    window: SlidingWindow,
    inserted_since_full: usize,
    continuity_broken: bool,
}

impl TemporalBuffer {
    pub fn new(cfg: TemporalConfig) -> Self {
        Self {
            smoother: FeatureSmoother::new(cfg.input_alpha),
            window: SlidingWindow::new(cfg.capacity),
            inserted_since_full: 0,
            continuity_broken: false,
            cfg,
        }
    }

    /// Smooths and inserts one normalized frame (`None` for a frame without
    /// detections). Returns a snapshot when this insertion makes the window
    /// eligible for classification.
    pub fn push(&mut self, frame: Option<&KeypointFrame>) -> Option<WindowSnapshot> {
        if frame.is_none() {
            self.continuity_broken = true;
        }
        let smoothed = self.smoother.apply(frame);
        self.window.push(smoothed);

        if !self.window.is_full() {
            return None;
        }
        let eligible = self.inserted_since_full % self.cfg.stride.max(1) == 0;
        self.inserted_since_full += 1;
        eligible.then(|| self.window.snapshot())
    }

    /// Whether a no-detection frame was inserted since the last call.
    /// Taken when a window is handed to the classifier, so the flag
    /// describes that window rather than whatever arrived since.
    pub fn take_continuity_break(&mut self) -> bool {
        std::mem::take(&mut self.continuity_broken)
    }

    /// Puts back a flag taken for a window that was never classified.
    pub fn restore_continuity_break(&mut self, broken: bool) {
        self.continuity_broken |= broken;
    }

    pub fn progress(&self) -> f32 {
        self.window.progress()
    }

    pub fn window(&self) -> &SlidingWindow {
        &self.window
    }

    pub fn reset(&mut self) {
        self.smoother.reset();
        self.window.clear();
        self.inserted_since_full = 0;
        self.continuity_broken = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keypoints::test_support::sample_frame;

    fn approx_eq(a: f32, b: f32, eps: f32) -> bool {
        (a - b).abs() < eps
    }

    fn filled(value: f32) -> KeypointFrame {
        let mut f = KeypointFrame::zeros();
        f.as_mut_slice().iter_mut().for_each(|v| *v = value);
        f
    }

    #[test]
    fn first_frame_passes_through() {
        let mut s = FeatureSmoother::new(0.4);
        let frame = sample_frame();
        assert_eq!(s.apply(Some(&frame)), frame);
    }

    #[test]
    fn input_ema_weights_newest_frame() {
        let mut s = FeatureSmoother::new(0.4);
        s.apply(Some(&filled(1.0)));
        let out = s.apply(Some(&filled(2.0)));
        assert!(out.as_slice().iter().all(|v| approx_eq(*v, 1.4, 1e-6)));
        let out = s.apply(Some(&filled(2.0)));
        assert!(out.as_slice().iter().all(|v| approx_eq(*v, 1.64, 1e-6)));
    }

    #[test]
    fn missed_detection_resets_input_ema() {
        let mut s = FeatureSmoother::new(0.4);
        s.apply(Some(&filled(1.0)));
        let gap = s.apply(None);
        assert!(gap.is_empty());
        let resumed = s.apply(Some(&filled(5.0)));
        assert_eq!(resumed, filled(5.0));
    }

    #[test]
    fn reappearing_hand_is_not_blended_with_zeros() {
        let mut s = FeatureSmoother::new(0.4);
        let mut pose_only = filled(1.0);
        pose_only.as_mut_slice()[LEFT_HAND_OFFSET..].iter_mut().for_each(|v| *v = 0.0);
        s.apply(Some(&pose_only));

        let out = s.apply(Some(&filled(2.0)));
        assert!(approx_eq(out.as_slice()[0], 1.4, 1e-6));
        assert!(approx_eq(out.as_slice()[LEFT_HAND_OFFSET], 2.0, 1e-6));
        assert!(approx_eq(out.as_slice()[KEYPOINT_WIDTH - 1], 2.0, 1e-6));
    }

    #[test]
    fn output_ema_and_reset() {
        let mut p = ProbabilitySmoother::new(0.4);
        assert_eq!(p.apply(&[1.0, 0.0]), vec![1.0, 0.0]);
        let out = p.apply(&[0.0, 1.0]);
        assert!(approx_eq(out[0], 0.6, 1e-6));
        assert!(approx_eq(out[1], 0.4, 1e-6));
        p.reset();
        assert_eq!(p.apply(&[0.0, 1.0]), vec![0.0, 1.0]);
        // class count change restarts too
        assert_eq!(p.apply(&[0.5, 0.25, 0.25]), vec![0.5, 0.25, 0.25]);
    }

    #[test]
    fn window_is_fifo_and_bounded() {
        let mut w = SlidingWindow::new(3);
        for i in 0..5 {
            w.push(filled(i as f32));
        }
        assert_eq!(w.len(), 3);
        assert!(w.is_full());
        assert!(approx_eq(w.progress(), 1.0, 1e-6));
        let snap = w.snapshot();
        assert_eq!(snap[0], filled(2.0));
        assert_eq!(snap[2], filled(4.0));

        w.push(filled(9.0));
        assert_eq!(snap[0], filled(2.0));
    }

    #[test]
    fn progress_tracks_fill() {
        let mut buffer = TemporalBuffer::new(TemporalConfig::default());
        for _ in 0..15 {
            buffer.push(Some(&sample_frame()));
        }
        assert!(approx_eq(buffer.progress(), 0.5, 1e-6));
    }

    #[test]
    fn classification_is_strided_once_full() {
        let mut buffer = TemporalBuffer::new(TemporalConfig::default());
        let frame = sample_frame();
        let mut eligible = Vec::new();
        for i in 1..=36 {
            if buffer.push(Some(&frame)).is_some() {
                eligible.push(i);
            }
        }
        assert_eq!(eligible, vec![30, 32, 34, 36]);
    }

    #[test]
    fn snapshot_has_full_window() {
        let mut buffer = TemporalBuffer::new(TemporalConfig::default());
        let mut last = None;
        for _ in 0..30 {
            last = buffer.push(Some(&sample_frame()));
        }
        assert_eq!(last.unwrap().len(), WINDOW_CAPACITY);
    }

    #[test]
    fn gaps_are_inserted_and_reported() {
        let mut buffer = TemporalBuffer::new(TemporalConfig::default());
        buffer.push(Some(&sample_frame()));
        buffer.push(None);
        assert_eq!(buffer.window().len(), 2);
        assert!(buffer.take_continuity_break());
        assert!(!buffer.take_continuity_break());

        buffer.restore_continuity_break(true);
        buffer.restore_continuity_break(false);
        assert!(buffer.take_continuity_break());

        buffer.reset();
        assert!(buffer.window().is_empty());
    }
}
