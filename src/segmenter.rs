//! Turns the per-window (class, confidence) stream into committed signs.
//!
//! A candidate must repeat before it is shown as confident and repeat longer
//! (or stay very confident) before it is committed. After a commit the label
//! stays latched until enough idle input has been seen, so a held sign is
//! emitted once.

#[derive(Clone, Debug)]
pub struct SegmenterConfig {
    pub confidence_floor: f32,
    pub high_confidence_floor: f32,
    pub min_onset: u32,
    pub min_hold: u32,
    pub fast_commit: u32,
    pub debounce: u32,
    pub idle_clear: u32,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            confidence_floor: 0.5,
            high_confidence_floor: 0.85,
            min_onset: 2,
            min_hold: 3,
            fast_commit: 2,
            debounce: 3,
            idle_clear: 5,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SegmentState {
    Idle,
    Tracking,
    Debouncing,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum SegmentEvent {
    /// Idle/background or low-confidence input.
    Idle,
    /// Inside the post-commit quiet period.
    Cooldown,
    Update {
        class: usize,
        confidence: f32,
        confident: bool,
    },
    Commit {
        class: usize,
        confidence: f32,
    },
}

pub struct SignSegmenter {
    cfg: SegmenterConfig,
    idle_class: Option<usize>,
    state: SegmentState,
    tracked: Option<usize>,
    run: u32,
    high_run: u32,
    countdown: u32,
    last_emitted: Option<usize>,
    idle_run: u32,
}

impl SignSegmenter {
    pub fn new(cfg: SegmenterConfig, idle_class: Option<usize>) -> Self {
        Self {
            cfg,
            idle_class,
            state: SegmentState::Idle,
            tracked: None,
            run: 0,
            high_run: 0,
            countdown: 0,
            last_emitted: None,
            idle_run: 0,
        }
    }

    pub fn state(&self) -> SegmentState {
        self.state
    }

    pub fn last_emitted(&self) -> Option<usize> {
        self.last_emitted
    }

    pub fn reset(&mut self) {
        self.state = SegmentState::Idle;
        self.clear_track();
        self.countdown = 0;
        self.last_emitted = None;
        self.idle_run = 0;
    }

    fn clear_track(&mut self) {
        self.tracked = None;
        self.run = 0;
        self.high_run = 0;
    }

    fn start_track(&mut self, class: usize, confidence: f32) {
        self.tracked = Some(class);
        self.run = 1;
        self.high_run = u32::from(confidence >= self.cfg.high_confidence_floor);
    }

    fn is_idle_input(&self, class: usize, confidence: f32) -> bool {
        Some(class) == self.idle_class || confidence < self.cfg.confidence_floor
    }

    /// Idle input counts toward releasing the latch in every state,
    /// including the post-commit quiet period.
    fn count_idle(&mut self) {
        self.idle_run = self.idle_run.saturating_add(1);
        if self.idle_run >= self.cfg.idle_clear && self.last_emitted.take().is_some() {
            log::debug!("idle for {} samples, releasing latched sign", self.idle_run);
        }
    }

    pub fn process(&mut self, class: usize, confidence: f32) -> SegmentEvent {
        if self.state == SegmentState::Debouncing {
            if self.is_idle_input(class, confidence) {
                self.count_idle();
            }
            self.countdown = self.countdown.saturating_sub(1);
            if self.countdown == 0 {
                self.state = SegmentState::Idle;
                self.clear_track();
            }
            return SegmentEvent::Cooldown;
        }

        if self.is_idle_input(class, confidence) {
            self.count_idle();
            self.state = SegmentState::Idle;
            self.clear_track();
            return SegmentEvent::Idle;
        }
        self.idle_run = 0;

        if Some(class) == self.last_emitted {
            return SegmentEvent::Update {
                class,
                confidence,
                confident: true,
            };
        }

        if self.tracked != Some(class) {
            if self.state == SegmentState::Tracking {
                log::debug!("candidate {:?} replaced by {class} before commit", self.tracked);
            }
            self.state = SegmentState::Idle;
            self.start_track(class, confidence);
            return SegmentEvent::Update {
                class,
                confidence,
                confident: false,
            };
        }

        self.run += 1;
        if confidence >= self.cfg.high_confidence_floor {
            self.high_run += 1;
        } else {
            self.high_run = 0;
        }

        if self.state == SegmentState::Idle && self.run >= self.cfg.min_onset {
            self.state = SegmentState::Tracking;
        }

        if self.state == SegmentState::Tracking
            && (self.run >= self.cfg.min_hold || self.high_run >= self.cfg.fast_commit)
        {
            self.last_emitted = Some(class);
            self.state = SegmentState::Debouncing;
            self.countdown = self.cfg.debounce;
            self.clear_track();
            if self.countdown == 0 {
                self.state = SegmentState::Idle;
            }
            return SegmentEvent::Commit { class, confidence };
        }

        SegmentEvent::Update {
            class,
            confidence,
            confident: self.run >= self.cfg.min_onset,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const IDLE: usize = 0;
    const HELLO: usize = 7;
    const THANKS: usize = 9;

    fn segmenter() -> SignSegmenter {
        SignSegmenter::new(SegmenterConfig::default(), Some(IDLE))
    }

    fn commits(events: &[SegmentEvent]) -> Vec<usize> {
        events
            .iter()
            .filter_map(|e| match e {
                SegmentEvent::Commit { class, .. } => Some(*class),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn min_hold_run_emits_once() {
        let mut s = segmenter();
        let events: Vec<_> = (0..3).map(|_| s.process(HELLO, 0.7)).collect();
        assert_eq!(
            events[1],
            SegmentEvent::Update {
                class: HELLO,
                confidence: 0.7,
                confident: true
            }
        );
        assert_eq!(commits(&events), vec![HELLO]);
        assert_eq!(s.state(), SegmentState::Debouncing);

        // holding the sign never re-emits
        let held: Vec<_> = (0..20).map(|_| s.process(HELLO, 0.7)).collect();
        assert!(commits(&held).is_empty());
        assert_eq!(
            held.last(),
            Some(&SegmentEvent::Update {
                class: HELLO,
                confidence: 0.7,
                confident: true
            })
        );
    }

    #[test]
    fn latch_releases_after_idle_clear() {
        let mut s = segmenter();
        for _ in 0..3 {
            s.process(HELLO, 0.7);
        }
        for _ in 0..3 {
            assert_eq!(s.process(HELLO, 0.7), SegmentEvent::Cooldown);
        }
        assert_eq!(s.state(), SegmentState::Idle);

        for _ in 0..4 {
            s.process(IDLE, 0.9);
        }
        assert_eq!(s.last_emitted(), Some(HELLO));
        let blocked: Vec<_> = (0..3).map(|_| s.process(HELLO, 0.7)).collect();
        assert!(commits(&blocked).is_empty());

        for _ in 0..5 {
            s.process(IDLE, 0.9);
        }
        assert_eq!(s.last_emitted(), None);
        let again: Vec<_> = (0..3).map(|_| s.process(HELLO, 0.7)).collect();
        assert_eq!(commits(&again), vec![HELLO]);
    }

    #[test]
    fn idle_during_cooldown_counts_toward_release() {
        let mut s = segmenter();
        for _ in 0..3 {
            s.process(HELLO, 0.7);
        }
        assert_eq!(s.state(), SegmentState::Debouncing);

        let idle: Vec<_> = (0..5).map(|_| s.process(IDLE, 0.9)).collect();
        assert_eq!(&idle[..3], &[SegmentEvent::Cooldown; 3]);
        assert_eq!(&idle[3..], &[SegmentEvent::Idle; 2]);
        assert_eq!(s.last_emitted(), None);

        let again: Vec<_> = (0..3).map(|_| s.process(HELLO, 0.7)).collect();
        assert_eq!(commits(&again), vec![HELLO]);
    }

    #[test]
    fn content_during_cooldown_is_ignored() {
        let mut s = segmenter();
        for _ in 0..3 {
            s.process(HELLO, 0.7);
        }
        for _ in 0..3 {
            assert_eq!(s.process(THANKS, 0.95), SegmentEvent::Cooldown);
        }
        assert_eq!(s.state(), SegmentState::Idle);
        assert_eq!(s.last_emitted(), Some(HELLO));
    }

    #[test]
    fn single_onset_then_idle_never_emits() {
        let mut s = segmenter();
        let mut events = vec![s.process(HELLO, 0.7)];
        for _ in 0..10 {
            events.push(s.process(IDLE, 0.9));
        }
        events.push(s.process(HELLO, 0.7));
        events.push(s.process(IDLE, 0.9));
        assert!(commits(&events).is_empty());
    }

    #[test]
    fn fast_commit_beats_min_hold() {
        let mut s = segmenter();
        assert!(matches!(s.process(HELLO, 0.95), SegmentEvent::Update { .. }));
        assert_eq!(
            s.process(HELLO, 0.9),
            SegmentEvent::Commit {
                class: HELLO,
                confidence: 0.9
            }
        );
    }

    #[test]
    fn broken_high_confidence_run_waits_for_min_hold() {
        let mut s = segmenter();
        s.process(HELLO, 0.95);
        assert!(matches!(s.process(HELLO, 0.6), SegmentEvent::Update { .. }));
        assert_eq!(s.state(), SegmentState::Tracking);
        assert!(matches!(s.process(HELLO, 0.95), SegmentEvent::Commit { .. }));
    }

    #[test]
    fn label_change_restarts_tracking() {
        let mut s = segmenter();
        s.process(HELLO, 0.7);
        s.process(HELLO, 0.7);
        assert_eq!(s.state(), SegmentState::Tracking);
        assert_eq!(
            s.process(THANKS, 0.7),
            SegmentEvent::Update {
                class: THANKS,
                confidence: 0.7,
                confident: false
            }
        );
        assert_eq!(s.state(), SegmentState::Idle);
        let events: Vec<_> = (0..2).map(|_| s.process(THANKS, 0.7)).collect();
        assert_eq!(commits(&events), vec![THANKS]);
    }

    #[test]
    fn low_confidence_counts_as_idle() {
        let mut s = segmenter();
        s.process(HELLO, 0.7);
        assert_eq!(s.process(HELLO, 0.3), SegmentEvent::Idle);
        assert_eq!(s.state(), SegmentState::Idle);
        let events: Vec<_> = (0..2).map(|_| s.process(HELLO, 0.7)).collect();
        assert!(commits(&events).is_empty());
    }

    #[test]
    fn different_sign_can_follow_without_idle() {
        let mut s = segmenter();
        for _ in 0..3 {
            s.process(HELLO, 0.7);
        }
        for _ in 0..3 {
            s.process(HELLO, 0.7);
        }
        let events: Vec<_> = (0..3).map(|_| s.process(THANKS, 0.7)).collect();
        assert_eq!(commits(&events), vec![THANKS]);
        assert_eq!(s.last_emitted(), Some(THANKS));
    }

    #[test]
    fn reset_unlocks_and_clears() {
        let mut s = segmenter();
        for _ in 0..3 {
            s.process(HELLO, 0.7);
        }
        s.reset();
        assert_eq!(s.state(), SegmentState::Idle);
        assert_eq!(s.last_emitted(), None);
        let events: Vec<_> = (0..3).map(|_| s.process(HELLO, 0.7)).collect();
        assert_eq!(commits(&events), vec![HELLO]);
    }
}
