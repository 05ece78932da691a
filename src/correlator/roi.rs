use anyhow::{Result, anyhow};
use image::{ImageBuffer, Rgba, imageops};

use crate::keypoints::{LEFT_SHOULDER, LEFT_WRIST, POSE_LANDMARKS, RIGHT_SHOULDER, RIGHT_WRIST};
use crate::types::{Frame, Landmark};

#[derive(Clone, Debug)]
pub struct RoiConfig {
    /// Crop side as a multiple of the previous shoulder width in pixels.
    pub scale: f32,
    pub min_side_px: f32,
    /// Upper bound on the crop side, as a fraction of the shorter image side.
    pub max_side_fraction: f32,
    /// Body landmarks at or below this visibility are not cached.
    pub visibility_threshold: f32,
}

impl Default for RoiConfig {
    fn default() -> Self {
        Self {
            scale: 1.5,
            min_side_px: 96.0,
            max_side_fraction: 1.0,
            visibility_threshold: 0.5,
        }
    }
}

/// Pixel rectangle dispatched to the hand detector in place of the full
/// image, plus what is needed to map results back.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CropRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    pub source_width: u32,
    pub source_height: u32,
}

impl CropRegion {
    /// Maps a landmark normalized to the crop into full-frame normalized
    /// coordinates. `z` shares the x scale.
    pub fn remap(&self, lm: &Landmark) -> Landmark {
        let sw = self.source_width.max(1) as f32;
        let sh = self.source_height.max(1) as f32;
        Landmark {
            x: (self.x as f32 + lm.x * self.width as f32) / sw,
            y: (self.y as f32 + lm.y * self.height as f32) / sh,
            z: lm.z * self.width as f32 / sw,
            visibility: lm.visibility,
        }
    }

    pub fn covers(&self, width: u32, height: u32) -> bool {
        self.x == 0 && self.y == 0 && self.width >= width && self.height >= height
    }
}

/// Body geometry remembered from the last pose result, in full-frame
/// normalized coordinates. Each entry is dropped as soon as a result reports
/// it with low visibility.
#[derive(Clone, Debug, Default)]
pub struct RoiCache {
    left_wrist: Option<(f32, f32)>,
    right_wrist: Option<(f32, f32)>,
    shoulder_px: Option<f32>,
}

impl RoiCache {
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub fn has_wrist(&self) -> bool {
        self.left_wrist.is_some() || self.right_wrist.is_some()
    }

    pub fn shoulder_px(&self) -> Option<f32> {
        self.shoulder_px
    }

    pub fn update(&mut self, landmarks: &[Landmark], width: u32, height: u32, threshold: f32) {
        if landmarks.len() < POSE_LANDMARKS {
            self.clear();
            return;
        }
        let visible = |lm: &Landmark| lm.visibility > threshold;

        let lw = &landmarks[LEFT_WRIST];
        let rw = &landmarks[RIGHT_WRIST];
        self.left_wrist = visible(lw).then_some((lw.x, lw.y));
        self.right_wrist = visible(rw).then_some((rw.x, rw.y));

        let ls = &landmarks[LEFT_SHOULDER];
        let rs = &landmarks[RIGHT_SHOULDER];
        self.shoulder_px = if visible(ls) && visible(rs) {
            let dx = (ls.x - rs.x) * width as f32;
            let dy = (ls.y - rs.y) * height as f32;
            Some((dx * dx + dy * dy).sqrt())
        } else {
            None
        };
    }

    /// Unified box around the cached wrist(s), or `None` when the hand
    /// detector should run on the full image.
    pub fn region(&self, width: u32, height: u32, cfg: &RoiConfig) -> Option<CropRegion> {
        let shoulder_px = self.shoulder_px?;
        let wrists: Vec<(f32, f32)> = [self.left_wrist, self.right_wrist]
            .into_iter()
            .flatten()
            .collect();
        if wrists.is_empty() || width == 0 || height == 0 {
            return None;
        }

        let (fw, fh) = (width as f32, height as f32);
        let max_side = (cfg.max_side_fraction * fw.min(fh)).max(cfg.min_side_px);
        let half = (cfg.scale * shoulder_px).clamp(cfg.min_side_px, max_side) / 2.0;

        let mut x0 = f32::MAX;
        let mut y0 = f32::MAX;
        let mut x1 = f32::MIN;
        let mut y1 = f32::MIN;
        for (wx, wy) in wrists {
            let (px, py) = (wx * fw, wy * fh);
            x0 = x0.min(px - half);
            y0 = y0.min(py - half);
            x1 = x1.max(px + half);
            y1 = y1.max(py + half);
        }

        let x0 = x0.floor().clamp(0.0, fw);
        let y0 = y0.floor().clamp(0.0, fh);
        let x1 = x1.ceil().clamp(0.0, fw);
        let y1 = y1.ceil().clamp(0.0, fh);
        if x1 - x0 < 1.0 || y1 - y0 < 1.0 {
            return None;
        }

        let region = CropRegion {
            x: x0 as u32,
            y: y0 as u32,
            width: (x1 - x0) as u32,
            height: (y1 - y0) as u32,
            source_width: width,
            source_height: height,
        };
        if region.covers(width, height) {
            return None;
        }
        Some(region)
    }
}

pub fn crop_frame(frame: &Frame, region: &CropRegion) -> Result<Frame> {
    let expected_len = (frame.width as usize)
        .saturating_mul(frame.height as usize)
        .saturating_mul(4);
    if frame.rgba.len() != expected_len {
        return Err(anyhow!(
            "frame buffer size mismatch: got {}, expected {}",
            frame.rgba.len(),
            expected_len
        ));
    }
    let view: Option<ImageBuffer<Rgba<u8>, Vec<u8>>> =
        ImageBuffer::from_raw(frame.width, frame.height, frame.rgba.clone());
    let image = view.ok_or_else(|| anyhow!("failed to build RGBA image from frame"))?;
    let cropped = imageops::crop_imm(&image, region.x, region.y, region.width, region.height)
        .to_image();

    Ok(Frame {
        width: cropped.width(),
        height: cropped.height(),
        rgba: cropped.into_raw(),
        timestamp: frame.timestamp,
        mirrored: frame.mirrored,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pose_with(wrists: [(f32, f32, f32); 2], shoulders: [(f32, f32, f32); 2]) -> Vec<Landmark> {
        let mut pose = vec![Landmark::new(0.5, 0.5, 0.0, 0.9); POSE_LANDMARKS];
        let [(lx, ly, lv), (rx, ry, rv)] = wrists;
        pose[LEFT_WRIST] = Landmark::new(lx, ly, 0.0, lv);
        pose[RIGHT_WRIST] = Landmark::new(rx, ry, 0.0, rv);
        let [(sx, sy, sv), (tx, ty, tv)] = shoulders;
        pose[LEFT_SHOULDER] = Landmark::new(sx, sy, 0.0, sv);
        pose[RIGHT_SHOULDER] = Landmark::new(tx, ty, 0.0, tv);
        pose
    }

    #[test]
    fn cold_cache_uses_full_frame() {
        let cache = RoiCache::default();
        assert!(cache.region(640, 480, &RoiConfig::default()).is_none());
    }

    #[test]
    fn region_is_sized_from_shoulder_width() {
        let mut cache = RoiCache::default();
        let pose = pose_with(
            [(0.5, 0.5, 0.9), (0.5, 0.5, 0.2)],
            [(0.75, 0.25, 0.9), (0.25, 0.25, 0.9)],
        );
        cache.update(&pose, 400, 400, 0.5);
        assert_eq!(cache.shoulder_px(), Some(200.0));

        let region = cache.region(400, 400, &RoiConfig::default()).unwrap();
        // 1.5 x 200px centered on the visible wrist at (200, 200)
        assert_eq!(region.x, 50);
        assert_eq!(region.y, 50);
        assert_eq!(region.width, 300);
        assert_eq!(region.height, 300);
    }

    #[test]
    fn region_unions_both_wrists_and_clamps_to_image() {
        let mut cache = RoiCache::default();
        let pose = pose_with(
            [(0.125, 0.5, 0.9), (0.5, 0.5, 0.9)],
            [(0.75, 0.25, 0.9), (0.25, 0.25, 0.9)],
        );
        cache.update(&pose, 400, 400, 0.5);
        let region = cache.region(400, 400, &RoiConfig::default()).unwrap();
        assert_eq!(region.x, 0);
        assert_eq!(region.width, 350);
        assert_eq!(region.y, 50);
        assert_eq!(region.height, 300);
    }

    #[test]
    fn low_visibility_invalidates_entries() {
        let mut cache = RoiCache::default();
        let good = pose_with(
            [(0.5, 0.5, 0.9), (0.5, 0.5, 0.9)],
            [(0.6, 0.3, 0.9), (0.4, 0.3, 0.9)],
        );
        cache.update(&good, 640, 480, 0.5);
        assert!(cache.has_wrist());

        let hidden = pose_with(
            [(0.5, 0.5, 0.5), (0.5, 0.5, 0.1)],
            [(0.6, 0.3, 0.9), (0.4, 0.3, 0.9)],
        );
        cache.update(&hidden, 640, 480, 0.5);
        assert!(!cache.has_wrist());
        assert!(cache.region(640, 480, &RoiConfig::default()).is_none());
    }

    #[test]
    fn minimum_side_is_enforced() {
        let mut cache = RoiCache::default();
        let pose = pose_with(
            [(0.5, 0.5, 0.9), (0.5, 0.5, 0.0)],
            [(0.51, 0.3, 0.9), (0.49, 0.3, 0.9)],
        );
        cache.update(&pose, 1000, 1000, 0.5);
        let region = cache.region(1000, 1000, &RoiConfig::default()).unwrap();
        assert_eq!(region.width, 96);
        assert_eq!(region.height, 96);
    }

    #[test]
    fn remap_maps_crop_space_to_frame_space() {
        let region = CropRegion {
            x: 100,
            y: 50,
            width: 200,
            height: 100,
            source_width: 400,
            source_height: 200,
        };
        let lm = region.remap(&Landmark::new(0.5, 0.5, 0.2, 0.0));
        assert!((lm.x - 0.5).abs() < 1e-6);
        assert!((lm.y - 0.5).abs() < 1e-6);
        assert!((lm.z - 0.1).abs() < 1e-6);
    }

    #[test]
    fn crop_frame_copies_the_region() {
        let (w, h) = (4u32, 3u32);
        let rgba: Vec<u8> = (0..w * h)
            .flat_map(|i| [i as u8, 0, 0, 255])
            .collect();
        let frame = Frame::new(rgba, w, h, 7);
        let region = CropRegion {
            x: 1,
            y: 1,
            width: 2,
            height: 2,
            source_width: w,
            source_height: h,
        };
        let cropped = crop_frame(&frame, &region).unwrap();
        assert_eq!((cropped.width, cropped.height), (2, 2));
        assert_eq!(cropped.timestamp, 7);
        let reds: Vec<u8> = cropped.rgba.chunks(4).map(|px| px[0]).collect();
        assert_eq!(reds, vec![5, 6, 9, 10]);
    }

    #[test]
    fn crop_frame_rejects_bad_buffer() {
        let frame = Frame::new(vec![0; 10], 4, 4, 0);
        let region = CropRegion {
            x: 0,
            y: 0,
            width: 2,
            height: 2,
            source_width: 4,
            source_height: 4,
        };
        assert!(crop_frame(&frame, &region).is_err());
    }
}
