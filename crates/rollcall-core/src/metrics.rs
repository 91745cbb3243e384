//! Per-frame face metrics from landmark geometry.
//!
//! Everything here is a pure function of the landmark set, the detector's
//! input image size and the preview size: no state, no clock.

use crate::config::AnalyzerConfig;
use crate::types::{BoundaryResult, FrameMetrics, Landmark, PositionRecord};

/// Comparisons against the margined preview tolerate this much float error (px).
const BOUNDARY_EPSILON: f32 = 1e-3;

/// Centroid distance above which the quality score is penalized.
const QUALITY_CENTER_DISTANCE: f32 = 0.4;

/// Normalized bounding rect and centroid of a landmark set.
#[derive(Debug, Clone, Copy)]
struct FaceGeometry {
    min_x: f32,
    min_y: f32,
    max_x: f32,
    max_y: f32,
    center_x: f32,
    center_y: f32,
}

impl FaceGeometry {
    fn from_landmarks(landmarks: &[Landmark]) -> Option<Self> {
        let first = landmarks.first()?;
        let mut g = FaceGeometry {
            min_x: first.x,
            min_y: first.y,
            max_x: first.x,
            max_y: first.y,
            center_x: 0.0,
            center_y: 0.0,
        };
        let (mut sum_x, mut sum_y) = (0.0f32, 0.0f32);
        for lm in landmarks {
            g.min_x = g.min_x.min(lm.x);
            g.min_y = g.min_y.min(lm.y);
            g.max_x = g.max_x.max(lm.x);
            g.max_y = g.max_y.max(lm.y);
            sum_x += lm.x;
            sum_y += lm.y;
        }
        g.center_x = sum_x / landmarks.len() as f32;
        g.center_y = sum_y / landmarks.len() as f32;
        Some(g)
    }

    /// Face area over image area, measured in detector input pixels.
    fn area_ratio(&self, image_width: u32, image_height: u32) -> Option<f32> {
        if image_width == 0 || image_height == 0 {
            return None;
        }
        let (w, h) = (image_width as f32, image_height as f32);
        let face_area = (self.max_x - self.min_x) * w * (self.max_y - self.min_y) * h;
        Some(face_area / (w * h))
    }

    fn center_distance(&self) -> f32 {
        let dx = self.center_x - 0.5;
        let dy = self.center_y - 0.5;
        (dx * dx + dy * dy).sqrt()
    }
}

/// Image-quality proxy in [0,1] from face size and centering.
pub fn quality_score(landmarks: &[Landmark], image_width: u32, image_height: u32) -> f32 {
    let Some(geometry) = FaceGeometry::from_landmarks(landmarks) else {
        return 0.0;
    };
    let Some(ratio) = geometry.area_ratio(image_width, image_height) else {
        return 0.0;
    };

    let mut score = 1.0f32;
    if ratio < 0.03 {
        score *= 0.4;
    } else if ratio < 0.06 {
        score *= 0.7;
    } else if ratio > 0.8 {
        score *= 0.6;
    } else if ratio > 0.6 {
        score *= 0.8;
    }

    if geometry.center_distance() > QUALITY_CENTER_DISTANCE {
        score *= 0.8;
    }

    score.clamp(0.0, 1.0)
}

/// Position score in [0,1] with the geometry it was computed from.
pub fn position_score(
    landmarks: &[Landmark],
    image_width: u32,
    image_height: u32,
    config: &AnalyzerConfig,
) -> PositionRecord {
    let Some(geometry) = FaceGeometry::from_landmarks(landmarks) else {
        return PositionRecord {
            score: 0.0,
            center_x: 0.0,
            center_y: 0.0,
            face_ratio: 0.0,
        };
    };
    let ratio = geometry.area_ratio(image_width, image_height).unwrap_or(0.0);

    let mut score = 1.0f32;
    if ratio < config.min_face_ratio {
        score *= 0.3;
    } else if ratio > config.max_face_ratio {
        score *= 0.4;
    } else if ratio < config.min_face_ratio * 1.5 {
        score *= 0.7;
    }

    if geometry.center_distance() > config.center_tolerance {
        score *= 0.7;
    }

    PositionRecord {
        score: score.clamp(0.0, 1.0),
        center_x: geometry.center_x,
        center_y: geometry.center_y,
        face_ratio: ratio,
    }
}

/// Project landmarks into preview pixels and test the padded face rect.
pub fn check_boundary(landmarks: &[Landmark], config: &AnalyzerConfig) -> BoundaryResult {
    let Some(geometry) = FaceGeometry::from_landmarks(landmarks) else {
        return BoundaryResult::outside();
    };
    check_boundary_rect(
        geometry.min_x * config.preview_width,
        geometry.min_y * config.preview_height,
        geometry.max_x * config.preview_width,
        geometry.max_y * config.preview_height,
        config,
    )
}

/// Boundary test for an unpadded face rect already in preview pixels.
pub fn check_boundary_rect(
    min_x: f32,
    min_y: f32,
    max_x: f32,
    max_y: f32,
    config: &AnalyzerConfig,
) -> BoundaryResult {
    let (pw, ph) = (config.preview_width, config.preview_height);
    if pw <= 0.0 || ph <= 0.0 {
        return BoundaryResult::outside();
    }

    let pad_x = (max_x - min_x) * config.horizontal_padding;
    let pad_y = (max_y - min_y) * config.vertical_padding;
    let (left, top) = (min_x - pad_x, min_y - pad_y);
    let (right, bottom) = (max_x + pad_x, max_y + pad_y);

    let margin = pw.min(ph) * config.boundary_margin_ratio;
    let is_completely_in_frame = left >= margin - BOUNDARY_EPSILON
        && top >= margin - BOUNDARY_EPSILON
        && right <= pw - margin + BOUNDARY_EPSILON
        && bottom <= ph - margin + BOUNDARY_EPSILON;

    let padded_area = (right - left) * (bottom - top);
    let visible_w = (right.min(pw) - left.max(0.0)).max(0.0);
    let visible_h = (bottom.min(ph) - top.max(0.0)).max(0.0);
    let visibility_ratio = if padded_area > 0.0 {
        (visible_w * visible_h / padded_area).clamp(0.0, 1.0)
    } else {
        0.0
    };

    BoundaryResult {
        min_x: left,
        min_y: top,
        max_x: right,
        max_y: bottom,
        is_completely_in_frame,
        visibility_ratio,
    }
}

/// All metrics for one frame.
pub fn extract(
    landmarks: &[Landmark],
    image_width: u32,
    image_height: u32,
    config: &AnalyzerConfig,
) -> (FrameMetrics, PositionRecord) {
    let position = position_score(landmarks, image_width, image_height, config);
    let metrics = FrameMetrics {
        quality: quality_score(landmarks, image_width, image_height),
        position: position.score,
        boundary: check_boundary(landmarks, config),
    };
    (metrics, position)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Landmarks on the corners and center of a normalized rect.
    fn rect_landmarks(min_x: f32, min_y: f32, max_x: f32, max_y: f32) -> Vec<Landmark> {
        vec![
            Landmark::new(min_x, min_y),
            Landmark::new(max_x, min_y),
            Landmark::new((min_x + max_x) / 2.0, (min_y + max_y) / 2.0),
            Landmark::new(min_x, max_y),
            Landmark::new(max_x, max_y),
        ]
    }

    #[test]
    fn test_centered_face_scores_full() {
        let cfg = AnalyzerConfig::default();
        let lm = rect_landmarks(0.3, 0.3, 0.7, 0.7);
        let (metrics, position) = extract(&lm, 480, 640, &cfg);
        assert_eq!(metrics.quality, 1.0);
        assert_eq!(metrics.position, 1.0);
        assert!((position.face_ratio - 0.16).abs() < 1e-4);
        assert!(metrics.boundary.is_compliant(cfg.completeness_threshold));
    }

    #[test]
    fn test_quality_area_bands() {
        // 0.1 x 0.1 = 0.01 → ×0.4
        let tiny = rect_landmarks(0.45, 0.45, 0.55, 0.55);
        assert!((quality_score(&tiny, 100, 100) - 0.4).abs() < 1e-6);
        // 0.2 x 0.2 = 0.04 → ×0.7
        let small = rect_landmarks(0.4, 0.4, 0.6, 0.6);
        assert!((quality_score(&small, 100, 100) - 0.7).abs() < 1e-6);
        // 0.8 x 0.8 = 0.64 → ×0.8
        let large = rect_landmarks(0.1, 0.1, 0.9, 0.9);
        assert!((quality_score(&large, 100, 100) - 0.8).abs() < 1e-6);
        // 0.95 x 0.95 > 0.8 → ×0.6
        let huge = rect_landmarks(0.025, 0.025, 0.975, 0.975);
        assert!((quality_score(&huge, 100, 100) - 0.6).abs() < 1e-6);
    }

    #[test]
    fn test_quality_off_center_penalty() {
        // Centroid at (0.85, 0.85): distance ≈ 0.495 > 0.4
        let lm = rect_landmarks(0.7, 0.7, 1.0, 1.0);
        let q = quality_score(&lm, 100, 100);
        assert!((q - 0.8).abs() < 1e-6, "got {q}");
    }

    #[test]
    fn test_position_bands() {
        let cfg = AnalyzerConfig::default();
        let too_small = rect_landmarks(0.45, 0.45, 0.55, 0.55);
        assert!((position_score(&too_small, 100, 100, &cfg).score - 0.3).abs() < 1e-6);
        let too_large = rect_landmarks(0.05, 0.05, 0.95, 0.95);
        assert!((position_score(&too_large, 100, 100, &cfg).score - 0.4).abs() < 1e-6);
        // 0.26 x 0.26 ≈ 0.0676: between min and 1.5 × min
        let borderline = rect_landmarks(0.37, 0.37, 0.63, 0.63);
        assert!((position_score(&borderline, 100, 100, &cfg).score - 0.7).abs() < 1e-6);
        let off_center = rect_landmarks(0.6, 0.6, 1.0, 1.0);
        assert!((position_score(&off_center, 100, 100, &cfg).score - 0.7).abs() < 1e-6);
    }

    #[test]
    fn test_empty_and_degenerate_inputs() {
        let cfg = AnalyzerConfig::default();
        assert_eq!(quality_score(&[], 100, 100), 0.0);
        let lm = rect_landmarks(0.3, 0.3, 0.7, 0.7);
        assert_eq!(quality_score(&lm, 0, 100), 0.0);
        let boundary = check_boundary(&[], &cfg);
        assert!(!boundary.is_completely_in_frame);
        assert_eq!(boundary.visibility_ratio, 0.0);
    }

    #[test]
    fn test_scores_in_range_and_deterministic() {
        let cfg = AnalyzerConfig::default();
        // Simple LCG so the sweep is reproducible without extra crates.
        let mut seed = 0x2545_f491u32;
        let mut next = || {
            seed = seed.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
            (seed >> 8) as f32 / (1u32 << 24) as f32 * 1.4 - 0.2
        };
        for _ in 0..200 {
            let lm: Vec<Landmark> = (0..12).map(|_| Landmark::new(next(), next())).collect();
            let (a, pa) = extract(&lm, 640, 480, &cfg);
            let (b, pb) = extract(&lm, 640, 480, &cfg);
            assert_eq!(a, b);
            assert_eq!(pa, pb);
            for v in [a.quality, a.position, a.boundary.visibility_ratio] {
                assert!((0.0..=1.0).contains(&v), "score out of range: {v}");
            }
        }
    }

    #[test]
    fn test_boundary_touching_margin_is_compliant() {
        // Preview 1000x800 → margin 40. A 400x320 rect at (100, 104) pads by
        // 60 / 64 so the padded rect starts exactly at (40, 40).
        let cfg = AnalyzerConfig {
            preview_width: 1000.0,
            preview_height: 800.0,
            ..AnalyzerConfig::default()
        };
        let touching = check_boundary_rect(100.0, 104.0, 500.0, 424.0, &cfg);
        assert!((touching.min_x - 40.0).abs() < 1e-3);
        assert!((touching.min_y - 40.0).abs() < 1e-3);
        assert!(touching.is_completely_in_frame);
        assert_eq!(touching.visibility_ratio, 1.0);

        let left_out = check_boundary_rect(99.0, 104.0, 500.0, 424.0, &cfg);
        assert!(!left_out.is_completely_in_frame);
        let top_out = check_boundary_rect(100.0, 103.0, 500.0, 424.0, &cfg);
        assert!(!top_out.is_completely_in_frame);
    }

    #[test]
    fn test_boundary_touching_far_edges() {
        // Padded right edge at 960 and bottom edge at 760.
        let cfg = AnalyzerConfig {
            preview_width: 1000.0,
            preview_height: 800.0,
            ..AnalyzerConfig::default()
        };
        let touching = check_boundary_rect(500.0, 400.0, 900.0, 700.0, &cfg);
        assert!((touching.max_x - 960.0).abs() < 1e-3);
        assert!((touching.max_y - 760.0).abs() < 1e-3);
        assert!(touching.is_completely_in_frame);

        let right_out = check_boundary_rect(500.0, 400.0, 901.0, 700.0, &cfg);
        assert!(!right_out.is_completely_in_frame);
        let bottom_out = check_boundary_rect(500.0, 400.0, 900.0, 701.0, &cfg);
        assert!(!bottom_out.is_completely_in_frame);
    }

    #[test]
    fn test_visibility_ratio_partial() {
        let cfg = AnalyzerConfig {
            preview_width: 100.0,
            preview_height: 100.0,
            horizontal_padding: 0.0,
            vertical_padding: 0.0,
            ..AnalyzerConfig::default()
        };
        // Half of the rect hangs off the left edge.
        let b = check_boundary_rect(-20.0, 40.0, 20.0, 60.0, &cfg);
        assert!(!b.is_completely_in_frame);
        assert!((b.visibility_ratio - 0.5).abs() < 1e-6);
    }
}
