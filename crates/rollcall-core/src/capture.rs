//! Capture gate: decides when the current frame may be captured for
//! identification, and maps the face box onto the captured frame.

use crate::config::AnalyzerConfig;
use crate::history::HistoryBuffers;
use crate::state::AnalyzerState;
use crate::types::{FaceBox, LivenessStatus};

/// All four conditions must hold: a face box is present, the committed status
/// is `LiveFace`, the live counter reached the required count, and the last
/// `boundary_window` boundary entries exist and are all compliant.
pub fn is_face_suitable_for_capture(
    faces: &[FaceBox],
    state: &AnalyzerState,
    history: &HistoryBuffers,
    config: &AnalyzerConfig,
) -> bool {
    !faces.is_empty()
        && state.committed == LivenessStatus::LiveFace
        && state.live_frames >= config.required_live_frames
        && history.boundary_window_compliant(config.boundary_window)
}

/// Pixel crop rectangle `(x, y, width, height)` within a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Scale a preview-space face box onto a `frame_width` × `frame_height`
/// frame and clamp it to the frame. `None` if nothing remains.
pub fn crop_rect(
    face: &FaceBox,
    preview_width: f32,
    preview_height: f32,
    frame_width: u32,
    frame_height: u32,
) -> Option<CropRect> {
    if preview_width <= 0.0 || preview_height <= 0.0 || frame_width == 0 || frame_height == 0 {
        return None;
    }
    let sx = frame_width as f32 / preview_width;
    let sy = frame_height as f32 / preview_height;

    let left = (face.left * sx).floor().clamp(0.0, frame_width as f32) as u32;
    let top = (face.top * sy).floor().clamp(0.0, frame_height as f32) as u32;
    let right = (face.right * sx).ceil().clamp(0.0, frame_width as f32) as u32;
    let bottom = (face.bottom * sy).ceil().clamp(0.0, frame_height as f32) as u32;

    if right <= left || bottom <= top {
        return None;
    }
    Some(CropRect {
        x: left,
        y: top,
        width: right - left,
        height: bottom - top,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Landmark, LandmarkFrame, PositionRecord};
    use std::sync::Arc;

    fn face() -> FaceBox {
        FaceBox {
            left: 100.0,
            top: 150.0,
            right: 380.0,
            bottom: 500.0,
        }
    }

    fn live_state(cfg: &AnalyzerConfig) -> AnalyzerState {
        AnalyzerState {
            committed: LivenessStatus::LiveFace,
            live_frames: cfg.required_live_frames,
            ..AnalyzerState::default()
        }
    }

    fn history(flags: &[bool], cfg: &AnalyzerConfig) -> HistoryBuffers {
        let mut h = HistoryBuffers::new(cfg);
        for &ok in flags {
            h.push_frame(
                LandmarkFrame {
                    landmarks: Arc::from(vec![Landmark::new(0.5, 0.5)]),
                    timestamp_ms: 0,
                    quality: 1.0,
                },
                PositionRecord {
                    score: 1.0,
                    center_x: 0.5,
                    center_y: 0.5,
                    face_ratio: 0.2,
                },
                ok,
            );
        }
        h
    }

    #[test]
    fn test_all_conditions_met() {
        let cfg = AnalyzerConfig::default();
        let h = history(&[true; 4], &cfg);
        assert!(is_face_suitable_for_capture(&[face()], &live_state(&cfg), &h, &cfg));
    }

    #[test]
    fn test_each_condition_required() {
        let cfg = AnalyzerConfig::default();
        let good = history(&[true; 4], &cfg);

        assert!(!is_face_suitable_for_capture(&[], &live_state(&cfg), &good, &cfg));

        let checking = AnalyzerState {
            committed: LivenessStatus::Checking,
            ..live_state(&cfg)
        };
        assert!(!is_face_suitable_for_capture(&[face()], &checking, &good, &cfg));

        let short = AnalyzerState {
            live_frames: cfg.required_live_frames - 1,
            ..live_state(&cfg)
        };
        assert!(!is_face_suitable_for_capture(&[face()], &short, &good, &cfg));

        let edge = history(&[true, true, false, true], &cfg);
        assert!(!is_face_suitable_for_capture(&[face()], &live_state(&cfg), &edge, &cfg));

        let too_few = history(&[true; 3], &cfg);
        assert!(!is_face_suitable_for_capture(&[face()], &live_state(&cfg), &too_few, &cfg));
    }

    #[test]
    fn test_crop_rect_scales_and_clamps() {
        // Preview 480x640, frame 960x1280: everything doubles.
        let rect = crop_rect(&face(), 480.0, 640.0, 960, 1280).unwrap();
        assert_eq!(
            rect,
            CropRect {
                x: 200,
                y: 300,
                width: 560,
                height: 700
            }
        );

        let hanging = FaceBox {
            left: -40.0,
            top: -10.0,
            right: 100.0,
            bottom: 90.0,
        };
        let rect = crop_rect(&hanging, 480.0, 640.0, 480, 640).unwrap();
        assert_eq!((rect.x, rect.y, rect.width, rect.height), (0, 0, 100, 90));
    }

    #[test]
    fn test_crop_rect_outside_frame() {
        let outside = FaceBox {
            left: 500.0,
            top: 10.0,
            right: 600.0,
            bottom: 90.0,
        };
        assert!(crop_rect(&outside, 480.0, 640.0, 480, 640).is_none());
        assert!(crop_rect(&face(), 0.0, 640.0, 480, 640).is_none());
    }
}
