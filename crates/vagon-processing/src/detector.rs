use std::sync::Arc;

use image::imageops::{self, FilterType};
use image::{DynamicImage, RgbImage};
use vagon_core::models::{DetectionEvent, DetectionMode, DetectorSettings};

use crate::frames::Frame;
use crate::recognizer::{DetectionError, NumberRecognizer, RawDetection};

const MIN_BOX_AREA: f32 = 100.0;
const MIN_ASPECT_RATIO: f32 = 0.3;
const MAX_ASPECT_RATIO: f32 = 3.0;
/// Candidates at or above this confidence are never dropped as noise
const NOISE_FLOOR: f32 = 0.3;
const NMS_IOU: f32 = 0.5;
const UPSCALE_FACTOR: f32 = 1.5;

/// One preprocessed view of a frame sent to the recognizer.
struct Pass {
    name: &'static str,
    image: RgbImage,
    /// Factor applied to the frame; boxes are divided by it afterwards
    scale: f32,
}

fn equalized(image: &RgbImage) -> RgbImage {
    let gray = imageops::grayscale(image);
    let eq = imageproc::contrast::equalize_histogram(&gray);
    DynamicImage::ImageLuma8(eq).to_rgb8()
}

fn build_passes(image: &RgbImage, mode: DetectionMode) -> Vec<Pass> {
    let mut passes = vec![Pass {
        name: "original",
        image: image.clone(),
        scale: 1.0,
    }];

    if matches!(mode, DetectionMode::Enhanced | DetectionMode::Aggressive) {
        passes.push(Pass {
            name: "equalized",
            image: equalized(image),
            scale: 1.0,
        });
    }

    if mode == DetectionMode::Aggressive {
        passes.push(Pass {
            name: "sharpened",
            image: imageops::unsharpen(image, 1.5, 4),
            scale: 1.0,
        });
        let width = (image.width() as f32 * UPSCALE_FACTOR).round() as u32;
        let height = (image.height() as f32 * UPSCALE_FACTOR).round() as u32;
        passes.push(Pass {
            name: "upscaled",
            image: imageops::resize(image, width.max(1), height.max(1), FilterType::CatmullRom),
            scale: UPSCALE_FACTOR,
        });
    }

    passes
}

fn passes_quality_filter(det: &RawDetection, min_confidence: f32) -> bool {
    let floor = min_confidence.min(NOISE_FLOOR);
    if det.label.is_empty() || det.confidence < floor {
        return false;
    }
    if det.bbox.area() < MIN_BOX_AREA {
        return false;
    }
    let aspect = det.bbox.aspect_ratio();
    (MIN_ASPECT_RATIO..=MAX_ASPECT_RATIO).contains(&aspect)
}

/// Greedy non-maximum suppression: highest confidence first, drop any
/// candidate overlapping a kept one at IoU >= 0.5.
fn non_max_suppression(mut detections: Vec<RawDetection>) -> Vec<RawDetection> {
    detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    let mut kept: Vec<RawDetection> = Vec::with_capacity(detections.len());
    for det in detections {
        if kept.iter().all(|k| k.bbox.iou(&det.bbox) < NMS_IOU) {
            kept.push(det);
        }
    }
    kept
}

/// Runs the recognizer over one frame according to the detection mode and
/// returns filtered candidates. The result shape does not depend on the mode.
#[derive(Clone)]
pub struct Detector {
    recognizer: Arc<dyn NumberRecognizer>,
}

impl Detector {
    pub fn new(recognizer: Arc<dyn NumberRecognizer>) -> Self {
        Self { recognizer }
    }

    pub fn recognizer(&self) -> &Arc<dyn NumberRecognizer> {
        &self.recognizer
    }

    #[tracing::instrument(skip(self, frame, settings), fields(
        frame_index = frame.index,
        mode = %settings.modo_deteccion
    ))]
    pub async fn detect(
        &self,
        frame: &Frame,
        settings: &DetectorSettings,
    ) -> Result<Vec<DetectionEvent>, DetectionError> {
        let mode = settings.modo_deteccion;
        let passes = if mode == DetectionMode::Standard {
            build_passes(&frame.image, mode)
        } else {
            let image = frame.image.clone();
            tokio::task::spawn_blocking(move || build_passes(&image, mode))
                .await
                .map_err(|e| DetectionError::Encode(format!("preprocessing failed: {}", e)))?
        };

        let total_passes = passes.len();
        let mut candidates = Vec::new();
        let mut failures = 0usize;
        let mut last_error = None;

        for pass in passes {
            match self
                .recognizer
                .recognize(&pass.image, settings.min_confidence)
                .await
            {
                Ok(found) => {
                    candidates.extend(found.into_iter().map(|mut det| {
                        if pass.scale != 1.0 {
                            det.bbox = det.bbox.scaled(1.0 / pass.scale);
                        }
                        det
                    }));
                }
                Err(e) => {
                    if total_passes > 1 {
                        tracing::warn!(pass = pass.name, error = %e, "Detector pass failed");
                    }
                    failures += 1;
                    last_error = Some(e);
                }
            }
        }

        // Only a frame where every pass failed counts as a detection error
        if failures == total_passes {
            if let Some(err) = last_error {
                return Err(err);
            }
        }

        let filtered: Vec<RawDetection> = candidates
            .into_iter()
            .filter(|d| passes_quality_filter(d, settings.min_confidence))
            .collect();

        let events = non_max_suppression(filtered)
            .into_iter()
            .map(|d| DetectionEvent {
                frame_index: frame.index,
                raw_number: d.label,
                confidence: d.confidence,
                bounding_box: d.bbox,
            })
            .collect::<Vec<_>>();

        tracing::debug!(count = events.len(), "Frame detections");
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use vagon_core::models::BoundingBox;

    /// Returns the same detections for every pass and counts calls.
    struct FixedRecognizer {
        detections: Vec<RawDetection>,
        calls: AtomicUsize,
        fail_after: Option<usize>,
    }

    impl FixedRecognizer {
        fn new(detections: Vec<RawDetection>) -> Self {
            Self {
                detections,
                calls: AtomicUsize::new(0),
                fail_after: None,
            }
        }
    }

    #[async_trait]
    impl NumberRecognizer for FixedRecognizer {
        async fn recognize(
            &self,
            image: &RgbImage,
            _min_confidence: f32,
        ) -> Result<Vec<RawDetection>, DetectionError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_after.is_some_and(|n| call >= n) {
                return Err(DetectionError::Request("boom".to_string()));
            }
            // Scale boxes with the image so upscaled passes look realistic
            let factor = image.width() as f32 / 200.0;
            Ok(self
                .detections
                .iter()
                .cloned()
                .map(|mut d| {
                    d.bbox = d.bbox.scaled(factor);
                    d
                })
                .collect())
        }

        fn backend_name(&self) -> &'static str {
            "fixed"
        }

        fn model_type(&self) -> String {
            "fixed".to_string()
        }
    }

    fn raw(label: &str, confidence: f32, x: f32) -> RawDetection {
        RawDetection {
            label: label.to_string(),
            confidence,
            bbox: BoundingBox::new(x, 10.0, x + 20.0, 40.0),
        }
    }

    fn frame() -> Frame {
        Frame {
            index: 7,
            position_secs: 7.0,
            image: RgbImage::new(200, 100),
        }
    }

    fn settings(mode: DetectionMode) -> DetectorSettings {
        DetectorSettings {
            modo_deteccion: mode,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn standard_mode_uses_one_pass() {
        let recognizer = Arc::new(FixedRecognizer::new(vec![raw("12", 0.9, 50.0)]));
        let detector = Detector::new(recognizer.clone());

        let events = detector
            .detect(&frame(), &settings(DetectionMode::Standard))
            .await
            .unwrap();

        assert_eq!(recognizer.calls.load(Ordering::SeqCst), 1);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].frame_index, 7);
        assert_eq!(events[0].raw_number, "12");
    }

    #[tokio::test]
    async fn aggressive_passes_are_merged_by_nms() {
        let recognizer = Arc::new(FixedRecognizer::new(vec![
            raw("0", 0.9, 10.0),
            raw("12", 0.6, 70.0),
        ]));
        let detector = Detector::new(recognizer.clone());

        let events = detector
            .detect(&frame(), &settings(DetectionMode::Aggressive))
            .await
            .unwrap();

        assert_eq!(recognizer.calls.load(Ordering::SeqCst), 4);
        // Upscaled boxes map back onto the originals and are suppressed
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| e.bounding_box.x2 <= 91.0));
    }

    #[tokio::test]
    async fn quality_filter_drops_noise() {
        let tiny = RawDetection {
            label: "01".to_string(),
            confidence: 0.9,
            bbox: BoundingBox::new(0.0, 0.0, 5.0, 5.0),
        };
        let wide = RawDetection {
            label: "02".to_string(),
            confidence: 0.9,
            bbox: BoundingBox::new(0.0, 0.0, 100.0, 20.0),
        };
        let weak = raw("03", 0.1, 120.0);
        let kept_weak = raw("04", 0.28, 160.0);
        let recognizer = Arc::new(FixedRecognizer::new(vec![tiny, wide, weak, kept_weak]));
        let detector = Detector::new(recognizer);

        let mut s = settings(DetectionMode::Standard);
        s.min_confidence = 0.8;
        let events = detector.detect(&frame(), &s).await.unwrap();

        // 0.28 is below min_confidence but above the noise floor
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].raw_number, "04");
    }

    #[tokio::test]
    async fn partial_pass_failure_is_tolerated() {
        let mut inner = FixedRecognizer::new(vec![raw("12", 0.9, 50.0)]);
        inner.fail_after = Some(1);
        let detector = Detector::new(Arc::new(inner));

        let events = detector
            .detect(&frame(), &settings(DetectionMode::Enhanced))
            .await
            .unwrap();
        assert_eq!(events.len(), 1);
    }

    #[tokio::test]
    async fn total_failure_is_an_error() {
        let mut inner = FixedRecognizer::new(vec![]);
        inner.fail_after = Some(0);
        let detector = Detector::new(Arc::new(inner));

        let result = detector
            .detect(&frame(), &settings(DetectionMode::Enhanced))
            .await;
        assert!(result.is_err());
    }
}
