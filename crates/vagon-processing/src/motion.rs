use image::imageops::{self, FilterType};
use image::{GrayImage, Luma, RgbImage};
use imageproc::distance_transform::Norm;
use imageproc::region_labelling::{connected_components, Connectivity};

/// Frames are compared at this width at most.
const ANALYSIS_WIDTH: u32 = 320;

/// Pixel difference threshold for a sensitivity in `[0, 1]`; higher
/// sensitivity means smaller changes count as motion.
fn diff_threshold(sensitivity: f32) -> u8 {
    let s = sensitivity.clamp(0.0, 1.0);
    (8.0 + (1.0 - s) * 40.0).round() as u8
}

fn to_analysis_gray(frame: &RgbImage) -> (GrayImage, f32) {
    let gray = imageops::grayscale(frame);
    if gray.width() <= ANALYSIS_WIDTH {
        return (gray, 1.0);
    }
    let scale = ANALYSIS_WIDTH as f32 / gray.width() as f32;
    let height = ((gray.height() as f32 * scale).round() as u32).max(1);
    (
        imageops::resize(&gray, ANALYSIS_WIDTH, height, FilterType::Triangle),
        scale,
    )
}

/// Area of the largest changed region between two equally sized frames,
/// in analysis-resolution pixels.
pub fn motion_area(previous: &GrayImage, current: &GrayImage, sensitivity: f32) -> u32 {
    if previous.dimensions() != current.dimensions() {
        return 0;
    }
    let threshold = diff_threshold(sensitivity);
    let (w, h) = current.dimensions();
    let mut mask = GrayImage::new(w, h);
    for (x, y, px) in mask.enumerate_pixels_mut() {
        let a = previous.get_pixel(x, y)[0];
        let b = current.get_pixel(x, y)[0];
        if a.abs_diff(b) > threshold {
            *px = Luma([255]);
        }
    }

    // Drop single-pixel sensor noise before labelling
    let mask = imageproc::morphology::open(&mask, Norm::LInf, 1);
    let labels = connected_components(&mask, Connectivity::Eight, Luma([0u8]));

    let mut areas: Vec<u32> = Vec::new();
    for label in labels.pixels() {
        let l = label[0] as usize;
        if l == 0 {
            continue;
        }
        if areas.len() < l {
            areas.resize(l, 0);
        }
        areas[l - 1] += 1;
    }
    areas.into_iter().max().unwrap_or(0)
}

/// Decides whether a live frame differs enough from the previous one to be
/// worth running detection on.
#[derive(Debug, Clone)]
pub struct MotionGate {
    sensitivity: f32,
    min_area: u32,
    previous: Option<GrayImage>,
}

impl MotionGate {
    pub fn new(sensitivity: f32, min_area: u32) -> Self {
        Self {
            sensitivity,
            min_area,
            previous: None,
        }
    }

    /// True when the largest moving region, measured at full resolution,
    /// exceeds the configured minimum area. The first frame only primes
    /// the gate.
    pub fn should_analyze(&mut self, frame: &RgbImage) -> bool {
        let (gray, scale) = to_analysis_gray(frame);
        let fired = match &self.previous {
            Some(prev) if prev.dimensions() == gray.dimensions() => {
                let area = motion_area(prev, &gray, self.sensitivity);
                let full_area = area as f32 / (scale * scale);
                full_area > self.min_area as f32
            }
            _ => false,
        };
        self.previous = Some(gray);
        fired
    }

    pub fn reset(&mut self) {
        self.previous = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn frame_with_block(x0: u32, size: u32) -> RgbImage {
        let mut img = RgbImage::from_pixel(200, 100, Rgb([20, 20, 20]));
        for y in 20..(20 + size).min(100) {
            for x in x0..(x0 + size).min(200) {
                img.put_pixel(x, y, Rgb([230, 230, 230]));
            }
        }
        img
    }

    #[test]
    fn first_frame_never_fires() {
        let mut gate = MotionGate::new(0.3, 10);
        assert!(!gate.should_analyze(&frame_with_block(10, 40)));
    }

    #[test]
    fn static_scene_does_not_fire() {
        let mut gate = MotionGate::new(0.3, 10);
        let frame = frame_with_block(10, 40);
        gate.should_analyze(&frame);
        assert!(!gate.should_analyze(&frame));
    }

    #[test]
    fn moving_block_fires() {
        let mut gate = MotionGate::new(0.3, 500);
        gate.should_analyze(&frame_with_block(10, 40));
        assert!(gate.should_analyze(&frame_with_block(120, 40)));
    }

    #[test]
    fn small_motion_is_below_min_area() {
        let mut gate = MotionGate::new(0.3, 5000);
        gate.should_analyze(&frame_with_block(10, 10));
        assert!(!gate.should_analyze(&frame_with_block(40, 10)));
    }

    #[test]
    fn reset_forgets_previous_frame() {
        let mut gate = MotionGate::new(0.3, 10);
        gate.should_analyze(&frame_with_block(10, 40));
        gate.reset();
        assert!(!gate.should_analyze(&frame_with_block(120, 40)));
    }

    #[test]
    fn isolated_pixels_are_filtered() {
        let prev = GrayImage::new(50, 50);
        let mut cur = GrayImage::new(50, 50);
        cur.put_pixel(10, 10, Luma([255]));
        cur.put_pixel(30, 30, Luma([255]));
        assert_eq!(motion_area(&prev, &cur, 1.0), 0);
    }

    #[test]
    fn higher_sensitivity_lowers_threshold() {
        assert!(diff_threshold(1.0) < diff_threshold(0.0));
    }
}
