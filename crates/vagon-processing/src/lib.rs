//! Vagon Processing
//!
//! Media decoding and number detection: frame extraction from images,
//! videos and live sources, motion gating for cameras, recognizer backends
//! and composite number aggregation.

pub mod aggregator;
pub mod detector;
pub mod frames;
pub mod motion;
pub mod recognizer;

pub use aggregator::{Composite, DetectionAggregator, VideoAggregator};
pub use detector::Detector;
pub use frames::{
    crop_roi, decode_image, encode_jpeg, DecodeError, Frame, FrameExtractor,
    FrameExtractorConfig, FrameSequence, FrameStream, VideoInfo,
};
pub use motion::MotionGate;
pub use recognizer::{
    DetectionError, HttpRecognizer, NumberRecognizer, RawDetection, UnconfiguredRecognizer,
};
