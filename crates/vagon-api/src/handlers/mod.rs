//! HTTP handlers, grouped by resource.

pub mod cameras;
pub mod image_upload;
pub mod live;
pub mod media;
pub mod model;
pub mod monitor;
pub mod processing;
pub mod records;
pub mod uploads;
