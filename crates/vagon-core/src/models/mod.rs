//! Data models for the application
//!
//! Organized by domain: persisted records, camera sources, detection values and
//! processing job bookkeeping.

mod camera;
mod detection;
mod job;
mod record;

pub use camera::*;
pub use detection::*;
pub use job::*;
pub use record::*;
