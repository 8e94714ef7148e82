//! Data models for gopher-burrow

pub mod image_record;
pub mod observation;

pub use image_record::{CatalogStats, FileLocation, ImageRecord, ImageStatus, MergeRecord};
pub use observation::Observation;
