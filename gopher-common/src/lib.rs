//! # Image Gopher Common Library
//!
//! Shared code for the Image Gopher services (burrow, gatherer, web portal):
//! - Content identity (image fingerprints)
//! - Gatherer/burrow wire types (scan reports, ingestion results)
//! - Configuration file model and resolution
//! - Event types and the in-process event bus
//! - SSE helpers

pub mod api;
pub mod config;
pub mod error;
pub mod events;
pub mod fingerprint;
pub mod sse;

pub use error::{Error, Result};
pub use fingerprint::{Fingerprint, IdentityError};
