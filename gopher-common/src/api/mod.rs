//! Request/response contract shared by the gatherer, the burrow and the web portal

pub mod types;

pub use types::*;
