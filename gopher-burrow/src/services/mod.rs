//! Catalog services built on the store

pub mod content_source;
pub mod coordinator;
pub mod gatherer_probe;
pub mod maintenance;
pub mod reconciler;
pub mod tag_graph;

pub use content_source::{ContentSource, FsContentSource};
pub use coordinator::{plan_entry, EntryPlan, IngestionCoordinator};
pub use gatherer_probe::GathererProbe;
pub use maintenance::{MaintenanceSweeper, SweepReport};
pub use reconciler::{ContentChange, DuplicateReconciler, MergeOutcome};
pub use tag_graph::{TagChange, TagGraph, TagName, TagPage};
