//! Utility modules for gopher-burrow

pub mod db_retry;
pub mod pagination;
pub mod pool_monitor;

pub use db_retry::{retry_transient, RetryPolicy};
pub use pagination::{calculate_pagination, Pagination};
pub use pool_monitor::{begin_monitored, MonitoredTransaction};
