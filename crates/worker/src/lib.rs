//! Worker process for the payment notification queue.

pub mod app;

pub use app::{App, RunSummary, load_notifications, sample_notifications};
