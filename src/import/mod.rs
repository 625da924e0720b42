//! Bulk subscriber import: uploaded CSV files are validated, scored row by
//! row, and merged into the subscriber table as a tracked job.

pub mod columns;
pub mod service;
pub mod validation;

pub use service::{DuplicateHandling, ImportJob, ImportOptions, ImportResult, ImportService};
pub use validation::RowStatus;
