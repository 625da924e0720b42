//! Bulk subscriber export to CSV or XLSX files, tracked as jobs.

pub mod fields;
pub mod filters;
pub mod service;
pub mod writer;

pub use fields::{ExportField, available_fields};
pub use filters::{ExportFilters, ExportFormat, ExportOptions};
pub use service::{ExportDownload, ExportJob, ExportPreview, ExportRequest, ExportService};
