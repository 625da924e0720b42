//! Email tracking, campaign statistics, the admin dashboard and page heatmaps.

pub mod dashboard;
pub mod heatmap;
pub mod tracking;

pub use dashboard::{Dashboard, load_dashboard};
pub use heatmap::{HeatmapEventInput, HeatmapEventType, HeatmapGrid, HeatmapService};
pub use tracking::{CampaignStats, CreateTracking, TrackingRecord, TrackingService};

use rocket_db_pools::sqlx;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AnalyticsError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("{0}")]
    Invalid(String),
    #[error("{0}")]
    NotFound(String),
}

pub type AnalyticsResult<T> = Result<T, AnalyticsError>;

/// Percentage of `part` in `whole`, rounded to two decimals; zero for an empty whole.
pub fn rate(part: i64, whole: i64) -> f64 {
    if whole <= 0 {
        return 0.0;
    }
    (part as f64 / whole as f64 * 10_000.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::rate;

    #[test]
    fn rates_are_percentages_with_two_decimals() {
        assert_eq!(rate(1, 3), 33.33);
        assert_eq!(rate(2, 3), 66.67);
        assert_eq!(rate(5, 5), 100.0);
        assert_eq!(rate(3, 0), 0.0);
    }
}
