//! Click/move/scroll heatmaps: events are stored with the viewport they were
//! captured in and bucketed into a square grid on read.

use chrono::{DateTime, Utc};
use rocket_db_pools::sqlx::{self, FromRow, PgPool};
use rocket_okapi::okapi::schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::{AnalyticsError, AnalyticsResult};

pub const DEFAULT_GRID_SIZE: usize = 20;
pub const MAX_GRID_SIZE: usize = 100;
const MAX_EVENTS_PER_BATCH: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum HeatmapEventType {
    Click,
    Move,
    Scroll,
}

impl HeatmapEventType {
    pub fn as_str(self) -> &'static str {
        match self {
            HeatmapEventType::Click => "click",
            HeatmapEventType::Move => "move",
            HeatmapEventType::Scroll => "scroll",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HeatmapEventInput {
    pub page_url: String,
    pub event_type: HeatmapEventType,
    pub x: i32,
    pub y: i32,
    pub viewport_width: i32,
    pub viewport_height: i32,
    pub session_id: Option<String>,
}

impl HeatmapEventInput {
    fn validate(&self) -> Result<(), String> {
        if self.page_url.trim().is_empty() {
            return Err("pageUrl is required".to_string());
        }
        if self.viewport_width <= 0 || self.viewport_height <= 0 {
            return Err("viewport dimensions must be positive".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, FromRow)]
pub struct HeatmapPoint {
    pub x: i32,
    pub y: i32,
    pub viewport_width: i32,
    pub viewport_height: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HeatmapCell {
    pub row: usize,
    pub col: usize,
    pub count: u64,
    /// `count / max_count`, 0.0 to 1.0.
    pub intensity: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HeatmapGrid {
    pub page_url: String,
    pub event_type: Option<HeatmapEventType>,
    pub grid_size: usize,
    pub total_events: u64,
    pub max_count: u64,
    /// Non-empty cells only, row-major.
    pub cells: Vec<HeatmapCell>,
    pub generated_at: DateTime<Utc>,
}

fn cell_index(position: i32, extent: i32, grid_size: usize) -> usize {
    if position <= 0 || extent <= 0 {
        return 0;
    }
    let scaled = (position as f64 / extent as f64 * grid_size as f64).floor() as usize;
    scaled.min(grid_size - 1)
}

/// Count points per cell of a `grid_size x grid_size` grid.
///
/// Coordinates are normalised by their own viewport, so events captured on
/// different screen sizes land in comparable cells. Points outside the
/// viewport clamp to the nearest edge cell.
pub fn bucket(points: &[HeatmapPoint], grid_size: usize) -> Vec<Vec<u64>> {
    let grid_size = grid_size.clamp(1, MAX_GRID_SIZE);
    let mut grid = vec![vec![0u64; grid_size]; grid_size];
    for point in points {
        let col = cell_index(point.x, point.viewport_width, grid_size);
        let row = cell_index(point.y, point.viewport_height, grid_size);
        grid[row][col] += 1;
    }
    grid
}

fn summarize(grid: &[Vec<u64>]) -> (u64, u64, Vec<HeatmapCell>) {
    let max_count = grid.iter().flatten().copied().max().unwrap_or(0);
    let total = grid.iter().flatten().sum();
    let cells = grid
        .iter()
        .enumerate()
        .flat_map(|(row, counts)| {
            counts
                .iter()
                .enumerate()
                .filter(|(_, count)| **count > 0)
                .map(move |(col, count)| HeatmapCell {
                    row,
                    col,
                    count: *count,
                    intensity: *count as f64 / max_count as f64,
                })
        })
        .collect();
    (total, max_count, cells)
}

#[derive(Clone)]
pub struct HeatmapService {
    pool: PgPool,
}

impl HeatmapService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn record(&self, events: Vec<HeatmapEventInput>) -> AnalyticsResult<u64> {
        if events.is_empty() {
            return Ok(0);
        }
        if events.len() > MAX_EVENTS_PER_BATCH {
            return Err(AnalyticsError::Invalid(format!(
                "At most {} events per request",
                MAX_EVENTS_PER_BATCH
            )));
        }
        for event in &events {
            event.validate().map_err(AnalyticsError::Invalid)?;
        }

        let mut builder = sqlx::QueryBuilder::<sqlx::Postgres>::new(
            "INSERT INTO heatmap_events (page_url, event_type, x, y, viewport_width, viewport_height, session_id) ",
        );
        builder.push_values(&events, |mut row, event| {
            row.push_bind(event.page_url.trim())
                .push_bind(event.event_type.as_str())
                .push_bind(event.x)
                .push_bind(event.y)
                .push_bind(event.viewport_width)
                .push_bind(event.viewport_height)
                .push_bind(&event.session_id);
        });
        let inserted = builder.build().execute(&self.pool).await?.rows_affected();

        log::debug!("heatmap: recorded {} events", inserted);
        Ok(inserted)
    }

    pub async fn grid(
        &self,
        page_url: &str,
        event_type: Option<HeatmapEventType>,
        grid_size: Option<usize>,
    ) -> AnalyticsResult<HeatmapGrid> {
        let grid_size = grid_size.unwrap_or(DEFAULT_GRID_SIZE);
        if grid_size == 0 || grid_size > MAX_GRID_SIZE {
            return Err(AnalyticsError::Invalid(format!(
                "gridSize must be between 1 and {}",
                MAX_GRID_SIZE
            )));
        }

        let points: Vec<HeatmapPoint> = sqlx::query_as(
            r#"SELECT x, y, viewport_width, viewport_height FROM heatmap_events
               WHERE page_url = $1 AND ($2::text IS NULL OR event_type = $2)"#,
        )
        .bind(page_url)
        .bind(event_type.map(HeatmapEventType::as_str))
        .fetch_all(&self.pool)
        .await?;

        let grid = bucket(&points, grid_size);
        let (total_events, max_count, cells) = summarize(&grid);

        Ok(HeatmapGrid {
            page_url: page_url.to_string(),
            event_type,
            grid_size,
            total_events,
            max_count,
            cells,
            generated_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(x: i32, y: i32) -> HeatmapPoint {
        HeatmapPoint {
            x,
            y,
            viewport_width: 1000,
            viewport_height: 500,
        }
    }

    #[test]
    fn buckets_normalise_by_viewport() {
        let grid = bucket(&[point(0, 0), point(999, 499), point(500, 250)], 10);
        assert_eq!(grid[0][0], 1);
        assert_eq!(grid[9][9], 1);
        assert_eq!(grid[5][5], 1);

        let small = HeatmapPoint {
            x: 50,
            y: 25,
            viewport_width: 100,
            viewport_height: 50,
        };
        let grid = bucket(&[point(500, 250), small], 10);
        assert_eq!(grid[5][5], 2);
    }

    #[test]
    fn out_of_bounds_points_clamp_to_edges() {
        let grid = bucket(&[point(-10, -5), point(5000, 5000)], 4);
        assert_eq!(grid[0][0], 1);
        assert_eq!(grid[3][3], 1);
    }

    #[test]
    fn summary_lists_only_hot_cells() {
        let grid = bucket(&[point(0, 0), point(1, 1), point(999, 0)], 2);
        let (total, max, cells) = summarize(&grid);
        assert_eq!(total, 3);
        assert_eq!(max, 2);
        assert_eq!(cells.len(), 2);
        assert_eq!((cells[0].row, cells[0].col, cells[0].count), (0, 0, 2));
        assert_eq!(cells[0].intensity, 1.0);
        assert_eq!(cells[1].intensity, 0.5);
    }

    #[test]
    fn empty_grid_has_no_cells() {
        let grid = bucket(&[], DEFAULT_GRID_SIZE);
        assert_eq!(grid.len(), DEFAULT_GRID_SIZE);
        let (total, max, cells) = summarize(&grid);
        assert_eq!((total, max), (0, 0));
        assert!(cells.is_empty());
    }
}
