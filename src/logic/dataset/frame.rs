//! Telemetry Frame
//!
//! Ordered numeric rows over a resolved sensor column set, plus an optional
//! timestamp label per row. Built from a `RawTable` by the cleaning pass:
//! empty rows dropped, time-sorted when possible, gaps filled.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use ndarray::{Array2, ArrayView2};
use serde::Serialize;

use super::reader::RawTable;
use crate::logic::error::{PipelineError, PipelineResult};
use crate::logic::features::{ResolvedSchema, SensorColumnSet};

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y/%m/%d %H:%M:%S",
    "%d/%m/%Y %H:%M:%S",
    "%d/%m/%Y %H:%M",
];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%d/%m/%Y"];

/// What the cleaning pass did
#[derive(Debug, Clone, Default, Serialize)]
pub struct CleaningStats {
    pub rows_in: usize,
    pub rows_dropped_empty: usize,
    pub cells_forward_filled: usize,
    pub cells_backward_filled: usize,
    pub cells_zero_filled: usize,
    pub sorted_by_time: bool,
}

impl CleaningStats {
    pub fn cells_filled(&self) -> usize {
        self.cells_forward_filled + self.cells_backward_filled + self.cells_zero_filled
    }
}

#[derive(Debug, Clone)]
pub struct TelemetryFrame {
    columns: SensorColumnSet,
    timestamps: Option<Vec<String>>,
    values: Array2<f64>,
}

impl TelemetryFrame {
    /// Frame over an already-clean matrix
    pub fn from_matrix(
        columns: SensorColumnSet,
        values: Array2<f64>,
        timestamps: Option<Vec<String>>,
    ) -> PipelineResult<Self> {
        if values.ncols() != columns.len() {
            return Err(PipelineError::ColumnMismatch {
                expected: columns.len(),
                actual: values.ncols(),
            });
        }
        if let Some(ts) = &timestamps {
            if ts.len() != values.nrows() {
                return Err(PipelineError::ShapeMismatch(format!(
                    "{} timestamps for {} rows",
                    ts.len(),
                    values.nrows()
                )));
            }
        }
        Ok(Self { columns, timestamps, values })
    }

    /// Typed, cleaned frame from raw rows
    pub fn from_table(table: &RawTable, schema: &ResolvedSchema) -> PipelineResult<(Self, CleaningStats)> {
        let mut stats = CleaningStats {
            rows_in: table.rows.len(),
            ..Default::default()
        };

        let sensor_idx: Vec<usize> = schema
            .sensors
            .names()
            .iter()
            .map(|name| {
                table.column_index(name).ok_or_else(|| {
                    PipelineError::Internal(format!("resolved column '{}' not in header", name))
                })
            })
            .collect::<PipelineResult<_>>()?;
        let ts_idx = schema
            .timestamp_column
            .as_deref()
            .and_then(|name| table.column_index(name));

        // Parse, dropping rows with no sensor value at all
        let mut cells: Vec<Vec<Option<f64>>> = Vec::with_capacity(table.rows.len());
        let mut labels: Vec<String> = Vec::with_capacity(table.rows.len());
        for row in &table.rows {
            let parsed: Vec<Option<f64>> = sensor_idx
                .iter()
                .map(|&i| row.get(i).and_then(|c| parse_cell(c)))
                .collect();
            if parsed.iter().all(Option::is_none) {
                stats.rows_dropped_empty += 1;
                continue;
            }
            cells.push(parsed);
            if let Some(i) = ts_idx {
                labels.push(row.get(i).cloned().unwrap_or_default());
            }
        }

        if cells.is_empty() {
            return Err(PipelineError::EmptyFrame);
        }
        if stats.rows_dropped_empty > 0 {
            log::warn!("Dropped {} rows with no sensor values", stats.rows_dropped_empty);
        }

        // Sort only when every label parses
        let mut timestamps = ts_idx.map(|_| labels);
        if let Some(ts) = timestamps.as_mut() {
            let keys: Option<Vec<i64>> = ts.iter().map(|t| parse_timestamp(t)).collect();
            match keys {
                Some(keys) => {
                    let mut order: Vec<usize> = (0..keys.len()).collect();
                    order.sort_by_key(|&i| keys[i]);
                    if order.windows(2).any(|w| w[0] > w[1]) {
                        cells = order.iter().map(|&i| cells[i].clone()).collect();
                        *ts = order.iter().map(|&i| ts[i].clone()).collect();
                        log::info!("Rows re-ordered by timestamp");
                    }
                    stats.sorted_by_time = true;
                }
                None => log::warn!("Timestamps not parseable, keeping input row order"),
            }
        }

        let values = fill_gaps(&cells, schema.sensors.len(), &mut stats);
        if stats.cells_filled() > 0 {
            log::info!(
                "Filled {} missing cells (forward {}, backward {}, zero {})",
                stats.cells_filled(),
                stats.cells_forward_filled,
                stats.cells_backward_filled,
                stats.cells_zero_filled
            );
        }

        let frame = Self::from_matrix(schema.sensors.clone(), values, timestamps)?;
        Ok((frame, stats))
    }

    pub fn columns(&self) -> &SensorColumnSet {
        &self.columns
    }

    pub fn n_rows(&self) -> usize {
        self.values.nrows()
    }

    pub fn values(&self) -> ArrayView2<'_, f64> {
        self.values.view()
    }

    /// Timestamp label of row `i`, or its index
    pub fn label(&self, i: usize) -> String {
        match &self.timestamps {
            Some(ts) => ts.get(i).cloned().unwrap_or_else(|| i.to_string()),
            None => i.to_string(),
        }
    }

    /// Matrix laid out as `target`; absent columns are zero. Returns the missing names.
    pub fn reindex(&self, target: &SensorColumnSet) -> (Array2<f64>, Vec<String>) {
        if self.columns.is_compatible(target) {
            return (self.values.clone(), Vec::new());
        }

        let plan = target.reindex_plan(self.columns.names());
        let missing = target.missing_from(self.columns.names());
        let mut out = Array2::<f64>::zeros((self.n_rows(), target.len()));
        for (j, source) in plan.iter().enumerate() {
            if let Some(src) = source {
                out.column_mut(j).assign(&self.values.column(*src));
            }
        }
        (out, missing)
    }

    /// Sub-frame with the given row indices, in the given order
    pub fn select_rows(&self, rows: &[usize]) -> Self {
        let values = self.values.select(ndarray::Axis(0), rows);
        let timestamps = self
            .timestamps
            .as_ref()
            .map(|ts| rows.iter().map(|&i| ts[i].clone()).collect());
        Self {
            columns: self.columns.clone(),
            timestamps,
            values,
        }
    }
}

/// Finite number or missing
fn parse_cell(cell: &str) -> Option<f64> {
    let cell = cell.trim();
    if cell.is_empty() {
        return None;
    }
    cell.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Epoch milliseconds for a handful of common layouts
pub fn parse_timestamp(raw: &str) -> Option<i64> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.timestamp_millis());
    }
    for fmt in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(dt.and_utc().timestamp_millis());
        }
    }
    for fmt in DATE_FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(raw, fmt) {
            return d.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc().timestamp_millis());
        }
    }
    None
}

/// Forward-fill, then backward-fill, then zero for all-missing columns
fn fill_gaps(cells: &[Vec<Option<f64>>], width: usize, stats: &mut CleaningStats) -> Array2<f64> {
    let rows = cells.len();
    let mut out = Array2::<f64>::zeros((rows, width));

    for j in 0..width {
        let first_seen = cells.iter().position(|r| r[j].is_some());
        let Some(first) = first_seen else {
            stats.cells_zero_filled += rows;
            continue;
        };

        // Leading gap takes the first observed value
        let lead = cells[first][j].unwrap_or(0.0);
        for i in 0..first {
            out[[i, j]] = lead;
        }
        stats.cells_backward_filled += first;

        let mut last = lead;
        for i in first..rows {
            match cells[i][j] {
                Some(v) => last = v,
                None => stats.cells_forward_filled += 1,
            }
            out[[i, j]] = last;
        }
    }
    out
}
