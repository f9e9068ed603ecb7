//! Dataset Module - Frame Loader
//!
//! Reads delimited telemetry files into cleaned `TelemetryFrame`s.
//! Reading is bounded (row limit, byte budget); schema resolution and
//! cleaning are shared between training and scoring.

pub mod frame;
pub mod reader;
pub mod sampling;

#[cfg(test)]
mod tests;

use std::path::Path;

use serde::Serialize;

use crate::constants::SCHEMA_SAMPLE_ROWS;
use crate::logic::config::LoadLimits;
use crate::logic::error::{PipelineError, PipelineResult};
use crate::logic::features::schema::find_timestamp_column;
use crate::logic::features::{resolve_schema, ResolutionStrategy, ResolvedSchema, SchemaInput, SensorColumnSet};

pub use frame::{CleaningStats, TelemetryFrame};
use reader::ReadStats;

/// A frame plus everything learned while loading it
#[derive(Debug, Clone)]
pub struct LoadedFrame {
    pub frame: TelemetryFrame,
    pub schema: ResolvedSchema,
    pub read: ReadStats,
    pub cleaning: CleaningStats,
}

/// Load summary for reports
#[derive(Debug, Clone, Serialize)]
pub struct LoadSummary {
    pub rows: usize,
    pub columns: usize,
    pub read: ReadStats,
    pub cleaning: CleaningStats,
}

impl LoadedFrame {
    pub fn summary(&self) -> LoadSummary {
        LoadSummary {
            rows: self.frame.n_rows(),
            columns: self.frame.columns().len(),
            read: self.read.clone(),
            cleaning: self.cleaning.clone(),
        }
    }
}

/// Training load: resolve the sensor set from the header and caller hints
pub fn load_training_frame(
    path: &Path,
    requested: Option<&[String]>,
    limits: LoadLimits,
    chunk_size: usize,
    fallback_columns: usize,
) -> PipelineResult<LoadedFrame> {
    let table = reader::read_table(path, limits, chunk_size)?;
    let sample = &table.rows[..table.rows.len().min(SCHEMA_SAMPLE_ROWS)];
    let schema = resolve_schema(
        SchemaInput {
            headers: &table.headers,
            sample_rows: sample,
        },
        requested,
        fallback_columns,
    )?;

    let (frame, cleaning) = TelemetryFrame::from_table(&table, &schema)?;
    Ok(LoadedFrame {
        frame,
        schema,
        read: table.stats,
        cleaning,
    })
}

/// Scoring load: keep whichever trained columns the input carries.
/// The caller reindexes to the full trained set afterwards.
pub fn load_scoring_frame(
    path: &Path,
    trained: &SensorColumnSet,
    limits: LoadLimits,
    chunk_size: usize,
) -> PipelineResult<LoadedFrame> {
    let table = reader::read_table(path, limits, chunk_size)?;
    let timestamp_column = find_timestamp_column(&table.headers);

    let present: Vec<&String> = trained
        .names()
        .iter()
        .filter(|name| table.column_index(name).is_some() && timestamp_column.as_ref() != Some(*name))
        .collect();
    if present.is_empty() {
        return Err(PipelineError::EmptyColumnSet {
            requested: trained.names().to_vec(),
            available: table.headers.clone(),
        });
    }

    let schema = ResolvedSchema {
        timestamp_column,
        sensors: SensorColumnSet::from_names(present.into_iter().cloned()),
        dropped: trained.missing_from(&table.headers),
        strategy: ResolutionStrategy::CallerProvided,
    };

    let (frame, cleaning) = TelemetryFrame::from_table(&table, &schema)?;
    Ok(LoadedFrame {
        frame,
        schema,
        read: table.stats,
        cleaning,
    })
}

/// Apply the training row cap. Returns the frame and whether it was reduced.
pub fn cap_training_rows(frame: TelemetryFrame, cap: usize, recent_fraction: f64) -> (TelemetryFrame, bool) {
    if frame.n_rows() <= cap {
        return (frame, false);
    }
    let keep = sampling::downsample_indices(frame.n_rows(), cap, recent_fraction);
    log::info!(
        "Downsampled {} rows to {} ({:.0}% most recent)",
        frame.n_rows(),
        keep.len(),
        recent_fraction * 100.0
    );
    (frame.select_rows(&keep), true)
}
