//! Schema Resolver
//!
//! Picks the timestamp column and the sensor column set from the observed
//! header plus optional caller hints. Sensor resolution runs an ordered list
//! of strategies; each one either resolves, skips, or fails outright.

use serde::Serialize;

use super::layout::SensorColumnSet;
use crate::logic::error::{PipelineError, PipelineResult};

/// Accepted timestamp column names (case-insensitive, exact)
pub const TIMESTAMP_SYNONYMS: &[&str] = &["timestamp", "timestamps", "time_stamp", "date"];

/// Lowercase substrings that mark a column as metadata
pub const METADATA_KEYWORDS: &[&str] = &[
    "time", "timestamp", "date", "id", "asset", "train", "test", "status",
];

// ============================================================================
// TYPES
// ============================================================================

/// Header plus a few sample rows
#[derive(Debug, Clone, Copy)]
pub struct SchemaInput<'a> {
    pub headers: &'a [String],
    pub sample_rows: &'a [Vec<String>],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStrategy {
    CallerProvided,
    MetadataExclusion,
    NumericFallback,
}

impl ResolutionStrategy {
    /// Order in which strategies are tried
    pub const ORDER: [ResolutionStrategy; 3] = [
        ResolutionStrategy::CallerProvided,
        ResolutionStrategy::MetadataExclusion,
        ResolutionStrategy::NumericFallback,
    ];
}

enum StrategyOutcome {
    Resolved { columns: Vec<String>, dropped: Vec<String> },
    Skip,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResolvedSchema {
    pub timestamp_column: Option<String>,
    pub sensors: SensorColumnSet,
    /// Caller-requested names absent from the input
    pub dropped: Vec<String>,
    pub strategy: ResolutionStrategy,
}

// ============================================================================
// RESOLVER
// ============================================================================

pub struct SchemaResolver<'a> {
    requested: Vec<String>,
    fallback_columns: usize,
    input: SchemaInput<'a>,
    timestamp_column: Option<String>,
}

impl<'a> SchemaResolver<'a> {
    pub fn new(input: SchemaInput<'a>, requested: Option<&[String]>, fallback_columns: usize) -> Self {
        let mut cleaned: Vec<String> = Vec::new();
        for name in requested.unwrap_or(&[]) {
            let name = name.trim();
            if !name.is_empty() && !cleaned.iter().any(|c| c == name) {
                cleaned.push(name.to_string());
            }
        }

        Self {
            requested: cleaned,
            fallback_columns,
            timestamp_column: find_timestamp_column(input.headers),
            input,
        }
    }

    pub fn resolve(&self) -> PipelineResult<ResolvedSchema> {
        for strategy in ResolutionStrategy::ORDER {
            let outcome = match strategy {
                ResolutionStrategy::CallerProvided => self.caller_provided()?,
                ResolutionStrategy::MetadataExclusion => self.metadata_exclusion(),
                ResolutionStrategy::NumericFallback => self.numeric_fallback()?,
            };

            if let StrategyOutcome::Resolved { columns, dropped } = outcome {
                let sensors = SensorColumnSet::from_names(columns);
                log::info!(
                    "Resolved {} sensor columns via {:?} (timestamp: {:?})",
                    sensors.len(),
                    strategy,
                    self.timestamp_column
                );
                if !dropped.is_empty() {
                    log::warn!("Requested columns not present in input: {:?}", dropped);
                }
                return Ok(ResolvedSchema {
                    timestamp_column: self.timestamp_column.clone(),
                    sensors,
                    dropped,
                    strategy,
                });
            }
        }

        Err(self.empty_error())
    }

    fn empty_error(&self) -> PipelineError {
        PipelineError::EmptyColumnSet {
            requested: self.requested.clone(),
            available: self.input.headers.to_vec(),
        }
    }

    fn is_timestamp(&self, name: &str) -> bool {
        self.timestamp_column.as_deref() == Some(name)
    }

    /// Intersect caller names with the header; empty intersection is fatal
    fn caller_provided(&self) -> PipelineResult<StrategyOutcome> {
        if self.requested.is_empty() {
            return Ok(StrategyOutcome::Skip);
        }

        let (present, dropped): (Vec<String>, Vec<String>) = self
            .requested
            .iter()
            .cloned()
            .partition(|name| self.input.headers.contains(name) && !self.is_timestamp(name));

        if present.is_empty() {
            return Err(self.empty_error());
        }
        Ok(StrategyOutcome::Resolved { columns: present, dropped })
    }

    /// Every column whose name carries no metadata keyword
    fn metadata_exclusion(&self) -> StrategyOutcome {
        let columns: Vec<String> = self
            .input
            .headers
            .iter()
            .filter(|h| !self.is_timestamp(h) && !is_metadata_name(h))
            .cloned()
            .collect();

        if columns.is_empty() {
            StrategyOutcome::Skip
        } else {
            StrategyOutcome::Resolved { columns, dropped: Vec::new() }
        }
    }

    /// First K purely numeric columns
    fn numeric_fallback(&self) -> PipelineResult<StrategyOutcome> {
        let columns: Vec<String> = self
            .input
            .headers
            .iter()
            .enumerate()
            .filter(|(_, h)| !self.is_timestamp(h))
            .filter(|(idx, _)| is_numeric_column(self.input.sample_rows, *idx))
            .map(|(_, h)| h.clone())
            .take(self.fallback_columns)
            .collect();

        if columns.is_empty() {
            return Err(self.empty_error());
        }
        log::warn!("No sensor columns by name, using first {} numeric columns", columns.len());
        Ok(StrategyOutcome::Resolved { columns, dropped: Vec::new() })
    }
}

// ============================================================================
// HELPERS
// ============================================================================

/// First header matching a timestamp synonym
pub fn find_timestamp_column(headers: &[String]) -> Option<String> {
    headers
        .iter()
        .find(|h| {
            let lower = h.trim().to_lowercase();
            TIMESTAMP_SYNONYMS.contains(&lower.as_str())
        })
        .cloned()
}

pub fn is_metadata_name(name: &str) -> bool {
    let lower = name.to_lowercase();
    METADATA_KEYWORDS.iter().any(|k| lower.contains(k))
}

/// Every non-empty sampled cell parses as a finite number, and one exists
pub fn is_numeric_column(rows: &[Vec<String>], idx: usize) -> bool {
    let mut seen = false;
    for row in rows {
        match row.get(idx).map(|c| c.trim()) {
            None | Some("") => continue,
            Some(cell) => match cell.parse::<f64>() {
                Ok(v) if v.is_finite() => seen = true,
                _ => return false,
            },
        }
    }
    seen
}

/// Convenience wrapper
pub fn resolve_schema(
    input: SchemaInput<'_>,
    requested: Option<&[String]>,
    fallback_columns: usize,
) -> PipelineResult<ResolvedSchema> {
    SchemaResolver::new(input, requested, fallback_columns).resolve()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn input<'a>(headers: &'a [String], rows: &'a [Vec<String>]) -> SchemaInput<'a> {
        SchemaInput { headers, sample_rows: rows }
    }

    #[test]
    fn test_timestamp_synonyms_case_insensitive() {
        for name in ["Timestamp", "TIMESTAMPS", "time_stamp", "Date"] {
            let headers = strings(&[name, "s1"]);
            assert_eq!(find_timestamp_column(&headers), Some(name.to_string()));
        }
        assert_eq!(find_timestamp_column(&strings(&["datetime", "s1"])), None);
    }

    #[test]
    fn test_synonym_resolves_same_set_as_time_stamp() {
        let rows = vec![strings(&["2024-01-01", "1", "2"])];
        let a = strings(&["Timestamp", "vibration", "pressure"]);
        let b = strings(&["time_stamp", "vibration", "pressure"]);

        let ra = resolve_schema(input(&a, &rows), None, 10).unwrap();
        let rb = resolve_schema(input(&b, &rows), None, 10).unwrap();

        assert_eq!(ra.sensors, rb.sensors);
        assert_eq!(ra.timestamp_column.as_deref(), Some("Timestamp"));
        assert_eq!(rb.timestamp_column.as_deref(), Some("time_stamp"));
        assert_eq!(ra.sensors.names(), &["pressure", "vibration"]);
    }

    #[test]
    fn test_caller_names_intersected_and_sorted() {
        let headers = strings(&["time_stamp", "s3", "s1", "s2"]);
        let requested = strings(&["s2", " s1 ", "ghost", "s2"]);
        let resolved = resolve_schema(input(&headers, &[]), Some(&requested[..]), 10).unwrap();

        assert_eq!(resolved.strategy, ResolutionStrategy::CallerProvided);
        assert_eq!(resolved.sensors.names(), &["s1", "s2"]);
        assert_eq!(resolved.dropped, vec!["ghost".to_string()]);
    }

    #[test]
    fn test_caller_names_empty_intersection_fails() {
        let headers = strings(&["s1", "s2"]);
        let requested = strings(&["x", "y"]);
        let err = resolve_schema(input(&headers, &[]), Some(&requested[..]), 10).unwrap_err();
        assert!(matches!(err, PipelineError::EmptyColumnSet { .. }));
    }

    #[test]
    fn test_blank_caller_names_mean_auto_detect() {
        let headers = strings(&["machine_id", "temp"]);
        let requested = strings(&["", "  "]);
        let resolved = resolve_schema(input(&headers, &[]), Some(&requested[..]), 10).unwrap();
        assert_eq!(resolved.strategy, ResolutionStrategy::MetadataExclusion);
        assert_eq!(resolved.sensors.names(), &["temp"]);
    }

    #[test]
    fn test_metadata_columns_excluded() {
        let headers = strings(&["time_stamp", "asset_id", "train_test", "status", "rpm", "temp"]);
        let resolved = resolve_schema(input(&headers, &[]), None, 10).unwrap();
        assert_eq!(resolved.sensors.names(), &["rpm", "temp"]);
    }

    #[test]
    fn test_numeric_fallback_takes_first_k() {
        let headers = strings(&["time", "id_a", "id_b", "id_c", "status"]);
        let rows = vec![
            strings(&["t0", "1", "x", "3", "4"]),
            strings(&["t1", "2", "", "4.5", "5"]),
        ];
        let resolved = resolve_schema(input(&headers, &rows), None, 2).unwrap();
        assert_eq!(resolved.strategy, ResolutionStrategy::NumericFallback);
        assert_eq!(resolved.sensors.names(), &["id_a", "id_c"]);
    }

    #[test]
    fn test_nothing_numeric_fails() {
        let headers = strings(&["date", "status"]);
        let rows = vec![strings(&["2024-01-01", "ok"])];
        let err = resolve_schema(input(&headers, &rows), None, 10).unwrap_err();
        assert!(matches!(err, PipelineError::EmptyColumnSet { .. }));
    }

    #[test]
    fn test_timestamp_never_a_sensor() {
        let headers = strings(&["date", "s1"]);
        let requested = strings(&["date", "s1"]);
        let resolved = resolve_schema(input(&headers, &[]), Some(&requested[..]), 10).unwrap();
        assert_eq!(resolved.sensors.names(), &["s1"]);
    }

    #[test]
    fn test_is_numeric_column() {
        let rows = vec![strings(&["1", ""]), strings(&["2.5e3", ""])];
        assert!(is_numeric_column(&rows, 0));
        assert!(!is_numeric_column(&rows, 1));
        assert!(!is_numeric_column(&[strings(&["nan"])], 0));
    }
}
