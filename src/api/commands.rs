//! Command Handlers - invocation boundary
//!
//! Turns raw CLI arguments into pipeline requests, runs the job behind a
//! panic boundary and maps the outcome onto an exit status. Usage errors are
//! returned before any job starts and never produce a terminal event.

use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;

use crate::logic::bundle::{ArtifactStore, ModelKey};
use crate::logic::config::PipelineConfig;
use crate::logic::error::{PipelineError, PipelineResult};
use crate::logic::events::{EventSink, Reporter};
use crate::logic::pipeline::{
    run_inference, run_reading_inference, run_training, PredictRequest, ReadingRequest, TrainRequest,
};

// ============================================================================
// OUTCOME
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandStatus {
    Succeeded,
    /// The job ran and emitted a terminal failure event
    Failed,
    /// Rejected before the job started
    Usage(String),
}

impl CommandStatus {
    pub fn exit_code(&self) -> i32 {
        match self {
            CommandStatus::Succeeded => 0,
            CommandStatus::Failed => 1,
            CommandStatus::Usage(_) => 2,
        }
    }
}

// ============================================================================
// ARGUMENT PARSING
// ============================================================================

pub fn parse_key(user_id: &str, machine_id: &str) -> PipelineResult<ModelKey> {
    ModelKey::new(user_id, machine_id).map_err(|e| PipelineError::Usage(e.to_string()))
}

/// Comma-separated list; blank means auto-detect
pub fn parse_sensor_columns(raw: Option<&str>) -> Option<Vec<String>> {
    let columns: Vec<String> = raw?
        .split(',')
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(String::from)
        .collect();
    (!columns.is_empty()).then_some(columns)
}

/// Positive integer, otherwise ignored with a warning
pub fn parse_row_limit(raw: Option<&str>) -> Option<usize> {
    let raw = raw?.trim();
    if raw.is_empty() {
        return None;
    }
    match raw.parse::<usize>() {
        Ok(n) if n > 0 => Some(n),
        _ => {
            log::warn!("Ignoring invalid row limit '{}'", raw);
            None
        }
    }
}

/// JSON object of sensor name → number
pub fn parse_reading(raw: &str) -> PipelineResult<BTreeMap<String, f64>> {
    let value: serde_json::Value =
        serde_json::from_str(raw).map_err(|e| PipelineError::Malformed(format!("reading is not valid JSON: {}", e)))?;
    let object = value
        .as_object()
        .ok_or_else(|| PipelineError::Malformed("reading must be a JSON object".into()))?;

    let mut reading = BTreeMap::new();
    for (name, v) in object {
        match v.as_f64() {
            Some(n) => {
                reading.insert(name.clone(), n);
            }
            None if v.is_null() => log::warn!("Reading field '{}' is null, skipped", name),
            None => {
                return Err(PipelineError::Malformed(format!(
                    "reading field '{}' is not a number: {}",
                    name, v
                )))
            }
        }
    }
    if reading.is_empty() {
        return Err(PipelineError::Malformed("reading has no numeric fields".into()));
    }
    Ok(reading)
}

// ============================================================================
// HANDLERS
// ============================================================================

pub fn train(
    user_id: &str,
    machine_id: &str,
    data_source: &Path,
    sensor_columns: Option<&str>,
    row_limit: Option<&str>,
    config: &PipelineConfig,
    sink: &dyn EventSink,
) -> CommandStatus {
    let key = match parse_key(user_id, machine_id) {
        Ok(key) => key,
        Err(e) => return CommandStatus::Usage(e.to_string()),
    };
    let request = TrainRequest {
        key,
        data_source: data_source.to_path_buf(),
        sensor_columns: parse_sensor_columns(sensor_columns),
        row_limit: parse_row_limit(row_limit),
    };
    let store = ArtifactStore::new(&config.artifact_root);
    let reporter = Reporter::new(sink, config.heartbeat_interval);
    guarded(&reporter, || run_training(&request, config, &store, &reporter))
}

pub fn predict(
    user_id: &str,
    machine_id: &str,
    input_source: &Path,
    config: &PipelineConfig,
    sink: &dyn EventSink,
) -> CommandStatus {
    let key = match parse_key(user_id, machine_id) {
        Ok(key) => key,
        Err(e) => return CommandStatus::Usage(e.to_string()),
    };
    let request = PredictRequest {
        key,
        input_source: input_source.to_path_buf(),
    };
    let store = ArtifactStore::new(&config.artifact_root);
    let reporter = Reporter::new(sink, config.heartbeat_interval);
    guarded(&reporter, || run_inference(&request, config, &store, &reporter))
}

pub fn predict_reading(
    user_id: &str,
    machine_id: &str,
    reading_json: &str,
    config: &PipelineConfig,
    sink: &dyn EventSink,
) -> CommandStatus {
    let key = match parse_key(user_id, machine_id) {
        Ok(key) => key,
        Err(e) => return CommandStatus::Usage(e.to_string()),
    };
    let store = ArtifactStore::new(&config.artifact_root);
    let reporter = Reporter::new(sink, config.heartbeat_interval);
    guarded(&reporter, || {
        let request = ReadingRequest {
            key,
            reading: parse_reading(reading_json)?,
        };
        run_reading_inference(&request, &store, &reporter)
    })
}

/// Run `job`, guaranteeing exactly one terminal event even on early errors or panics
fn guarded<T>(reporter: &Reporter, job: impl FnOnce() -> PipelineResult<T>) -> CommandStatus {
    match panic::catch_unwind(AssertUnwindSafe(job)) {
        Ok(Ok(_)) => CommandStatus::Succeeded,
        Ok(Err(e)) => {
            if !reporter.terminal_sent() {
                reporter.fail(&e);
            }
            CommandStatus::Failed
        }
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            log::error!("Job panicked: {}", message);
            if !reporter.terminal_sent() {
                reporter.fail(&PipelineError::Internal(format!("panic: {}", message)));
            }
            CommandStatus::Failed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logic::events::{MemorySink, ProgressEvent};
    use std::time::Duration;

    #[test]
    fn test_parse_sensor_columns() {
        assert_eq!(
            parse_sensor_columns(Some(" temp, pressure ,,")),
            Some(vec!["temp".to_string(), "pressure".to_string()])
        );
        assert_eq!(parse_sensor_columns(Some("  ")), None);
        assert_eq!(parse_sensor_columns(None), None);
    }

    #[test]
    fn test_parse_row_limit() {
        assert_eq!(parse_row_limit(Some("500")), Some(500));
        assert_eq!(parse_row_limit(Some("abc")), None);
        assert_eq!(parse_row_limit(Some("0")), None);
        assert_eq!(parse_row_limit(Some("-3")), None);
        assert_eq!(parse_row_limit(None), None);
    }

    #[test]
    fn test_parse_reading() {
        let reading = parse_reading(r#"{"temp": 21.5, "rpm": 1200, "note": null}"#).unwrap();
        assert_eq!(reading.len(), 2);
        assert_eq!(reading["rpm"], 1200.0);

        for bad in ["not json", "[1, 2]", r#"{"temp": "hot"}"#, "{}"] {
            let err = parse_reading(bad).unwrap_err();
            assert_eq!(err.kind(), "malformed_input", "{}", bad);
        }
    }

    #[test]
    fn test_invalid_key_is_usage_without_events() {
        let sink = MemorySink::new();
        let config = PipelineConfig::default();
        let status = predict("../etc", "m1", Path::new("x.csv"), &config, &sink);
        assert!(matches!(status, CommandStatus::Usage(_)));
        assert_eq!(status.exit_code(), 2);
        assert!(sink.events().is_empty());
    }

    #[test]
    fn test_bad_reading_json_emits_one_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = PipelineConfig {
            artifact_root: dir.path().to_path_buf(),
            ..Default::default()
        };
        let sink = MemorySink::new();
        let status = predict_reading("u1", "m1", "{oops", &config, &sink);
        assert_eq!(status.exit_code(), 1);
        assert_eq!(sink.terminal_count(), 1);
        assert!(matches!(
            sink.last(),
            Some(ProgressEvent::Error { kind, .. }) if kind == "malformed_input"
        ));
    }

    #[test]
    fn test_panic_becomes_single_terminal_event() {
        let sink = MemorySink::new();
        let reporter = Reporter::new(&sink, Duration::from_secs(60));
        let status = guarded(&reporter, || -> PipelineResult<()> { panic!("boom") });

        assert_eq!(status, CommandStatus::Failed);
        assert_eq!(sink.terminal_count(), 1);
        match sink.last() {
            Some(ProgressEvent::Error { message, category, .. }) => {
                assert!(message.contains("boom"));
                assert_eq!(category, "internal_error");
            }
            other => panic!("expected error event, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_data_file_fails_job() {
        let dir = tempfile::tempdir().unwrap();
        let config = PipelineConfig {
            artifact_root: dir.path().to_path_buf(),
            ..Default::default()
        };
        let sink = MemorySink::new();
        let status = train(
            "u1",
            "m1",
            &dir.path().join("absent.csv"),
            None,
            None,
            &config,
            &sink,
        );
        assert_eq!(status, CommandStatus::Failed);
        assert_eq!(sink.terminal_count(), 1);
    }
}
