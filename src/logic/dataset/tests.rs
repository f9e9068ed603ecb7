use std::io::Write;
use std::path::PathBuf;

use tempfile::{tempdir, TempDir};

use super::{cap_training_rows, load_scoring_frame, load_training_frame};
use crate::logic::config::LoadLimits;
use crate::logic::error::PipelineError;
use crate::logic::features::{build_windows, ResolutionStrategy, SensorColumnSet};

const CHUNK: usize = 1024 * 1024;

fn write_csv(dir: &TempDir, name: &str, content: &str) -> PathBuf {
    let path = dir.path().join(name);
    let mut file = std::fs::File::create(&path).unwrap();
    file.write_all(content.as_bytes()).unwrap();
    path
}

#[test]
fn test_timestamp_synonyms_give_same_frame() {
    let dir = tempdir().unwrap();
    let a = write_csv(&dir, "a.csv", "Timestamp,vibration,pressure\n2024-01-01,1,2\n2024-01-02,3,4\n");
    let b = write_csv(&dir, "b.csv", "time_stamp,vibration,pressure\n2024-01-01,1,2\n2024-01-02,3,4\n");

    let fa = load_training_frame(&a, None, LoadLimits::default(), CHUNK, 10).unwrap();
    let fb = load_training_frame(&b, None, LoadLimits::default(), CHUNK, 10).unwrap();

    assert_eq!(fa.frame.columns(), fb.frame.columns());
    assert_eq!(fa.frame.values(), fb.frame.values());
    assert_eq!(fa.frame.label(1), "2024-01-02");
}

#[test]
fn test_semicolon_file_with_gaps() {
    let dir = tempdir().unwrap();
    let path = write_csv(
        &dir,
        "s.csv",
        "date;rpm;temp\n2024-01-01;;20\n2024-01-02;100;\n2024-01-03;bad;22\n",
    );
    let loaded = load_training_frame(&path, None, LoadLimits::default(), CHUNK, 10).unwrap();
    let values = loaded.frame.values();

    // rpm: leading gap back-filled, unparsable cell forward-filled
    assert_eq!(values.column(0).to_vec(), vec![100.0, 100.0, 100.0]);
    assert_eq!(values.column(1).to_vec(), vec![20.0, 20.0, 22.0]);
    assert_eq!(loaded.read.delimiter, ';');
    assert_eq!(loaded.cleaning.cells_filled(), 3);
}

#[test]
fn test_rows_sorted_when_all_timestamps_parse() {
    let dir = tempdir().unwrap();
    let path = write_csv(
        &dir,
        "t.csv",
        "timestamp,s1\n2024-01-03,3\n2024-01-01,1\n2024-01-02,2\n",
    );
    let loaded = load_training_frame(&path, None, LoadLimits::default(), CHUNK, 10).unwrap();
    assert!(loaded.cleaning.sorted_by_time);
    assert_eq!(loaded.frame.values().column(0).to_vec(), vec![1.0, 2.0, 3.0]);
    assert_eq!(loaded.frame.label(0), "2024-01-01");
}

#[test]
fn test_order_kept_when_timestamps_unparseable() {
    let dir = tempdir().unwrap();
    let path = write_csv(&dir, "t.csv", "timestamp,s1\nlater,3\nearlier,1\n");
    let loaded = load_training_frame(&path, None, LoadLimits::default(), CHUNK, 10).unwrap();
    assert!(!loaded.cleaning.sorted_by_time);
    assert_eq!(loaded.frame.values().column(0).to_vec(), vec![3.0, 1.0]);
}

#[test]
fn test_all_empty_rows_is_empty_frame() {
    let dir = tempdir().unwrap();
    let path = write_csv(&dir, "e.csv", "timestamp,s1,s2\n2024-01-01,,\n2024-01-02,x,\n");
    let err = load_training_frame(&path, None, LoadLimits::default(), CHUNK, 10).unwrap_err();
    assert!(matches!(err, PipelineError::EmptyFrame));
}

#[test]
fn test_header_only_file_is_empty_frame() {
    let dir = tempdir().unwrap();
    let path = write_csv(&dir, "h.csv", "timestamp,s1\n");
    let err = load_training_frame(&path, None, LoadLimits::default(), CHUNK, 10).unwrap_err();
    assert!(matches!(err, PipelineError::EmptyFrame));
}

#[test]
fn test_row_limit_applies() {
    let dir = tempdir().unwrap();
    let mut content = String::from("s1,s2\n");
    for i in 0..50 {
        content.push_str(&format!("{},{}\n", i, i * 2));
    }
    let path = write_csv(&dir, "r.csv", &content);
    let limits = LoadLimits { max_rows: Some(20), max_bytes: None };
    let loaded = load_training_frame(&path, None, limits, CHUNK, 10).unwrap();
    assert_eq!(loaded.frame.n_rows(), 20);
    assert!(loaded.read.truncated_by_rows);
}

#[test]
fn test_requested_columns_reported_as_dropped() {
    let dir = tempdir().unwrap();
    let path = write_csv(&dir, "c.csv", "s1,s2,s3\n1,2,3\n");
    let requested = vec!["s3".to_string(), "ghost".to_string()];
    let loaded =
        load_training_frame(&path, Some(&requested[..]), LoadLimits::default(), CHUNK, 10).unwrap();
    assert_eq!(loaded.schema.strategy, ResolutionStrategy::CallerProvided);
    assert_eq!(loaded.frame.columns().names(), &["s3"]);
    assert_eq!(loaded.schema.dropped, vec!["ghost".to_string()]);
}

#[test]
fn test_scoring_frame_keeps_present_trained_columns() {
    let dir = tempdir().unwrap();
    let path = write_csv(&dir, "p.csv", "timestamp,s1,s3,extra\n2024-01-01,1,3,9\n");
    let trained = SensorColumnSet::from_names(["s1", "s2", "s3"]);

    let loaded = load_scoring_frame(&path, &trained, LoadLimits::default(), CHUNK).unwrap();
    assert_eq!(loaded.frame.columns().names(), &["s1", "s3"]);
    assert_eq!(loaded.schema.dropped, vec!["s2".to_string()]);

    let (matrix, missing) = loaded.frame.reindex(&trained);
    assert_eq!(matrix.row(0).to_vec(), vec![1.0, 0.0, 3.0]);
    assert_eq!(missing, vec!["s2".to_string()]);
}

#[test]
fn test_scoring_frame_without_any_trained_column() {
    let dir = tempdir().unwrap();
    let path = write_csv(&dir, "p.csv", "a,b\n1,2\n");
    let trained = SensorColumnSet::from_names(["s1"]);
    let err = load_scoring_frame(&path, &trained, LoadLimits::default(), CHUNK).unwrap_err();
    assert!(matches!(err, PipelineError::EmptyColumnSet { .. }));
}

#[test]
fn test_training_cap() {
    let dir = tempdir().unwrap();
    let mut content = String::from("s1\n");
    for i in 0..100 {
        content.push_str(&format!("{}\n", i));
    }
    let path = write_csv(&dir, "big.csv", &content);
    let loaded = load_training_frame(&path, None, LoadLimits::default(), CHUNK, 10).unwrap();

    let (capped, reduced) = cap_training_rows(loaded.frame, 20, 0.5);
    assert!(reduced);
    assert_eq!(capped.n_rows(), 20);
    assert_eq!(capped.values()[[19, 0]], 99.0);
    assert_eq!(capped.values()[[10, 0]], 90.0);
}

#[test]
fn test_twelve_rows_give_three_windows_of_ten() {
    let dir = tempdir().unwrap();
    let mut csv = String::from("a,b\n");
    for i in 1..=12 {
        csv.push_str(&format!("{},{}\n", i, i * 10));
    }
    let path = write_csv(&dir, "scenario.csv", &csv);

    let loaded = load_training_frame(&path, None, LoadLimits::default(), CHUNK, 10).unwrap();
    assert_eq!(loaded.frame.columns().names(), ["a", "b"]);
    assert_eq!(loaded.frame.n_rows(), 12);

    let windows = build_windows(loaded.frame.values(), 10).unwrap();
    assert_eq!(windows.dim(), (3, 10, 2));
    assert_eq!(windows[[0, 0, 0]], 1.0);
    assert_eq!(windows[[2, 0, 0]], 3.0);
    assert_eq!(windows[[2, 9, 1]], 120.0);
}
