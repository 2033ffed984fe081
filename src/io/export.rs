//! Export sequential-run results to CSV and payload JSON.
//!
//! The summary CSV has one row per processed profile: timing, completion
//! counts and the final payload spread over one column per parameter. It is
//! meant to be easy to consume in spreadsheets or downstream scripts.

use std::collections::BTreeSet;
use std::fs::{self, File};
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::domain::Payload;
use crate::error::AppError;

/// One processed profile of a sequential run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SummaryRow {
    pub finished_at: DateTime<Utc>,
    pub profile: String,
    pub index: u64,
    pub completed: usize,
    pub total: usize,
    pub iterations: usize,
    pub elapsed_ms: u64,
    /// Cost after the last executed node, if any node ran.
    pub final_cost: Option<f64>,
    pub payload: Payload,
}

/// Write all rows; parameter columns are the sorted union over rows.
pub fn write_summary_csv(path: &Path, rows: &[SummaryRow]) -> Result<(), AppError> {
    let parameters: BTreeSet<&str> = rows
        .iter()
        .flat_map(|r| r.payload.keys().map(String::as_str))
        .collect();

    let file = File::create(path).map_err(|e| AppError::io(path, e))?;
    let mut writer = csv::Writer::from_writer(file);
    let csv_err = |e: csv::Error| csv_error(path, e);

    let mut header = vec![
        "finished_at",
        "profile",
        "index",
        "completed",
        "total",
        "iterations",
        "elapsed_ms",
        "final_cost",
    ];
    header.extend(parameters.iter().copied());
    writer.write_record(&header).map_err(csv_err)?;

    for row in rows {
        let mut record = vec![
            row.finished_at.to_rfc3339(),
            row.profile.clone(),
            row.index.to_string(),
            row.completed.to_string(),
            row.total.to_string(),
            row.iterations.to_string(),
            row.elapsed_ms.to_string(),
            row.final_cost.map(|c| format!("{c:.6e}")).unwrap_or_default(),
        ];
        record.extend(
            parameters
                .iter()
                .map(|p| row.payload.get(*p).map(|v| format!("{v:.8}")).unwrap_or_default()),
        );
        writer.write_record(&record).map_err(csv_err)?;
    }

    writer
        .flush()
        .map_err(|e| AppError::io(path, e))
}

fn csv_error(path: &Path, err: csv::Error) -> AppError {
    let message = err.to_string();
    match err.into_kind() {
        csv::ErrorKind::Io(source) => AppError::io(path, source),
        _ => AppError::Validation(format!("malformed row for '{}': {message}", path.display())),
    }
}

pub fn read_payload_json(path: &Path) -> Result<Payload, AppError> {
    let text = fs::read_to_string(path).map_err(|e| AppError::io(path, e))?;
    Ok(serde_json::from_str(&text)?)
}

/// Write `payload` as a JSON object, creating parent directories.
pub fn write_payload_json(path: &Path, payload: &Payload) -> Result<(), AppError> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir).map_err(|e| AppError::io(dir, e))?;
    }
    let text = serde_json::to_string_pretty(payload)?;
    fs::write(path, text).map_err(|e| AppError::io(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn row(profile: &str, index: u64, payload: Payload) -> SummaryRow {
        SummaryRow {
            finished_at: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
            profile: profile.into(),
            index,
            completed: 3,
            total: 3,
            iterations: 3,
            elapsed_ms: 12,
            final_cost: Some(0.5),
            payload,
        }
    }

    #[test]
    fn summary_has_union_of_parameters() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("summary.csv");
        let rows = vec![
            row("Ni_100K", 100, Payload::from([("a".into(), 3.52)])),
            row(
                "Ni_200K",
                200,
                Payload::from([("a".into(), 3.53), ("scale".into(), 0.4)]),
            ),
        ];
        write_summary_csv(&path, &rows).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines[0],
            "finished_at,profile,index,completed,total,iterations,elapsed_ms,final_cost,a,scale"
        );
        assert_eq!(
            lines[1],
            "2024-05-01T12:00:00+00:00,Ni_100K,100,3,3,3,12,5.000000e-1,3.52000000,"
        );
        assert!(lines[2].ends_with(",3.53000000,0.40000000"), "{}", lines[2]);
    }

    #[test]
    fn csv_io_failures_keep_the_io_exit_code() {
        let path = Path::new("out/summary.csv");
        let disk_full = csv::Error::from(std::io::Error::other("disk full"));
        let err = csv_error(path, disk_full);
        assert!(matches!(&err, AppError::Io { path: p, .. } if p.as_path() == path), "{err}");
        assert_eq!(err.exit_code(), 3);

        let missing_dir = tempfile::tempdir().unwrap();
        let path = missing_dir.path().join("nope").join("summary.csv");
        let err = write_summary_csv(&path, &[]).unwrap_err();
        assert_eq!(err.exit_code(), 3);
    }

    #[test]
    fn payload_json_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("seed.json");
        let payload = Payload::from([("a".into(), 3.52), ("scale".into(), 0.4)]);
        write_payload_json(&path, &payload).unwrap();
        assert_eq!(read_payload_json(&path).unwrap(), payload);

        fs::write(&path, "{\"a\": \"x\"}").unwrap();
        assert!(matches!(read_payload_json(&path), Err(AppError::Json(_))));
    }
}
