//! Row types shared by every stage, and the two local CSV formats.
//!
//! The raw cache is `time,temp,humidity`; the processed artifact adds `is_anomaly`
//! (`-1` anomalous, `1` normal).

use rusqlite::types::{FromSql, FromSqlResult, Null, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize, Serializer};
use std::fs;
use std::path::Path;

use crate::error::{PipelineError, PipelineResult};

/// A raw measurement exactly as the source delivered it.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Missing,
    Number(f64),
    Text(String),
}

impl Cell {
    pub fn from_text(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Cell::Missing;
        }
        match trimmed.parse::<f64>() {
            Ok(value) => Cell::Number(value),
            Err(_) => Cell::Text(trimmed.to_string()),
        }
    }

    /// Numeric coercion; anything unparsable or non-finite is missing.
    pub fn as_f64(&self) -> Option<f64> {
        let value = match self {
            Cell::Missing => return None,
            Cell::Number(value) => *value,
            Cell::Text(text) => text.trim().parse::<f64>().ok()?,
        };
        value.is_finite().then_some(value)
    }
}

impl From<Option<f64>> for Cell {
    fn from(value: Option<f64>) -> Self {
        value.map(Cell::Number).unwrap_or(Cell::Missing)
    }
}

impl Serialize for Cell {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Cell::Missing => serializer.serialize_none(),
            Cell::Number(value) => serializer.serialize_f64(*value),
            Cell::Text(text) => serializer.serialize_str(text),
        }
    }
}

impl ToSql for Cell {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Cell::Missing => ToSqlOutput::from(Null),
            Cell::Number(value) => ToSqlOutput::from(*value),
            Cell::Text(text) => ToSqlOutput::from(text.as_str()),
        })
    }
}

impl FromSql for Cell {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        Ok(match value {
            ValueRef::Null => Cell::Missing,
            ValueRef::Integer(value) => Cell::Number(value as f64),
            ValueRef::Real(value) => Cell::Number(value),
            ValueRef::Text(bytes) | ValueRef::Blob(bytes) => {
                Cell::from_text(&String::from_utf8_lossy(bytes))
            }
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Observation {
    pub time: String,
    pub temp: Cell,
    pub humidity: Cell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Label {
    Normal,
    Anomaly,
}

impl Label {
    pub fn code(self) -> i8 {
        match self {
            Label::Normal => 1,
            Label::Anomaly => -1,
        }
    }

    pub fn is_anomaly(self) -> bool {
        self == Label::Anomaly
    }
}

impl Serialize for Label {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i8(self.code())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredObservation {
    pub time: String,
    pub temp: f64,
    pub humidity: Option<f64>,
    pub is_anomaly: Label,
}

#[derive(Debug, Deserialize)]
struct RawCsvRow {
    time: String,
    #[serde(default)]
    temp: Option<String>,
    #[serde(default)]
    humidity: Option<String>,
}

pub fn ensure_parent_dir(path: &Path) -> PipelineResult<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|err| artifact_error(parent, err))?;
    }
    Ok(())
}

pub fn read_raw_csv(path: &Path) -> PipelineResult<Vec<Observation>> {
    let mut reader = csv::Reader::from_path(path).map_err(|err| artifact_error(path, err))?;
    let mut rows = Vec::new();
    for record in reader.deserialize::<RawCsvRow>() {
        let row = record.map_err(|err| artifact_error(path, err))?;
        rows.push(Observation {
            time: row.time,
            temp: row.temp.as_deref().map(Cell::from_text).unwrap_or(Cell::Missing),
            humidity: row
                .humidity
                .as_deref()
                .map(Cell::from_text)
                .unwrap_or(Cell::Missing),
        });
    }
    Ok(rows)
}

pub fn write_raw_csv(path: &Path, rows: &[Observation]) -> PipelineResult<()> {
    write_rows(path, rows)?;
    Ok(())
}

/// Writes the processed artifact and returns its size in bytes.
pub fn write_scored_csv(path: &Path, rows: &[ScoredObservation]) -> PipelineResult<u64> {
    write_rows(path, rows)
}

fn write_rows<T: Serialize>(path: &Path, rows: &[T]) -> PipelineResult<u64> {
    ensure_parent_dir(path)?;
    let mut writer = csv::Writer::from_path(path).map_err(|err| artifact_error(path, err))?;
    for row in rows {
        writer
            .serialize(row)
            .map_err(|err| artifact_error(path, err))?;
    }
    writer.flush().map_err(|err| artifact_error(path, err))?;
    drop(writer);
    let size = fs::metadata(path)
        .map_err(|err| artifact_error(path, err))?
        .len();
    Ok(size)
}

pub(crate) fn artifact_error(path: &Path, err: impl std::fmt::Display) -> PipelineError {
    PipelineError::Artifact {
        path: path.display().to_string(),
        message: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;

    #[test]
    fn cell_coercion_treats_garbage_as_missing() {
        assert_eq!(Cell::from_text(" 21.5 ").as_f64(), Some(21.5));
        assert_eq!(Cell::from_text("").as_f64(), None);
        assert_eq!(Cell::from_text("n/a").as_f64(), None);
        assert_eq!(Cell::from_text("NaN").as_f64(), None);
        assert_eq!(Cell::Text("7".to_string()).as_f64(), Some(7.0));
        assert_eq!(Cell::from(None).as_f64(), None);
    }

    #[test]
    fn raw_csv_keeps_row_order_and_unparsable_cells() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("raw").join("weather.csv");
        let rows = vec![
            Observation {
                time: "2025-01-01T01:00".to_string(),
                temp: Cell::Number(3.5),
                humidity: Cell::Missing,
            },
            Observation {
                time: "2025-01-01T00:00".to_string(),
                temp: Cell::Text("sensor fault".to_string()),
                humidity: Cell::Number(80.0),
            },
        ];
        write_raw_csv(&path, &rows)?;

        let contents = fs::read_to_string(&path)?;
        assert!(contents.starts_with("time,temp,humidity\n"));

        let loaded = read_raw_csv(&path)?;
        assert_eq!(loaded, rows);
        Ok(())
    }

    #[test]
    fn scored_csv_encodes_labels_as_minus_one_and_one() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("scored.csv");
        let rows = vec![
            ScoredObservation {
                time: "t0".to_string(),
                temp: 20.0,
                humidity: Some(50.0),
                is_anomaly: Label::Normal,
            },
            ScoredObservation {
                time: "t1".to_string(),
                temp: 95.0,
                humidity: None,
                is_anomaly: Label::Anomaly,
            },
        ];
        let size = write_scored_csv(&path, &rows)?;
        let contents = fs::read_to_string(&path)?;
        assert_eq!(size, contents.len() as u64);
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines[0], "time,temp,humidity,is_anomaly");
        assert!(lines[1].ends_with(",1"));
        assert!(lines[2].starts_with("t1,95"));
        assert!(lines[2].ends_with(",,-1"));
        Ok(())
    }

    #[test]
    fn missing_raw_csv_is_an_artifact_error() {
        let err = read_raw_csv(Path::new("/definitely/not/here.csv")).unwrap_err();
        assert_eq!(err.kind(), "artifact");
    }
}
