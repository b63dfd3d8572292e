use rusqlite::{params, Connection};
use std::path::Path;

use crate::error::{PipelineError, PipelineResult};
use crate::observation::{ensure_parent_dir, Observation};

pub fn validate_table_name(table: &str) -> PipelineResult<()> {
    let mut chars = table.chars();
    let valid = match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    };
    if !valid {
        return Err(PipelineError::InvalidConfig(format!(
            "table name {table:?} must be a plain identifier"
        )));
    }
    Ok(())
}

/// SQLite-backed raw series table; every `persist` replaces the table wholesale.
pub struct SeriesStore {
    conn: Connection,
    table: String,
}

impl SeriesStore {
    pub fn open(path: &Path, table: &str) -> PipelineResult<Self> {
        validate_table_name(table)?;
        ensure_parent_dir(path)
            .map_err(|err| PipelineError::StorageFailure(err.to_string()))?;
        let conn = Connection::open(path)?;
        Ok(Self {
            conn,
            table: table.to_string(),
        })
    }

    pub fn open_in_memory(table: &str) -> PipelineResult<Self> {
        validate_table_name(table)?;
        Ok(Self {
            conn: Connection::open_in_memory()?,
            table: table.to_string(),
        })
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn persist(&mut self, series: &[Observation]) -> PipelineResult<usize> {
        let tx = self.conn.transaction()?;
        tx.execute_batch(&format!(
            r#"
            DROP TABLE IF EXISTS "{table}";
            CREATE TABLE "{table}" (
                time TEXT,
                temp REAL,
                humidity REAL
            );
            "#,
            table = self.table
        ))?;
        {
            let mut insert = tx.prepare(&format!(
                r#"INSERT INTO "{}" (time, temp, humidity) VALUES (?1, ?2, ?3)"#,
                self.table
            ))?;
            for row in series {
                insert.execute(params![row.time, row.temp, row.humidity])?;
            }
        }
        tx.commit()?;
        tracing::info!(table = %self.table, rows = series.len(), "replaced raw series table");
        Ok(series.len())
    }

    pub fn load(&self) -> PipelineResult<Vec<Observation>> {
        let mut stmt = self.conn.prepare(&format!(
            r#"SELECT time, temp, humidity FROM "{}" ORDER BY rowid"#,
            self.table
        ))?;
        let rows = stmt
            .query_map([], |row| {
                Ok(Observation {
                    time: row.get(0)?,
                    temp: row.get(1)?,
                    humidity: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observation::Cell;
    use anyhow::Result;

    fn series() -> Vec<Observation> {
        vec![
            Observation {
                time: "2025-01-01T02:00".to_string(),
                temp: Cell::Number(20.0),
                humidity: Cell::Number(50.0),
            },
            Observation {
                time: "2025-01-01T00:00".to_string(),
                temp: Cell::Missing,
                humidity: Cell::Number(52.0),
            },
            Observation {
                time: "2025-01-01T01:00".to_string(),
                temp: Cell::Text("err".to_string()),
                humidity: Cell::Missing,
            },
        ]
    }

    #[test]
    fn load_returns_insertion_order() -> Result<()> {
        let mut store = SeriesStore::open_in_memory("weather_lju")?;
        assert_eq!(store.persist(&series())?, 3);
        assert_eq!(store.load()?, series());
        Ok(())
    }

    #[test]
    fn persist_is_a_full_overwrite_and_idempotent() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("db").join("proto.db");
        let mut store = SeriesStore::open(&path, "weather_lju")?;

        store.persist(&series())?;
        let once = store.load()?;
        store.persist(&series())?;
        assert_eq!(store.load()?, once);

        let shorter = series()[..1].to_vec();
        store.persist(&shorter)?;
        assert_eq!(store.load()?, shorter);

        drop(store);
        let reopened = SeriesStore::open(&path, "weather_lju")?;
        assert_eq!(reopened.load()?, shorter);
        Ok(())
    }

    #[test]
    fn loading_a_missing_table_is_a_storage_failure() -> Result<()> {
        let store = SeriesStore::open_in_memory("never_written")?;
        let err = store.load().unwrap_err();
        assert!(matches!(err, PipelineError::StorageFailure(_)));
        assert!(err.is_fatal());
        Ok(())
    }

    #[test]
    fn table_names_must_be_identifiers() {
        assert!(validate_table_name("weather_lju").is_ok());
        assert!(validate_table_name("_t2").is_ok());
        assert!(validate_table_name("").is_err());
        assert!(validate_table_name("2weather").is_err());
        assert!(validate_table_name("a\"b").is_err());
    }
}
