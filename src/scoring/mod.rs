pub mod isolation_forest;
pub mod stats;

use crate::error::{PipelineError, PipelineResult};
use crate::observation::{Label, Observation, ScoredObservation};

use isolation_forest::{ForestParams, IsolationForest};
use stats::{quantile, ColumnSummary};

#[derive(Debug, Clone, PartialEq)]
pub struct CleanObservation {
    pub time: String,
    pub temp: f64,
    pub humidity: Option<f64>,
}

/// Numeric coercion of both measurements; rows without a usable temperature are dropped.
pub fn clean(series: Vec<Observation>) -> Vec<CleanObservation> {
    series
        .into_iter()
        .filter_map(|row| {
            let temp = row.temp.as_f64()?;
            Some(CleanObservation {
                time: row.time,
                temp,
                humidity: row.humidity.as_f64(),
            })
        })
        .collect()
}

/// Labels every cleaned row with a temperature-only isolation forest.
///
/// A row is anomalous when its score is strictly above the `1 - contamination` quantile of
/// the training scores, so at most roughly `contamination * n` rows are flagged.
pub fn score(
    series: Vec<Observation>,
    contamination: f64,
    seed: u64,
) -> PipelineResult<Vec<ScoredObservation>> {
    if !(contamination > 0.0 && contamination <= 0.5) {
        return Err(PipelineError::InvalidConfig(format!(
            "contamination rate {contamination} must be in (0, 0.5]"
        )));
    }
    let input_rows = series.len();
    let cleaned = clean(series);
    if cleaned.len() < 2 {
        return Err(PipelineError::InsufficientData {
            usable: cleaned.len(),
        });
    }

    let temps: Vec<f64> = cleaned.iter().map(|row| row.temp).collect();
    let forest = IsolationForest::fit(&temps, ForestParams::with_seed(seed));
    let scores = forest.score_all(&temps);
    let threshold = quantile(&scores, 1.0 - contamination).unwrap_or(f64::INFINITY);

    let scored: Vec<ScoredObservation> = cleaned
        .into_iter()
        .zip(scores)
        .map(|(row, score)| ScoredObservation {
            time: row.time,
            temp: row.temp,
            humidity: row.humidity,
            is_anomaly: if score > threshold {
                Label::Anomaly
            } else {
                Label::Normal
            },
        })
        .collect();

    let counts = LabelCounts::tally(&scored);
    tracing::info!(
        input_rows,
        scored_rows = scored.len(),
        dropped = input_rows - scored.len(),
        anomalies = counts.anomalies,
        contamination,
        seed,
        "scored temperature series"
    );
    Ok(scored)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LabelCounts {
    pub anomalies: usize,
    pub normals: usize,
}

impl LabelCounts {
    pub fn tally(rows: &[ScoredObservation]) -> Self {
        rows.iter().fold(Self::default(), |mut acc, row| {
            if row.is_anomaly.is_anomaly() {
                acc.anomalies += 1;
            } else {
                acc.normals += 1;
            }
            acc
        })
    }
}

pub fn describe(rows: &[ScoredObservation]) -> Vec<ColumnSummary> {
    vec![
        ColumnSummary::describe("temp", rows.iter().map(|r| r.temp)),
        ColumnSummary::describe(
            "humidity",
            rows.iter().map(|r| r.humidity.unwrap_or(f64::NAN)),
        ),
        ColumnSummary::describe(
            "is_anomaly",
            rows.iter().map(|r| f64::from(r.is_anomaly.code())),
        ),
    ]
}
