use statrs::statistics::Statistics;

/// Linear-interpolated quantile over the finite values.
pub fn quantile(values: &[f64], q: f64) -> Option<f64> {
    if !(0.0..=1.0).contains(&q) {
        return None;
    }
    let mut sorted: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if sorted.is_empty() {
        return None;
    }
    sorted.sort_by(|a, b| a.total_cmp(b));
    if sorted.len() == 1 {
        return Some(sorted[0]);
    }
    let pos = q * (sorted.len() as f64 - 1.0);
    let idx = pos.floor() as usize;
    let frac = pos - idx as f64;
    let a = sorted[idx];
    let b = sorted[(idx + 1).min(sorted.len() - 1)];
    Some(a + (b - a) * frac)
}

/// Column summary in the shape of a dataframe `describe()`.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnSummary {
    pub name: String,
    pub count: usize,
    pub mean: f64,
    pub std: f64,
    pub min: f64,
    pub p25: f64,
    pub p50: f64,
    pub p75: f64,
    pub max: f64,
}

impl ColumnSummary {
    pub fn describe(name: &str, values: impl IntoIterator<Item = f64>) -> Self {
        let finite: Vec<f64> = values.into_iter().filter(|v| v.is_finite()).collect();
        let count = finite.len();
        let q = |p: f64| quantile(&finite, p).unwrap_or(f64::NAN);
        let (mean, std, min, max) = if count == 0 {
            (f64::NAN, f64::NAN, f64::NAN, f64::NAN)
        } else {
            (
                finite.iter().mean(),
                // sample standard deviation; NaN for a single value
                finite.iter().std_dev(),
                Statistics::min(finite.iter()),
                Statistics::max(finite.iter()),
            )
        };
        Self {
            name: name.to_string(),
            count,
            mean,
            std,
            min,
            p25: q(0.25),
            p50: q(0.5),
            p75: q(0.75),
            max,
        }
    }
}

pub fn render_table(columns: &[ColumnSummary]) -> String {
    let mut out = format!("{:<8}", "");
    for column in columns {
        out.push_str(&format!("{:>14}", column.name));
    }
    out.push('\n');
    let rows: [(&str, fn(&ColumnSummary) -> f64); 8] = [
        ("count", |c| c.count as f64),
        ("mean", |c| c.mean),
        ("std", |c| c.std),
        ("min", |c| c.min),
        ("25%", |c| c.p25),
        ("50%", |c| c.p50),
        ("75%", |c| c.p75),
        ("max", |c| c.max),
    ];
    for (label, value) in rows {
        out.push_str(&format!("{label:<8}"));
        for column in columns {
            let v = value(column);
            if v.is_nan() {
                out.push_str(&format!("{:>14}", "NaN"));
            } else {
                out.push_str(&format!("{v:>14.6}"));
            }
        }
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quantile_interpolates_between_ranks() {
        let values = [1.0, 2.0, 3.0, 4.0];
        assert_eq!(quantile(&values, 0.0), Some(1.0));
        assert_eq!(quantile(&values, 1.0), Some(4.0));
        assert_eq!(quantile(&values, 0.5), Some(2.5));
        assert_eq!(quantile(&values, 0.25), Some(1.75));
        assert_eq!(quantile(&values, 1.5), None);
        assert_eq!(quantile(&[f64::NAN], 0.5), None);
    }

    #[test]
    fn describe_skips_missing_values() {
        let summary = ColumnSummary::describe("humidity", [50.0, f64::NAN, 52.0, 10.0]);
        assert_eq!(summary.count, 3);
        assert!((summary.mean - 37.333_333).abs() < 1e-5);
        assert_eq!(summary.min, 10.0);
        assert_eq!(summary.max, 52.0);
        assert_eq!(summary.p50, 50.0);
        assert!(summary.std > 0.0);
    }

    #[test]
    fn render_table_lists_every_statistic() {
        let table = render_table(&[ColumnSummary::describe("temp", [1.0])]);
        for label in ["count", "mean", "std", "min", "25%", "50%", "75%", "max"] {
            assert!(table.contains(label), "missing {label}");
        }
        assert!(table.contains("NaN"));
    }
}
