//! Descriptive statistics over a `GoldFrame`.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::models::GoldFrame;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    pub non_null: usize,
    pub dtype: String,
}

/// Column listing with non-null counts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameInfo {
    pub n_rows: usize,
    pub columns: Vec<ColumnInfo>,
    pub skipped: Vec<String>,
}

pub fn info(frame: &GoldFrame) -> FrameInfo {
    FrameInfo {
        n_rows: frame.n_rows(),
        columns: frame
            .columns()
            .iter()
            .map(|c| ColumnInfo {
                name: c.name.clone(),
                non_null: c.values.len() - c.missing_count(),
                dtype: "float64".to_string(),
            })
            .collect(),
        skipped: frame.skipped_columns().to_vec(),
    }
}

impl fmt::Display for FrameInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "RangeIndex: {} entries", self.n_rows)?;
        writeln!(f, "Data columns (total {} columns):", self.columns.len())?;
        writeln!(f, " #   {:<16} {:>14}  Dtype", "Column", "Non-Null Count")?;
        for (idx, column) in self.columns.iter().enumerate() {
            writeln!(
                f,
                " {:<3} {:<16} {:>5} non-null  {}",
                idx, column.name, column.non_null, column.dtype
            )?;
        }
        if !self.skipped.is_empty() {
            writeln!(f, "Skipped non-numeric columns: {}", self.skipped.join(", "))?;
        }
        Ok(())
    }
}

/// Missing cell count per column, in column order.
pub fn missing_values(frame: &GoldFrame) -> Vec<(String, usize)> {
    frame
        .columns()
        .iter()
        .map(|c| (c.name.clone(), c.missing_count()))
        .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnSummary {
    pub name: String,
    pub count: usize,
    pub mean: f64,
    pub std: f64,
    pub min: f64,
    pub q25: f64,
    pub median: f64,
    pub q75: f64,
    pub max: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Description {
    pub columns: Vec<ColumnSummary>,
}

pub fn describe(frame: &GoldFrame) -> Description {
    let columns = frame
        .columns()
        .iter()
        .map(|column| {
            let mut values = column.present();
            values.sort_by(f64::total_cmp);
            let count = values.len();
            ColumnSummary {
                name: column.name.clone(),
                count,
                mean: mean(&values),
                std: sample_std(&values),
                min: values.first().copied().unwrap_or(f64::NAN),
                q25: quantile_sorted(&values, 0.25),
                median: quantile_sorted(&values, 0.5),
                q75: quantile_sorted(&values, 0.75),
                max: values.last().copied().unwrap_or(f64::NAN),
            }
        })
        .collect();
    Description { columns }
}

impl fmt::Display for Description {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:>6}", "")?;
        for column in &self.columns {
            write!(f, " {:>14}", column.name)?;
        }
        writeln!(f)?;

        let rows: [(&str, fn(&ColumnSummary) -> f64); 8] = [
            ("count", |c| c.count as f64),
            ("mean", |c| c.mean),
            ("std", |c| c.std),
            ("min", |c| c.min),
            ("25%", |c| c.q25),
            ("50%", |c| c.median),
            ("75%", |c| c.q75),
            ("max", |c| c.max),
        ];
        for (label, value) in rows {
            write!(f, "{:>6}", label)?;
            for column in &self.columns {
                write!(f, " {:>14.6}", value(column))?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

/// Pearson correlation of every column pair over rows where both are present.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrelationMatrix {
    pub names: Vec<String>,
    pub values: Vec<Vec<f64>>,
}

impl CorrelationMatrix {
    pub fn get(&self, a: &str, b: &str) -> Option<f64> {
        let i = self.names.iter().position(|n| n == a)?;
        let j = self.names.iter().position(|n| n == b)?;
        Some(self.values[i][j])
    }
}

pub fn correlation_matrix(frame: &GoldFrame) -> CorrelationMatrix {
    let columns = frame.columns();
    let n = columns.len();
    let mut values = vec![vec![f64::NAN; n]; n];

    for i in 0..n {
        for j in i..n {
            let pairs: Vec<(f64, f64)> = columns[i]
                .values
                .iter()
                .zip(&columns[j].values)
                .filter_map(|(a, b)| Some(((*a)?, (*b)?)))
                .collect();
            let r = pearson(&pairs);
            values[i][j] = r;
            values[j][i] = r;
        }
    }

    CorrelationMatrix {
        names: columns.iter().map(|c| c.name.clone()).collect(),
        values,
    }
}

fn pearson(pairs: &[(f64, f64)]) -> f64 {
    if pairs.len() < 2 {
        return f64::NAN;
    }
    let n = pairs.len() as f64;
    let mean_a = pairs.iter().map(|p| p.0).sum::<f64>() / n;
    let mean_b = pairs.iter().map(|p| p.1).sum::<f64>() / n;

    let (mut cov, mut var_a, mut var_b) = (0.0, 0.0, 0.0);
    for (a, b) in pairs {
        cov += (a - mean_a) * (b - mean_b);
        var_a += (a - mean_a).powi(2);
        var_b += (b - mean_b).powi(2);
    }

    if var_a <= 0.0 || var_b <= 0.0 {
        return f64::NAN;
    }
    (cov / (var_a.sqrt() * var_b.sqrt())).clamp(-1.0, 1.0)
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Standard deviation with one delta degree of freedom.
pub fn sample_std(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return f64::NAN;
    }
    let m = mean(values);
    let ss: f64 = values.iter().map(|v| (v - m).powi(2)).sum();
    (ss / (values.len() - 1) as f64).sqrt()
}

/// Linear interpolation between order statistics; `sorted` must be ascending.
pub fn quantile_sorted(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return f64::NAN;
    }
    let position = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lower = position.floor() as usize;
    let upper = position.ceil() as usize;
    let weight = position - lower as f64;
    sorted[lower] + (sorted[upper] - sorted[lower]) * weight
}

pub fn median(values: &[f64]) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    quantile_sorted(&sorted, 0.5)
}
