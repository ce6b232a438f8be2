// src/utils/metrics.rs

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::error::{AnalysisError, Result};
use crate::utils::stats::median;

fn check_pair(y_true: &[f64], y_pred: &[f64]) -> Result<()> {
    if y_true.is_empty() {
        return Err(AnalysisError::EmptyDataset("metric input".to_string()));
    }
    if y_true.len() != y_pred.len() {
        return Err(AnalysisError::ShapeMismatch {
            expected: y_true.len(),
            found: y_pred.len(),
        });
    }
    Ok(())
}

pub fn mean_absolute_error(y_true: &[f64], y_pred: &[f64]) -> Result<f64> {
    check_pair(y_true, y_pred)?;
    let total: f64 = y_true.iter().zip(y_pred).map(|(t, p)| (t - p).abs()).sum();
    Ok(total / y_true.len() as f64)
}

pub fn mean_squared_error(y_true: &[f64], y_pred: &[f64]) -> Result<f64> {
    check_pair(y_true, y_pred)?;
    let total: f64 = y_true.iter().zip(y_pred).map(|(t, p)| (t - p).powi(2)).sum();
    Ok(total / y_true.len() as f64)
}

/// Coefficient of determination; 0.0 for a constant target.
pub fn r2_score(y_true: &[f64], y_pred: &[f64]) -> Result<f64> {
    check_pair(y_true, y_pred)?;
    let mean = y_true.iter().sum::<f64>() / y_true.len() as f64;
    let ss_res: f64 = y_true.iter().zip(y_pred).map(|(t, p)| (t - p).powi(2)).sum();
    let ss_tot: f64 = y_true.iter().map(|t| (t - mean).powi(2)).sum();
    if ss_tot == 0.0 {
        return Ok(0.0);
    }
    Ok(1.0 - ss_res / ss_tot)
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RegressionMetrics {
    pub mae: f64,
    pub mse: f64,
    pub r2: f64,
}

impl RegressionMetrics {
    pub fn compute(y_true: &[f64], y_pred: &[f64]) -> Result<Self> {
        Ok(Self {
            mae: mean_absolute_error(y_true, y_pred)?,
            mse: mean_squared_error(y_true, y_pred)?,
            r2: r2_score(y_true, y_pred)?,
        })
    }
}

/// `num` evenly spaced values over `[start, end]`, endpoint included.
pub fn linspace(start: f64, end: f64, num: usize) -> Vec<f64> {
    match num {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (end - start) / (num - 1) as f64;
            (0..num)
                .map(|i| if i == num - 1 { end } else { start + step * i as f64 })
                .collect()
        }
    }
}

/// Index `i` with `bins[i - 1] <= value < bins[i]` for ascending `bins`.
pub fn digitize(value: f64, bins: &[f64]) -> usize {
    bins.partition_point(|edge| *edge <= value)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    pub labels: Vec<i64>,
    /// Rows are true labels, columns predicted labels.
    pub counts: Vec<Vec<usize>>,
}

impl ConfusionMatrix {
    /// Labels are the sorted union of those seen in either input.
    pub fn from_labels(y_true: &[i64], y_pred: &[i64]) -> Result<Self> {
        let labels: BTreeSet<i64> = y_true.iter().chain(y_pred).copied().collect();
        Self::with_labels(y_true, y_pred, labels.into_iter().collect())
    }

    /// Pairs whose labels are not listed are ignored.
    pub fn with_labels(y_true: &[i64], y_pred: &[i64], labels: Vec<i64>) -> Result<Self> {
        if y_true.len() != y_pred.len() {
            return Err(AnalysisError::ShapeMismatch {
                expected: y_true.len(),
                found: y_pred.len(),
            });
        }
        let mut counts = vec![vec![0; labels.len()]; labels.len()];
        for (t, p) in y_true.iter().zip(y_pred) {
            let row = labels.iter().position(|l| l == t);
            let col = labels.iter().position(|l| l == p);
            if let (Some(row), Some(col)) = (row, col) {
                counts[row][col] += 1;
            }
        }
        Ok(Self { labels, counts })
    }

    pub fn total(&self) -> usize {
        self.counts.iter().flatten().sum()
    }

    pub fn accuracy(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            return 0.0;
        }
        let diagonal: usize = (0..self.labels.len()).map(|i| self.counts[i][i]).sum();
        diagonal as f64 / total as f64
    }
}

impl fmt::Display for ConfusionMatrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let width = self
            .counts
            .iter()
            .flatten()
            .map(|c| c.to_string().len())
            .chain(self.labels.iter().map(|l| l.to_string().len()))
            .max()
            .unwrap_or(1);

        write!(f, "{:>w$}", "", w = width)?;
        for label in &self.labels {
            write!(f, " {:>w$}", label, w = width)?;
        }
        writeln!(f)?;
        for (label, row) in self.labels.iter().zip(&self.counts) {
            write!(f, "{:>w$}", label, w = width)?;
            for count in row {
                write!(f, " {:>w$}", count, w = width)?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

/// Confusion matrix of regression output after bucketing both sides on
/// bins spanning the range of `y_true`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BinnedConfusion {
    pub bins: Vec<f64>,
    pub matrix: ConfusionMatrix,
}

pub fn binned_confusion(y_true: &[f64], y_pred: &[f64], n_bins: usize) -> Result<BinnedConfusion> {
    check_pair(y_true, y_pred)?;
    if n_bins < 2 {
        return Err(AnalysisError::InvalidParameter(format!(
            "need at least 2 bins, got {}",
            n_bins
        )));
    }

    let min = y_true.iter().copied().fold(f64::INFINITY, f64::min);
    let max = y_true.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let bins = linspace(min, max, n_bins);

    let true_bins: Vec<i64> = y_true.iter().map(|v| digitize(*v, &bins) as i64).collect();
    let pred_bins: Vec<i64> = y_pred.iter().map(|v| digitize(*v, &bins) as i64).collect();

    Ok(BinnedConfusion {
        bins,
        matrix: ConfusionMatrix::from_labels(&true_bins, &pred_bins)?,
    })
}

/// 1 where the value reaches `threshold`, else 0.
pub fn threshold_classes(values: &[f64], threshold: f64) -> Vec<i64> {
    values.iter().map(|v| i64::from(*v >= threshold)).collect()
}

/// Up/down confusion against the median of `reference`, labels fixed to `[0, 1]`.
pub fn median_threshold_confusion(
    reference: &[f64],
    y_true: &[f64],
    y_pred: &[f64],
) -> Result<(f64, ConfusionMatrix)> {
    if reference.is_empty() {
        return Err(AnalysisError::EmptyDataset("threshold reference".to_string()));
    }
    let threshold = median(reference);
    let matrix = ConfusionMatrix::with_labels(
        &threshold_classes(y_true, threshold),
        &threshold_classes(y_pred, threshold),
        vec![0, 1],
    )?;
    Ok((threshold, matrix))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_regression_metrics() {
        let y_true = [3.0, -0.5, 2.0, 7.0];
        let y_pred = [2.5, 0.0, 2.0, 8.0];
        let metrics = RegressionMetrics::compute(&y_true, &y_pred).unwrap();
        assert!((metrics.mae - 0.5).abs() < 1e-12);
        assert!((metrics.mse - 0.375).abs() < 1e-12);
        assert!((metrics.r2 - 0.9486081370449679).abs() < 1e-12);
    }

    #[test]
    fn test_metric_errors() {
        assert!(matches!(
            mean_absolute_error(&[], &[]),
            Err(AnalysisError::EmptyDataset(_))
        ));
        assert!(matches!(
            mean_squared_error(&[1.0, 2.0], &[1.0]),
            Err(AnalysisError::ShapeMismatch { expected: 2, found: 1 })
        ));
        assert_eq!(r2_score(&[2.0, 2.0], &[1.0, 3.0]).unwrap(), 0.0);
    }

    #[test]
    fn test_linspace_and_digitize() {
        let bins = linspace(0.0, 1.0, 5);
        assert_eq!(bins, vec![0.0, 0.25, 0.5, 0.75, 1.0]);
        assert!(linspace(0.0, 1.0, 0).is_empty());
        assert_eq!(linspace(3.0, 9.0, 1), vec![3.0]);

        assert_eq!(digitize(-0.1, &bins), 0);
        assert_eq!(digitize(0.0, &bins), 1);
        assert_eq!(digitize(0.3, &bins), 2);
        assert_eq!(digitize(0.5, &bins), 3);
        // the maximum lands past the last edge
        assert_eq!(digitize(1.0, &bins), 5);
    }

    #[test]
    fn test_confusion_matrix_labels() {
        let matrix = ConfusionMatrix::from_labels(&[1, 2, 2, 5], &[1, 2, 3, 5]).unwrap();
        assert_eq!(matrix.labels, vec![1, 2, 3, 5]);
        assert_eq!(matrix.counts[1], vec![0, 1, 1, 0]);
        assert_eq!(matrix.counts[2], vec![0, 0, 0, 0]);
        assert_eq!(matrix.total(), 4);
        assert!((matrix.accuracy() - 0.75).abs() < 1e-12);

        let rendered = matrix.to_string();
        assert_eq!(rendered.lines().count(), 5);
    }

    #[test]
    fn test_binned_confusion() {
        let y_true = [0.0, 1.0, 2.0, 3.0, 4.0];
        let binned = binned_confusion(&y_true, &y_true, 5).unwrap();
        assert_eq!(binned.bins, vec![0.0, 1.0, 2.0, 3.0, 4.0]);
        assert_eq!(binned.matrix.labels, vec![1, 2, 3, 4, 5]);
        assert_eq!(binned.matrix.accuracy(), 1.0);

        // predictions below the range get label 0
        let binned = binned_confusion(&y_true, &[-1.0, 1.0, 2.0, 3.0, 4.0], 5).unwrap();
        assert_eq!(binned.matrix.labels[0], 0);
        assert_eq!(binned.matrix.counts[1][0], 1);

        assert!(binned_confusion(&y_true, &y_true, 1).is_err());
    }

    #[test]
    fn test_median_threshold_confusion() {
        let reference = [1.0, 2.0, 3.0, 4.0];
        let (threshold, matrix) =
            median_threshold_confusion(&reference, &[1.0, 3.0, 4.0], &[3.0, 3.0, 2.0]).unwrap();
        assert_eq!(threshold, 2.5);
        assert_eq!(matrix.labels, vec![0, 1]);
        assert_eq!(matrix.counts, vec![vec![0, 1], vec![1, 1]]);

        // both classes present in the labels even when one is never seen
        let (_, matrix) = median_threshold_confusion(&reference, &[4.0], &[4.0]).unwrap();
        assert_eq!(matrix.counts, vec![vec![0, 0], vec![0, 1]]);
    }
}
