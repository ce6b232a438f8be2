// src/utils/data_processing.rs

use log::info;
use ndarray::{Array1, Array2, Axis};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::error::{AnalysisError, Result};
use crate::models::columns::{CLOSE_BID, PRICE_CHANGE};
use crate::models::GoldFrame;

/// Rolling mean; a window with any missing value yields `None`.
pub fn simple_moving_average(values: &[Option<f64>], window: usize) -> Result<Vec<Option<f64>>> {
    if window == 0 {
        return Err(AnalysisError::InvalidParameter("window must be positive".to_string()));
    }

    Ok((0..values.len())
        .map(|i| {
            if i + 1 < window {
                return None;
            }
            values[i + 1 - window..=i]
                .iter()
                .try_fold(0.0, |acc, v| v.map(|v| acc + v))
                .map(|sum| sum / window as f64)
        })
        .collect())
}

/// Fractional change from the previous present value (missing values are forward filled).
pub fn percent_change(values: &[Option<f64>]) -> Vec<Option<f64>> {
    let mut previous: Option<f64> = None;
    values
        .iter()
        .map(|current| {
            let change = match (previous, *current) {
                (Some(prev), Some(cur)) if prev != 0.0 => Some(cur / prev - 1.0),
                (Some(prev), None) if prev != 0.0 => Some(0.0),
                _ => None,
            };
            if current.is_some() {
                previous = *current;
            }
            change
        })
        .collect()
}

/// Adds `SMA_{window}` and `Price_Change`, both derived from `Close_Bid`.
pub fn add_engineered_features(frame: &mut GoldFrame, window: usize) -> Result<String> {
    let close = frame.column(CLOSE_BID)?.values.clone();
    let sma_name = format!("SMA_{}", window);

    let sma = simple_moving_average(&close, window)?;
    let change = percent_change(&close);

    frame.insert_column(&sma_name, sma)?;
    frame.insert_column(PRICE_CHANGE, change)?;
    info!("Engineered features {} and {}", sma_name, PRICE_CHANGE);
    Ok(sma_name)
}

/// Row indices of a train/test split.
#[derive(Debug, Clone, PartialEq)]
pub struct SplitIndices {
    pub train: Vec<usize>,
    pub test: Vec<usize>,
}

fn test_count(n: usize, test_size: f64) -> Result<usize> {
    if !(test_size > 0.0 && test_size < 1.0) {
        return Err(AnalysisError::InvalidParameter(format!(
            "test_size must be in (0, 1), got {}",
            test_size
        )));
    }
    let n_test = (n as f64 * test_size).ceil() as usize;
    if n_test == 0 || n_test >= n {
        return Err(AnalysisError::EmptyDataset(format!(
            "cannot split {} rows with test_size {}",
            n, test_size
        )));
    }
    Ok(n_test)
}

/// Keeps time order: the last `ceil(n * test_size)` rows are the test set.
pub fn sequential_split(n: usize, test_size: f64) -> Result<SplitIndices> {
    let n_train = n - test_count(n, test_size)?;
    Ok(SplitIndices {
        train: (0..n_train).collect(),
        test: (n_train..n).collect(),
    })
}

/// Same sizes as `sequential_split`, rows permuted by a seeded RNG.
pub fn shuffled_split(n: usize, test_size: f64, seed: u64) -> Result<SplitIndices> {
    let n_test = test_count(n, test_size)?;
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut order: Vec<usize> = (0..n).collect();
    order.shuffle(&mut rng);

    let test = order.split_off(n - n_test);
    Ok(SplitIndices { train: order, test })
}

/// Z-score scaling with statistics taken from the fitted rows only.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StandardScaler {
    mean: Option<Array1<f64>>,
    scale: Option<Array1<f64>>,
}

impl StandardScaler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fit(&mut self, data: &Array2<f64>) -> Result<()> {
        if data.nrows() == 0 {
            return Err(AnalysisError::EmptyDataset("scaler input".to_string()));
        }
        let mean = data.mean_axis(Axis(0)).ok_or_else(|| {
            AnalysisError::EmptyDataset("scaler input".to_string())
        })?;
        // population std, constant columns left unscaled
        let scale = data
            .std_axis(Axis(0), 0.0)
            .mapv(|v| if v.abs() < 1e-12 { 1.0 } else { v });

        self.mean = Some(mean);
        self.scale = Some(scale);
        Ok(())
    }

    pub fn transform(&self, data: &Array2<f64>) -> Result<Array2<f64>> {
        let (mean, scale) = match (&self.mean, &self.scale) {
            (Some(mean), Some(scale)) => (mean, scale),
            _ => return Err(AnalysisError::NotFitted("StandardScaler")),
        };
        if data.ncols() != mean.len() {
            return Err(AnalysisError::ShapeMismatch {
                expected: mean.len(),
                found: data.ncols(),
            });
        }
        Ok((data - mean) / scale)
    }

    pub fn fit_transform(&mut self, data: &Array2<f64>) -> Result<Array2<f64>> {
        self.fit(data)?;
        self.transform(data)
    }

    pub fn mean(&self) -> Option<&Array1<f64>> {
        self.mean.as_ref()
    }

    pub fn scale(&self) -> Option<&Array1<f64>> {
        self.scale.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Column;
    use ndarray::array;

    fn some(values: &[f64]) -> Vec<Option<f64>> {
        values.iter().copied().map(Some).collect()
    }

    #[test]
    fn test_moving_average() {
        let values = some(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let sma = simple_moving_average(&values, 5).unwrap();
        assert_eq!(sma, vec![None, None, None, None, Some(3.0), Some(4.0)]);
    }

    #[test]
    fn test_moving_average_with_gap() {
        let values = vec![Some(1.0), None, Some(3.0), Some(5.0)];
        let sma = simple_moving_average(&values, 2).unwrap();
        assert_eq!(sma, vec![None, None, None, Some(4.0)]);
        assert!(simple_moving_average(&values, 0).is_err());
    }

    #[test]
    fn test_percent_change() {
        let values = vec![Some(100.0), Some(110.0), None, Some(99.0), Some(0.0), Some(5.0)];
        let change = percent_change(&values);
        assert_eq!(change[0], None);
        assert!((change[1].unwrap() - 0.10).abs() < 1e-12);
        // forward filled gap
        assert_eq!(change[2], Some(0.0));
        assert!((change[3].unwrap() + 0.10).abs() < 1e-12);
        assert!((change[4].unwrap() + 1.0).abs() < 1e-12);
        // previous value was zero
        assert_eq!(change[5], None);
    }

    #[test]
    fn test_add_engineered_features() {
        let mut frame = GoldFrame::from_columns(vec![Column::new(
            CLOSE_BID,
            some(&[1.0, 2.0, 3.0, 4.0, 5.0]),
        )])
        .unwrap();
        let name = add_engineered_features(&mut frame, 5).unwrap();

        assert_eq!(name, "SMA_5");
        assert_eq!(frame.column("SMA_5").unwrap().values[4], Some(3.0));
        assert_eq!(frame.column(PRICE_CHANGE).unwrap().values[0], None);
        assert_eq!(frame.column(PRICE_CHANGE).unwrap().values[1], Some(1.0));
    }

    #[test]
    fn test_sequential_split() {
        let split = sequential_split(10, 0.2).unwrap();
        assert_eq!(split.train, (0..8).collect::<Vec<_>>());
        assert_eq!(split.test, vec![8, 9]);

        // rounds the test set up like scikit-learn
        let split = sequential_split(11, 0.2).unwrap();
        assert_eq!(split.test.len(), 3);

        assert!(sequential_split(1, 0.2).is_err());
        assert!(sequential_split(10, 0.0).is_err());
    }

    #[test]
    fn test_shuffled_split_is_seeded_permutation() {
        let a = shuffled_split(50, 0.2, 42).unwrap();
        let b = shuffled_split(50, 0.2, 42).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.train.len(), 40);
        assert_eq!(a.test.len(), 10);

        let mut all: Vec<usize> = a.train.iter().chain(&a.test).copied().collect();
        all.sort_unstable();
        assert_eq!(all, (0..50).collect::<Vec<_>>());
    }

    #[test]
    fn test_standard_scaler() {
        let train = array![[1.0, 10.0], [3.0, 10.0]];
        let mut scaler = StandardScaler::new();
        let scaled = scaler.fit_transform(&train).unwrap();

        assert_eq!(scaled, array![[-1.0, 0.0], [1.0, 0.0]]);
        assert_eq!(scaler.mean().unwrap(), &array![2.0, 10.0]);

        // test rows reuse the training statistics
        let test = scaler.transform(&array![[5.0, 12.0]]).unwrap();
        assert_eq!(test, array![[3.0, 2.0]]);

        assert!(scaler.transform(&array![[1.0]]).is_err());
        assert!(matches!(
            StandardScaler::new().transform(&train),
            Err(AnalysisError::NotFitted(_))
        ));
    }
}
