// src/pipeline.rs

use chrono::{DateTime, Utc};
use log::{info, warn};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use crate::config::AnalysisConfig;
use crate::error::Result;
use crate::models::columns::{
    CLOSE_BID, HIGH_BID, LOW_BID, OPEN_BID, PRICE_CHANGE, VOLUME_ASK, VOLUME_BID, VOLUME_DELTA,
    Y_HIGH_BID, Y_LOW_ASK,
};
use crate::models::{FitOptions, GoldFrame, NetworkConfig, NeuralNetwork, RandomForest, TrainingHistory};
use crate::utils::metrics::{binned_confusion, median_threshold_confusion, BinnedConfusion, ConfusionMatrix, RegressionMetrics};
use crate::utils::{data_processing, plotting, stats};

pub const REPORT_FILE: &str = "report.json";

const HISTOGRAM_COLUMNS: [&str; 5] = [OPEN_BID, CLOSE_BID, VOLUME_BID, VOLUME_ASK, VOLUME_DELTA];
const NETWORK_TARGETS: [&str; 2] = [Y_HIGH_BID, Y_LOW_ASK];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForestReport {
    pub features: Vec<String>,
    pub target: String,
    pub train_rows: usize,
    pub test_rows: usize,
    pub dropped_rows: usize,
    pub metrics: RegressionMetrics,
    pub feature_importances: Vec<(String, f64)>,
    pub confusion: BinnedConfusion,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetConfusion {
    pub target: String,
    pub threshold: f64,
    pub matrix: ConfusionMatrix,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkReport {
    pub features: Vec<String>,
    pub targets: Vec<String>,
    pub train_rows: usize,
    pub test_rows: usize,
    pub dropped_rows: usize,
    pub parameters: usize,
    pub test_loss: f64,
    pub test_mae: f64,
    pub history: TrainingHistory,
    pub confusion: Vec<TargetConfusion>,
    pub model_path: PathBuf,
}

/// Everything one run produced, written as `report.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub generated_at: DateTime<Utc>,
    pub data_path: PathBuf,
    pub rows: usize,
    pub missing_values: Vec<(String, usize)>,
    pub forest: ForestReport,
    pub network: NetworkReport,
    pub plots: Vec<PathBuf>,
}

/// Relative model paths land in the output directory.
pub fn resolve_model_path(config: &AnalysisConfig) -> PathBuf {
    if config.model_path.is_absolute() {
        config.model_path.clone()
    } else {
        config.output_dir.join(&config.model_path)
    }
}

pub fn run(config: &AnalysisConfig) -> Result<AnalysisReport> {
    config.validate()?;
    fs::create_dir_all(&config.output_dir)?;
    let mut plots = Vec::new();

    info!("Loading {}", config.data_path.display());
    let frame = GoldFrame::from_path(&config.data_path)?;
    let missing = explore(&frame, config, &mut plots)?;

    let forest = run_forest(&frame, config, &mut plots)?;
    let network = run_network(&frame, config, &mut plots)?;

    let report = AnalysisReport {
        generated_at: Utc::now(),
        data_path: config.data_path.clone(),
        rows: frame.n_rows(),
        missing_values: missing,
        forest,
        network,
        plots,
    };
    write_report(&report, &config.output_dir.join(REPORT_FILE))?;
    Ok(report)
}

fn explore(frame: &GoldFrame, config: &AnalysisConfig, plots: &mut Vec<PathBuf>) -> Result<Vec<(String, usize)>> {
    println!("{}", frame.head(5));
    println!("{}", stats::info(frame));
    println!("{}", stats::describe(frame));

    let missing = stats::missing_values(frame);
    println!("Missing values:");
    for (name, count) in &missing {
        println!("{:<16} {}", name, count);
    }

    if config.plots {
        let series = HISTOGRAM_COLUMNS
            .iter()
            .map(|name| -> Result<(&str, Vec<f64>)> { Ok((*name, frame.column(name)?.present())) })
            .collect::<Result<Vec<_>>>()?;
        let path = config.output_dir.join("feature_histograms.svg");
        plotting::plot_histograms(&series, 10, (2, 3), &path)?;
        plots.push(path);

        let path = config.output_dir.join("correlation_matrix.svg");
        plotting::plot_correlation_heatmap(&stats::correlation_matrix(frame), &path)?;
        plots.push(path);
    }
    Ok(missing)
}

/// Rows with a value in every named column, logging how many were dropped.
fn usable_rows(frame: &GoldFrame, names: &[&str], stage: &str) -> Result<(Vec<usize>, usize)> {
    let rows = frame.complete_rows(names)?;
    let dropped = frame.n_rows() - rows.len();
    if dropped > 0 {
        warn!("{}: dropped {} incomplete rows", stage, dropped);
    }
    Ok((rows, dropped))
}

fn select(rows: &[usize], positions: &[usize]) -> Vec<usize> {
    positions.iter().map(|&p| rows[p]).collect()
}

fn run_forest(frame: &GoldFrame, config: &AnalysisConfig, plots: &mut Vec<PathBuf>) -> Result<ForestReport> {
    let mut featured = frame.clone();
    let sma = data_processing::add_engineered_features(&mut featured, config.sma_window)?;

    let features = [OPEN_BID, HIGH_BID, LOW_BID, CLOSE_BID, VOLUME_BID, sma.as_str(), PRICE_CHANGE];
    // the target is Close_Bid, already among the features
    let (rows, dropped) = usable_rows(&featured, &features, "random forest")?;

    let split = data_processing::sequential_split(rows.len(), config.test_size)?;
    let train_rows = select(&rows, &split.train);
    let test_rows = select(&rows, &split.test);

    let mut scaler = data_processing::StandardScaler::new();
    let x_train = scaler.fit_transform(&featured.to_matrix(&features, &train_rows)?)?;
    let x_test = scaler.transform(&featured.to_matrix(&features, &test_rows)?)?;
    let y_train = target_values(&featured, CLOSE_BID, &train_rows)?;
    let y_test = target_values(&featured, CLOSE_BID, &test_rows)?;

    let mut forest_config = config.forest.clone();
    forest_config.seed = config.seed;
    info!(
        "Fitting random forest with {} trees on {} rows",
        forest_config.n_estimators,
        train_rows.len()
    );
    let mut forest = RandomForest::new(forest_config);
    forest.fit(&x_train, &y_train)?;
    let predictions = forest.predict(&x_test)?;

    let metrics = RegressionMetrics::compute(&y_test, &predictions)?;
    println!("Random Forest MAE: {}", metrics.mae);
    println!("Random Forest MSE: {}", metrics.mse);
    println!("Random Forest R²: {}", metrics.r2);

    let confusion = binned_confusion(&y_test, &predictions, config.confusion_bins)?;
    println!("Random Forest binned confusion matrix:\n{}", confusion.matrix);
    if config.plots {
        let path = config.output_dir.join("rf_confusion_matrix.svg");
        plotting::plot_confusion_matrix(&confusion.matrix, "Random Forest Confusion Matrix", &path)?;
        plots.push(path);
    }

    let feature_importances = features
        .iter()
        .map(|f| f.to_string())
        .zip(forest.feature_importances().iter().copied())
        .collect();

    Ok(ForestReport {
        features: features.iter().map(|f| f.to_string()).collect(),
        target: CLOSE_BID.to_string(),
        train_rows: train_rows.len(),
        test_rows: test_rows.len(),
        dropped_rows: dropped,
        metrics,
        feature_importances,
        confusion,
    })
}

fn target_values(frame: &GoldFrame, name: &str, rows: &[usize]) -> Result<Vec<f64>> {
    Ok(frame.to_matrix(&[name], rows)?.column(0).to_vec())
}

fn run_network(frame: &GoldFrame, config: &AnalysisConfig, plots: &mut Vec<PathBuf>) -> Result<NetworkReport> {
    let inputs = frame.without_columns(&NETWORK_TARGETS)?;
    let features: Vec<&str> = inputs.column_names();
    let mut needed = features.clone();
    needed.extend(NETWORK_TARGETS);
    let (rows, dropped) = usable_rows(frame, &needed, "neural network")?;

    let split = data_processing::shuffled_split(rows.len(), config.test_size, config.seed)?;
    let train_rows = select(&rows, &split.train);
    let test_rows = select(&rows, &split.test);

    let mut scaler = data_processing::StandardScaler::new();
    let x_train = scaler.fit_transform(&frame.to_matrix(&features, &train_rows)?)?;
    let x_test = scaler.transform(&frame.to_matrix(&features, &test_rows)?)?;
    let y_train = frame.to_matrix(&NETWORK_TARGETS, &train_rows)?;
    let y_test = frame.to_matrix(&NETWORK_TARGETS, &test_rows)?;

    let settings = &config.network;
    let mut network = NeuralNetwork::new(
        NetworkConfig {
            input_size: features.len(),
            hidden_layers: settings.hidden_layers.clone(),
            output_size: NETWORK_TARGETS.len(),
            learning_rate: settings.learning_rate,
        },
        config.seed,
    )?;
    println!("{}", network.summary());

    let history = network.fit(
        &x_train,
        &y_train,
        FitOptions {
            epochs: settings.epochs,
            batch_size: settings.batch_size,
            validation_split: settings.validation_split,
        },
    )?;

    let (test_loss, test_mae) = network.evaluate(&x_test, &y_test)?;
    println!("Test Loss: {}", test_loss);
    println!("Test Mean Absolute Error: {}", test_mae);

    let model_path = resolve_model_path(config);
    if let Some(parent) = model_path.parent() {
        fs::create_dir_all(parent)?;
    }
    network.save_to_file(&model_path)?;
    info!("Saved model to {}", model_path.display());

    if config.plots {
        let path = config.output_dir.join("ann_loss.svg");
        plotting::plot_history(&history.loss, &history.val_loss, "Loss", &path)?;
        plots.push(path);
        let path = config.output_dir.join("ann_mae.svg");
        plotting::plot_history(&history.mae, &history.val_mae, "Mean Absolute Error", &path)?;
        plots.push(path);
    }

    let predictions = network.predict(&x_test)?;
    let confusion = NETWORK_TARGETS
        .iter()
        .enumerate()
        .map(|(j, target)| target_confusion(frame, target, j, &y_test, &predictions, config, plots))
        .collect::<Result<Vec<_>>>()?;

    Ok(NetworkReport {
        features: features.iter().map(|f| f.to_string()).collect(),
        targets: NETWORK_TARGETS.iter().map(|t| t.to_string()).collect(),
        train_rows: train_rows.len(),
        test_rows: test_rows.len(),
        dropped_rows: dropped,
        parameters: network.num_parameters(),
        test_loss,
        test_mae,
        history,
        confusion,
        model_path,
    })
}

fn target_confusion(
    frame: &GoldFrame,
    target: &str,
    index: usize,
    y_test: &Array2<f64>,
    predictions: &Array2<f64>,
    config: &AnalysisConfig,
    plots: &mut Vec<PathBuf>,
) -> Result<TargetConfusion> {
    // threshold taken over the whole column, not only the test rows
    let reference = frame.column(target)?.present();
    let (threshold, matrix) = median_threshold_confusion(
        &reference,
        &y_test.column(index).to_vec(),
        &predictions.column(index).to_vec(),
    )?;
    println!("Confusion matrix for {} (threshold {:.6}):\n{}", target, threshold, matrix);

    if config.plots {
        let path = config.output_dir.join(format!("ann_confusion_{}.svg", target));
        plotting::plot_confusion_matrix(&matrix, &format!("Confusion Matrix for {}", target), &path)?;
        plots.push(path);
    }

    Ok(TargetConfusion {
        target: target.to_string(),
        threshold,
        matrix,
    })
}

fn write_report(report: &AnalysisReport, path: &Path) -> Result<()> {
    let writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(writer, report)?;
    info!("Wrote report to {}", path.display());
    Ok(())
}

/// Reads a report written by `run`.
pub fn load_report<P: AsRef<Path>>(path: P) -> Result<AnalysisReport> {
    let file = File::open(path)?;
    Ok(serde_json::from_reader(std::io::BufReader::new(file))?)
}
