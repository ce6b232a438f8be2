use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use gold_market_analysis::config::{AnalysisConfig, NetworkSettings};
use gold_market_analysis::models::ForestConfig;
use gold_market_analysis::models::NeuralNetwork;
use gold_market_analysis::pipeline::{self, REPORT_FILE};
use tempfile::tempdir;

const HEADER: &str = "Date,Open_Bid,High_Bid,Low_Bid,Close_Bid,Volume_Bid,Volume_Ask,Volume_Delta,Y_High_Bid,Y_Low_Ask";

/// Smooth synthetic bid/ask series; one row has a missing volume.
fn write_csv(path: &Path, rows: usize) {
    let mut csv = String::from(HEADER);
    csv.push('\n');
    for i in 0..rows {
        let t = i as f64;
        let close = 0.5 + 0.3 * (t / 9.0).sin() + 0.001 * t;
        let open = close - 0.01 * (t / 4.0).cos();
        let high = close.max(open) + 0.02;
        let low = close.min(open) - 0.02;
        let volume_bid = 0.4 + 0.2 * (t / 7.0).cos();
        let volume_ask = 0.45 + 0.15 * (t / 5.0).sin();
        let delta = volume_bid - volume_ask;
        let volume_cell = if i == 37 { String::new() } else { format!("{:.6}", volume_bid) };
        writeln!(
            csv,
            "2022-01-{:02} {:02}:00,{:.6},{:.6},{:.6},{:.6},{},{:.6},{:.6},{:.6},{:.6}",
            i / 24 + 1,
            i % 24,
            open,
            high,
            low,
            close,
            volume_cell,
            volume_ask,
            delta,
            high + 0.01,
            low - 0.01
        )
        .unwrap();
    }
    fs::write(path, csv).unwrap();
}

fn small_config(root: &Path, plots: bool) -> AnalysisConfig {
    let data_path = root.join("gold.csv");
    write_csv(&data_path, 120);
    AnalysisConfig {
        data_path,
        output_dir: root.join("out"),
        plots,
        forest: ForestConfig {
            n_estimators: 10,
            ..ForestConfig::default()
        },
        network: NetworkSettings {
            hidden_layers: vec![16, 8],
            epochs: 3,
            batch_size: 16,
            ..NetworkSettings::default()
        },
        ..AnalysisConfig::default()
    }
}

#[test]
fn test_full_run_writes_report_model_and_plots() {
    let dir = tempdir().unwrap();
    let config = small_config(dir.path(), true);

    let report = pipeline::run(&config).unwrap();

    assert_eq!(report.rows, 120);
    assert!(report.forest.metrics.mae.is_finite());
    assert!(report.forest.metrics.mse >= 0.0);
    assert!(report.forest.metrics.r2 <= 1.0);
    // four SMA warm-up rows, one missing change and the row with the gap
    assert!(report.forest.dropped_rows >= 4);
    assert_eq!(report.forest.features.len(), 7);
    assert_eq!(report.forest.confusion.matrix.total(), report.forest.test_rows);

    assert_eq!(report.network.dropped_rows, 1);
    assert_eq!(report.network.test_rows, 24);
    assert_eq!(report.network.features.len(), 7);
    assert_eq!(report.network.history.loss.len(), 3);
    assert_eq!(report.network.history.val_loss.len(), 3);
    assert!(report.network.test_loss.is_finite());
    assert_eq!(report.network.confusion.len(), 2);
    for target in &report.network.confusion {
        assert_eq!(target.matrix.labels, vec![0, 1]);
        assert_eq!(target.matrix.total(), 24);
    }

    assert_eq!(report.plots.len(), 7);
    for plot in &report.plots {
        assert!(plot.exists(), "missing {}", plot.display());
    }

    let model = NeuralNetwork::load_from_file(&report.network.model_path, 42).unwrap();
    assert_eq!(model.num_parameters(), report.network.parameters);

    let saved = pipeline::load_report(config.output_dir.join(REPORT_FILE)).unwrap();
    assert_eq!(saved.forest.metrics, report.forest.metrics);
    assert_eq!(saved.network.history.loss, report.network.history.loss);
}

#[test]
fn test_run_without_plots_is_deterministic() {
    let dir = tempdir().unwrap();
    let config = small_config(dir.path(), false);

    let first = pipeline::run(&config).unwrap();
    let second = pipeline::run(&config).unwrap();

    assert!(first.plots.is_empty());
    assert_eq!(first.forest.metrics, second.forest.metrics);
    assert_eq!(first.network.test_loss, second.network.test_loss);
}

#[test]
fn test_missing_data_file_is_an_error() {
    let dir = tempdir().unwrap();
    let config = AnalysisConfig {
        data_path: dir.path().join("absent.csv"),
        output_dir: dir.path().join("out"),
        ..AnalysisConfig::default()
    };
    assert!(pipeline::run(&config).is_err());
}
