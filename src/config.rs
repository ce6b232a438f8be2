use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{AnalysisError, Result};
use crate::models::ForestConfig;

pub const DEFAULT_CONFIG_FILE: &str = "gold_analysis.toml";

/// Settings for the feed-forward network run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkSettings {
    pub hidden_layers: Vec<usize>,
    pub epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f64,
    pub validation_split: f64,
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            hidden_layers: vec![128, 64, 32],
            epochs: 10,
            batch_size: 32,
            learning_rate: 0.001,
            validation_split: 0.2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub data_path: PathBuf,
    pub output_dir: PathBuf,
    pub model_path: PathBuf,
    /// Drives the shuffled split, network initialisation and the forest.
    pub seed: u64,
    pub test_size: f64,
    pub sma_window: usize,
    pub confusion_bins: usize,
    pub plots: bool,
    pub forest: ForestConfig,
    pub network: NetworkSettings,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            data_path: PathBuf::from("GOLD_2022_normalised_NEW-1000.csv"),
            output_dir: PathBuf::from("output"),
            model_path: PathBuf::from("ANN_GOLD_model.json"),
            seed: 42,
            test_size: 0.2,
            sma_window: 5,
            confusion_bins: 10,
            plots: true,
            forest: ForestConfig::default(),
            network: NetworkSettings::default(),
        }
    }
}

impl AnalysisConfig {
    /// Loads from `GOLD_CONFIG` (or `gold_analysis.toml`) and `GOLD_*` variables.
    pub fn from_env() -> Result<Self> {
        let path = std::env::var("GOLD_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());
        Self::from_file(&path)
    }

    /// A missing file is not an error: defaults and the environment still apply.
    pub fn from_file(path: &str) -> Result<Self> {
        let cfg = Config::builder()
            .add_source(File::with_name(path).required(false))
            .add_source(
                Environment::with_prefix("GOLD")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Self = cfg.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.test_size > 0.0 && self.test_size < 1.0) {
            return Err(invalid(format!("test_size must be in (0, 1), got {}", self.test_size)));
        }
        if self.sma_window == 0 {
            return Err(invalid("sma_window must be positive".to_string()));
        }
        if self.confusion_bins < 2 {
            return Err(invalid(format!(
                "confusion_bins must be at least 2, got {}",
                self.confusion_bins
            )));
        }
        if self.forest.n_estimators == 0 {
            return Err(invalid("forest.n_estimators must be positive".to_string()));
        }

        let network = &self.network;
        if network.epochs == 0 || network.batch_size == 0 {
            return Err(invalid("network epochs and batch_size must be positive".to_string()));
        }
        if !(network.validation_split >= 0.0 && network.validation_split < 1.0) {
            return Err(invalid(format!(
                "network.validation_split must be in [0, 1), got {}",
                network.validation_split
            )));
        }
        if network.learning_rate <= 0.0 {
            return Err(invalid("network.learning_rate must be positive".to_string()));
        }
        if network.hidden_layers.iter().any(|&units| units == 0) {
            return Err(invalid("network.hidden_layers cannot contain empty layers".to_string()));
        }
        Ok(())
    }
}

fn invalid(message: String) -> AnalysisError {
    AnalysisError::InvalidParameter(message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let config = AnalysisConfig::default();
        assert_eq!(config.seed, 42);
        assert_eq!(config.forest.n_estimators, 100);
        assert_eq!(config.network.hidden_layers, vec![128, 64, 32]);
        assert_eq!(config.network.epochs, 10);
        assert_eq!(config.network.batch_size, 32);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        std::fs::write(
            &path,
            "data_path = \"gold.csv\"\nplots = false\n\n[network]\nepochs = 3\n",
        )
        .unwrap();

        let config = AnalysisConfig::from_file(path.to_str().unwrap()).unwrap();
        assert_eq!(config.data_path, PathBuf::from("gold.csv"));
        assert!(!config.plots);
        assert_eq!(config.network.epochs, 3);
        // untouched nested fields keep their defaults
        assert_eq!(config.network.batch_size, 32);
        assert_eq!(config.forest.n_estimators, 100);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = AnalysisConfig::default();
        config.test_size = 1.0;
        assert!(matches!(config.validate(), Err(AnalysisError::InvalidParameter(_))));

        let mut config = AnalysisConfig::default();
        config.network.validation_split = 1.0;
        assert!(config.validate().is_err());

        let mut config = AnalysisConfig::default();
        config.confusion_bins = 1;
        assert!(config.validate().is_err());
    }
}
