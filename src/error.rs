use thiserror::Error;

#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Column not found: {0}")]
    MissingColumn(String),

    #[error("Dataset is empty: {0}")]
    EmptyDataset(String),

    #[error("Shape mismatch: expected {expected}, found {found}")]
    ShapeMismatch { expected: usize, found: usize },

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("{0} used before fit")]
    NotFitted(&'static str),

    #[error("Plotting failed: {0}")]
    Plot(String),
}

pub type Result<T> = std::result::Result<T, AnalysisError>;
