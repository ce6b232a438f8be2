// src/lib.rs

pub mod config;
pub mod error;
pub mod models;
pub mod pipeline;
pub mod utils;

pub use config::AnalysisConfig;
pub use error::{AnalysisError, Result};
pub use pipeline::{run, AnalysisReport};
