// src/utils/mod.rs

pub mod data_processing;
pub mod metrics;
pub mod plotting;
pub mod stats;

pub use data_processing::{
    add_engineered_features,
    percent_change,
    sequential_split,
    shuffled_split,
    simple_moving_average,
    SplitIndices,
    StandardScaler,
};
pub use metrics::{
    binned_confusion,
    median_threshold_confusion,
    BinnedConfusion,
    ConfusionMatrix,
    RegressionMetrics,
};
pub use stats::{correlation_matrix, describe, info, missing_values};
