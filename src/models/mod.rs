// src/models/mod.rs

pub mod forest;
pub mod frame;
pub mod network;

/// Column names of the gold bid/ask dataset.
pub mod columns {
    pub const OPEN_BID: &str = "Open_Bid";
    pub const HIGH_BID: &str = "High_Bid";
    pub const LOW_BID: &str = "Low_Bid";
    pub const CLOSE_BID: &str = "Close_Bid";
    pub const VOLUME_BID: &str = "Volume_Bid";
    pub const VOLUME_ASK: &str = "Volume_Ask";
    pub const VOLUME_DELTA: &str = "Volume_Delta";
    pub const Y_HIGH_BID: &str = "Y_High_Bid";
    pub const Y_LOW_ASK: &str = "Y_Low_Ask";
    pub const PRICE_CHANGE: &str = "Price_Change";
}

// Re-export model components
pub use forest::{ForestConfig, RandomForest};
pub use frame::{Column, GoldFrame};
pub use network::{FitOptions, NetworkConfig, NeuralNetwork, TrainingHistory};
