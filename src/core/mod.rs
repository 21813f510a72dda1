//! Core evaluation modules

pub mod contingency;
pub mod evaluate;
pub mod extent;
pub mod harmonize;
pub mod metrics;
pub mod rasterize;
pub mod reproject;
pub mod water_bodies;

// Re-export main types
pub use contingency::{Classification, ContingencyClassifier, ContingencyMap};
pub use evaluate::{partition_outcomes, CaseReport, EvaluationParams, FimEvaluator};
pub use extent::{Extent, ExtentInputs, ExtentStrategy};
pub use harmonize::{HarmonizeParams, Harmonizer};
pub use metrics::{metrics_from_contingency_file, ConfusionCounts, EvaluationMetrics, MetricsTable};
pub use rasterize::{clip, rasterize, BurnRule};
pub use water_bodies::WaterBodyMask;
