//! WellFlow Steps - the analysis step handlers
//!
//! One [`StepHandler`](wellflow_core::StepHandler) per tool of the
//! production-analysis pipeline. Most of them are display generators with
//! placeholder figures; the data loader reads the monthly data file, the
//! three algorithm steps derive their conclusions from it and the approval
//! step queues the result for review.

#![warn(unreachable_pub)]

pub mod algorithms;
pub mod approval;
pub mod cleaner;
pub mod correlation;
pub mod dataset;
pub mod features;
pub mod inference;
pub mod loader;
pub mod report;

pub use algorithms::{InjectionOptimizer, RiskScan, RiskScanner, TrendForecast};
pub use approval::ApprovalFlow;
pub use cleaner::DataCleaner;
pub use correlation::CorrelationAnalysis;
pub use dataset::{Dataset, DatasetError};
pub use features::FeatureEngineering;
pub use inference::ModelInference;
pub use loader::DataLoader;
pub use report::ReportGenerator;

use std::path::PathBuf;
use std::sync::Arc;
use wellflow_core::{ApprovalSink, StepRegistry};

/// Registry with every built-in step
#[must_use]
pub fn default_registry(sink: Arc<dyn ApprovalSink>, data_dir: impl Into<PathBuf>) -> StepRegistry {
    let mut registry = StepRegistry::new();
    registry
        .register(Arc::new(DataLoader::new(data_dir)))
        .register(Arc::new(DataCleaner))
        .register(Arc::new(FeatureEngineering))
        .register(Arc::new(CorrelationAnalysis))
        .register(Arc::new(ModelInference))
        .register(Arc::new(TrendForecast))
        .register(Arc::new(RiskScanner))
        .register(Arc::new(InjectionOptimizer))
        .register(Arc::new(ReportGenerator))
        .register(Arc::new(ApprovalFlow::new(sink)));
    registry
}

/// `value` rounded to `places` decimals, so it reads back unchanged from JSON
pub(crate) fn round_to(value: f64, places: i32) -> f64 {
    let scale = 10f64.powi(places);
    (value * scale).round() / scale
}

#[cfg(test)]
mod tests {
    use super::*;
    use wellflow_core::{MemoryApprovalSink, StepId};

    #[test]
    fn default_registry_covers_every_step() {
        let registry = default_registry(Arc::new(MemoryApprovalSink::new()), "data");
        assert_eq!(registry.ids(), StepId::ALL.to_vec());
    }
}
