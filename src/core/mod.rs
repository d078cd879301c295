//! Core NDVI processing modules

pub mod sources;
pub mod ndvi;
pub mod composite;
pub mod resample;
pub mod sampler;
pub mod pipeline;
pub mod session;

// Re-export main types
pub use sources::{Calibration, ImageSourceDescriptor, SourceSelection, SourceSelector};
pub use ndvi::{NdviParams, NdviTransformer, normalized_difference};
pub use composite::{AggregationParams, MonthFilterPolicy, MonthlyAggregator, TimestampYearPolicy};
pub use sampler::{ChartData, ChartSeries, Sampler, SeriesPoint};
pub use pipeline::{AnalysisReport, MonthlyNdviPipeline};
pub use session::{AnalysisSession, CaptureState, SessionCommand, SessionEvent};
