//! ndvine: monthly NDVI composites from multi-sensor optical imagery
//!
//! Selects Landsat 8/9 and Sentinel-2 collections for a calendar year, turns
//! every scene into a calibrated NDVI raster, reduces the collection to twelve
//! per-pixel median composites and samples them into chart-ready series for an
//! area of interest and user-picked comparison points.

pub mod types;
pub mod config;
pub mod core;
pub mod io;

#[cfg(feature = "python")]
mod python;

// Re-export main types and functions for easier access
pub use types::{
    AreaOfInterest, BoundingBox, ComparisonPoint, DateRange, GeoPoint, GeoTransform, MaskedRaster,
    MonthlyComposite, MonthlyStack, NdviCollection, NdviError, NdviRaster, NdviResult,
    RasterGrid, RasterImage,
};

pub use config::PipelineConfig;
pub use crate::core::{
    AnalysisReport, AnalysisSession, ImageSourceDescriptor, MonthlyAggregator, MonthlyNdviPipeline,
    NdviTransformer, Sampler, SessionCommand, SourceSelector,
};
pub use io::{DirectoryBackend, GeoTiffExporter, HttpImageryBackend, ImageryBackend, InMemoryBackend};
