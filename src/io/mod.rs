//! Imagery backends, scene records and raster export

pub mod backend;
pub mod scene;
pub mod directory;
pub mod http;
pub mod export;

pub use backend::{ImageryBackend, InMemoryBackend, RetryParams, RetryingBackend};
pub use scene::SceneRecord;
pub use directory::DirectoryBackend;
pub use http::HttpImageryBackend;
pub use export::{ExportParams, ExportPlan, GeoTiffExporter};
