use crate::config::PipelineConfig;
use crate::core::sources::ImageSourceDescriptor;
use crate::io::backend::ImageryBackend;
use crate::io::scene::SceneRecord;
use crate::types::{BoundingBox, DateRange, NdviError, NdviResult, RasterImage};
use std::time::Duration;

/// Imagery backend reached over HTTP.
///
/// Issues `GET {base}/scenes?catalog=..&start=..&end=..&bbox=..` and expects a
/// JSON array of scene records.
pub struct HttpImageryBackend {
    base_url: String,
    client: reqwest::blocking::Client,
}

impl HttpImageryBackend {
    pub fn new(base_url: &str, timeout: Duration) -> NdviResult<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("ndvine/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| NdviError::BackendQuery(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    /// Backend at the configured `backend_url`
    pub fn from_config(config: &PipelineConfig) -> NdviResult<Self> {
        let base_url = config.backend_url.as_deref().ok_or_else(|| {
            NdviError::UserInput("No imagery backend URL configured".to_string())
        })?;
        Self::new(base_url, Duration::from_secs(config.http_timeout_secs))
    }

    pub fn scenes_url(&self) -> String {
        format!("{}/scenes", self.base_url)
    }

    /// Query parameters for one catalog request
    pub fn query_params(
        source: &ImageSourceDescriptor,
        range: &DateRange,
        bounds: &BoundingBox,
    ) -> Vec<(&'static str, String)> {
        vec![
            ("catalog", source.catalog_id.clone()),
            ("start", range.start.format("%Y-%m-%d").to_string()),
            ("end", range.end.format("%Y-%m-%d").to_string()),
            (
                "bbox",
                format!(
                    "{},{},{},{}",
                    bounds.min_lon, bounds.min_lat, bounds.max_lon, bounds.max_lat
                ),
            ),
        ]
    }
}

impl ImageryBackend for HttpImageryBackend {
    fn query(
        &self,
        source: &ImageSourceDescriptor,
        range: &DateRange,
        bounds: &BoundingBox,
    ) -> NdviResult<Vec<RasterImage>> {
        let url = self.scenes_url();
        log::info!("Querying {} for {} scenes", url, source.catalog_id);

        let response = self
            .client
            .get(&url)
            .query(&Self::query_params(source, range, bounds))
            .send()
            .map_err(|e| NdviError::BackendQuery(format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(NdviError::BackendQuery(format!(
                "HTTP {} {}: {}",
                status.as_u16(),
                status.canonical_reason().unwrap_or(""),
                url
            )));
        }

        let records: Vec<SceneRecord> = response.json().map_err(|e| {
            if e.is_decode() {
                NdviError::InvalidFormat(format!("Malformed scene list from {}: {}", url, e))
            } else {
                NdviError::BackendQuery(format!("Failed to read response body: {}", e))
            }
        })?;

        log::debug!("Received {} scene records for {}", records.len(), source.catalog_id);
        records.into_iter().map(SceneRecord::into_image).collect()
    }

    fn name(&self) -> &str {
        "HTTP backend"
    }
}
