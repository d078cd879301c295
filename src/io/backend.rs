use crate::core::sources::ImageSourceDescriptor;
use crate::types::{BoundingBox, DateRange, NdviError, NdviResult, RasterImage};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Catalog access to satellite imagery.
///
/// Implementations return every scene of `source` acquired within `range` whose
/// footprint intersects `bounds`.
pub trait ImageryBackend {
    fn query(
        &self,
        source: &ImageSourceDescriptor,
        range: &DateRange,
        bounds: &BoundingBox,
    ) -> NdviResult<Vec<RasterImage>>;

    /// Short name used in log messages
    fn name(&self) -> &str {
        "imagery backend"
    }
}

impl<B: ImageryBackend + ?Sized> ImageryBackend for &B {
    fn query(
        &self,
        source: &ImageSourceDescriptor,
        range: &DateRange,
        bounds: &BoundingBox,
    ) -> NdviResult<Vec<RasterImage>> {
        (**self).query(source, range, bounds)
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

/// Scenes held in memory, keyed by catalog id
#[derive(Debug, Clone, Default)]
pub struct InMemoryBackend {
    scenes: HashMap<String, Vec<RasterImage>>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_scene(&mut self, catalog_id: &str, scene: RasterImage) {
        self.scenes.entry(catalog_id.to_string()).or_default().push(scene);
    }

    pub fn with_scene(mut self, catalog_id: &str, scene: RasterImage) -> Self {
        self.add_scene(catalog_id, scene);
        self
    }

    pub fn scene_count(&self) -> usize {
        self.scenes.values().map(Vec::len).sum()
    }
}

impl ImageryBackend for InMemoryBackend {
    fn query(
        &self,
        source: &ImageSourceDescriptor,
        range: &DateRange,
        bounds: &BoundingBox,
    ) -> NdviResult<Vec<RasterImage>> {
        Ok(filter_scenes(
            self.scenes.get(&source.catalog_id).map(Vec::as_slice).unwrap_or(&[]),
            range,
            bounds,
        ))
    }

    fn name(&self) -> &str {
        "in-memory backend"
    }
}

/// Scenes acquired within `range` whose footprint intersects `bounds`
pub fn filter_scenes(
    scenes: &[RasterImage],
    range: &DateRange,
    bounds: &BoundingBox,
) -> Vec<RasterImage> {
    scenes
        .iter()
        .filter(|scene| range.contains(&scene.acquired) && scene.footprint().intersects(bounds))
        .cloned()
        .collect()
}

/// Bounded retry policy for backend queries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryParams {
    /// Total attempts including the first one
    pub max_attempts: u32,
    /// Pause between attempts in milliseconds
    pub backoff_ms: u64,
}

impl Default for RetryParams {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_ms: 500,
        }
    }
}

/// Retries retryable backend failures a bounded number of times
pub struct RetryingBackend<B> {
    inner: B,
    params: RetryParams,
}

impl<B: ImageryBackend> RetryingBackend<B> {
    pub fn new(inner: B, params: RetryParams) -> Self {
        Self { inner, params }
    }

    pub fn into_inner(self) -> B {
        self.inner
    }
}

impl<B: ImageryBackend> ImageryBackend for RetryingBackend<B> {
    fn query(
        &self,
        source: &ImageSourceDescriptor,
        range: &DateRange,
        bounds: &BoundingBox,
    ) -> NdviResult<Vec<RasterImage>> {
        let max_attempts = self.params.max_attempts.max(1);
        let mut last_error = None;

        for attempt in 1..=max_attempts {
            log::debug!(
                "Query attempt {} of {} for {} on {}",
                attempt,
                max_attempts,
                source.catalog_id,
                self.inner.name()
            );

            match self.inner.query(source, range, bounds) {
                Ok(scenes) => return Ok(scenes),
                Err(e) if e.is_retryable() => {
                    log::warn!(
                        "{} query for {} failed (attempt {}/{}): {}",
                        self.inner.name(),
                        source.catalog_id,
                        attempt,
                        max_attempts,
                        e
                    );
                    last_error = Some(e);
                    if attempt < max_attempts && self.params.backoff_ms > 0 {
                        std::thread::sleep(Duration::from_millis(self.params.backoff_ms));
                    }
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or_else(|| {
            NdviError::BackendQuery(format!("Query for {} failed after all retries", source.catalog_id))
        }))
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{GeoTransform, Properties, RasterGrid};
    use chrono::{TimeZone, Utc};
    use std::cell::Cell;
    use std::collections::BTreeMap;

    struct FlakyBackend {
        failures_left: Cell<u32>,
        calls: Cell<u32>,
        error: fn() -> NdviError,
    }

    impl ImageryBackend for FlakyBackend {
        fn query(
            &self,
            _source: &ImageSourceDescriptor,
            _range: &DateRange,
            _bounds: &BoundingBox,
        ) -> NdviResult<Vec<RasterImage>> {
            self.calls.set(self.calls.get() + 1);
            if self.failures_left.get() > 0 {
                self.failures_left.set(self.failures_left.get() - 1);
                return Err((self.error)());
            }
            Ok(Vec::new())
        }
    }

    fn flaky(failures: u32, error: fn() -> NdviError) -> FlakyBackend {
        FlakyBackend {
            failures_left: Cell::new(failures),
            calls: Cell::new(0),
            error,
        }
    }

    fn no_backoff(max_attempts: u32) -> RetryParams {
        RetryParams { max_attempts, backoff_ms: 0 }
    }

    fn query(backend: &impl ImageryBackend) -> NdviResult<Vec<RasterImage>> {
        backend.query(
            &ImageSourceDescriptor::sentinel2(),
            &DateRange::calendar_year(2020).unwrap(),
            &BoundingBox::new(0.0, 0.0, 1.0, 1.0),
        )
    }

    #[test]
    fn test_retry_recovers_from_transient_failure() {
        let backend = flaky(2, || NdviError::BackendQuery("timeout".to_string()));
        let retrying = RetryingBackend::new(&backend, no_backoff(3));

        assert!(query(&retrying).is_ok());
        assert_eq!(backend.calls.get(), 3);
    }

    #[test]
    fn test_retry_is_bounded() {
        let backend = flaky(10, || NdviError::BackendQuery("unreachable".to_string()));
        let retrying = RetryingBackend::new(&backend, no_backoff(3));

        let err = query(&retrying).unwrap_err();
        assert!(matches!(err, NdviError::BackendQuery(_)));
        assert_eq!(backend.calls.get(), 3);
    }

    #[test]
    fn test_non_retryable_errors_fail_fast() {
        let backend = flaky(1, || NdviError::InvalidFormat("bad scene".to_string()));
        let retrying = RetryingBackend::new(&backend, no_backoff(3));

        assert!(query(&retrying).is_err());
        assert_eq!(backend.calls.get(), 1);
    }

    #[test]
    fn test_in_memory_filters_by_date_and_bounds() {
        let scene = |id: &str, year: i32, lon: f64| RasterImage {
            id: id.to_string(),
            acquired: Utc.with_ymd_and_hms(year, 4, 1, 0, 0, 0).unwrap(),
            grid: RasterGrid::new(1, 1, GeoTransform::north_up(lon, 1.0, 0.5, 0.5)),
            bands: BTreeMap::new(),
            valid: None,
            properties: Properties::new(),
        };
        let catalog = ImageSourceDescriptor::sentinel2().catalog_id;
        let backend = InMemoryBackend::new()
            .with_scene(&catalog, scene("inside", 2020, 0.25))
            .with_scene(&catalog, scene("last-year", 2019, 0.25))
            .with_scene(&catalog, scene("far-away", 2020, 40.0))
            .with_scene("OTHER/CATALOG", scene("other", 2020, 0.25));

        let scenes = query(&backend).unwrap();
        assert_eq!(scenes.len(), 1);
        assert_eq!(scenes[0].id, "inside");
        assert_eq!(backend.scene_count(), 4);
    }
}
