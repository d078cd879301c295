use crate::config::PipelineConfig;
use crate::core::composite::MonthlyAggregator;
use crate::core::ndvi::NdviTransformer;
use crate::core::sources::ImageSourceDescriptor;
use crate::core::resample::resample_nearest;
use crate::core::sampler::{ChartData, Sampler};
use crate::core::sources::{SourceSelection, SourceSelector};
use crate::io::backend::{ImageryBackend, RetryingBackend};
use crate::types::{
    AreaOfInterest, ComparisonPoint, MonthlyStack, NdviCollection, NdviError, NdviRaster, NdviResult,
    RasterGrid, RasterImage,
};
use std::collections::BTreeMap;

/// Everything one analysis run produces
#[derive(Debug, Clone)]
pub struct AnalysisReport {
    pub selection: SourceSelection,
    pub stack: MonthlyStack,
    pub chart: ChartData,
    /// Scenes used per catalog id
    pub scene_counts: BTreeMap<String, usize>,
}

impl AnalysisReport {
    pub fn total_scenes(&self) -> usize {
        self.scene_counts.values().sum()
    }
}

/// Source selection, NDVI transform, monthly aggregation and sampling
pub struct MonthlyNdviPipeline {
    config: PipelineConfig,
    selector: SourceSelector,
    transformer: NdviTransformer,
    aggregator: MonthlyAggregator,
}

impl MonthlyNdviPipeline {
    pub fn new(config: PipelineConfig) -> NdviResult<Self> {
        config.validate()?;
        Ok(Self {
            selector: SourceSelector::from_config(&config),
            transformer: NdviTransformer::new(config.ndvi.clone()),
            aggregator: MonthlyAggregator::new(config.aggregation),
            config,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn selector(&self) -> &SourceSelector {
        &self.selector
    }

    /// Analysis grid covering the AOI at the configured ground sample distance
    pub fn analysis_grid(&self, aoi: &AreaOfInterest) -> NdviResult<RasterGrid> {
        RasterGrid::covering_within(
            &aoi.bounding_box(),
            self.config.gsd_meters,
            self.config.max_grid_pixels,
        )
    }

    /// Query every source, transform each scene and reduce to monthly composites.
    ///
    /// Any backend error aborts the run after the bounded retries.
    pub fn build_stack<B: ImageryBackend + ?Sized>(
        &self,
        backend: &B,
        year: i32,
        aoi: &AreaOfInterest,
    ) -> NdviResult<(SourceSelection, MonthlyStack, BTreeMap<String, usize>)> {
        let selection = self.selector.select(year)?;
        let grid = self.analysis_grid(aoi)?;
        let bounds = aoi.bounding_box();
        let backend = RetryingBackend::new(backend, self.config.retry.clone());

        log::info!(
            "Building monthly NDVI stack for {} on a {}x{} grid",
            year,
            grid.rows,
            grid.cols
        );

        let mut collection = NdviCollection::new(grid);
        let mut scene_counts = BTreeMap::new();

        for source in &selection.sources {
            let scenes = backend.query(source, &selection.range, &bounds).map_err(|e| {
                log::error!("Query for {} failed, aborting run: {}", source.catalog_id, e);
                e
            })?;
            let scenes = selection.retain_scenes(source, scenes);
            log::debug!("{}: {} scenes after filtering", source.catalog_id, scenes.len());

            let mut used = 0;
            let results = transform_scenes(&self.transformer, &scenes, source);
            for (scene, result) in scenes.iter().zip(results) {
                // A scene lacking its NIR/red bands or calibration scalars is skipped
                let ndvi = match result {
                    Ok(ndvi) => ndvi,
                    Err(NdviError::Processing(reason)) => {
                        log::warn!("Skipping scene {}: {}", scene.id, reason);
                        continue;
                    }
                    Err(e) => return Err(e),
                };
                collection.push(align_to_grid(ndvi, &grid)?)?;
                used += 1;
            }
            scene_counts.insert(source.catalog_id.clone(), used);
        }

        let stack = self.aggregator.aggregate(&collection, year)?;
        Ok((selection, stack, scene_counts))
    }

    /// Full run: monthly stack plus both chart datasets
    pub fn run<B: ImageryBackend + ?Sized>(
        &self,
        backend: &B,
        year: i32,
        aoi: &AreaOfInterest,
        points: &[ComparisonPoint],
    ) -> NdviResult<AnalysisReport> {
        let (selection, stack, scene_counts) = self.build_stack(backend, year, aoi)?;
        let chart = Sampler::chart_data(&stack, aoi, points);

        log::info!(
            "Analysis for {} completed: {} scenes, {} point series",
            year,
            scene_counts.values().sum::<usize>(),
            chart.points.len()
        );

        Ok(AnalysisReport {
            selection,
            stack,
            chart,
            scene_counts,
        })
    }
}

/// Per-scene NDVI, in scene order
#[cfg(feature = "parallel")]
fn transform_scenes(
    transformer: &NdviTransformer,
    scenes: &[RasterImage],
    source: &ImageSourceDescriptor,
) -> Vec<NdviResult<NdviRaster>> {
    use rayon::prelude::*;

    scenes
        .par_iter()
        .map(|scene| transformer.transform(scene, source))
        .collect()
}

#[cfg(not(feature = "parallel"))]
fn transform_scenes(
    transformer: &NdviTransformer,
    scenes: &[RasterImage],
    source: &ImageSourceDescriptor,
) -> Vec<NdviResult<NdviRaster>> {
    scenes
        .iter()
        .map(|scene| transformer.transform(scene, source))
        .collect()
}

/// Put a scene's NDVI onto the analysis grid, keeping its tags
fn align_to_grid(ndvi: NdviRaster, grid: &RasterGrid) -> NdviResult<NdviRaster> {
    if ndvi.grid == *grid {
        return Ok(ndvi);
    }
    let raster = resample_nearest(&ndvi.raster, &ndvi.grid, grid)?;
    Ok(NdviRaster {
        raster,
        grid: *grid,
        ..ndvi
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{GeoTransform, PropertyValue, Properties};
    use chrono::{TimeZone, Utc};
    use ndarray::Array2;
    use std::collections::BTreeMap;

    fn scene(day: u32, nir: Option<f32>) -> RasterImage {
        let mut bands = BTreeMap::new();
        bands.insert("B4".to_string(), Array2::from_elem((2, 2), 1000.0f32));
        if let Some(nir) = nir {
            bands.insert("B8".to_string(), Array2::from_elem((2, 2), nir));
        }
        let mut properties = Properties::new();
        properties.insert("day".to_string(), PropertyValue::Number(day as f64));

        RasterImage {
            id: format!("S2_{:02}", day),
            acquired: Utc.with_ymd_and_hms(2021, 6, day, 10, 0, 0).unwrap(),
            grid: RasterGrid::new(2, 2, GeoTransform::north_up(0.0, 0.002, 0.001, 0.001)),
            bands,
            valid: None,
            properties,
        }
    }

    #[test]
    fn test_transform_scenes_keeps_order_and_per_scene_errors() {
        let scenes: Vec<RasterImage> = (1..=20)
            .map(|day| scene(day, if day == 7 { None } else { Some(1000.0 + day as f32 * 100.0) }))
            .collect();
        let source = ImageSourceDescriptor::sentinel2();
        let transformer = NdviTransformer::standard();

        let results = transform_scenes(&transformer, &scenes, &source);
        assert_eq!(results.len(), scenes.len());

        for (scene, result) in scenes.iter().zip(&results) {
            if scene.id == "S2_07" {
                assert!(matches!(result, Err(NdviError::Processing(_))));
            } else {
                let ndvi = result.as_ref().unwrap();
                assert_eq!(ndvi.timestamp, scene.acquired);
                assert_eq!(ndvi.raster, transformer.transform(scene, &source).unwrap().raster);
            }
        }
    }
}
