//! GeoTIFF export of the monthly composite stack
//!
//! The export covers the AOI bounding region at a fixed ground sample distance,
//! one band per month in month order.

use crate::config::PipelineConfig;
use crate::core::resample::resample_nearest;
use crate::types::{
    AreaOfInterest, BoundingBox, MonthlyStack, NdviError, NdviImage, NdviResult, RasterGrid,
    DEFAULT_MAX_GRID_PIXELS,
};
use chrono::Datelike;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// EPSG code of the geographic lon/lat grids produced here
pub const EXPORT_EPSG: u32 = 4326;

/// Export parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportParams {
    /// Value written for masked pixels
    pub nodata: f32,
    /// GTiff creation option, e.g. "DEFLATE"
    pub compression: Option<String>,
}

impl Default for ExportParams {
    fn default() -> Self {
        Self {
            nodata: -9999.0,
            compression: Some("DEFLATE".to_string()),
        }
    }
}

/// Region, grid and band layout of one export
#[derive(Debug, Clone, PartialEq)]
pub struct ExportPlan {
    pub region: BoundingBox,
    pub grid: RasterGrid,
    pub gsd_meters: f64,
    pub band_names: Vec<String>,
}

impl ExportPlan {
    /// Plan covering the AOI bounding region for the given stack
    pub fn for_stack(stack: &MonthlyStack, aoi: &AreaOfInterest, gsd_meters: f64) -> NdviResult<Self> {
        Self::for_stack_within(stack, aoi, gsd_meters, DEFAULT_MAX_GRID_PIXELS)
    }

    /// Like [`ExportPlan::for_stack`], rejecting grids above `max_pixels`
    pub fn for_stack_within(
        stack: &MonthlyStack,
        aoi: &AreaOfInterest,
        gsd_meters: f64,
        max_pixels: usize,
    ) -> NdviResult<Self> {
        let region = aoi.bounding_box();
        let grid = RasterGrid::covering_within(&region, gsd_meters, max_pixels)?;
        let band_names = stack
            .iter()
            .map(|c| format!("NDVI_{}_{:02}", c.timestamp.year(), c.month))
            .collect();

        Ok(Self {
            region,
            grid,
            gsd_meters,
            band_names,
        })
    }

    /// Dense band arrays on the export grid, masked pixels set to `nodata`
    pub fn render_bands(&self, stack: &MonthlyStack, nodata: f32) -> NdviResult<Vec<NdviImage>> {
        stack
            .iter()
            .map(|composite| {
                let resampled =
                    resample_nearest(&composite.ndvi.raster, &composite.ndvi.grid, &self.grid)?;
                Ok(resampled.filled(nodata))
            })
            .collect()
    }
}

/// Writes monthly stacks as multi-band GeoTIFF files
pub struct GeoTiffExporter {
    params: ExportParams,
    gsd_meters: f64,
    max_pixels: usize,
}

impl GeoTiffExporter {
    pub fn new(params: ExportParams, gsd_meters: f64) -> Self {
        Self {
            params,
            gsd_meters,
            max_pixels: DEFAULT_MAX_GRID_PIXELS,
        }
    }

    /// Exporter using the configured export parameters, resolution and grid limit
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            params: config.export.clone(),
            gsd_meters: config.gsd_meters,
            max_pixels: config.max_grid_pixels,
        }
    }

    pub fn plan(&self, stack: &MonthlyStack, aoi: &AreaOfInterest) -> NdviResult<ExportPlan> {
        ExportPlan::for_stack_within(stack, aoi, self.gsd_meters, self.max_pixels)
    }

    /// GTiff creation options as key/value pairs
    pub fn creation_options(&self) -> Vec<(&'static str, String)> {
        let mut options = Vec::new();
        if let Some(compression) = &self.params.compression {
            options.push(("COMPRESS", compression.clone()));
        }
        options
    }

    /// Export the stack over the AOI bounding region
    pub fn export<P: AsRef<Path>>(
        &self,
        stack: &MonthlyStack,
        aoi: &AreaOfInterest,
        output_path: P,
    ) -> NdviResult<ExportPlan> {
        let plan = self.plan(stack, aoi)?;
        log::info!(
            "Exporting {} bands ({}x{} at {} m) to {}",
            plan.band_names.len(),
            plan.grid.rows,
            plan.grid.cols,
            plan.gsd_meters,
            output_path.as_ref().display()
        );

        let bands = plan.render_bands(stack, self.params.nodata)?;
        self.write_bands(&plan, &bands, output_path.as_ref())?;

        log::info!("GeoTIFF export completed");
        Ok(plan)
    }

    #[cfg(feature = "geotiff")]
    fn write_bands(&self, plan: &ExportPlan, bands: &[NdviImage], output_path: &Path) -> NdviResult<()> {
        use gdal::raster::{Buffer, RasterCreationOption};
        use gdal::spatial_ref::SpatialRef;
        use gdal::{DriverManager, Metadata};

        let driver = DriverManager::get_driver_by_name("GTiff")?;
        let (height, width) = plan.grid.dim();

        let option_pairs = self.creation_options();
        let options: Vec<RasterCreationOption> = option_pairs
            .iter()
            .map(|(key, value)| RasterCreationOption { key: *key, value: value.as_str() })
            .collect();

        let mut dataset = driver.create_with_band_type_with_options::<f32, _>(
            output_path,
            width as isize,
            height as isize,
            bands.len() as isize,
            &options,
        )?;
        dataset.set_geo_transform(&plan.grid.transform.to_gdal())?;
        dataset.set_spatial_ref(&SpatialRef::from_epsg(EXPORT_EPSG)?)?;

        for (i, (band, name)) in bands.iter().zip(plan.band_names.iter()).enumerate() {
            let mut rasterband = dataset.rasterband(i as isize + 1)?;
            let flat_data: Vec<f32> = band.iter().cloned().collect();
            let buffer = Buffer::new((width, height), flat_data);
            rasterband.write((0, 0), (width, height), &buffer)?;
            rasterband.set_no_data_value(Some(self.params.nodata as f64))?;
            rasterband.set_metadata_item("BAND_NAME", name, "")?;
        }
        Ok(())
    }

    #[cfg(not(feature = "geotiff"))]
    fn write_bands(&self, _plan: &ExportPlan, _bands: &[NdviImage], output_path: &Path) -> NdviResult<()> {
        Err(NdviError::Processing(format!(
            "GeoTIFF support not compiled in; rebuild with the `geotiff` feature to write {}",
            output_path.display()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::composite::MonthlyAggregator;
    use crate::types::{
        GeoTransform, MaskedRaster, NdviCollection, NdviRaster, Properties, NDVI_BAND, NDVI_INDEX,
    };
    use chrono::{TimeZone, Utc};
    use ndarray::Array2;

    fn stack() -> MonthlyStack {
        let grid = RasterGrid::new(4, 4, GeoTransform::north_up(0.0, 0.004, 0.001, 0.001));
        let mut collection = NdviCollection::new(grid);
        collection
            .push(NdviRaster {
                band_name: NDVI_BAND.to_string(),
                index: NDVI_INDEX.to_string(),
                timestamp: Utc.with_ymd_and_hms(2021, 7, 4, 0, 0, 0).unwrap(),
                grid,
                raster: MaskedRaster::from_data(Array2::from_elem((4, 4), 0.7)),
                properties: Properties::new(),
            })
            .unwrap();
        MonthlyAggregator::standard().aggregate(&collection, 2021).unwrap()
    }

    #[test]
    fn test_plan_has_twelve_bands_in_month_order() {
        let aoi = AreaOfInterest::rectangle(&BoundingBox::new(0.0, 0.0, 0.004, 0.004)).unwrap();
        let plan = ExportPlan::for_stack(&stack(), &aoi, 30.0).unwrap();

        assert_eq!(plan.band_names.len(), 12);
        assert_eq!(plan.band_names[0], "NDVI_2022_01");
        assert_eq!(plan.band_names[11], "NDVI_2022_12");
        assert_eq!(plan.region, aoi.bounding_box());
        // 0.004° ≈ 445 m -> 15 pixels of 30 m
        assert_eq!(plan.grid.dim(), (15, 15));
    }

    #[test]
    fn test_render_bands_fill_nodata() {
        let stack = stack();
        let aoi = AreaOfInterest::rectangle(&BoundingBox::new(0.0, 0.0, 0.004, 0.004)).unwrap();
        let plan = ExportPlan::for_stack(&stack, &aoi, 30.0).unwrap();
        let bands = plan.render_bands(&stack, -9999.0).unwrap();

        assert_eq!(bands.len(), 12);
        assert!(bands[6].iter().all(|&v| (v - 0.7).abs() < 1e-6));
        assert!(bands[0].iter().all(|&v| v == -9999.0));
    }

    #[test]
    fn test_compression_is_a_creation_option() {
        let exporter = GeoTiffExporter::new(ExportParams::default(), 30.0);
        assert_eq!(exporter.creation_options(), vec![("COMPRESS", "DEFLATE".to_string())]);

        let params = ExportParams {
            compression: None,
            ..ExportParams::default()
        };
        assert!(GeoTiffExporter::new(params, 30.0).creation_options().is_empty());
    }

    #[test]
    fn test_exporter_uses_configured_grid_limit() {
        let aoi = AreaOfInterest::rectangle(&BoundingBox::new(0.0, 0.0, 0.004, 0.004)).unwrap();
        let config = PipelineConfig {
            max_grid_pixels: 100,
            ..PipelineConfig::default()
        };
        let err = GeoTiffExporter::from_config(&config).plan(&stack(), &aoi).unwrap_err();
        assert!(err.is_user_input());
    }

    #[cfg(not(feature = "geotiff"))]
    #[test]
    fn test_export_without_gdal_reports_missing_support() {
        let aoi = AreaOfInterest::rectangle(&BoundingBox::new(0.0, 0.0, 0.004, 0.004)).unwrap();
        let exporter = GeoTiffExporter::new(ExportParams::default(), 30.0);
        let result = exporter.export(&stack(), &aoi, "/tmp/ndvine-test.tif");
        assert!(matches!(result, Err(NdviError::Processing(_))));
    }
}
