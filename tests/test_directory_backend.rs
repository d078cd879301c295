//! Scene catalogs stored on disk

use chrono::{TimeZone, Utc};
use ndarray::{array, Array2};
use ndvine::io::scene::SceneRecord;
use ndvine::types::{GeoTransform, PropertyValue, Properties};
use ndvine::{
    AreaOfInterest, BoundingBox, DateRange, DirectoryBackend, ImageSourceDescriptor, ImageryBackend,
    MonthlyNdviPipeline, NdviError, PipelineConfig, RasterGrid, RasterImage,
};
use std::collections::BTreeMap;
use std::fs;
use tempfile::TempDir;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn landsat_scene(id: &str, month: u32) -> RasterImage {
    let grid = RasterGrid::new(2, 2, GeoTransform::north_up(5.0, 52.0, 0.001, 0.001));
    let mut properties = Properties::new();
    properties.insert("REFLECTANCE_MULT_BAND_4".to_string(), PropertyValue::Number(0.0000275));
    properties.insert("REFLECTANCE_ADD_BAND_4".to_string(), PropertyValue::Number(-0.2));
    properties.insert("LANDSAT_PRODUCT_ID".to_string(), PropertyValue::Text(id.to_string()));

    let mut bands = BTreeMap::new();
    bands.insert("SR_B5".to_string(), Array2::from_elem((2, 2), 30000.0f32));
    bands.insert("SR_B4".to_string(), Array2::from_elem((2, 2), 12000.0f32));

    RasterImage {
        id: id.to_string(),
        acquired: Utc.with_ymd_and_hms(2023, month, 9, 10, 45, 0).unwrap(),
        grid,
        bands,
        valid: Some(array![[true, true], [true, false]]),
        properties,
    }
}

#[test]
fn test_written_scenes_are_queryable() {
    init_logging();
    let temp_dir = TempDir::new().unwrap();
    let backend = DirectoryBackend::new(temp_dir.path());
    let source = ImageSourceDescriptor::landsat9();

    let path = backend.write_scene(&source.catalog_id, &landsat_scene("LC09_A", 4)).unwrap();
    assert!(path.starts_with(backend.catalog_dir(&source.catalog_id)));
    backend.write_scene(&source.catalog_id, &landsat_scene("LC09_B", 8)).unwrap();

    let scenes = backend
        .query(
            &source,
            &DateRange::calendar_year(2023).unwrap(),
            &BoundingBox::new(5.0, 51.99, 5.01, 52.0),
        )
        .unwrap();
    assert_eq!(scenes.len(), 2);
    assert_eq!(scenes[0].id, "LC09_A");
    assert_eq!(scenes[0], landsat_scene("LC09_A", 4));

    // Other years and regions are not returned
    let none = backend
        .query(
            &source,
            &DateRange::calendar_year(2022).unwrap(),
            &BoundingBox::new(5.0, 51.99, 5.01, 52.0),
        )
        .unwrap();
    assert!(none.is_empty());
    let far = backend
        .query(
            &source,
            &DateRange::calendar_year(2023).unwrap(),
            &BoundingBox::new(100.0, 0.0, 101.0, 1.0),
        )
        .unwrap();
    assert!(far.is_empty());
}

#[test]
fn test_missing_catalog_is_empty() {
    let temp_dir = TempDir::new().unwrap();
    let backend = DirectoryBackend::new(temp_dir.path());
    let scenes = backend
        .query(
            &ImageSourceDescriptor::sentinel2(),
            &DateRange::calendar_year(2023).unwrap(),
            &BoundingBox::new(0.0, 0.0, 1.0, 1.0),
        )
        .unwrap();
    assert!(scenes.is_empty());
}

#[test]
fn test_malformed_record_is_reported() {
    init_logging();
    let temp_dir = TempDir::new().unwrap();
    let backend = DirectoryBackend::new(temp_dir.path());
    let source = ImageSourceDescriptor::sentinel2();

    let mut record = SceneRecord::from_image(&landsat_scene("BROKEN", 1));
    record.rows = 3;
    let dir = backend.catalog_dir(&source.catalog_id);
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join("broken.json"), serde_json::to_vec(&record).unwrap()).unwrap();

    let err = backend
        .query(
            &source,
            &DateRange::calendar_year(2023).unwrap(),
            &BoundingBox::new(0.0, 0.0, 10.0, 60.0),
        )
        .unwrap_err();
    assert!(matches!(err, NdviError::InvalidFormat(_)));
}

#[test]
fn test_pipeline_over_directory_catalog() {
    init_logging();
    let temp_dir = TempDir::new().unwrap();
    let backend = DirectoryBackend::new(temp_dir.path());
    backend
        .write_scene("LANDSAT/LC08/C02/T1_L2", &landsat_scene("LC08_JUN", 6))
        .unwrap();

    let aoi = AreaOfInterest::rectangle(&BoundingBox::new(5.0, 51.998, 5.002, 52.0)).unwrap();
    let config = PipelineConfig {
        gsd_meters: 60.0,
        ..PipelineConfig::default()
    };
    let pipeline = MonthlyNdviPipeline::new(config).unwrap();
    let report = pipeline.run(&backend, 2023, &aoi, &[]).unwrap();

    assert_eq!(report.total_scenes(), 1);
    let june = report.chart.area.points[5].value.unwrap();
    let expected = (0.625 - 0.13) / (0.625 + 0.13);
    assert!((june - expected).abs() < 1e-4);
}
