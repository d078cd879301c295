use crate::config::PipelineConfig;
use crate::types::{DateRange, NdviError, NdviResult, RasterImage};
use regex::Regex;
use serde::{Deserialize, Serialize};

/// How raw band values are converted to surface reflectance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum Calibration {
    /// No per-image calibration; the transformer's fixed scale factor applies
    None,
    /// Gain and offset read from the image's own properties
    PerBandGainOffset { gain_key: String, offset_key: String },
}

/// Immutable description of one imagery source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSourceDescriptor {
    pub catalog_id: String,
    /// Regex over band names selecting the spectral band window
    pub band_selector: String,
    pub calibration: Calibration,
    pub nir_band: String,
    pub red_band: String,
    /// Scene property holding cloud cover in percent
    pub cloud_cover_key: Option<String>,
}

impl ImageSourceDescriptor {
    /// Landsat 8 Collection 2 Level-2 surface reflectance
    pub fn landsat8() -> Self {
        Self::landsat_c2_l2("LANDSAT/LC08/C02/T1_L2")
    }

    /// Landsat 9 Collection 2 Level-2 surface reflectance
    pub fn landsat9() -> Self {
        Self::landsat_c2_l2("LANDSAT/LC09/C02/T1_L2")
    }

    fn landsat_c2_l2(catalog_id: &str) -> Self {
        Self {
            catalog_id: catalog_id.to_string(),
            band_selector: "SR_B.".to_string(),
            // Red is SR_B4 on OLI; its gain/offset is applied to the whole window
            calibration: Calibration::PerBandGainOffset {
                gain_key: "REFLECTANCE_MULT_BAND_4".to_string(),
                offset_key: "REFLECTANCE_ADD_BAND_4".to_string(),
            },
            nir_band: "SR_B5".to_string(),
            red_band: "SR_B4".to_string(),
            cloud_cover_key: Some("CLOUD_COVER".to_string()),
        }
    }

    /// Sentinel-2 harmonized surface reflectance
    pub fn sentinel2() -> Self {
        Self {
            catalog_id: "COPERNICUS/S2_SR_HARMONIZED".to_string(),
            band_selector: "B.*".to_string(),
            calibration: Calibration::None,
            nir_band: "B8".to_string(),
            red_band: "B4".to_string(),
            cloud_cover_key: Some("CLOUDY_PIXEL_PERCENTAGE".to_string()),
        }
    }

    /// The three sources every analysis draws from
    pub fn standard_sources() -> Vec<Self> {
        vec![Self::landsat8(), Self::landsat9(), Self::sentinel2()]
    }

    /// Band selector compiled to match whole band names only
    pub fn band_regex(&self) -> NdviResult<Regex> {
        Regex::new(&format!("^(?:{})$", self.band_selector)).map_err(|e| {
            NdviError::InvalidFormat(format!(
                "Band selector '{}' for {} is not a valid pattern: {}",
                self.band_selector, self.catalog_id, e
            ))
        })
    }
}

/// Date window and sources for one analysis year
#[derive(Debug, Clone, PartialEq)]
pub struct SourceSelection {
    pub year: i32,
    pub range: DateRange,
    pub sources: Vec<ImageSourceDescriptor>,
    pub max_cloud_cover: Option<f64>,
}

impl SourceSelection {
    /// Drop scenes outside the date window or above the cloud-cover limit.
    ///
    /// Scenes without a cloud-cover property are kept.
    pub fn retain_scenes(
        &self,
        source: &ImageSourceDescriptor,
        scenes: Vec<RasterImage>,
    ) -> Vec<RasterImage> {
        let before = scenes.len();
        let kept: Vec<RasterImage> = scenes
            .into_iter()
            .filter(|scene| {
                if !self.range.contains(&scene.acquired) {
                    log::warn!(
                        "Scene {} acquired {} is outside {:?}, skipping",
                        scene.id, scene.acquired, self.range
                    );
                    return false;
                }
                match (self.max_cloud_cover, source.cloud_cover_key.as_deref()) {
                    (Some(limit), Some(key)) => match scene.property_f64(key) {
                        Ok(cover) if cover > limit => {
                            log::debug!("Scene {} cloud cover {:.1}% > {:.1}%", scene.id, cover, limit);
                            false
                        }
                        _ => true,
                    },
                    _ => true,
                }
            })
            .collect();

        if kept.len() != before {
            log::info!(
                "{}: kept {} of {} scenes after filtering",
                source.catalog_id,
                kept.len(),
                before
            );
        }
        kept
    }
}

/// Resolves an analysis year to its date range and imagery sources
#[derive(Debug, Clone)]
pub struct SourceSelector {
    supported_years: Vec<i32>,
    max_cloud_cover: Option<f64>,
    sources: Vec<ImageSourceDescriptor>,
}

impl SourceSelector {
    pub fn new(supported_years: Vec<i32>, max_cloud_cover: Option<f64>) -> Self {
        Self {
            supported_years,
            max_cloud_cover,
            sources: ImageSourceDescriptor::standard_sources(),
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(config.supported_years.clone(), config.max_cloud_cover)
    }

    pub fn supported_years(&self) -> &[i32] {
        &self.supported_years
    }

    /// `[Jan 1 year, Jan 1 year + 1)` and the fixed source list
    pub fn select(&self, year: i32) -> NdviResult<SourceSelection> {
        if !self.supported_years.contains(&year) {
            return Err(NdviError::UserInput(format!(
                "Year {} is not supported (choose one of {:?})",
                year, self.supported_years
            )));
        }

        let range = DateRange::calendar_year(year)?;
        log::info!(
            "Selected {} sources for {} ({} to {})",
            self.sources.len(),
            year,
            range.start,
            range.end
        );

        Ok(SourceSelection {
            year,
            range,
            sources: self.sources.clone(),
            max_cloud_cover: self.max_cloud_cover,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{GeoTransform, PropertyValue, Properties, RasterGrid};
    use chrono::{NaiveDate, TimeZone, Utc};
    use std::collections::BTreeMap;

    fn scene(id: &str, month: u32, cloud: Option<f64>) -> RasterImage {
        let mut properties = Properties::new();
        if let Some(cover) = cloud {
            properties.insert("CLOUD_COVER".to_string(), PropertyValue::Number(cover));
        }
        RasterImage {
            id: id.to_string(),
            acquired: Utc.with_ymd_and_hms(2020, month, 10, 10, 0, 0).unwrap(),
            grid: RasterGrid::new(1, 1, GeoTransform::north_up(0.0, 1.0, 1.0, 1.0)),
            bands: BTreeMap::new(),
            valid: None,
            properties,
        }
    }

    #[test]
    fn test_select_supported_year() {
        let selector = SourceSelector::new(vec![2019, 2020], None);
        let selection = selector.select(2020).unwrap();

        assert_eq!(selection.range.start, NaiveDate::from_ymd_opt(2020, 1, 1).unwrap());
        assert_eq!(selection.range.end, NaiveDate::from_ymd_opt(2021, 1, 1).unwrap());
        assert_eq!(selection.sources.len(), 3);

        let landsat = selection
            .sources
            .iter()
            .filter(|s| s.catalog_id.starts_with("LANDSAT"))
            .count();
        assert_eq!(landsat, 2);
        assert_eq!(selection.sources[2].calibration, Calibration::None);
    }

    #[test]
    fn test_select_rejects_unsupported_year() {
        let selector = SourceSelector::new(vec![2019, 2020], None);
        let err = selector.select(2015).unwrap_err();
        assert!(err.is_user_input());
    }

    #[test]
    fn test_band_regex_matches_whole_names() {
        let landsat = ImageSourceDescriptor::landsat8().band_regex().unwrap();
        assert!(landsat.is_match("SR_B4"));
        assert!(!landsat.is_match("SR_B10"));
        assert!(!landsat.is_match("QA_PIXEL"));

        let sentinel = ImageSourceDescriptor::sentinel2().band_regex().unwrap();
        assert!(sentinel.is_match("B8A"));
        assert!(!sentinel.is_match("SCL"));
    }

    #[test]
    fn test_retain_scenes_applies_cloud_limit() {
        let selector = SourceSelector::new(vec![2020], Some(30.0));
        let selection = selector.select(2020).unwrap();
        let source = ImageSourceDescriptor::landsat8();

        let kept = selection.retain_scenes(
            &source,
            vec![scene("clear", 1, Some(5.0)), scene("cloudy", 2, Some(80.0)), scene("unknown", 3, None)],
        );
        let ids: Vec<&str> = kept.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["clear", "unknown"]);
    }
}
