use crate::core::sources::{Calibration, ImageSourceDescriptor};
use crate::types::{
    MaskedRaster, NdviError, NdviImage, NdviRaster, NdviResult, PropertyValue, RasterImage,
    ValidMask, NDVI_BAND, NDVI_INDEX,
};
use ndarray::{Array2, Zip};
use serde::{Deserialize, Serialize};

/// Per-image transform parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NdviParams {
    /// Reflectance scale for uncalibrated sources (Sentinel-2 L2A digital numbers)
    pub scale_factor: f32,
}

impl Default for NdviParams {
    fn default() -> Self {
        Self { scale_factor: 0.0001 }
    }
}

/// Converts one satellite image into a single-band NDVI raster
#[derive(Debug, Clone)]
pub struct NdviTransformer {
    params: NdviParams,
}

impl NdviTransformer {
    pub fn new(params: NdviParams) -> Self {
        Self { params }
    }

    pub fn standard() -> Self {
        Self::new(NdviParams::default())
    }

    /// Calibrate the NIR and red bands and compute `(NIR - RED) / (NIR + RED)`.
    ///
    /// The output keeps every source property, adds `index` and `timestamp`,
    /// and is named with the canonical `NDVI` band. Pixels where the sum is zero
    /// or the input is invalid are masked. The transform is pure.
    pub fn transform(
        &self,
        image: &RasterImage,
        source: &ImageSourceDescriptor,
    ) -> NdviResult<NdviRaster> {
        log::debug!("Computing NDVI for {} ({})", image.id, source.catalog_id);

        let window = source.band_regex()?;
        for band in [&source.nir_band, &source.red_band] {
            if !window.is_match(band) {
                return Err(NdviError::Processing(format!(
                    "Band {} is outside the selector '{}' of {}",
                    band, source.band_selector, source.catalog_id
                )));
            }
        }

        let (gain, offset) = self.calibration_for(image, source)?;
        let nir = calibrate_band(image.band(&source.nir_band)?, gain, offset);
        let red = calibrate_band(image.band(&source.red_band)?, gain, offset);

        let raster = normalized_difference(&nir, &red, image.valid.as_ref())?;
        if raster.dim() != image.grid.dim() {
            return Err(NdviError::Processing(format!(
                "Image {} bands are {:?} but its grid is {:?}",
                image.id,
                raster.dim(),
                image.grid.dim()
            )));
        }

        let mut properties = image.properties.clone();
        properties.insert("index".to_string(), PropertyValue::Text(NDVI_INDEX.to_string()));
        properties.insert(
            "timestamp".to_string(),
            PropertyValue::Number(image.acquired.timestamp_millis() as f64),
        );
        properties.insert("source".to_string(), PropertyValue::Text(source.catalog_id.clone()));

        Ok(NdviRaster {
            band_name: NDVI_BAND.to_string(),
            index: NDVI_INDEX.to_string(),
            timestamp: image.acquired,
            grid: image.grid,
            raster,
            properties,
        })
    }

    /// Gain and offset applied uniformly to the band window
    fn calibration_for(
        &self,
        image: &RasterImage,
        source: &ImageSourceDescriptor,
    ) -> NdviResult<(f32, f32)> {
        match &source.calibration {
            Calibration::None => Ok((self.params.scale_factor, 0.0)),
            Calibration::PerBandGainOffset { gain_key, offset_key } => {
                let gain = image.property_f64(gain_key)? as f32;
                let offset = image.property_f64(offset_key)? as f32;
                Ok((gain, offset))
            }
        }
    }
}

/// `reflectance = raw * gain + offset`
pub fn calibrate_band(raw: &NdviImage, gain: f32, offset: f32) -> NdviImage {
    raw.mapv(|value| value * gain + offset)
}

/// Normalized difference `(a - b) / (a + b)` with explicit masking.
///
/// A pixel is masked when either input is not finite, when `a + b == 0`, or when
/// `valid` marks it invalid.
pub fn normalized_difference(
    band_a: &NdviImage,
    band_b: &NdviImage,
    valid: Option<&ValidMask>,
) -> NdviResult<MaskedRaster> {
    if band_a.dim() != band_b.dim() {
        return Err(NdviError::Processing(format!(
            "Band dimensions differ: {:?} vs {:?}",
            band_a.dim(),
            band_b.dim()
        )));
    }
    let input_mask = match valid {
        Some(mask) if mask.dim() != band_a.dim() => {
            return Err(NdviError::Processing(format!(
                "Validity mask {:?} does not match bands {:?}",
                mask.dim(),
                band_a.dim()
            )));
        }
        Some(mask) => mask.clone(),
        None => Array2::from_elem(band_a.dim(), true),
    };

    let mut data = Array2::<f32>::zeros(band_a.dim());
    let mut out_valid = Array2::from_elem(band_a.dim(), false);

    Zip::from(&mut data)
        .and(&mut out_valid)
        .and(band_a)
        .and(band_b)
        .and(&input_mask)
        .for_each(|out, ok, &a, &b, &pixel_valid| {
            if !pixel_valid || !a.is_finite() || !b.is_finite() {
                return;
            }
            let sum = a + b;
            if sum == 0.0 {
                return;
            }
            let ratio = (a - b) / sum;
            if ratio.is_finite() {
                *out = ratio;
                *ok = true;
            }
        });

    MaskedRaster::new(data, out_valid)
}
