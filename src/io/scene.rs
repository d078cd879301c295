use crate::types::{
    GeoTransform, NdviError, NdviResult, Properties, RasterGrid, RasterImage,
};
use chrono::{DateTime, Utc};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Serialized scene exchanged with file and HTTP backends.
///
/// Band and mask arrays are flattened in row-major order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneRecord {
    pub id: String,
    pub acquired: DateTime<Utc>,
    /// GDAL-ordered geotransform coefficients
    pub transform: [f64; 6],
    pub rows: usize,
    pub cols: usize,
    pub bands: BTreeMap<String, Vec<f32>>,
    #[serde(default)]
    pub valid: Option<Vec<bool>>,
    #[serde(default)]
    pub properties: Properties,
}

impl SceneRecord {
    pub fn from_image(image: &RasterImage) -> Self {
        Self {
            id: image.id.clone(),
            acquired: image.acquired,
            transform: image.grid.transform.to_gdal(),
            rows: image.grid.rows,
            cols: image.grid.cols,
            bands: image
                .bands
                .iter()
                .map(|(name, data)| (name.clone(), data.iter().copied().collect()))
                .collect(),
            valid: image.valid.as_ref().map(|mask| mask.iter().copied().collect()),
            properties: image.properties.clone(),
        }
    }

    /// Rebuild the raster image, validating every array length
    pub fn into_image(self) -> NdviResult<RasterImage> {
        let shape = (self.rows, self.cols);
        let expected = self.rows.checked_mul(self.cols).ok_or_else(|| {
            NdviError::InvalidFormat(format!(
                "Scene {} grid {}x{} is too large",
                self.id, self.rows, self.cols
            ))
        })?;

        let mut bands = BTreeMap::new();
        for (name, values) in self.bands {
            if values.len() != expected {
                return Err(NdviError::InvalidFormat(format!(
                    "Scene {} band {} has {} values, expected {}x{}",
                    self.id,
                    name,
                    values.len(),
                    self.rows,
                    self.cols
                )));
            }
            let array = Array2::from_shape_vec(shape, values).map_err(|e| {
                NdviError::InvalidFormat(format!("Scene {} band {}: {}", self.id, name, e))
            })?;
            bands.insert(name, array);
        }

        let valid = match self.valid {
            Some(mask) => Some(Array2::from_shape_vec(shape, mask).map_err(|e| {
                NdviError::InvalidFormat(format!("Scene {} validity mask: {}", self.id, e))
            })?),
            None => None,
        };

        Ok(RasterImage {
            id: self.id,
            acquired: self.acquired,
            grid: RasterGrid::new(self.rows, self.cols, GeoTransform::from_gdal(self.transform)),
            bands,
            valid,
            properties: self.properties,
        })
    }
}
