use chrono::{DateTime, NaiveDate, Utc};
use geo::{Area, BoundingRect, Contains, LineString, Point, Polygon};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Single-band reflectance or index grid (row x col)
pub type NdviImage = Array2<f32>;

/// Per-pixel validity mask, `true` where the pixel carries data
pub type ValidMask = Array2<bool>;

/// Canonical band name every NDVI raster is renamed to
pub const NDVI_BAND: &str = "NDVI";

/// Index label attached to every derived raster
pub const NDVI_INDEX: &str = "NDVI";

/// Mean Earth radius based conversion of one degree of latitude to meters
pub const METERS_PER_DEGREE: f64 = 111_320.0;

/// Largest analysis or export grid accepted unless configured otherwise
pub const DEFAULT_MAX_GRID_PIXELS: usize = 16_000_000;

/// Raster values with an explicit validity mask.
///
/// Masked pixels hold `0.0` in `data` and `false` in `valid`; they are never NaN.
#[derive(Debug, Clone, PartialEq)]
pub struct MaskedRaster {
    pub data: NdviImage,
    pub valid: ValidMask,
}

impl MaskedRaster {
    /// Pair data with a mask of the same shape
    pub fn new(data: NdviImage, valid: ValidMask) -> NdviResult<Self> {
        if data.dim() != valid.dim() {
            return Err(NdviError::Processing(format!(
                "Mask dimensions {:?} do not match data dimensions {:?}",
                valid.dim(),
                data.dim()
            )));
        }
        Ok(Self { data, valid })
    }

    /// Wrap data where every pixel is valid
    pub fn from_data(data: NdviImage) -> Self {
        let valid = Array2::from_elem(data.dim(), true);
        Self { data, valid }
    }

    /// Raster with no valid pixel at all
    pub fn fully_masked(dim: (usize, usize)) -> Self {
        Self {
            data: Array2::zeros(dim),
            valid: Array2::from_elem(dim, false),
        }
    }

    pub fn dim(&self) -> (usize, usize) {
        self.data.dim()
    }

    /// Value at a pixel, `None` when masked or out of bounds
    pub fn get(&self, row: usize, col: usize) -> Option<f32> {
        match self.valid.get((row, col)) {
            Some(true) => self.data.get((row, col)).copied(),
            _ => None,
        }
    }

    pub fn valid_count(&self) -> usize {
        self.valid.iter().filter(|&&v| v).count()
    }

    pub fn is_fully_masked(&self) -> bool {
        !self.valid.iter().any(|&v| v)
    }

    /// Iterate over the values of valid pixels in row-major order
    pub fn valid_values(&self) -> impl Iterator<Item = f32> + '_ {
        self.data
            .iter()
            .zip(self.valid.iter())
            .filter_map(|(&value, &valid)| valid.then_some(value))
    }

    /// Dense copy with masked pixels replaced by `fill`
    pub fn filled(&self, fill: f32) -> NdviImage {
        let mut out = self.data.clone();
        ndarray::Zip::from(&mut out).and(&self.valid).for_each(|value, &valid| {
            if !valid {
                *value = fill;
            }
        });
        out
    }
}

/// Geospatial bounding box in degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lon: f64,
    pub max_lon: f64,
    pub min_lat: f64,
    pub max_lat: f64,
}

impl BoundingBox {
    pub fn new(min_lon: f64, min_lat: f64, max_lon: f64, max_lat: f64) -> Self {
        Self { min_lon, max_lon, min_lat, max_lat }
    }

    pub fn width(&self) -> f64 {
        self.max_lon - self.min_lon
    }

    pub fn height(&self) -> f64 {
        self.max_lat - self.min_lat
    }

    pub fn center(&self) -> (f64, f64) {
        ((self.min_lon + self.max_lon) / 2.0, (self.min_lat + self.max_lat) / 2.0)
    }

    pub fn intersects(&self, other: &BoundingBox) -> bool {
        self.min_lon <= other.max_lon
            && self.max_lon >= other.min_lon
            && self.min_lat <= other.max_lat
            && self.max_lat >= other.min_lat
    }
}

/// Geospatial transformation parameters (GDAL ordering)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    pub top_left_x: f64,
    pub pixel_width: f64,
    pub rotation_x: f64,
    pub top_left_y: f64,
    pub rotation_y: f64,
    pub pixel_height: f64,
}

impl GeoTransform {
    /// North-up transform anchored at the upper-left corner
    pub fn north_up(top_left_x: f64, top_left_y: f64, pixel_width: f64, pixel_height: f64) -> Self {
        Self {
            top_left_x,
            pixel_width,
            rotation_x: 0.0,
            top_left_y,
            rotation_y: 0.0,
            pixel_height: -pixel_height.abs(),
        }
    }

    pub fn from_gdal(coeffs: [f64; 6]) -> Self {
        Self {
            top_left_x: coeffs[0],
            pixel_width: coeffs[1],
            rotation_x: coeffs[2],
            top_left_y: coeffs[3],
            rotation_y: coeffs[4],
            pixel_height: coeffs[5],
        }
    }

    pub fn to_gdal(&self) -> [f64; 6] {
        [
            self.top_left_x,
            self.pixel_width,
            self.rotation_x,
            self.top_left_y,
            self.rotation_y,
            self.pixel_height,
        ]
    }
}

/// Pixel grid of a georeferenced raster.
///
/// Rotation terms are carried for GDAL round trips but pixel lookups assume a
/// north-up grid.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RasterGrid {
    pub rows: usize,
    pub cols: usize,
    pub transform: GeoTransform,
}

impl RasterGrid {
    pub fn new(rows: usize, cols: usize, transform: GeoTransform) -> Self {
        Self { rows, cols, transform }
    }

    /// Grid covering `bbox` at a ground sample distance given in meters,
    /// limited to [`DEFAULT_MAX_GRID_PIXELS`].
    pub fn covering(bbox: &BoundingBox, gsd_meters: f64) -> NdviResult<Self> {
        Self::covering_within(bbox, gsd_meters, DEFAULT_MAX_GRID_PIXELS)
    }

    /// Grid covering `bbox` at a ground sample distance given in meters.
    ///
    /// The meter spacing is converted to degrees at the box's center latitude.
    /// Grids larger than `max_pixels` are rejected before anything is allocated.
    pub fn covering_within(bbox: &BoundingBox, gsd_meters: f64, max_pixels: usize) -> NdviResult<Self> {
        if !(gsd_meters > 0.0) {
            return Err(NdviError::UserInput(format!(
                "Ground sample distance must be positive, got {}",
                gsd_meters
            )));
        }
        if bbox.width() < 0.0 || bbox.height() < 0.0 {
            return Err(NdviError::UserInput(format!("Degenerate bounding box: {:?}", bbox)));
        }

        let (_, center_lat) = bbox.center();
        let deg_lat = gsd_meters / METERS_PER_DEGREE;
        let deg_lon = gsd_meters / (METERS_PER_DEGREE * center_lat.to_radians().cos().max(1e-6));

        let cols = ((bbox.width() / deg_lon).ceil() as usize).max(1);
        let rows = ((bbox.height() / deg_lat).ceil() as usize).max(1);

        match rows.checked_mul(cols) {
            Some(pixels) if pixels <= max_pixels => {}
            _ => {
                return Err(NdviError::UserInput(format!(
                    "Area of interest needs a {}x{} grid at {} m, above the limit of {} pixels",
                    rows, cols, gsd_meters, max_pixels
                )));
            }
        }

        log::debug!(
            "Grid covering {:?} at {} m: {}x{} pixels ({:.6}° x {:.6}°)",
            bbox, gsd_meters, rows, cols, deg_lat, deg_lon
        );

        Ok(Self {
            rows,
            cols,
            transform: GeoTransform::north_up(bbox.min_lon, bbox.max_lat, deg_lon, deg_lat),
        })
    }

    pub fn dim(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    /// Geographic extent of the grid
    pub fn bounds(&self) -> BoundingBox {
        let t = &self.transform;
        let x0 = t.top_left_x;
        let x1 = t.top_left_x + self.cols as f64 * t.pixel_width;
        let y0 = t.top_left_y;
        let y1 = t.top_left_y + self.rows as f64 * t.pixel_height;
        BoundingBox::new(x0.min(x1), y0.min(y1), x0.max(x1), y0.max(y1))
    }

    /// Longitude/latitude of a pixel center
    pub fn pixel_center(&self, row: usize, col: usize) -> (f64, f64) {
        let t = &self.transform;
        (
            t.top_left_x + (col as f64 + 0.5) * t.pixel_width,
            t.top_left_y + (row as f64 + 0.5) * t.pixel_height,
        )
    }

    /// Pixel containing a location, `None` when it falls outside the grid
    pub fn locate(&self, lon: f64, lat: f64) -> Option<(usize, usize)> {
        let t = &self.transform;
        if t.pixel_width == 0.0 || t.pixel_height == 0.0 {
            return None;
        }
        let col = ((lon - t.top_left_x) / t.pixel_width).floor();
        let row = ((lat - t.top_left_y) / t.pixel_height).floor();
        if col < 0.0 || row < 0.0 || col >= self.cols as f64 || row >= self.rows as f64 {
            return None;
        }
        Some((row as usize, col as usize))
    }
}

/// Half-open date range `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    /// `[Jan 1 year, Jan 1 year + 1)`
    pub fn calendar_year(year: i32) -> NdviResult<Self> {
        let start = NaiveDate::from_ymd_opt(year, 1, 1)
            .ok_or_else(|| NdviError::UserInput(format!("Year {} is out of range", year)))?;
        let end = NaiveDate::from_ymd_opt(year + 1, 1, 1)
            .ok_or_else(|| NdviError::UserInput(format!("Year {} is out of range", year + 1)))?;
        Ok(Self { start, end })
    }

    pub fn contains(&self, instant: &DateTime<Utc>) -> bool {
        let date = instant.date_naive();
        date >= self.start && date < self.end
    }
}

/// Scalar or string image property
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Number(f64),
    Text(String),
}

impl PropertyValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            PropertyValue::Number(value) => Some(*value),
            PropertyValue::Text(text) => text.trim().parse().ok(),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropertyValue::Text(text) => Some(text),
            PropertyValue::Number(_) => None,
        }
    }
}

/// Property bag; ordered so derived rasters are reproducible
pub type Properties = BTreeMap<String, PropertyValue>;

/// A single acquisition as delivered by an imagery backend
#[derive(Debug, Clone, PartialEq)]
pub struct RasterImage {
    pub id: String,
    pub acquired: DateTime<Utc>,
    pub grid: RasterGrid,
    pub bands: BTreeMap<String, NdviImage>,
    pub valid: Option<ValidMask>,
    pub properties: Properties,
}

impl RasterImage {
    pub fn band(&self, name: &str) -> NdviResult<&NdviImage> {
        self.bands.get(name).ok_or_else(|| {
            NdviError::Processing(format!("Image {} has no band named {}", self.id, name))
        })
    }

    /// Numeric property, failing when absent or non-numeric
    pub fn property_f64(&self, key: &str) -> NdviResult<f64> {
        self.properties
            .get(key)
            .and_then(PropertyValue::as_f64)
            .ok_or_else(|| {
                NdviError::Processing(format!(
                    "Image {} is missing numeric property {}",
                    self.id, key
                ))
            })
    }

    pub fn footprint(&self) -> BoundingBox {
        self.grid.bounds()
    }
}

/// Single-band NDVI raster tagged with its acquisition time
#[derive(Debug, Clone, PartialEq)]
pub struct NdviRaster {
    pub band_name: String,
    pub index: String,
    pub timestamp: DateTime<Utc>,
    pub grid: RasterGrid,
    pub raster: MaskedRaster,
    pub properties: Properties,
}

/// Schema-compatible collection of NDVI rasters on one pixel grid
#[derive(Debug, Clone)]
pub struct NdviCollection {
    grid: RasterGrid,
    rasters: Vec<NdviRaster>,
}

impl NdviCollection {
    pub fn new(grid: RasterGrid) -> Self {
        Self { grid, rasters: Vec::new() }
    }

    /// Add a raster, rejecting shape or band-name mismatches
    pub fn push(&mut self, raster: NdviRaster) -> NdviResult<()> {
        if raster.raster.dim() != self.grid.dim() {
            return Err(NdviError::Processing(format!(
                "Raster at {} has shape {:?}, collection grid is {:?}",
                raster.timestamp,
                raster.raster.dim(),
                self.grid.dim()
            )));
        }
        if raster.band_name != NDVI_BAND {
            return Err(NdviError::Processing(format!(
                "Raster band {} is not the canonical {} band",
                raster.band_name, NDVI_BAND
            )));
        }
        self.rasters.push(raster);
        Ok(())
    }

    pub fn grid(&self) -> &RasterGrid {
        &self.grid
    }

    pub fn len(&self) -> usize {
        self.rasters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rasters.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, NdviRaster> {
        self.rasters.iter()
    }
}

/// Median composite for one calendar month
#[derive(Debug, Clone, PartialEq)]
pub struct MonthlyComposite {
    pub month: u32,
    pub timestamp: DateTime<Utc>,
    /// Number of source rasters reduced into this composite
    pub contributing: usize,
    pub ndvi: NdviRaster,
}

/// Exactly twelve monthly composites in month order
#[derive(Debug, Clone)]
pub struct MonthlyStack {
    year: i32,
    composites: Vec<MonthlyComposite>,
}

impl MonthlyStack {
    pub fn new(year: i32, composites: Vec<MonthlyComposite>) -> NdviResult<Self> {
        if composites.len() != 12 {
            return Err(NdviError::Processing(format!(
                "Monthly stack needs 12 composites, got {}",
                composites.len()
            )));
        }
        for (i, composite) in composites.iter().enumerate() {
            if composite.month != i as u32 + 1 {
                return Err(NdviError::Processing(format!(
                    "Composite at position {} is for month {}",
                    i, composite.month
                )));
            }
        }
        Ok(Self { year, composites })
    }

    /// Analysis year the stack was built for
    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn composites(&self) -> &[MonthlyComposite] {
        &self.composites
    }

    pub fn month(&self, month: u32) -> Option<&MonthlyComposite> {
        self.composites.get(month.checked_sub(1)? as usize)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, MonthlyComposite> {
        self.composites.iter()
    }

    pub fn grid(&self) -> &RasterGrid {
        &self.composites[0].ndvi.grid
    }
}

/// Longitude/latitude pair
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lon: f64,
    pub lat: f64,
}

impl GeoPoint {
    pub fn new(lon: f64, lat: f64) -> Self {
        Self { lon, lat }
    }
}

/// Named location whose NDVI history is charted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonPoint {
    pub name: String,
    pub location: GeoPoint,
}

/// User-drawn analysis polygon in longitude/latitude
#[derive(Debug, Clone, PartialEq)]
pub struct AreaOfInterest {
    polygon: Polygon<f64>,
    bounds: BoundingBox,
}

impl AreaOfInterest {
    /// Build from the outer ring vertices; the ring is closed automatically
    pub fn from_lon_lat(vertices: &[(f64, f64)]) -> NdviResult<Self> {
        let mut distinct: Vec<(f64, f64)> = Vec::with_capacity(vertices.len());
        for &vertex in vertices {
            if !vertex.0.is_finite() || !vertex.1.is_finite() {
                return Err(NdviError::UserInput(format!(
                    "AOI vertex {:?} is not a finite coordinate",
                    vertex
                )));
            }
            if !distinct.contains(&vertex) {
                distinct.push(vertex);
            }
        }
        if distinct.len() < 3 {
            return Err(NdviError::UserInput(
                "AOI polygon needs at least three distinct vertices".to_string(),
            ));
        }

        let polygon = Polygon::new(LineString::from(vertices.to_vec()), vec![]);
        let rect = polygon.bounding_rect().ok_or_else(|| {
            NdviError::UserInput("AOI polygon has no extent".to_string())
        })?;
        if polygon.unsigned_area() <= 0.0 {
            return Err(NdviError::UserInput("AOI polygon has zero area".to_string()));
        }

        Ok(Self {
            polygon,
            bounds: BoundingBox::new(rect.min().x, rect.min().y, rect.max().x, rect.max().y),
        })
    }

    /// Rectangle-draw AOI
    pub fn rectangle(bbox: &BoundingBox) -> NdviResult<Self> {
        Self::from_lon_lat(&[
            (bbox.min_lon, bbox.min_lat),
            (bbox.max_lon, bbox.min_lat),
            (bbox.max_lon, bbox.max_lat),
            (bbox.min_lon, bbox.max_lat),
        ])
    }

    pub fn polygon(&self) -> &Polygon<f64> {
        &self.polygon
    }

    pub fn bounding_box(&self) -> BoundingBox {
        self.bounds
    }

    /// Strict interior test; points on the boundary are outside
    pub fn contains(&self, lon: f64, lat: f64) -> bool {
        self.polygon.contains(&Point::new(lon, lat))
    }
}

/// Error types for NDVI processing
#[derive(Debug, thiserror::Error)]
pub enum NdviError {
    #[error("Invalid input: {0}")]
    UserInput(String),

    #[error("Imagery backend query failed: {0}")]
    BackendQuery(String),

    #[error("Processing error: {0}")]
    Processing(String),

    #[error("Invalid data format: {0}")]
    InvalidFormat(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[cfg(feature = "geotiff")]
    #[error("GDAL error: {0}")]
    Gdal(#[from] gdal::errors::GdalError),
}

impl NdviError {
    /// Errors the user fixes by changing the request (AOI, year, command order)
    pub fn is_user_input(&self) -> bool {
        matches!(self, NdviError::UserInput(_))
    }

    /// Backend failures worth another attempt; catalog reads are idempotent
    pub fn is_retryable(&self) -> bool {
        matches!(self, NdviError::BackendQuery(_))
    }
}

/// Result type for NDVI operations
pub type NdviResult<T> = Result<T, NdviError>;

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use ndarray::array;

    #[test]
    fn test_masked_raster_get_and_fill() {
        let raster = MaskedRaster::new(
            array![[0.5, 0.0], [0.25, 0.75]],
            array![[true, false], [true, true]],
        )
        .unwrap();

        assert_eq!(raster.get(0, 0), Some(0.5));
        assert_eq!(raster.get(0, 1), None);
        assert_eq!(raster.get(5, 5), None);
        assert_eq!(raster.valid_count(), 3);
        assert_eq!(raster.filled(-9999.0)[[0, 1]], -9999.0);
        assert!(MaskedRaster::fully_masked((2, 2)).is_fully_masked());
    }

    #[test]
    fn test_masked_raster_rejects_mismatched_mask() {
        let result = MaskedRaster::new(Array2::zeros((2, 2)), Array2::from_elem((3, 2), true));
        assert!(result.is_err());
    }

    #[test]
    fn test_grid_locate_and_center() {
        let grid = RasterGrid::new(10, 20, GeoTransform::north_up(10.0, 50.0, 0.1, 0.1));

        assert_eq!(grid.locate(10.05, 49.95), Some((0, 0)));
        assert_eq!(grid.locate(11.95, 49.05), Some((9, 19)));
        assert_eq!(grid.locate(9.99, 49.5), None);
        assert_eq!(grid.locate(12.0, 49.5), None);

        let (lon, lat) = grid.pixel_center(0, 0);
        assert!((lon - 10.05).abs() < 1e-9);
        assert!((lat - 49.95).abs() < 1e-9);

        let bounds = grid.bounds();
        assert!((bounds.min_lat - 49.0).abs() < 1e-9);
        assert!((bounds.max_lon - 12.0).abs() < 1e-9);
    }

    #[test]
    fn test_grid_covering_uses_meter_spacing() {
        let bbox = BoundingBox::new(0.0, 0.0, 0.01, 0.01);
        let grid = RasterGrid::covering(&bbox, 30.0).unwrap();

        // ~1113 m across at the equator -> 38 pixels of 30 m
        assert_eq!(grid.dim(), (38, 38));
        assert!(RasterGrid::covering(&bbox, 0.0).is_err());
    }

    #[test]
    fn test_grid_covering_respects_pixel_limit() {
        let bbox = BoundingBox::new(0.0, 0.0, 0.01, 0.01);
        assert!(RasterGrid::covering_within(&bbox, 30.0, 38 * 38).is_ok());

        let err = RasterGrid::covering_within(&bbox, 30.0, 38 * 38 - 1).unwrap_err();
        assert!(err.is_user_input());

        // Continental extent at 30 m
        let continent = BoundingBox::new(0.0, 0.0, 60.0, 40.0);
        assert!(RasterGrid::covering(&continent, 30.0).unwrap_err().is_user_input());

        // Row/column product past usize::MAX
        let err = RasterGrid::covering_within(&continent, 1e-9, usize::MAX).unwrap_err();
        assert!(err.is_user_input());
    }

    #[test]
    fn test_calendar_year_range_is_half_open() {
        let range = DateRange::calendar_year(2020).unwrap();
        let last = Utc.with_ymd_and_hms(2020, 12, 31, 23, 59, 59).unwrap();
        let next = Utc.with_ymd_and_hms(2021, 1, 1, 0, 0, 0).unwrap();

        assert!(range.contains(&last));
        assert!(!range.contains(&next));
    }

    #[test]
    fn test_aoi_validation_and_containment() {
        let aoi = AreaOfInterest::from_lon_lat(&[(0.0, 0.0), (2.0, 0.0), (2.0, 2.0), (0.0, 2.0)])
            .unwrap();
        assert!(aoi.contains(1.0, 1.0));
        assert!(!aoi.contains(3.0, 1.0));
        assert_eq!(aoi.bounding_box(), BoundingBox::new(0.0, 0.0, 2.0, 2.0));

        assert!(AreaOfInterest::from_lon_lat(&[(0.0, 0.0), (1.0, 1.0)]).is_err());
        assert!(AreaOfInterest::from_lon_lat(&[(0.0, 0.0), (1.0, 1.0), (2.0, 2.0)]).is_err());
    }

    #[test]
    fn test_property_value_parsing() {
        assert_eq!(PropertyValue::Number(2.5).as_f64(), Some(2.5));
        assert_eq!(PropertyValue::Text(" 0.1 ".to_string()).as_f64(), Some(0.1));
        assert_eq!(PropertyValue::Text("L8".to_string()).as_str(), Some("L8"));
    }
}
