use crate::types::{
    MaskedRaster, MonthlyComposite, MonthlyStack, NdviCollection, NdviError, NdviRaster,
    NdviResult, PropertyValue, Properties, NDVI_BAND, NDVI_INDEX,
};
use chrono::{DateTime, Datelike, NaiveDate, TimeZone, Utc};
use ndarray::{Array2, Zip};
use num_traits::Float;
use serde::{Deserialize, Serialize};

/// Which rasters belong to month `m`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MonthFilterPolicy {
    /// Calendar month only; the collection is assumed to be year-bounded upstream
    #[default]
    AnyYear,
    /// Calendar month and the analysis year
    TargetYearOnly,
}

/// Year stamped onto the synthesized composite timestamps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimestampYearPolicy {
    /// `year + 1`
    #[default]
    FollowingYear,
    /// The analysis year itself
    TargetYear,
}

impl TimestampYearPolicy {
    pub fn composite_year(self, year: i32) -> i32 {
        match self {
            TimestampYearPolicy::FollowingYear => year + 1,
            TimestampYearPolicy::TargetYear => year,
        }
    }
}

/// Monthly aggregation parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregationParams {
    pub month_filter: MonthFilterPolicy,
    pub timestamp_year: TimestampYearPolicy,
}

/// Reduces an NDVI collection to twelve per-pixel median composites
#[derive(Debug, Clone)]
pub struct MonthlyAggregator {
    params: AggregationParams,
}

impl MonthlyAggregator {
    pub fn new(params: AggregationParams) -> Self {
        Self { params }
    }

    pub fn standard() -> Self {
        Self::new(AggregationParams::default())
    }

    pub fn params(&self) -> &AggregationParams {
        &self.params
    }

    /// One composite per calendar month, always in month order 1..=12.
    ///
    /// Months without contributing rasters yield fully masked composites.
    pub fn aggregate(&self, collection: &NdviCollection, year: i32) -> NdviResult<MonthlyStack> {
        log::info!(
            "Aggregating {} NDVI rasters into monthly composites for {} ({:?})",
            collection.len(),
            year,
            self.params
        );

        let dim = collection.grid().dim();
        let composite_year = self.params.timestamp_year.composite_year(year);
        let mut composites = Vec::with_capacity(12);

        for month in 1..=12u32 {
            let members = self.month_members(collection, year, month);
            let timestamp = month_start(composite_year, month)?;

            if members.is_empty() {
                log::warn!("No imagery for {}-{:02}, emitting a masked composite", year, month);
            } else {
                log::debug!("Month {:02}: {} contributing rasters", month, members.len());
            }

            let layers: Vec<&MaskedRaster> = members.iter().map(|r| &r.raster).collect();
            let raster = median_composite(&layers, dim)?;

            let mut properties = Properties::new();
            properties.insert("month".to_string(), PropertyValue::Number(month as f64));
            properties.insert("year".to_string(), PropertyValue::Number(composite_year as f64));
            properties.insert(
                "contributing_images".to_string(),
                PropertyValue::Number(members.len() as f64),
            );
            properties.insert("index".to_string(), PropertyValue::Text(NDVI_INDEX.to_string()));
            properties.insert(
                "timestamp".to_string(),
                PropertyValue::Number(timestamp.timestamp_millis() as f64),
            );

            composites.push(MonthlyComposite {
                month,
                timestamp,
                contributing: members.len(),
                ndvi: NdviRaster {
                    band_name: NDVI_BAND.to_string(),
                    index: NDVI_INDEX.to_string(),
                    timestamp,
                    grid: *collection.grid(),
                    raster,
                    properties,
                },
            });
        }

        log::info!(
            "Monthly aggregation completed: {} of 12 months have imagery",
            composites.iter().filter(|c| c.contributing > 0).count()
        );

        MonthlyStack::new(year, composites)
    }

    fn month_members<'a>(
        &self,
        collection: &'a NdviCollection,
        year: i32,
        month: u32,
    ) -> Vec<&'a NdviRaster> {
        collection
            .iter()
            .filter(|raster| raster.timestamp.month() == month)
            .filter(|raster| match self.params.month_filter {
                MonthFilterPolicy::AnyYear => true,
                MonthFilterPolicy::TargetYearOnly => raster.timestamp.year() == year,
            })
            .collect()
    }
}

/// Midnight UTC on the first day of `month`
pub fn month_start(year: i32, month: u32) -> NdviResult<DateTime<Utc>> {
    let date = NaiveDate::from_ymd_opt(year, month, 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .ok_or_else(|| NdviError::Processing(format!("Invalid month {}-{:02}", year, month)))?;
    Ok(Utc.from_utc_datetime(&date))
}

/// Median of the values, averaging the middle pair for even counts
pub fn median<T: Float>(values: &mut [T]) -> Option<T> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = values.len() / 2;
    if values.len() % 2 == 1 {
        Some(values[mid])
    } else {
        let two = T::one() + T::one();
        Some((values[mid - 1] + values[mid]) / two)
    }
}

/// Per-pixel median over the valid pixels of every layer.
///
/// A pixel with no valid contribution stays masked; zero layers give a fully
/// masked raster of shape `dim`.
pub fn median_composite(layers: &[&MaskedRaster], dim: (usize, usize)) -> NdviResult<MaskedRaster> {
    for layer in layers {
        if layer.dim() != dim {
            return Err(NdviError::Processing(format!(
                "Layer shape {:?} does not match composite shape {:?}",
                layer.dim(),
                dim
            )));
        }
    }
    if layers.is_empty() {
        return Ok(MaskedRaster::fully_masked(dim));
    }

    #[cfg(feature = "parallel")]
    {
        Ok(median_composite_parallel(layers, dim))
    }
    #[cfg(not(feature = "parallel"))]
    {
        Ok(median_composite_sequential(layers, dim))
    }
}

/// Single-threaded per-pixel median
pub fn median_composite_sequential(layers: &[&MaskedRaster], dim: (usize, usize)) -> MaskedRaster {
    let mut data = Array2::<f32>::zeros(dim);
    let mut valid = Array2::from_elem(dim, false);
    let mut buffer: Vec<f32> = Vec::with_capacity(layers.len());

    Zip::indexed(&mut data)
        .and(&mut valid)
        .for_each(|(row, col), out, ok| {
            buffer.clear();
            buffer.extend(layers.iter().filter_map(|layer| layer.get(row, col)));
            if let Some(value) = median(&mut buffer) {
                *out = value;
                *ok = true;
            }
        });

    MaskedRaster { data, valid }
}

/// Per-pixel median using Rayon
#[cfg(feature = "parallel")]
pub fn median_composite_parallel(layers: &[&MaskedRaster], dim: (usize, usize)) -> MaskedRaster {
    let mut data = Array2::<f32>::zeros(dim);
    let mut valid = Array2::from_elem(dim, false);

    Zip::indexed(&mut data)
        .and(&mut valid)
        .par_for_each(|(row, col), out, ok| {
            let mut values: Vec<f32> = layers.iter().filter_map(|layer| layer.get(row, col)).collect();
            if let Some(value) = median(&mut values) {
                *out = value;
                *ok = true;
            }
        });

    MaskedRaster { data, valid }
}
