//! Time-series sampling of the monthly composite stack
//!
//! Produces the chart datasets: the spatial mean over the AOI and the value at
//! every comparison point, one sample per month.

use crate::types::{
    AreaOfInterest, ComparisonPoint, MonthlyStack, NdviResult, RasterGrid, ValidMask,
};
use chrono::{DateTime, Utc};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Legend label of the AOI series
pub const AREA_SERIES_LABEL: &str = "AOI mean NDVI";

/// One month of a chart series; `value` is `None` where nothing was observed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesPoint {
    pub timestamp: DateTime<Utc>,
    pub month: u32,
    pub value: Option<f64>,
}

/// A labelled line of the NDVI chart
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartSeries {
    pub label: String,
    pub points: Vec<SeriesPoint>,
}

impl ChartSeries {
    /// Months that carry a value
    pub fn observed(&self) -> usize {
        self.points.iter().filter(|p| p.value.is_some()).count()
    }
}

/// Both chart datasets of an analysis run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartData {
    pub area: ChartSeries,
    pub points: Vec<ChartSeries>,
}

impl ChartData {
    pub fn to_json(&self) -> NdviResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Read-only queries over a monthly stack
pub struct Sampler;

impl Sampler {
    /// Spatial mean of each month inside the AOI, always twelve samples
    pub fn area_series(stack: &MonthlyStack, aoi: &AreaOfInterest) -> ChartSeries {
        let inside = aoi_mask(stack.grid(), aoi);
        let inside_count = inside.iter().filter(|&&v| v).count();
        log::debug!("AOI covers {} pixel centers", inside_count);
        if inside_count == 0 {
            log::warn!("AOI does not contain any pixel center of the analysis grid");
        }

        let points = stack
            .iter()
            .map(|composite| {
                let raster = &composite.ndvi.raster;
                let mut sum = 0.0f64;
                let mut count = 0usize;
                for ((&value, &valid), &in_aoi) in
                    raster.data.iter().zip(raster.valid.iter()).zip(inside.iter())
                {
                    if valid && in_aoi {
                        sum += value as f64;
                        count += 1;
                    }
                }
                SeriesPoint {
                    timestamp: composite.timestamp,
                    month: composite.month,
                    value: (count > 0).then(|| sum / count as f64),
                }
            })
            .collect();

        ChartSeries {
            label: AREA_SERIES_LABEL.to_string(),
            points,
        }
    }

    /// One series per distinct point name; empty when there are no points
    pub fn point_series(stack: &MonthlyStack, points: &[ComparisonPoint]) -> Vec<ChartSeries> {
        if points.is_empty() {
            log::debug!("No comparison points, skipping point series");
            return Vec::new();
        }

        let grid = stack.grid();
        let mut seen = HashSet::new();
        let mut series = Vec::with_capacity(points.len());

        for point in points {
            if !seen.insert(point.name.as_str()) {
                log::warn!("Duplicate comparison point name {}, keeping the first", point.name);
                continue;
            }
            let pixel = grid.locate(point.location.lon, point.location.lat);
            if pixel.is_none() {
                log::warn!(
                    "{} at ({:.5}, {:.5}) lies outside the analysis grid",
                    point.name, point.location.lon, point.location.lat
                );
            }

            let samples = stack
                .iter()
                .map(|composite| SeriesPoint {
                    timestamp: composite.timestamp,
                    month: composite.month,
                    value: pixel
                        .and_then(|(row, col)| composite.ndvi.raster.get(row, col))
                        .map(f64::from),
                })
                .collect();

            series.push(ChartSeries {
                label: point.name.clone(),
                points: samples,
            });
        }

        series
    }

    pub fn chart_data(
        stack: &MonthlyStack,
        aoi: &AreaOfInterest,
        points: &[ComparisonPoint],
    ) -> ChartData {
        ChartData {
            area: Self::area_series(stack, aoi),
            points: Self::point_series(stack, points),
        }
    }
}

/// Pixels whose center lies inside the AOI
pub fn aoi_mask(grid: &RasterGrid, aoi: &AreaOfInterest) -> ValidMask {
    Array2::from_shape_fn(grid.dim(), |(row, col)| {
        let (lon, lat) = grid.pixel_center(row, col);
        aoi.contains(lon, lat)
    })
}
