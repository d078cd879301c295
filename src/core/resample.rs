use crate::types::{MaskedRaster, NdviError, NdviResult, RasterGrid};
use ndarray::{Array2, Zip};

/// Nearest-neighbour resampling of a masked raster onto another grid.
///
/// Target pixels whose center falls outside the source grid are masked.
pub fn resample_nearest(
    raster: &MaskedRaster,
    from: &RasterGrid,
    to: &RasterGrid,
) -> NdviResult<MaskedRaster> {
    if raster.dim() != from.dim() {
        return Err(NdviError::Processing(format!(
            "Raster shape {:?} does not match its grid {:?}",
            raster.dim(),
            from.dim()
        )));
    }
    if from == to {
        return Ok(raster.clone());
    }

    log::debug!("Resampling {:?} -> {:?} (nearest neighbour)", from.dim(), to.dim());

    let mut data = Array2::<f32>::zeros(to.dim());
    let mut valid = Array2::from_elem(to.dim(), false);

    Zip::indexed(&mut data)
        .and(&mut valid)
        .for_each(|(row, col), out, ok| {
            let (lon, lat) = to.pixel_center(row, col);
            if let Some(value) = from.locate(lon, lat).and_then(|(r, c)| raster.get(r, c)) {
                *out = value;
                *ok = true;
            }
        });

    MaskedRaster::new(data, valid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::GeoTransform;
    use ndarray::array;

    #[test]
    fn test_identity_grid_is_a_copy() {
        let grid = RasterGrid::new(2, 2, GeoTransform::north_up(0.0, 2.0, 1.0, 1.0));
        let raster = MaskedRaster::from_data(array![[1.0, 2.0], [3.0, 4.0]]);
        assert_eq!(resample_nearest(&raster, &grid, &grid).unwrap(), raster);
    }

    #[test]
    fn test_upsample_and_outside_pixels() {
        let coarse = RasterGrid::new(2, 2, GeoTransform::north_up(0.0, 2.0, 1.0, 1.0));
        // Finer grid reaching one coarse pixel past the eastern edge
        let fine = RasterGrid::new(4, 6, GeoTransform::north_up(0.0, 2.0, 0.5, 0.5));
        let raster = MaskedRaster::from_data(array![[1.0, 2.0], [3.0, 4.0]]);

        let out = resample_nearest(&raster, &coarse, &fine).unwrap();
        assert_eq!(out.get(0, 0), Some(1.0));
        assert_eq!(out.get(0, 3), Some(2.0));
        assert_eq!(out.get(3, 1), Some(3.0));
        assert_eq!(out.get(3, 3), Some(4.0));
        assert_eq!(out.get(0, 4), None);
        assert_eq!(out.get(3, 5), None);
    }
}
