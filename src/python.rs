//! Python bindings
//!
//! Masked pixels are returned as NaN since numpy arrays carry no mask here.

use crate::core::composite::median_composite;
use crate::core::ndvi::normalized_difference;
use crate::core::sources::ImageSourceDescriptor;
use crate::types::{MaskedRaster, NdviError};
use numpy::{IntoPyArray, PyArray2, PyReadonlyArray2};
use pyo3::prelude::*;

fn to_py_err(err: NdviError) -> PyErr {
    if err.is_user_input() {
        PyErr::new::<pyo3::exceptions::PyValueError, _>(format!("{}", err))
    } else {
        PyErr::new::<pyo3::exceptions::PyRuntimeError, _>(format!("{}", err))
    }
}

fn from_nan_array(array: PyReadonlyArray2<f32>) -> MaskedRaster {
    let data = array.as_array().to_owned();
    let valid = data.mapv(f32::is_finite);
    MaskedRaster { data, valid }
}

/// NDVI from calibrated NIR and red reflectance arrays
#[pyfunction]
fn ndvi_from_bands<'py>(
    py: Python<'py>,
    nir: PyReadonlyArray2<f32>,
    red: PyReadonlyArray2<f32>,
) -> PyResult<&'py PyArray2<f32>> {
    let nir = nir.as_array().to_owned();
    let red = red.as_array().to_owned();
    let ndvi = normalized_difference(&nir, &red, None).map_err(to_py_err)?;
    Ok(ndvi.filled(f32::NAN).into_pyarray(py))
}

/// Per-pixel median of NaN-masked layers
#[pyfunction]
fn monthly_median<'py>(py: Python<'py>, layers: Vec<PyReadonlyArray2<f32>>) -> PyResult<&'py PyArray2<f32>> {
    let rasters: Vec<MaskedRaster> = layers.into_iter().map(from_nan_array).collect();
    let dim = rasters.first().map(MaskedRaster::dim).ok_or_else(|| {
        PyErr::new::<pyo3::exceptions::PyValueError, _>("At least one layer is required")
    })?;
    let refs: Vec<&MaskedRaster> = rasters.iter().collect();
    let composite = median_composite(&refs, dim).map_err(to_py_err)?;
    Ok(composite.filled(f32::NAN).into_pyarray(py))
}

/// Catalog ids of the built-in image sources
#[pyfunction]
fn supported_sources() -> Vec<String> {
    ImageSourceDescriptor::standard_sources()
        .into_iter()
        .map(|s| s.catalog_id)
        .collect()
}

/// Python module definition
#[pymodule]
fn _ndvine(_py: Python, m: &PyModule) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(ndvi_from_bands, m)?)?;
    m.add_function(wrap_pyfunction!(monthly_median, m)?)?;
    m.add_function(wrap_pyfunction!(supported_sources, m)?)?;
    Ok(())
}
