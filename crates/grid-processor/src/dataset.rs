//! In-memory labelled N-dimensional datasets.
//!
//! A [`Dataset`] is a named collection of [`Variable`]s (data variables and
//! coordinate variables) that share dimensions by name. Values are stored as
//! row-major `f64` with NaN as the no-data marker; the buffer sits behind an
//! `Arc` so clones and level hand-offs are cheap.

use crate::error::{GridProcessorError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Attribute map of a variable or dataset.
pub type Attrs = Map<String, Value>;

/// A single labelled N-dimensional array.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Variable {
    pub dims: Vec<String>,
    pub shape: Vec<usize>,
    #[serde(with = "nan_as_null")]
    pub data: Arc<Vec<f64>>,
    #[serde(default)]
    pub attrs: Attrs,
}

impl Variable {
    /// Create a variable, checking that dims, shape and data agree.
    pub fn new(dims: Vec<String>, shape: Vec<usize>, data: Vec<f64>) -> Result<Self> {
        let var = Self {
            dims,
            shape,
            data: Arc::new(data),
            attrs: Attrs::new(),
        };
        var.validate()?;
        Ok(var)
    }

    /// A 1-D variable along `dim`.
    pub fn new_1d(dim: &str, values: Vec<f64>) -> Self {
        Self {
            dims: vec![dim.to_string()],
            shape: vec![values.len()],
            data: Arc::new(values),
            attrs: Attrs::new(),
        }
    }

    /// A 2-D variable with dims `(y_dim, x_dim)`.
    pub fn new_2d(y_dim: &str, x_dim: &str, height: usize, width: usize, data: Vec<f64>) -> Result<Self> {
        Self::new(
            vec![y_dim.to_string(), x_dim.to_string()],
            vec![height, width],
            data,
        )
    }

    /// A 0-D variable holding a single value.
    pub fn scalar(value: f64) -> Self {
        Self {
            dims: Vec::new(),
            shape: Vec::new(),
            data: Arc::new(vec![value]),
            attrs: Attrs::new(),
        }
    }

    pub fn with_attr(mut self, key: &str, value: Value) -> Self {
        self.attrs.insert(key.to_string(), value);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.dims.len() != self.shape.len() {
            return Err(GridProcessorError::invalid_dataset(format!(
                "{} dimension name(s) for a shape of rank {}",
                self.dims.len(),
                self.shape.len()
            )));
        }
        let expected: usize = self.shape.iter().product();
        if expected != self.data.len() {
            return Err(GridProcessorError::invalid_dataset(format!(
                "shape {:?} needs {} value(s), got {}",
                self.shape,
                expected,
                self.data.len()
            )));
        }
        Ok(())
    }

    pub fn ndim(&self) -> usize {
        self.dims.len()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn values(&self) -> &[f64] {
        &self.data
    }

    /// Size along a named dimension.
    pub fn dim_size(&self, dim: &str) -> Option<usize> {
        self.dims.iter().position(|d| d == dim).map(|i| self.shape[i])
    }

    pub fn has_dim(&self, dim: &str) -> bool {
        self.dims.iter().any(|d| d == dim)
    }

    /// True if the two trailing dimensions are `(y_dim, x_dim)`.
    pub fn has_trailing_dims(&self, y_dim: &str, x_dim: &str) -> bool {
        let n = self.dims.len();
        n >= 2 && self.dims[n - 2] == y_dim && self.dims[n - 1] == x_dim
    }

    /// Height and width of the trailing 2-D plane.
    pub fn plane_shape(&self) -> Option<(usize, usize)> {
        let n = self.shape.len();
        (n >= 2).then(|| (self.shape[n - 2], self.shape[n - 1]))
    }

    /// Number of 2-D planes along the leading dimensions.
    pub fn num_planes(&self) -> usize {
        match self.plane_shape() {
            Some((h, w)) if h * w > 0 => self.data.len() / (h * w),
            _ => 0,
        }
    }

    /// The `index`-th trailing 2-D plane in row-major order.
    pub fn plane(&self, index: usize) -> Option<&[f64]> {
        let (h, w) = self.plane_shape()?;
        let size = h * w;
        let start = index.checked_mul(size)?;
        self.data.get(start..start + size)
    }

    /// Value of the `_FillValue` attribute, if any.
    pub fn fill_value(&self) -> Option<f64> {
        self.attrs.get("_FillValue").and_then(Value::as_f64)
    }

    /// Copy of a plane with `_FillValue` replaced by NaN.
    pub fn masked_plane(&self, index: usize) -> Option<Vec<f64>> {
        let plane = self.plane(index)?;
        Some(match self.fill_value() {
            Some(fill) if !fill.is_nan() => plane
                .iter()
                .map(|&v| if v == fill { f64::NAN } else { v })
                .collect(),
            _ => plane.to_vec(),
        })
    }

    /// Minimum and maximum of the finite values.
    pub fn value_range(&self) -> Option<(f64, f64)> {
        let fill = self.fill_value();
        self.data
            .iter()
            .copied()
            .filter(|v| v.is_finite() && Some(*v) != fill)
            .fold(None, |acc, v| match acc {
                None => Some((v, v)),
                Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
            })
    }

    /// Cut the trailing 2-D plane to rows `j0..j1` and columns `i0..i1`.
    pub fn slice_plane(&self, i0: usize, j0: usize, i1: usize, j1: usize) -> Result<Variable> {
        let (h, w) = self
            .plane_shape()
            .ok_or_else(|| GridProcessorError::invalid_dataset("variable has fewer than 2 dimensions"))?;
        if i0 > i1 || j0 > j1 || i1 > w || j1 > h {
            return Err(GridProcessorError::invalid_dataset(format!(
                "window [{}..{}, {}..{}] outside plane of {}x{}",
                i0, i1, j0, j1, w, h
            )));
        }
        let mut data = Vec::with_capacity(self.num_planes() * (i1 - i0) * (j1 - j0));
        for k in 0..self.num_planes() {
            let plane = &self.data[k * h * w..(k + 1) * h * w];
            for j in j0..j1 {
                data.extend_from_slice(&plane[j * w + i0..j * w + i1]);
            }
        }
        let mut shape = self.shape.clone();
        let n = shape.len();
        shape[n - 2] = j1 - j0;
        shape[n - 1] = i1 - i0;
        Ok(Variable {
            dims: self.dims.clone(),
            shape,
            data: Arc::new(data),
            attrs: self.attrs.clone(),
        })
    }

    /// Same values, compared bit for bit (NaN equals NaN).
    pub fn bit_eq(&self, other: &Variable) -> bool {
        self.dims == other.dims
            && self.shape == other.shape
            && self.attrs == other.attrs
            && self.data.len() == other.data.len()
            && self
                .data
                .iter()
                .zip(other.data.iter())
                .all(|(a, b)| a.to_bits() == b.to_bits())
    }
}

/// A named collection of variables sharing dimensions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Dataset {
    #[serde(default)]
    pub coords: BTreeMap<String, Variable>,
    #[serde(default)]
    pub data_vars: BTreeMap<String, Variable>,
    #[serde(default)]
    pub attrs: Attrs,
}

impl Dataset {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_coord(mut self, name: &str, var: Variable) -> Self {
        self.coords.insert(name.to_string(), var);
        self
    }

    pub fn with_var(mut self, name: &str, var: Variable) -> Self {
        self.data_vars.insert(name.to_string(), var);
        self
    }

    pub fn with_attr(mut self, key: &str, value: Value) -> Self {
        self.attrs.insert(key.to_string(), value);
        self
    }

    /// Names of the data variables, sorted.
    pub fn var_names(&self) -> Vec<&str> {
        self.data_vars.keys().map(String::as_str).collect()
    }

    pub fn variable(&self, name: &str) -> Option<&Variable> {
        self.data_vars.get(name)
    }

    /// A data variable, or `VariableNotFound`.
    pub fn get_variable(&self, name: &str) -> Result<&Variable> {
        self.data_vars
            .get(name)
            .ok_or_else(|| GridProcessorError::VariableNotFound(name.to_string()))
    }

    pub fn coord(&self, name: &str) -> Option<&Variable> {
        self.coords.get(name)
    }

    /// A coordinate or data variable by name, coordinates first.
    pub fn any_variable(&self, name: &str) -> Option<&Variable> {
        self.coords.get(name).or_else(|| self.data_vars.get(name))
    }

    pub fn attr(&self, key: &str) -> Option<&Value> {
        self.attrs.get(key)
    }

    pub fn set_attr(&mut self, key: &str, value: Value) {
        self.attrs.insert(key.to_string(), value);
    }

    /// Sizes of all dimensions, checking that variables agree on them.
    pub fn dim_sizes(&self) -> Result<BTreeMap<String, usize>> {
        let mut sizes = BTreeMap::new();
        for (name, var) in self.coords.iter().chain(self.data_vars.iter()) {
            for (dim, &size) in var.dims.iter().zip(&var.shape) {
                match sizes.get(dim) {
                    Some(&existing) if existing != size => {
                        return Err(GridProcessorError::invalid_dataset(format!(
                            "variable '{}' has size {} along '{}', expected {}",
                            name, size, dim, existing
                        )));
                    }
                    Some(_) => {}
                    None => {
                        sizes.insert(dim.clone(), size);
                    }
                }
            }
        }
        Ok(sizes)
    }

    /// Check every variable and the dimension sizes.
    pub fn validate(&self) -> Result<()> {
        for var in self.coords.values().chain(self.data_vars.values()) {
            var.validate()?;
        }
        self.dim_sizes().map(|_| ())
    }

    /// A copy restricted to the given data variables. Coordinates are kept.
    pub fn select_vars<S: AsRef<str>>(&self, names: &[S]) -> Result<Dataset> {
        let mut data_vars = BTreeMap::new();
        for name in names {
            let name = name.as_ref();
            let var = self.get_variable(name)?;
            data_vars.insert(name.to_string(), var.clone());
        }
        Ok(Dataset {
            coords: self.coords.clone(),
            data_vars,
            attrs: self.attrs.clone(),
        })
    }

    /// Approximate in-memory size of the values.
    pub fn nbytes(&self) -> usize {
        self.coords
            .values()
            .chain(self.data_vars.values())
            .map(|v| v.len() * std::mem::size_of::<f64>())
            .sum()
    }

    pub fn from_json_slice(bytes: &[u8]) -> Result<Dataset> {
        let ds: Dataset = serde_json::from_slice(bytes)
            .map_err(|e| GridProcessorError::invalid_dataset(e.to_string()))?;
        ds.validate()?;
        Ok(ds)
    }

    pub fn to_json_vec(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| GridProcessorError::invalid_dataset(e.to_string()))
    }
}

/// JSON has no NaN, so no-data travels as `null`.
mod nan_as_null {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::sync::Arc;

    pub fn serialize<S: Serializer>(data: &Arc<Vec<f64>>, serializer: S) -> Result<S::Ok, S::Error> {
        let values: Vec<Option<f64>> = data
            .iter()
            .map(|&v| if v.is_finite() { Some(v) } else { None })
            .collect();
        values.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Arc<Vec<f64>>, D::Error> {
        let values = Vec::<Option<f64>>::deserialize(deserializer)?;
        Ok(Arc::new(
            values.into_iter().map(|v| v.unwrap_or(f64::NAN)).collect(),
        ))
    }
}
