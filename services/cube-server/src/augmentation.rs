//! Dataset augmentations: named functions that derive a new multi-level
//! dataset from an opened one, optionally pulling in other datasets of the
//! same configuration.

use async_trait::async_trait;
use cube_common::{CubeError, CubeResult};
use futures::future::BoxFuture;
use grid_processor::{Dataset, GridProcessorError, LevelMapper, MultiLevelDataset};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Future resolving another dataset of the running configuration.
pub type DatasetFuture = BoxFuture<'static, CubeResult<Arc<MultiLevelDataset>>>;

type Resolver = Arc<dyn Fn(String, Arc<Vec<String>>) -> DatasetFuture + Send + Sync>;

/// Gives an augmentation access to other datasets by identifier.
///
/// Datasets still under construction on this call path are refused, which
/// turns a cyclic configuration into an error instead of a deadlock.
#[derive(Clone)]
pub struct DatasetGetter {
    chain: Arc<Vec<String>>,
    resolve: Resolver,
}

impl DatasetGetter {
    /// `chain` lists the datasets being constructed, outermost first.
    pub fn new<F>(chain: Vec<String>, resolve: F) -> Self
    where
        F: Fn(String, Arc<Vec<String>>) -> DatasetFuture + Send + Sync + 'static,
    {
        Self {
            chain: Arc::new(chain),
            resolve: Arc::new(resolve),
        }
    }

    /// Identifier of the dataset being augmented.
    pub fn constructing(&self) -> Option<&str> {
        self.chain.last().map(String::as_str)
    }

    pub async fn get(&self, ds_id: &str) -> CubeResult<Arc<MultiLevelDataset>> {
        if self.chain.iter().any(|id| id == ds_id) {
            return Err(CubeError::configuration(format!(
                "augmentation of '{}' cannot use dataset '{}' while it is being constructed",
                self.constructing().unwrap_or_default(),
                ds_id
            )));
        }
        (self.resolve)(ds_id.to_string(), Arc::clone(&self.chain)).await
    }
}

impl std::fmt::Debug for DatasetGetter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatasetGetter").field("chain", &self.chain).finish()
    }
}

#[async_trait]
pub trait Augmentation: Send + Sync {
    /// Derive the served dataset from `ml`. Called once per construction.
    async fn augment(
        &self,
        ml: Arc<MultiLevelDataset>,
        others: &DatasetGetter,
        params: &Value,
    ) -> CubeResult<MultiLevelDataset>;
}

/// Augmentations by name.
#[derive(Clone, Default)]
pub struct AugmentationRegistry {
    functions: HashMap<String, Arc<dyn Augmentation>>,
}

impl AugmentationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding `scale_offset` and `merge`.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("scale_offset", ScaleOffset);
        registry.register("merge", Merge);
        registry
    }

    pub fn register(&mut self, name: impl Into<String>, augmentation: impl Augmentation + 'static) {
        self.functions.insert(name.into(), Arc::new(augmentation));
    }

    pub fn get(&self, name: &str) -> CubeResult<Arc<dyn Augmentation>> {
        self.functions
            .get(name)
            .cloned()
            .ok_or_else(|| CubeError::configuration(format!("unknown augmentation function '{}'", name)))
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.functions.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl std::fmt::Debug for AugmentationRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AugmentationRegistry").field("functions", &self.names()).finish()
    }
}

fn parse_params<T: for<'de> Deserialize<'de>>(function: &str, params: &Value) -> CubeResult<T> {
    let params = if params.is_null() { Value::Object(Default::default()) } else { params.clone() };
    serde_json::from_value(params)
        .map_err(|e| CubeError::configuration(format!("invalid parameters for '{}': {}", function, e)))
}

#[derive(Debug, Deserialize)]
struct ScaleOffsetParams {
    variable: String,
    #[serde(default = "one")]
    factor: f64,
    #[serde(default)]
    offset: f64,
    #[serde(default)]
    output: Option<String>,
}

fn one() -> f64 {
    1.0
}

/// Adds `output = variable * factor + offset` to every level.
#[derive(Debug, Clone, Copy)]
pub struct ScaleOffset;

#[async_trait]
impl Augmentation for ScaleOffset {
    async fn augment(
        &self,
        ml: Arc<MultiLevelDataset>,
        _others: &DatasetGetter,
        params: &Value,
    ) -> CubeResult<MultiLevelDataset> {
        let params: ScaleOffsetParams = parse_params("scale_offset", params)?;
        let output = params
            .output
            .clone()
            .unwrap_or_else(|| format!("{}_scaled", params.variable));
        debug!(ds_id = ml.ds_id(), variable = %params.variable, output = %output, "Adding computed variable");

        let mapper: LevelMapper = Arc::new(move |ds: &Dataset, _level: usize| {
            let source = ds.get_variable(&params.variable)?;
            let fill = source.fill_value();
            let mut computed = source.clone();
            computed.data = Arc::new(
                source
                    .data
                    .iter()
                    .map(|&v| if Some(v) == fill { f64::NAN } else { v * params.factor + params.offset })
                    .collect(),
            );
            computed.attrs.remove("_FillValue");
            Ok::<_, GridProcessorError>(ds.clone().with_var(&output, computed))
        });
        let ds_id = ml.ds_id().to_string();
        Ok(MultiLevelDataset::mapped(ds_id, ml, mapper))
    }
}

#[derive(Debug, Deserialize)]
struct MergeParams {
    datasets: Vec<String>,
}

/// Merges the variables of other datasets on the same grid.
#[derive(Debug, Clone, Copy)]
pub struct Merge;

#[async_trait]
impl Augmentation for Merge {
    async fn augment(
        &self,
        ml: Arc<MultiLevelDataset>,
        others: &DatasetGetter,
        params: &Value,
    ) -> CubeResult<MultiLevelDataset> {
        let params: MergeParams = parse_params("merge", params)?;
        let ds_id = ml.ds_id().to_string();
        let mut parts = vec![ml];
        for other in &params.datasets {
            parts.push(others.get(other).await?);
        }
        Ok(MultiLevelDataset::combined(ds_id, parts)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;

    fn failing_getter(chain: Vec<String>) -> DatasetGetter {
        DatasetGetter::new(chain, |id, _chain| {
            async move { Err(CubeError::DatasetNotFound(id)) }.boxed()
        })
    }

    #[test]
    fn test_getter_refuses_datasets_under_construction() {
        let getter = failing_getter(vec!["a".to_string(), "b".to_string()]);
        assert_eq!(getter.constructing(), Some("b"));
        assert!(matches!(
            tokio_test::block_on(getter.get("a")),
            Err(CubeError::Configuration(_))
        ));
        assert!(matches!(
            tokio_test::block_on(getter.get("c")),
            Err(CubeError::DatasetNotFound(_))
        ));
    }

    #[test]
    fn test_registry() {
        let registry = AugmentationRegistry::with_builtins();
        assert_eq!(registry.names(), vec!["merge", "scale_offset"]);
        assert!(registry.get("merge").is_ok());
        assert!(matches!(registry.get("python"), Err(CubeError::Configuration(_))));
    }

    #[test]
    fn test_params() {
        let params: ScaleOffsetParams =
            parse_params("scale_offset", &serde_json::json!({"variable": "chl", "offset": 2.0})).unwrap();
        assert_eq!(params.factor, 1.0);
        assert_eq!(params.offset, 2.0);
        assert!(parse_params::<ScaleOffsetParams>("scale_offset", &Value::Null).is_err());
    }
}
