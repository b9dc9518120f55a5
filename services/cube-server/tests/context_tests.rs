//! Service context behaviour: dataset caching, configuration changes,
//! tiles and augmentations.

use async_trait::async_trait;
use cube_common::{Crs, CubeError, CubeResult};
use cube_server::{
    Augmentation, AugmentationRegistry, ContextOptions, DatasetConfig, DatasetGetter, ServerConfig, ServiceContext,
};
use grid_processor::{Dataset, GridMapping, MultiLevelDataset, Variable};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use storage::{DataFormat, MemoryStore};

const WIDTH: usize = 16;
const HEIGHT: usize = 8;

/// 16x8 one-degree grid with `var_name` holding `offset + row-major index`.
fn cube(var_name: &str, offset: f64) -> Dataset {
    let lon: Vec<f64> = (0..WIDTH).map(|i| i as f64 + 0.5).collect();
    let lat: Vec<f64> = (0..HEIGHT).rev().map(|j| j as f64 + 0.5).collect();
    let values: Vec<f64> = (0..WIDTH * HEIGHT).map(|v| v as f64 + offset).collect();
    Dataset::new()
        .with_coord("lon", Variable::new_1d("lon", lon))
        .with_coord("lat", Variable::new_1d("lat", lat))
        .with_var(var_name, Variable::new_2d("lat", "lon", HEIGHT, WIDTH, values).unwrap())
}

fn config(datasets: Vec<DatasetConfig>) -> ServerConfig {
    ServerConfig {
        tile_size: 4,
        datasets,
        ..ServerConfig::default()
    }
}

fn context_with(memory: &MemoryStore, datasets: Vec<DatasetConfig>) -> ServiceContext {
    let options = ContextOptions {
        memory_store: memory.clone(),
        ..ContextOptions::default()
    };
    ServiceContext::new(config(datasets), options).unwrap()
}

fn decode(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_first_access_opens_once() {
    let memory = MemoryStore::new();
    memory.insert("sst", cube("sst", 0.0));
    let ctx = Arc::new(context_with(&memory, vec![DatasetConfig::new("sst", "sst").in_memory()]));

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let ctx = Arc::clone(&ctx);
            tokio::spawn(async move { ctx.get_ml_dataset("sst").await.unwrap() })
        })
        .collect();

    let mut datasets = Vec::new();
    for handle in handles {
        datasets.push(handle.await.unwrap());
    }

    assert!(datasets.iter().all(|ml| Arc::ptr_eq(ml, &datasets[0])));
    assert_eq!(memory.open_count(), 1);
    assert_eq!(ctx.dataset_constructions().await.unwrap(), 1);
}

#[tokio::test]
async fn test_pyramid_levels() {
    let memory = MemoryStore::new();
    memory.insert("sst", cube("sst", 0.0));
    let ctx = context_with(&memory, vec![DatasetConfig::new("sst", "sst").in_memory()]);

    let tile_grid = ctx.get_tile_grid("sst").await.unwrap();
    assert_eq!(tile_grid.num_levels(), 2);
    assert_eq!(tile_grid.level(0).unwrap().num_tiles_x, 2);
    assert_eq!(tile_grid.level(1).unwrap().num_tiles_x, 4);

    let coarse = ctx.get_dataset("sst", 1).await.unwrap();
    let sst = coarse.variable("sst").unwrap();
    assert_eq!(sst.plane_shape(), Some((HEIGHT / 2, WIDTH / 2)));
    // Mean of cells 0, 1, 16 and 17.
    assert!((sst.data[0] - 8.5).abs() < 1e-9);

    assert!(matches!(ctx.get_dataset("sst", 2).await, Err(CubeError::TileIndex { .. })));
}

#[tokio::test]
async fn test_set_config_invalidates() {
    let memory = MemoryStore::new();
    memory.insert("sst-v1", cube("sst", 0.0));
    memory.insert("sst-v2", cube("sst", 1000.0));
    let ctx = context_with(&memory, vec![DatasetConfig::new("sst", "sst-v1").in_memory()]);

    let old = ctx.get_ml_dataset("sst").await.unwrap();
    ctx.get_tile("sst", "sst", 1, 0, 0).await.unwrap();
    assert_eq!(ctx.tile_cache_stats().await.unwrap().entry_count, 1);

    ctx.set_config(config(vec![DatasetConfig::new("sst", "sst-v2").in_memory()]))
        .await
        .unwrap();

    assert!(old.is_closed());
    assert_eq!(ctx.tile_cache_stats().await.unwrap().entry_count, 0);

    let new = ctx.get_ml_dataset("sst").await.unwrap();
    assert!(!Arc::ptr_eq(&old, &new));
    let base = ctx.get_dataset("sst", 0).await.unwrap();
    assert_eq!(base.variable("sst").unwrap().data[0], 1000.0);
}

#[tokio::test]
async fn test_invalid_config_keeps_previous() {
    let memory = MemoryStore::new();
    memory.insert("sst", cube("sst", 0.0));
    let ctx = context_with(&memory, vec![DatasetConfig::new("sst", "sst").in_memory()]);
    let ml = ctx.get_ml_dataset("sst").await.unwrap();

    let duplicate = config(vec![
        DatasetConfig::new("a", "a").in_memory(),
        DatasetConfig::new("a", "b").in_memory(),
    ]);
    assert!(matches!(ctx.set_config(duplicate).await, Err(CubeError::Configuration(_))));
    assert!(!ml.is_closed());
    assert!(Arc::ptr_eq(&ml, &ctx.get_ml_dataset("sst").await.unwrap()));
}

#[tokio::test]
async fn test_error_kinds() {
    let memory = MemoryStore::new();
    memory.insert("sst", cube("sst", 0.0));
    let ctx = context_with(&memory, vec![DatasetConfig::new("sst", "sst").in_memory()]);

    let err = ctx.get_tile("nope", "sst", 0, 0, 0).await.unwrap_err();
    assert!(matches!(err, CubeError::DatasetNotFound(_)));
    assert_eq!(err.http_status_code(), 404);

    let err = ctx.get_tile("sst", "sst", 0, -1, 0).await.unwrap_err();
    assert!(matches!(err, CubeError::TileIndex { .. }));
    assert!(err.is_client_error());

    let err = ctx.get_tile("sst", "sst", 0, 2, 0).await.unwrap_err();
    assert!(matches!(err, CubeError::TileIndex { .. }));

    let err = ctx.get_tile("sst", "chl", 0, 0, 0).await.unwrap_err();
    match err {
        CubeError::VariableNotFound { ds_id, var_name } => {
            assert_eq!(ds_id, "sst");
            assert_eq!(var_name, "chl");
        }
        other => panic!("unexpected error {:?}", other),
    }
}

#[tokio::test]
async fn test_failed_open_is_not_cached() {
    let memory = MemoryStore::new();
    let ctx = context_with(&memory, vec![DatasetConfig::new("sst", "later").in_memory()]);

    assert!(matches!(ctx.get_ml_dataset("sst").await, Err(CubeError::Storage(_))));

    memory.insert("later", cube("sst", 0.0));
    assert!(ctx.get_ml_dataset("sst").await.is_ok());
    assert_eq!(memory.open_count(), 2);
}

#[tokio::test]
async fn test_tiles_are_cached() {
    let memory = MemoryStore::new();
    memory.insert("sst", cube("sst", 0.0));
    let ctx = context_with(&memory, vec![DatasetConfig::new("sst", "sst").in_memory()]);

    let first = ctx.get_tile("sst", "sst", 1, 3, 1).await.unwrap();
    let second = ctx.get_tile("sst", "sst", 1, 3, 1).await.unwrap();
    assert_eq!(first, second);

    let stats = ctx.tile_cache_stats().await.unwrap();
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.entry_count, 1);

    // Tile (3, 1) of the native level starts at row 4, column 12.
    let values = decode(&first);
    assert_eq!(values.len(), 16);
    let max = (WIDTH * HEIGHT - 1) as f32;
    assert!((values[0] - (4.0 * WIDTH as f32 + 12.0) / max).abs() < 1e-6);
}

#[tokio::test]
async fn test_color_mapping_from_style() {
    let memory = MemoryStore::new();
    memory.insert("sst", cube("sst", 0.0));
    let yaml = r#"
tile_size: 4
datasets:
  - identifier: sst
    path: sst
    file_system: memory
    style: ocean
styles:
  - identifier: ocean
    color_mappings:
      sst: { color_bar: thermal, value_range: [0.0, 10.0] }
"#;
    let options = ContextOptions {
        memory_store: memory.clone(),
        ..ContextOptions::default()
    };
    let ctx = ServiceContext::new(ServerConfig::from_yaml_str(yaml).unwrap(), options).unwrap();

    let mapping = ctx.get_color_mapping("sst", "sst").await.unwrap();
    assert_eq!(mapping.color_bar, "thermal");
    assert_eq!(mapping.value_range, (0.0, 10.0));

    let values = decode(&ctx.get_tile("sst", "sst", 1, 0, 0).await.unwrap());
    assert_eq!(values[5], 1.0);
}

#[tokio::test]
async fn test_resample_dataset() {
    let memory = MemoryStore::new();
    memory.insert("sst", cube("sst", 0.0));
    let ctx = context_with(&memory, vec![DatasetConfig::new("sst", "sst").in_memory()]);

    let target = GridMapping::regular((4, 2), (0.0, 0.0), (4.0, 4.0), Crs::Wgs84).unwrap();
    let out = ctx.resample_dataset("sst", &target, None).await.unwrap();
    let sst = out.variable("sst").unwrap();
    assert_eq!(sst.plane_shape(), Some((2, 4)));
    // Mean over rows 0..4 and columns 0..4.
    let expected = (0..4)
        .flat_map(|j| (0..4).map(move |i| (j * WIDTH + i) as f64))
        .sum::<f64>()
        / 16.0;
    assert!((sst.data[0] - expected).abs() < 1e-9);
}

#[tokio::test]
async fn test_resample_dataset_window() {
    let memory = MemoryStore::new();
    memory.insert("sst", cube("sst", 0.0));
    let ctx = context_with(&memory, vec![DatasetConfig::new("sst", "sst").in_memory()]);

    let target = GridMapping::regular((3, 2), (5.0, 2.0), (1.0, 1.0), Crs::Wgs84).unwrap();
    let out = ctx.resample_dataset("sst", &target, None).await.unwrap();
    let sst = out.variable("sst").unwrap();
    assert_eq!(sst.plane_shape(), Some((2, 3)));
    let expected = [69.0, 70.0, 71.0, 85.0, 86.0, 87.0];
    for (got, want) in sst.data.iter().zip(expected) {
        assert!((got - want).abs() < 1e-9, "{} != {}", got, want);
    }
}

#[tokio::test]
async fn test_directory_levels_dataset() {
    let tmp = tempfile::TempDir::new().unwrap();
    let dir = tmp.path().join("sst.levels");
    std::fs::create_dir(&dir).unwrap();
    let base = cube("sst", 0.0);
    std::fs::write(dir.join("0.json"), base.to_json_vec().unwrap()).unwrap();

    let gm = GridMapping::from_dataset(&base, None, 1e-5).unwrap();
    let coarse_gm = gm.coarsened(2).unwrap();
    let coarse = grid_processor::resample_in_space(
        &base,
        &gm,
        &coarse_gm,
        None,
        &projection::BuiltinProjections::new(),
        &Default::default(),
    )
    .unwrap();
    std::fs::write(dir.join("1.json"), coarse.to_json_vec().unwrap()).unwrap();

    let config = ServerConfig {
        base_dir: tmp.path().to_path_buf(),
        tile_size: 4,
        datasets: vec![DatasetConfig::new("sst", "sst.levels").with_format(DataFormat::Levels)],
        ..ServerConfig::default()
    };
    let ctx = ServiceContext::new(config, ContextOptions::default()).unwrap();

    let ml = ctx.get_ml_dataset("sst").await.unwrap();
    assert_eq!(ml.num_levels(), 2);
    assert!(ml.is_level_computed(1));
    let tile = ctx.get_tile("sst", "sst", 0, 1, 0).await.unwrap();
    assert_eq!(tile.len(), 64);
}

struct Counting {
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl Augmentation for Counting {
    async fn augment(
        &self,
        ml: Arc<MultiLevelDataset>,
        _others: &DatasetGetter,
        _params: &Value,
    ) -> CubeResult<MultiLevelDataset> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let ds_id = ml.ds_id().to_string();
        Ok(MultiLevelDataset::identity(ds_id, ml))
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_augmentation_runs_once_per_construction() {
    let memory = MemoryStore::new();
    memory.insert("sst", cube("sst", 0.0));
    let calls = Arc::new(AtomicUsize::new(0));
    let mut augmentations = AugmentationRegistry::new();
    augmentations.register("count", Counting { calls: Arc::clone(&calls) });
    let options = ContextOptions {
        memory_store: memory.clone(),
        augmentations,
        ..ContextOptions::default()
    };
    let datasets = vec![DatasetConfig::new("sst", "sst").in_memory().with_augmentation("count", Value::Null)];
    let ctx = Arc::new(ServiceContext::new(config(datasets.clone()), options).unwrap());

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let ctx = Arc::clone(&ctx);
            tokio::spawn(async move { ctx.get_tile("sst", "sst", 0, 0, 0).await.map(|b| b.len()) })
        })
        .collect();
    for handle in handles {
        assert_eq!(handle.await.unwrap().unwrap(), 64);
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    ctx.set_config(config(datasets)).await.unwrap();
    ctx.get_ml_dataset("sst").await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_builtin_augmentations() {
    let memory = MemoryStore::new();
    memory.insert("sst", cube("sst", 0.0));
    memory.insert("chl", cube("chl", 5.0));
    let datasets = vec![
        DatasetConfig::new("sst", "sst")
            .in_memory()
            .with_augmentation("scale_offset", json!({"variable": "sst", "factor": 2.0, "output": "sst2"})),
        DatasetConfig::new("chl", "chl").in_memory(),
        DatasetConfig::new("both", "sst")
            .in_memory()
            .with_augmentation("merge", json!({"datasets": ["chl"]})),
    ];
    let ctx = context_with(&memory, datasets);

    let sst = ctx.get_dataset("sst", 0).await.unwrap();
    assert_eq!(sst.variable("sst2").unwrap().data[3], 6.0);

    let both = ctx.get_dataset("both", 1).await.unwrap();
    assert!(both.variable("sst").is_some());
    assert!(both.variable("chl").is_some());
    assert!(ctx.get_tile("both", "chl", 0, 0, 0).await.is_ok());
}

#[tokio::test]
async fn test_cyclic_augmentation_is_refused() {
    let memory = MemoryStore::new();
    memory.insert("a", cube("a", 0.0));
    memory.insert("b", cube("b", 0.0));
    let datasets = vec![
        DatasetConfig::new("a", "a")
            .in_memory()
            .with_augmentation("merge", json!({"datasets": ["b"]})),
        DatasetConfig::new("b", "b")
            .in_memory()
            .with_augmentation("merge", json!({"datasets": ["a"]})),
    ];
    let ctx = context_with(&memory, datasets);

    let err = tokio::time::timeout(std::time::Duration::from_secs(5), ctx.get_ml_dataset("a"))
        .await
        .expect("cyclic augmentation must not deadlock")
        .unwrap_err();
    assert!(matches!(err, CubeError::Configuration(_)));
}

#[tokio::test]
async fn test_close() {
    let memory = MemoryStore::new();
    memory.insert("sst", cube("sst", 0.0));
    let ctx = context_with(&memory, vec![DatasetConfig::new("sst", "sst").in_memory()]);
    let ml = ctx.get_ml_dataset("sst").await.unwrap();

    ctx.close().await;
    ctx.close().await;
    assert!(ml.is_closed());
    assert!(ctx.get_ml_dataset("sst").await.is_err());
}
