//! Integration tests for multi-level datasets.

use cube_common::Crs;
use grid_processor::{Dataset, GridMapping, MultiLevelDataset, PyramidConfig, ResampleOptions, Variable};
use projection::BuiltinProjections;
use std::sync::{Arc, Barrier};
use std::thread;

fn global_dataset(width: usize, height: usize) -> Dataset {
    let res = 360.0 / width as f64;
    let lons = (0..width).map(|i| -180.0 + (i as f64 + 0.5) * res).collect();
    let lats = (0..height).map(|j| 90.0 - (j as f64 + 0.5) * res).collect();
    let values = (0..width * height).map(|k| (k % 7) as f64).collect();
    Dataset::new()
        .with_coord("lon", Variable::new_1d("lon", lons))
        .with_coord("lat", Variable::new_1d("lat", lats))
        .with_var("sst", Variable::new_2d("lat", "lon", height, width, values).unwrap())
}

fn open(ds: Dataset, tile_size: usize) -> MultiLevelDataset {
    let gm = GridMapping::try_from(&ds).unwrap();
    MultiLevelDataset::from_dataset(
        "global",
        ds,
        gm,
        &PyramidConfig {
            tile_size,
            max_levels: None,
        },
        Arc::new(BuiltinProjections::new()),
        ResampleOptions::default(),
    )
    .unwrap()
}

// =============================================================================
// Level geometry
// =============================================================================

#[test]
fn test_level_grid_mappings_halve_resolution() {
    let ml = open(global_dataset(64, 32), 8);
    assert_eq!(ml.num_levels(), 3);
    for level in 1..ml.num_levels() {
        let finer = ml.level_grid_mapping(level - 1).unwrap();
        let coarser = ml.level_grid_mapping(level).unwrap();
        assert!((coarser.x_res() - 2.0 * finer.x_res()).abs() < 1e-12);
        assert_eq!(coarser.xy_bbox().min_x, finer.xy_bbox().min_x);
        assert!((coarser.xy_bbox().max_y - finer.xy_bbox().max_y).abs() < 1e-9);
    }
    let tile_grid = ml.tile_grid();
    assert_eq!(tile_grid.levels()[0].width, 16);
    assert_eq!(tile_grid.levels()[2].num_tiles_x, 8);
}

#[test]
fn test_levels_match_their_grid_mappings() {
    let ml = open(global_dataset(64, 32), 8);
    for level in 0..ml.num_levels() {
        let ds = ml.get_dataset(level).unwrap();
        let gm = ml.level_grid_mapping(level).unwrap();
        assert_eq!(ds.data_vars["sst"].shape, vec![gm.height(), gm.width()]);
        let derived = GridMapping::try_from(ds.as_ref()).unwrap();
        assert!(derived.is_close(gm, 1e-6));
    }
}

#[test]
fn test_pole_centred_global_dataset_opens() {
    let (width, height) = (16, 9);
    let lons = (0..width).map(|i| -180.0 + 22.5 * i as f64).collect();
    let lats = (0..height).map(|j| 90.0 - 22.5 * j as f64).collect();
    let ds = Dataset::new()
        .with_coord("lon", Variable::new_1d("lon", lons))
        .with_coord("lat", Variable::new_1d("lat", lats))
        .with_var("t2m", Variable::new_2d("lat", "lon", height, width, vec![1.0; width * height]).unwrap());
    let ml = open(ds, 4);
    assert_eq!(ml.num_levels(), 3);
    for level in 0..ml.num_levels() {
        let ds = ml.get_dataset(level).unwrap();
        let gm = ml.level_grid_mapping(level).unwrap();
        assert_eq!(ds.data_vars["t2m"].shape, vec![gm.height(), gm.width()]);
        assert!((gm.xy_bbox().max_y - 101.25).abs() < 1e-9);
    }
}

#[test]
fn test_reprojected_base() {
    let ds = global_dataset(36, 18);
    let gm = GridMapping::try_from(&ds).unwrap();
    let target = GridMapping::regular((16, 16), (-4_000_000.0, -4_000_000.0), (500_000.0, 500_000.0), Crs::WebMercator)
        .unwrap();
    let projected = grid_processor::resample_in_space(
        &ds,
        &gm,
        &target,
        None,
        &BuiltinProjections::new(),
        &ResampleOptions::default(),
    )
    .unwrap();
    let ml = MultiLevelDataset::from_dataset(
        "merc",
        projected,
        target,
        &PyramidConfig {
            tile_size: 4,
            max_levels: None,
        },
        Arc::new(BuiltinProjections::new()),
        ResampleOptions::default(),
    )
    .unwrap();
    let coarsest = ml.get_dataset(ml.num_levels() - 1).unwrap();
    assert_eq!(coarsest.data_vars["sst"].shape, vec![4, 4]);
    assert!(coarsest.coords.contains_key("x"));
}

#[test]
fn test_irregular_base_becomes_regular() {
    let (w, h) = (8, 8);
    let mut lon = Vec::new();
    let mut lat = Vec::new();
    for j in 0..h {
        for i in 0..w {
            lon.push(i as f64 + 0.5 + 0.05 * j as f64);
            lat.push(h as f64 - j as f64 - 0.5);
        }
    }
    let ds = Dataset::new()
        .with_coord("lon", Variable::new_2d("y", "x", h, w, lon).unwrap())
        .with_coord("lat", Variable::new_2d("y", "x", h, w, lat).unwrap())
        .with_var("v", Variable::new_2d("y", "x", h, w, vec![1.0; w * h]).unwrap());
    let ml = open(ds, 4);
    assert!(!ml.grid_mapping().is_regular());
    assert!(ml.level_grid_mapping(1).unwrap().is_regular());
    let level1 = ml.get_dataset(1).unwrap();
    let values = level1.data_vars["v"].values();
    assert!(values.iter().filter(|v| v.is_finite()).all(|v| *v == 1.0));
    assert!(values.iter().filter(|v| v.is_finite()).count() >= 9);
}

// =============================================================================
// Concurrency
// =============================================================================

#[test]
fn test_concurrent_level_access_computes_once() {
    let ml = Arc::new(open(global_dataset(128, 64), 8));
    let barrier = Arc::new(Barrier::new(8));
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let ml = Arc::clone(&ml);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                ml.get_dataset(3).unwrap()
            })
        })
        .collect();
    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    for ds in &results[1..] {
        assert!(Arc::ptr_eq(ds, &results[0]));
    }
    assert!(ml.is_level_computed(1));
    assert!(ml.is_level_computed(2));
}

#[test]
fn test_close_from_another_thread() {
    let ml = Arc::new(open(global_dataset(32, 16), 8));
    ml.get_dataset(1).unwrap();
    let closer = Arc::clone(&ml);
    thread::spawn(move || closer.close()).join().unwrap();
    assert!(ml.is_closed());
    assert!(ml.get_dataset(1).is_err());
}
