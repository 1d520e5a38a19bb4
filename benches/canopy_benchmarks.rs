use canopy::binning::{bin_matrix, BinningConfig};
use canopy::boosting::GradientBoostedTrees;
use canopy::criterion::Variance;
use canopy::data::Matrix;
use canopy::ensemble::Task;
use canopy::forest::RandomForest;
use canopy::histogram::{build_histogram, HistogramStrategy};
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Duration;

const ROWS: usize = 20_000;
const COLS: usize = 8;

fn regression_data() -> (Vec<f64>, Vec<f64>) {
    let mut rng = StdRng::seed_from_u64(0);
    let x: Vec<f64> = (0..ROWS * COLS).map(|_| rng.gen::<f64>() * 100.0).collect();
    let y: Vec<f64> = (0..ROWS)
        .map(|i| x[i] * 0.5 + (x[ROWS + i] / 10.0).floor() + rng.gen::<f64>())
        .collect();
    (x, y)
}

pub fn canopy_benchmarks(c: &mut Criterion) {
    let (x, y) = regression_data();
    let data = Matrix::new(&x, ROWS, COLS);
    let labels: Vec<f64> = y.iter().map(|v| if *v > 30.0 { 1.0 } else { 0.0 }).collect();

    c.bench_function("bin_matrix", |b| {
        b.iter(|| bin_matrix(black_box(&data), black_box(&BinningConfig::default())).unwrap())
    });

    let binned = bin_matrix(&data, &BinningConfig::default()).unwrap();
    let bdata = binned.as_matrix();
    let n_bins = binned.n_bins_per_feature();
    let features: Vec<usize> = (0..COLS).collect();
    let rows: Vec<usize> = (0..ROWS).collect();
    let variance = Variance::new(&y);
    c.bench_function("histogram single pass", |b| {
        b.iter(|| {
            build_histogram(
                &variance,
                black_box(&bdata),
                &n_bins,
                &features,
                black_box(&rows),
                HistogramStrategy::SinglePass,
            )
        })
    });
    c.bench_function("histogram two phase", |b| {
        b.iter(|| {
            build_histogram(
                &variance,
                black_box(&bdata),
                &n_bins,
                &features,
                black_box(&rows),
                HistogramStrategy::TwoPhase { shards: 8 },
            )
        })
    });

    let mut forest_train = c.benchmark_group("train_forest");
    forest_train.warm_up_time(Duration::from_secs(5));
    forest_train.sample_size(10);
    forest_train.bench_function("train_forest_classification", |b| {
        b.iter(|| {
            let mut forest = RandomForest::default().set_tree_count(20);
            forest
                .fit(black_box(&data), black_box(&labels), Task::Classification { n_classes: 2 })
                .unwrap();
        })
    });
    forest_train.bench_function("train_forest_with_oob", |b| {
        b.iter(|| {
            let mut forest = RandomForest::default()
                .set_tree_count(20)
                .set_compute_oob_error(true);
            forest.fit(black_box(&data), black_box(&y), Task::Regression).unwrap();
        })
    });
    forest_train.bench_function("train_boosting", |b| {
        b.iter(|| {
            let mut model = GradientBoostedTrees::default().set_n_trees(20);
            model.fit(black_box(&data), black_box(&y)).unwrap();
        })
    });
    forest_train.finish();

    let mut forest = RandomForest::default().set_tree_count(20);
    forest.fit(&data, &labels, Task::Classification { n_classes: 2 }).unwrap();
    c.bench_function("Predict Forest (Single Threaded)", |b| {
        b.iter(|| forest.predict(black_box(&data), false).unwrap())
    });
    c.bench_function("Predict Forest (Multi Threaded)", |b| {
        b.iter(|| forest.predict(black_box(&data), true).unwrap())
    });
}

criterion_group!(benches, canopy_benchmarks);
criterion_main!(benches);
