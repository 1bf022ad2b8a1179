use criterion::{black_box, criterion_group, criterion_main, Criterion};

use cv_densemapnet::baseline::MeanDisparity;
use cv_densemapnet::images::ImageWriter;
use cv_densemapnet::prelude::*;
use ndarray::Array4;

fn epe_sweep_bench(c: &mut Criterion) {

    // Image output lands in a scratch directory
    let dir = tempfile::tempdir().unwrap();
    let images = ImageWriter::new(dir.path().join("images")).unwrap();
    let evaluator = Evaluator::new(DatasetProfile::default(), 128.0, images, false);

    // Build a synthetic split, small enough to stay cache friendly
    let split = SplitData {
        left: Array4::from_elem((8, 96, 128, 3), 120.0),
        right: Array4::from_elem((8, 96, 128, 3), 90.0),
        disparity: Array4::from_elem((8, 96, 128, 1), 0.5),
    };

    let net = MeanDisparity::new();

    // Benchmark the untimed sweep
    c.bench_function("epe sweep 8x96x128", |b| {
        b.iter(|| evaluator.evaluate(black_box(&net), &split, SplitKind::Test, false))
    });
}

criterion_group!(benches, epe_sweep_bench);
criterion_main!(benches);
