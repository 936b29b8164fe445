use std::fs;
use std::sync::Arc;

use criterion::{Criterion, black_box, criterion_group, criterion_main};
use giztoy_infer::reference::{CpuBackend, Layer, NetworkDescription, TensorSpec};
use giztoy_infer::{DataType, InferencePipeline, ModelParams, NopLogger, softmax};

fn pipeline(dir: &std::path::Path, pool_sessions: bool) -> InferencePipeline {
    let params = ModelParams {
        data_dirs: vec![dir.to_string_lossy().into_owned()],
        pool_sessions,
        ..ModelParams::mnist()
    };
    let mut p = InferencePipeline::new(params, Arc::new(NopLogger));
    p.build(&CpuBackend::new()).unwrap();
    p
}

fn write_model(dir: &std::path::Path) {
    let weights = (0..10 * 784).map(|i| ((i % 97) as f32 - 48.0) * 1e-3).collect();
    let description = NetworkDescription {
        name: "mnist".into(),
        inputs: vec![TensorSpec {
            name: "Input3".into(),
            shape: vec![1, 1, 28, 28],
            dtype: DataType::Float,
        }],
        outputs: vec![TensorSpec {
            name: "Plus214_Output_0".into(),
            shape: vec![1, 10],
            dtype: DataType::Float,
        }],
        layers: vec![Layer::Dense {
            units: 10,
            weights,
            bias: vec![0.0; 10],
        }],
    };
    fs::write(dir.join("mnist.json"), description.to_json().unwrap()).unwrap();
}

fn bench_infer(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    write_model(dir.path());
    let fresh = pipeline(dir.path(), false);
    let pooled = pipeline(dir.path(), true);

    let mut image = vec![0u8; 784];
    for (i, v) in image.iter_mut().enumerate() {
        *v = (i * 7 % 256) as u8;
    }

    c.bench_function("infer_fresh_session", |b| {
        b.iter(|| black_box(fresh.infer(black_box(&image)).unwrap()));
    });
    c.bench_function("infer_pooled_session", |b| {
        b.iter(|| black_box(pooled.infer(black_box(&image)).unwrap()));
    });
}

fn bench_softmax(c: &mut Criterion) {
    let logits: Vec<f32> = (0..10).map(|i| i as f32 * 0.3 - 1.0).collect();
    c.bench_function("softmax_10", |b| {
        b.iter(|| black_box(softmax(black_box(&logits))));
    });
}

criterion_group!(benches, bench_infer, bench_softmax);
criterion_main!(benches);
