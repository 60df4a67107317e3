use criterion::{Criterion, black_box, criterion_group, criterion_main};

use petalflow::{
    Activation, Dataset, Init, Layer, Loss, LossState, Network, NullSink, Optimizer, TrainConfig,
    Weights,
};

fn dense(in_len: usize, out_len: usize, activation: Activation, first: bool) -> Layer {
    Layer::dense(in_len, out_len)
        .first(first)
        .weights(Weights::new(Init::KaimingGaussian, 0.0, 1.0))
        .bias(Weights::constant(0.0))
        .activation(activation)
        .build_with_seed(0)
        .unwrap()
}

fn network() -> Network {
    Network::new(vec![
        dense(128, 256, Activation::RELU, true),
        dense(256, 256, Activation::RELU, false),
        dense(256, 10, Activation::Softmax, false),
    ])
    .unwrap()
}

fn network_forward_bench(c: &mut Criterion) {
    let mut network = network();
    let input = vec![0.1_f32; network.input_len()];

    c.bench_function("network_forward_128_256_256_10", |b| {
        b.iter(|| {
            let out = network.predict(black_box(&input)).unwrap();
            black_box(out);
        })
    });
}

fn network_backward_bench(c: &mut Criterion) {
    let mut network = network();
    let mut loss = LossState::new(Loss::CategoricalCrossEntropy);
    let input = vec![0.1_f32; network.input_len()];
    let mut target = vec![0.0_f32; network.output_len()];
    target[3] = 1.0;

    c.bench_function("network_forward_backward_128_256_256_10", |b| {
        b.iter(|| {
            let y = network.forward(black_box(&input), true).unwrap();
            loss.forward(y, &target).unwrap();
            let output_error = loss.backward(target.len()).unwrap();
            network.backward(&input, output_error).unwrap();
        })
    });
}

fn network_train_epoch_bench(c: &mut Criterion) {
    let base = network();
    let inputs: Vec<f32> = (0..64 * 128).map(|i| (i % 13) as f32 * 0.05).collect();
    let labels: Vec<f32> = (0..64 * 10).map(|i| f32::from(i % 10 == (i / 10) % 10)).collect();
    let data = Dataset::from_flat(inputs, labels, 128, 10).unwrap();
    let cfg = TrainConfig {
        loss: Loss::CategoricalCrossEntropy,
        optimizer: Optimizer::Adam {
            beta1: 0.9,
            beta2: 0.999,
        },
        lr: 1e-3,
        batch_size: 16,
        epochs: 1,
    };

    c.bench_function("network_train_epoch_64x128", |b| {
        b.iter(|| {
            let mut network = base.clone();
            let mut data = data.clone();
            let report = network.train(&cfg, &mut data, None, &mut NullSink).unwrap();
            black_box(report);
        })
    });
}

criterion_group!(
    benches,
    network_forward_bench,
    network_backward_bench,
    network_train_epoch_bench
);
criterion_main!(benches);
