use divan::{black_box, Bencher};
use ndarray::Array3;
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64;
use sls_features::{dense_flow, DescriptorField, NoProgress, TieBreak};

fn main() {
    divan::main();
}

fn random_field(seed: u64, rows: usize, cols: usize, channels: usize) -> DescriptorField {
    let mut rng = Pcg64::seed_from_u64(seed);
    DescriptorField::from_array(Array3::from_shape_fn((rows, cols, channels), |_| {
        rng.gen::<f32>()
    }))
}

#[divan::bench(args = [2, 4, 8])]
fn dense_search_radius(bencher: Bencher, radius: usize) {
    let source = random_field(1, 64, 64, 32);
    let target = random_field(2, 64, 64, 32);

    bencher.bench_local(|| {
        black_box(dense_flow(&source, &target, radius, TieBreak::ScanOrder, &NoProgress).unwrap())
    });
}

#[divan::bench(sample_count = 20)]
fn dense_search_sls_channels(bencher: Bencher) {
    // D' = 32 gives 528 channels
    let source = random_field(3, 48, 48, 528);
    let target = random_field(4, 48, 48, 528);

    bencher.bench_local(|| {
        black_box(dense_flow(&source, &target, 4, TieBreak::Canonical, &NoProgress).unwrap())
    });
}
