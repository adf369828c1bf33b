use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use splat_sort::radix_argsort;

fn main() {
    divan::main();
}

const SORT_SIZES: [usize; 4] = [1 << 12, 1 << 16, 1 << 18, 1 << 20];

#[divan::bench(args = SORT_SIZES, sample_count = 10)]
fn depth_keys_16bit(bencher: divan::Bencher, n: usize) {
    let mut rng = StdRng::seed_from_u64(4);
    let keys: Vec<u32> = (0..n).map(|_| rng.gen_range(0..1 << 16)).collect();
    let values: Vec<u32> = (0..n as u32).collect();

    bencher.bench_local(|| radix_argsort(&keys, &values, 16));
}

#[divan::bench(args = SORT_SIZES, sample_count = 10)]
fn full_keys_32bit(bencher: divan::Bencher, n: usize) {
    let mut rng = StdRng::seed_from_u64(4);
    let keys: Vec<u32> = (0..n).map(|_| rng.gen()).collect();
    let values: Vec<u32> = (0..n as u32).collect();

    bencher.bench_local(|| radix_argsort(&keys, &values, 32));
}
