use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use rand::Rng;
use routelsm::util::comparator::BytewiseComparator;
use routelsm::OrderedIndex;

const N_KEYS: usize = 10_000;
const CAPACITY: usize = 64;

fn random_keys(n: usize) -> Vec<Vec<u8>> {
    let mut rnd = rand::thread_rng();
    (0..n)
        .map(|_| format!("key{:012}", rnd.gen::<u32>()).into_bytes())
        .collect()
}

fn build_index(keys: &[Vec<u8>]) -> OrderedIndex<BytewiseComparator> {
    let mut index = OrderedIndex::new(BytewiseComparator::default(), CAPACITY).unwrap();
    for (i, k) in keys.iter().enumerate() {
        index.insert(k, i as u64);
    }
    index
}

fn bench_insert(c: &mut Criterion) {
    let keys = random_keys(N_KEYS);
    c.bench_function("bplus_tree_insert_10k", |b| {
        b.iter_batched(
            || keys.clone(),
            |keys| build_index(&keys),
            BatchSize::SmallInput,
        );
    });
}

fn bench_search(c: &mut Criterion) {
    let keys = random_keys(N_KEYS);
    let index = build_index(&keys);
    let mut rnd = rand::thread_rng();
    c.bench_function("bplus_tree_search_hit", |b| {
        b.iter(|| {
            let k = &keys[rnd.gen_range(0..keys.len())];
            index.search(k)
        });
    });
    c.bench_function("bplus_tree_search_miss", |b| {
        b.iter(|| index.search(b"zzz-not-present"));
    });
}

fn bench_cursor_scan(c: &mut Criterion) {
    let keys = random_keys(N_KEYS);
    let index = build_index(&keys);
    c.bench_function("bplus_tree_scan_10k", |b| {
        b.iter(|| index.iter().count());
    });
}

criterion_group!(benches, bench_insert, bench_search, bench_cursor_scan);
criterion_main!(benches);
