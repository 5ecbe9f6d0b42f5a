use tcseed_chunks::{hash_bytes, ChunkDescriptor, ChunkIndex};
use tcseed_engine::{plan, ClonePlan, SeedIndex};

/// Index of 4KB chunks whose IDs cycle through `distinct` values
fn make_index(chunks: usize, distinct: usize) -> ChunkIndex {
    let descriptors = (0..chunks)
        .map(|i| {
            let tag = ((i % distinct) as u64).to_le_bytes();
            ChunkDescriptor::new(hash_bytes(&tag), i as u64 * 4096, 4096)
        })
        .collect();
    ChunkIndex::new(descriptors).unwrap()
}

#[divan::bench(args = [1_000, 10_000, 50_000])]
fn seed_index_build(bencher: divan::Bencher, chunks: usize) {
    bencher
        .with_inputs(|| make_index(chunks, chunks))
        .bench_values(|index| SeedIndex::with_reflink("/seed", index, false));
}

#[divan::bench(args = [1_000, 10_000, 50_000])]
fn longest_match_unique(bencher: divan::Bencher, chunks: usize) {
    let seed = SeedIndex::with_reflink("/seed", make_index(chunks, chunks), false);
    let query = make_index(chunks / 2, chunks);
    bencher.bench(|| seed.find_longest_match(divan::black_box(query.chunks())).0);
}

/// Few distinct IDs: every candidate position is walked
#[divan::bench(args = [1_000, 5_000])]
fn longest_match_repetitive(bencher: divan::Bencher, chunks: usize) {
    let seed = SeedIndex::with_reflink("/seed", make_index(chunks, 8), false);
    let query = make_index(64, 8);
    bencher.bench(|| seed.find_longest_match(divan::black_box(query.chunks())).0);
}

#[divan::bench(args = [1_000, 10_000])]
fn plan_full_target(bencher: divan::Bencher, chunks: usize) {
    let seed = SeedIndex::with_reflink("/seed", make_index(chunks, chunks), false);
    let target = make_index(chunks, chunks * 2);
    bencher.bench(|| plan(divan::black_box(&target), &seed).len());
}

#[divan::bench]
fn clone_plan() -> u64 {
    ClonePlan::new(divan::black_box(100), 100, 8100, 4096)
        .map(|p| p.clone_len())
        .unwrap_or(0)
}

fn main() {
    divan::main();
}
