use criterion::{criterion_group, criterion_main};


criterion_group!(
    benches,
    routing::bench_poll_publish,
    routing::bench_reassembly,
    storage::bench_append,
    storage::bench_read_tail
);
criterion_main!(benches);
