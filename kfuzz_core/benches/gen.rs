use criterion::{criterion_group, criterion_main, Criterion};
use kfuzz_core::{gen::gen_prog, select::ChoiceTable, target::test_target};
use rand::{prelude::SmallRng, SeedableRng};

pub fn bench_prog_gen(c: &mut Criterion) {
    let target = test_target();
    let choice = ChoiceTable::new(&target, None);
    let mut rng = SmallRng::from_entropy();

    c.bench_function("prog-gen", |b| {
        b.iter(|| gen_prog(&target, &choice, &mut rng, 16))
    });
}

criterion_group!(benches, bench_prog_gen);
criterion_main!(benches);
