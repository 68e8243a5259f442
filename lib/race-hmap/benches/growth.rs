#[macro_use]
extern crate criterion;

use criterion::Criterion;
use race_hmap::HMap;
use rand::Rng;

fn insert_sequential(c: &mut Criterion) {
    c.bench_function("insert 4096 sequential keys", |b| {
        b.iter(|| {
            let mut map: HMap<u32> = HMap::new();
            for i in 0..4096u32 {
                map.insert(&format!("key-{}", i), i).unwrap();
            }
        })
    });
}

fn insert_remove_churn(c: &mut Criterion) {
    c.bench_function("insert/remove churn under tombstone pressure", |b| {
        let mut rng = rand::thread_rng();
        b.iter(|| {
            let mut map: HMap<u32> = HMap::with_capacity_hint(1024);
            for i in 0..1024u32 {
                map.insert(&format!("key-{}", i), i).unwrap();
            }
            for _ in 0..512 {
                let i: u32 = rng.gen_range(0, 1024);
                map.remove(&format!("key-{}", i));
            }
            for i in 1024..1536u32 {
                map.insert(&format!("key-{}", i), i).unwrap();
            }
        })
    });
}

criterion_group!(benches, insert_sequential, insert_remove_churn);
criterion_main!(benches);
