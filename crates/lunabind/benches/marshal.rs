use std::collections::HashMap;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use lunabind::{LuaTable, NativeFunction, State};

fn bench_scalars(c: &mut Criterion) {
    let state = State::new().unwrap();
    state.execute("function id(...) return ... end").unwrap();

    c.bench_function("call_id_integer", |b| {
        b.iter(|| state.try_call::<_, i64>("id", black_box(42_i64)).unwrap());
    });

    c.bench_function("call_id_string", |b| {
        b.iter(|| state.try_call::<_, String>("id", black_box("payload")).unwrap());
    });
}

fn bench_sequences(c: &mut Criterion) {
    let state = State::new().unwrap();
    let mut group = c.benchmark_group("sequences");

    for len in [16_usize, 256, 4096] {
        let values: Vec<i64> = (0..len as i64).collect();
        group.throughput(Throughput::Elements(len as u64));
        group.bench_with_input(BenchmarkId::new("push_read", len), &values, |b, values| {
            b.iter(|| {
                state.set("xs", black_box(values.as_slice())).unwrap();
                state.get::<Vec<i64>>("xs").unwrap()
            });
        });
    }

    group.finish();
}

fn bench_maps(c: &mut Criterion) {
    let state = State::new().unwrap();
    let map: HashMap<String, i64> = (0..256).map(|i| (format!("key{}", i), i)).collect();

    c.bench_function("map_round_trip", |b| {
        b.iter(|| {
            state.set("m", black_box(&map).clone()).unwrap();
            state.get::<HashMap<String, i64>>("m").unwrap()
        });
    });
}

fn bench_native_calls(c: &mut Criterion) {
    let state = State::new().unwrap();
    state
        .set_function("add", NativeFunction::new(|a: i64, b: i64| a + b))
        .unwrap();
    state
        .execute("function loop(n) local s = 0 for i = 1, n do s = add(s, i) end return s end")
        .unwrap();

    c.bench_function("script_to_native_1000", |b| {
        b.iter(|| state.try_call::<_, i64>("loop", black_box(1000)).unwrap());
    });
}

fn bench_deep_copy(c: &mut Criterion) {
    let state = State::new().unwrap();
    let src: LuaTable = state
        .eval("local t = {} for i = 1, 64 do t[i] = {i, {i}} end return t")
        .unwrap();

    c.bench_function("deep_copy_64", |b| {
        b.iter(|| {
            let dst = state.new_table(None).unwrap();
            src.deep_copy_into(&dst).unwrap();
            dst
        });
    });
}

criterion_group!(
    benches,
    bench_scalars,
    bench_sequences,
    bench_maps,
    bench_native_calls,
    bench_deep_copy
);
criterion_main!(benches);
