//! Row codec benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use entimap_codec::{decode_row, encode_row, Row, Value};

/// A row shaped like a user record.
fn user_row() -> Row {
    Row::new()
        .with("id", 1)
        .with("name", "Some User")
        .with("balance", 5000)
        .with("active", true)
}

/// A row with `width` integer and text columns.
fn wide_row(width: usize) -> Row {
    (0..width)
        .map(|i| {
            let value = if i % 2 == 0 {
                Value::Integer(i as i64)
            } else {
                Value::Text(format!("value_{i}"))
            };
            (format!("column_{i}"), value)
        })
        .collect()
}

fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode_row");

    group.bench_function("user", |b| {
        let row = user_row();
        b.iter(|| black_box(encode_row(black_box(&row))));
    });

    for width in [8, 32, 128] {
        group.throughput(Throughput::Elements(width as u64));
        group.bench_with_input(BenchmarkId::from_parameter(width), &width, |b, &width| {
            let row = wide_row(width);
            b.iter(|| black_box(encode_row(black_box(&row))));
        });
    }
    group.finish();
}

fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode_row");

    group.bench_function("user", |b| {
        let bytes = encode_row(&user_row());
        b.iter(|| black_box(decode_row(black_box(&bytes)).unwrap()));
    });

    for width in [8, 32, 128] {
        group.throughput(Throughput::Elements(width as u64));
        group.bench_with_input(BenchmarkId::from_parameter(width), &width, |b, &width| {
            let bytes = encode_row(&wide_row(width));
            b.iter(|| black_box(decode_row(black_box(&bytes)).unwrap()));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_encode, bench_decode);
criterion_main!(benches);
