use std::hint::black_box;

use criterion::{criterion_group, criterion_main, Criterion};
use rust_image_decoder::decode;

#[path = "../tests/support/mod.rs"]
mod support;

const SIDE: u32 = 256;

fn gradient_rows(channels: usize) -> Vec<Vec<u8>> {
    (0..SIDE as usize)
        .map(|y| {
            (0..SIDE as usize * channels)
                .map(|i| (i / channels + y * (i % channels + 1)) as u8)
                .collect()
        })
        .collect()
}

fn criterion_benchmark(c: &mut Criterion) {
    let png = support::png_from_rows(SIDE, 6, &gradient_rows(4));
    let pnm = support::pnm("P6", SIDE, SIDE, 255, &gradient_rows(3).concat());
    let tga = support::tga_rle_32(SIDE as u16, &gradient_rows(4));
    let blocks = (SIDE as usize / 8).pow(2);
    let dc: Vec<i32> = (0..blocks as i32).map(|i| (i % 64 - 32) * 8).collect();
    let jpeg = support::jpeg_gray_dc(SIDE as u16, SIDE as u16, &dc, 16);
    let jpeg_progressive = support::jpeg_gray_dc_progressive(SIDE as u16, SIDE as u16, &dc);

    c.bench_function("png_rgba_to_rgb", |b| {
        b.iter(|| decode(black_box(&png), 3).unwrap())
    });
    c.bench_function("pnm_rgb_to_gray", |b| {
        b.iter(|| decode(black_box(&pnm), 1).unwrap())
    });
    c.bench_function("tga_rle_native", |b| {
        b.iter(|| decode(black_box(&tga), 0).unwrap())
    });
    c.bench_function("jpeg_baseline_gray", |b| {
        b.iter(|| decode(black_box(&jpeg), 0).unwrap())
    });
    c.bench_function("jpeg_progressive_gray", |b| {
        b.iter(|| decode(black_box(&jpeg_progressive), 0).unwrap())
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
