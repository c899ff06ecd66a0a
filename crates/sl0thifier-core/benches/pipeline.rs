//! Benchmarks for the in-process sl0thifier stages.
//!
//! Run with: cargo bench -p sl0thifier-core

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use image::{DynamicImage, Rgb, RgbImage};
use sl0thifier_core::config::LimitsConfig;
use sl0thifier_core::pipeline::ImageDecoder;
use sl0thifier_core::stage::{contrast, Resizer, StageAdapter};
use sl0thifier_core::{PixelBuffer, StageConfig};
use std::path::Path;

fn gradient(width: u32, height: u32) -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
        let v = ((x + y) % 256) as u8;
        Rgb([v, v / 2, 255 - v])
    }))
}

fn benchmark_clahe(c: &mut Criterion) {
    let img = gradient(1024, 1024);

    c.bench_function("clahe_1024_tile4", |b| {
        b.iter(|| {
            let _ = contrast::enhance(black_box(&img), 1.0, 4);
        })
    });

    c.bench_function("clahe_1024_tile16", |b| {
        b.iter(|| {
            let _ = contrast::enhance(black_box(&img), 2.0, 16);
        })
    });
}

fn benchmark_resize(c: &mut Criterion) {
    let img = gradient(2048, 2048);
    let config = StageConfig::Resize {
        width: 512,
        height: 512,
    };

    c.bench_function("resize_2048_to_512", |b| {
        b.iter(|| {
            let _ = Resizer.apply(PixelBuffer::new(black_box(img.clone())), &config);
        })
    });
}

fn benchmark_decode(c: &mut Criterion) {
    let mut bytes = Vec::new();
    if gradient(1024, 768)
        .write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)
        .is_err()
    {
        eprintln!("Skipping decode benchmark: could not encode fixture");
        return;
    }
    let decoder = ImageDecoder::new(LimitsConfig::default());
    let path = Path::new("bench.png");

    c.bench_function("decode_png_1024x768", |b| {
        b.iter(|| {
            let _ = decoder.decode_bytes(black_box(bytes.clone()), path);
        })
    });
}

criterion_group!(benches, benchmark_clahe, benchmark_resize, benchmark_decode);
criterion_main!(benches);
