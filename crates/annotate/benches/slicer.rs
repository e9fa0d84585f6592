use annotate::detection::non_max_suppression;
use annotate::slicer::{slice_and_infer, tile_grid};
use annotate::{RawBox, RawDetection, SlicerConfig};
use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use image::RgbImage;

/// Deterministic cloud of overlapping boxes spread over a `width` x `height` frame
fn create_detections(count: usize, width: u32, height: u32) -> Vec<RawDetection> {
    (0..count)
        .map(|i| {
            let x = ((i * 37) % width as usize) as f32;
            let y = ((i * 91) % height as usize) as f32;
            let size = 20.0 + (i % 40) as f32;
            RawDetection::new(
                RawBox::PixelXyxy {
                    x1: x,
                    y1: y,
                    x2: x + size,
                    y2: y + size,
                },
                ((i * 13) % 100) as f32 / 100.0,
                Some((i % 5) as u32),
            )
        })
        .collect()
}

fn benchmark_tile_grid(c: &mut Criterion) {
    let mut group = c.benchmark_group("tile_grid");
    let config = SlicerConfig::default();

    for (width, height) in [(1920u32, 1080u32), (3840, 2160), (8192, 8192)] {
        group.bench_function(BenchmarkId::from_parameter(format!("{}x{}", width, height)), |b| {
            b.iter(|| tile_grid(black_box(width), black_box(height), &config))
        });
    }

    group.finish();
}

fn benchmark_suppression(c: &mut Criterion) {
    let mut group = c.benchmark_group("non_max_suppression");

    for count in [100usize, 1_000, 5_000] {
        let detections = create_detections(count, 3840, 2160);
        group.bench_with_input(BenchmarkId::from_parameter(count), &detections, |b, dets| {
            b.iter(|| non_max_suppression(black_box(dets.clone()), 0.5, false, 3840, 2160))
        });
    }

    group.finish();
}

fn benchmark_slice_and_infer(c: &mut Criterion) {
    let mut group = c.benchmark_group("slice_and_infer");
    group.sample_size(20);
    let config = SlicerConfig::default();

    for (width, height) in [(1920u32, 1080u32), (3840, 2160)] {
        let image = RgbImage::new(width, height);
        let per_tile = create_detections(50, config.tile_width, config.tile_height);

        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{}x{}", width, height)),
            &image,
            |b, image| {
                b.iter(|| {
                    slice_and_infer(black_box(image), &config, |_| Ok(per_tile.clone())).unwrap()
                })
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    benchmark_tile_grid,
    benchmark_suppression,
    benchmark_slice_and_infer
);
criterion_main!(benches);
