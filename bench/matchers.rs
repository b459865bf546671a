use criterion::{criterion_group, criterion_main, Criterion};

use image::GrayImage;

use cv_stereo_pipeline::block_matching::{self, BlockMatcher};
use cv_stereo_pipeline::prelude::*;
use cv_stereo_pipeline::sgm::{self, SemiGlobalMatcher};

const WIDTH: u32 = 320;
const HEIGHT: u32 = 240;
const SHIFT: u32 = 9;

fn shifted_pair() -> (GrayImage, GrayImage) {
    let pattern = |x: u32, y: u32| (((x * 13 + y * 7) % 29) * 8) as u8;
    let left = GrayImage::from_fn(WIDTH, HEIGHT, |x, y| image::Luma([pattern(x, y)]));
    let right = GrayImage::from_fn(WIDTH, HEIGHT, |x, y| {
        image::Luma([pattern(x + SHIFT, y)])
    });
    (left, right)
}

fn block_matching_bench(c: &mut Criterion) {
    let (left, right) = shifted_pair();

    let mut matcher = BlockMatcher::new(block_matching::Params {
        min_disparity: 0,
        num_disparities: 32,
        block_size: 11,
    })
    .unwrap();

    c.bench_function("block matching 320x240", |b| {
        b.iter(|| matcher.compute(&left, &right).unwrap())
    });
}

fn sgm_bench(c: &mut Criterion) {
    let (left, right) = shifted_pair();

    let mut matcher = SemiGlobalMatcher::new(sgm::Params {
        min_disparity: 0,
        num_disparities: 32,
        ..sgm::Params::default()
    })
    .unwrap();

    c.bench_function("semi-global matching 320x240", |b| {
        b.iter(|| matcher.compute(&left, &right).unwrap())
    });
}

criterion_group!(benches, block_matching_bench, sgm_bench);
criterion_main!(benches);
