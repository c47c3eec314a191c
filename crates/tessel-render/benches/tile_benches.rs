use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use tessel_core::{PassType, Rect, RenderResult, RenderSettings, TesselError, TesselResult};
use tessel_render::{
    find_next_part, parts_init, tile_size, NullCallbacks, Render, RenderPipeline, SceneLibrary,
    ShadingDatabase, TileContext,
};

use std::sync::Arc;

/// Cheap procedural shader so the benchmark measures scheduling and merging.
struct Checker;

impl ShadingDatabase for Checker {
    fn shade_tile(&self, tile: &TileContext, result: &mut RenderResult) -> TesselResult<()> {
        let rect = tile.rect;
        let pass = result.layers[0]
            .pass_mut(PassType::Combined, tile.view_id)
            .ok_or_else(|| TesselError::Engine("no combined pass".into()))?;
        for (i, px) in pass.rect.chunks_exact_mut(4).enumerate() {
            let x = rect.xmin + i as i32 % rect.width();
            let y = rect.ymin + i as i32 / rect.width();
            let v = if (x / 8 + y / 8) % 2 == 0 { 1.0 } else { 0.2 };
            px.copy_from_slice(&[v, v, v, 1.0]);
        }
        Ok(())
    }
}

fn bench_parts(c: &mut Criterion) {
    let rect = Rect::from_size(1920, 1080);
    let mut group = c.benchmark_group("parts");
    for threads in [1usize, 4, 16] {
        group.bench_with_input(BenchmarkId::new("init_and_order", threads), &threads, |b, &threads| {
            b.iter(|| {
                let tile = tile_size(rect, threads, None);
                let mut parts = parts_init(rect, tile, 0);
                let mut nr = 0;
                while let Some(idx) = find_next_part(&parts, 1920, 1080, None) {
                    nr += 1;
                    parts[idx].nr = nr;
                }
                nr
            });
        });
    }
    group.finish();
}

fn bench_tile_processor(c: &mut Criterion) {
    let pipe = RenderPipeline::new(SceneLibrary::new());
    let mut group = c.benchmark_group("tile_processor");
    group.sample_size(20);
    for threads in [1usize, 4] {
        let mut settings = RenderSettings::with_size(640, 360);
        settings.threads = Some(threads);
        let mut re = Render::new("bench");
        re.set_callbacks(Arc::new(NullCallbacks));
        if re.init_state(None, &settings, None, 640, 360, None).is_err() {
            continue;
        }
        group.bench_function(BenchmarkId::new("640x360", threads), |b| {
            b.iter(|| pipe.tile_processor(&mut re, &mut Checker));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_parts, bench_tile_processor);
criterion_main!(benches);
