//! Benchmarks for the per-frame CPU work and the SH reference path.
//!
//! Run with: `cargo bench`

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use glam::{Mat4, Vec2, Vec3};

use fluidx::backend::RecordingDevice;
use fluidx::lod::{self, FaceCulling, LodConfig};
use fluidx::sh;
use fluidx::{Fluid, FluidConfig, GridSize};

fn world_view_proj(eye: Vec3) -> Mat4 {
    let view = Mat4::look_at_rh(eye, Vec3::ZERO, Vec3::Y);
    let proj = Mat4::perspective_rh(std::f32::consts::FRAC_PI_4, 16.0 / 9.0, 1.0, 1000.0);
    proj * view * Mat4::from_scale(Vec3::splat(10.0))
}

fn bench_lod(c: &mut Criterion) {
    let mut group = c.benchmark_group("lod");
    let viewport = Vec2::new(1280.0, 720.0);
    let config = LodConfig::default();

    for distance in [25.0f32, 100.0, 400.0] {
        let wvp = world_view_proj(Vec3::new(0.0, distance * 0.3, -distance));
        group.bench_with_input(BenchmarkId::new("estimate", distance as u32), &wvp, |b, wvp| {
            b.iter(|| black_box(lod::estimate(wvp, viewport, 128, 5, 256, &config)))
        });
    }

    let eye = Vec3::new(0.4, 1.6, -4.0);
    group.bench_function("cull_mask", |b| {
        b.iter(|| black_box(lod::VisibilityMask.cull(black_box(eye))))
    });
    group.bench_function("cull_list", |b| {
        b.iter(|| black_box(lod::FaceList.cull(black_box(eye))))
    });

    group.finish();
}

fn bench_sh(c: &mut Criterion) {
    let mut group = c.benchmark_group("sh");

    for face_size in [16u32, 32, 64] {
        group.bench_with_input(BenchmarkId::new("project", face_size), &face_size, |b, &size| {
            b.iter(|| black_box(sh::project(size, sh::sky_radiance)))
        });
    }

    let partials = sh::project(64, sh::sky_radiance);
    group.bench_function("reduce_64", |b| {
        b.iter(|| black_box(sh::reduce(partials.clone())))
    });

    group.finish();
}

fn bench_update_frame(c: &mut Criterion) {
    let mut group = c.benchmark_group("update_frame");

    let eye = Vec3::new(4.0, 16.0, -40.0);
    let view = Mat4::look_at_rh(eye, Vec3::ZERO, Vec3::Y);
    let proj = Mat4::perspective_rh(std::f32::consts::FRAC_PI_4, 16.0 / 9.0, 1.0, 1000.0);

    for size in [64u32, 128] {
        let mut device = RecordingDevice::new();
        let config = FluidConfig::new(GridSize::new(size, size, size));
        let mut fluid = match Fluid::new(&mut device, &config) {
            Ok(fluid) => fluid,
            Err(e) => panic!("fluid: {}", e),
        };

        group.bench_with_input(BenchmarkId::new("volume", size), &size, |b, _| {
            b.iter(|| {
                device.clear_commands();
                fluid.update_frame(&mut device, 0, 2.0 / size as f32, &view, &proj, eye);
                black_box(fluid.lod())
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_lod, bench_sh, bench_update_frame);
criterion_main!(benches);
