//! Focused reconstruction benchmarks
//!
//! Benchmarks for the CPU-heavy per-frame operations:
//! - Depth preprocessing (gating, smoothing, unprojection, normals)
//! - Surfel splat rasterization (correspondence lookup)
//! - One full accumulate cycle
//!
//! Run with: `cargo bench`
//! View HTML reports in: `target/criterion/`

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use shilpa_fusion::{
    Camera, CpuFrameProcessor, CpuSplatRasterizer, FrameProcessor, Intrinsics, RasterConfig,
    RasterMode, RawFrame, ReconstructionSession, SessionConfig, SplatRasterizer, Surfel,
    SurfelModel,
};

const W: usize = 160;
const H: usize = 120;

// ============================================================================
// Test Fixtures
// ============================================================================

fn bench_intrinsics() -> Intrinsics {
    Intrinsics::new(200.0, 200.0, 80.0, 60.0)
}

/// A frame of a gently curved surface, so normals vary across the grid.
fn bench_frame(timestamp_us: u64) -> RawFrame {
    let k = bench_intrinsics();
    let mut depth = vec![0.0f32; W * H];
    for v in 0..H {
        for u in 0..W {
            let xr = (u as f32 - k.cx) / k.fx;
            let yr = (v as f32 - k.cy) / k.fy;
            depth[v * W + u] = 1.2 + 0.1 * (xr * xr + yr * yr);
        }
    }
    RawFrame::new(
        Camera::at_origin(k),
        W,
        H,
        depth,
        vec![[128, 128, 128]; W * H],
        timestamp_us,
    )
    .unwrap()
}

/// A surfel model populated from one preprocessed frame.
fn bench_model() -> SurfelModel {
    let frame = bench_frame(0);
    let processed = CpuFrameProcessor::default().process(&frame, false);
    let mut model = SurfelModel::with_capacity(processed.valid_count());
    for i in 0..processed.len() {
        if !processed.valid[i] {
            continue;
        }
        model.push(Surfel {
            position: processed.points[i],
            normal: processed.normals[i],
            color: processed.colors[i],
            radius: processed.radii[i],
            confidence: 1.0,
            merge_count: 0,
            last_merge_frame: 0,
        });
    }
    model
}

// ============================================================================
// Benchmarks
// ============================================================================

fn bench_preprocess(c: &mut Criterion) {
    let frame = bench_frame(0);
    let processor = CpuFrameProcessor::default();

    c.bench_function("preprocess_plain", |b| {
        b.iter(|| black_box(processor.process(black_box(&frame), false)))
    });

    c.bench_function("preprocess_smoothed", |b| {
        b.iter(|| black_box(processor.process(black_box(&frame), true)))
    });
}

fn bench_rasterize(c: &mut Criterion) {
    let model = bench_model();
    let camera = Camera::at_origin(bench_intrinsics());
    let raster = CpuSplatRasterizer::new(RasterConfig::new(W, H));

    c.bench_function("rasterize_index_map", |b| {
        b.iter(|| {
            black_box(raster.rasterize(
                black_box(&model),
                &camera,
                RasterMode::ViewProjection,
            ))
        })
    });
}

fn bench_accumulate(c: &mut Criterion) {
    c.bench_function("accumulate_frame", |b| {
        b.iter_with_setup(
            || {
                let mut session = ReconstructionSession::new(SessionConfig {
                    workers: 0,
                    ..Default::default()
                });
                session.accumulate(&bench_frame(0)).unwrap();
                (session, bench_frame(33_333))
            },
            |(mut session, frame)| {
                black_box(session.accumulate(&frame).unwrap());
            },
        )
    });
}

criterion_group!(benches, bench_preprocess, bench_rasterize, bench_accumulate);
criterion_main!(benches);
