//! Surfel index map: rasterization-based correspondence lookup.
//!
//! Instead of a spatial tree search, every surfel is splatted as a small
//! disk onto the camera's image plane with z-buffer semantics. The result
//! is a per-pixel array of nearest-surfel indices that both the ICP aligner
//! (projective data association) and the assimilation engine (merge
//! targets) read.
//!
//! The rasterization is deterministic for a fixed pose and surfel set:
//! pixel ownership is resolved by nearest depth, with the lower surfel
//! index winning exact-depth ties. That total order does not depend on
//! traversal or thread scheduling, so the parallel path below produces
//! bit-identical maps.

use std::sync::Arc;

use nalgebra::Isometry3;
use serde::{Deserialize, Serialize};

use crate::core::types::{Camera, Surfel, SurfelModel};
use crate::workers::WorkerPool;

/// Sentinel for pixels no surfel projects onto.
pub const EMPTY: u32 = u32::MAX;

/// Per-pixel nearest-surfel indices for one pose.
///
/// Valid only for the pose and surfel set it was produced from; any
/// mutation of the model invalidates it.
#[derive(Debug, Clone)]
pub struct SurfelIndexMap {
    pub width: usize,
    pub height: usize,
    indices: Vec<u32>,
}

impl SurfelIndexMap {
    /// An all-empty map of the given dimensions.
    pub fn empty(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            indices: vec![EMPTY; width * height],
        }
    }

    /// Surfel index at a flat pixel offset, or `None` for empty pixels.
    #[inline]
    pub fn at(&self, pixel: usize) -> Option<usize> {
        match self.indices[pixel] {
            EMPTY => None,
            idx => Some(idx as usize),
        }
    }

    /// Surfel index at pixel (u, v).
    #[inline]
    pub fn get(&self, u: usize, v: usize) -> Option<usize> {
        self.at(v * self.width + u)
    }

    /// Number of non-empty pixels.
    pub fn occupied_count(&self) -> usize {
        self.indices.iter().filter(|&&i| i != EMPTY).count()
    }

    #[inline]
    pub fn as_slice(&self) -> &[u32] {
        &self.indices
    }
}

/// How the pose argument of a rasterization is interpreted.
#[derive(Debug, Clone, Copy)]
pub enum RasterMode {
    /// The pose is the incremental model transform maintained by the ICP
    /// aligner: the camera-to-world estimate of the frame being aligned.
    Alignment(Isometry3<f32>),
    /// Plain view projection through the camera's own pose. Used for
    /// assimilation lookup and by external landmark placement.
    ViewProjection,
}

/// Configuration for the CPU splat rasterizer.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RasterConfig {
    /// Frame width in pixels.
    pub width: usize,
    /// Frame height in pixels.
    pub height: usize,
    /// Upper bound on a splat's pixel radius; keeps one close surfel from
    /// flooding the frame.
    #[serde(default = "default_max_splat_px")]
    pub max_splat_px: f32,
    /// Minimum surfel count before rasterization fans out across the
    /// worker pool.
    #[serde(default = "default_parallel_threshold")]
    pub parallel_threshold: usize,
}

fn default_max_splat_px() -> f32 {
    12.0
}
fn default_parallel_threshold() -> usize {
    16384
}

impl RasterConfig {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            max_splat_px: default_max_splat_px(),
            parallel_threshold: default_parallel_threshold(),
        }
    }
}

/// Capability interface for the rasterization backend.
///
/// Must be deterministic for a fixed pose and surfel set. The CPU
/// reference implementation is [`CpuSplatRasterizer`]; a GPU backend can
/// replace it behind this trait.
pub trait SplatRasterizer: Send + Sync {
    fn rasterize(&self, model: &SurfelModel, camera: &Camera, mode: RasterMode) -> SurfelIndexMap;

    /// Backend name for diagnostics.
    fn name(&self) -> &'static str;
}

/// CPU reference rasterizer, optionally fanning out over a worker pool.
pub struct CpuSplatRasterizer {
    config: RasterConfig,
    pool: Option<Arc<WorkerPool>>,
}

impl CpuSplatRasterizer {
    pub fn new(config: RasterConfig) -> Self {
        Self { config, pool: None }
    }

    /// Rasterize surfel ranges in parallel on the given pool. The merge of
    /// per-job tiles uses the same (depth, index) order as the sequential
    /// path, so results are identical.
    pub fn with_pool(config: RasterConfig, pool: Arc<WorkerPool>) -> Self {
        Self {
            config,
            pool: Some(pool),
        }
    }

    pub fn config(&self) -> &RasterConfig {
        &self.config
    }

    fn rasterize_sequential(
        &self,
        surfels: &[Surfel],
        camera: &Camera,
        world_to_cam: &Isometry3<f32>,
    ) -> SurfelIndexMap {
        let n = self.config.width * self.config.height;
        let mut depths = vec![f32::INFINITY; n];
        let mut indices = vec![EMPTY; n];
        splat_range(
            surfels,
            0,
            camera,
            world_to_cam,
            &self.config,
            &mut depths,
            &mut indices,
        );
        SurfelIndexMap {
            width: self.config.width,
            height: self.config.height,
            indices,
        }
    }

    fn rasterize_parallel(
        &self,
        pool: &WorkerPool,
        model: &SurfelModel,
        camera: &Camera,
        world_to_cam: &Isometry3<f32>,
    ) -> SurfelIndexMap {
        let n = self.config.width * self.config.height;
        let chunks = pool.worker_count();
        let chunk_len = model.len().div_ceil(chunks);

        // Jobs outlive this call's borrows, so they share one owned copy of
        // the surfel array. The pool returns no futures; completion is
        // synchronized over the channel.
        let shared: Arc<Vec<Surfel>> = Arc::new(model.as_slice().to_vec());
        let (tx, rx) = crossbeam_channel::bounded(chunks);

        let mut submitted = 0usize;
        for chunk in 0..chunks {
            let start = chunk * chunk_len;
            if start >= shared.len() {
                break;
            }
            let end = (start + chunk_len).min(shared.len());
            let surfels = Arc::clone(&shared);
            let camera = *camera;
            let world_to_cam = *world_to_cam;
            let config = self.config;
            let tx = tx.clone();
            pool.submit(move || {
                let n = config.width * config.height;
                let mut depths = vec![f32::INFINITY; n];
                let mut indices = vec![EMPTY; n];
                splat_range(
                    &surfels[start..end],
                    start as u32,
                    &camera,
                    &world_to_cam,
                    &config,
                    &mut depths,
                    &mut indices,
                );
                let _ = tx.send((depths, indices));
            });
            submitted += 1;
        }
        drop(tx);

        let mut depths = vec![f32::INFINITY; n];
        let mut indices = vec![EMPTY; n];
        for _ in 0..submitted {
            let (tile_depths, tile_indices) = rx
                .recv()
                .expect("rasterizer worker dropped its result channel");
            for i in 0..n {
                let d = tile_depths[i];
                if d < depths[i] || (d == depths[i] && tile_indices[i] < indices[i]) {
                    depths[i] = d;
                    indices[i] = tile_indices[i];
                }
            }
        }

        SurfelIndexMap {
            width: self.config.width,
            height: self.config.height,
            indices,
        }
    }
}

impl SplatRasterizer for CpuSplatRasterizer {
    fn rasterize(&self, model: &SurfelModel, camera: &Camera, mode: RasterMode) -> SurfelIndexMap {
        let pose = match mode {
            RasterMode::Alignment(pose) => pose,
            RasterMode::ViewProjection => camera.pose,
        };
        let world_to_cam = pose.inverse();

        match &self.pool {
            Some(pool) if model.len() >= self.config.parallel_threshold => {
                self.rasterize_parallel(pool, model, camera, &world_to_cam)
            }
            _ => self.rasterize_sequential(model.as_slice(), camera, &world_to_cam),
        }
    }

    fn name(&self) -> &'static str {
        "CpuSplatRasterizer"
    }
}

/// Splat `surfels` (whose global indices start at `base_index`) into the
/// depth/index buffers with nearest-depth, lowest-index z-buffer semantics.
fn splat_range(
    surfels: &[Surfel],
    base_index: u32,
    camera: &Camera,
    world_to_cam: &Isometry3<f32>,
    config: &RasterConfig,
    depths: &mut [f32],
    indices: &mut [u32],
) {
    let k = camera.intrinsics;
    let width = config.width as isize;
    let height = config.height as isize;

    for (offset, surfel) in surfels.iter().enumerate() {
        let index = base_index + offset as u32;
        let pc = world_to_cam.transform_point(&surfel.position.into()).coords;
        if pc.z <= 1e-6 {
            continue;
        }
        // Back-facing surfels are culled: the splat is an oriented disk.
        let nc = world_to_cam.rotation * surfel.normal;
        if nc.dot(&pc) >= 0.0 {
            continue;
        }

        let u = k.fx * pc.x / pc.z + k.cx;
        let v = k.fy * pc.y / pc.z + k.cy;
        let pixel_radius = (k.fx * surfel.radius / pc.z).clamp(0.5, config.max_splat_px);

        let u0 = ((u - pixel_radius).floor() as isize).max(0);
        let u1 = ((u + pixel_radius).ceil() as isize).min(width - 1);
        let v0 = ((v - pixel_radius).floor() as isize).max(0);
        let v1 = ((v + pixel_radius).ceil() as isize).min(height - 1);
        if u0 > u1 || v0 > v1 {
            continue;
        }

        let r_sq = pixel_radius * pixel_radius;
        for pv in v0..=v1 {
            for pu in u0..=u1 {
                let du = pu as f32 - u;
                let dv = pv as f32 - v;
                if du * du + dv * dv > r_sq {
                    continue;
                }
                let i = (pv * width + pu) as usize;
                if pc.z < depths[i] || (pc.z == depths[i] && index < indices[i]) {
                    depths[i] = pc.z;
                    indices[i] = index;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Intrinsics;
    use nalgebra::Vector3;

    fn test_camera() -> Camera {
        Camera::at_origin(Intrinsics::new(100.0, 100.0, 32.0, 24.0))
    }

    fn surfel_at(position: Vector3<f32>, normal: Vector3<f32>, radius: f32) -> Surfel {
        Surfel {
            position,
            normal,
            color: [0.5; 3],
            radius,
            confidence: 1.0,
            merge_count: 0,
            last_merge_frame: 0,
        }
    }

    fn front_surfel(x: f32, y: f32, z: f32) -> Surfel {
        surfel_at(Vector3::new(x, y, z), Vector3::new(0.0, 0.0, -1.0), 0.02)
    }

    #[test]
    fn test_empty_model_empty_map() {
        let raster = CpuSplatRasterizer::new(RasterConfig::new(64, 48));
        let map = raster.rasterize(
            &SurfelModel::new(),
            &test_camera(),
            RasterMode::ViewProjection,
        );
        assert_eq!(map.occupied_count(), 0);
        assert!(map.get(32, 24).is_none());
    }

    #[test]
    fn test_single_surfel_covers_center() {
        let mut model = SurfelModel::new();
        model.push(front_surfel(0.0, 0.0, 1.0));

        let raster = CpuSplatRasterizer::new(RasterConfig::new(64, 48));
        let map = raster.rasterize(&model, &test_camera(), RasterMode::ViewProjection);

        assert_eq!(map.get(32, 24), Some(0));
        assert!(map.occupied_count() >= 1);
    }

    #[test]
    fn test_z_buffer_keeps_nearest() {
        let mut model = SurfelModel::new();
        model.push(front_surfel(0.0, 0.0, 2.0)); // far
        model.push(front_surfel(0.0, 0.0, 1.0)); // near

        let raster = CpuSplatRasterizer::new(RasterConfig::new(64, 48));
        let map = raster.rasterize(&model, &test_camera(), RasterMode::ViewProjection);

        assert_eq!(map.get(32, 24), Some(1));
    }

    #[test]
    fn test_back_facing_culled() {
        let mut model = SurfelModel::new();
        model.push(surfel_at(
            Vector3::new(0.0, 0.0, 1.0),
            Vector3::new(0.0, 0.0, 1.0), // facing away
            0.02,
        ));

        let raster = CpuSplatRasterizer::new(RasterConfig::new(64, 48));
        let map = raster.rasterize(&model, &test_camera(), RasterMode::ViewProjection);
        assert_eq!(map.occupied_count(), 0);
    }

    #[test]
    fn test_behind_camera_skipped() {
        let mut model = SurfelModel::new();
        model.push(front_surfel(0.0, 0.0, -1.0));

        let raster = CpuSplatRasterizer::new(RasterConfig::new(64, 48));
        let map = raster.rasterize(&model, &test_camera(), RasterMode::ViewProjection);
        assert_eq!(map.occupied_count(), 0);
    }

    #[test]
    fn test_alignment_mode_overrides_pose() {
        let mut model = SurfelModel::new();
        model.push(front_surfel(0.0, 0.0, 1.0));

        let raster = CpuSplatRasterizer::new(RasterConfig::new(64, 48));
        // Camera pose says origin, but the alignment pose steps back 0.5m,
        // so the surfel appears at depth 1.5.
        let stepped_back = nalgebra::Isometry3::translation(0.0, 0.0, -0.5);
        let map = raster.rasterize(
            &model,
            &test_camera(),
            RasterMode::Alignment(stepped_back),
        );
        assert_eq!(map.get(32, 24), Some(0));
    }

    #[test]
    fn test_deterministic_across_runs() {
        let mut model = SurfelModel::new();
        for i in 0..500 {
            let x = (i % 25) as f32 * 0.01 - 0.12;
            let y = (i / 25) as f32 * 0.01 - 0.1;
            model.push(front_surfel(x, y, 1.0));
        }

        let raster = CpuSplatRasterizer::new(RasterConfig::new(64, 48));
        let a = raster.rasterize(&model, &test_camera(), RasterMode::ViewProjection);
        let b = raster.rasterize(&model, &test_camera(), RasterMode::ViewProjection);
        assert_eq!(a.as_slice(), b.as_slice());
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let mut model = SurfelModel::new();
        for i in 0..2000 {
            let x = (i % 50) as f32 * 0.005 - 0.12;
            let y = (i / 50) as f32 * 0.005 - 0.1;
            model.push(front_surfel(x, y, 1.0 + (i % 7) as f32 * 0.001));
        }

        let sequential = CpuSplatRasterizer::new(RasterConfig::new(64, 48));
        let mut parallel_config = RasterConfig::new(64, 48);
        parallel_config.parallel_threshold = 1;
        let pool = Arc::new(WorkerPool::new(4));
        let parallel = CpuSplatRasterizer::with_pool(parallel_config, pool);

        let a = sequential.rasterize(&model, &test_camera(), RasterMode::ViewProjection);
        let b = parallel.rasterize(&model, &test_camera(), RasterMode::ViewProjection);
        assert_eq!(a.as_slice(), b.as_slice());
    }

    #[test]
    fn test_index_map_bounds_invariant() {
        let mut model = SurfelModel::new();
        for i in 0..100 {
            model.push(front_surfel((i % 10) as f32 * 0.02, 0.0, 1.0));
        }

        let raster = CpuSplatRasterizer::new(RasterConfig::new(64, 48));
        let map = raster.rasterize(&model, &test_camera(), RasterMode::ViewProjection);
        for &idx in map.as_slice() {
            assert!(idx == EMPTY || (idx as usize) < model.len());
        }
    }
}
