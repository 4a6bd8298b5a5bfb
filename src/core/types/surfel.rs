//! Surfel model types.
//!
//! A surfel is an oriented disk approximating a small surface patch. The
//! `SurfelModel` is the persistent reconstruction state: a growable,
//! unordered collection mutated only by the assimilation engine. Surfel
//! indices are valid only between assimilation cycles; pruning compacts the
//! storage and invalidates them.

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

/// An oriented disk: the atomic unit of the reconstructed model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Surfel {
    /// World-space center.
    pub position: Vector3<f32>,
    /// World-space unit normal.
    pub normal: Vector3<f32>,
    /// Linear RGB in [0, 1].
    pub color: [f32; 3],
    /// Disk radius in meters.
    pub radius: f32,
    /// Accumulated confidence; non-decreasing across merges, capped by the
    /// fusion configuration.
    pub confidence: f32,
    /// Number of accepted merges.
    pub merge_count: u32,
    /// Frame index of the last accepted merge (creation counts).
    pub last_merge_frame: u64,
}

/// The persistent surfel collection.
///
/// Single-writer: only the assimilation step of the current frame mutates
/// it. Readers elsewhere take snapshots.
#[derive(Debug, Clone, Default)]
pub struct SurfelModel {
    surfels: Vec<Surfel>,
}

impl SurfelModel {
    /// Create an empty model.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty model with preallocated capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            surfels: Vec::with_capacity(capacity),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.surfels.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.surfels.is_empty()
    }

    #[inline]
    pub fn get(&self, index: usize) -> Option<&Surfel> {
        self.surfels.get(index)
    }

    #[inline]
    pub fn get_mut(&mut self, index: usize) -> Option<&mut Surfel> {
        self.surfels.get_mut(index)
    }

    /// Append a surfel, returning its (cycle-local) index.
    #[inline]
    pub fn push(&mut self, surfel: Surfel) -> usize {
        self.surfels.push(surfel);
        self.surfels.len() - 1
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Surfel> {
        self.surfels.iter()
    }

    #[inline]
    pub fn as_slice(&self) -> &[Surfel] {
        &self.surfels
    }

    /// Remove surfels not satisfying the predicate, compacting storage.
    ///
    /// Invalidates all previously held indices. Returns the number removed.
    pub fn prune<F: FnMut(&Surfel) -> bool>(&mut self, keep: F) -> usize {
        let before = self.surfels.len();
        self.surfels.retain(keep);
        before - self.surfels.len()
    }

    pub fn clear(&mut self) {
        self.surfels.clear();
    }

    /// Approximate heap usage in bytes.
    pub fn memory_usage(&self) -> usize {
        self.surfels.capacity() * std::mem::size_of::<Surfel>()
    }
}

/// Read-only point-cloud snapshot of the model, consumed by downstream
/// file-format and scene-graph writers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SurfelSnapshot {
    pub positions: Vec<Vector3<f32>>,
    pub normals: Vec<Vector3<f32>>,
    pub colors: Vec<[f32; 3]>,
    pub radii: Vec<f32>,
    pub confidences: Vec<f32>,
}

impl SurfelSnapshot {
    /// Number of surfels in the snapshot.
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}

impl From<&SurfelModel> for SurfelSnapshot {
    fn from(model: &SurfelModel) -> Self {
        let n = model.len();
        let mut snapshot = Self {
            positions: Vec::with_capacity(n),
            normals: Vec::with_capacity(n),
            colors: Vec::with_capacity(n),
            radii: Vec::with_capacity(n),
            confidences: Vec::with_capacity(n),
        };
        for s in model.iter() {
            snapshot.positions.push(s.position);
            snapshot.normals.push(s.normal);
            snapshot.colors.push(s.color);
            snapshot.radii.push(s.radius);
            snapshot.confidences.push(s.confidence);
        }
        snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_surfel(x: f32, confidence: f32) -> Surfel {
        Surfel {
            position: Vector3::new(x, 0.0, 0.0),
            normal: Vector3::new(0.0, 0.0, -1.0),
            color: [0.5; 3],
            radius: 0.01,
            confidence,
            merge_count: 0,
            last_merge_frame: 0,
        }
    }

    #[test]
    fn test_push_and_get() {
        let mut model = SurfelModel::new();
        let idx = model.push(test_surfel(1.0, 1.0));
        assert_eq!(idx, 0);
        assert_eq!(model.len(), 1);
        assert_eq!(model.get(0).unwrap().position.x, 1.0);
        assert!(model.get(1).is_none());
    }

    #[test]
    fn test_prune_compacts() {
        let mut model = SurfelModel::new();
        for i in 0..10 {
            model.push(test_surfel(i as f32, i as f32));
        }
        let removed = model.prune(|s| s.confidence >= 5.0);
        assert_eq!(removed, 5);
        assert_eq!(model.len(), 5);
        assert!(model.iter().all(|s| s.confidence >= 5.0));
    }

    #[test]
    fn test_snapshot_copies_fields() {
        let mut model = SurfelModel::new();
        model.push(test_surfel(1.0, 3.0));
        model.push(test_surfel(2.0, 4.0));

        let snapshot = SurfelSnapshot::from(&model);
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot.positions[1].x, 2.0);
        assert_eq!(snapshot.confidences[0], 3.0);

        // Snapshot is detached from later mutation.
        model.clear();
        assert_eq!(snapshot.len(), 2);
    }
}
