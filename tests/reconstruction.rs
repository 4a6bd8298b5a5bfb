//! End-to-end reconstruction scenarios.

use nalgebra::Isometry3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use shilpa_fusion::{
    Camera, FrameClassification, Intrinsics, RawFrame, ReconstructionSession, SessionConfig,
};

const W: usize = 96;
const H: usize = 72;

fn test_intrinsics() -> Intrinsics {
    Intrinsics::new(120.0, 120.0, 48.0, 36.0)
}

/// A frame of a flat wall at `depth` with per-pixel Gaussian-ish noise.
fn wall_frame(depth: f32, noise: f32, seed: u64, timestamp_us: u64) -> RawFrame {
    let mut rng = StdRng::seed_from_u64(seed);
    let depth_buffer: Vec<f32> = (0..W * H)
        .map(|_| depth + rng.gen_range(-noise..=noise))
        .collect();
    RawFrame::new(
        Camera::at_origin(test_intrinsics()),
        W,
        H,
        depth_buffer,
        vec![[140, 130, 120]; W * H],
        timestamp_us,
    )
    .unwrap()
}

/// A frame whose depth is valid only inside a centered `side`-pixel square.
fn patch_frame(side: usize, depth: f32, timestamp_us: u64) -> RawFrame {
    let mut depth_buffer = vec![0.0f32; W * H];
    let u0 = (W - side) / 2;
    let v0 = (H - side) / 2;
    for v in v0..v0 + side {
        for u in u0..u0 + side {
            depth_buffer[v * W + u] = depth;
        }
    }
    RawFrame::new(
        Camera::at_origin(test_intrinsics()),
        W,
        H,
        depth_buffer,
        vec![[90, 90, 90]; W * H],
        timestamp_us,
    )
    .unwrap()
}

/// A frame with no usable depth at all.
fn garbage_frame(timestamp_us: u64) -> RawFrame {
    RawFrame::new(
        Camera::at_origin(test_intrinsics()),
        W,
        H,
        vec![0.0; W * H],
        vec![[0, 0, 0]; W * H],
        timestamp_us,
    )
    .unwrap()
}

fn session_config() -> SessionConfig {
    SessionConfig {
        workers: 0,
        ..Default::default()
    }
}

#[test]
fn static_plane_three_frames_converges() {
    // Spec scenario: 3 frames of a static planar surface from nearly
    // identical poses with downsample fraction 0.05.
    let mut config = session_config();
    config.icp.downsample_fraction = 0.05;
    let mut session = ReconstructionSession::new(config);

    let first = session.accumulate(&wall_frame(1.0, 0.0005, 1, 0)).unwrap();
    assert_eq!(first.classification, FrameClassification::Succeeded);
    let one_frame_count = session.surfel_count();
    assert!(one_frame_count > 0);

    for i in 1..3u64 {
        let metadata = session
            .accumulate(&wall_frame(1.0, 0.0005, 1 + i, i * 33_333))
            .unwrap();
        assert_eq!(
            metadata.classification,
            FrameClassification::Succeeded,
            "frame {i}: {metadata:?}"
        );
    }

    // No unbounded duplication: the model stays around one frame's worth
    // of valid pixels, not three.
    let final_count = session.surfel_count();
    assert!(
        final_count < one_frame_count + one_frame_count / 3,
        "{final_count} surfels after 3 frames of {one_frame_count}"
    );

    let stats = session.finalize();
    assert_eq!(stats.merged_frame_count, 3);
    assert_eq!(stats.failed_frame_count, 0);
    assert!((stats.average_framerate - 30.0).abs() < 1.0);
    assert!(stats.average_correspondence_error < 0.005);
}

#[test]
fn surfel_growth_rate_approaches_zero() {
    let mut session = ReconstructionSession::new(session_config());
    session.accumulate(&wall_frame(1.0, 0.0003, 7, 0)).unwrap();
    let after_first = session.surfel_count();

    let mut counts = Vec::new();
    for i in 1..10u64 {
        session
            .accumulate(&wall_frame(1.0, 0.0003, 7 + i, i * 33_333))
            .unwrap();
        counts.push(session.surfel_count());
    }

    // Late growth is a trickle compared to the first frame's population.
    let late_growth = counts[8] - counts[4];
    assert!(
        late_growth < after_first / 20,
        "model kept growing: {counts:?}"
    );
}

#[test]
fn sparse_overlap_classified_poor_tracking() {
    // Bootstrap the model from a small central patch, then align a full
    // wall frame: alignment succeeds on the overlap, but the
    // used-correspondence fraction stays below the PoorTracking threshold.
    let mut session = ReconstructionSession::new(session_config());

    let first = session.accumulate(&patch_frame(20, 1.0, 0)).unwrap();
    assert_eq!(first.classification, FrameClassification::Succeeded);

    let second = session.accumulate(&wall_frame(1.0, 0.0, 99, 33_333)).unwrap();
    assert_eq!(
        second.classification,
        FrameClassification::PoorTracking,
        "used fraction {}",
        second.used_fraction
    );
    assert!(second.used_fraction < 0.1);
    assert!(second.used_fraction > 0.0);

    // Poor tracking still merges and resets the failure counter.
    assert_eq!(session.status().consecutive_failures, 0);
    assert!(session.status().last_classification == Some(FrameClassification::PoorTracking));
}

#[test]
fn session_fails_after_eight_consecutive_losses() {
    let mut session = ReconstructionSession::new(session_config());
    session.accumulate(&wall_frame(1.0, 0.0, 3, 0)).unwrap();

    for i in 1..=7u64 {
        let metadata = session.accumulate(&garbage_frame(i * 33_333)).unwrap();
        assert_eq!(metadata.classification, FrameClassification::LostTracking);
    }

    let eighth = session.accumulate(&garbage_frame(8 * 33_333)).unwrap();
    assert_eq!(eighth.classification, FrameClassification::Failed);

    // The session is terminal: the 9th call is rejected until reset.
    assert!(session.accumulate(&wall_frame(1.0, 0.0, 4, 9 * 33_333)).is_err());
    assert!(session.status().failed);

    session.reset();
    let after_reset = session.accumulate(&wall_frame(1.0, 0.0, 5, 0)).unwrap();
    assert_eq!(after_reset.classification, FrameClassification::Succeeded);
}

#[test]
fn snapshot_reflects_model_after_each_frame() {
    let mut session = ReconstructionSession::new(session_config());
    session.accumulate(&wall_frame(1.0, 0.0, 11, 0)).unwrap();

    let snapshot = session.export_snapshot();
    assert_eq!(snapshot.len(), session.surfel_count());
    assert!(snapshot
        .normals
        .iter()
        .all(|n| (n.norm() - 1.0).abs() < 1e-3));
    assert!(snapshot.radii.iter().all(|&r| r > 0.0));

    // Snapshots are detached copies: later frames do not mutate them.
    let len_before = snapshot.len();
    session
        .accumulate(&wall_frame(1.0, 0.0, 12, 33_333))
        .unwrap();
    assert_eq!(snapshot.len(), len_before);
}

#[test]
fn moving_camera_tracks_wall() {
    // The camera retreats 2mm per frame; sensor poses are handed in as
    // initial guesses and ICP keeps the model consistent.
    let mut session = ReconstructionSession::new(session_config());
    let base = wall_frame(1.0, 0.0, 21, 0);
    session.accumulate(&base).unwrap();
    let count_after_first = session.surfel_count();

    for i in 1..4u64 {
        let offset = -0.002 * i as f32;
        let pose = Isometry3::translation(0.0, 0.0, offset);
        // Wall is at z = 1 in world; from a camera at z = offset the
        // observed depth grows accordingly.
        let mut frame = wall_frame(1.0 - offset, 0.0, 21 + i, i * 33_333);
        frame.camera.pose = pose;
        let metadata = session.accumulate(&frame).unwrap();
        assert!(
            metadata.classification.is_merged(),
            "frame {i}: {metadata:?}"
        );
    }

    // Same wall seen from slightly different ranges: still one wall's
    // worth of surfels, not four.
    assert!(session.surfel_count() < count_after_first * 2);
}
