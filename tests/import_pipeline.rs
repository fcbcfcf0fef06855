mod common;

use std::{collections::BTreeSet, thread};

use common::{
    LEFT_UPPER_ARM_NODE, RIG, RigFixture, SKIN_JOINTS, SPINE_NODE, bin_chunk_header_offset,
};
use vrm_import::{
    CancelToken, DiagnosticCode, EntityRef, ErrorKind, HumanBone, ImportError, ImportSettings,
    RigConvention,
    animation::{Keyframes, TrackChannel, TrackTarget},
    import_vrm, import_vrm_with_cancel,
    report::ImportSummary,
    scene::NodeId,
};

fn import(fixture: &RigFixture) -> vrm_import::ImportOutcome {
    import_vrm(&fixture.build(), &ImportSettings::default()).expect("import fixture")
}

#[test]
fn given_same_bytes_when_importing_twice_then_scene_and_profile_are_identical() {
    let bytes = RigFixture::default().build();
    let settings = ImportSettings::default();

    let first = import_vrm(&bytes, &settings).expect("first import");
    let second = import_vrm(&bytes, &settings).expect("second import");

    assert_eq!(first.assets.scene, second.assets.scene);
    assert_eq!(first.assets.retarget, second.assets.retarget);
    assert_eq!(first.diagnostics, second.diagnostics);
}

#[test]
fn given_rig_when_importing_then_every_node_descends_from_exactly_one_root() {
    let outcome = import(&RigFixture::default());
    let scene = &outcome.assets.scene;

    assert_eq!(scene.roots(), &[NodeId(0)]);

    let mut seen_children = BTreeSet::new();
    for node in scene.nodes() {
        for child in &node.children {
            assert!(seen_children.insert(*child), "{child} has two parents");
            assert_eq!(scene.parent(*child), Some(node.id));
        }
        let ancestors: Vec<NodeId> = scene.ancestors(node.id).collect();
        assert!(!ancestors.contains(&node.id), "{} is its own ancestor", node.id);
        let top = ancestors.last().copied().unwrap_or(node.id);
        assert_eq!(top, NodeId(0));
    }
    assert_eq!(scene.traverse().len(), RIG.len());
}

#[test]
fn given_skinned_mesh_when_importing_then_bindings_pair_every_joint_with_a_matrix() {
    let outcome = import(&RigFixture::default());
    let skins = outcome.assets.scene.skins();

    assert_eq!(skins.len(), 1);
    assert_eq!(skins[0].joints().len(), SKIN_JOINTS);
    assert_eq!(skins[0].inverse_bind_matrices().len(), skins[0].joints().len());

    let mesh = &outcome.assets.meshes[0];
    assert_eq!(mesh.vertex_count(), 3);
    assert_eq!(mesh.triangle_count(), 1);
    let skin = mesh.primitives[0].skin.as_ref().expect("skin weights");
    for weights in &skin.weights {
        let total: f32 = weights.iter().sum();
        assert!((total - 1.0).abs() < 1e-5);
    }
}

#[test]
fn given_missing_left_foot_when_importing_then_rig_is_incomplete_and_no_assets_are_returned() {
    let fixture = RigFixture {
        omitted_bone: Some("leftFoot"),
        ..RigFixture::default()
    };

    let failure = import_vrm(&fixture.build(), &ImportSettings::default())
        .expect_err("incomplete humanoid");

    assert_eq!(
        failure.error,
        ImportError::IncompleteHumanoidRig {
            bone: HumanBone::LeftFoot
        }
    );
    let summary = ImportSummary::from_failure("fixture.vrm", &failure);
    assert_eq!(summary.error, Some(ErrorKind::IncompleteHumanoidRig));
    assert!(summary.mapped_bones.is_empty());
}

#[test]
fn given_rest_pose_matching_convention_when_retargeting_then_corrections_are_identity() {
    let outcome = import(&RigFixture::default());
    let profile = outcome.assets.retarget.as_ref().expect("retarget profile");

    assert_eq!(profile.bones.len(), 15);
    for (bone, correction) in &profile.bones {
        assert!(correction.is_identity(1e-4), "{bone} is not identity");
    }
    assert!((profile.translation_scale - 1.0).abs() < 1e-6);
}

fn assert_close<const N: usize>(actual: [f32; N], expected: [f32; N]) {
    for (a, e) in actual.iter().zip(expected) {
        assert!((a - e).abs() < 1e-4, "{actual:?} != {expected:?}");
    }
}

#[test]
fn given_a_posed_arm_and_taller_target_rig_when_importing_then_rest_keys_become_identity_and_hips_scale() {
    let half_angle: f32 = -0.3;
    let a_pose = [0.0, 0.0, half_angle.sin(), half_angle.cos()];
    let settings = ImportSettings {
        rig: RigConvention {
            hips_height: Some(2.0),
            ..RigConvention::default()
        },
        ..ImportSettings::default()
    };
    let fixture = RigFixture {
        arm_rotation: Some(a_pose),
        ..RigFixture::default()
    };

    let outcome = import_vrm(&fixture.build(), &settings).expect("import fixture");

    let profile = outcome.assets.retarget.as_ref().expect("retarget profile");
    let arm = profile.get(HumanBone::LeftUpperArm).expect("upper arm");
    assert!(!arm.is_identity(1e-3));
    assert!((profile.translation_scale - 2.0).abs() < 1e-5);

    let clip = &outcome.assets.animations[0];
    let track = |node: usize| {
        clip.tracks
            .iter()
            .find(|track| track.node.0 == node)
            .expect("track")
    };

    let arm_track = track(LEFT_UPPER_ARM_NODE);
    assert_eq!(arm_track.target, TrackTarget::Bone(HumanBone::LeftUpperArm));
    let TrackChannel::Rotation(Keyframes::CubicSpline(keys)) = &arm_track.channel else {
        panic!("expected cubic arm rotation");
    };
    assert_eq!(keys.len(), 3);
    for key in keys {
        let (in_tangent, value, out_tangent) = key.value;
        assert_close(in_tangent, [0.0; 4]);
        assert_close(value, [0.0, 0.0, 0.0, 1.0]);
        assert_close(out_tangent, [0.0, 0.0, 0.0, 0.5]);
    }

    let TrackChannel::Translation(Keyframes::Linear(hips)) = &track(1).channel else {
        panic!("expected linear hips translation");
    };
    assert_close(hips[0].value, [0.0, 2.0, 0.0]);
    assert_close(hips[1].value, [0.0, 2.2, 0.0]);
}

#[test]
fn given_unordered_keyframe_times_when_importing_then_keys_are_sorted_with_warning() {
    let outcome = import(&RigFixture {
        times: [2.0, 1.0, 3.0],
        ..RigFixture::default()
    });

    let clip = &outcome.assets.animations[0];
    let spine = clip
        .tracks
        .iter()
        .find(|track| track.node == NodeId(SPINE_NODE))
        .expect("spine track");
    assert_eq!(spine.target, TrackTarget::Bone(HumanBone::Spine));
    assert!(matches!(spine.channel, TrackChannel::Rotation(_)));
    assert_eq!(spine.channel.times(), vec![1.0, 2.0, 3.0]);
    assert!((clip.duration - 3.0).abs() < 1e-6);
    assert!(
        outcome
            .diagnostics
            .iter()
            .any(|entry| entry.code == DiagnosticCode::NonMonotonicKeyframes)
    );
}

#[test]
fn given_bin_chunk_longer_than_file_when_importing_then_chunk_is_truncated() {
    let mut bytes = RigFixture::default().build();
    let offset = bin_chunk_header_offset(&bytes);
    let length = u32::from_le_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ]);
    bytes[offset..offset + 4].copy_from_slice(&(length + 64).to_le_bytes());

    let failure = import_vrm(&bytes, &ImportSettings::default()).expect_err("truncated");

    assert_eq!(failure.kind(), ErrorKind::TruncatedChunk);
}

#[test]
fn given_file_cut_short_inside_bin_chunk_when_importing_then_chunk_is_truncated() {
    let bytes = RigFixture::default().build();
    let cut = &bytes[..bytes.len() - 16];

    let failure = import_vrm(cut, &ImportSettings::default()).expect_err("cut short");

    assert_eq!(failure.kind(), ErrorKind::TruncatedChunk);
    assert!(matches!(
        failure.error,
        ImportError::TruncatedChunk { chunk: 1, declared, available } if declared == available + 16
    ));
}

#[test]
fn given_joint_nine_on_eight_joint_skin_when_importing_then_reference_cites_nine() {
    let fixture = RigFixture {
        joint_index: 9,
        ..RigFixture::default()
    };

    let failure = import_vrm(&fixture.build(), &ImportSettings::default())
        .expect_err("dangling joint");

    assert_eq!(
        failure.error,
        ImportError::DanglingReference {
            referrer: EntityRef::Primitive {
                mesh: 0,
                primitive: 0
            },
            target: "skin joint",
            index: 9,
            len: SKIN_JOINTS,
        }
    );
    assert!(failure.to_string().contains('9'));
}

#[test]
fn given_vrm0_avatar_when_importing_then_meta_and_bones_are_decoded() {
    let outcome = import(&RigFixture {
        vrm0: true,
        ..RigFixture::default()
    });

    let summary = ImportSummary::from_outcome("fixture.vrm", &outcome);
    assert_eq!(summary.model_name.as_deref(), Some("Fixture Zero"));
    assert_eq!(summary.authors, vec!["tests".to_owned()]);
    assert_eq!(summary.mapped_bones.len(), 15);
    assert!(summary.mapped_bones.iter().all(|bone| bone.retargeted));
    assert_eq!(summary.track_count, 2);
}

#[test]
fn given_shared_settings_when_importing_on_several_threads_then_results_agree() {
    let bytes = RigFixture::default().build();
    let settings = ImportSettings::default();

    let outcomes: Vec<_> = thread::scope(|scope| {
        let workers: Vec<_> = (0..4)
            .map(|_| scope.spawn(|| import_vrm(&bytes, &settings)))
            .collect();
        workers
            .into_iter()
            .map(|worker| worker.join().expect("worker").expect("import"))
            .collect()
    });

    for outcome in &outcomes[1..] {
        assert_eq!(outcome.assets, outcomes[0].assets);
    }
}

#[test]
fn given_token_cancelled_from_another_thread_when_importing_then_import_is_cancelled() {
    let bytes = RigFixture::default().build();
    let token = CancelToken::new();

    let remote = token.clone();
    thread::spawn(move || remote.cancel())
        .join()
        .expect("cancel thread");

    let failure = import_vrm_with_cancel(&bytes, &ImportSettings::default(), &token)
        .expect_err("cancelled");
    assert_eq!(failure.kind(), ErrorKind::Cancelled);

    let outcome = import_vrm_with_cancel(&bytes, &ImportSettings::default(), &CancelToken::new())
        .expect("uncancelled import");
    assert_eq!(outcome.assets.animations.len(), 1);
}
