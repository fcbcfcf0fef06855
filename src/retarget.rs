//! Humanoid retargeting: per-bone rotation corrections that move animation
//! from the source avatar's rest pose onto a host rig convention.

use std::collections::{BTreeMap, BTreeSet};

use nalgebra::{Matrix4, Point3, Quaternion, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};

use crate::{
    diagnostic::{DiagnosticCode, Diagnostics, EntityRef},
    error::ImportError,
    humanoid::{HumanBone, HumanoidBoneMap},
    scene::{NodeId, SceneGraph, world_position, world_rotation},
};

const DEGENERATE_DETERMINANT: f32 = 1e-12;
const MIN_HIPS_HEIGHT: f32 = 1e-6;

/// Expected rest pose of one bone on the host rig.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConventionEntry {
    /// World-space rest orientation `[x, y, z, w]` in target space.
    pub rest_rotation: [f32; 4],
    /// Name of the corresponding bone on the host rig.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_name: Option<String>,
}

impl ConventionEntry {
    pub fn rotation(&self) -> UnitQuaternion<f32> {
        let [x, y, z, w] = self.rest_rotation;
        UnitQuaternion::try_new(Quaternion::new(w, x, y, z), f32::EPSILON)
            .unwrap_or_else(UnitQuaternion::identity)
    }
}

/// Host rig convention: canonical bone → expected rest world orientation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RigConvention {
    pub bones: BTreeMap<HumanBone, ConventionEntry>,
    /// Height of the hips above the ground in target units.
    pub hips_height: Option<f32>,
}

/// The VRM 1.0 normalized T-pose: every bone at identity.
impl Default for RigConvention {
    fn default() -> Self {
        Self::uniform([0.0, 0.0, 0.0, 1.0])
    }
}

impl RigConvention {
    /// Every canonical bone shares `rest_rotation`.
    pub fn uniform(rest_rotation: [f32; 4]) -> Self {
        Self {
            bones: HumanBone::ALL
                .iter()
                .map(|&bone| {
                    (
                        bone,
                        ConventionEntry {
                            rest_rotation,
                            target_name: None,
                        },
                    )
                })
                .collect(),
            hips_height: None,
        }
    }

    /// Record the rest pose of an imported avatar so other animation can be
    /// retargeted onto it. Bone names are the avatar's node names.
    pub fn capture(scene: &SceneGraph, bone_map: &HumanoidBoneMap, up: Vector3<f32>) -> Self {
        let mut bones = BTreeMap::new();
        for (bone, node) in bone_map.iter() {
            let (Some(world), Some(scene_node)) = (scene.world(node), scene.node(node)) else {
                continue;
            };
            let rotation = world_rotation(world).into_inner();
            bones.insert(
                bone,
                ConventionEntry {
                    rest_rotation: [rotation.i, rotation.j, rotation.k, rotation.w],
                    target_name: Some(scene_node.name.clone()),
                },
            );
        }
        let hips_height = bone_map
            .get(HumanBone::Hips)
            .and_then(|hips| scene.world(hips))
            .map(|world| world_position(world).dot(&up))
            .filter(|height| *height > MIN_HIPS_HEIGHT);
        Self { bones, hips_height }
    }

    pub fn get(&self, bone: HumanBone) -> Option<&ConventionEntry> {
        self.bones.get(&bone)
    }
}

// ─── Profile ──────────────────────────────────────────────────────────────────

/// Correction for one bone. A source-local rotation `q` retargets to
/// `pre · q · post`.
#[derive(Debug, Clone, PartialEq)]
pub struct BoneCorrection {
    pub node: NodeId,
    /// Nearest retargeted humanoid ancestor.
    pub parent_bone: Option<HumanBone>,
    pub pre: UnitQuaternion<f32>,
    pub post: UnitQuaternion<f32>,
    pub source_rest: UnitQuaternion<f32>,
    pub target_rest: UnitQuaternion<f32>,
    pub target_name: Option<String>,
}

impl BoneCorrection {
    pub fn apply(&self, rotation: &UnitQuaternion<f32>) -> UnitQuaternion<f32> {
        self.pre * rotation * self.post
    }

    /// Linear form of [`apply`](Self::apply) for raw quaternion components
    /// `[x, y, z, w]`; also valid for cubic-spline tangents.
    pub fn apply_raw(&self, q: [f32; 4]) -> [f32; 4] {
        let [x, y, z, w] = q;
        let out = self.pre.quaternion() * Quaternion::new(w, x, y, z) * self.post.quaternion();
        [out.i, out.j, out.k, out.w]
    }

    pub fn is_identity(&self, epsilon: f32) -> bool {
        self.pre.angle() < epsilon && self.post.angle() < epsilon
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetargetProfile {
    pub bones: BTreeMap<HumanBone, BoneCorrection>,
    /// Mapped bones that were left out; their tracks are dropped.
    pub skipped: BTreeSet<HumanBone>,
    pub translation_scale: f32,
    /// Rest world transform of the hips' parent; root translation keys are
    /// expressed in it.
    pub root_space: Matrix4<f32>,
    pub up: Vector3<f32>,
}

impl RetargetProfile {
    /// Profile that leaves animation untouched, used when nothing is retargeted.
    pub fn passthrough(up: Vector3<f32>) -> Self {
        Self {
            bones: BTreeMap::new(),
            skipped: BTreeSet::new(),
            translation_scale: 1.0,
            root_space: Matrix4::identity(),
            up,
        }
    }

    pub fn get(&self, bone: HumanBone) -> Option<&BoneCorrection> {
        self.bones.get(&bone)
    }

    pub fn is_skipped(&self, bone: HumanBone) -> bool {
        self.skipped.contains(&bone)
    }

    /// Hips translation key in target rig space.
    pub fn root_translation(&self, translation: [f32; 3]) -> [f32; 3] {
        let point = self.root_space.transform_point(&Point3::from(translation));
        (point.coords * self.translation_scale).into()
    }

    /// Root translation tangents share the scale but not the offset.
    pub fn root_translation_tangent(&self, tangent: [f32; 3]) -> [f32; 3] {
        let vector = self.root_space.transform_vector(&Vector3::from(tangent));
        (vector * self.translation_scale).into()
    }
}

fn is_degenerate(world: &Matrix4<f32>) -> bool {
    world.fixed_view::<3, 3>(0, 0).determinant().abs() < DEGENERATE_DETERMINANT
}

/// Nearest ancestor of `node` that carries a retargeted bone.
fn nearest_bone(
    scene: &SceneGraph,
    node: NodeId,
    by_node: &BTreeMap<NodeId, HumanBone>,
) -> Option<(HumanBone, NodeId)> {
    scene
        .ancestors(node)
        .find_map(|ancestor| by_node.get(&ancestor).map(|bone| (*bone, ancestor)))
}

struct Accepted {
    node: NodeId,
    source_rest: UnitQuaternion<f32>,
    target_rest: UnitQuaternion<f32>,
    target_name: Option<String>,
}

/// Compute the correction for every mapped bone.
///
/// # Errors
///
/// `IncompleteHumanoidRig` naming the first required bone, in canonical
/// order, that has no mapping.
pub fn compute_retarget_profile(
    scene: &SceneGraph,
    bone_map: &HumanoidBoneMap,
    convention: &RigConvention,
    up: Vector3<f32>,
    diagnostics: &mut Diagnostics,
) -> Result<RetargetProfile, ImportError> {
    if let Some(bone) = bone_map.first_missing_required() {
        return Err(ImportError::IncompleteHumanoidRig { bone });
    }

    let mut accepted: BTreeMap<HumanBone, Accepted> = BTreeMap::new();
    let mut by_node: BTreeMap<NodeId, HumanBone> = BTreeMap::new();
    let mut skipped = BTreeSet::new();

    for &bone in HumanBone::ALL {
        let Some(node) = bone_map.get(bone) else {
            diagnostics.warn(
                DiagnosticCode::MissingOptionalBone,
                EntityRef::HumanBone(bone),
                "optional bone is not mapped; skipped",
            );
            continue;
        };
        if let Some(first) = by_node.get(&node) {
            diagnostics.warn(
                DiagnosticCode::DuplicateBoneNode,
                EntityRef::HumanBone(bone),
                format!("{node} is already mapped to {first}; skipped"),
            );
            skipped.insert(bone);
            continue;
        }
        let Some(world) = scene.world(node) else {
            skipped.insert(bone);
            continue;
        };
        if is_degenerate(world) {
            diagnostics.warn(
                DiagnosticCode::DegenerateRestPose,
                EntityRef::HumanBone(bone),
                format!("{node} has a zero-scale rest transform; skipped"),
            );
            skipped.insert(bone);
            continue;
        }

        let source_rest = world_rotation(world);
        let (target_rest, target_name) = match convention.get(bone) {
            Some(entry) => (entry.rotation(), entry.target_name.clone()),
            None => {
                diagnostics.warn(
                    DiagnosticCode::BoneNotInConvention,
                    EntityRef::HumanBone(bone),
                    "rig convention has no entry; source orientation kept",
                );
                (source_rest, None)
            }
        };
        by_node.insert(node, bone);
        accepted.insert(
            bone,
            Accepted {
                node,
                source_rest,
                target_rest,
                target_name,
            },
        );
    }

    let mut bones = BTreeMap::new();
    for (&bone, entry) in &accepted {
        let post = entry.source_rest.inverse() * entry.target_rest;
        let parent_rotation = scene
            .parent(entry.node)
            .and_then(|parent| scene.world(parent))
            .map_or_else(UnitQuaternion::identity, world_rotation);

        let parent = nearest_bone(scene, entry.node, &by_node);
        if let Some(expected) = bone_map.expected_parent(bone)
            && parent.map(|(actual, _)| actual) != Some(expected)
        {
            diagnostics.warn(
                DiagnosticCode::UnexpectedBoneHierarchy,
                EntityRef::HumanBone(bone),
                match parent {
                    Some((actual, _)) => format!("nearest humanoid ancestor is {actual}, expected {expected}"),
                    None => format!("no humanoid ancestor, expected {expected}"),
                },
            );
        }

        let pre = match parent {
            Some((parent_bone, _)) => {
                let parent_entry = &accepted[&parent_bone];
                let parent_post = parent_entry.source_rest.inverse() * parent_entry.target_rest;
                let chain = parent_entry.source_rest.inverse() * parent_rotation;
                parent_post.inverse() * chain
            }
            None => parent_rotation,
        };

        bones.insert(
            bone,
            BoneCorrection {
                node: entry.node,
                parent_bone: parent.map(|(parent_bone, _)| parent_bone),
                pre,
                post,
                source_rest: entry.source_rest,
                target_rest: entry.target_rest,
                target_name: entry.target_name.clone(),
            },
        );
    }

    let hips = bone_map.get(HumanBone::Hips);
    let root_space = hips
        .and_then(|hips| scene.parent(hips))
        .and_then(|parent| scene.world(parent))
        .copied()
        .unwrap_or_else(Matrix4::identity);
    let source_height = hips
        .and_then(|hips| scene.world(hips))
        .map(|world| world_position(world).dot(&up));
    let translation_scale = match (convention.hips_height, source_height) {
        (Some(target), Some(source)) if source > MIN_HIPS_HEIGHT && target > 0.0 => target / source,
        (Some(_), _) => {
            log::warn!("source hips height is not positive; root translation kept at scale 1");
            1.0
        }
        _ => 1.0,
    };

    log::debug!(
        "retarget profile: {} bones, {} skipped, translation scale {translation_scale}",
        bones.len(),
        skipped.len()
    );
    Ok(RetargetProfile {
        bones,
        skipped,
        translation_scale,
        root_space,
        up,
    })
}
