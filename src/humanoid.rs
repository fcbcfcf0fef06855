use std::{collections::BTreeMap, fmt};

use serde::{Deserialize, Serialize};

use crate::scene::NodeId;

// ─── Canonical bone table ─────────────────────────────────────────────────────

macro_rules! human_bones {
    ($($variant:ident => $name:literal),+ $(,)?) => {
        /// Canonical humanoid bone roles, named after the VRM 1.0 humanoid.
        ///
        /// Declaration order is the canonical order: parents come before their
        /// children, and `Ord` follows it.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub enum HumanBone {
            $(#[serde(rename = $name)] $variant,)+
        }

        impl HumanBone {
            /// Every canonical bone in canonical order.
            pub const ALL: &'static [HumanBone] = &[$(HumanBone::$variant),+];

            /// VRM 1.0 name of the bone.
            pub fn name(self) -> &'static str {
                match self {
                    $(HumanBone::$variant => $name,)+
                }
            }
        }
    };
}

human_bones! {
    Hips => "hips",
    Spine => "spine",
    Chest => "chest",
    UpperChest => "upperChest",
    Neck => "neck",
    Head => "head",
    LeftEye => "leftEye",
    RightEye => "rightEye",
    Jaw => "jaw",
    LeftUpperLeg => "leftUpperLeg",
    LeftLowerLeg => "leftLowerLeg",
    LeftFoot => "leftFoot",
    LeftToes => "leftToes",
    RightUpperLeg => "rightUpperLeg",
    RightLowerLeg => "rightLowerLeg",
    RightFoot => "rightFoot",
    RightToes => "rightToes",
    LeftShoulder => "leftShoulder",
    LeftUpperArm => "leftUpperArm",
    LeftLowerArm => "leftLowerArm",
    LeftHand => "leftHand",
    RightShoulder => "rightShoulder",
    RightUpperArm => "rightUpperArm",
    RightLowerArm => "rightLowerArm",
    RightHand => "rightHand",
    LeftThumbMetacarpal => "leftThumbMetacarpal",
    LeftThumbProximal => "leftThumbProximal",
    LeftThumbDistal => "leftThumbDistal",
    LeftIndexProximal => "leftIndexProximal",
    LeftIndexIntermediate => "leftIndexIntermediate",
    LeftIndexDistal => "leftIndexDistal",
    LeftMiddleProximal => "leftMiddleProximal",
    LeftMiddleIntermediate => "leftMiddleIntermediate",
    LeftMiddleDistal => "leftMiddleDistal",
    LeftRingProximal => "leftRingProximal",
    LeftRingIntermediate => "leftRingIntermediate",
    LeftRingDistal => "leftRingDistal",
    LeftLittleProximal => "leftLittleProximal",
    LeftLittleIntermediate => "leftLittleIntermediate",
    LeftLittleDistal => "leftLittleDistal",
    RightThumbMetacarpal => "rightThumbMetacarpal",
    RightThumbProximal => "rightThumbProximal",
    RightThumbDistal => "rightThumbDistal",
    RightIndexProximal => "rightIndexProximal",
    RightIndexIntermediate => "rightIndexIntermediate",
    RightIndexDistal => "rightIndexDistal",
    RightMiddleProximal => "rightMiddleProximal",
    RightMiddleIntermediate => "rightMiddleIntermediate",
    RightMiddleDistal => "rightMiddleDistal",
    RightRingProximal => "rightRingProximal",
    RightRingIntermediate => "rightRingIntermediate",
    RightRingDistal => "rightRingDistal",
    RightLittleProximal => "rightLittleProximal",
    RightLittleIntermediate => "rightLittleIntermediate",
    RightLittleDistal => "rightLittleDistal",
}

impl HumanBone {
    /// Resolve a VRM 1.0 bone name. Matching ignores ASCII case and
    /// surrounding whitespace.
    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim();
        Self::ALL
            .iter()
            .copied()
            .find(|bone| bone.name().eq_ignore_ascii_case(name))
    }

    /// Resolve a VRM 0.x bone name.
    ///
    /// VRM 0.x called the thumb chain proximal/intermediate/distal; VRM 1.0
    /// renamed it metacarpal/proximal/distal.
    pub fn from_vrm0_name(name: &str) -> Option<Self> {
        let name = name.trim();
        let migrated = [
            ("leftThumbProximal", HumanBone::LeftThumbMetacarpal),
            ("leftThumbIntermediate", HumanBone::LeftThumbProximal),
            ("rightThumbProximal", HumanBone::RightThumbMetacarpal),
            ("rightThumbIntermediate", HumanBone::RightThumbProximal),
        ];
        migrated
            .iter()
            .find(|(legacy, _)| legacy.eq_ignore_ascii_case(name))
            .map(|(_, bone)| *bone)
            .or_else(|| Self::from_name(name))
    }

    /// Bones that must be mapped for an avatar to be retargeted.
    pub fn is_required(self) -> bool {
        use HumanBone::*;
        matches!(
            self,
            Hips | Spine
                | Head
                | LeftUpperLeg
                | LeftLowerLeg
                | LeftFoot
                | RightUpperLeg
                | RightLowerLeg
                | RightFoot
                | LeftUpperArm
                | LeftLowerArm
                | LeftHand
                | RightUpperArm
                | RightLowerArm
                | RightHand
        )
    }

    /// Parent in the canonical humanoid hierarchy. Optional parents are
    /// included; use [`HumanoidBoneMap::expected_parent`] to skip unmapped ones.
    pub fn parent(self) -> Option<Self> {
        use HumanBone::*;
        let parent = match self {
            Hips => return None,
            Spine => Hips,
            Chest => Spine,
            UpperChest => Chest,
            Neck => UpperChest,
            Head => Neck,
            LeftEye | RightEye | Jaw => Head,
            LeftUpperLeg | RightUpperLeg => Hips,
            LeftLowerLeg => LeftUpperLeg,
            LeftFoot => LeftLowerLeg,
            LeftToes => LeftFoot,
            RightLowerLeg => RightUpperLeg,
            RightFoot => RightLowerLeg,
            RightToes => RightFoot,
            LeftShoulder | RightShoulder => UpperChest,
            LeftUpperArm => LeftShoulder,
            LeftLowerArm => LeftUpperArm,
            LeftHand => LeftLowerArm,
            RightUpperArm => RightShoulder,
            RightLowerArm => RightUpperArm,
            RightHand => RightLowerArm,
            LeftThumbMetacarpal | LeftIndexProximal | LeftMiddleProximal | LeftRingProximal
            | LeftLittleProximal => LeftHand,
            LeftThumbProximal => LeftThumbMetacarpal,
            LeftThumbDistal => LeftThumbProximal,
            LeftIndexIntermediate => LeftIndexProximal,
            LeftIndexDistal => LeftIndexIntermediate,
            LeftMiddleIntermediate => LeftMiddleProximal,
            LeftMiddleDistal => LeftMiddleIntermediate,
            LeftRingIntermediate => LeftRingProximal,
            LeftRingDistal => LeftRingIntermediate,
            LeftLittleIntermediate => LeftLittleProximal,
            LeftLittleDistal => LeftLittleIntermediate,
            RightThumbMetacarpal | RightIndexProximal | RightMiddleProximal
            | RightRingProximal | RightLittleProximal => RightHand,
            RightThumbProximal => RightThumbMetacarpal,
            RightThumbDistal => RightThumbProximal,
            RightIndexIntermediate => RightIndexProximal,
            RightIndexDistal => RightIndexIntermediate,
            RightMiddleIntermediate => RightMiddleProximal,
            RightMiddleDistal => RightMiddleIntermediate,
            RightRingIntermediate => RightRingProximal,
            RightRingDistal => RightRingIntermediate,
            RightLittleIntermediate => RightLittleProximal,
            RightLittleDistal => RightLittleIntermediate,
        };
        Some(parent)
    }
}

impl fmt::Display for HumanBone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ─── Bone map ─────────────────────────────────────────────────────────────────

/// Canonical bone → source node mapping decoded from the VRM humanoid.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HumanoidBoneMap {
    bones: BTreeMap<HumanBone, NodeId>,
}

impl HumanoidBoneMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Map `bone` to `node`. An existing mapping is kept and `false` returned.
    pub fn insert(&mut self, bone: HumanBone, node: NodeId) -> bool {
        if self.bones.contains_key(&bone) {
            return false;
        }
        self.bones.insert(bone, node);
        true
    }

    pub fn get(&self, bone: HumanBone) -> Option<NodeId> {
        self.bones.get(&bone).copied()
    }

    pub fn contains(&self, bone: HumanBone) -> bool {
        self.bones.contains_key(&bone)
    }

    pub fn len(&self) -> usize {
        self.bones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bones.is_empty()
    }

    /// Mapped bones in canonical order.
    pub fn iter(&self) -> impl Iterator<Item = (HumanBone, NodeId)> + '_ {
        self.bones.iter().map(|(bone, node)| (*bone, *node))
    }

    /// First bone (in canonical order) mapped to `node`.
    pub fn bone_for_node(&self, node: NodeId) -> Option<HumanBone> {
        self.iter()
            .find(|(_, mapped)| *mapped == node)
            .map(|(bone, _)| bone)
    }

    /// First required bone, in canonical order, that has no mapping.
    pub fn first_missing_required(&self) -> Option<HumanBone> {
        HumanBone::ALL
            .iter()
            .copied()
            .find(|bone| bone.is_required() && !self.contains(*bone))
    }

    /// Closest canonical ancestor of `bone` that is mapped.
    ///
    /// `neck` resolves to `chest` when the rig has no `upperChest`.
    pub fn expected_parent(&self, bone: HumanBone) -> Option<HumanBone> {
        let mut current = bone.parent();
        while let Some(candidate) = current {
            if self.contains(candidate) {
                return Some(candidate);
            }
            current = candidate.parent();
        }
        None
    }
}
