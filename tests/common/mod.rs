#![allow(dead_code)]

use serde_json::{Value, json};

/// Accumulates a single binary buffer plus the views and accessors into it.
#[derive(Debug, Default)]
pub struct GlbBuilder {
    bin: Vec<u8>,
    views: Vec<Value>,
    accessors: Vec<Value>,
}

fn components(kind: &str) -> usize {
    match kind {
        "VEC2" => 2,
        "VEC3" => 3,
        "VEC4" => 4,
        "MAT4" => 16,
        _ => 1,
    }
}

impl GlbBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn push_view(&mut self, bytes: &[u8]) -> usize {
        while self.bin.len() % 4 != 0 {
            self.bin.push(0);
        }
        self.views.push(json!({
            "buffer": 0,
            "byteOffset": self.bin.len(),
            "byteLength": bytes.len(),
        }));
        self.bin.extend_from_slice(bytes);
        self.views.len() - 1
    }

    fn push_accessor(
        &mut self,
        bytes: &[u8],
        component_type: u32,
        count: usize,
        kind: &str,
    ) -> usize {
        let view = self.push_view(bytes);
        self.accessors.push(json!({
            "bufferView": view,
            "componentType": component_type,
            "count": count,
            "type": kind,
        }));
        self.accessors.len() - 1
    }

    pub fn f32_accessor(&mut self, values: &[f32], kind: &str) -> usize {
        let bytes: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        self.push_accessor(&bytes, 5126, values.len() / components(kind), kind)
    }

    pub fn u8_accessor(&mut self, values: &[u8], kind: &str) -> usize {
        self.push_accessor(values, 5121, values.len() / components(kind), kind)
    }

    pub fn u16_accessor(&mut self, values: &[u16], kind: &str) -> usize {
        let bytes: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        self.push_accessor(&bytes, 5123, values.len() / components(kind), kind)
    }

    /// Attach buffers/views/accessors to `document` and pack a GLB.
    pub fn finish(mut self, mut document: Value) -> Vec<u8> {
        while self.bin.len() % 4 != 0 {
            self.bin.push(0);
        }
        document["buffers"] = json!([{ "byteLength": self.bin.len() }]);
        document["bufferViews"] = Value::Array(self.views);
        document["accessors"] = Value::Array(self.accessors);
        glb(&document, &self.bin)
    }
}

/// Pack a JSON document and a binary chunk into a GLB container.
pub fn glb(document: &Value, bin: &[u8]) -> Vec<u8> {
    let mut json = document.to_string().into_bytes();
    while json.len() % 4 != 0 {
        json.push(b' ');
    }
    let total = 12 + 8 + json.len() + if bin.is_empty() { 0 } else { 8 + bin.len() };

    let mut bytes = Vec::with_capacity(total);
    bytes.extend_from_slice(b"glTF");
    bytes.extend_from_slice(&2u32.to_le_bytes());
    bytes.extend_from_slice(&(total as u32).to_le_bytes());
    bytes.extend_from_slice(&(json.len() as u32).to_le_bytes());
    bytes.extend_from_slice(b"JSON");
    bytes.extend_from_slice(&json);
    if !bin.is_empty() {
        bytes.extend_from_slice(&(bin.len() as u32).to_le_bytes());
        bytes.extend_from_slice(b"BIN\0");
        bytes.extend_from_slice(bin);
    }
    bytes
}

/// Byte offset of the BIN chunk's length field.
pub fn bin_chunk_header_offset(bytes: &[u8]) -> usize {
    let json_len = u32::from_le_bytes([bytes[12], bytes[13], bytes[14], bytes[15]]) as usize;
    12 + 8 + json_len
}

// ─── Rig fixture ──────────────────────────────────────────────────────────────

/// `(name, humanoid bone, parent, local translation)`; node 0 is the scene
/// root and node 16 instances the skinned mesh.
pub const RIG: &[(&str, &str, Option<usize>, [f32; 3])] = &[
    ("Root", "", None, [0.0, 0.0, 0.0]),
    ("J_Hips", "hips", Some(0), [0.0, 1.0, 0.0]),
    ("J_Spine", "spine", Some(1), [0.0, 0.1, 0.0]),
    ("J_Head", "head", Some(2), [0.0, 0.3, 0.0]),
    ("J_L_UpperArm", "leftUpperArm", Some(2), [0.2, 0.2, 0.0]),
    ("J_L_LowerArm", "leftLowerArm", Some(4), [0.3, 0.0, 0.0]),
    ("J_L_Hand", "leftHand", Some(5), [0.25, 0.0, 0.0]),
    ("J_R_UpperArm", "rightUpperArm", Some(2), [-0.2, 0.2, 0.0]),
    ("J_R_LowerArm", "rightLowerArm", Some(7), [-0.3, 0.0, 0.0]),
    ("J_R_Hand", "rightHand", Some(8), [-0.25, 0.0, 0.0]),
    ("J_L_UpperLeg", "leftUpperLeg", Some(1), [0.1, -0.05, 0.0]),
    ("J_L_LowerLeg", "leftLowerLeg", Some(10), [0.0, -0.45, 0.0]),
    ("J_L_Foot", "leftFoot", Some(11), [0.0, -0.45, 0.0]),
    ("J_R_UpperLeg", "rightUpperLeg", Some(1), [-0.1, -0.05, 0.0]),
    ("J_R_LowerLeg", "rightLowerLeg", Some(13), [0.0, -0.45, 0.0]),
    ("J_R_Foot", "rightFoot", Some(14), [0.0, -0.45, 0.0]),
    ("Body", "", Some(0), [0.0, 0.0, 0.0]),
];

pub const SPINE_NODE: usize = 2;
pub const LEFT_UPPER_ARM_NODE: usize = 4;
pub const SKIN_JOINTS: usize = 8;

#[derive(Debug, Clone)]
pub struct RigFixture {
    pub vrm0: bool,
    /// Humanoid bone left out of the bone map.
    pub omitted_bone: Option<&'static str>,
    /// Joint index written into every vertex of `JOINTS_0`.
    pub joint_index: u8,
    /// Keyframe times of the spine rotation track.
    pub times: [f32; 3],
    /// Rest rotation of the left upper arm. When set the arm also gets a
    /// cubic-spline track holding that rotation, with a zero in-tangent and
    /// an out-tangent of half the rotation.
    pub arm_rotation: Option<[f32; 4]>,
}

impl Default for RigFixture {
    fn default() -> Self {
        Self {
            vrm0: false,
            omitted_bone: None,
            joint_index: 1,
            times: [0.0, 0.5, 1.0],
            arm_rotation: None,
        }
    }
}

impl RigFixture {
    pub fn build(&self) -> Vec<u8> {
        let mut builder = GlbBuilder::new();

        let positions = builder.f32_accessor(
            &[0.0, 1.0, 0.0, 0.1, 1.0, 0.0, 0.0, 1.1, 0.0],
            "VEC3",
        );
        let normals = builder.f32_accessor(
            &[0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 0.0, 0.0, 1.0],
            "VEC3",
        );
        let j = self.joint_index;
        let joints = builder.u8_accessor(&[0, j, 0, 0, 0, j, 0, 0, 0, 0, 0, 0], "VEC4");
        let weights = builder.f32_accessor(
            &[0.5, 0.5, 0.0, 0.0, 0.25, 0.75, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0],
            "VEC4",
        );
        let indices = builder.u16_accessor(&[0, 1, 2], "SCALAR");
        let identity: Vec<f32> = (0..SKIN_JOINTS)
            .flat_map(|_| {
                [
                    1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0,
                ]
            })
            .collect();
        let inverse_binds = builder.f32_accessor(&identity, "MAT4");

        let times = builder.f32_accessor(&self.times, "SCALAR");
        let rotations = builder.f32_accessor(
            &[0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0],
            "VEC4",
        );
        let translations = builder.f32_accessor(
            &[0.0, 1.0, 0.0, 0.0, 1.1, 0.0, 0.0, 1.0, 0.0],
            "VEC3",
        );

        let arm_keys = self.arm_rotation.map(|rest| {
            let half = rest.map(|component| component * 0.5);
            let key: Vec<f32> = [[0.0; 4], rest, half].concat();
            builder.f32_accessor(&key.repeat(self.times.len()), "VEC4")
        });

        let nodes: Vec<Value> = RIG
            .iter()
            .enumerate()
            .map(|(index, (name, _, _, translation))| {
                let children: Vec<usize> = RIG
                    .iter()
                    .enumerate()
                    .filter(|(_, (_, _, parent, _))| *parent == Some(index))
                    .map(|(child, _)| child)
                    .collect();
                let mut node = json!({ "name": name, "translation": translation });
                if !children.is_empty() {
                    node["children"] = json!(children);
                }
                if let (LEFT_UPPER_ARM_NODE, Some(rotation)) = (index, self.arm_rotation) {
                    node["rotation"] = json!(rotation);
                }
                if *name == "Body" {
                    node["mesh"] = json!(0);
                    node["skin"] = json!(0);
                }
                node
            })
            .collect();

        let bones = RIG
            .iter()
            .enumerate()
            .filter(|(_, (_, bone, _, _))| !bone.is_empty() && Some(*bone) != self.omitted_bone);

        let extensions = if self.vrm0 {
            let human_bones: Vec<Value> = bones
                .map(|(node, (_, bone, _, _))| json!({ "bone": bone, "node": node }))
                .collect();
            json!({
                "VRM": {
                    "specVersion": "0.0",
                    "meta": { "title": "Fixture Zero", "author": "tests", "version": "0.1" },
                    "humanoid": { "humanBones": human_bones }
                }
            })
        } else {
            let human_bones: serde_json::Map<String, Value> = bones
                .map(|(node, (_, bone, _, _))| ((*bone).to_owned(), json!({ "node": node })))
                .collect();
            json!({
                "VRMC_vrm": {
                    "specVersion": "1.0",
                    "meta": { "name": "Fixture One", "authors": ["tests"], "version": "1.0" },
                    "humanoid": { "humanBones": human_bones }
                }
            })
        };

        let extension_name = if self.vrm0 { "VRM" } else { "VRMC_vrm" };
        let skin_joints: Vec<usize> = (1..=SKIN_JOINTS).collect();
        let mut samplers = vec![
            json!({ "input": times, "output": rotations, "interpolation": "LINEAR" }),
            json!({ "input": times, "output": translations, "interpolation": "LINEAR" }),
        ];
        let mut channels = vec![
            json!({ "sampler": 0, "target": { "node": SPINE_NODE, "path": "rotation" } }),
            json!({ "sampler": 1, "target": { "node": 1, "path": "translation" } }),
        ];
        if let Some(output) = arm_keys {
            samplers.push(json!({ "input": times, "output": output, "interpolation": "CUBICSPLINE" }));
            channels.push(json!({
                "sampler": 2,
                "target": { "node": LEFT_UPPER_ARM_NODE, "path": "rotation" }
            }));
        }

        let document = json!({
            "asset": { "version": "2.0", "generator": "fixture" },
            "extensionsUsed": [extension_name],
            "scene": 0,
            "scenes": [{ "nodes": [0] }],
            "nodes": nodes,
            "skins": [{
                "joints": skin_joints,
                "inverseBindMatrices": inverse_binds,
                "skeleton": 1
            }],
            "meshes": [{
                "name": "Body",
                "primitives": [{
                    "attributes": {
                        "POSITION": positions,
                        "NORMAL": normals,
                        "JOINTS_0": joints,
                        "WEIGHTS_0": weights
                    },
                    "indices": indices,
                    "material": 0
                }]
            }],
            "materials": [{
                "name": "Skin",
                "pbrMetallicRoughness": { "baseColorFactor": [1.0, 0.8, 0.7, 1.0] }
            }],
            "animations": [{
                "name": "Idle",
                "samplers": samplers,
                "channels": channels
            }],
            "extensions": extensions
        });

        builder.finish(document)
    }
}
