//! Typed decoding of the VRM root extensions (`VRM`, `VRMC_vrm`,
//! `VRMC_vrm_animation`).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;

use crate::{
    diagnostic::{DiagnosticCode, Diagnostics, EntityRef},
    document::schema::Extensions,
    error::ImportError,
    humanoid::{HumanBone, HumanoidBoneMap},
    scene::NodeId,
};

pub const EXT_VRM0: &str = "VRM";
pub const EXT_VRM1: &str = "VRMC_vrm";
pub const EXT_VRM_ANIMATION: &str = "VRMC_vrm_animation";

/// Which VRM flavour a document carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum VrmVersion {
    /// Plain glTF without a VRM extension.
    #[default]
    None,
    V0,
    V1,
    /// A VRM animation (`.vrma`) file.
    Animation,
}

impl VrmVersion {
    pub fn label(self) -> &'static str {
        match self {
            VrmVersion::None => "glTF",
            VrmVersion::V0 => "VRM 0.x",
            VrmVersion::V1 => "VRM 1.0",
            VrmVersion::Animation => "VRMA",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct VrmMeta {
    pub version: VrmVersion,
    pub spec_version: Option<String>,
    pub name: Option<String>,
    pub authors: Vec<String>,
    pub model_version: Option<String>,
    pub license: Option<String>,
}

/// Morph target driven by an expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BindTarget {
    /// VRM 0.x binds address meshes directly.
    Mesh(usize),
    /// VRM 1.0 binds address the node instancing the mesh.
    Node(usize),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExpressionBind {
    pub target: BindTarget,
    pub morph_index: usize,
    /// Normalized to `0..=1`.
    pub weight: f32,
}

/// A facial expression (VRM 1.0) or blend-shape group (VRM 0.x).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Expression {
    pub name: String,
    /// Preset name such as `happy` or `blink`; `None` for custom expressions.
    pub preset: Option<String>,
    pub binds: Vec<ExpressionBind>,
    pub is_binary: bool,
}

/// VRM 0.x `materialProperties` entry.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Vrm0MaterialProperties {
    pub name: String,
    pub shader: String,
    pub render_queue: Option<i32>,
    pub float_properties: BTreeMap<String, f32>,
    pub vector_properties: BTreeMap<String, Vec<f32>>,
    pub texture_properties: BTreeMap<String, usize>,
    pub keyword_map: BTreeMap<String, bool>,
    pub tag_map: BTreeMap<String, String>,
}

/// Everything decoded from the VRM root extensions.
#[derive(Debug, Clone, Default)]
pub struct VrmExtension {
    pub meta: VrmMeta,
    /// `None` when the document has no humanoid section.
    pub humanoid: Option<HumanoidBoneMap>,
    pub expressions: Vec<Expression>,
    pub material_properties: Vec<Vrm0MaterialProperties>,
}

// ─── VRM 0.x ──────────────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct Vrm0Root {
    spec_version: Option<String>,
    meta: Option<Vrm0Meta>,
    humanoid: Option<Vrm0Humanoid>,
    blend_shape_master: Option<Vrm0BlendShapeMaster>,
    material_properties: Vec<Vrm0MaterialProperties>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct Vrm0Meta {
    title: Option<String>,
    author: Option<String>,
    version: Option<String>,
    license_name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct Vrm0Humanoid {
    human_bones: Vec<Vrm0HumanBone>,
}

#[derive(Debug, Deserialize)]
struct Vrm0HumanBone {
    bone: String,
    node: usize,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct Vrm0BlendShapeMaster {
    blend_shape_groups: Vec<Vrm0BlendShapeGroup>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct Vrm0BlendShapeGroup {
    name: String,
    preset_name: Option<String>,
    binds: Vec<Vrm0Bind>,
    is_binary: bool,
}

#[derive(Debug, Deserialize)]
struct Vrm0Bind {
    mesh: usize,
    index: usize,
    /// Percent, `0..=100`.
    #[serde(default)]
    weight: f32,
}

// ─── VRM 1.0 / VRMA ───────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct Vrm1Root {
    spec_version: Option<String>,
    meta: Option<Vrm1Meta>,
    humanoid: Option<Vrm1Humanoid>,
    expressions: Option<Vrm1Expressions>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct Vrm1Meta {
    name: Option<String>,
    version: Option<String>,
    authors: Vec<String>,
    license_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct Vrm1Humanoid {
    human_bones: BTreeMap<String, Vrm1HumanBone>,
}

#[derive(Debug, Deserialize)]
struct Vrm1HumanBone {
    node: usize,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Vrm1Expressions {
    preset: BTreeMap<String, Vrm1Expression>,
    custom: BTreeMap<String, Vrm1Expression>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct Vrm1Expression {
    morph_target_binds: Vec<Vrm1Bind>,
    is_binary: bool,
}

#[derive(Debug, Deserialize)]
struct Vrm1Bind {
    node: usize,
    index: usize,
    #[serde(default)]
    weight: f32,
}

fn decode<T: DeserializeOwned>(name: &str, value: &Value) -> Result<T, ImportError> {
    serde_json::from_value(value.clone()).map_err(|error| ImportError::InvalidDocument {
        reason: format!("extension {name}: {error}"),
    })
}

/// Decode the VRM extensions found in the root `extensions` object.
///
/// `VRMC_vrm` wins over `VRM` when a file carries both.
pub fn decode_vrm_extensions(
    extensions: &Extensions,
    diagnostics: &mut Diagnostics,
) -> Result<VrmExtension, ImportError> {
    if let Some(value) = extensions.get(EXT_VRM1) {
        let root: Vrm1Root = decode(EXT_VRM1, value)?;
        return Ok(decode_vrm1(root, VrmVersion::V1, diagnostics));
    }
    if let Some(value) = extensions.get(EXT_VRM0) {
        let root: Vrm0Root = decode(EXT_VRM0, value)?;
        return Ok(decode_vrm0(root, diagnostics));
    }
    if let Some(value) = extensions.get(EXT_VRM_ANIMATION) {
        let root: Vrm1Root = decode(EXT_VRM_ANIMATION, value)?;
        return Ok(decode_vrm1(root, VrmVersion::Animation, diagnostics));
    }
    Ok(VrmExtension::default())
}

fn map_bone(
    map: &mut HumanoidBoneMap,
    name: &str,
    bone: Option<HumanBone>,
    node: usize,
    diagnostics: &mut Diagnostics,
) {
    let Some(bone) = bone else {
        diagnostics.warn(
            DiagnosticCode::UnknownHumanBone,
            EntityRef::HumanBoneName(name.to_string()),
            format!("ignoring unrecognized humanoid bone '{name}' on node {node}"),
        );
        return;
    };
    if !map.insert(bone, NodeId(node)) {
        diagnostics.warn(
            DiagnosticCode::DuplicateHumanBone,
            EntityRef::HumanBone(bone),
            format!("bone listed more than once; keeping the first node, ignoring node {node}"),
        );
    }
}

fn decode_vrm0(root: Vrm0Root, diagnostics: &mut Diagnostics) -> VrmExtension {
    let meta = root.meta.unwrap_or_default();
    let humanoid = root.humanoid.map(|humanoid| {
        let mut map = HumanoidBoneMap::new();
        for entry in &humanoid.human_bones {
            let bone = HumanBone::from_vrm0_name(&entry.bone);
            map_bone(&mut map, &entry.bone, bone, entry.node, diagnostics);
        }
        map
    });

    let expressions = root
        .blend_shape_master
        .map(|master| {
            master
                .blend_shape_groups
                .into_iter()
                .map(|group| Expression {
                    preset: group
                        .preset_name
                        .filter(|preset| !preset.is_empty() && preset != "unknown"),
                    name: group.name,
                    binds: group
                        .binds
                        .into_iter()
                        .map(|bind| ExpressionBind {
                            target: BindTarget::Mesh(bind.mesh),
                            morph_index: bind.index,
                            weight: (bind.weight / 100.0).clamp(0.0, 1.0),
                        })
                        .collect(),
                    is_binary: group.is_binary,
                })
                .collect()
        })
        .unwrap_or_default();

    VrmExtension {
        meta: VrmMeta {
            version: VrmVersion::V0,
            spec_version: root.spec_version,
            name: meta.title,
            authors: meta.author.into_iter().collect(),
            model_version: meta.version,
            license: meta.license_name,
        },
        humanoid,
        expressions,
        material_properties: root.material_properties,
    }
}

fn decode_vrm1(root: Vrm1Root, version: VrmVersion, diagnostics: &mut Diagnostics) -> VrmExtension {
    let meta = root.meta.unwrap_or_default();
    let humanoid = root.humanoid.map(|humanoid| {
        let mut map = HumanoidBoneMap::new();
        for (name, entry) in &humanoid.human_bones {
            map_bone(&mut map, name, HumanBone::from_name(name), entry.node, diagnostics);
        }
        map
    });

    let mut expressions = Vec::new();
    if let Some(table) = root.expressions {
        let presets = table.preset.into_iter().map(|(name, e)| (name, true, e));
        let custom = table.custom.into_iter().map(|(name, e)| (name, false, e));
        for (name, is_preset, expression) in presets.chain(custom) {
            expressions.push(Expression {
                preset: is_preset.then(|| name.clone()),
                name,
                binds: expression
                    .morph_target_binds
                    .into_iter()
                    .map(|bind| ExpressionBind {
                        target: BindTarget::Node(bind.node),
                        morph_index: bind.index,
                        weight: bind.weight.clamp(0.0, 1.0),
                    })
                    .collect(),
                is_binary: expression.is_binary,
            });
        }
    }

    VrmExtension {
        meta: VrmMeta {
            version,
            spec_version: root.spec_version,
            name: meta.name,
            authors: meta.authors,
            model_version: meta.version,
            license: meta.license_url,
        },
        humanoid,
        expressions,
        material_properties: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn extensions(value: Value) -> Extensions {
        match value {
            Value::Object(map) => map,
            _ => panic!("extensions must be an object"),
        }
    }

    #[test]
    fn given_vrm0_humanoid_when_decoding_then_bones_and_meta_are_mapped() {
        let ext = extensions(json!({
            "VRM": {
                "specVersion": "0.0",
                "meta": { "title": "Alicia", "author": "Dwango" },
                "humanoid": { "humanBones": [
                    { "bone": "hips", "node": 1 },
                    { "bone": "leftThumbProximal", "node": 7 }
                ]}
            }
        }));
        let mut diagnostics = Diagnostics::new();

        let vrm = decode_vrm_extensions(&ext, &mut diagnostics).expect("decode");

        let humanoid = vrm.humanoid.expect("humanoid");
        assert_eq!(humanoid.get(HumanBone::Hips), Some(NodeId(1)));
        assert_eq!(humanoid.get(HumanBone::LeftThumbMetacarpal), Some(NodeId(7)));
        assert_eq!(vrm.meta.version, VrmVersion::V0);
        assert_eq!(vrm.meta.name.as_deref(), Some("Alicia"));
        assert_eq!(vrm.meta.authors, vec!["Dwango"]);
        assert!(diagnostics.is_empty());
    }

    #[test]
    fn given_unknown_and_duplicate_bones_when_decoding_then_warnings_are_recorded() {
        let ext = extensions(json!({
            "VRM": { "humanoid": { "humanBones": [
                { "bone": "hips", "node": 1 },
                { "bone": "tail", "node": 2 },
                { "bone": "Hips", "node": 3 }
            ]}}
        }));
        let mut diagnostics = Diagnostics::new();

        let vrm = decode_vrm_extensions(&ext, &mut diagnostics).expect("decode");

        assert_eq!(vrm.humanoid.expect("humanoid").get(HumanBone::Hips), Some(NodeId(1)));
        assert!(diagnostics.contains(DiagnosticCode::UnknownHumanBone));
        assert!(diagnostics.contains(DiagnosticCode::DuplicateHumanBone));
    }

    #[test]
    fn given_vrm1_expressions_when_decoding_then_presets_and_custom_are_listed() {
        let ext = extensions(json!({
            "VRMC_vrm": {
                "specVersion": "1.0",
                "meta": { "name": "Avatar", "authors": ["a", "b"] },
                "humanoid": { "humanBones": { "hips": { "node": 0 } } },
                "expressions": {
                    "preset": { "happy": { "morphTargetBinds": [{ "node": 4, "index": 2, "weight": 1.0 }] } },
                    "custom": { "wink": { "isBinary": true } }
                }
            }
        }));

        let vrm = decode_vrm_extensions(&ext, &mut Diagnostics::new()).expect("decode");

        assert_eq!(vrm.meta.version, VrmVersion::V1);
        assert_eq!(vrm.expressions.len(), 2);
        assert_eq!(vrm.expressions[0].preset.as_deref(), Some("happy"));
        assert_eq!(vrm.expressions[0].binds[0].target, BindTarget::Node(4));
        assert_eq!(vrm.expressions[1].preset, None);
        assert!(vrm.expressions[1].is_binary);
    }

    #[test]
    fn given_vrm0_bind_weight_in_percent_when_decoding_then_weight_is_normalized() {
        let ext = extensions(json!({
            "VRM": { "blendShapeMaster": { "blendShapeGroups": [
                { "name": "A", "presetName": "a", "binds": [{ "mesh": 0, "index": 1, "weight": 50 }] }
            ]}}
        }));

        let vrm = decode_vrm_extensions(&ext, &mut Diagnostics::new()).expect("decode");

        assert!((vrm.expressions[0].binds[0].weight - 0.5).abs() < 1e-6);
        assert_eq!(vrm.expressions[0].binds[0].target, BindTarget::Mesh(0));
    }

    #[test]
    fn given_vrma_extension_when_decoding_then_animation_version_is_reported() {
        let ext = extensions(json!({
            "VRMC_vrm_animation": { "humanoid": { "humanBones": { "hips": { "node": 0 } } } }
        }));

        let vrm = decode_vrm_extensions(&ext, &mut Diagnostics::new()).expect("decode");

        assert_eq!(vrm.meta.version, VrmVersion::Animation);
        assert!(vrm.humanoid.is_some());
    }

    #[test]
    fn given_malformed_humanoid_when_decoding_then_document_is_invalid() {
        let ext = extensions(json!({ "VRM": { "humanoid": { "humanBones": [{ "bone": 3 }] } } }));

        let error = decode_vrm_extensions(&ext, &mut Diagnostics::new()).expect_err("invalid");

        assert!(matches!(error, ImportError::InvalidDocument { .. }));
    }
}
