use serde::Serialize;

use crate::{
    accessor::{read_colors, read_indices, read_joints, read_uvs, read_vec3, read_vec4, read_weights},
    coords::CoordinateConversion,
    diagnostic::{DiagnosticCode, Diagnostics, EntityRef},
    document::{
        AssetDocument,
        schema::{
            AttributeMap, MODE_TRIANGLE_FAN, MODE_TRIANGLE_STRIP, MODE_TRIANGLES,
            PrimitiveDescriptor,
        },
    },
    error::ImportError,
};

const WEIGHT_TOLERANCE: f32 = 1e-3;

/// Four joint influences per vertex. Joint values index the skin's joint list.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkinWeights {
    pub joints: Vec<[u16; 4]>,
    pub weights: Vec<[f32; 4]>,
}

/// Per-vertex deltas of one morph target.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MorphTarget {
    pub name: Option<String>,
    pub positions: Vec<[f32; 3]>,
    pub normals: Option<Vec<[f32; 3]>>,
    pub tangents: Option<Vec<[f32; 3]>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Primitive {
    pub positions: Vec<[f32; 3]>,
    pub normals: Option<Vec<[f32; 3]>>,
    pub tangents: Option<Vec<[f32; 4]>>,
    /// `TEXCOORD_0`, `TEXCOORD_1`, ... in set order.
    pub uv_sets: Vec<Vec<[f32; 2]>>,
    pub colors: Option<Vec<[f32; 4]>>,
    pub skin: Option<SkinWeights>,
    /// Triangle list.
    pub indices: Vec<u32>,
    pub material: Option<usize>,
    pub targets: Vec<MorphTarget>,
}

impl Primitive {
    pub fn has_skin_data(&self) -> bool {
        self.skin.is_some()
    }

    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MeshAsset {
    pub name: Option<String>,
    pub primitives: Vec<Primitive>,
    pub target_names: Vec<String>,
    /// Default morph weights.
    pub weights: Vec<f32>,
}

impl MeshAsset {
    pub fn vertex_count(&self) -> usize {
        self.primitives.iter().map(Primitive::vertex_count).sum()
    }

    pub fn triangle_count(&self) -> usize {
        self.primitives.iter().map(Primitive::triangle_count).sum()
    }
}

fn expect_len<T>(
    values: Vec<T>,
    expected: usize,
    accessor: usize,
    semantic: &str,
) -> Result<Vec<T>, ImportError> {
    if values.len() != expected {
        return Err(ImportError::accessor(
            EntityRef::Accessor(accessor),
            format!("{semantic} has {} elements, POSITION has {expected}", values.len()),
        ));
    }
    Ok(values)
}

/// Expand strip and fan topologies into an explicit triangle list.
fn triangulate(indices: &[u32], mode: u32) -> Vec<u32> {
    match mode {
        MODE_TRIANGLE_STRIP => (0..indices.len().saturating_sub(2))
            .flat_map(|i| {
                if i % 2 == 0 {
                    [indices[i], indices[i + 1], indices[i + 2]]
                } else {
                    [indices[i + 1], indices[i], indices[i + 2]]
                }
            })
            .collect(),
        MODE_TRIANGLE_FAN => (1..indices.len().saturating_sub(1))
            .flat_map(|i| [indices[0], indices[i], indices[i + 1]])
            .collect(),
        _ => indices[..indices.len() - indices.len() % 3].to_vec(),
    }
}

/// Merge every `JOINTS_n`/`WEIGHTS_n` set, keeping the four heaviest
/// influences per vertex.
/// An unpaired set ends the merge with an `UnpairedSkinAttribute` warning.
fn read_skin(
    document: &AssetDocument<'_>,
    attributes: &AttributeMap,
    vertex_count: usize,
    entity: &EntityRef,
    diagnostics: &mut Diagnostics,
) -> Result<Option<SkinWeights>, ImportError> {
    let mut sets = Vec::new();
    for set in 0.. {
        let (joints, weights) = match (
            attributes.get(&format!("JOINTS_{set}")),
            attributes.get(&format!("WEIGHTS_{set}")),
        ) {
            (Some(&joints), Some(&weights)) => (joints, weights),
            (None, None) => break,
            (joints, _) => {
                let (present, missing) = if joints.is_some() {
                    ("JOINTS", "WEIGHTS")
                } else {
                    ("WEIGHTS", "JOINTS")
                };
                diagnostics.warn(
                    DiagnosticCode::UnpairedSkinAttribute,
                    entity.clone(),
                    format!(
                        "{present}_{set} has no matching {missing}_{set}; \
                         skin sets from {set} on are ignored"
                    ),
                );
                break;
            }
        };
        sets.push((
            expect_len(read_joints(document, joints)?, vertex_count, joints, "JOINTS")?,
            expect_len(read_weights(document, weights)?, vertex_count, weights, "WEIGHTS")?,
        ));
    }
    match sets.len() {
        0 => Ok(None),
        1 => {
            let (joints, weights) = sets.remove(0);
            Ok(Some(SkinWeights { joints, weights }))
        }
        _ => {
            let mut merged = SkinWeights {
                joints: Vec::with_capacity(vertex_count),
                weights: Vec::with_capacity(vertex_count),
            };
            for vertex in 0..vertex_count {
                let mut influences: Vec<(u16, f32)> = sets
                    .iter()
                    .flat_map(|(joints, weights)| joints[vertex].into_iter().zip(weights[vertex]))
                    .collect();
                influences.sort_by(|a, b| b.1.total_cmp(&a.1));
                let mut joints = [0; 4];
                let mut weights = [0.0; 4];
                for (slot, (joint, weight)) in influences.into_iter().take(4).enumerate() {
                    joints[slot] = joint;
                    weights[slot] = weight;
                }
                merged.joints.push(joints);
                merged.weights.push(weights);
            }
            Ok(Some(merged))
        }
    }
}

/// Rescale weights to sum to one; returns the number of all-zero vertices.
fn normalize_weights(weights: &mut [[f32; 4]]) -> usize {
    let mut zero = 0;
    for vertex in weights {
        let sum: f32 = vertex.iter().sum();
        if sum <= 0.0 {
            zero += 1;
        } else if (sum - 1.0).abs() > WEIGHT_TOLERANCE {
            for weight in vertex.iter_mut() {
                *weight /= sum;
            }
        }
    }
    zero
}

fn read_targets(
    document: &AssetDocument<'_>,
    primitive: &PrimitiveDescriptor,
    names: &[String],
    vertex_count: usize,
    conversion: &CoordinateConversion,
) -> Result<Vec<MorphTarget>, ImportError> {
    let mut targets = Vec::with_capacity(primitive.targets.len());
    for (index, target) in primitive.targets.iter().enumerate() {
        let deltas = |semantic: &str, scale: bool| -> Result<Option<Vec<[f32; 3]>>, ImportError> {
            let Some(&accessor) = target.get(semantic) else {
                return Ok(None);
            };
            let values = expect_len(read_vec3(document, accessor)?, vertex_count, accessor, semantic)?;
            Ok(Some(
                values
                    .into_iter()
                    .map(|delta| {
                        if scale {
                            conversion.point(delta)
                        } else {
                            conversion.normal(delta)
                        }
                    })
                    .collect(),
            ))
        };
        targets.push(MorphTarget {
            name: names.get(index).cloned(),
            positions: deltas("POSITION", true)?.unwrap_or_else(|| vec![[0.0; 3]; vertex_count]),
            normals: deltas("NORMAL", false)?,
            tangents: deltas("TANGENT", false)?,
        });
    }
    Ok(targets)
}

fn assemble_primitive(
    document: &AssetDocument<'_>,
    mesh_index: usize,
    primitive_index: usize,
    names: &[String],
    conversion: &CoordinateConversion,
    diagnostics: &mut Diagnostics,
) -> Result<Option<Primitive>, ImportError> {
    let descriptor = &document.meshes[mesh_index].primitives[primitive_index];
    let entity = EntityRef::Primitive {
        mesh: mesh_index,
        primitive: primitive_index,
    };

    if !matches!(
        descriptor.mode,
        MODE_TRIANGLES | MODE_TRIANGLE_STRIP | MODE_TRIANGLE_FAN
    ) {
        diagnostics.warn(
            DiagnosticCode::SkippedPrimitive,
            entity,
            format!("topology mode {} is not triangles", descriptor.mode),
        );
        return Ok(None);
    }
    let Some(&position_accessor) = descriptor.attributes.get("POSITION") else {
        diagnostics.warn(DiagnosticCode::SkippedPrimitive, entity, "no POSITION attribute");
        return Ok(None);
    };

    let positions: Vec<[f32; 3]> = read_vec3(document, position_accessor)?
        .into_iter()
        .map(|position| conversion.point(position))
        .collect();
    let vertex_count = positions.len();

    let normals = match descriptor.attributes.get("NORMAL") {
        Some(&accessor) => Some(
            expect_len(read_vec3(document, accessor)?, vertex_count, accessor, "NORMAL")?
                .into_iter()
                .map(|normal| conversion.normal(normal))
                .collect(),
        ),
        None => None,
    };
    let tangents = match descriptor.attributes.get("TANGENT") {
        Some(&accessor) => Some(
            expect_len(read_vec4(document, accessor)?, vertex_count, accessor, "TANGENT")?
                .into_iter()
                .map(|tangent| conversion.tangent(tangent))
                .collect(),
        ),
        None => None,
    };

    let mut uv_sets = Vec::new();
    while let Some(&accessor) = descriptor
        .attributes
        .get(&format!("TEXCOORD_{}", uv_sets.len()))
    {
        uv_sets.push(expect_len(read_uvs(document, accessor)?, vertex_count, accessor, "TEXCOORD")?);
    }

    let colors = match descriptor.attributes.get("COLOR_0") {
        Some(&accessor) => Some(expect_len(
            read_colors(document, accessor)?,
            vertex_count,
            accessor,
            "COLOR_0",
        )?),
        None => None,
    };

    let mut skin = read_skin(
        document,
        &descriptor.attributes,
        vertex_count,
        &entity,
        diagnostics,
    )?;
    if let Some(skin) = skin.as_mut() {
        let zero = normalize_weights(&mut skin.weights);
        if zero > 0 {
            diagnostics.warn(
                DiagnosticCode::ZeroSkinWeights,
                entity,
                format!("{zero} of {vertex_count} vertices have no joint influence"),
            );
        }
    }

    let source_indices = match descriptor.indices {
        Some(accessor) => read_indices(document, accessor)?,
        None => (0..vertex_count as u32).collect(),
    };
    if let Some(&bad) = source_indices.iter().find(|&&index| index as usize >= vertex_count) {
        return Err(ImportError::accessor(
            EntityRef::Accessor(descriptor.indices.unwrap_or(position_accessor)),
            format!("index {bad} exceeds vertex count {vertex_count}"),
        ));
    }
    let mut indices = triangulate(&source_indices, descriptor.mode);
    if conversion.mirrors() {
        for triangle in indices.chunks_exact_mut(3) {
            triangle.swap(1, 2);
        }
    }

    Ok(Some(Primitive {
        targets: read_targets(document, descriptor, names, vertex_count, conversion)?,
        positions,
        normals,
        tangents,
        uv_sets,
        colors,
        skin,
        indices,
        material: descriptor.material,
    }))
}

/// Read every mesh into converted, renderer-ready arrays.
///
/// # Errors
///
/// `InvalidAccessor` when attribute data is inconsistent, `UnavailableBuffer`
/// when it lives outside the container.
pub fn assemble_meshes(
    document: &AssetDocument<'_>,
    conversion: &CoordinateConversion,
    diagnostics: &mut Diagnostics,
) -> Result<Vec<MeshAsset>, ImportError> {
    let mut meshes = Vec::with_capacity(document.meshes.len());
    for (mesh_index, mesh) in document.meshes.iter().enumerate() {
        let target_names = mesh.target_names();
        let mut primitives = Vec::with_capacity(mesh.primitives.len());
        for primitive_index in 0..mesh.primitives.len() {
            if let Some(primitive) = assemble_primitive(
                document,
                mesh_index,
                primitive_index,
                &target_names,
                conversion,
                diagnostics,
            )? {
                primitives.push(primitive);
            }
        }
        meshes.push(MeshAsset {
            name: mesh.name.clone(),
            primitives,
            target_names,
            weights: mesh.weights.clone(),
        });
    }
    log::debug!(
        "assembled {} meshes, {} vertices",
        meshes.len(),
        meshes.iter().map(MeshAsset::vertex_count).sum::<usize>()
    );
    Ok(meshes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        document::{test_support::parse_json_with, vrm::VrmVersion},
        settings::{CoordinateSettings, Handedness, UpAxis},
    };
    use serde_json::{Value, json};

    fn bytes(floats: &[f32], shorts: &[u16]) -> &'static [u8] {
        let mut out: Vec<u8> = floats.iter().flat_map(|value| value.to_le_bytes()).collect();
        out.extend(shorts.iter().flat_map(|value| value.to_le_bytes()));
        Box::leak(out.into_boxed_slice())
    }

    const TRIANGLE: [f32; 9] = [0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0];

    fn triangle_document(primitive: Value, extra_accessors: Value, bin: &'static [u8]) -> Value {
        let mut accessors = vec![json!({
            "bufferView": 0, "componentType": 5126, "count": 3, "type": "VEC3"
        })];
        accessors.extend(extra_accessors.as_array().cloned().unwrap_or_default());
        json!({
            "asset": { "version": "2.0" },
            "buffers": [{ "byteLength": bin.len() }],
            "bufferViews": [{ "buffer": 0, "byteLength": bin.len() }],
            "accessors": accessors,
            "meshes": [{ "primitives": [primitive] }]
        })
    }

    fn assemble(json: Value, bin: &'static [u8], conversion: &CoordinateConversion) -> (Vec<MeshAsset>, Diagnostics) {
        let mut diagnostics = Diagnostics::new();
        let document = parse_json_with(json, bin, &mut diagnostics).expect("parse document");
        let meshes = assemble_meshes(&document, conversion, &mut diagnostics).expect("assemble");
        (meshes, diagnostics)
    }

    #[test]
    fn given_non_indexed_triangle_when_assembling_then_sequential_indices_are_generated() {
        let bin = bytes(&TRIANGLE, &[]);
        let (meshes, _) = assemble(
            triangle_document(json!({ "attributes": { "POSITION": 0 } }), json!([]), bin),
            bin,
            &CoordinateConversion::identity(),
        );

        let primitive = &meshes[0].primitives[0];
        assert_eq!(primitive.indices, vec![0, 1, 2]);
        assert!(!primitive.has_skin_data());
        assert_eq!(meshes[0].triangle_count(), 1);
    }

    #[test]
    fn given_mirroring_conversion_when_assembling_then_winding_is_reversed_and_positions_scaled() {
        let bin = bytes(&TRIANGLE, &[]);
        let conversion = CoordinateConversion::new(
            &CoordinateSettings {
                up_axis: UpAxis::Z,
                handedness: Handedness::Left,
                unit_scale: 100.0,
                face_forward_vrm0: false,
            },
            VrmVersion::V1,
        );

        let (meshes, _) = assemble(
            triangle_document(json!({ "attributes": { "POSITION": 0 } }), json!([]), bin),
            bin,
            &conversion,
        );

        let primitive = &meshes[0].primitives[0];
        assert_eq!(primitive.indices, vec![0, 2, 1]);
        assert_eq!(primitive.positions[2], [0.0, 0.0, 100.0]);
    }

    #[test]
    fn given_triangle_strip_when_triangulating_then_alternate_triangles_keep_winding() {
        assert_eq!(
            triangulate(&[0, 1, 2, 3], MODE_TRIANGLE_STRIP),
            vec![0, 1, 2, 2, 1, 3]
        );
        assert_eq!(
            triangulate(&[0, 1, 2, 3], MODE_TRIANGLE_FAN),
            vec![0, 1, 2, 0, 2, 3]
        );
    }

    #[test]
    fn given_line_primitive_when_assembling_then_it_is_skipped_with_warning() {
        let bin = bytes(&TRIANGLE, &[]);
        let (meshes, diagnostics) = assemble(
            triangle_document(json!({ "attributes": { "POSITION": 0 }, "mode": 1 }), json!([]), bin),
            bin,
            &CoordinateConversion::identity(),
        );

        assert!(meshes[0].primitives.is_empty());
        assert!(diagnostics.contains(DiagnosticCode::SkippedPrimitive));
    }

    #[test]
    fn given_unnormalized_and_zero_weights_when_assembling_then_weights_are_fixed_and_reported() {
        let mut floats = TRIANGLE.to_vec();
        floats.extend([0.5, 0.5, 0.5, 0.5, 1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]);
        let bin = bytes(&floats, &[0; 12]);
        let json = json!({
            "asset": { "version": "2.0" },
            "buffers": [{ "byteLength": bin.len() }],
            "bufferViews": [
                { "buffer": 0, "byteLength": 36 },
                { "buffer": 0, "byteOffset": 36, "byteLength": 48 },
                { "buffer": 0, "byteOffset": 84, "byteLength": 24 }
            ],
            "accessors": [
                { "bufferView": 0, "componentType": 5126, "count": 3, "type": "VEC3" },
                { "bufferView": 1, "componentType": 5126, "count": 3, "type": "VEC4" },
                { "bufferView": 2, "componentType": 5123, "count": 3, "type": "VEC4" }
            ],
            "nodes": [{ "mesh": 0, "skin": 0 }, {}],
            "skins": [{ "joints": [1] }],
            "meshes": [{ "primitives": [{
                "attributes": { "POSITION": 0, "WEIGHTS_0": 1, "JOINTS_0": 2 }
            }] }]
        });

        let (meshes, diagnostics) = assemble(json, bin, &CoordinateConversion::identity());

        let skin = meshes[0].primitives[0].skin.as_ref().expect("skin data");
        assert_eq!(skin.weights[0], [0.25; 4]);
        assert_eq!(skin.weights[1], [1.0, 0.0, 0.0, 0.0]);
        assert_eq!(skin.weights[2], [0.0; 4]);
        assert!(diagnostics.contains(DiagnosticCode::ZeroSkinWeights));
    }

    #[test]
    fn given_joints_without_weights_when_assembling_then_skin_is_dropped_with_warning() {
        let bin = bytes(&TRIANGLE, &[0, 1, 0, 0, 0, 1, 0, 0, 0, 0, 0, 0]);
        let (meshes, diagnostics) = assemble(
            triangle_document(
                json!({ "attributes": { "POSITION": 0, "JOINTS_0": 1 } }),
                json!([{ "bufferView": 0, "byteOffset": 36, "componentType": 5123, "count": 3, "type": "VEC4" }]),
                bin,
            ),
            bin,
            &CoordinateConversion::identity(),
        );

        assert!(!meshes[0].primitives[0].has_skin_data());
        let entry = diagnostics
            .entries()
            .iter()
            .find(|entry| entry.code == DiagnosticCode::UnpairedSkinAttribute)
            .expect("unpaired warning");
        assert_eq!(entry.entity, EntityRef::Primitive { mesh: 0, primitive: 0 });
        assert!(entry.message.contains("WEIGHTS_0"));
    }

    #[test]
    fn given_named_morph_target_when_assembling_then_deltas_and_name_are_kept() {
        let mut floats = TRIANGLE.to_vec();
        floats.extend([0.0, 0.1, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]);
        let bin = bytes(&floats, &[]);
        let json = json!({
            "asset": { "version": "2.0" },
            "buffers": [{ "byteLength": bin.len() }],
            "bufferViews": [
                { "buffer": 0, "byteLength": 36 },
                { "buffer": 0, "byteOffset": 36, "byteLength": 36 }
            ],
            "accessors": [
                { "bufferView": 0, "componentType": 5126, "count": 3, "type": "VEC3" },
                { "bufferView": 1, "componentType": 5126, "count": 3, "type": "VEC3" }
            ],
            "meshes": [{
                "primitives": [{ "attributes": { "POSITION": 0 }, "targets": [{ "POSITION": 1 }] }],
                "weights": [0.0],
                "extras": { "targetNames": ["blink"] }
            }]
        });

        let (meshes, _) = assemble(json, bin, &CoordinateConversion::identity());

        let target = &meshes[0].primitives[0].targets[0];
        assert_eq!(target.name.as_deref(), Some("blink"));
        assert_eq!(target.positions[0], [0.0, 0.1, 0.0]);
        assert!(target.normals.is_none());
        assert_eq!(meshes[0].target_names, vec!["blink"]);
    }

    #[test]
    fn given_index_past_vertex_count_when_assembling_then_accessor_is_invalid() {
        let bin = bytes(&TRIANGLE, &[0, 1, 7]);
        let json = triangle_document(
            json!({ "attributes": { "POSITION": 0 }, "indices": 1 }),
            json!([{ "bufferView": 0, "byteOffset": 36, "componentType": 5123, "count": 3, "type": "SCALAR" }]),
            bin,
        );
        let mut diagnostics = Diagnostics::new();
        let document = parse_json_with(json, bin, &mut diagnostics).expect("parse document");

        let error = assemble_meshes(&document, &CoordinateConversion::identity(), &mut diagnostics)
            .expect_err("bad index");

        assert!(matches!(error, ImportError::InvalidAccessor { .. }));
    }
}
