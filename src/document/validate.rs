//! Whole-document reference and range checks, run once at parse time so the
//! later stages can index descriptor tables without re-checking.

use std::collections::BTreeSet;

use serde_json::Value;

use crate::{
    accessor::{check_accessor, read_accessor},
    diagnostic::EntityRef,
    document::{
        AssetDocument,
        schema::{Extensions, TextureInfo},
        vrm::BindTarget,
    },
    error::ImportError,
};

fn check_index(
    referrer: &EntityRef,
    target: &'static str,
    index: usize,
    len: usize,
) -> Result<(), ImportError> {
    if index < len {
        Ok(())
    } else {
        Err(ImportError::dangling(referrer.clone(), target, index, len))
    }
}

fn check_optional(
    referrer: &EntityRef,
    target: &'static str,
    index: Option<usize>,
    len: usize,
) -> Result<(), ImportError> {
    index.map_or(Ok(()), |index| check_index(referrer, target, index, len))
}

/// Run every structural check over a freshly decoded document.
///
/// # Errors
///
/// The first `DanglingReference`, `InvalidAccessor` or `UnavailableBuffer`
/// found, in table order.
pub fn validate_document(document: &AssetDocument<'_>) -> Result<(), ImportError> {
    check_buffer_views(document)?;
    check_accessors(document)?;
    check_scenes(document)?;
    check_nodes(document)?;
    check_meshes(document)?;
    check_materials(document)?;
    check_textures(document)?;
    check_images(document)?;
    check_skins(document)?;
    check_animations(document)?;
    check_vrm(document)?;
    check_skin_joint_indices(document)?;
    Ok(())
}

fn check_buffer_views(document: &AssetDocument<'_>) -> Result<(), ImportError> {
    for (index, view) in document.buffer_views.iter().enumerate() {
        let referrer = EntityRef::BufferView(index);
        check_index(&referrer, "buffer", view.buffer, document.buffers.len())?;
        if let Ok(buffer) = document.buffer_data.get(view.buffer) {
            let in_bounds = view
                .byte_offset
                .checked_add(view.byte_length)
                .is_some_and(|end| end <= buffer.len());
            if !in_bounds {
                return Err(ImportError::accessor(
                    referrer,
                    format!(
                        "view range {}+{} exceeds buffer {} of {} bytes",
                        view.byte_offset,
                        view.byte_length,
                        view.buffer,
                        buffer.len()
                    ),
                ));
            }
        }
    }
    Ok(())
}

fn check_accessors(document: &AssetDocument<'_>) -> Result<(), ImportError> {
    for (index, accessor) in document.accessors.iter().enumerate() {
        let referrer = EntityRef::Accessor(index);
        let views = document.buffer_views.len();
        check_optional(&referrer, "buffer view", accessor.buffer_view, views)?;
        if let Some(sparse) = &accessor.sparse {
            check_index(&referrer, "buffer view", sparse.indices.buffer_view, views)?;
            check_index(&referrer, "buffer view", sparse.values.buffer_view, views)?;
        }
        check_accessor(document, index)?;
    }
    Ok(())
}

fn check_scenes(document: &AssetDocument<'_>) -> Result<(), ImportError> {
    check_optional(
        &EntityRef::Document,
        "scene",
        document.default_scene,
        document.scenes.len(),
    )?;
    for (index, scene) in document.scenes.iter().enumerate() {
        let referrer = EntityRef::Scene(index);
        for node in &scene.nodes {
            check_index(&referrer, "node", *node, document.nodes.len())?;
        }
    }
    Ok(())
}

fn check_nodes(document: &AssetDocument<'_>) -> Result<(), ImportError> {
    for (index, node) in document.nodes.iter().enumerate() {
        let referrer = EntityRef::Node(index);
        for child in &node.children {
            check_index(&referrer, "node", *child, document.nodes.len())?;
        }
        check_optional(&referrer, "mesh", node.mesh, document.meshes.len())?;
        check_optional(&referrer, "skin", node.skin, document.skins.len())?;
    }
    Ok(())
}

fn check_meshes(document: &AssetDocument<'_>) -> Result<(), ImportError> {
    let accessors = document.accessors.len();
    for (mesh_index, mesh) in document.meshes.iter().enumerate() {
        for (primitive_index, primitive) in mesh.primitives.iter().enumerate() {
            let referrer = EntityRef::Primitive {
                mesh: mesh_index,
                primitive: primitive_index,
            };
            for accessor in primitive.attributes.values() {
                check_index(&referrer, "accessor", *accessor, accessors)?;
            }
            check_optional(&referrer, "accessor", primitive.indices, accessors)?;
            check_optional(&referrer, "material", primitive.material, document.materials.len())?;
            for target in &primitive.targets {
                for accessor in target.values() {
                    check_index(&referrer, "accessor", *accessor, accessors)?;
                }
            }
        }
    }
    Ok(())
}

/// Texture references nested in extension objects (`"...Texture": { "index": n }`).
fn collect_extension_textures(value: &Value, found: &mut Vec<usize>) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                if key.ends_with("Texture")
                    && let Some(index) = child.get("index").and_then(Value::as_u64)
                {
                    found.push(index as usize);
                }
                collect_extension_textures(child, found);
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_extension_textures(item, found);
            }
        }
        _ => {}
    }
}

fn extension_textures(extensions: &Extensions) -> Vec<usize> {
    let mut found = Vec::new();
    for value in extensions.values() {
        collect_extension_textures(value, &mut found);
    }
    found
}

fn check_materials(document: &AssetDocument<'_>) -> Result<(), ImportError> {
    let textures = document.textures.len();
    for (index, material) in document.materials.iter().enumerate() {
        let referrer = EntityRef::Material(index);
        let pbr = material.pbr_metallic_roughness.as_ref();
        let infos: [Option<&TextureInfo>; 5] = [
            pbr.and_then(|pbr| pbr.base_color_texture.as_ref()),
            pbr.and_then(|pbr| pbr.metallic_roughness_texture.as_ref()),
            material.normal_texture.as_ref(),
            material.occlusion_texture.as_ref(),
            material.emissive_texture.as_ref(),
        ];
        for info in infos.into_iter().flatten() {
            check_index(&referrer, "texture", info.index, textures)?;
        }
        for texture in extension_textures(&material.extensions) {
            check_index(&referrer, "texture", texture, textures)?;
        }
    }
    Ok(())
}

fn check_textures(document: &AssetDocument<'_>) -> Result<(), ImportError> {
    for (index, texture) in document.textures.iter().enumerate() {
        let referrer = EntityRef::Texture(index);
        check_optional(&referrer, "image", texture.source, document.images.len())?;
        check_optional(&referrer, "sampler", texture.sampler, document.samplers.len())?;
    }
    Ok(())
}

fn check_images(document: &AssetDocument<'_>) -> Result<(), ImportError> {
    for (index, image) in document.images.iter().enumerate() {
        let referrer = EntityRef::Image(index);
        if let Some(view_index) = image.buffer_view {
            check_index(&referrer, "buffer view", view_index, document.buffer_views.len())?;
            document
                .buffer_data
                .get(document.buffer_views[view_index].buffer)?;
        }
    }
    Ok(())
}

fn check_skins(document: &AssetDocument<'_>) -> Result<(), ImportError> {
    for (index, skin) in document.skins.iter().enumerate() {
        let referrer = EntityRef::Skin(index);
        for joint in &skin.joints {
            check_index(&referrer, "node", *joint, document.nodes.len())?;
        }
        check_optional(&referrer, "node", skin.skeleton, document.nodes.len())?;
        if let Some(accessor) = skin.inverse_bind_matrices {
            check_index(&referrer, "accessor", accessor, document.accessors.len())?;
            let count = document.accessors[accessor].count;
            if count < skin.joints.len() {
                return Err(ImportError::accessor(
                    referrer,
                    format!(
                        "{count} inverse-bind matrices for {} joints",
                        skin.joints.len()
                    ),
                ));
            }
        }
    }
    Ok(())
}

fn check_animations(document: &AssetDocument<'_>) -> Result<(), ImportError> {
    for (animation_index, animation) in document.animations.iter().enumerate() {
        for (channel_index, channel) in animation.channels.iter().enumerate() {
            let referrer = EntityRef::Channel {
                animation: animation_index,
                channel: channel_index,
            };
            check_index(
                &referrer,
                "animation sampler",
                channel.sampler,
                animation.samplers.len(),
            )?;
            check_optional(&referrer, "node", channel.target.node, document.nodes.len())?;
        }
        for (sampler_index, sampler) in animation.samplers.iter().enumerate() {
            let referrer = EntityRef::AnimationSampler {
                animation: animation_index,
                sampler: sampler_index,
            };
            check_index(&referrer, "accessor", sampler.input, document.accessors.len())?;
            check_index(&referrer, "accessor", sampler.output, document.accessors.len())?;
        }
    }
    Ok(())
}

fn check_vrm(document: &AssetDocument<'_>) -> Result<(), ImportError> {
    let vrm = &document.vrm;
    if let Some(humanoid) = &vrm.humanoid {
        for (bone, node) in humanoid.iter() {
            check_index(
                &EntityRef::HumanBone(bone),
                "node",
                node.0,
                document.nodes.len(),
            )?;
        }
    }

    for expression in &vrm.expressions {
        let referrer = EntityRef::Expression(expression.name.clone());
        for bind in &expression.binds {
            let mesh = match bind.target {
                BindTarget::Mesh(mesh) => {
                    check_index(&referrer, "mesh", mesh, document.meshes.len())?;
                    Some(mesh)
                }
                BindTarget::Node(node) => {
                    check_index(&referrer, "node", node, document.nodes.len())?;
                    document.nodes[node].mesh
                }
            };
            let targets = mesh.map_or(0, |mesh| document.meshes[mesh].target_count());
            check_index(&referrer, "morph target", bind.morph_index, targets)?;
        }
    }

    for (index, properties) in vrm.material_properties.iter().enumerate() {
        let referrer = EntityRef::Material(index);
        for texture in properties.texture_properties.values() {
            check_index(&referrer, "texture", *texture, document.textures.len())?;
        }
    }
    Ok(())
}

/// Joint indices stored in `JOINTS_n` must address joints of every skin the
/// mesh is instanced with.
fn check_skin_joint_indices(document: &AssetDocument<'_>) -> Result<(), ImportError> {
    let bindings: BTreeSet<(usize, usize)> = document
        .nodes
        .iter()
        .filter_map(|node| Some((node.mesh?, node.skin?)))
        .collect();

    for (mesh_index, skin_index) in bindings {
        let joint_count = document.skins[skin_index].joints.len();
        for (primitive_index, primitive) in document.meshes[mesh_index].primitives.iter().enumerate()
        {
            let referrer = EntityRef::Primitive {
                mesh: mesh_index,
                primitive: primitive_index,
            };
            let joint_sets = primitive
                .attributes
                .iter()
                .filter(|(semantic, _)| semantic.starts_with("JOINTS_"));
            for (_, accessor) in joint_sets {
                let values = read_accessor(document, *accessor)?;
                if let Some(invalid) = values
                    .to_u32()
                    .into_iter()
                    .find(|joint| *joint as usize >= joint_count)
                {
                    return Err(ImportError::dangling(
                        referrer,
                        "skin joint",
                        invalid as usize,
                        joint_count,
                    ));
                }
            }
        }
    }
    Ok(())
}
