use std::fmt;

use nalgebra::{Matrix3, Matrix4, Quaternion, Translation3, UnitQuaternion, Vector3};
use serde::Serialize;

use crate::{
    accessor::read_mat4,
    coords::CoordinateConversion,
    diagnostic::EntityRef,
    document::{AssetDocument, schema::NodeDescriptor},
    error::ImportError,
};

/// Index of a node in the scene arena. Equal to the source node index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct NodeId(pub usize);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node {}", self.0)
    }
}

// ─── Transforms ───────────────────────────────────────────────────────────────

const SCALE_EPSILON: f32 = 1e-8;

/// Decomposed local transform.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    pub translation: Vector3<f32>,
    pub rotation: UnitQuaternion<f32>,
    pub scale: Vector3<f32>,
}

impl Default for Transform {
    fn default() -> Self {
        Self::identity()
    }
}

impl Transform {
    pub fn identity() -> Self {
        Self {
            translation: Vector3::zeros(),
            rotation: UnitQuaternion::identity(),
            scale: Vector3::new(1.0, 1.0, 1.0),
        }
    }

    /// Split an affine matrix into translation, rotation and scale. A
    /// mirrored basis is expressed as a negative x scale.
    pub fn from_matrix(matrix: &Matrix4<f32>) -> Self {
        let translation = Vector3::new(matrix[(0, 3)], matrix[(1, 3)], matrix[(2, 3)]);

        let basis_x = Vector3::new(matrix[(0, 0)], matrix[(1, 0)], matrix[(2, 0)]);
        let basis_y = Vector3::new(matrix[(0, 1)], matrix[(1, 1)], matrix[(2, 1)]);
        let basis_z = Vector3::new(matrix[(0, 2)], matrix[(1, 2)], matrix[(2, 2)]);

        let mut scale_x = basis_x.norm();
        let scale_y = basis_y.norm();
        let scale_z = basis_z.norm();

        let mut rot_x = if scale_x > SCALE_EPSILON {
            basis_x / scale_x
        } else {
            Vector3::x()
        };
        let rot_y = if scale_y > SCALE_EPSILON {
            basis_y / scale_y
        } else {
            Vector3::y()
        };
        let rot_z = if scale_z > SCALE_EPSILON {
            basis_z / scale_z
        } else {
            Vector3::z()
        };

        if rot_x.cross(&rot_y).dot(&rot_z) < 0.0 {
            scale_x = -scale_x;
            rot_x = -rot_x;
        }

        let rotation_matrix = Matrix3::from_columns(&[rot_x, rot_y, rot_z]);
        Self {
            translation,
            rotation: UnitQuaternion::from_matrix(&rotation_matrix),
            scale: Vector3::new(scale_x, scale_y, scale_z),
        }
    }

    /// Source-space transform of a node descriptor: `matrix` when present,
    /// otherwise TRS with glTF defaults.
    pub fn from_descriptor(node: &NodeDescriptor) -> Self {
        if let Some(matrix) = &node.matrix {
            return Self::from_matrix(&Matrix4::from_column_slice(matrix));
        }
        let rotation = node
            .rotation
            .and_then(|[x, y, z, w]| {
                UnitQuaternion::try_new(Quaternion::new(w, x, y, z), f32::EPSILON)
            })
            .unwrap_or_else(UnitQuaternion::identity);
        Self {
            translation: node.translation.map(Vector3::from).unwrap_or_else(Vector3::zeros),
            rotation,
            scale: node
                .scale
                .map(Vector3::from)
                .unwrap_or_else(|| Vector3::new(1.0, 1.0, 1.0)),
        }
    }

    /// Convert into target space component-wise.
    pub fn converted(&self, conversion: &CoordinateConversion) -> Self {
        Self {
            translation: Vector3::from(conversion.point(self.translation.into())),
            rotation: conversion.rotation(&self.rotation),
            scale: Vector3::from(conversion.scale(self.scale.into())),
        }
    }

    pub fn to_matrix(&self) -> Matrix4<f32> {
        let translation_matrix = Translation3::from(self.translation).to_homogeneous();
        let rotation_matrix = self.rotation.to_homogeneous();
        let scale_matrix = Matrix4::new_nonuniform_scaling(&self.scale);
        translation_matrix * rotation_matrix * scale_matrix
    }

    /// True when any axis is collapsed.
    pub fn is_degenerate(&self) -> bool {
        self.scale.iter().any(|axis| axis.abs() <= SCALE_EPSILON)
    }
}

/// Rotation part of a world matrix.
pub fn world_rotation(world: &Matrix4<f32>) -> UnitQuaternion<f32> {
    Transform::from_matrix(world).rotation
}

pub fn world_position(world: &Matrix4<f32>) -> Vector3<f32> {
    Vector3::new(world[(0, 3)], world[(1, 3)], world[(2, 3)])
}

// ─── Graph ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct SceneNode {
    pub id: NodeId,
    pub name: String,
    /// Target-space local transform.
    pub local: Transform,
    pub children: Vec<NodeId>,
    pub parent: Option<NodeId>,
    pub mesh: Option<usize>,
    pub skin: Option<usize>,
    /// Default morph weights.
    pub weights: Vec<f32>,
    /// Target-space world matrix, `parent.world * local`.
    pub world: Matrix4<f32>,
}

/// Joints paired with their inverse-bind matrices. Both sequences always
/// have the same length.
#[derive(Debug, Clone, PartialEq)]
pub struct SkinBinding {
    name: Option<String>,
    joints: Vec<NodeId>,
    inverse_bind_matrices: Vec<Matrix4<f32>>,
    skeleton: Option<NodeId>,
}

impl SkinBinding {
    /// Returns `None` when the two sequences differ in length.
    pub fn new(
        name: Option<String>,
        joints: Vec<NodeId>,
        inverse_bind_matrices: Vec<Matrix4<f32>>,
        skeleton: Option<NodeId>,
    ) -> Option<Self> {
        (joints.len() == inverse_bind_matrices.len()).then_some(Self {
            name,
            joints,
            inverse_bind_matrices,
            skeleton,
        })
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn joints(&self) -> &[NodeId] {
        &self.joints
    }

    pub fn inverse_bind_matrices(&self) -> &[Matrix4<f32>] {
        &self.inverse_bind_matrices
    }

    pub fn skeleton(&self) -> Option<NodeId> {
        self.skeleton
    }

    pub fn len(&self) -> usize {
        self.joints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.joints.is_empty()
    }

    /// Joints with their inverse-bind matrices.
    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &Matrix4<f32>)> + '_ {
        self.joints
            .iter()
            .copied()
            .zip(self.inverse_bind_matrices.iter())
    }
}

/// Acyclic node arena in target space.
#[derive(Debug, Clone, PartialEq)]
pub struct SceneGraph {
    nodes: Vec<SceneNode>,
    roots: Vec<NodeId>,
    scene_roots: Vec<NodeId>,
    skins: Vec<SkinBinding>,
}

impl SceneGraph {
    pub fn nodes(&self) -> &[SceneNode] {
        &self.nodes
    }

    pub fn node(&self, id: NodeId) -> Option<&SceneNode> {
        self.nodes.get(id.0)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Parentless nodes in index order.
    pub fn roots(&self) -> &[NodeId] {
        &self.roots
    }

    /// Root list of the default scene, or every root when the document has
    /// no scenes.
    pub fn scene_roots(&self) -> &[NodeId] {
        &self.scene_roots
    }

    pub fn skins(&self) -> &[SkinBinding] {
        &self.skins
    }

    pub fn world(&self, id: NodeId) -> Option<&Matrix4<f32>> {
        self.node(id).map(|node| &node.world)
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).and_then(|node| node.parent)
    }

    /// Proper ancestors of `id`, nearest first.
    pub fn ancestors(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        std::iter::successors(self.parent(id), move |current| self.parent(*current))
    }

    /// Depth-first pre-order from every root. Visits each node once.
    pub fn traverse(&self) -> Vec<NodeId> {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut stack: Vec<NodeId> = self.roots.iter().rev().copied().collect();
        while let Some(id) = stack.pop() {
            order.push(id);
            if let Some(node) = self.node(id) {
                stack.extend(node.children.iter().rev().copied());
            }
        }
        order
    }

    pub fn find_by_name(&self, name: &str) -> Option<NodeId> {
        self.nodes
            .iter()
            .find(|node| node.name == name)
            .map(|node| node.id)
    }
}

fn link_parents(document: &AssetDocument<'_>) -> Result<Vec<Option<usize>>, ImportError> {
    let mut parents: Vec<Option<usize>> = vec![None; document.nodes.len()];
    for (parent, node) in document.nodes.iter().enumerate() {
        for &child in &node.children {
            if child == parent {
                return Err(ImportError::CyclicHierarchy { node: child });
            }
            if let Some(first) = parents[child] {
                return Err(ImportError::MultipleParents {
                    node: child,
                    first,
                    second: parent,
                });
            }
            parents[child] = Some(parent);
        }
    }
    Ok(parents)
}

/// Walk up from an unreachable node until a node repeats; that node lies on
/// the cycle.
fn find_cycle_member(start: usize, parents: &[Option<usize>]) -> usize {
    let mut seen = vec![false; parents.len()];
    let mut current = start;
    while !seen[current] {
        seen[current] = true;
        match parents[current] {
            Some(parent) => current = parent,
            None => return start,
        }
    }
    current
}

/// Resolve node indices into an arena and compute world matrices.
///
/// # Errors
///
/// `MultipleParents` when two nodes list the same child, `CyclicHierarchy`
/// when a node is its own ancestor, and accessor errors from reading
/// inverse-bind matrices.
pub fn build_scene_graph(
    document: &AssetDocument<'_>,
    conversion: &CoordinateConversion,
) -> Result<SceneGraph, ImportError> {
    let parents = link_parents(document)?;
    let roots: Vec<NodeId> = parents
        .iter()
        .enumerate()
        .filter(|(_, parent)| parent.is_none())
        .map(|(index, _)| NodeId(index))
        .collect();

    let mut nodes: Vec<SceneNode> = document
        .nodes
        .iter()
        .enumerate()
        .map(|(index, descriptor)| SceneNode {
            id: NodeId(index),
            name: descriptor
                .name
                .clone()
                .unwrap_or_else(|| format!("node_{index}")),
            local: Transform::from_descriptor(descriptor).converted(conversion),
            children: descriptor.children.iter().copied().map(NodeId).collect(),
            parent: parents[index].map(NodeId),
            mesh: descriptor.mesh,
            skin: descriptor.skin,
            weights: descriptor.weights.clone(),
            world: Matrix4::identity(),
        })
        .collect();

    // Pre-order guarantees every parent is resolved before its children.
    let mut visited = vec![false; nodes.len()];
    let mut stack: Vec<usize> = roots.iter().rev().map(|root| root.0).collect();
    while let Some(index) = stack.pop() {
        visited[index] = true;
        let parent_world = parents[index].map_or_else(Matrix4::identity, |parent| nodes[parent].world);
        nodes[index].world = parent_world * nodes[index].local.to_matrix();
        stack.extend(document.nodes[index].children.iter().rev().copied());
    }
    if let Some(unreached) = visited.iter().position(|seen| !seen) {
        return Err(ImportError::CyclicHierarchy {
            node: find_cycle_member(unreached, &parents),
        });
    }

    let scene_roots = document
        .default_scene
        .or(if document.scenes.is_empty() { None } else { Some(0) })
        .and_then(|scene| document.scenes.get(scene))
        .map(|scene| scene.nodes.iter().copied().map(NodeId).collect())
        .unwrap_or_else(|| roots.clone());

    let mut skins = Vec::with_capacity(document.skins.len());
    for (index, skin) in document.skins.iter().enumerate() {
        let joints: Vec<NodeId> = skin.joints.iter().copied().map(NodeId).collect();
        let inverse_bind_matrices = match skin.inverse_bind_matrices {
            Some(accessor) => read_mat4(document, accessor)?
                .into_iter()
                .take(joints.len())
                .map(|matrix| conversion.matrix(&matrix))
                .collect(),
            None => vec![Matrix4::identity(); joints.len()],
        };
        let binding = SkinBinding::new(
            skin.name.clone(),
            joints,
            inverse_bind_matrices,
            skin.skeleton.map(NodeId),
        )
        .ok_or_else(|| {
            ImportError::accessor(
                EntityRef::Skin(index),
                "fewer inverse-bind matrices than joints",
            )
        })?;
        skins.push(binding);
    }

    log::debug!(
        "scene graph: {} nodes, {} roots, {} skins",
        nodes.len(),
        roots.len(),
        skins.len()
    );
    Ok(SceneGraph {
        nodes,
        roots,
        scene_roots,
        skins,
    })
}
