//! Mesh, material and texture assembly from a validated document.

pub mod material;
pub mod mesh;
pub mod texture;

pub use material::{AlphaMode, MaterialAsset, ShadingModel, TextureRef, assemble_materials};
pub use mesh::{MeshAsset, MorphTarget, Primitive, SkinWeights, assemble_meshes};
pub use texture::{ImageAsset, ResizeInterpolation, Sampler, TextureAsset, assemble_textures};
