//! Structured document parsing: typed descriptors, embedded buffers and the
//! decoded VRM extensions, validated as a whole before anything downstream
//! sees them.

pub mod schema;
pub mod validate;
pub mod vrm;

use std::borrow::Cow;

use base64::{Engine, engine::general_purpose::STANDARD};
use serde_json::{Map, Value};

use crate::{
    container::{Chunk, Container},
    diagnostic::{DiagnosticCode, Diagnostics, EntityRef},
    error::ImportError,
};

use schema::{
    AccessorDescriptor, AnimationDescriptor, AssetInfo, BufferDescriptor, BufferViewDescriptor,
    Extensions, GltfRoot, ImageDescriptor, MaterialDescriptor, MeshDescriptor, NodeDescriptor,
    SamplerDescriptor, SceneDescriptor, SkinDescriptor, TextureDescriptor,
};
use vrm::{EXT_VRM_ANIMATION, EXT_VRM0, EXT_VRM1, VrmExtension};

/// Extensions the pipeline interprets. Anything else is kept opaquely.
pub const KNOWN_EXTENSIONS: &[&str] = &[
    EXT_VRM0,
    EXT_VRM1,
    EXT_VRM_ANIMATION,
    "VRMC_materials_mtoon",
    "KHR_materials_unlit",
    "KHR_materials_pbrSpecularGlossiness",
    "KHR_materials_emissive_strength",
    "KHR_texture_transform",
    "KHR_mesh_quantization",
];

// ─── Buffers ──────────────────────────────────────────────────────────────────

/// Raw bytes per buffer index. Buffers stored in the container's binary
/// chunks are borrowed; base64 data URIs are decoded into owned bytes.
/// External URIs are not resolved.
#[derive(Debug, Clone, Default)]
pub struct BufferTable<'a> {
    buffers: Vec<Option<Cow<'a, [u8]>>>,
}

impl<'a> BufferTable<'a> {
    /// Buffers without a `uri` consume the binary chunks in file order.
    pub fn resolve(
        descriptors: &[BufferDescriptor],
        binary: &[Chunk<'a>],
    ) -> Result<Self, ImportError> {
        let mut chunks = binary.iter();
        let mut buffers = Vec::with_capacity(descriptors.len());

        for (index, descriptor) in descriptors.iter().enumerate() {
            let data = match descriptor.uri.as_deref() {
                None => chunks.next().map(|chunk| {
                    let length = descriptor.byte_length.min(chunk.data.len());
                    Cow::Borrowed(&chunk.data[..length])
                }),
                Some(uri) => decode_data_uri(uri)
                    .map_err(|reason| ImportError::InvalidDocument {
                        reason: format!("buffer {index}: {reason}"),
                    })?
                    .map(Cow::Owned),
            };
            buffers.push(data);
        }

        Ok(Self { buffers })
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    pub fn is_embedded(&self, index: usize) -> bool {
        matches!(self.buffers.get(index), Some(Some(_)))
    }

    /// Bytes of buffer `index`.
    ///
    /// # Errors
    ///
    /// `UnavailableBuffer` when the buffer is not embedded in the container.
    pub fn get(&self, index: usize) -> Result<&[u8], ImportError> {
        match self.buffers.get(index) {
            Some(Some(data)) => Ok(data.as_ref()),
            _ => Err(ImportError::UnavailableBuffer { buffer: index }),
        }
    }
}

/// `Ok(None)` for URIs that are not data URIs.
pub(crate) fn decode_data_uri(uri: &str) -> Result<Option<Vec<u8>>, String> {
    let Some(content) = uri
        .get(..5)
        .filter(|scheme| scheme.eq_ignore_ascii_case("data:"))
        .map(|_| &uri[5..])
    else {
        return Ok(None);
    };
    let Some((params, payload)) = content.split_once(',') else {
        return Err("data URI has no payload separator".to_string());
    };
    if params
        .rsplit(';')
        .next()
        .is_some_and(|encoding| encoding.eq_ignore_ascii_case("base64"))
    {
        STANDARD
            .decode(payload)
            .map(Some)
            .map_err(|error| format!("bad base64 payload: {error}"))
    } else {
        Ok(Some(payload.as_bytes().to_vec()))
    }
}

// ─── Document ─────────────────────────────────────────────────────────────────

/// The fully parsed and validated document. Immutable once built.
#[derive(Debug, Clone)]
pub struct AssetDocument<'a> {
    pub asset: AssetInfo,
    pub default_scene: Option<usize>,
    pub scenes: Vec<SceneDescriptor>,
    pub nodes: Vec<NodeDescriptor>,
    pub meshes: Vec<MeshDescriptor>,
    pub materials: Vec<MaterialDescriptor>,
    pub textures: Vec<TextureDescriptor>,
    pub images: Vec<ImageDescriptor>,
    pub samplers: Vec<SamplerDescriptor>,
    pub skins: Vec<SkinDescriptor>,
    pub animations: Vec<AnimationDescriptor>,
    pub accessors: Vec<AccessorDescriptor>,
    pub buffer_views: Vec<BufferViewDescriptor>,
    pub buffers: Vec<BufferDescriptor>,
    pub buffer_data: BufferTable<'a>,
    pub extensions_used: Vec<String>,
    pub extensions_required: Vec<String>,
    pub extensions: Extensions,
    pub extras: Option<Value>,
    pub other: Map<String, Value>,
    pub vrm: VrmExtension,
}

fn trim_padding(json: &[u8]) -> &[u8] {
    let end = json
        .iter()
        .rposition(|byte| !matches!(byte, b' ' | b'\0' | b'\n' | b'\r' | b'\t'))
        .map_or(0, |last| last + 1);
    &json[..end]
}

/// Decode and validate the container's JSON chunk.
///
/// # Errors
///
/// `InvalidDocument` for syntax/schema problems, `DanglingReference`,
/// `InvalidAccessor` or `UnavailableBuffer` from validation.
pub fn parse_document<'a>(
    container: &Container<'a>,
    diagnostics: &mut Diagnostics,
) -> Result<AssetDocument<'a>, ImportError> {
    let root: GltfRoot = serde_json::from_slice(trim_padding(container.json.data)).map_err(
        |error| ImportError::InvalidDocument {
            reason: error.to_string(),
        },
    )?;

    if !root.asset.version.is_empty() && !root.asset.version.starts_with("2.") {
        return Err(ImportError::InvalidDocument {
            reason: format!("unsupported asset version '{}'", root.asset.version),
        });
    }

    for name in root.extensions.keys().chain(root.extensions_required.iter()) {
        if !KNOWN_EXTENSIONS.contains(&name.as_str()) {
            diagnostics.warn(
                DiagnosticCode::UnrecognizedExtension,
                EntityRef::Extension(name.clone()),
                "extension is not interpreted and is preserved as-is",
            );
        }
    }

    let buffer_data = BufferTable::resolve(&root.buffers, &container.binary)?;
    let vrm = vrm::decode_vrm_extensions(&root.extensions, diagnostics)?;

    let document = AssetDocument {
        asset: root.asset,
        default_scene: root.scene,
        scenes: root.scenes,
        nodes: root.nodes,
        meshes: root.meshes,
        materials: root.materials,
        textures: root.textures,
        images: root.images,
        samplers: root.samplers,
        skins: root.skins,
        animations: root.animations,
        accessors: root.accessors,
        buffer_views: root.buffer_views,
        buffers: root.buffers,
        buffer_data,
        extensions_used: root.extensions_used,
        extensions_required: root.extensions_required,
        extensions: root.extensions,
        extras: root.extras,
        other: root.other,
        vrm,
    };

    validate::validate_document(&document)?;
    log::debug!(
        "document: {} nodes, {} meshes, {} materials, {} animations ({})",
        document.nodes.len(),
        document.meshes.len(),
        document.materials.len(),
        document.animations.len(),
        document.vrm.meta.version.label()
    );
    Ok(document)
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::ChunkKind;

    fn container(json: &'static [u8], bin: &'static [u8]) -> Container<'static> {
        Container {
            json: Chunk {
                kind: ChunkKind::Json,
                data: json,
            },
            binary: vec![Chunk {
                kind: ChunkKind::Binary,
                data: bin,
            }],
        }
    }

    #[test]
    fn given_padded_json_when_parsing_then_document_is_decoded() {
        let container = container(br#"{"asset":{"version":"2.0"},"nodes":[{}]}   "#, &[]);

        let document = parse_document(&container, &mut Diagnostics::new()).expect("parse");

        assert_eq!(document.nodes.len(), 1);
    }

    #[test]
    fn given_broken_json_when_parsing_then_document_is_invalid() {
        let container = container(br#"{"asset":"#, &[]);

        let error = parse_document(&container, &mut Diagnostics::new()).expect_err("invalid");

        assert!(matches!(error, ImportError::InvalidDocument { .. }));
    }

    #[test]
    fn given_vendor_root_extension_when_parsing_then_it_is_kept_with_warning() {
        let container = container(
            br#"{"asset":{"version":"2.0"},"extensions":{"VENDOR_thing":{"x":1}}}"#,
            &[],
        );
        let mut diagnostics = Diagnostics::new();

        let document = parse_document(&container, &mut diagnostics).expect("parse");

        assert!(document.extensions.contains_key("VENDOR_thing"));
        assert!(diagnostics.contains(DiagnosticCode::UnrecognizedExtension));
    }

    #[test]
    fn given_buffer_without_uri_when_resolving_then_bin_chunk_is_borrowed() {
        static BIN: [u8; 8] = [1, 2, 3, 4, 5, 6, 7, 8];
        let descriptors = vec![BufferDescriptor {
            byte_length: 6,
            ..BufferDescriptor::default()
        }];
        let chunks = [Chunk {
            kind: ChunkKind::Binary,
            data: &BIN,
        }];

        let table = BufferTable::resolve(&descriptors, &chunks).expect("resolve");

        let data = table.get(0).expect("embedded");
        assert_eq!(data, &BIN[..6]);
        assert_eq!(data.as_ptr(), BIN.as_ptr());
    }

    #[test]
    fn given_base64_data_uri_when_resolving_then_bytes_are_decoded() {
        let descriptors = vec![BufferDescriptor {
            byte_length: 3,
            uri: Some("data:application/octet-stream;base64,AQID".to_string()),
            ..BufferDescriptor::default()
        }];

        let table = BufferTable::resolve(&descriptors, &[]).expect("resolve");

        assert_eq!(table.get(0).expect("embedded"), &[1, 2, 3]);
    }

    #[test]
    fn given_external_uri_when_resolving_then_buffer_is_unavailable() {
        let descriptors = vec![BufferDescriptor {
            byte_length: 3,
            uri: Some("mesh.bin".to_string()),
            ..BufferDescriptor::default()
        }];

        let table = BufferTable::resolve(&descriptors, &[]).expect("resolve");

        assert_eq!(
            table.get(0).expect_err("external"),
            ImportError::UnavailableBuffer { buffer: 0 }
        );
    }
}
