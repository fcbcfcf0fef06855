use std::fmt;

use serde::{Serialize, Serializer};

use crate::humanoid::HumanBone;

// ─── Entities ─────────────────────────────────────────────────────────────────

/// Identifies the document entity a diagnostic or error is about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityRef {
    Container,
    Chunk(usize),
    Document,
    Extension(String),
    Scene(usize),
    Node(usize),
    Mesh(usize),
    Primitive { mesh: usize, primitive: usize },
    Material(usize),
    Texture(usize),
    Image(usize),
    Sampler(usize),
    Skin(usize),
    Accessor(usize),
    BufferView(usize),
    Buffer(usize),
    Animation(usize),
    Channel { animation: usize, channel: usize },
    AnimationSampler { animation: usize, sampler: usize },
    HumanBone(HumanBone),
    HumanBoneName(String),
    Expression(String),
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityRef::Container => write!(f, "container"),
            EntityRef::Chunk(index) => write!(f, "chunk {index}"),
            EntityRef::Document => write!(f, "document"),
            EntityRef::Extension(name) => write!(f, "extension '{name}'"),
            EntityRef::Scene(index) => write!(f, "scene {index}"),
            EntityRef::Node(index) => write!(f, "node {index}"),
            EntityRef::Mesh(index) => write!(f, "mesh {index}"),
            EntityRef::Primitive { mesh, primitive } => {
                write!(f, "mesh {mesh} primitive {primitive}")
            }
            EntityRef::Material(index) => write!(f, "material {index}"),
            EntityRef::Texture(index) => write!(f, "texture {index}"),
            EntityRef::Image(index) => write!(f, "image {index}"),
            EntityRef::Sampler(index) => write!(f, "sampler {index}"),
            EntityRef::Skin(index) => write!(f, "skin {index}"),
            EntityRef::Accessor(index) => write!(f, "accessor {index}"),
            EntityRef::BufferView(index) => write!(f, "buffer view {index}"),
            EntityRef::Buffer(index) => write!(f, "buffer {index}"),
            EntityRef::Animation(index) => write!(f, "animation {index}"),
            EntityRef::Channel { animation, channel } => {
                write!(f, "animation {animation} channel {channel}")
            }
            EntityRef::AnimationSampler { animation, sampler } => {
                write!(f, "animation {animation} sampler {sampler}")
            }
            EntityRef::HumanBone(bone) => write!(f, "humanoid bone '{bone}'"),
            EntityRef::HumanBoneName(name) => write!(f, "humanoid bone name '{name}'"),
            EntityRef::Expression(name) => write!(f, "expression '{name}'"),
        }
    }
}

impl Serialize for EntityRef {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

// ─── Codes ────────────────────────────────────────────────────────────────────

/// Severity level used by diagnostics.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

/// Machine-readable diagnostic code. Fatal error kinds share the same space
/// so a terminal error converts into a diagnostic without loss.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DiagnosticCode {
    // fatal
    MalformedContainer,
    TruncatedChunk,
    InvalidDocument,
    DanglingReference,
    InvalidAccessor,
    UnavailableBuffer,
    CyclicHierarchy,
    MultipleParents,
    IncompleteHumanoidRig,
    Cancelled,
    // container / document
    UnknownChunk,
    TrailingBytes,
    UnrecognizedExtension,
    MissingHumanoid,
    UnknownHumanBone,
    DuplicateHumanBone,
    // assembly
    SkippedPrimitive,
    ZeroSkinWeights,
    UnpairedSkinAttribute,
    UnsupportedMaterialParameter,
    UndecodableImage,
    TextureResized,
    // retargeting
    MissingOptionalBone,
    DegenerateRestPose,
    DuplicateBoneNode,
    BoneNotInConvention,
    UnexpectedBoneHierarchy,
    // animation
    NonMonotonicKeyframes,
    DuplicateKeyframeTime,
    NonFiniteKeyframeTime,
    TrackDropped,
}

impl DiagnosticCode {
    pub fn as_str(self) -> &'static str {
        match self {
            DiagnosticCode::MalformedContainer => "MALFORMED_CONTAINER",
            DiagnosticCode::TruncatedChunk => "TRUNCATED_CHUNK",
            DiagnosticCode::InvalidDocument => "INVALID_DOCUMENT",
            DiagnosticCode::DanglingReference => "DANGLING_REFERENCE",
            DiagnosticCode::InvalidAccessor => "INVALID_ACCESSOR",
            DiagnosticCode::UnavailableBuffer => "UNAVAILABLE_BUFFER",
            DiagnosticCode::CyclicHierarchy => "CYCLIC_HIERARCHY",
            DiagnosticCode::MultipleParents => "MULTIPLE_PARENTS",
            DiagnosticCode::IncompleteHumanoidRig => "INCOMPLETE_HUMANOID_RIG",
            DiagnosticCode::Cancelled => "CANCELLED",
            DiagnosticCode::UnknownChunk => "UNKNOWN_CHUNK",
            DiagnosticCode::TrailingBytes => "TRAILING_BYTES",
            DiagnosticCode::UnrecognizedExtension => "UNRECOGNIZED_EXTENSION",
            DiagnosticCode::MissingHumanoid => "MISSING_HUMANOID",
            DiagnosticCode::UnknownHumanBone => "UNKNOWN_HUMAN_BONE",
            DiagnosticCode::DuplicateHumanBone => "DUPLICATE_HUMAN_BONE",
            DiagnosticCode::SkippedPrimitive => "SKIPPED_PRIMITIVE",
            DiagnosticCode::ZeroSkinWeights => "ZERO_SKIN_WEIGHTS",
            DiagnosticCode::UnpairedSkinAttribute => "UNPAIRED_SKIN_ATTRIBUTE",
            DiagnosticCode::UnsupportedMaterialParameter => "UNSUPPORTED_MATERIAL_PARAMETER",
            DiagnosticCode::UndecodableImage => "UNDECODABLE_IMAGE",
            DiagnosticCode::TextureResized => "TEXTURE_RESIZED",
            DiagnosticCode::MissingOptionalBone => "MISSING_OPTIONAL_BONE",
            DiagnosticCode::DegenerateRestPose => "DEGENERATE_REST_POSE",
            DiagnosticCode::DuplicateBoneNode => "DUPLICATE_BONE_NODE",
            DiagnosticCode::BoneNotInConvention => "BONE_NOT_IN_CONVENTION",
            DiagnosticCode::UnexpectedBoneHierarchy => "UNEXPECTED_BONE_HIERARCHY",
            DiagnosticCode::NonMonotonicKeyframes => "NON_MONOTONIC_KEYFRAMES",
            DiagnosticCode::DuplicateKeyframeTime => "DUPLICATE_KEYFRAME_TIME",
            DiagnosticCode::NonFiniteKeyframeTime => "NON_FINITE_KEYFRAME_TIME",
            DiagnosticCode::TrackDropped => "TRACK_DROPPED",
        }
    }
}

impl fmt::Display for DiagnosticCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── Diagnostics ──────────────────────────────────────────────────────────────

/// A single structured diagnostic produced during import.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub code: DiagnosticCode,
    pub entity: EntityRef,
    pub message: String,
}

/// Ordered collector for the non-fatal diagnostics of one import. Every
/// recorded entry is mirrored to the `log` facade.
#[derive(Debug, Clone, Default)]
pub struct Diagnostics {
    entries: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn warn(&mut self, code: DiagnosticCode, entity: EntityRef, message: impl Into<String>) {
        let message = message.into();
        log::warn!("[{code}] {entity}: {message}");
        self.entries.push(Diagnostic {
            severity: Severity::Warning,
            code,
            entity,
            message,
        });
    }

    pub fn info(&mut self, code: DiagnosticCode, entity: EntityRef, message: impl Into<String>) {
        let message = message.into();
        log::info!("[{code}] {entity}: {message}");
        self.entries.push(Diagnostic {
            severity: Severity::Info,
            code,
            entity,
            message,
        });
    }

    pub fn entries(&self) -> &[Diagnostic] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<Diagnostic> {
        self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// True when at least one entry carries `code`.
    pub fn contains(&self, code: DiagnosticCode) -> bool {
        self.entries.iter().any(|entry| entry.code == code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn given_primitive_entity_when_formatted_then_mesh_and_primitive_are_named() {
        let entity = EntityRef::Primitive {
            mesh: 2,
            primitive: 1,
        };
        assert_eq!(entity.to_string(), "mesh 2 primitive 1");
    }

    #[test]
    fn given_warning_when_serialized_then_code_and_entity_are_strings() {
        let mut diagnostics = Diagnostics::new();
        diagnostics.warn(
            DiagnosticCode::NonMonotonicKeyframes,
            EntityRef::Channel {
                animation: 0,
                channel: 3,
            },
            "keyframes were sorted",
        );

        let json = serde_json::to_value(diagnostics.entries()).expect("serialize diagnostics");
        assert_eq!(json[0]["code"], "NON_MONOTONIC_KEYFRAMES");
        assert_eq!(json[0]["entity"], "animation 0 channel 3");
        assert_eq!(json[0]["severity"], "Warning");
    }

    #[test]
    fn given_code_when_displayed_then_matches_serialized_name() {
        let serialized =
            serde_json::to_value(DiagnosticCode::UnsupportedMaterialParameter).expect("serialize");
        assert_eq!(
            serialized,
            DiagnosticCode::UnsupportedMaterialParameter.as_str()
        );
    }
}
