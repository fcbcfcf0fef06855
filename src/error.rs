use serde::Serialize;
use thiserror::Error;

use crate::{
    diagnostic::{Diagnostic, DiagnosticCode, EntityRef, Severity},
    humanoid::HumanBone,
};

/// Serializable discriminant of [`ImportError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
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
}

impl From<ErrorKind> for DiagnosticCode {
    fn from(kind: ErrorKind) -> Self {
        match kind {
            ErrorKind::MalformedContainer => DiagnosticCode::MalformedContainer,
            ErrorKind::TruncatedChunk => DiagnosticCode::TruncatedChunk,
            ErrorKind::InvalidDocument => DiagnosticCode::InvalidDocument,
            ErrorKind::DanglingReference => DiagnosticCode::DanglingReference,
            ErrorKind::InvalidAccessor => DiagnosticCode::InvalidAccessor,
            ErrorKind::UnavailableBuffer => DiagnosticCode::UnavailableBuffer,
            ErrorKind::CyclicHierarchy => DiagnosticCode::CyclicHierarchy,
            ErrorKind::MultipleParents => DiagnosticCode::MultipleParents,
            ErrorKind::IncompleteHumanoidRig => DiagnosticCode::IncompleteHumanoidRig,
            ErrorKind::Cancelled => DiagnosticCode::Cancelled,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
/// Fatal import errors. Any of these aborts the import without an asset set.
pub enum ImportError {
    /// Header, magic, version, declared length or chunk layout is invalid.
    #[error("malformed container: {reason}")]
    MalformedContainer { reason: String },

    /// A chunk header or payload runs past the end of the input.
    #[error("chunk {chunk} declares {declared} bytes but only {available} remain")]
    TruncatedChunk {
        chunk: usize,
        declared: usize,
        available: usize,
    },

    /// The structured-data chunk is not a valid document.
    #[error("invalid document: {reason}")]
    InvalidDocument { reason: String },

    /// An index reference points outside its target table.
    #[error("{referrer} references {target} {index}, but only {len} exist")]
    DanglingReference {
        referrer: EntityRef,
        target: &'static str,
        index: usize,
        len: usize,
    },

    /// An accessor or buffer view does not describe readable data.
    #[error("invalid accessor data at {entity}: {reason}")]
    InvalidAccessor { entity: EntityRef, reason: String },

    /// A buffer is referenced but its bytes are not embedded in the container.
    #[error("buffer {buffer} is not embedded in the container")]
    UnavailableBuffer { buffer: usize },

    /// A node is its own ancestor.
    #[error("node {node} is part of a cyclic hierarchy")]
    CyclicHierarchy { node: usize },

    /// A node is listed as a child by two different parents.
    #[error("node {node} has two parents: {first} and {second}")]
    MultipleParents {
        node: usize,
        first: usize,
        second: usize,
    },

    /// A required humanoid bone has no node mapping.
    #[error("humanoid rig is incomplete: required bone '{bone}' is missing")]
    IncompleteHumanoidRig { bone: HumanBone },

    /// The caller cancelled the import.
    #[error("import was cancelled")]
    Cancelled,
}

impl ImportError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ImportError::MalformedContainer { .. } => ErrorKind::MalformedContainer,
            ImportError::TruncatedChunk { .. } => ErrorKind::TruncatedChunk,
            ImportError::InvalidDocument { .. } => ErrorKind::InvalidDocument,
            ImportError::DanglingReference { .. } => ErrorKind::DanglingReference,
            ImportError::InvalidAccessor { .. } => ErrorKind::InvalidAccessor,
            ImportError::UnavailableBuffer { .. } => ErrorKind::UnavailableBuffer,
            ImportError::CyclicHierarchy { .. } => ErrorKind::CyclicHierarchy,
            ImportError::MultipleParents { .. } => ErrorKind::MultipleParents,
            ImportError::IncompleteHumanoidRig { .. } => ErrorKind::IncompleteHumanoidRig,
            ImportError::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Entity the error is about.
    pub fn entity(&self) -> EntityRef {
        match self {
            ImportError::MalformedContainer { .. } | ImportError::Cancelled => EntityRef::Container,
            ImportError::TruncatedChunk { chunk, .. } => EntityRef::Chunk(*chunk),
            ImportError::InvalidDocument { .. } => EntityRef::Document,
            ImportError::DanglingReference { referrer, .. } => referrer.clone(),
            ImportError::InvalidAccessor { entity, .. } => entity.clone(),
            ImportError::UnavailableBuffer { buffer } => EntityRef::Buffer(*buffer),
            ImportError::CyclicHierarchy { node } | ImportError::MultipleParents { node, .. } => {
                EntityRef::Node(*node)
            }
            ImportError::IncompleteHumanoidRig { bone } => EntityRef::HumanBone(*bone),
        }
    }

    pub fn to_diagnostic(&self) -> Diagnostic {
        Diagnostic {
            severity: Severity::Error,
            code: self.kind().into(),
            entity: self.entity(),
            message: self.to_string(),
        }
    }

    pub(crate) fn dangling(
        referrer: EntityRef,
        target: &'static str,
        index: usize,
        len: usize,
    ) -> Self {
        ImportError::DanglingReference {
            referrer,
            target,
            index,
            len,
        }
    }

    pub(crate) fn accessor(entity: EntityRef, reason: impl Into<String>) -> Self {
        ImportError::InvalidAccessor {
            entity,
            reason: reason.into(),
        }
    }

    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        ImportError::MalformedContainer {
            reason: reason.into(),
        }
    }
}

/// A failed import: the terminal error plus the warnings recorded before it.
#[derive(Debug, Clone, Error)]
#[error("{error}")]
pub struct ImportFailure {
    #[source]
    pub error: ImportError,
    pub diagnostics: Vec<Diagnostic>,
}

impl ImportFailure {
    pub fn kind(&self) -> ErrorKind {
        self.error.kind()
    }

    /// Recorded warnings followed by the terminal error as a diagnostic.
    pub fn all_diagnostics(&self) -> Vec<Diagnostic> {
        let mut all = self.diagnostics.clone();
        all.push(self.error.to_diagnostic());
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn given_dangling_joint_when_formatted_then_message_cites_index() {
        let error = ImportError::dangling(
            EntityRef::Primitive {
                mesh: 0,
                primitive: 0,
            },
            "skin joint",
            9,
            8,
        );

        assert_eq!(error.kind(), ErrorKind::DanglingReference);
        assert_eq!(
            error.to_string(),
            "mesh 0 primitive 0 references skin joint 9, but only 8 exist"
        );
    }

    #[test]
    fn given_missing_bone_when_converted_to_diagnostic_then_entity_is_the_bone() {
        let error = ImportError::IncompleteHumanoidRig {
            bone: HumanBone::LeftHand,
        };

        let diagnostic = error.to_diagnostic();

        assert_eq!(diagnostic.severity, Severity::Error);
        assert_eq!(diagnostic.code, DiagnosticCode::IncompleteHumanoidRig);
        assert_eq!(diagnostic.entity, EntityRef::HumanBone(HumanBone::LeftHand));
    }
}
