//! VRM / glTF binary import pipeline.
//!
//! Reads a GLB container, validates its document, builds the node
//! hierarchy and renderable assets, and retargets humanoid animation onto a
//! host-supplied rig convention.

pub mod accessor;
pub mod animation;
pub mod assemble;
pub mod container;
pub mod coords;
pub mod diagnostic;
pub mod document;
pub mod error;
pub mod humanoid;
pub mod pipeline;
pub mod report;
pub mod retarget;
pub mod scene;
pub mod settings;

pub use diagnostic::{Diagnostic, DiagnosticCode, EntityRef, Severity};
pub use error::{ErrorKind, ImportError, ImportFailure};
pub use humanoid::{HumanBone, HumanoidBoneMap};
pub use pipeline::{AssetSet, CancelToken, ImportOutcome, import_vrm, import_vrm_with_cancel};
pub use retarget::{RetargetProfile, RigConvention};
pub use settings::ImportSettings;
