use std::{fs, path::Path};

use anyhow::{Context, Result};
use serde::Serialize;

use crate::{
    diagnostic::{Diagnostic, Severity},
    error::{ErrorKind, ImportFailure},
    humanoid::HumanBone,
    pipeline::ImportOutcome,
};

// ─── Summary structs ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MappedBone {
    pub bone: HumanBone,
    pub node_name: String,
    /// Host bone name from the rig convention, when it names one.
    pub target_name: Option<String>,
    pub retargeted: bool,
}

/// Human-readable digest of one import, written next to the input by the CLI.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImportSummary {
    pub source: String,
    pub model_name: Option<String>,
    pub authors: Vec<String>,
    pub vrm_version: &'static str,
    pub node_count: usize,
    pub mesh_count: usize,
    pub vertex_count: usize,
    pub triangle_count: usize,
    pub material_count: usize,
    pub texture_count: usize,
    pub mapped_bones: Vec<MappedBone>,
    pub clip_count: usize,
    pub track_count: usize,
    pub warning_count: usize,
    /// Set when the import failed.
    pub error: Option<ErrorKind>,
    /// Set when the input file could not be read at all.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub read_error: Option<String>,
    pub diagnostics: Vec<Diagnostic>,
}

impl ImportSummary {
    pub fn from_outcome(source: impl Into<String>, outcome: &ImportOutcome) -> Self {
        let assets = &outcome.assets;
        let mapped_bones = assets
            .humanoid
            .iter()
            .flat_map(|bone_map| bone_map.iter())
            .map(|(bone, node)| {
                let correction = assets
                    .retarget
                    .as_ref()
                    .and_then(|profile| profile.get(bone));
                MappedBone {
                    bone,
                    node_name: assets
                        .scene
                        .node(node)
                        .map(|scene_node| scene_node.name.clone())
                        .unwrap_or_default(),
                    target_name: correction.and_then(|c| c.target_name.clone()),
                    retargeted: correction.is_some(),
                }
            })
            .collect();

        Self {
            source: source.into(),
            model_name: assets.meta.name.clone(),
            authors: assets.meta.authors.clone(),
            vrm_version: assets.meta.version.label(),
            node_count: assets.scene.len(),
            mesh_count: assets.meshes.len(),
            vertex_count: assets.meshes.iter().map(|mesh| mesh.vertex_count()).sum(),
            triangle_count: assets.meshes.iter().map(|mesh| mesh.triangle_count()).sum(),
            material_count: assets.materials.len(),
            texture_count: assets.textures.len(),
            mapped_bones,
            clip_count: assets.animations.len(),
            track_count: assets.animations.iter().map(|clip| clip.tracks.len()).sum(),
            warning_count: count_warnings(&outcome.diagnostics),
            error: None,
            read_error: None,
            diagnostics: outcome.diagnostics.clone(),
        }
    }

    pub fn from_failure(source: impl Into<String>, failure: &ImportFailure) -> Self {
        let diagnostics = failure.all_diagnostics();
        Self {
            warning_count: count_warnings(&diagnostics),
            error: Some(failure.kind()),
            diagnostics,
            ..Self::empty(source.into())
        }
    }

    /// Summary of an input whose bytes never reached the importer.
    pub fn unreadable(source: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            read_error: Some(message.into()),
            ..Self::empty(source.into())
        }
    }

    pub fn succeeded(&self) -> bool {
        self.error.is_none() && self.read_error.is_none()
    }

    fn empty(source: String) -> Self {
        Self {
            source,
            model_name: None,
            authors: Vec::new(),
            vrm_version: "unknown",
            node_count: 0,
            mesh_count: 0,
            vertex_count: 0,
            triangle_count: 0,
            material_count: 0,
            texture_count: 0,
            mapped_bones: Vec::new(),
            clip_count: 0,
            track_count: 0,
            warning_count: 0,
            error: None,
            read_error: None,
            diagnostics: Vec::new(),
        }
    }
}

fn count_warnings(diagnostics: &[Diagnostic]) -> usize {
    diagnostics
        .iter()
        .filter(|entry| entry.severity == Severity::Warning)
        .count()
}

#[derive(Debug, Serialize)]
struct ImportReport<'a> {
    generated_at: String,
    imports: &'a [ImportSummary],
}

// ─── Report writer ────────────────────────────────────────────────────────────

/// Write summaries as a pretty-printed JSON report.
pub fn write_import_report(path: &Path, summaries: &[ImportSummary]) -> Result<()> {
    let report = ImportReport {
        generated_at: jiff::Timestamp::now().to_string(),
        imports: summaries,
    };
    let json = serde_json::to_string_pretty(&report).context("failed to serialize report")?;
    fs::write(path, json)
        .with_context(|| format!("failed to write import report: {}", path.display()))?;
    log::info!("wrote import report to {}", path.display());
    Ok(())
}
