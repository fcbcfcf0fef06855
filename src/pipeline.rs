//! End-to-end import: container → document → scene → assets → retarget →
//! animation.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use crate::{
    animation::{AnimationClip, import_animations},
    assemble::{
        ImageAsset, MaterialAsset, MeshAsset, TextureAsset, assemble_materials, assemble_meshes,
        assemble_textures,
    },
    container::read_container,
    coords::CoordinateConversion,
    diagnostic::{Diagnostic, DiagnosticCode, Diagnostics, EntityRef},
    document::{
        parse_document,
        vrm::{Expression, VrmMeta},
    },
    error::{ImportError, ImportFailure},
    humanoid::{HumanBone, HumanoidBoneMap},
    retarget::{RetargetProfile, compute_retarget_profile},
    scene::{SceneGraph, build_scene_graph},
    settings::ImportSettings,
};

#[derive(Debug, Clone, Default)]
/// Cooperative cancellation flag shared between the host and an import.
///
/// The pipeline polls it between stages; a stage that has started always
/// runs to completion.
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone, PartialEq)]
/// Everything produced by one successful import.
pub struct AssetSet {
    pub meta: VrmMeta,
    pub scene: SceneGraph,
    pub meshes: Vec<MeshAsset>,
    pub materials: Vec<MaterialAsset>,
    pub images: Vec<ImageAsset>,
    pub textures: Vec<TextureAsset>,
    /// `None` for documents without a humanoid section.
    pub humanoid: Option<HumanoidBoneMap>,
    /// `None` when no humanoid was mapped.
    pub retarget: Option<RetargetProfile>,
    pub expressions: Vec<Expression>,
    pub animations: Vec<AnimationClip>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImportOutcome {
    pub assets: AssetSet,
    /// Non-fatal diagnostics in the order they were recorded.
    pub diagnostics: Vec<Diagnostic>,
}

/// Import one VRM / VRMA / glTF binary blob.
///
/// # Errors
///
/// Returns an [`ImportFailure`] carrying the fatal [`ImportError`] and the
/// warnings recorded before it. No partial asset set is produced.
pub fn import_vrm(bytes: &[u8], settings: &ImportSettings) -> Result<ImportOutcome, ImportFailure> {
    import_vrm_with_cancel(bytes, settings, &CancelToken::new())
}

/// [`import_vrm`] with a cancellation token checked between stages.
///
/// # Errors
///
/// As [`import_vrm`], plus `Cancelled` once `cancel` has been triggered.
pub fn import_vrm_with_cancel(
    bytes: &[u8],
    settings: &ImportSettings,
    cancel: &CancelToken,
) -> Result<ImportOutcome, ImportFailure> {
    let mut diagnostics = Diagnostics::new();
    match run_stages(bytes, settings, cancel, &mut diagnostics) {
        Ok(assets) => {
            log::info!(
                "imported '{}': {} nodes, {} meshes, {} clips, {} diagnostics",
                assets.meta.name.as_deref().unwrap_or("<unnamed>"),
                assets.scene.len(),
                assets.meshes.len(),
                assets.animations.len(),
                diagnostics.len()
            );
            Ok(ImportOutcome {
                assets,
                diagnostics: diagnostics.into_entries(),
            })
        }
        Err(error) => {
            log::error!("import failed: {error}");
            Err(ImportFailure {
                error,
                diagnostics: diagnostics.into_entries(),
            })
        }
    }
}

fn checkpoint(cancel: &CancelToken, stage: &str) -> Result<(), ImportError> {
    if cancel.is_cancelled() {
        log::debug!("cancelled before {stage}");
        return Err(ImportError::Cancelled);
    }
    log::debug!("stage: {stage}");
    Ok(())
}

fn run_stages(
    bytes: &[u8],
    settings: &ImportSettings,
    cancel: &CancelToken,
    diagnostics: &mut Diagnostics,
) -> Result<AssetSet, ImportError> {
    checkpoint(cancel, "container")?;
    let container = read_container(bytes, diagnostics)?;

    checkpoint(cancel, "document")?;
    let document = parse_document(&container, diagnostics)?;
    let conversion = CoordinateConversion::new(&settings.coordinates, document.vrm.meta.version);

    checkpoint(cancel, "scene")?;
    let scene = build_scene_graph(&document, &conversion)?;

    checkpoint(cancel, "meshes")?;
    let meshes = assemble_meshes(&document, &conversion, diagnostics)?;
    let materials = assemble_materials(&document, &settings.materials, diagnostics);

    checkpoint(cancel, "textures")?;
    let (images, textures) = assemble_textures(&document, &settings.textures, diagnostics);

    checkpoint(cancel, "retarget")?;
    let humanoid = document.vrm.humanoid.clone();
    let retarget = match &humanoid {
        Some(bone_map) => Some(compute_retarget_profile(
            &scene,
            bone_map,
            &settings.rig,
            conversion.up(),
            diagnostics,
        )?),
        None if settings.require_humanoid => {
            diagnostics.warn(
                DiagnosticCode::MissingHumanoid,
                EntityRef::Document,
                "document has no humanoid section",
            );
            return Err(ImportError::IncompleteHumanoidRig {
                bone: HumanBone::Hips,
            });
        }
        None => {
            diagnostics.info(
                DiagnosticCode::MissingHumanoid,
                EntityRef::Document,
                "no humanoid section; animation is imported without retargeting",
            );
            None
        }
    };

    checkpoint(cancel, "animation")?;
    let passthrough;
    let profile = match &retarget {
        Some(profile) => profile,
        None => {
            passthrough = RetargetProfile::passthrough(conversion.up());
            &passthrough
        }
    };
    let animations = import_animations(
        &document,
        humanoid.as_ref(),
        profile,
        &conversion,
        diagnostics,
    );

    Ok(AssetSet {
        meta: document.vrm.meta.clone(),
        scene,
        meshes,
        materials,
        images,
        textures,
        humanoid,
        retarget,
        expressions: document.vrm.expressions.clone(),
        animations,
    })
}
