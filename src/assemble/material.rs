//! Source materials mapped onto the three shading models the host renders.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::{
    diagnostic::{DiagnosticCode, Diagnostics, EntityRef},
    document::{
        AssetDocument,
        schema::{MaterialDescriptor, TextureInfo},
        vrm::Vrm0MaterialProperties,
    },
    settings::MaterialSettings,
};

const EXT_MTOON: &str = "VRMC_materials_mtoon";
const EXT_UNLIT: &str = "KHR_materials_unlit";
const EXT_SPEC_GLOSS: &str = "KHR_materials_pbrSpecularGlossiness";
const EXT_EMISSIVE_STRENGTH: &str = "KHR_materials_emissive_strength";
const EXT_TEXTURE_TRANSFORM: &str = "KHR_texture_transform";

const DIELECTRIC_SPECULAR: f32 = 0.04;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TextureRef {
    pub texture: usize,
    pub tex_coord: u32,
    /// Normal scale, occlusion strength or shading-shift scale; 1 otherwise.
    pub scale: f32,
}

impl TextureRef {
    fn from_info(info: &TextureInfo) -> Self {
        Self {
            texture: info.index,
            tex_coord: info.tex_coord,
            scale: info.scale.or(info.strength).unwrap_or(1.0),
        }
    }

    fn from_value(value: &Value) -> Option<Self> {
        serde_json::from_value::<TextureInfo>(value.clone())
            .ok()
            .map(|info| Self::from_info(&info))
    }

    fn from_index(texture: usize) -> Self {
        Self {
            texture,
            tex_coord: 0,
            scale: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
#[serde(rename_all = "camelCase", tag = "mode", content = "cutoff")]
pub enum AlphaMode {
    #[default]
    Opaque,
    Mask(f32),
    Blend,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum OutlineWidthMode {
    #[default]
    None,
    WorldCoordinates,
    ScreenCoordinates,
}

/// MToon parameters the host's toon shader understands.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToonParameters {
    pub shade_color_factor: [f32; 3],
    pub shade_multiply_texture: Option<TextureRef>,
    pub shading_shift_factor: f32,
    pub shading_shift_texture: Option<TextureRef>,
    pub shading_toony_factor: f32,
    pub parametric_rim_color_factor: [f32; 3],
    pub parametric_rim_fresnel_power_factor: f32,
    pub parametric_rim_lift_factor: f32,
    pub rim_multiply_texture: Option<TextureRef>,
    pub rim_lighting_mix_factor: f32,
    pub outline_width_mode: OutlineWidthMode,
    /// Meters for world-space outlines, screen fraction otherwise.
    pub outline_width_factor: f32,
    pub outline_width_multiply_texture: Option<TextureRef>,
    pub outline_color_factor: [f32; 3],
    pub outline_lighting_mix_factor: f32,
    pub transparent_with_z_write: bool,
    pub render_queue_offset_number: i32,
}

impl Default for ToonParameters {
    fn default() -> Self {
        Self {
            shade_color_factor: [0.0; 3],
            shade_multiply_texture: None,
            shading_shift_factor: 0.0,
            shading_shift_texture: None,
            shading_toony_factor: 0.9,
            parametric_rim_color_factor: [0.0; 3],
            parametric_rim_fresnel_power_factor: 5.0,
            parametric_rim_lift_factor: 0.0,
            rim_multiply_texture: None,
            rim_lighting_mix_factor: 1.0,
            outline_width_mode: OutlineWidthMode::None,
            outline_width_factor: 0.0,
            outline_width_multiply_texture: None,
            outline_color_factor: [0.0; 3],
            outline_lighting_mix_factor: 1.0,
            transparent_with_z_write: false,
            render_queue_offset_number: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "model", rename_all = "camelCase")]
pub enum ShadingModel {
    /// Metallic/roughness PBR.
    Lit {
        base_color_factor: [f32; 4],
        base_color_texture: Option<TextureRef>,
        metallic_factor: f32,
        roughness_factor: f32,
        metallic_roughness_texture: Option<TextureRef>,
    },
    Unlit {
        base_color_factor: [f32; 4],
        base_color_texture: Option<TextureRef>,
    },
    Toon {
        base_color_factor: [f32; 4],
        base_color_texture: Option<TextureRef>,
        toon: Box<ToonParameters>,
    },
}

impl ShadingModel {
    pub fn base_color_factor(&self) -> [f32; 4] {
        match self {
            ShadingModel::Lit {
                base_color_factor, ..
            }
            | ShadingModel::Unlit {
                base_color_factor, ..
            }
            | ShadingModel::Toon {
                base_color_factor, ..
            } => *base_color_factor,
        }
    }

    pub fn base_color_texture(&self) -> Option<TextureRef> {
        match self {
            ShadingModel::Lit {
                base_color_texture, ..
            }
            | ShadingModel::Unlit {
                base_color_texture, ..
            }
            | ShadingModel::Toon {
                base_color_texture, ..
            } => *base_color_texture,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MaterialAsset {
    pub name: Option<String>,
    pub shading: ShadingModel,
    pub normal_texture: Option<TextureRef>,
    pub occlusion_texture: Option<TextureRef>,
    pub emissive_texture: Option<TextureRef>,
    pub emissive_factor: [f32; 3],
    pub alpha_mode: AlphaMode,
    pub double_sided: bool,
}

// ─── JSON helpers ─────────────────────────────────────────────────────────────

fn number(object: &Map<String, Value>, key: &str, default: f32) -> f32 {
    object
        .get(key)
        .and_then(Value::as_f64)
        .map_or(default, |value| value as f32)
}

fn vec3(object: &Map<String, Value>, key: &str, default: [f32; 3]) -> [f32; 3] {
    let Some(values) = object.get(key).and_then(Value::as_array) else {
        return default;
    };
    let mut out = default;
    for (slot, value) in out.iter_mut().zip(values) {
        if let Some(value) = value.as_f64() {
            *slot = value as f32;
        }
    }
    out
}

fn texture(object: &Map<String, Value>, key: &str) -> Option<TextureRef> {
    object.get(key).and_then(TextureRef::from_value)
}

fn vrm0_color(props: &Vrm0MaterialProperties, key: &str, default: [f32; 4]) -> [f32; 4] {
    let Some(values) = props.vector_properties.get(key) else {
        return default;
    };
    let mut out = default;
    for (slot, value) in out.iter_mut().zip(values) {
        *slot = *value;
    }
    out
}

fn rgb(color: [f32; 4]) -> [f32; 3] {
    [color[0], color[1], color[2]]
}

// ─── Specular/glossiness ──────────────────────────────────────────────────────

fn perceived_brightness(color: [f32; 3]) -> f32 {
    (0.299 * color[0] * color[0] + 0.587 * color[1] * color[1] + 0.114 * color[2] * color[2])
        .sqrt()
}

fn solve_metallic(diffuse: f32, specular: f32, one_minus_specular_strength: f32) -> f32 {
    if specular < DIELECTRIC_SPECULAR {
        return 0.0;
    }
    let a = DIELECTRIC_SPECULAR;
    let b = diffuse * one_minus_specular_strength / (1.0 - DIELECTRIC_SPECULAR) + specular
        - 2.0 * DIELECTRIC_SPECULAR;
    let c = DIELECTRIC_SPECULAR - specular;
    let discriminant = (b * b - 4.0 * a * c).max(0.0);
    ((-b + discriminant.sqrt()) / (2.0 * a)).clamp(0.0, 1.0)
}

/// Nearest metallic/roughness values for a specular/glossiness material:
/// `(base_color, metallic, roughness)`.
pub fn specular_glossiness_to_metallic(
    diffuse: [f32; 4],
    specular: [f32; 3],
    glossiness: f32,
) -> ([f32; 4], f32, f32) {
    let one_minus_specular_strength = 1.0 - specular.iter().copied().fold(0.0, f32::max);
    let metallic = solve_metallic(
        perceived_brightness(rgb(diffuse)),
        perceived_brightness(specular),
        one_minus_specular_strength,
    );

    let mut base = [0.0, 0.0, 0.0, diffuse[3]];
    for channel in 0..3 {
        let from_diffuse = diffuse[channel] * one_minus_specular_strength
            / (1.0 - DIELECTRIC_SPECULAR)
            / (1.0 - metallic).max(f32::EPSILON);
        let from_specular = (specular[channel] - DIELECTRIC_SPECULAR * (1.0 - metallic))
            / metallic.max(f32::EPSILON);
        let blend = metallic * metallic;
        base[channel] = (from_diffuse + (from_specular - from_diffuse) * blend).clamp(0.0, 1.0);
    }
    (base, metallic, (1.0 - glossiness).clamp(0.0, 1.0))
}

// ─── Conversion ───────────────────────────────────────────────────────────────

/// Parameter names with no target equivalent, reported once per material.
#[derive(Default)]
struct Dropped(Vec<String>);

impl Dropped {
    fn push(&mut self, name: impl Into<String>) {
        let name = name.into();
        if !self.0.contains(&name) {
            self.0.push(name);
        }
    }

    fn report(self, index: usize, diagnostics: &mut Diagnostics) {
        if !self.0.is_empty() {
            diagnostics.warn(
                DiagnosticCode::UnsupportedMaterialParameter,
                EntityRef::Material(index),
                format!("dropped parameters: {}", self.0.join(", ")),
            );
        }
    }
}

fn lit_from_pbr(material: &MaterialDescriptor) -> ShadingModel {
    let pbr = material.pbr_metallic_roughness.clone().unwrap_or_default();
    ShadingModel::Lit {
        base_color_factor: pbr.base_color_factor.unwrap_or([1.0; 4]),
        base_color_texture: pbr.base_color_texture.as_ref().map(TextureRef::from_info),
        metallic_factor: pbr.metallic_factor.unwrap_or(1.0),
        roughness_factor: pbr.roughness_factor.unwrap_or(1.0),
        metallic_roughness_texture: pbr
            .metallic_roughness_texture
            .as_ref()
            .map(TextureRef::from_info),
    }
}

fn convert_specular_glossiness(extension: &Map<String, Value>, dropped: &mut Dropped) -> ShadingModel {
    let diffuse = extension
        .get("diffuseFactor")
        .and_then(Value::as_array)
        .map(|values| {
            let mut out = [1.0; 4];
            for (slot, value) in out.iter_mut().zip(values) {
                *slot = value.as_f64().map_or(1.0, |value| value as f32);
            }
            out
        })
        .unwrap_or([1.0; 4]);
    let specular = vec3(extension, "specularFactor", [1.0; 3]);
    let glossiness = number(extension, "glossinessFactor", 1.0);
    if extension.contains_key("specularGlossinessTexture") {
        dropped.push("specularGlossinessTexture");
    }
    if specular.iter().any(|&channel| (channel - specular[0]).abs() > f32::EPSILON) {
        dropped.push("specularFactor");
    }

    let (base_color_factor, metallic_factor, roughness_factor) =
        specular_glossiness_to_metallic(diffuse, specular, glossiness);
    ShadingModel::Lit {
        base_color_factor,
        base_color_texture: texture(extension, "diffuseTexture"),
        metallic_factor,
        roughness_factor,
        metallic_roughness_texture: None,
    }
}

fn convert_mtoon(
    material: &MaterialDescriptor,
    mtoon: &Map<String, Value>,
    dropped: &mut Dropped,
) -> ShadingModel {
    let pbr = material.pbr_metallic_roughness.clone().unwrap_or_default();
    for key in [
        "giEqualizationFactor",
        "matcapFactor",
        "matcapTexture",
        "uvAnimationMaskTexture",
        "uvAnimationScrollXSpeedFactor",
        "uvAnimationScrollYSpeedFactor",
        "uvAnimationRotationSpeedFactor",
    ] {
        if mtoon.contains_key(key) {
            dropped.push(key);
        }
    }
    let toon = ToonParameters {
        shade_color_factor: vec3(mtoon, "shadeColorFactor", [0.0; 3]),
        shade_multiply_texture: texture(mtoon, "shadeMultiplyTexture"),
        shading_shift_factor: number(mtoon, "shadingShiftFactor", 0.0),
        shading_shift_texture: texture(mtoon, "shadingShiftTexture"),
        shading_toony_factor: number(mtoon, "shadingToonyFactor", 0.9),
        parametric_rim_color_factor: vec3(mtoon, "parametricRimColorFactor", [0.0; 3]),
        parametric_rim_fresnel_power_factor: number(mtoon, "parametricRimFresnelPowerFactor", 5.0),
        parametric_rim_lift_factor: number(mtoon, "parametricRimLiftFactor", 0.0),
        rim_multiply_texture: texture(mtoon, "rimMultiplyTexture"),
        rim_lighting_mix_factor: number(mtoon, "rimLightingMixFactor", 1.0),
        outline_width_mode: match mtoon.get("outlineWidthMode").and_then(Value::as_str) {
            Some("worldCoordinates") => OutlineWidthMode::WorldCoordinates,
            Some("screenCoordinates") => OutlineWidthMode::ScreenCoordinates,
            _ => OutlineWidthMode::None,
        },
        outline_width_factor: number(mtoon, "outlineWidthFactor", 0.0),
        outline_width_multiply_texture: texture(mtoon, "outlineWidthMultiplyTexture"),
        outline_color_factor: vec3(mtoon, "outlineColorFactor", [0.0; 3]),
        outline_lighting_mix_factor: number(mtoon, "outlineLightingMixFactor", 1.0),
        transparent_with_z_write: mtoon
            .get("transparentWithZWrite")
            .and_then(Value::as_bool)
            .unwrap_or(false),
        render_queue_offset_number: mtoon
            .get("renderQueueOffsetNumber")
            .and_then(Value::as_i64)
            .and_then(|value| i32::try_from(value).ok())
            .unwrap_or(0),
    };
    ShadingModel::Toon {
        base_color_factor: pbr.base_color_factor.unwrap_or([1.0; 4]),
        base_color_texture: pbr.base_color_texture.as_ref().map(TextureRef::from_info),
        toon: Box::new(toon),
    }
}

/// VRM 0.x MToon: Unity shader properties, outline widths in centimeters.
fn convert_vrm0_mtoon(props: &Vrm0MaterialProperties, dropped: &mut Dropped) -> ShadingModel {
    let float = |key: &str, default: f32| props.float_properties.get(key).copied().unwrap_or(default);
    let tex = |key: &str| props.texture_properties.get(key).copied().map(TextureRef::from_index);

    for key in ["_SphereAdd", "_UvAnimMaskTexture"] {
        if props.texture_properties.contains_key(key) {
            dropped.push(key);
        }
    }
    for key in [
        "_IndirectLightIntensity",
        "_LightColorAttenuation",
        "_UvAnimScrollX",
        "_UvAnimScrollY",
        "_UvAnimRotation",
    ] {
        if props.float_properties.get(key).is_some_and(|value| *value != 0.0) {
            dropped.push(key);
        }
    }

    let toon = ToonParameters {
        shade_color_factor: rgb(vrm0_color(props, "_ShadeColor", [0.97, 0.81, 0.86, 1.0])),
        shade_multiply_texture: tex("_ShadeTexture"),
        shading_shift_factor: float("_ShadeShift", 0.0),
        shading_shift_texture: None,
        shading_toony_factor: float("_ShadeToony", 0.9),
        parametric_rim_color_factor: rgb(vrm0_color(props, "_RimColor", [0.0, 0.0, 0.0, 1.0])),
        parametric_rim_fresnel_power_factor: float("_RimFresnelPower", 1.0),
        parametric_rim_lift_factor: float("_RimLift", 0.0),
        rim_multiply_texture: tex("_RimTexture"),
        rim_lighting_mix_factor: float("_RimLightingMix", 0.0),
        outline_width_mode: match float("_OutlineWidthMode", 0.0) as i32 {
            1 => OutlineWidthMode::WorldCoordinates,
            2 => OutlineWidthMode::ScreenCoordinates,
            _ => OutlineWidthMode::None,
        },
        outline_width_factor: float("_OutlineWidth", 0.0) * 0.01,
        outline_width_multiply_texture: tex("_OutlineWidthTexture"),
        outline_color_factor: rgb(vrm0_color(props, "_OutlineColor", [0.0, 0.0, 0.0, 1.0])),
        outline_lighting_mix_factor: float("_OutlineLightingMix", 1.0),
        transparent_with_z_write: float("_BlendMode", 0.0) as i32 == 3,
        render_queue_offset_number: 0,
    };
    ShadingModel::Toon {
        base_color_factor: vrm0_color(props, "_Color", [1.0; 4]),
        base_color_texture: tex("_MainTex"),
        toon: Box::new(toon),
    }
}

fn vrm0_alpha_mode(props: &Vrm0MaterialProperties) -> AlphaMode {
    let float = |key: &str, default: f32| props.float_properties.get(key).copied().unwrap_or(default);
    match float("_BlendMode", 0.0) as i32 {
        1 => AlphaMode::Mask(float("_Cutoff", 0.5)),
        2 | 3 => AlphaMode::Blend,
        _ => AlphaMode::Opaque,
    }
}

/// Demote a toon material to `Lit`, keeping its base color.
fn toon_to_lit(shading: ShadingModel, dropped: &mut Dropped) -> ShadingModel {
    match shading {
        ShadingModel::Toon {
            base_color_factor,
            base_color_texture,
            ..
        } => {
            dropped.push("toon shading");
            ShadingModel::Lit {
                base_color_factor,
                base_color_texture,
                metallic_factor: 0.0,
                roughness_factor: 1.0,
                metallic_roughness_texture: None,
            }
        }
        other => other,
    }
}

fn vrm0_properties<'d>(
    document: &'d AssetDocument<'_>,
    index: usize,
    material: &MaterialDescriptor,
) -> Option<&'d Vrm0MaterialProperties> {
    let properties = &document.vrm.material_properties;
    material
        .name
        .as_deref()
        .and_then(|name| properties.iter().find(|props| props.name == name))
        .or_else(|| properties.get(index))
}

fn collect_texture_transforms(value: &Value, dropped: &mut Dropped) {
    match value {
        Value::Object(object) => {
            if object
                .get("extensions")
                .and_then(Value::as_object)
                .is_some_and(|extensions| extensions.contains_key(EXT_TEXTURE_TRANSFORM))
            {
                dropped.push(EXT_TEXTURE_TRANSFORM);
            }
            for child in object.values() {
                collect_texture_transforms(child, dropped);
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_texture_transforms(item, dropped);
            }
        }
        _ => {}
    }
}

fn texture_infos(material: &MaterialDescriptor) -> impl Iterator<Item = &TextureInfo> {
    let pbr = material.pbr_metallic_roughness.as_ref();
    [
        pbr.and_then(|pbr| pbr.base_color_texture.as_ref()),
        pbr.and_then(|pbr| pbr.metallic_roughness_texture.as_ref()),
        material.normal_texture.as_ref(),
        material.occlusion_texture.as_ref(),
        material.emissive_texture.as_ref(),
    ]
    .into_iter()
    .flatten()
}

fn convert_material(
    document: &AssetDocument<'_>,
    index: usize,
    settings: &MaterialSettings,
    diagnostics: &mut Diagnostics,
) -> MaterialAsset {
    let material = &document.materials[index];
    let mut dropped = Dropped::default();

    let mut alpha_mode = match material.alpha_mode.as_deref() {
        Some("MASK") => AlphaMode::Mask(material.alpha_cutoff.unwrap_or(0.5)),
        Some("BLEND") => AlphaMode::Blend,
        _ => AlphaMode::Opaque,
    };
    let mut double_sided = material.double_sided;
    let mut emissive_factor = material.emissive_factor.unwrap_or([0.0; 3]);

    let mtoon = material.extensions.get(EXT_MTOON).and_then(Value::as_object);
    let vrm0 = vrm0_properties(document, index, material);

    let mut shading = if let Some(mtoon) = mtoon {
        convert_mtoon(material, mtoon, &mut dropped)
    } else if let Some(props) = vrm0.filter(|props| props.shader == "VRM/MToon") {
        alpha_mode = vrm0_alpha_mode(props);
        double_sided = props.float_properties.get("_CullMode").copied() == Some(0.0);
        if props.vector_properties.contains_key("_EmissionColor") {
            emissive_factor = rgb(vrm0_color(props, "_EmissionColor", [0.0; 4]));
        }
        convert_vrm0_mtoon(props, &mut dropped)
    } else if material.extensions.contains_key(EXT_UNLIT)
        || vrm0.is_some_and(|props| props.shader.starts_with("VRM/Unlit"))
    {
        let pbr = material.pbr_metallic_roughness.clone().unwrap_or_default();
        ShadingModel::Unlit {
            base_color_factor: pbr.base_color_factor.unwrap_or([1.0; 4]),
            base_color_texture: pbr.base_color_texture.as_ref().map(TextureRef::from_info),
        }
    } else if let Some(spec_gloss) = material.extensions.get(EXT_SPEC_GLOSS).and_then(Value::as_object) {
        convert_specular_glossiness(spec_gloss, &mut dropped)
    } else {
        lit_from_pbr(material)
    };

    if !settings.allow_toon {
        shading = toon_to_lit(shading, &mut dropped);
    }

    if let Some(strength) = material
        .extensions
        .get(EXT_EMISSIVE_STRENGTH)
        .and_then(|extension| extension.get("emissiveStrength"))
        .and_then(Value::as_f64)
    {
        for channel in &mut emissive_factor {
            *channel *= strength as f32;
        }
    }

    for name in material.extensions.keys() {
        if ![EXT_MTOON, EXT_UNLIT, EXT_SPEC_GLOSS, EXT_EMISSIVE_STRENGTH].contains(&name.as_str()) {
            dropped.push(name.clone());
        }
    }
    for info in texture_infos(material) {
        if info.extensions.contains_key(EXT_TEXTURE_TRANSFORM) {
            dropped.push(EXT_TEXTURE_TRANSFORM);
        }
    }
    for extension in material.extensions.values() {
        collect_texture_transforms(extension, &mut dropped);
    }

    let vrm0_texture = |key: &str| {
        vrm0.filter(|props| props.shader == "VRM/MToon")
            .and_then(|props| props.texture_properties.get(key).copied())
            .map(TextureRef::from_index)
    };
    let vrm0_bump_scale = vrm0
        .and_then(|props| props.float_properties.get("_BumpScale").copied())
        .unwrap_or(1.0);

    dropped.report(index, diagnostics);
    MaterialAsset {
        name: material.name.clone(),
        shading,
        normal_texture: material
            .normal_texture
            .as_ref()
            .map(TextureRef::from_info)
            .or_else(|| {
                vrm0_texture("_BumpMap").map(|texture| TextureRef {
                    scale: vrm0_bump_scale,
                    ..texture
                })
            }),
        occlusion_texture: material.occlusion_texture.as_ref().map(TextureRef::from_info),
        emissive_texture: material
            .emissive_texture
            .as_ref()
            .map(TextureRef::from_info)
            .or_else(|| vrm0_texture("_EmissionMap")),
        emissive_factor,
        alpha_mode,
        double_sided,
    }
}

/// Convert every material, in document order.
pub fn assemble_materials(
    document: &AssetDocument<'_>,
    settings: &MaterialSettings,
    diagnostics: &mut Diagnostics,
) -> Vec<MaterialAsset> {
    (0..document.materials.len())
        .map(|index| convert_material(document, index, settings, diagnostics))
        .collect()
}
