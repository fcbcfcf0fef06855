use std::{fs, path::Path};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::{assemble::texture::ResizeInterpolation, retarget::RigConvention};

/// Vertical axis of the target coordinate system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum UpAxis {
    #[default]
    Y,
    Z,
}

/// Handedness of the target coordinate system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Handedness {
    #[default]
    Right,
    Left,
}

/// Global axis and unit settings applied to every imported value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinateSettings {
    pub up_axis: UpAxis,
    pub handedness: Handedness,
    /// Target units per source meter.
    pub unit_scale: f32,
    /// Turn VRM 0.x avatars (which face -Z) to face +Z like VRM 1.0.
    pub face_forward_vrm0: bool,
}

impl Default for CoordinateSettings {
    fn default() -> Self {
        Self {
            up_axis: UpAxis::Y,
            handedness: Handedness::Right,
            unit_scale: 1.0,
            face_forward_vrm0: false,
        }
    }
}

/// Material conversion settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MaterialSettings {
    /// When false, MToon materials fall back to lit PBR.
    pub allow_toon: bool,
}

impl Default for MaterialSettings {
    fn default() -> Self {
        Self { allow_toon: true }
    }
}

/// Texture post-processing settings.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TextureSettings {
    /// Maximum texture edge in pixels; `None` keeps source sizes.
    pub max_size: Option<u32>,
    pub resize_method: ResizeInterpolation,
}

/// Host-supplied configuration shared read-only by every import.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportSettings {
    pub coordinates: CoordinateSettings,
    pub rig: RigConvention,
    pub materials: MaterialSettings,
    pub textures: TextureSettings,
    /// When false, documents without a VRM humanoid import without retargeting.
    pub require_humanoid: bool,
}

impl Default for ImportSettings {
    fn default() -> Self {
        Self {
            coordinates: CoordinateSettings::default(),
            rig: RigConvention::default(),
            materials: MaterialSettings::default(),
            textures: TextureSettings::default(),
            require_humanoid: true,
        }
    }
}

/// Save import settings to a JSON file.
pub fn save_import_settings(path: &Path, settings: &ImportSettings) -> Result<()> {
    let content = serde_json::to_string_pretty(settings)
        .context("failed to serialize import settings as JSON")?;
    fs::write(path, content)
        .with_context(|| format!("failed to save import settings: {}", path.display()))?;
    Ok(())
}

/// Load import settings from a JSON file. Missing fields take their defaults.
pub fn load_import_settings(path: &Path) -> Result<ImportSettings> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to load import settings: {}", path.display()))?;
    let settings: ImportSettings =
        serde_json::from_str(&content).context("failed to parse import settings JSON")?;
    Ok(settings)
}

/// Load a rig convention table from a JSON file.
pub fn load_rig_convention(path: &Path) -> Result<RigConvention> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to load rig convention: {}", path.display()))?;
    let rig: RigConvention =
        serde_json::from_str(&content).context("failed to parse rig convention JSON")?;
    Ok(rig)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn given_default_settings_when_serialize_then_json_contains_unit_scale() {
        let settings = ImportSettings::default();
        let json = serde_json::to_string(&settings).expect("serialize settings");
        assert!(json.contains("unit_scale"));
        assert!(json.contains("require_humanoid"));
    }

    #[test]
    fn given_partial_json_when_parsed_then_missing_fields_use_defaults() {
        let settings: ImportSettings = serde_json::from_str(
            r#"{ "coordinates": { "up_axis": "Z", "unit_scale": 100.0 } }"#,
        )
        .expect("parse settings");

        assert_eq!(settings.coordinates.up_axis, UpAxis::Z);
        assert_eq!(settings.coordinates.handedness, Handedness::Right);
        assert_eq!(settings.coordinates.unit_scale, 100.0);
        assert!(settings.materials.allow_toon);
        assert!(settings.require_humanoid);
    }

    #[test]
    fn given_saved_settings_when_loaded_then_values_survive() {
        let dir = std::env::temp_dir().join(format!("vrm-import-settings-{}", std::process::id()));
        fs::create_dir_all(&dir).expect("create temp dir");
        let path = dir.join("settings.json");

        let mut settings = ImportSettings::default();
        settings.textures.max_size = Some(1024);
        settings.textures.resize_method = ResizeInterpolation::Lanczos3;
        save_import_settings(&path, &settings).expect("save settings");

        let loaded = load_import_settings(&path).expect("load settings");
        assert_eq!(loaded, settings);

        let _ = fs::remove_dir_all(&dir);
    }
}
