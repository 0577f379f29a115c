use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub vsync: bool,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self { title: "Heron Engine".to_string(), width: 1280, height: 720, vsync: true }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "StoreConfig::default_root")]
    pub root: PathBuf,
    #[serde(default = "StoreConfig::default_budget_bytes")]
    pub budget_bytes: u64,
}

impl StoreConfig {
    fn default_root() -> PathBuf {
        PathBuf::from("cache/assets")
    }

    const fn default_budget_bytes() -> u64 {
        512 * 1024 * 1024
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self { root: Self::default_root(), budget_bytes: Self::default_budget_bytes() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CameraConfig {
    #[serde(default = "CameraConfig::default_fov_degrees")]
    pub fov_degrees: f32,
    #[serde(default = "CameraConfig::default_near")]
    pub near: f32,
    #[serde(default = "CameraConfig::default_far")]
    pub far: f32,
    #[serde(default = "CameraConfig::default_position")]
    pub position: [f32; 3],
    #[serde(default)]
    pub target: [f32; 3],
}

impl CameraConfig {
    const fn default_fov_degrees() -> f32 {
        50.0
    }

    const fn default_near() -> f32 {
        0.1
    }

    const fn default_far() -> f32 {
        2000.0
    }

    const fn default_position() -> [f32; 3] {
        [0.0, 5.0, 10.0]
    }
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            fov_degrees: Self::default_fov_degrees(),
            near: Self::default_near(),
            far: Self::default_far(),
            position: Self::default_position(),
            target: [0.0; 3],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HelperConfig {
    #[serde(default = "HelperConfig::default_light_helpers_visible")]
    pub light_helpers_visible: bool,
}

impl HelperConfig {
    const fn default_light_helpers_visible() -> bool {
        true
    }
}

impl Default for HelperConfig {
    fn default() -> Self {
        Self { light_helpers_visible: Self::default_light_helpers_visible() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct GridConfig {
    #[serde(default = "GridConfig::default_visible")]
    pub visible: bool,
    #[serde(default = "GridConfig::default_extent")]
    pub extent: f32,
    #[serde(default = "GridConfig::default_step")]
    pub step: f32,
}

impl GridConfig {
    const fn default_visible() -> bool {
        true
    }

    const fn default_extent() -> f32 {
        20.0
    }

    const fn default_step() -> f32 {
        1.0
    }
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            visible: Self::default_visible(),
            extent: Self::default_extent(),
            step: Self::default_step(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub window: WindowConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub camera: CameraConfig,
    #[serde(default)]
    pub helpers: HelperConfig,
    #[serde(default)]
    pub grid: GridConfig,
}

impl EngineConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read engine config at {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse engine config at {}", path.display()))
    }

    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        match Self::load(path.as_ref()) {
            Ok(config) => config,
            Err(err) => {
                log::warn!("[config] falling back to defaults: {err:?}");
                Self::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_json_fills_every_default() {
        let config: EngineConfig = serde_json::from_str("{}").expect("empty config parses");
        assert_eq!(config.window.width, 1280);
        assert!(config.store.budget_bytes > 0);
        assert!(config.helpers.light_helpers_visible);
        assert!(config.grid.visible);
    }

    #[test]
    fn partial_override_keeps_other_sections() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"grid": {"visible": false}}"#).expect("parses");
        assert!(!config.grid.visible);
        assert!((config.grid.extent - 20.0).abs() < f32::EPSILON);
        assert_eq!(config.camera.fov_degrees, 50.0);
    }
}
