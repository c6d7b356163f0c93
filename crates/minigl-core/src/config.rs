//! Engine configuration and JSON loading helpers.

use std::fs;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::EngineError;

/// Upper bound on simultaneous color targets for a single pass.
pub const MAX_COLOR_TARGETS: u32 = 4;

/// Pixel format of node backing textures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextureFormat {
    #[default]
    Rgba8,
    Rgba16f,
}

impl TextureFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            TextureFormat::Rgba8 => 4,
            TextureFormat::Rgba16f => 8,
        }
    }
}

/// Top-level engine settings. Every key is optional in JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Initial surface width in texels.
    pub width: u32,
    /// Initial surface height in texels.
    pub height: u32,
    pub texture_format: TextureFormat,
    /// Clear color used before every node pass.
    pub clear_color: [f32; 4],
    /// Cap for multi-output nodes (1..=4).
    pub max_color_targets: u32,
    /// `tracing-subscriber` filter used when `RUST_LOG` is unset.
    pub log_filter: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            width: 512,
            height: 512,
            texture_format: TextureFormat::Rgba8,
            clear_color: [0.0, 0.0, 0.0, 0.0],
            max_color_targets: MAX_COLOR_TARGETS,
            log_filter: "info".to_string(),
        }
    }
}

impl EngineConfig {
    /// Checks value ranges. `origin` is only used to label the error.
    pub fn validate(&self, origin: &Path) -> Result<(), EngineError> {
        if self.width == 0 || self.height == 0 {
            return Err(EngineError::InvalidConfig {
                path: origin.to_path_buf(),
                msg: format!("surface size must be > 0, got {}x{}", self.width, self.height),
            });
        }
        if self.max_color_targets == 0 || self.max_color_targets > MAX_COLOR_TARGETS {
            return Err(EngineError::InvalidConfig {
                path: origin.to_path_buf(),
                msg: format!(
                    "max_color_targets must be within 1..={MAX_COLOR_TARGETS}, got {}",
                    self.max_color_targets
                ),
            });
        }
        Ok(())
    }
}

/// Reads `path` and deserializes it as `T`.
pub fn load_typed_json<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T, EngineError> {
    let path = path.as_ref();
    let text = fs::read_to_string(path).map_err(|source| EngineError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_typed_json(&text, path)
}

/// Parses JSON text that came from `origin` (used for error messages only).
pub fn parse_typed_json<T: DeserializeOwned>(text: &str, origin: &Path) -> Result<T, EngineError> {
    serde_json::from_str(text).map_err(|source| EngineError::Json {
        path: PathBuf::from(origin),
        source,
    })
}

/// Loads and validates an [`EngineConfig`].
pub fn load_engine_config_from(path: impl AsRef<Path>) -> Result<EngineConfig, EngineError> {
    let path = path.as_ref();
    let cfg: EngineConfig = load_typed_json(path)?;
    cfg.validate(path)?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_keys_take_defaults() {
        let cfg: EngineConfig =
            parse_typed_json(r#"{ "width": 256 }"#, Path::new("inline")).unwrap();
        assert_eq!(cfg.width, 256);
        assert_eq!(cfg.height, 512);
        assert_eq!(cfg.texture_format, TextureFormat::Rgba8);
        assert_eq!(cfg.max_color_targets, MAX_COLOR_TARGETS);
    }

    #[test]
    fn format_uses_snake_case() {
        let cfg: EngineConfig =
            parse_typed_json(r#"{ "texture_format": "rgba16f" }"#, Path::new("inline")).unwrap();
        assert_eq!(cfg.texture_format, TextureFormat::Rgba16f);
        assert_eq!(cfg.texture_format.bytes_per_pixel(), 8);
    }

    #[test]
    fn zero_size_is_rejected() {
        let cfg = EngineConfig {
            width: 0,
            ..EngineConfig::default()
        };
        let err = cfg.validate(Path::new("cfg.json")).unwrap_err();
        assert!(err.to_string().contains("surface size"), "{err}");
    }

    #[test]
    fn too_many_targets_is_rejected() {
        let cfg = EngineConfig {
            max_color_targets: 5,
            ..EngineConfig::default()
        };
        assert!(cfg.validate(Path::new("cfg.json")).is_err());
    }

    #[test]
    fn unreadable_file_reports_io() {
        let err = load_engine_config_from("/definitely/not/here.json").unwrap_err();
        assert!(matches!(err, EngineError::Io { .. }));
    }
}
