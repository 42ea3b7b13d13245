//! Renderer configuration.
//!
//! Settings come from three layers, later layers winning:
//!
//! 1. [`RendererConfig::default`]
//! 2. A TOML file named by [`CONFIG_PATH_ENV`] (`DEFERRED_CONFIG`)
//! 3. Individual `DEFERRED_*` environment overrides
//!
//! # Example
//!
//! ```
//! use deferred_core::RendererConfig;
//!
//! let config: RendererConfig = toml::from_str("frames_in_flight = 3\nexposure = 1.5").unwrap();
//! assert_eq!(config.frames_in_flight, 3);
//! assert_eq!(config.window_width, 1280);
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{Error, Result};

/// Environment variable naming a TOML config file.
pub const CONFIG_PATH_ENV: &str = "DEFERRED_CONFIG";

const MAX_FRAMES_IN_FLIGHT: usize = 3;
const MAX_CUBE_FACE_SIZE: u32 = 4096;

/// Tone-mapping curve applied when resolving HDR to the surface.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToneMapOperator {
    #[default]
    Aces,
    Reinhard,
    Clamp,
}

impl ToneMapOperator {
    /// Index passed to the tone-mapping shader.
    pub fn shader_index(self) -> u32 {
        match self {
            ToneMapOperator::Aces => 0,
            ToneMapOperator::Reinhard => 1,
            ToneMapOperator::Clamp => 2,
        }
    }

    /// Next operator in a fixed cycle, used by the viewer's key binding.
    pub fn next(self) -> Self {
        match self {
            ToneMapOperator::Aces => ToneMapOperator::Reinhard,
            ToneMapOperator::Reinhard => ToneMapOperator::Clamp,
            ToneMapOperator::Clamp => ToneMapOperator::Aces,
        }
    }
}

/// Renderer settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    pub window_width: u32,
    pub window_height: u32,
    pub window_title: String,
    /// Number of frame slots recorded ahead of the GPU.
    pub frames_in_flight: usize,
    pub enable_validation: bool,
    /// Directory holding compiled SPIR-V shaders.
    pub shader_dir: PathBuf,
    pub exposure: f32,
    pub tone_mapping: ToneMapOperator,
    /// Face size of the environment cube map.
    pub environment_size: u32,
    /// Face size of the irradiance cube map.
    pub irradiance_size: u32,
    pub log_filter: Option<String>,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            window_width: 1280,
            window_height: 720,
            window_title: "Deferred Renderer".to_string(),
            frames_in_flight: 2,
            enable_validation: cfg!(debug_assertions),
            shader_dir: PathBuf::from("shaders/spirv"),
            exposure: 1.0,
            tone_mapping: ToneMapOperator::Aces,
            environment_size: 256,
            irradiance_size: 32,
            log_filter: None,
        }
    }
}

impl RendererConfig {
    /// Loads a TOML config file. Missing keys keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&text)?;
        info!("Loaded renderer config from {:?}", path);
        Ok(config.validated())
    }

    /// Builds the config from the process environment.
    ///
    /// # Errors
    ///
    /// Returns an error if `DEFERRED_CONFIG` names an unreadable or invalid file,
    /// or if an override cannot be parsed.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an injectable variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let base = match lookup(CONFIG_PATH_ENV) {
            Some(path) => Self::load(Path::new(&path))?,
            None => Self::default(),
        };
        Ok(base.with_overrides(lookup)?.validated())
    }

    fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(value) = lookup("DEFERRED_FRAMES_IN_FLIGHT") {
            self.frames_in_flight = parse_var("DEFERRED_FRAMES_IN_FLIGHT", &value)?;
        }
        if let Some(value) = lookup("DEFERRED_VALIDATION") {
            self.enable_validation = matches!(value.as_str(), "1" | "true" | "on" | "yes");
        }
        if let Some(value) = lookup("DEFERRED_SHADER_DIR") {
            self.shader_dir = PathBuf::from(value);
        }
        if let Some(value) = lookup("DEFERRED_EXPOSURE") {
            self.exposure = parse_var("DEFERRED_EXPOSURE", &value)?;
        }
        Ok(self)
    }

    /// Clamps out-of-range values, logging each correction.
    pub fn validated(mut self) -> Self {
        if !(1..=MAX_FRAMES_IN_FLIGHT).contains(&self.frames_in_flight) {
            let clamped = self.frames_in_flight.clamp(1, MAX_FRAMES_IN_FLIGHT);
            warn!(
                "frames_in_flight {} out of range, using {}",
                self.frames_in_flight, clamped
            );
            self.frames_in_flight = clamped;
        }
        if !self.exposure.is_finite() || self.exposure <= 0.0 {
            warn!("exposure {} is not positive, using 1.0", self.exposure);
            self.exposure = 1.0;
        }
        if self.window_width == 0 || self.window_height == 0 {
            warn!("window size must be non-zero, using 1280x720");
            self.window_width = 1280;
            self.window_height = 720;
        }
        self.environment_size = cube_face_size(self.environment_size);
        self.irradiance_size = cube_face_size(self.irradiance_size);
        self
    }

    /// Multiplies the exposure, keeping it within a sane range.
    pub fn scale_exposure(&mut self, factor: f32) {
        self.exposure = (self.exposure * factor).clamp(0.01, 64.0);
    }

    /// Path of a compiled shader inside [`shader_dir`](Self::shader_dir).
    pub fn shader_path(&self, name: &str) -> PathBuf {
        self.shader_dir.join(format!("{name}.spv"))
    }
}

/// Rounds a cube face size up to a power of two within `8..=MAX_CUBE_FACE_SIZE`.
fn cube_face_size(size: u32) -> u32 {
    size.clamp(8, MAX_CUBE_FACE_SIZE).next_power_of_two()
}

fn parse_var<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::Config(format!("{key}: cannot parse '{value}'")))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::io::Write;

    use super::*;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = RendererConfig::default();
        assert_eq!(config.frames_in_flight, 2);
        assert_eq!(config.tone_mapping, ToneMapOperator::Aces);
        assert_eq!(config.shader_path("depth.vert"), PathBuf::from("shaders/spirv/depth.vert.spv"));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: RendererConfig =
            toml::from_str("tone_mapping = \"reinhard\"\nwindow_width = 800").unwrap();
        assert_eq!(config.tone_mapping, ToneMapOperator::Reinhard);
        assert_eq!(config.window_width, 800);
        assert_eq!(config.window_height, 720);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "frames_in_flight = 3\nexposure = 2.0").unwrap();

        let config = RendererConfig::load(file.path()).unwrap();
        assert_eq!(config.frames_in_flight, 3);
        assert_eq!(config.exposure, 2.0);
    }

    #[test]
    fn test_load_rejects_malformed_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "frames_in_flight = \"many\"").unwrap();

        assert!(matches!(
            RendererConfig::load(file.path()),
            Err(Error::Parse(_))
        ));
    }

    #[test]
    fn test_env_overrides_apply_after_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "frames_in_flight = 3\nexposure = 2.0").unwrap();
        let path = file.path().to_string_lossy().to_string();

        let config = RendererConfig::from_lookup(lookup_from(&[
            (CONFIG_PATH_ENV, path.as_str()),
            ("DEFERRED_EXPOSURE", "0.5"),
            ("DEFERRED_VALIDATION", "off"),
        ]))
        .unwrap();

        assert_eq!(config.frames_in_flight, 3);
        assert_eq!(config.exposure, 0.5);
        assert!(!config.enable_validation);
    }

    #[test]
    fn test_bad_override_is_config_error() {
        let result =
            RendererConfig::from_lookup(lookup_from(&[("DEFERRED_FRAMES_IN_FLIGHT", "two")]));
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_validated_clamps_values() {
        let config = RendererConfig {
            frames_in_flight: 9,
            exposure: -1.0,
            environment_size: 100,
            ..Default::default()
        }
        .validated();

        assert_eq!(config.frames_in_flight, 3);
        assert_eq!(config.exposure, 1.0);
        assert_eq!(config.environment_size, 128);
    }

    #[test]
    fn test_huge_cube_sizes_are_capped() {
        let config: RendererConfig =
            toml::from_str("environment_size = 4294967295\nirradiance_size = 2147483649").unwrap();
        let config = config.validated();
        assert_eq!(config.environment_size, 4096);
        assert_eq!(config.irradiance_size, 4096);
    }

    #[test]
    fn test_tone_map_cycle() {
        let op = ToneMapOperator::Aces;
        assert_eq!(op.next().next().next(), op);
        assert_eq!(ToneMapOperator::Clamp.shader_index(), 2);
    }
}
