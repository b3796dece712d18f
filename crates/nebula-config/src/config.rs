//! Bake, logging and debug-output settings, persisted as `config.ron`.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Top-level baker configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Lightmap baking settings.
    pub bake: LightmapBakingSettings,
    /// Logging settings.
    pub log: LogConfig,
    /// Debug image output.
    pub debug: DebugOutputConfig,
}

/// Settings controlling lightmap resolution and light transport quality.
///
/// Resolutions derived from these settings are always clamped to
/// `[min_resolution, max_resolution]` and rounded to a power of two; no
/// value here is ever rejected.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LightmapBakingSettings {
    /// Texels per world unit of bounding-box diagonal.
    pub resolution_scale: f32,
    /// Smallest lightmap edge in texels.
    pub min_resolution: u32,
    /// Largest lightmap edge in texels.
    pub max_resolution: u32,
    /// Number of indirect gather iterations (0 = direct lighting only).
    pub indirect_lighting_bounces: u32,
    /// Hemisphere samples per texel for every bounce except the last.
    pub sample_count: u32,
    /// Hemisphere samples per texel for the last bounce.
    pub final_gather_sample_count: u32,
    /// Offset along the surface normal applied to ray origins.
    pub shadow_bias: f32,
    /// Geometry buffers are rasterized at this multiple of the lightmap size.
    pub super_sample_factor: u32,
    /// Texel worker threads (0 = one per logical CPU).
    pub worker_threads: usize,
    /// Base seed of the per-texel random streams.
    pub seed: u64,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LogConfig {
    /// Filter directive (e.g. "info", "debug,nebula_lightmap=trace").
    pub level: String,
    /// Also write JSON logs to a file in debug builds.
    pub json_file: bool,
}

/// Optional diagnostic image output.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DebugOutputConfig {
    /// Directory that receives PNG dumps after a bake. `None` disables dumps.
    pub dump_dir: Option<PathBuf>,
    /// Dump the rasterized diffuse maps alongside the lightmaps.
    pub dump_diffuse_maps: bool,
}

impl Default for LightmapBakingSettings {
    fn default() -> Self {
        Self {
            resolution_scale: 10.0,
            min_resolution: 16,
            max_resolution: 1024,
            indirect_lighting_bounces: 1,
            sample_count: 32,
            final_gather_sample_count: 256,
            shadow_bias: 0.05,
            super_sample_factor: 1,
            worker_threads: 0,
            seed: 0x5eed,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_file: false,
        }
    }
}

/// Platform config directory for the baker (e.g. `~/.config/nebula-lightmap`).
pub fn default_config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("nebula-lightmap"))
}

/// File name of the persisted config inside its directory.
pub const CONFIG_FILE_NAME: &str = "config.ron";

fn read_config(path: &Path) -> Result<Config, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(ConfigError::Read)?;
    ron::from_str(&text).map_err(ConfigError::Parse)
}

impl Config {
    /// Read `config.ron` from `config_dir`, writing the defaults there first
    /// if it does not exist yet.
    pub fn load_or_create(config_dir: &Path) -> Result<Self, ConfigError> {
        let path = config_dir.join(CONFIG_FILE_NAME);
        if !path.exists() {
            let defaults = Self::default();
            defaults.save(config_dir)?;
            log::info!("Wrote default bake config to {}", path.display());
            return Ok(defaults);
        }
        let config = read_config(&path)?;
        log::info!("Loaded bake config from {}", path.display());
        Ok(config)
    }

    /// Write this config to `config_dir/config.ron`, creating the directory.
    pub fn save(&self, config_dir: &Path) -> Result<(), ConfigError> {
        std::fs::create_dir_all(config_dir).map_err(ConfigError::Write)?;
        let pretty = ron::ser::PrettyConfig::new()
            .depth_limit(2)
            .struct_names(false);
        let text = ron::ser::to_string_pretty(self, pretty).map_err(ConfigError::Serialize)?;
        std::fs::write(config_dir.join(CONFIG_FILE_NAME), text).map_err(ConfigError::Write)
    }

    /// Re-read the file. Returns the new config only when it differs from `self`.
    pub fn reload(&self, config_dir: &Path) -> Result<Option<Self>, ConfigError> {
        let fresh = read_config(&config_dir.join(CONFIG_FILE_NAME))?;
        if fresh == *self {
            return Ok(None);
        }
        log::info!("Bake config changed on disk");
        Ok(Some(fresh))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_values() {
        let bake = LightmapBakingSettings::default();
        assert_eq!((bake.min_resolution, bake.max_resolution), (16, 1024));
        assert_eq!(bake.indirect_lighting_bounces, 1);
        assert_eq!(bake.final_gather_sample_count, 256);
        assert_eq!(bake.super_sample_factor, 1);
        assert_eq!(bake.worker_threads, 0);
        assert!(bake.min_resolution.is_power_of_two() && bake.max_resolution.is_power_of_two());
        assert!(Config::default().debug.dump_dir.is_none());
    }

    #[test]
    fn test_partial_file_fills_in_defaults() {
        let text = "(bake: (indirect_lighting_bounces: 3, seed: 7), debug: (dump_diffuse_maps: true))";
        let config: Config = ron::from_str(text).unwrap();
        assert_eq!(config.bake.indirect_lighting_bounces, 3);
        assert_eq!(config.bake.seed, 7);
        assert_eq!(config.bake.sample_count, 32);
        assert!(config.debug.dump_diffuse_maps);
        assert_eq!(config.log, LogConfig::default());
    }

    #[test]
    fn test_debug_dir_survives_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.bake.resolution_scale = 2.5;
        config.bake.shadow_bias = 0.01;
        config.log.level = "debug,nebula_lightmap=trace".into();
        config.debug.dump_dir = Some(PathBuf::from("bake-out"));

        config.save(dir.path()).unwrap();
        assert_eq!(Config::load_or_create(dir.path()).unwrap(), config);
    }

    #[test]
    fn test_first_load_writes_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("nebula-lightmap");
        assert_eq!(Config::load_or_create(&nested).unwrap(), Config::default());
        assert!(nested.join(CONFIG_FILE_NAME).is_file());
    }

    #[test]
    fn test_reload_reports_only_changes() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::default();
        config.save(dir.path()).unwrap();
        assert!(config.reload(dir.path()).unwrap().is_none());

        let mut edited = config.clone();
        edited.bake.final_gather_sample_count = 1024;
        edited.save(dir.path()).unwrap();
        let reloaded = config.reload(dir.path()).unwrap().unwrap();
        assert_eq!(reloaded.bake.final_gather_sample_count, 1024);
    }

    #[test]
    fn test_malformed_file_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE_NAME), "(bake: [1, 2").unwrap();
        assert!(matches!(
            Config::load_or_create(dir.path()),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_reload_without_file_is_a_read_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            Config::default().reload(dir.path()),
            Err(ConfigError::Read(_))
        ));
    }
}
