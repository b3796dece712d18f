//! Configuration for the Nebula lightmap baker.
//!
//! One RON file holds the bake settings, the log filter and the debug image
//! output. Every section is `#[serde(default)]`, so partial or older files
//! still load.

mod config;
mod error;

pub use config::{
    CONFIG_FILE_NAME, Config, DebugOutputConfig, LightmapBakingSettings, LogConfig,
    default_config_dir,
};
pub use error::ConfigError;
