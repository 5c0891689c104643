//! Configuration management

use anyhow::{bail, Result};
use serde::Deserialize;
use std::time::Duration;

use crate::adapters::lms::connection::DEFAULT_CLI_PORT;
use crate::adapters::lms::dispatch::DEFAULT_VOLUME_STEP;
use crate::adapters::lms::registry::DEFAULT_BROADCAST_TARGET;
use crate::adapters::lms::status::{NestedBlock, StatusSchema};
use crate::adapters::lms::ControllerOptions;

#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub lms: LmsConfig,

    /// Player targeted by `/play`, `/volup`, ... (human name or native id)
    #[serde(default)]
    pub default_player: Option<String>,

    #[serde(default = "default_volume_step")]
    pub volume_step: u8,

    #[serde(default)]
    pub status: StatusConfig,
}

fn default_port() -> u16 {
    80
}

fn default_volume_step() -> u8 {
    DEFAULT_VOLUME_STEP
}

#[derive(Debug, Deserialize)]
pub struct LmsConfig {
    #[serde(default = "default_lms_host")]
    pub host: String,
    #[serde(default = "default_lms_port")]
    pub port: u16,
    #[serde(default = "default_timeout_ms")]
    pub io_timeout_ms: u64,
    #[serde(default = "default_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_broadcast_target")]
    pub broadcast_target: String,
}

impl Default for LmsConfig {
    fn default() -> Self {
        Self {
            host: default_lms_host(),
            port: default_lms_port(),
            io_timeout_ms: default_timeout_ms(),
            connect_timeout_ms: default_timeout_ms(),
            broadcast_target: default_broadcast_target(),
        }
    }
}

impl LmsConfig {
    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

fn default_lms_host() -> String {
    "127.0.0.1".to_string()
}

fn default_lms_port() -> u16 {
    DEFAULT_CLI_PORT
}

fn default_timeout_ms() -> u64 {
    5000
}

fn default_broadcast_target() -> String {
    DEFAULT_BROADCAST_TARGET.to_string()
}

/// Overrides for the status parser key sets (server-version differences)
#[derive(Debug, Default, Deserialize)]
pub struct StatusConfig {
    pub nested_blocks: Option<Vec<NestedBlock>>,
    pub list_keys: Option<Vec<String>>,
}

impl StatusConfig {
    pub fn schema(&self) -> StatusSchema {
        let mut schema = StatusSchema::default();
        if let Some(blocks) = &self.nested_blocks {
            schema.nested_blocks = blocks.clone();
        }
        if let Some(keys) = &self.list_keys {
            schema.list_keys = keys.clone();
        }
        schema
    }
}

impl Config {
    pub fn controller_options(&self) -> ControllerOptions {
        ControllerOptions {
            broadcast_target: self.lms.broadcast_target.clone(),
            volume_step: self.volume_step,
            default_player: self.default_player.clone(),
            schema: self.status.schema(),
        }
    }
}

/// Get config directory (LMSB_CONFIG_DIR or platform default)
pub fn get_config_dir() -> std::path::PathBuf {
    if let Ok(dir) = std::env::var("LMSB_CONFIG_DIR") {
        return std::path::PathBuf::from(dir);
    }

    #[cfg(target_os = "macos")]
    {
        if let Ok(home) = std::env::var("HOME") {
            return std::path::PathBuf::from(home).join("Library/Application Support/lms-rest-bridge");
        }
    }

    #[cfg(target_os = "linux")]
    {
        if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
            return std::path::PathBuf::from(xdg).join("lms-rest-bridge");
        }
        if let Ok(home) = std::env::var("HOME") {
            return std::path::PathBuf::from(home).join(".config/lms-rest-bridge");
        }
    }

    #[cfg(target_os = "windows")]
    {
        if let Ok(appdata) = std::env::var("APPDATA") {
            return std::path::PathBuf::from(appdata).join("lms-rest-bridge");
        }
    }

    // Fallback to current directory
    std::path::PathBuf::from(".")
}

pub fn load_config() -> Result<Config> {
    let config_dir = get_config_dir();

    let mut builder = ::config::Config::builder()
        .set_default("port", default_port() as i64)?
        // Load from config file if it exists
        .add_source(
            ::config::File::with_name(&config_dir.join("config").to_string_lossy()).required(false),
        )
        // Override with environment variables (LMSB_PORT, LMSB_LMS__HOST, etc.)
        .add_source(
            ::config::Environment::with_prefix("LMSB")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

    // Explicit precedence: LMSB_PORT > PORT > config > default
    if let Ok(port) = std::env::var("LMSB_PORT") {
        if let Ok(port_num) = port.parse::<u16>() {
            builder = builder.set_override("port", port_num as i64)?;
        }
    } else if let Ok(port) = std::env::var("PORT") {
        // Legacy PORT fallback (Docker deployments)
        if let Ok(port_num) = port.parse::<u16>() {
            builder = builder.set_override("port", port_num as i64)?;
        }
    }

    // Legacy unprefixed variables
    if let Ok(host) = std::env::var("LMS_HOST") {
        builder = builder.set_override("lms.host", host)?;
    }
    if let Ok(port) = std::env::var("LMS_PORT") {
        if let Ok(port_num) = port.parse::<u16>() {
            builder = builder.set_override("lms.port", port_num as i64)?;
        }
    }
    if let Ok(player) = std::env::var("DEFAULT_PLAYER") {
        builder = builder.set_override("default_player", player)?;
    }
    if let Ok(step) = std::env::var("VOLUMESTEP") {
        // Left as a string so a malformed value fails deserialization
        builder = builder.set_override("volume_step", step)?;
    }

    let config: Config = builder.build()?.try_deserialize()?;

    if !(1..=100).contains(&config.volume_step) {
        bail!(
            "volume_step must be between 1 and 100, got {}",
            config.volume_step
        );
    }
    if config.lms.host.trim().is_empty() {
        bail!("lms.host must not be empty");
    }
    if config.lms.broadcast_target.trim().is_empty() {
        bail!("lms.broadcast_target must not be empty");
    }

    Ok(config)
}
