use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SentrycamConfig {
    pub remote: RemoteConfig,
    pub capture: CaptureConfig,
    pub flash: FlashConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RemoteConfig {
    /// Bot token used for both delivery and command polling
    #[serde(default)]
    pub token: String,

    /// Destination chat identifier
    #[serde(default)]
    pub chat_id: String,

    /// Command poll cadence in seconds
    #[serde(default = "default_poll_interval_seconds")]
    pub poll_interval_seconds: u64,

    /// Long-poll timeout passed to the remote side, in seconds
    #[serde(default = "default_poll_timeout_seconds")]
    pub poll_timeout_seconds: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CaptureConfig {
    /// Minutes between scheduled captures
    #[serde(default = "default_interval_minutes")]
    pub interval_minutes: u32,

    /// Capture mode (currently photo only)
    #[serde(default)]
    pub mode: CaptureMode,

    /// Only keep captures when a person is detected
    #[serde(default = "default_detect_gate")]
    pub detect_gate: bool,

    /// JPEG encoding quality (1-100)
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,

    /// Path to TrueType font file for the burned-in overlay
    #[serde(default = "default_overlay_font_path")]
    pub overlay_font_path: String,

    /// Font size for the burned-in overlay
    #[serde(default = "default_overlay_font_size")]
    pub overlay_font_size: f32,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct FlashConfig {
    /// Enable the auxiliary light during the configured hour window
    #[serde(default)]
    pub enabled: bool,

    /// Hour of day (0-23) the flash window opens
    #[serde(default = "default_flash_start_hour")]
    pub start_hour: u8,

    /// Hour of day (0-23) the flash window closes; may wrap past midnight
    #[serde(default = "default_flash_end_hour")]
    pub end_hour: u8,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct StorageConfig {
    /// Directory backing the offline queue
    #[serde(default = "default_storage_path")]
    pub path: String,

    /// Advisory storage ceiling in megabytes; reported, never enforced
    #[serde(default = "default_ceiling_mb")]
    pub ceiling_mb: u64,
}

/// Closed set of capture modes so a future video mode is a compile-time
/// decision rather than a stray string.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum CaptureMode {
    #[default]
    Photo,
}

impl SentrycamConfig {
    /// Load configuration from default sources (file + environment variables)
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_file("sentrycam.toml")
    }

    /// Load configuration from a specific file path
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_str = path.as_ref().to_string_lossy();
        debug!("Loading configuration from: {}", path_str);

        let settings = Config::builder()
            // Start with default values
            .set_default("remote.token", String::new())?
            .set_default("remote.chat_id", String::new())?
            .set_default(
                "remote.poll_interval_seconds",
                default_poll_interval_seconds(),
            )?
            .set_default(
                "remote.poll_timeout_seconds",
                default_poll_timeout_seconds(),
            )?
            .set_default("capture.interval_minutes", default_interval_minutes())?
            .set_default("capture.mode", "photo")?
            .set_default("capture.detect_gate", default_detect_gate())?
            .set_default("capture.jpeg_quality", default_jpeg_quality() as i64)?
            .set_default("capture.overlay_font_path", default_overlay_font_path())?
            .set_default(
                "capture.overlay_font_size",
                default_overlay_font_size() as f64,
            )?
            .set_default("flash.enabled", false)?
            .set_default("flash.start_hour", default_flash_start_hour() as i64)?
            .set_default("flash.end_hour", default_flash_end_hour() as i64)?
            .set_default("storage.path", default_storage_path())?
            .set_default("storage.ceiling_mb", default_ceiling_mb())?
            // Add configuration file (optional)
            .add_source(File::with_name(&path_str).required(false))
            // Add environment variables with SENTRYCAM_ prefix
            .add_source(Environment::with_prefix("SENTRYCAM").separator("_"))
            .build()?;

        let config: SentrycamConfig = settings.try_deserialize()?;

        info!("Configuration loaded successfully");
        debug!("Final configuration: {:#?}", config);

        Ok(config)
    }

    /// Persist the current configuration back to a TOML file.
    ///
    /// Called after every operator mutation so settings survive restarts.
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> crate::error::Result<()> {
        let rendered = toml::to_string_pretty(self)?;
        std::fs::write(path.as_ref(), rendered)?;
        debug!("Configuration saved to: {}", path.as_ref().display());
        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.capture.interval_minutes == 0 {
            return Err(ConfigError::Message(
                "Capture interval_minutes must be greater than 0".to_string(),
            ));
        }

        if self.capture.jpeg_quality == 0 || self.capture.jpeg_quality > 100 {
            return Err(ConfigError::Message(
                "Capture jpeg_quality must be between 1 and 100".to_string(),
            ));
        }

        if self.flash.start_hour > 23 || self.flash.end_hour > 23 {
            return Err(ConfigError::Message(
                "Flash hours must be between 0 and 23".to_string(),
            ));
        }

        if self.remote.poll_interval_seconds == 0 {
            return Err(ConfigError::Message(
                "Remote poll_interval_seconds must be greater than 0".to_string(),
            ));
        }

        if self.storage.ceiling_mb == 0 {
            return Err(ConfigError::Message(
                "Storage ceiling_mb must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// True when both delivery credentials are present
    pub fn has_credentials(&self) -> bool {
        !self.remote.token.is_empty() && !self.remote.chat_id.is_empty()
    }
}

impl Default for SentrycamConfig {
    fn default() -> Self {
        Self {
            remote: RemoteConfig {
                token: String::new(),
                chat_id: String::new(),
                poll_interval_seconds: default_poll_interval_seconds(),
                poll_timeout_seconds: default_poll_timeout_seconds(),
            },
            capture: CaptureConfig {
                interval_minutes: default_interval_minutes(),
                mode: CaptureMode::Photo,
                detect_gate: default_detect_gate(),
                jpeg_quality: default_jpeg_quality(),
                overlay_font_path: default_overlay_font_path(),
                overlay_font_size: default_overlay_font_size(),
            },
            flash: FlashConfig {
                enabled: false,
                start_hour: default_flash_start_hour(),
                end_hour: default_flash_end_hour(),
            },
            storage: StorageConfig {
                path: default_storage_path(),
                ceiling_mb: default_ceiling_mb(),
            },
        }
    }
}

// Default value functions
fn default_poll_interval_seconds() -> u64 {
    4
}
fn default_poll_timeout_seconds() -> u64 {
    5
}

fn default_interval_minutes() -> u32 {
    15
}
fn default_detect_gate() -> bool {
    true
}
fn default_jpeg_quality() -> u8 {
    70
}
fn default_overlay_font_path() -> String {
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf".to_string()
}
fn default_overlay_font_size() -> f32 {
    24.0
}

fn default_flash_start_hour() -> u8 {
    18
}
fn default_flash_end_hour() -> u8 {
    6
}

fn default_storage_path() -> String {
    "./queue".to_string()
}
fn default_ceiling_mb() -> u64 {
    100
}
