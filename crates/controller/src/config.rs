//! Controller configuration management

use crate::device::TransportSettings;
use crate::poller::PollerSettings;
use anyhow::{Context, Result, anyhow};
use protocol::{DeviceIdentity, LedColor};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Accepted report sizes
pub const REPORT_SIZE_RANGE: std::ops::RangeInclusive<usize> = 3..=1024;

const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerConfig {
    #[serde(default)]
    pub device: DeviceSettings,
    #[serde(default)]
    pub communication: CommunicationSettings,
    #[serde(default)]
    pub sensor: SensorSettings,
    #[serde(default)]
    pub led: LedSettings,
    #[serde(default)]
    pub debug: DebugSettings,
    /// Default log level (trace, debug, info, warn, error)
    #[serde(default = "ControllerConfig::default_log_level")]
    pub log_level: String,
}

/// Which device to track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceSettings {
    /// USB Vendor ID, `"0x303A"` or a plain integer
    #[serde(default = "DeviceSettings::default_vendor_id", with = "hex_id")]
    pub vendor_id: u16,
    /// USB Product ID, `"0x8000"` or a plain integer
    #[serde(default = "DeviceSettings::default_product_id", with = "hex_id")]
    pub product_id: u16,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            vendor_id: Self::default_vendor_id(),
            product_id: Self::default_product_id(),
        }
    }
}

impl DeviceSettings {
    fn default_vendor_id() -> u16 {
        0x303A // Espressif
    }

    fn default_product_id() -> u16 {
        0x8000
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommunicationSettings {
    /// Reply timeout for generic command exchanges, in milliseconds
    #[serde(default = "CommunicationSettings::default_timeout_ms")]
    pub timeout_ms: u64,
    /// Report size in bytes, report id included
    #[serde(default = "CommunicationSettings::default_report_size")]
    pub report_size: usize,
}

impl Default for CommunicationSettings {
    fn default() -> Self {
        Self {
            timeout_ms: Self::default_timeout_ms(),
            report_size: Self::default_report_size(),
        }
    }
}

impl CommunicationSettings {
    fn default_timeout_ms() -> u64 {
        2000
    }

    fn default_report_size() -> usize {
        protocol::DEFAULT_REPORT_SIZE
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorSettings {
    /// Seconds between polls
    #[serde(default = "SensorSettings::default_interval")]
    pub interval_secs: u64,
    #[serde(default = "SensorSettings::default_enabled")]
    pub temperature_enabled: bool,
    #[serde(default = "SensorSettings::default_enabled")]
    pub humidity_enabled: bool,
}

impl Default for SensorSettings {
    fn default() -> Self {
        Self {
            interval_secs: Self::default_interval(),
            temperature_enabled: Self::default_enabled(),
            humidity_enabled: Self::default_enabled(),
        }
    }
}

impl SensorSettings {
    fn default_interval() -> u64 {
        10
    }

    fn default_enabled() -> bool {
        true
    }
}

/// Colour used by the LED menu entry when none is given
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LedSettings {
    #[serde(default)]
    pub default_red: u8,
    #[serde(default)]
    pub default_green: u8,
    #[serde(default)]
    pub default_blue: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DebugSettings {
    /// Raise the default log level to debug
    #[serde(default)]
    pub enabled: bool,
    /// Hex-dump every device response
    #[serde(default)]
    pub show_raw_data: bool,
    /// Log every command sent
    #[serde(default)]
    pub log_commands: bool,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            device: DeviceSettings::default(),
            communication: CommunicationSettings::default(),
            sensor: SensorSettings::default(),
            led: LedSettings::default(),
            debug: DebugSettings::default(),
            log_level: Self::default_log_level(),
        }
    }
}

impl ControllerConfig {
    fn default_log_level() -> String {
        "info".to_string()
    }

    /// Load configuration from `path`, or from the default location
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = match path {
            Some(p) => expand_path(&p),
            None => {
                let default = Self::default_path();
                if !default.exists() {
                    return Err(anyhow!("No configuration file found, using defaults"));
                }
                default
            }
        };

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config: ControllerConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;

        config.validate()?;

        tracing::info!("Loaded configuration from: {}", config_path.display());
        Ok(config)
    }

    /// Load configuration or return defaults if not found
    pub fn load_or_default() -> Self {
        match Self::load(None) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Failed to load config: {}, using defaults", e);
                Self::default()
            }
        }
    }

    /// Save configuration to the specified path
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        // Create parent directories if they don't exist
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::info!("Saved configuration to: {}", path.display());
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("hid-controller").join("controller.toml")
        } else {
            PathBuf::from(".config/hid-controller/controller.toml")
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if !VALID_LOG_LEVELS.contains(&self.log_level.as_str()) {
            return Err(anyhow!(
                "Invalid log level '{}', must be one of: {}",
                self.log_level,
                VALID_LOG_LEVELS.join(", ")
            ));
        }

        if !REPORT_SIZE_RANGE.contains(&self.communication.report_size) {
            return Err(anyhow!(
                "Invalid report_size {}, must be between {} and {}",
                self.communication.report_size,
                REPORT_SIZE_RANGE.start(),
                REPORT_SIZE_RANGE.end()
            ));
        }

        if self.communication.timeout_ms == 0 {
            return Err(anyhow!("communication.timeout_ms must be greater than 0"));
        }

        if self.sensor.interval_secs == 0 {
            return Err(anyhow!("sensor.interval_secs must be greater than 0"));
        }

        Ok(())
    }

    pub fn identity(&self) -> DeviceIdentity {
        DeviceIdentity::new(self.device.vendor_id, self.device.product_id)
    }

    pub fn transport_settings(&self) -> TransportSettings {
        TransportSettings {
            report_size: self.communication.report_size,
            timeout: Duration::from_millis(self.communication.timeout_ms),
            log_commands: self.debug.log_commands,
            show_raw_data: self.debug.show_raw_data,
        }
    }

    pub fn poller_settings(&self) -> PollerSettings {
        PollerSettings::new(
            Duration::from_secs(self.sensor.interval_secs),
            self.sensor.temperature_enabled,
            self.sensor.humidity_enabled,
        )
    }

    pub fn default_led(&self) -> LedColor {
        LedColor::new(
            self.led.default_red,
            self.led.default_green,
            self.led.default_blue,
        )
    }

    /// Resolved settings, one line each, for the startup log
    pub fn summary_lines(&self) -> Vec<String> {
        fn on_off(flag: bool) -> &'static str {
            if flag { "enabled" } else { "disabled" }
        }

        vec![
            format!(
                "Device: vendor 0x{:04X}, product 0x{:04X}",
                self.device.vendor_id, self.device.product_id
            ),
            format!("Timeout: {} ms", self.communication.timeout_ms),
            format!("Report size: {} bytes", self.communication.report_size),
            format!("Sensor interval: {} seconds", self.sensor.interval_secs),
            format!(
                "Temperature sensor: {}",
                on_off(self.sensor.temperature_enabled)
            ),
            format!("Humidity sensor: {}", on_off(self.sensor.humidity_enabled)),
            format!(
                "Default LED: RGB({}, {}, {})",
                self.led.default_red, self.led.default_green, self.led.default_blue
            ),
            format!("Debug mode: {}", on_off(self.debug.enabled)),
            format!("Show raw data: {}", on_off(self.debug.show_raw_data)),
            format!("Log commands: {}", on_off(self.debug.log_commands)),
        ]
    }
}

/// Expand a leading `~` to the home directory
pub fn expand_path(path: &Path) -> PathBuf {
    let raw = path.to_string_lossy();
    PathBuf::from(shellexpand::tilde(&raw).into_owned())
}

/// USB ids as `"0x303A"` strings, also accepting plain integers
mod hex_id {
    use serde::{Deserialize, Deserializer, Serializer, de};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Int(i64),
        Text(String),
    }

    pub fn serialize<S>(id: &u16, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("0x{:04X}", id))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<u16, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Raw::deserialize(deserializer)? {
            Raw::Int(value) => u16::try_from(value)
                .map_err(|_| de::Error::custom(format!("USB id {} out of range", value))),
            Raw::Text(text) => parse(&text).map_err(de::Error::custom),
        }
    }

    /// Parse `0x303A`, `0X303a` or decimal `12346`
    pub fn parse(text: &str) -> Result<u16, String> {
        let text = text.trim();
        let parsed = match text
            .strip_prefix("0x")
            .or_else(|| text.strip_prefix("0X"))
        {
            Some(hex) => u16::from_str_radix(hex, 16),
            None => text.parse::<u16>(),
        };
        parsed.map_err(|_| format!("Invalid USB id '{}', expected e.g. '0x303A'", text))
    }
}
