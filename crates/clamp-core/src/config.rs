//! Layered configuration.
//!
//! Configuration is assembled with `figment` in three layers, later layers
//! overriding earlier ones:
//!
//! 1. library defaults ([`ClampConfig::default`]),
//! 2. an optional TOML file,
//! 3. environment variables prefixed `CLAMP_`, nested with `__`
//!    (`CLAMP_TIMING__BUS_TIMEOUT_S=2.5` sets `timing.bus_timeout_s`).
//!
//! # Example
//!
//! ```toml
//! [interface]
//! bus = "usb"
//! fifo_samples = 2097152
//!
//! [amplifier]
//! kind = "epc10_usb"
//! scale_file_dir = "/opt/heka/"
//!
//! [timing]
//! bus_timeout_s = 2.0
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Toml};
use figment::{Figment, Provider};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::command::AmplifierKind;

/// Error types for config loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigLoadError {
    /// File not found
    #[error("Config file not found: {0}")]
    NotFound(String),

    /// Value out of range or inconsistent
    #[error("Config validation failed: {0}")]
    ValidationError(String),
}

/// Bus the interface is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Bus {
    /// USB.
    #[default]
    Usb,
    /// PCI.
    Pci,
}

/// `[interface]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InterfaceConfig {
    /// Bus selection.
    pub bus: Bus,
    /// PCI slot or nth USB device; 0 picks the first found.
    pub board_number: u32,
    /// USB device number; empty picks by `board_number`.
    pub device_number: String,
    /// Size of the virtual FIFO in samples.
    pub fifo_samples: usize,
    /// Probe selector positions per amplifier; 0 when no selector.
    pub max_probes: u32,
    /// Client scales raw units itself with the board-supplied factors.
    pub external_scaling: bool,
    /// A trigger box is connected to the digital port.
    pub trigger_box: bool,
}

impl Default for InterfaceConfig {
    fn default() -> Self {
        Self {
            bus: Bus::Usb,
            board_number: 0,
            device_number: String::new(),
            fifo_samples: 1 << 20,
            max_probes: 0,
            external_scaling: false,
            trigger_box: false,
        }
    }
}

/// `[amplifier]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AmplifierConfig {
    /// Amplifier family.
    pub kind: AmplifierKind,
    /// Directory holding the scale and CFast files.
    pub scale_file_dir: Option<PathBuf>,
    /// Scale file name.
    pub scale_file_name: String,
    /// CFast file name.
    pub cfast_file_name: String,
}

impl Default for AmplifierConfig {
    fn default() -> Self {
        Self {
            kind: AmplifierKind::Epc10Usb,
            scale_file_dir: None,
            scale_file_name: "E9SCALE".to_string(),
            cfast_file_name: "E9CFAST".to_string(),
        }
    }
}

/// `[timing]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Process-wide bus timeout in seconds.
    pub bus_timeout_s: f64,
    /// Poll period while waiting for an immediate transfer, in µs.
    pub immediate_poll_interval_us: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            bus_timeout_s: 1.0,
            immediate_poll_interval_us: 50,
        }
    }
}

/// `[logging]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Fallback filter when `RUST_LOG` is unset.
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClampConfig {
    /// Interface board options.
    pub interface: InterfaceConfig,
    /// Amplifier options.
    pub amplifier: AmplifierConfig,
    /// Timeouts.
    pub timing: TimingConfig,
    /// Logging.
    pub logging: LoggingConfig,
}

impl Provider for ClampConfig {
    fn metadata(&self) -> figment::Metadata {
        figment::Metadata::named("Library Defaults")
    }

    fn data(
        &self,
    ) -> std::result::Result<figment::value::Map<figment::Profile, figment::value::Dict>, figment::Error>
    {
        Serialized::defaults(ClampConfig::default()).data()
    }
}

impl ClampConfig {
    /// Load defaults, then `path` if given, then `CLAMP_` environment
    /// variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::from(ClampConfig::default());

        if let Some(path) = path {
            if !path.exists() {
                return Err(ConfigLoadError::NotFound(path.display().to_string()).into());
            }
            debug!("Loading clamp config from: {}", path.display());
            figment = figment.merge(Toml::file(path));
        }

        figment = figment.merge(Env::prefixed("CLAMP_").split("__"));

        let config: ClampConfig = figment
            .extract()
            .context("Failed to extract configuration from Figment")?;
        config
            .validate()
            .context("Configuration validation failed")?;
        Ok(config)
    }

    /// Parse a TOML string on top of the defaults. Environment is ignored.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: ClampConfig = Figment::from(ClampConfig::default())
            .merge(Toml::string(content))
            .extract()
            .with_context(|| "Failed to parse TOML content")?;
        config
            .validate()
            .context("Configuration validation failed")?;
        Ok(config)
    }

    /// Render the configuration as a TOML document that [`load`](Self::load)
    /// reads back unchanged.
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")
    }

    /// Reject values no interface can work with.
    pub fn validate(&self) -> std::result::Result<(), ConfigLoadError> {
        if !(self.timing.bus_timeout_s.is_finite() && self.timing.bus_timeout_s > 0.0) {
            return Err(ConfigLoadError::ValidationError(format!(
                "timing.bus_timeout_s must be positive, got {}",
                self.timing.bus_timeout_s
            )));
        }
        if let Err(err) = Duration::try_from_secs_f64(self.timing.bus_timeout_s) {
            return Err(ConfigLoadError::ValidationError(format!(
                "timing.bus_timeout_s out of range ({}), got {}",
                err, self.timing.bus_timeout_s
            )));
        }
        if self.interface.fifo_samples == 0 {
            return Err(ConfigLoadError::ValidationError(
                "interface.fifo_samples must be non-zero".to_string(),
            ));
        }
        if self.interface.device_number.len() > 15 {
            return Err(ConfigLoadError::ValidationError(format!(
                "interface.device_number longer than 15 characters: {}",
                self.interface.device_number
            )));
        }
        if self.timing.immediate_poll_interval_us == 0 {
            warn!("timing.immediate_poll_interval_us is 0, immediate transfers will busy-poll");
        }
        Ok(())
    }

    /// Bus timeout as a [`Duration`]. Values [`validate`](Self::validate)
    /// rejects saturate to [`Duration::MAX`].
    pub fn bus_timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.timing.bus_timeout_s).unwrap_or(Duration::MAX)
    }

    /// Full path of the scale file, if a directory is configured.
    pub fn scale_file_path(&self) -> Option<PathBuf> {
        self.amplifier
            .scale_file_dir
            .as_ref()
            .map(|dir| dir.join(&self.amplifier.scale_file_name))
    }
}

/// Options passed to the interface when the system is initialized.
#[derive(Debug, Clone, PartialEq)]
pub struct InitOptions {
    /// Bus selection.
    pub bus: Bus,
    /// PCI slot or nth USB device.
    pub board_number: u32,
    /// USB device number, empty for "by board number".
    pub device_number: String,
    /// Virtual FIFO size in samples.
    pub fifo_samples: usize,
    /// Probe selector positions.
    pub max_probes: u32,
    /// Use board-supplied scaling factors.
    pub external_scaling: bool,
    /// A trigger box shares the digital port.
    pub trigger_box: bool,
    /// Scale file name inside the scale directory.
    pub scale_file_name: String,
    /// CFast file name inside the scale directory.
    pub cfast_file_name: String,
    /// Process-wide bus timeout.
    pub bus_timeout: Duration,
    /// Poll period of immediate transfers.
    pub immediate_poll_interval: Duration,
}

impl InitOptions {
    /// Derive init options from a loaded configuration.
    pub fn from_config(config: &ClampConfig) -> Self {
        Self {
            bus: config.interface.bus,
            board_number: config.interface.board_number,
            device_number: config.interface.device_number.clone(),
            fifo_samples: config.interface.fifo_samples,
            max_probes: config.interface.max_probes,
            external_scaling: config.interface.external_scaling,
            trigger_box: config.interface.trigger_box,
            scale_file_name: config.amplifier.scale_file_name.clone(),
            cfast_file_name: config.amplifier.cfast_file_name.clone(),
            bus_timeout: config.bus_timeout(),
            immediate_poll_interval: Duration::from_micros(
                config.timing.immediate_poll_interval_us,
            ),
        }
    }
}

impl Default for InitOptions {
    fn default() -> Self {
        Self::from_config(&ClampConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = ClampConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.amplifier.scale_file_name, "E9SCALE");
        assert_eq!(config.bus_timeout(), Duration::from_secs(1));
    }

    #[test]
    fn test_from_toml_str_overrides() {
        let config = ClampConfig::from_toml_str(
            r#"
            [interface]
            bus = "pci"
            board_number = 2

            [amplifier]
            kind = "epc9"
            "#,
        )
        .unwrap();
        assert_eq!(config.interface.bus, Bus::Pci);
        assert_eq!(config.interface.board_number, 2);
        assert_eq!(config.amplifier.kind, AmplifierKind::Epc9);
        assert_eq!(config.timing.bus_timeout_s, 1.0);
    }

    #[test]
    fn test_validation_rejects_zero_timeout() {
        let err = ClampConfig::from_toml_str("[timing]\nbus_timeout_s = 0.0\n").unwrap_err();
        assert!(format!("{:#}", err).contains("bus_timeout_s"));
    }

    #[test]
    fn test_validation_rejects_unrepresentable_timeout() {
        let err = ClampConfig::from_toml_str("[timing]\nbus_timeout_s = 1e30\n").unwrap_err();
        assert!(format!("{:#}", err).contains("out of range"));

        let mut config = ClampConfig::default();
        config.timing.bus_timeout_s = 1e30;
        assert!(matches!(
            config.validate(),
            Err(ConfigLoadError::ValidationError(_))
        ));
        assert_eq!(config.bus_timeout(), Duration::MAX);
        assert_eq!(InitOptions::from_config(&config).bus_timeout, Duration::MAX);
    }

    #[test]
    fn test_validation_rejects_empty_fifo() {
        let mut config = ClampConfig::default();
        config.interface.fifo_samples = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigLoadError::ValidationError(_))
        ));
    }

    #[test]
    fn test_init_options_from_config() {
        let mut config = ClampConfig::default();
        config.interface.max_probes = 4;
        config.timing.bus_timeout_s = 0.25;
        let options = InitOptions::from_config(&config);
        assert_eq!(options.max_probes, 4);
        assert_eq!(options.bus_timeout, Duration::from_millis(250));
        assert_eq!(options.cfast_file_name, "E9CFAST");
    }

    #[test]
    fn test_scale_file_path() {
        let mut config = ClampConfig::default();
        assert!(config.scale_file_path().is_none());
        config.amplifier.scale_file_dir = Some(PathBuf::from("/opt/heka"));
        assert_eq!(
            config.scale_file_path(),
            Some(PathBuf::from("/opt/heka/E9SCALE"))
        );
    }
}
