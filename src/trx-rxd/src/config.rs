// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Configuration file support for trx-rxd.
//!
//! Config is loaded from the `[trx-rxd]` section of `trx-rs.toml`.
//! Default search order:
//! 1. Path specified via `--config` CLI argument
//! 2. `./trx-rs.toml`
//! 3. `~/.config/trx-rs/trx-rs.toml`
//! 4. `/etc/trx-rs/trx-rs.toml`

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use trx_app::ConfigFile;
use trx_core::{Demod, FilterShape};
use trx_receiver::demod::ChannelFilter;
use trx_receiver::dsp::decim::is_supported_factor;
use trx_receiver::receiver::{DEFAULT_AF_GAIN_DB, DEFAULT_RF_FREQ_HZ};

/// Top-level receiver daemon configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RxdConfig {
    pub general: GeneralConfig,
    /// Sample source and RF front end
    pub input: InputConfig,
    /// Audio output
    pub output: OutputConfig,
    /// Demodulator and channel filter
    pub receiver: ReceiverConfig,
    /// UDP audio streaming
    pub udp: UdpConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log level (trace, debug, info, warn, error)
    pub log_level: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GainMode {
    Auto,
    #[default]
    Manual,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InputConfig {
    /// Source device string, e.g. "dummy" or "file=/tmp/x.raw,rate=96000"
    pub device: String,
    /// Requested sample rate; the device default when unset
    pub sample_rate: Option<f64>,
    pub decimation: u32,
    pub freq_hz: f64,
    pub freq_corr_ppm: f64,
    pub antenna: Option<String>,
    pub gain_mode: GainMode,
    /// Named gain stages in dB, applied in manual mode
    pub gains: BTreeMap<String, f64>,
    pub iq_swap: bool,
    pub dc_cancel: bool,
    pub iq_balance: bool,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            device: "dummy".to_string(),
            sample_rate: None,
            decimation: 1,
            freq_hz: DEFAULT_RF_FREQ_HZ,
            freq_corr_ppm: 0.0,
            antenna: None,
            gain_mode: GainMode::Manual,
            gains: BTreeMap::new(),
            iq_swap: false,
            dc_cancel: false,
            iq_balance: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Audio device string; empty selects the default driver
    pub device: String,
    pub af_gain_db: f64,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            device: String::new(),
            af_gain_db: DEFAULT_AF_GAIN_DB,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReceiverConfig {
    pub demod: Demod,
    pub filter_low_hz: f64,
    pub filter_high_hz: f64,
    pub filter_shape: FilterShape,
    pub filter_offset_hz: f64,
    pub cw_offset_hz: f64,
    /// Squelch level in dBFS; -150 keeps the squelch open
    pub squelch_db: f64,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            demod: Demod::Nfm,
            filter_low_hz: -5_000.0,
            filter_high_hz: 5_000.0,
            filter_shape: FilterShape::Normal,
            filter_offset_hz: 0.0,
            cw_offset_hz: 0.0,
            squelch_db: -150.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UdpConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    pub stereo: bool,
}

impl Default for UdpConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: "127.0.0.1".to_string(),
            port: 7355,
            stereo: false,
        }
    }
}

impl RxdConfig {
    pub fn validate(&self) -> Result<(), String> {
        validate_log_level(self.general.log_level.as_deref())?;

        if self.input.device.trim().is_empty() {
            return Err("[input].device must not be empty".to_string());
        }
        if let Some(rate) = self.input.sample_rate {
            if !(rate.is_finite() && rate > 0.0) {
                return Err(format!("[input].sample_rate {} must be > 0", rate));
            }
        }
        if self.input.decimation > 1 && !is_supported_factor(self.input.decimation) {
            return Err(format!(
                "[input].decimation {} is not a power of two between 2 and 512",
                self.input.decimation
            ));
        }
        if !(self.input.freq_hz.is_finite() && self.input.freq_hz > 0.0) {
            return Err("[input].freq_hz must be > 0".to_string());
        }
        if self.input.gains.values().any(|db| !db.is_finite()) {
            return Err("[input].gains must be finite".to_string());
        }
        if !self.output.af_gain_db.is_finite() {
            return Err("[output].af_gain_db must be finite".to_string());
        }

        ChannelFilter::from_shape(
            self.receiver.filter_low_hz,
            self.receiver.filter_high_hz,
            self.receiver.filter_shape,
        )
        .map_err(|e| format!("[receiver] filter: {}", e))?;

        if self.udp.enabled {
            if self.udp.host.trim().is_empty() {
                return Err("[udp].host must not be empty when streaming is enabled".to_string());
            }
            if self.udp.port == 0 {
                return Err("[udp].port must be > 0 when streaming is enabled".to_string());
            }
        }
        Ok(())
    }

    /// Example configuration wrapped in its `[trx-rxd]` section.
    pub fn example_combined_toml() -> String {
        #[derive(serde::Serialize)]
        struct Wrapper {
            #[serde(rename = "trx-rxd")]
            inner: RxdConfig,
        }
        let mut gains = BTreeMap::new();
        gains.insert("LNA".to_string(), 20.0);
        let example = RxdConfig {
            general: GeneralConfig {
                log_level: Some("info".to_string()),
            },
            input: InputConfig {
                device: "dummy,rate=96000".to_string(),
                sample_rate: Some(96_000.0),
                antenna: Some("RX".to_string()),
                gains,
                ..InputConfig::default()
            },
            output: OutputConfig::default(),
            receiver: ReceiverConfig::default(),
            udp: UdpConfig::default(),
        };
        toml::to_string_pretty(&Wrapper { inner: example }).unwrap_or_default()
    }
}

fn validate_log_level(level: Option<&str>) -> Result<(), String> {
    if let Some(level) = level {
        match level {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => {
                return Err(format!(
                    "[general].log_level '{}' is invalid (expected one of: trace, debug, info, warn, error)",
                    level
                ))
            }
        }
    }
    Ok(())
}

impl ConfigFile for RxdConfig {
    fn section_key() -> &'static str {
        "trx-rxd"
    }

    fn validate(&self) -> Result<(), String> {
        RxdConfig::validate(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = RxdConfig::default();
        assert_eq!(config.input.device, "dummy");
        assert_eq!(config.input.decimation, 1);
        assert_eq!(config.input.freq_hz, 144_800_000.0);
        assert_eq!(config.output.af_gain_db, -6.0);
        assert_eq!(config.receiver.demod, Demod::Nfm);
        assert!(!config.udp.enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_example_round_trips() {
        let example = RxdConfig::example_combined_toml();
        assert!(example.contains("[trx-rxd.input]"));
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(example.as_bytes()).unwrap();
        let (cfg, path) = RxdConfig::load(Some(file.path())).unwrap();
        assert_eq!(path.as_deref(), Some(file.path()));
        assert_eq!(cfg.input.gains.get("LNA"), Some(&20.0));
        assert_eq!(cfg.input.sample_rate, Some(96_000.0));
    }

    #[test]
    fn test_parse_partial_section() {
        let toml_str = r#"
[trx-rxd.input]
device = "file=/tmp/capture.raw,rate=2048000"
decimation = 8
gain_mode = "auto"

[trx-rxd.receiver]
demod = "wfm_stereo"
filter_low_hz = -80000.0
filter_high_hz = 80000.0
filter_shape = "soft"
"#;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(toml_str.as_bytes()).unwrap();
        let cfg = RxdConfig::load_from_file(file.path()).unwrap();
        assert_eq!(cfg.input.decimation, 8);
        assert_eq!(cfg.input.gain_mode, GainMode::Auto);
        assert_eq!(cfg.receiver.demod, Demod::WfmStereo);
        assert_eq!(cfg.receiver.filter_shape, FilterShape::Soft);
        assert_eq!(cfg.udp.port, 7355);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut cfg = RxdConfig::default();
        cfg.input.decimation = 6;
        assert!(cfg.validate().unwrap_err().contains("decimation"));

        let mut cfg = RxdConfig::default();
        cfg.receiver.filter_low_hz = 100.0;
        cfg.receiver.filter_high_hz = 150.0;
        assert!(cfg.validate().unwrap_err().contains("filter"));

        let mut cfg = RxdConfig::default();
        cfg.udp.enabled = true;
        cfg.udp.port = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = RxdConfig::default();
        cfg.general.log_level = Some("loud".to_string());
        assert!(cfg.validate().is_err());

        let mut cfg = RxdConfig::default();
        cfg.input.sample_rate = Some(0.0);
        assert!(cfg.validate().is_err());
    }
}
