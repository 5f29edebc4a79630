// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

mod config;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::signal;
use tracing::{info, warn};

use trx_app::{init_logging, ConfigFile};
use trx_backend::RegistrationContext;
use trx_core::{Demod, DynResult};
use trx_receiver::Receiver;

use config::{GainMode, RxdConfig};

const PKG_DESCRIPTION: &str = concat!(env!("CARGO_PKG_NAME"), " - SDR receiver daemon");
const STATUS_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Debug, Parser)]
#[command(
    author = env!("CARGO_PKG_AUTHORS"),
    version = env!("CARGO_PKG_VERSION"),
    about = PKG_DESCRIPTION,
)]
struct Cli {
    /// Path to configuration file
    #[arg(long = "config", short = 'C', value_name = "FILE")]
    config: Option<PathBuf>,
    /// Print example configuration and exit
    #[arg(long = "print-config")]
    print_config: bool,
    /// Input device string (e.g. "dummy", "file=/tmp/x.raw,rate=96000")
    #[arg(short = 'i', long = "input")]
    input: Option<String>,
    /// Audio output device string
    #[arg(short = 'o', long = "output")]
    output: Option<String>,
    /// Input decimation factor
    #[arg(short = 'd', long = "decim")]
    decim: Option<u32>,
    /// Demodulator (off, raw, am, nfm, wfm, wfm_stereo, wfm_stereo_oirt, ssb)
    #[arg(short = 'm', long = "demod")]
    demod: Option<Demod>,
    /// RF frequency in Hz
    #[arg(short = 'f', long = "freq")]
    freq: Option<f64>,
}

/// Command line values take precedence over the file.
fn apply_cli_overrides(cli: &Cli, cfg: &mut RxdConfig) {
    if let Some(input) = &cli.input {
        cfg.input.device = input.clone();
    }
    if let Some(output) = &cli.output {
        cfg.output.device = output.clone();
    }
    if let Some(decim) = cli.decim {
        cfg.input.decimation = decim;
    }
    if let Some(demod) = cli.demod {
        cfg.receiver.demod = demod;
    }
    if let Some(freq) = cli.freq {
        cfg.input.freq_hz = freq;
    }
}

/// Push the configuration into a freshly built receiver.
/// RF front-end settings the device rejects are logged and skipped.
fn configure_receiver(rx: &mut Receiver, cfg: &RxdConfig) -> DynResult<()> {
    if let Some(rate) = cfg.input.sample_rate {
        let actual = rx.set_input_rate(rate)?;
        info!("Input rate {} S/s", actual);
    }
    if let Err(e) = rx.set_rf_freq(cfg.input.freq_hz) {
        warn!("Failed to tune to {} Hz: {}", cfg.input.freq_hz, e);
    }
    if cfg.input.freq_corr_ppm != 0.0 {
        if let Err(e) = rx.set_freq_corr(cfg.input.freq_corr_ppm) {
            warn!("Failed to set frequency correction: {}", e);
        }
    }
    if let Some(antenna) = &cfg.input.antenna {
        if let Err(e) = rx.set_antenna(antenna) {
            warn!("Failed to select antenna '{}': {}", antenna, e);
        }
    }
    let automatic = cfg.input.gain_mode == GainMode::Auto;
    if let Err(e) = rx.set_auto_gain(automatic) {
        warn!("Failed to set gain mode: {}", e);
    }
    if !automatic {
        for (name, db) in &cfg.input.gains {
            match rx.set_gain(name, *db) {
                Ok(actual) => info!("Gain {} = {} dB", name, actual),
                Err(e) => warn!("Failed to set gain {}: {}", name, e),
            }
        }
    }
    rx.set_iq_swap(cfg.input.iq_swap);
    rx.set_dc_cancel(cfg.input.dc_cancel)?;
    if cfg.input.iq_balance {
        if let Err(e) = rx.set_iq_balance(true) {
            warn!("Failed to enable I/Q balance: {}", e);
        }
    }

    rx.set_af_gain(cfg.output.af_gain_db);
    rx.set_demodulator(cfg.receiver.demod)?;
    if cfg.receiver.demod != Demod::Off {
        rx.set_filter(
            cfg.receiver.filter_low_hz,
            cfg.receiver.filter_high_hz,
            cfg.receiver.filter_shape,
        )?;
    }
    rx.set_filter_offset(cfg.receiver.filter_offset_hz);
    rx.set_cw_offset(cfg.receiver.cw_offset_hz);
    rx.set_sql_level(cfg.receiver.squelch_db);
    Ok(())
}

fn log_status(rx: &Receiver) {
    let st = rx.state();
    info!(
        "{} @ {:.0} Hz, quad {:.0} S/s, level {:.1} dBFS{}",
        st.demod,
        rx.rf_freq(),
        st.quad_rate,
        rx.signal_power(true),
        if rx.is_udp_streaming() { ", streaming" } else { "" }
    );
}

#[tokio::main]
async fn main() -> DynResult<()> {
    let cli = Cli::parse();

    if cli.print_config {
        println!("{}", RxdConfig::example_combined_toml());
        return Ok(());
    }

    let (mut cfg, config_path) = RxdConfig::load(cli.config.as_deref())?;
    apply_cli_overrides(&cli, &mut cfg);
    cfg.validate()
        .map_err(|e| format!("Invalid receiver configuration: {}", e))?;

    init_logging(cfg.general.log_level.as_deref());

    if let Some(ref path) = config_path {
        info!("Loaded configuration from {}", path.display());
    }

    let registry = Arc::new(RegistrationContext::with_builtin_backends());
    info!(
        "Starting trx-rxd (input: {}, output: {}, sources: {})",
        cfg.input.device,
        if cfg.output.device.is_empty() {
            trx_backend::DEFAULT_AUDIO_DRIVER
        } else {
            cfg.output.device.as_str()
        },
        registry.registered_sources().join(", ")
    );

    let mut rx = Receiver::new(
        registry,
        &cfg.input.device,
        &cfg.output.device,
        cfg.input.decimation,
    )?;
    configure_receiver(&mut rx, &cfg)?;
    rx.start()?;

    if cfg.udp.enabled {
        if let Err(e) = rx.start_udp_streaming(&cfg.udp.host, cfg.udp.port, cfg.udp.stereo) {
            warn!("Failed to start UDP streaming: {}", e);
        }
    }

    let mut status = tokio::time::interval(STATUS_INTERVAL);
    loop {
        tokio::select! {
            _ = status.tick() => log_status(&rx),
            res = signal::ctrl_c() => {
                res?;
                info!("Ctrl+C received, shutting down");
                break;
            }
        }
    }

    rx.stop();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_overrides_config() {
        let cli = Cli::parse_from([
            "trx-rxd", "-i", "dummy,rate=250000", "-d", "4", "-m", "wfm", "-f", "100e6",
        ]);
        let mut cfg = RxdConfig::default();
        apply_cli_overrides(&cli, &mut cfg);
        assert_eq!(cfg.input.device, "dummy,rate=250000");
        assert_eq!(cfg.input.decimation, 4);
        assert_eq!(cfg.receiver.demod, Demod::WfmMono);
        assert_eq!(cfg.input.freq_hz, 100e6);
        assert_eq!(cfg.output.device, "");
    }

    #[test]
    fn test_cli_rejects_unknown_demod() {
        assert!(Cli::try_parse_from(["trx-rxd", "-m", "qam"]).is_err());
    }

    #[test]
    fn test_configure_dummy_receiver() {
        let registry = Arc::new(RegistrationContext::with_builtin_backends());
        let mut cfg = RxdConfig::default();
        cfg.input.sample_rate = Some(192_000.0);
        cfg.input.decimation = 2;
        cfg.input.gains.insert("LNA".to_string(), 30.0);
        cfg.input.dc_cancel = true;
        cfg.receiver.demod = Demod::Am;
        let mut rx = Receiver::new(registry, &cfg.input.device, "null", cfg.input.decimation)
            .unwrap();
        configure_receiver(&mut rx, &cfg).unwrap();
        assert_eq!(rx.quad_rate(), 96_000.0);
        assert_eq!(rx.demodulator(), Demod::Am);
        assert_eq!(rx.gain("LNA"), Some(30.0));
        assert!(rx.state().dc_cancel);
        assert_eq!(rx.rf_freq(), 144_800_000.0);
    }
}
