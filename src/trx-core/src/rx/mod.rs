// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Receiver vocabulary shared by the pipeline, the backends and the daemon.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub mod device;
pub mod error;

/// Demodulator selection. Exactly one is active at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Demod {
    /// No audio path at all; only the I/Q spectrum is computed.
    Off,
    /// Raw I/Q passed to the audio outputs.
    Raw,
    Am,
    #[default]
    Nfm,
    WfmMono,
    WfmStereo,
    /// Stereo with the OIRT (31.25 kHz) pilot.
    WfmStereoOirt,
    Ssb,
}

/// Structural category of a demodulator; decides which chain shape is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DemodFamily {
    Narrowband,
    Wideband,
}

impl Demod {
    pub const ALL: [Demod; 8] = [
        Demod::Off,
        Demod::Raw,
        Demod::Am,
        Demod::Nfm,
        Demod::WfmMono,
        Demod::WfmStereo,
        Demod::WfmStereoOirt,
        Demod::Ssb,
    ];

    /// Family of this variant, `None` for [`Demod::Off`].
    pub fn family(self) -> Option<DemodFamily> {
        match self {
            Demod::Off => None,
            Demod::Raw | Demod::Am | Demod::Nfm | Demod::Ssb => Some(DemodFamily::Narrowband),
            Demod::WfmMono | Demod::WfmStereo | Demod::WfmStereoOirt => {
                Some(DemodFamily::Wideband)
            }
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Demod::Off => "off",
            Demod::Raw => "raw",
            Demod::Am => "am",
            Demod::Nfm => "nfm",
            Demod::WfmMono => "wfm_mono",
            Demod::WfmStereo => "wfm_stereo",
            Demod::WfmStereoOirt => "wfm_stereo_oirt",
            Demod::Ssb => "ssb",
        }
    }
}

impl fmt::Display for Demod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Demod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key: String = s
            .to_ascii_lowercase()
            .chars()
            .map(|c| if c == '-' { '_' } else { c })
            .collect();
        match key.as_str() {
            "off" | "none" => Ok(Demod::Off),
            "raw" | "iq" => Ok(Demod::Raw),
            "am" => Ok(Demod::Am),
            "nfm" | "fm" => Ok(Demod::Nfm),
            "wfm" | "wfm_mono" => Ok(Demod::WfmMono),
            "wfm_stereo" => Ok(Demod::WfmStereo),
            "wfm_stereo_oirt" | "oirt" => Ok(Demod::WfmStereoOirt),
            "ssb" | "usb" | "lsb" | "cw" => Ok(Demod::Ssb),
            _ => Err(format!("unknown demodulator '{}'", s)),
        }
    }
}

/// Channel filter shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterShape {
    Soft,
    #[default]
    Normal,
    Sharp,
}

impl FilterShape {
    /// Transition width as a fraction of the passband width.
    pub fn transition_fraction(self) -> f64 {
        match self {
            FilterShape::Soft => 0.5,
            FilterShape::Normal => 0.2,
            FilterShape::Sharp => 0.1,
        }
    }
}

/// Tunable frequency range reported by a source.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FreqRange {
    pub low_hz: f64,
    pub high_hz: f64,
}

impl FreqRange {
    pub fn contains(&self, hz: f64) -> bool {
        hz >= self.low_hz && hz <= self.high_hz
    }
}

/// Gain range of a named gain stage, in dB.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GainRange {
    pub min_db: f64,
    pub max_db: f64,
    pub step_db: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_demod_families() {
        assert_eq!(Demod::Off.family(), None);
        assert_eq!(Demod::Raw.family(), Some(DemodFamily::Narrowband));
        assert_eq!(Demod::Ssb.family(), Some(DemodFamily::Narrowband));
        assert_eq!(Demod::WfmStereoOirt.family(), Some(DemodFamily::Wideband));
    }

    #[test]
    fn test_demod_parse_aliases() {
        assert_eq!("NFM".parse::<Demod>(), Ok(Demod::Nfm));
        assert_eq!("wfm-stereo".parse::<Demod>(), Ok(Demod::WfmStereo));
        assert_eq!("usb".parse::<Demod>(), Ok(Demod::Ssb));
        assert!("qam".parse::<Demod>().is_err());
        for demod in Demod::ALL {
            assert_eq!(demod.as_str().parse::<Demod>(), Ok(demod));
        }
    }

    #[test]
    fn test_demod_serde_names() {
        #[derive(Deserialize)]
        struct Wrapper {
            demod: Demod,
        }
        let w: Wrapper = toml::from_str("demod = \"wfm_stereo_oirt\"").unwrap();
        assert_eq!(w.demod, Demod::WfmStereoOirt);
    }

    #[test]
    fn test_filter_shape_fractions() {
        assert_eq!(FilterShape::Soft.transition_fraction(), 0.5);
        assert_eq!(FilterShape::Normal.transition_fraction(), 0.2);
        assert_eq!(FilterShape::Sharp.transition_fraction(), 0.1);
    }
}
