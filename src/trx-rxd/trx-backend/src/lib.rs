// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Device backends for the receiver.
//!
//! Sources and audio sinks are looked up by driver name in a
//! [`RegistrationContext`], which also serves as the receiver's
//! [`DeviceFactory`]. Device strings look like `driver[=value],key=value,...`,
//! e.g. `dummy,rate=96000` or `file=/tmp/capture.raw,rate=2048000,repeat`.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use trx_app::{normalize_name, parse_kv_list};
use trx_core::{AudioSink, DeviceFactory, DynResult, SampleSource};

pub mod audio;
pub mod dummy;
pub mod file;

pub use audio::NullAudio;
pub use dummy::DummySource;
pub use file::FileSource;

#[cfg(feature = "soapysdr")]
pub use trx_backend_soapysdr::SoapySource;

/// Audio driver used when the output device string is empty.
#[cfg(feature = "cpal")]
pub const DEFAULT_AUDIO_DRIVER: &str = "cpal";
#[cfg(not(feature = "cpal"))]
pub const DEFAULT_AUDIO_DRIVER: &str = "null";

/// Parsed device string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceSpec {
    driver: String,
    /// Value given to the driver item itself (`file=/tmp/x.raw`).
    value: String,
    args: Vec<(String, String)>,
}

impl DeviceSpec {
    pub fn parse(spec: &str) -> DynResult<Self> {
        let mut items = parse_kv_list(spec).into_iter();
        let (driver, value) = items
            .next()
            .ok_or_else(|| format!("empty device string '{}'", spec))?;
        let driver = normalize_name(&driver);
        if driver.is_empty() {
            return Err(format!("missing driver name in '{}'", spec).into());
        }
        Ok(Self {
            driver,
            value,
            args: items.collect(),
        })
    }

    pub fn driver(&self) -> &str {
        &self.driver
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn args(&self) -> &[(String, String)] {
        &self.args
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.args
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    /// Parse an optional argument; a present but malformed value is an error.
    pub fn get_parsed<T>(&self, key: &str) -> DynResult<Option<T>>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        match self.get(key) {
            None => Ok(None),
            Some(raw) => raw
                .parse::<T>()
                .map(Some)
                .map_err(|e| format!("invalid {} '{}': {}", key, raw, e).into()),
        }
    }

    /// A bare key or one of `1`, `true`, `yes`, `on` counts as set.
    pub fn flag(&self, key: &str) -> bool {
        matches!(
            self.get(key).map(str::to_ascii_lowercase).as_deref(),
            Some("" | "1" | "true" | "yes" | "on")
        )
    }
}

impl fmt::Display for DeviceSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.driver)?;
        if !self.value.is_empty() {
            write!(f, "={}", self.value)?;
        }
        for (k, v) in &self.args {
            if v.is_empty() {
                write!(f, ",{}", k)?;
            } else {
                write!(f, ",{}={}", k, v)?;
            }
        }
        Ok(())
    }
}

pub type SourceFactory = fn(&DeviceSpec) -> DynResult<Box<dyn SampleSource>>;
pub type SinkFactory = fn(&DeviceSpec, u32, bool) -> DynResult<Box<dyn AudioSink>>;

/// Context for registering and instantiating device backends.
#[derive(Clone)]
pub struct RegistrationContext {
    sources: HashMap<String, SourceFactory>,
    sinks: HashMap<String, SinkFactory>,
}

impl RegistrationContext {
    /// Create a new empty registration context.
    pub fn new() -> Self {
        Self {
            sources: HashMap::new(),
            sinks: HashMap::new(),
        }
    }

    /// Context with every backend enabled by features.
    pub fn with_builtin_backends() -> Self {
        let mut context = Self::new();
        register_builtin_backends_on(&mut context);
        context
    }

    /// Register a source factory under a stable name (e.g. "file").
    pub fn register_source(&mut self, name: &str, factory: SourceFactory) {
        self.sources.insert(normalize_name(name), factory);
    }

    pub fn register_sink(&mut self, name: &str, factory: SinkFactory) {
        self.sinks.insert(normalize_name(name), factory);
    }

    pub fn is_source_registered(&self, name: &str) -> bool {
        self.sources.contains_key(&normalize_name(name))
    }

    pub fn is_sink_registered(&self, name: &str) -> bool {
        self.sinks.contains_key(&normalize_name(name))
    }

    /// List registered source drivers.
    pub fn registered_sources(&self) -> Vec<String> {
        let mut names: Vec<String> = self.sources.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn registered_sinks(&self) -> Vec<String> {
        let mut names: Vec<String> = self.sinks.keys().cloned().collect();
        names.sort();
        names
    }

    /// Instantiate a source from its device string.
    pub fn build_source(&self, spec: &str) -> DynResult<Box<dyn SampleSource>> {
        let spec = DeviceSpec::parse(spec)?;
        let factory = self
            .sources
            .get(spec.driver())
            .ok_or_else(|| format!("Unknown source driver: {}", spec.driver()))?;
        factory(&spec)
    }

    /// Instantiate an audio sink; an empty string selects [`DEFAULT_AUDIO_DRIVER`].
    pub fn build_sink(&self, spec: &str, rate: u32, stereo: bool) -> DynResult<Box<dyn AudioSink>> {
        let spec = if spec.trim().is_empty() {
            DeviceSpec::parse(DEFAULT_AUDIO_DRIVER)?
        } else {
            DeviceSpec::parse(spec)?
        };
        let factory = self
            .sinks
            .get(spec.driver())
            .ok_or_else(|| format!("Unknown audio driver: {}", spec.driver()))?;
        factory(&spec, rate, stereo)
    }

    /// Merge another registration context into this one.
    pub fn extend_from(&mut self, other: &RegistrationContext) {
        for (name, factory) in &other.sources {
            self.sources.insert(name.clone(), *factory);
        }
        for (name, factory) in &other.sinks {
            self.sinks.insert(name.clone(), *factory);
        }
    }
}

impl Default for RegistrationContext {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceFactory for RegistrationContext {
    fn open_source(&self, spec: &str) -> DynResult<Box<dyn SampleSource>> {
        self.build_source(spec)
    }

    fn fallback_source(&self) -> Box<dyn SampleSource> {
        Box::new(DummySource::default())
    }

    fn open_audio_sink(
        &self,
        spec: &str,
        rate: u32,
        stereo: bool,
    ) -> DynResult<Box<dyn AudioSink>> {
        self.build_sink(spec, rate, stereo)
    }
}

/// Register all built-in backends enabled by features on a context.
pub fn register_builtin_backends_on(context: &mut RegistrationContext) {
    context.register_source("dummy", dummy_factory);
    context.register_source("file", file_factory);
    #[cfg(feature = "soapysdr")]
    context.register_source("soapysdr", soapysdr_factory);

    context.register_sink("null", null_sink_factory);
    #[cfg(feature = "cpal")]
    context.register_sink("cpal", cpal_sink_factory);
}

fn dummy_factory(spec: &DeviceSpec) -> DynResult<Box<dyn SampleSource>> {
    Ok(Box::new(DummySource::from_spec(spec)?))
}

fn file_factory(spec: &DeviceSpec) -> DynResult<Box<dyn SampleSource>> {
    Ok(Box::new(FileSource::from_spec(spec)?))
}

#[cfg(feature = "soapysdr")]
fn soapysdr_factory(spec: &DeviceSpec) -> DynResult<Box<dyn SampleSource>> {
    let args: Vec<String> = spec
        .args()
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect();
    Ok(Box::new(SoapySource::open(&args.join(","))?))
}

fn null_sink_factory(_spec: &DeviceSpec, rate: u32, _stereo: bool) -> DynResult<Box<dyn AudioSink>> {
    Ok(Box::new(NullAudio::new(rate)))
}

#[cfg(feature = "cpal")]
fn cpal_sink_factory(spec: &DeviceSpec, rate: u32, stereo: bool) -> DynResult<Box<dyn AudioSink>> {
    let name = (!spec.value().is_empty()).then(|| spec.value());
    Ok(Box::new(audio::CpalAudio::open(name, rate, stereo)?))
}
