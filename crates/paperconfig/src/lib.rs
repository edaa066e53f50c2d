//! Configuration model for the wallflow daemon.
//!
//! A config file is a versioned TOML document with a `[defaults]` section and
//! optional per-output `[outputs.<name>]` overrides. [`ConfigFile::resolve`]
//! merges the two into the immutable [`WallpaperConfig`] value that the
//! engine publishes through its double-buffered slots. A published
//! `WallpaperConfig` is never mutated; every reload produces a fresh value.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};

/// Number of auxiliary texture channels a shader target may bind.
pub const CHANNEL_COUNT: usize = 4;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// How a decoded image is mapped onto the output surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DisplayMode {
    Fill,
    Fit,
    Stretch,
    Center,
    Tile,
}

impl Default for DisplayMode {
    fn default() -> Self {
        Self::Fill
    }
}

/// Animation blended between the outgoing and incoming texture on a switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransitionKind {
    None,
    Fade,
    Wipe,
}

impl Default for TransitionKind {
    fn default() -> Self {
        Self::Fade
    }
}

/// Order in which rotation entries are visited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RotationOrder {
    Continuous,
    Shuffle,
}

impl Default for RotationOrder {
    fn default() -> Self {
        Self::Continuous
    }
}

/// A single rotation entry. The image/shader split is a tagged variant so an
/// entry carrying both (or shader-only settings on an image) cannot exist.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum RotationTarget {
    Image {
        image: PathBuf,
    },
    Shader {
        shader: PathBuf,
        #[serde(default = "default_shader_speed")]
        speed: f32,
    },
}

impl RotationTarget {
    /// Path of the underlying asset, regardless of variant.
    pub fn path(&self) -> &std::path::Path {
        match self {
            RotationTarget::Image { image } => image,
            RotationTarget::Shader { shader, .. } => shader,
        }
    }

    pub fn is_animated(&self) -> bool {
        matches!(self, RotationTarget::Shader { .. })
    }
}

/// Pacing settings for animated (shader) content.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct AnimationSettings {
    /// Target frame rate when `vsync` is disabled.
    #[serde(default = "default_fps")]
    pub fps: f32,
    /// When true, the display's own present cadence paces redraws.
    #[serde(default = "default_vsync")]
    pub vsync: bool,
}

impl Default for AnimationSettings {
    fn default() -> Self {
        Self {
            fps: default_fps(),
            vsync: default_vsync(),
        }
    }
}

/// Fully resolved per-output configuration. Immutable once published.
#[derive(Debug, Clone, PartialEq)]
pub struct WallpaperConfig {
    pub mode: DisplayMode,
    pub duration: Duration,
    pub transition: TransitionKind,
    pub transition_duration: Duration,
    pub animation: AnimationSettings,
    pub order: RotationOrder,
    pub rotation: Vec<RotationTarget>,
    pub rotation_index: usize,
    pub channels: Vec<PathBuf>,
}

impl WallpaperConfig {
    pub fn target(&self, index: usize) -> Option<&RotationTarget> {
        self.rotation.get(index)
    }

    pub fn rotation_len(&self) -> usize {
        self.rotation.len()
    }
}

/// Shared shape of `[defaults]` and `[outputs.<name>]` sections.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Section {
    #[serde(default)]
    pub mode: Option<DisplayMode>,
    #[serde(default, deserialize_with = "deserialize_duration_opt")]
    pub duration: Option<Duration>,
    #[serde(default)]
    pub transition: Option<TransitionKind>,
    #[serde(default, deserialize_with = "deserialize_duration_opt")]
    pub transition_duration: Option<Duration>,
    #[serde(default)]
    pub fps: Option<f32>,
    #[serde(default)]
    pub vsync: Option<bool>,
    #[serde(default)]
    pub order: Option<RotationOrder>,
    #[serde(default)]
    pub rotation: Option<Vec<RotationTarget>>,
    #[serde(default)]
    pub channels: Option<Vec<PathBuf>>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ConfigFile {
    pub version: u32,
    #[serde(default)]
    pub defaults: Section,
    #[serde(default)]
    pub outputs: BTreeMap<String, Section>,
}

fn default_shader_speed() -> f32 {
    1.0
}

fn default_fps() -> f32 {
    30.0
}

fn default_vsync() -> bool {
    false
}

fn default_duration() -> Duration {
    Duration::from_secs(300)
}

fn default_transition_duration() -> Duration {
    Duration::from_millis(300)
}

fn deserialize_duration_opt<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    struct Visitor;
    impl<'de> de::Visitor<'de> for Visitor {
        type Value = Option<Duration>;

        fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
            formatter.write_str("a duration as number of seconds or human-readable string")
        }

        fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            humantime::parse_duration(v)
                .map(Some)
                .map_err(|err| E::custom(format!("invalid duration '{v}': {err}")))
        }

        fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(Some(Duration::from_secs(v)))
        }

        fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            if v < 0 {
                return Err(E::custom("duration must be non-negative"));
            }
            Ok(Some(Duration::from_secs(v as u64)))
        }

        fn visit_f64<E>(self, v: f64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            if v.is_nan() || v.is_sign_negative() {
                return Err(E::custom("duration must be non-negative"));
            }
            Ok(Some(Duration::from_secs_f64(v)))
        }

        fn visit_none<E>(self) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(None)
        }

        fn visit_unit<E>(self) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(None)
        }
    }

    deserializer.deserialize_any(Visitor)
}

impl ConfigFile {
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let raw: ConfigFile = toml::from_str(input)?;
        raw.validate()?;
        Ok(raw)
    }

    /// Resolves the effective configuration for one output, layering the
    /// output's section over `[defaults]`.
    pub fn resolve(&self, output: &str) -> Result<WallpaperConfig, ConfigError> {
        let over = self.outputs.get(output);
        fn pick<T>(
            over: Option<&Section>,
            defaults: &Section,
            field: impl Fn(&Section) -> Option<T>,
        ) -> Option<T> {
            over.and_then(&field).or_else(|| field(defaults))
        }

        let rotation = over
            .and_then(|s| s.rotation.clone())
            .or_else(|| self.defaults.rotation.clone())
            .ok_or_else(|| {
                ConfigError::Invalid(format!("no rotation list applies to output '{output}'"))
            })?;

        let fps = over
            .and_then(|s| s.fps)
            .or(self.defaults.fps)
            .unwrap_or_else(default_fps);
        let vsync = over
            .and_then(|s| s.vsync)
            .or(self.defaults.vsync)
            .unwrap_or_else(default_vsync);

        Ok(WallpaperConfig {
            mode: pick(over, &self.defaults, |s| s.mode).unwrap_or_default(),
            duration: pick(over, &self.defaults, |s| s.duration).unwrap_or_else(default_duration),
            transition: pick(over, &self.defaults, |s| s.transition).unwrap_or_default(),
            transition_duration: pick(over, &self.defaults, |s| s.transition_duration)
                .unwrap_or_else(default_transition_duration),
            animation: AnimationSettings { fps, vsync },
            order: pick(over, &self.defaults, |s| s.order).unwrap_or_default(),
            rotation,
            rotation_index: 0,
            channels: over
                .and_then(|s| s.channels.clone())
                .or_else(|| self.defaults.channels.clone())
                .unwrap_or_default(),
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.version != 1 {
            return Err(ConfigError::Invalid(format!(
                "unsupported config version {}; expected 1",
                self.version
            )));
        }

        if self.defaults.rotation.is_none()
            && (self.outputs.is_empty()
                || self.outputs.values().any(|s| s.rotation.is_none()))
        {
            return Err(ConfigError::Invalid(
                "defaults.rotation is required unless every output defines its own".into(),
            ));
        }

        validate_section("defaults", &self.defaults)?;
        for (name, section) in &self.outputs {
            if name.trim().is_empty() {
                return Err(ConfigError::Invalid("output name may not be empty".into()));
            }
            validate_section(name, section)?;
        }

        Ok(())
    }
}

fn validate_section(name: &str, section: &Section) -> Result<(), ConfigError> {
    if let Some(duration) = section.duration {
        if duration.is_zero() {
            return Err(ConfigError::Invalid(format!(
                "section '{name}': duration must be greater than zero"
            )));
        }
    }

    if let Some(fps) = section.fps {
        if !fps.is_finite() || fps <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "section '{name}': fps must be a positive number"
            )));
        }
    }

    if let Some(rotation) = &section.rotation {
        if rotation.is_empty() {
            return Err(ConfigError::Invalid(format!(
                "section '{name}': rotation list may not be empty"
            )));
        }
        for target in rotation {
            if target.path().as_os_str().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "section '{name}': rotation entry has an empty path"
                )));
            }
            if let RotationTarget::Shader { speed, .. } = target {
                if !speed.is_finite() || *speed <= 0.0 {
                    return Err(ConfigError::Invalid(format!(
                        "section '{name}': shader speed must be positive"
                    )));
                }
            }
        }
    }

    if let Some(channels) = &section.channels {
        if channels.len() > CHANNEL_COUNT {
            return Err(ConfigError::Invalid(format!(
                "section '{name}': at most {CHANNEL_COUNT} texture channels are supported"
            )));
        }
    }

    Ok(())
}
