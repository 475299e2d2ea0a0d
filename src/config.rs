//! Model profile: the resize and normalization pair a trained artifact expects.
//!
//! A profile is resolved once at startup and never changed afterwards. The
//! input size and the normalization are deliberately one value so they cannot
//! drift apart between deployments.
//!
//! Resolution order:
//! 1. `--profile-file` (TOML)
//! 2. `--profile` preset name
//! 3. `<model stem>.profile.toml` next to the model file
//! 4. `$CONFIG_DIR/insectifica/profile.toml`
//! 5. the `mobilenetv2-190` preset

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{Error, Result};

/// ImageNet normalization mean values (RGB)
pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
/// ImageNet normalization std values (RGB)
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

pub const DEFAULT_PRESET: &str = "mobilenetv2-190";

/// Per-channel transform applied after resizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Normalization {
    /// `x / 255`
    #[serde(alias = "unit-scale", alias = "rescale")]
    Unit,
    /// `x / 127.5 - 1`, the Keras MobileNetV2 transform
    #[serde(alias = "mobilenet-v2", alias = "tf")]
    MobileNet,
    /// `(x / 255 - mean) / std`
    #[serde(alias = "torch")]
    ImageNet,
    /// Pixel values passed through as floats; the graph rescales internally
    Raw,
}

impl Normalization {
    #[inline]
    pub fn apply(self, value: u8, channel: usize) -> f32 {
        let v = value as f32;
        match self {
            Normalization::Unit => v / 255.0,
            Normalization::MobileNet => v / 127.5 - 1.0,
            Normalization::ImageNet => (v / 255.0 - IMAGENET_MEAN[channel]) / IMAGENET_STD[channel],
            Normalization::Raw => v,
        }
    }
}

/// Memory layout of the input tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TensorLayout {
    /// `[N, H, W, C]`, what tf2onnx emits for Keras models
    #[default]
    Nhwc,
    /// `[N, C, H, W]`
    Nchw,
}

/// What the classifier's output row holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputKind {
    /// Already a softmax distribution
    #[default]
    Probabilities,
    /// Raw scores; softmax is applied per row
    Logits,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModelProfile {
    /// Square spatial resolution the weights were trained at
    pub input_size: u32,
    pub normalization: Normalization,
    #[serde(default)]
    pub layout: TensorLayout,
    #[serde(default)]
    pub output: OutputKind,
}

impl ModelProfile {
    pub const PRESETS: [&'static str; 4] = [
        "mobilenetv2-190",
        "mobilenetv2-224",
        "mobilenetv3-224",
        "rescaling-190",
    ];

    pub fn preset(name: &str) -> Option<Self> {
        let (input_size, normalization) = match name.to_ascii_lowercase().as_str() {
            "mobilenetv2-190" => (190, Normalization::MobileNet),
            "mobilenetv2-224" => (224, Normalization::MobileNet),
            // V3 ships its own preprocessing layer inside the graph
            "mobilenetv3-224" => (224, Normalization::Raw),
            "rescaling-190" => (190, Normalization::Raw),
            _ => return None,
        };
        Some(Self {
            input_size,
            normalization,
            layout: TensorLayout::Nhwc,
            output: OutputKind::Probabilities,
        })
    }

    pub fn from_toml_str(s: &str) -> Result<Self> {
        let profile: ModelProfile = toml::from_str(s)?;
        profile.validate()
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::startup(format!("cannot read profile {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
            .map_err(|e| Error::startup(format!("bad profile {}: {}", path.display(), e)))
    }

    fn validate(self) -> Result<Self> {
        if self.input_size == 0 {
            return Err(Error::startup("input_size must be greater than zero"));
        }
        Ok(self)
    }

    /// Shape of a batch of `n` preprocessed images.
    pub fn batch_shape(&self, n: usize) -> [usize; 4] {
        let s = self.input_size as usize;
        match self.layout {
            TensorLayout::Nhwc => [n, s, s, 3],
            TensorLayout::Nchw => [n, 3, s, s],
        }
    }
}

impl Default for ModelProfile {
    fn default() -> Self {
        Self {
            input_size: 190,
            normalization: Normalization::MobileNet,
            layout: TensorLayout::Nhwc,
            output: OutputKind::Probabilities,
        }
    }
}

impl fmt::Display for ModelProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}x{} {:?} {:?} {:?}",
            self.input_size, self.input_size, self.normalization, self.layout, self.output
        )
    }
}

/// Where the active profile came from, for the startup log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProfileOrigin {
    File(PathBuf),
    Preset(String),
    Sidecar(PathBuf),
    UserConfig(PathBuf),
    Default,
}

impl fmt::Display for ProfileOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProfileOrigin::File(p) => write!(f, "file {}", p.display()),
            ProfileOrigin::Preset(name) => write!(f, "preset {}", name),
            ProfileOrigin::Sidecar(p) => write!(f, "sidecar {}", p.display()),
            ProfileOrigin::UserConfig(p) => write!(f, "user config {}", p.display()),
            ProfileOrigin::Default => write!(f, "default preset {}", DEFAULT_PRESET),
        }
    }
}

/// Sidecar path for a model: `insect.onnx` -> `insect.profile.toml`.
pub fn sidecar_path(model_path: &Path) -> PathBuf {
    model_path.with_extension("profile.toml")
}

fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("insectifica").join("profile.toml"))
}

pub fn resolve_profile(
    file: Option<&Path>,
    preset: Option<&str>,
    model_path: &Path,
) -> Result<(ModelProfile, ProfileOrigin)> {
    resolve_profile_with(file, preset, model_path, user_config_path())
}

fn resolve_profile_with(
    file: Option<&Path>,
    preset: Option<&str>,
    model_path: &Path,
    user_config: Option<PathBuf>,
) -> Result<(ModelProfile, ProfileOrigin)> {
    if let Some(path) = file {
        return Ok((ModelProfile::from_file(path)?, ProfileOrigin::File(path.to_path_buf())));
    }

    if let Some(name) = preset {
        let profile = ModelProfile::preset(name).ok_or_else(|| {
            Error::startup(format!(
                "unknown profile preset '{}', expected one of {:?}",
                name,
                ModelProfile::PRESETS
            ))
        })?;
        return Ok((profile, ProfileOrigin::Preset(name.to_string())));
    }

    let sidecar = sidecar_path(model_path);
    if sidecar.is_file() {
        return Ok((ModelProfile::from_file(&sidecar)?, ProfileOrigin::Sidecar(sidecar)));
    }
    debug!("No profile sidecar at {}", sidecar.display());

    if let Some(path) = user_config.filter(|p| p.is_file()) {
        return Ok((ModelProfile::from_file(&path)?, ProfileOrigin::UserConfig(path)));
    }

    Ok((ModelProfile::default(), ProfileOrigin::Default))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn default_matches_named_preset() {
        assert_eq!(ModelProfile::preset(DEFAULT_PRESET), Some(ModelProfile::default()));
    }

    #[test]
    fn every_listed_preset_resolves() {
        for name in ModelProfile::PRESETS {
            assert!(ModelProfile::preset(name).is_some(), "{name}");
        }
        assert!(ModelProfile::preset("resnet50").is_none());
    }

    #[test]
    fn normalization_ranges() {
        assert_eq!(Normalization::Unit.apply(255, 0), 1.0);
        assert_eq!(Normalization::Unit.apply(0, 0), 0.0);
        assert_eq!(Normalization::MobileNet.apply(0, 1), -1.0);
        assert_eq!(Normalization::MobileNet.apply(255, 1), 1.0);
        assert_eq!(Normalization::Raw.apply(128, 2), 128.0);
        let red = Normalization::ImageNet.apply(255, 0);
        assert!((red - (1.0 - 0.485) / 0.229).abs() < 1e-5);
    }

    #[test]
    fn parses_toml_with_defaults() {
        let profile = ModelProfile::from_toml_str(
            r#"
            input_size = 224
            normalization = "imagenet"
            "#,
        )
        .unwrap();
        assert_eq!(profile.input_size, 224);
        assert_eq!(profile.normalization, Normalization::ImageNet);
        assert_eq!(profile.layout, TensorLayout::Nhwc);
        assert_eq!(profile.output, OutputKind::Probabilities);
    }

    #[test]
    fn rejects_zero_size_and_unknown_keys() {
        assert!(ModelProfile::from_toml_str("input_size = 0\nnormalization = \"unit\"").is_err());
        assert!(
            ModelProfile::from_toml_str("input_size = 160\nnormalization = \"unit\"\nmean = 1")
                .is_err()
        );
    }

    #[test]
    fn batch_shape_follows_layout() {
        let mut profile = ModelProfile::default();
        assert_eq!(profile.batch_shape(1), [1, 190, 190, 3]);
        profile.layout = TensorLayout::Nchw;
        assert_eq!(profile.batch_shape(2), [2, 3, 190, 190]);
    }

    #[test]
    fn sidecar_beats_default_and_preset_beats_sidecar() {
        let dir = tempfile::tempdir().unwrap();
        let model = dir.path().join("insect.onnx");
        fs::write(
            dir.path().join("insect.profile.toml"),
            "input_size = 160\nnormalization = \"unit\"\nlayout = \"nchw\"\noutput = \"logits\"\n",
        )
        .unwrap();

        let (profile, origin) = resolve_profile_with(None, None, &model, None).unwrap();
        assert_eq!(profile.input_size, 160);
        assert_eq!(profile.layout, TensorLayout::Nchw);
        assert_eq!(profile.output, OutputKind::Logits);
        assert!(matches!(origin, ProfileOrigin::Sidecar(_)));

        let (profile, origin) =
            resolve_profile_with(None, Some("mobilenetv2-224"), &model, None).unwrap();
        assert_eq!(profile.input_size, 224);
        assert_eq!(origin, ProfileOrigin::Preset("mobilenetv2-224".into()));
    }

    #[test]
    fn falls_back_to_default() {
        let dir = tempfile::tempdir().unwrap();
        let model = dir.path().join("insect.onnx");
        let (profile, origin) = resolve_profile_with(None, None, &model, None).unwrap();
        assert_eq!(profile, ModelProfile::default());
        assert_eq!(origin, ProfileOrigin::Default);
    }

    #[test]
    fn unknown_preset_is_a_startup_failure() {
        let err = resolve_profile_with(None, Some("nope"), Path::new("m.onnx"), None).unwrap_err();
        assert!(matches!(err, Error::StartupFailure(_)));
    }
}
