use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, anyhow};
use serde::Deserialize;

use crate::classifier::DEFAULT_K;

const DEFAULT_CAMERA_INDEX: u32 = 0;
const DEFAULT_VIDEO_WIDTH: u32 = 720;
const DEFAULT_VIDEO_HEIGHT: u32 = 405;
const DEFAULT_MODEL_DIR: &str = "models";
const DEFAULT_PALM_SCORE_THRESHOLD: f32 = 0.5;
const DEFAULT_HAND_CONFIDENCE_THRESHOLD: f32 = 0.5;

pub const CONFIG_PATH_ENV: &str = "GESTURE_TRAINER_CONFIG";
const CAMERA_INDEX_ENV: &str = "GESTURE_TRAINER_CAMERA_INDEX";
const MODEL_DIR_ENV: &str = "GESTURE_TRAINER_MODEL_DIR";
const K_ENV: &str = "GESTURE_TRAINER_K";

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    camera: Option<CameraConfigFile>,
    classifier: Option<ClassifierConfigFile>,
    models: Option<ModelsConfigFile>,
    detection: Option<DetectionConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct CameraConfigFile {
    index: Option<u32>,
    width: Option<u32>,
    height: Option<u32>,
    mirror: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct ClassifierConfigFile {
    k: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct ModelsConfigFile {
    dir: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct DetectionConfigFile {
    palm_score_threshold: Option<f32>,
    hand_confidence_threshold: Option<f32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub camera: CameraSettings,
    pub k: usize,
    pub model_dir: PathBuf,
    pub detection: DetectionSettings,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CameraSettings {
    pub index: u32,
    pub width: u32,
    pub height: u32,
    pub mirror: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetectionSettings {
    pub palm_score_threshold: f32,
    pub hand_confidence_threshold: f32,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self::from_file(ConfigFile::default())
    }
}

impl AppConfig {
    /// Reads the optional config file, then applies environment overrides.
    ///
    /// Not validated yet: command line flags may still replace values, so
    /// callers run [`AppConfig::validate`] once everything is merged.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => read_config_file(path)?,
            None => ConfigFile::default(),
        };
        let mut cfg = Self::from_file(file_cfg);
        cfg.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(cfg)
    }

    fn from_file(file: ConfigFile) -> Self {
        let camera = file.camera.unwrap_or_default();
        let detection = file.detection.unwrap_or_default();
        Self {
            camera: CameraSettings {
                index: camera.index.unwrap_or(DEFAULT_CAMERA_INDEX),
                width: camera.width.unwrap_or(DEFAULT_VIDEO_WIDTH),
                height: camera.height.unwrap_or(DEFAULT_VIDEO_HEIGHT),
                mirror: camera.mirror.unwrap_or(true),
            },
            k: file
                .classifier
                .and_then(|classifier| classifier.k)
                .unwrap_or(DEFAULT_K),
            model_dir: file
                .models
                .and_then(|models| models.dir)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_MODEL_DIR)),
            detection: DetectionSettings {
                palm_score_threshold: detection
                    .palm_score_threshold
                    .unwrap_or(DEFAULT_PALM_SCORE_THRESHOLD),
                hand_confidence_threshold: detection
                    .hand_confidence_threshold
                    .unwrap_or(DEFAULT_HAND_CONFIDENCE_THRESHOLD),
            },
        }
    }

    fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(index) = non_empty(CAMERA_INDEX_ENV) {
            self.camera.index = index
                .trim()
                .parse()
                .map_err(|_| anyhow!("{CAMERA_INDEX_ENV} must be a camera index"))?;
        }
        if let Some(dir) = non_empty(MODEL_DIR_ENV) {
            self.model_dir = PathBuf::from(dir);
        }
        if let Some(k) = non_empty(K_ENV) {
            self.k = k
                .trim()
                .parse()
                .map_err(|_| anyhow!("{K_ENV} must be a positive integer"))?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.k == 0 {
            return Err(anyhow!("classifier.k must be at least 1"));
        }
        if self.camera.width == 0 || self.camera.height == 0 {
            return Err(anyhow!(
                "camera resolution must be non-zero, got {}x{}",
                self.camera.width,
                self.camera.height
            ));
        }
        for (name, value) in [
            (
                "detection.palm_score_threshold",
                self.detection.palm_score_threshold,
            ),
            (
                "detection.hand_confidence_threshold",
                self.detection.hand_confidence_threshold,
            ),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(anyhow!("{name} must be within [0, 1], got {value}"));
            }
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<ConfigFile> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    toml::from_str(&raw).with_context(|| format!("failed to parse config {}", path.display()))
}

#[cfg(test)]
mod tests {
    use std::{collections::HashMap, io::Write};

    use super::*;

    #[test]
    fn defaults_match_capture_target() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.camera.width, 720);
        assert_eq!(cfg.camera.height, 405);
        assert!(cfg.camera.mirror);
        assert_eq!(cfg.k, 3);
        assert_eq!(cfg.model_dir, PathBuf::from("models"));
        cfg.validate().unwrap();
    }

    #[test]
    fn file_values_replace_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[camera]\nindex = 2\nmirror = false\n\n[classifier]\nk = 5\n\n[detection]\nhand_confidence_threshold = 0.8"
        )
        .unwrap();

        let cfg = AppConfig::from_file(read_config_file(file.path()).unwrap());
        assert_eq!(cfg.camera.index, 2);
        assert!(!cfg.camera.mirror);
        assert_eq!(cfg.camera.width, 720);
        assert_eq!(cfg.k, 5);
        assert_eq!(cfg.detection.hand_confidence_threshold, 0.8);
        assert_eq!(cfg.detection.palm_score_threshold, 0.5);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[camera]\nfps = 60").unwrap();
        assert!(read_config_file(file.path()).is_err());
    }

    #[test]
    fn missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(AppConfig::load(Some(&dir.path().join("absent.toml"))).is_err());
    }

    #[test]
    fn invalid_file_value_can_be_replaced_before_validation() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[classifier]\nk = 0").unwrap();

        let mut cfg = AppConfig::load(Some(file.path())).unwrap();
        assert_eq!(cfg.k, 0);
        assert!(cfg.validate().is_err());

        cfg.k = 3;
        cfg.validate().unwrap();
    }

    #[test]
    fn overrides_apply_and_blank_values_are_ignored() {
        let vars: HashMap<&str, &str> = [
            (CAMERA_INDEX_ENV, "1"),
            (MODEL_DIR_ENV, "  "),
            (K_ENV, "7"),
        ]
        .into_iter()
        .collect();

        let mut cfg = AppConfig::default();
        cfg.apply_overrides(|key| vars.get(key).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(cfg.camera.index, 1);
        assert_eq!(cfg.k, 7);
        assert_eq!(cfg.model_dir, PathBuf::from("models"));
    }

    #[test]
    fn malformed_override_is_an_error() {
        let mut cfg = AppConfig::default();
        let err = cfg
            .apply_overrides(|key| (key == K_ENV).then(|| "three".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains(K_ENV));
    }

    #[test]
    fn validation_rejects_bad_values() {
        let mut cfg = AppConfig::default();
        cfg.k = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = AppConfig::default();
        cfg.detection.palm_score_threshold = 1.5;
        assert!(cfg.validate().is_err());

        let mut cfg = AppConfig::default();
        cfg.camera.height = 0;
        assert!(cfg.validate().is_err());
    }
}
