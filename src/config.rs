use std::{env, path::PathBuf, str::FromStr};

use crate::matching::MatchThresholds;

const MODEL_FILE: &str = "frozen_graph.pb";
const CLASS_LIST_FILE: &str = "class_list.txt";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{name} must be a valid {expected}, got {value:?}")]
    Invalid {
        name: &'static str,
        expected: &'static str,
        value: String,
    },
    #[error("OCR_THRESHOLD must be between 0 and 1, got {0}")]
    OcrThresholdRange(f32),
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub port: u16,
    pub body_limit_bytes: usize,
    pub model_dir: PathBuf,
    pub model_name: String,
    pub model_stage: String,
    pub model_url: Option<String>,
    pub class_list_url: Option<String>,
    pub download_token: Option<String>,
    pub image_width: u32,
    pub image_height: u32,
    pub thresholds: MatchThresholds,
    pub ocr_binary: String,
    pub ocr_language: String,
    pub openai_key: Option<String>,
    pub openai_model: String,
    pub openai_base_url: String,
}

impl Settings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        // Empty values are treated as unset.
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let text = |name: &str, default: &str| var(name).unwrap_or_else(|| default.to_string());

        let body_limit_mb: usize = parse(&var, "BODY_LIMIT_MB", "integer", 5)?;
        let body_limit_bytes = body_limit_mb
            .checked_mul(1024 * 1024)
            .ok_or_else(|| ConfigError::Invalid {
                name: "BODY_LIMIT_MB",
                expected: "size in MB",
                value: body_limit_mb.to_string(),
            })?;
        let ocr_threshold: f32 = parse(&var, "OCR_THRESHOLD", "number", 0.5)?;
        if !(0.0..=1.0).contains(&ocr_threshold) {
            return Err(ConfigError::OcrThresholdRange(ocr_threshold));
        }

        Ok(Settings {
            port: parse(&var, "PORT", "port number between 0 and 65535", 5020)?,
            body_limit_bytes,
            model_dir: PathBuf::from(text("MODEL_DIR", "./model")),
            model_name: text("MODEL_NAME", "spice_model"),
            model_stage: text("MODEL_STAGE", "Production"),
            model_url: var("MODEL_URL"),
            class_list_url: var("CLASS_LIST_URL"),
            download_token: var("MODEL_DOWNLOAD_TOKEN"),
            image_width: parse(&var, "IMAGE_WIDTH", "integer", 256)?,
            image_height: parse(&var, "IMAGE_HEIGHT", "integer", 192)?,
            thresholds: MatchThresholds {
                ocr_threshold,
                levenshtein_threshold: parse(&var, "LEVENSHTEIN_THRESHOLD", "integer", 3)?,
            },
            ocr_binary: text("OCR_BINARY", "tesseract"),
            ocr_language: text("OCR_LANG", "eng"),
            openai_key: var("OPENAI_KEY"),
            openai_model: text("OPENAI_MODEL", "gpt-3.5-turbo"),
            openai_base_url: text("OPENAI_BASE_URL", "https://api.openai.com/v1"),
        })
    }

    pub fn model_path(&self) -> PathBuf {
        self.model_dir.join(MODEL_FILE)
    }

    pub fn class_list_path(&self) -> PathBuf {
        self.model_dir.join(CLASS_LIST_FILE)
    }
}

fn parse<T, F>(
    var: &F,
    name: &'static str,
    expected: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match var(name) {
        None => Ok(default),
        Some(value) => value.trim().parse().map_err(|_| ConfigError::Invalid {
            name,
            expected,
            value,
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn settings_from(pairs: &[(&str, &str)]) -> Result<Settings, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Settings::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn defaults() {
        let settings = settings_from(&[]).unwrap();

        assert_eq!(settings.port, 5020);
        assert_eq!(settings.body_limit_bytes, 5 * 1024 * 1024);
        assert_eq!(settings.model_name, "spice_model");
        assert_eq!(settings.model_stage, "Production");
        assert_eq!((settings.image_width, settings.image_height), (256, 192));
        assert_eq!(settings.thresholds, MatchThresholds::default());
        assert_eq!(settings.ocr_binary, "tesseract");
        assert!(settings.openai_key.is_none());
        assert!(settings.model_url.is_none());
        assert_eq!(settings.model_path(), PathBuf::from("./model/frozen_graph.pb"));
        assert_eq!(settings.class_list_path(), PathBuf::from("./model/class_list.txt"));
    }

    #[test]
    fn overrides() {
        let settings = settings_from(&[
            ("PORT", "8080"),
            ("BODY_LIMIT_MB", "12"),
            ("OCR_THRESHOLD", "0.75"),
            ("LEVENSHTEIN_THRESHOLD", "2"),
            ("MODEL_DIR", "/srv/models"),
            ("OPENAI_KEY", "sk-test"),
        ])
        .unwrap();

        assert_eq!(settings.port, 8080);
        assert_eq!(settings.body_limit_bytes, 12 * 1024 * 1024);
        assert_eq!(settings.thresholds.ocr_threshold, 0.75);
        assert_eq!(settings.thresholds.levenshtein_threshold, 2);
        assert_eq!(settings.model_path(), PathBuf::from("/srv/models/frozen_graph.pb"));
        assert_eq!(settings.openai_key.as_deref(), Some("sk-test"));
    }

    #[test]
    fn empty_key_is_unset() {
        let settings = settings_from(&[("OPENAI_KEY", ""), ("PORT", " ")]).unwrap();

        assert!(settings.openai_key.is_none());
        assert_eq!(settings.port, 5020);
    }

    #[test]
    fn invalid_port_is_an_error() {
        let err = settings_from(&[("PORT", "70000")]).unwrap_err();

        assert!(matches!(err, ConfigError::Invalid { name: "PORT", .. }));
    }

    #[test]
    fn oversized_body_limit_is_an_error() {
        let err = settings_from(&[("BODY_LIMIT_MB", "18446744073709551615")]).unwrap_err();

        assert!(matches!(
            err,
            ConfigError::Invalid {
                name: "BODY_LIMIT_MB",
                ..
            }
        ));
    }

    #[test]
    fn ocr_threshold_out_of_range() {
        let err = settings_from(&[("OCR_THRESHOLD", "1.5")]).unwrap_err();

        assert!(matches!(err, ConfigError::OcrThresholdRange(_)));
    }
}
