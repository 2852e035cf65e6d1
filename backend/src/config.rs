use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};

const DEFAULT_CONFIG_PATH: &str = "config/server.yaml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("Invalid config file: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("Invalid value for {name}: {value}")]
    InvalidEnv { name: &'static str, value: String },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub artifacts: ArtifactConfig,
    pub detector: DetectorConfig,
    pub anxiety: AnxietyConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Largest accepted request body, in bytes.
    pub payload_limit: usize,
    pub workers: Option<usize>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
            payload_limit: 16 * 1024 * 1024,
            workers: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArtifactConfig {
    pub model_dir: PathBuf,
    /// Root the secondary cascade locations are resolved against.
    pub base_dir: PathBuf,
    pub stress_model: String,
    pub stress_scaler: String,
    pub suggestion_model: String,
    pub suggestion_encoder: String,
    pub suggestion_v2_model: String,
    pub suggestion_v2_encoder: String,
    pub depression_model: String,
    pub anxiety_model: String,
    pub face_model: String,
    pub cascade_file: String,
    pub bundled_cascade: PathBuf,
}

impl Default for ArtifactConfig {
    fn default() -> Self {
        Self {
            model_dir: PathBuf::from("Models_App"),
            base_dir: PathBuf::from("."),
            stress_model: "stress_model.onnx".to_string(),
            stress_scaler: "scaler3.json".to_string(),
            suggestion_model: "model_suggest.onnx".to_string(),
            suggestion_encoder: "label_encoder_suggest.json".to_string(),
            suggestion_v2_model: "suggestion_model.onnx".to_string(),
            suggestion_v2_encoder: "depression_scaler.json".to_string(),
            depression_model: "depression_model.onnx".to_string(),
            anxiety_model: "anxiety_model.onnx".to_string(),
            face_model: "model.onnx".to_string(),
            cascade_file: "HaarcascadeclassifierCascadeClassifier.xml".to_string(),
            bundled_cascade: PathBuf::from(
                "/usr/share/opencv4/haarcascades/haarcascade_frontalface_default.xml",
            ),
        }
    }
}

impl ArtifactConfig {
    pub fn path(&self, file_name: &str) -> PathBuf {
        self.model_dir.join(file_name)
    }

    /// Cascade locations in lookup order, the bundled default last.
    pub fn cascade_candidates(&self) -> Vec<PathBuf> {
        vec![
            self.model_dir.join(&self.cascade_file),
            self.base_dir
                .join("..")
                .join("face-expression")
                .join(&self.cascade_file),
            self.base_dir.join(&self.cascade_file),
            self.bundled_cascade.clone(),
        ]
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    pub scale_factor: f64,
    pub min_neighbors: usize,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            scale_factor: 1.1,
            min_neighbors: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnxietyConfig {
    /// Encodings for categorical fields sent as strings, keyed by field name.
    pub categories: HashMap<String, HashMap<String, f32>>,
}

impl Default for AnxietyConfig {
    fn default() -> Self {
        let gender = HashMap::from([("male".to_string(), 0.0), ("female".to_string(), 1.0)]);
        Self {
            categories: HashMap::from([("Gender".to_string(), gender)]),
        }
    }
}

impl AnxietyConfig {
    /// Lowercases category labels so lookups of lowercased input always match.
    fn normalize_labels(&mut self) {
        for table in self.categories.values_mut() {
            *table = table
                .drain()
                .map(|(label, value)| (label.trim().to_lowercase(), value))
                .collect();
        }
    }
}

impl AppConfig {
    /// Reads the YAML file named by `CONFIG_PATH` (or the default location),
    /// then applies environment overrides. A missing file yields defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path =
            env::var("CONFIG_PATH").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        let mut config = if Path::new(&config_path).exists() {
            log::info!("Loading configuration from {}", config_path);
            Self::from_file(Path::new(&config_path))?
        } else {
            log::info!("No config file at {}, using defaults", config_path);
            Self::default()
        };
        config.apply_env()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let config_str = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml(&config_str)
    }

    pub fn from_yaml(config_str: &str) -> Result<Self, ConfigError> {
        let mut config: AppConfig = serde_yaml::from_str(config_str)?;
        config.anxiety.normalize_labels();
        Ok(config)
    }

    fn apply_env(&mut self) -> Result<(), ConfigError> {
        if let Ok(host) = env::var("HOST") {
            self.server.host = host;
        }
        if let Ok(port) = env::var("PORT") {
            self.server.port = port.parse().map_err(|_| ConfigError::InvalidEnv {
                name: "PORT",
                value: port.clone(),
            })?;
        }
        if let Ok(model_dir) = env::var("MODEL_DIR") {
            self.artifacts.model_dir = PathBuf::from(model_dir);
        }
        if let Ok(base_dir) = env::var("BASE_DIR") {
            self.artifacts.base_dir = PathBuf::from(base_dir);
        }
        Ok(())
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_yaml_keeps_defaults() {
        let config = AppConfig::from_yaml(
            "server:\n  port: 8081\nartifacts:\n  model_dir: /srv/models\n",
        )
        .unwrap();

        assert_eq!(config.server.port, 8081);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.artifacts.model_dir, PathBuf::from("/srv/models"));
        assert_eq!(config.artifacts.stress_model, "stress_model.onnx");
        assert_eq!(config.detector.min_neighbors, 3);
        assert_eq!(config.anxiety.categories["Gender"]["female"], 1.0);
    }

    #[test]
    fn cascade_candidates_follow_lookup_order() {
        let artifacts = ArtifactConfig {
            model_dir: PathBuf::from("/app/Models_App"),
            base_dir: PathBuf::from("/app"),
            ..ArtifactConfig::default()
        };
        let candidates = artifacts.cascade_candidates();

        assert_eq!(candidates.len(), 4);
        assert_eq!(
            candidates[0],
            PathBuf::from("/app/Models_App/HaarcascadeclassifierCascadeClassifier.xml")
        );
        assert_eq!(
            candidates[1],
            PathBuf::from("/app/../face-expression/HaarcascadeclassifierCascadeClassifier.xml")
        );
        assert_eq!(
            candidates[2],
            PathBuf::from("/app/HaarcascadeclassifierCascadeClassifier.xml")
        );
        assert_eq!(candidates[3], artifacts.bundled_cascade);
    }

    #[test]
    fn category_labels_are_lowercased() {
        let config = AppConfig::from_yaml(
            "anxiety:\n  categories:\n    Gender:\n      Male: 0\n      ' Female ': 1\n",
        )
        .unwrap();

        let gender = &config.anxiety.categories["Gender"];
        assert_eq!(gender.get("male"), Some(&0.0));
        assert_eq!(gender.get("female"), Some(&1.0));
        assert!(!gender.contains_key("Female"));
    }

    #[test]
    fn invalid_yaml_is_rejected() {
        assert!(matches!(
            AppConfig::from_yaml("server: [1, 2"),
            Err(ConfigError::Yaml(_))
        ));
    }
}
