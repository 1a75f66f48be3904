use crate::error::{Error, Result};
use crate::ranker::DEFAULT_THRESHOLD;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Name of the per-project data directory
pub const DATA_DIR: &str = ".recollect";

/// Environment variable pointing at a data directory
pub const PATH_ENV: &str = "RECOLLECT_PATH";

/// Environment variable holding a tracing filter directive
pub const LOG_ENV: &str = "RECOLLECT_LOG";

pub const DEFAULT_CLASSIFIER_FLOOR: f64 = 0.5;
pub const DEFAULT_CLUSTER_THRESHOLD: f64 = 0.8;

/// Embedding models the `config` command knows about
pub static EMBEDDING_MODELS: &[(&str, &str)] = &[
    ("lite", "N-gram hashing - zero dependencies, instant startup"),
    ("server", "External model daemon on a Unix socket, falls back to lite"),
];

/// Typed view of `_config.yaml`, every key optional
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub embedding_model: String,
    pub embedding_dim: usize,
    pub socket_path: String,
    pub embed_timeout_secs: u64,
    pub confidence_threshold: f64,
    pub classifier_floor: f64,
    pub cluster_threshold: f64,
    pub log_level: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            embedding_model: "lite".to_string(),
            embedding_dim: crate::embeddings::LITE_DIM,
            socket_path: "/tmp/recollect-embedder.sock".to_string(),
            embed_timeout_secs: 60,
            confidence_threshold: DEFAULT_THRESHOLD,
            classifier_floor: DEFAULT_CLASSIFIER_FLOOR,
            cluster_threshold: DEFAULT_CLUSTER_THRESHOLD,
            log_level: "warn".to_string(),
        }
    }
}

impl Settings {
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("confidence_threshold", self.confidence_threshold),
            ("classifier_floor", self.classifier_floor),
            ("cluster_threshold", self.cluster_threshold),
        ] {
            if !(-1.0..=1.0).contains(&value) {
                return Err(Error::Config(format!(
                    "{} must be within [-1, 1], got {}",
                    name, value
                )));
            }
        }
        if self.embedding_dim == 0 {
            return Err(Error::Config("embedding_dim must be positive".to_string()));
        }
        Ok(())
    }
}

/// Configuration manager for a data directory
pub struct ProjectConfig {
    data_path: PathBuf,
    config_file: PathBuf,
    values: BTreeMap<String, serde_yaml::Value>,
}

impl ProjectConfig {
    pub fn new(data_path: PathBuf) -> Result<Self> {
        let config_file = data_path.join("_config.yaml");
        let values = if config_file.exists() {
            let content = fs::read_to_string(&config_file)?;
            serde_yaml::from_str::<Option<BTreeMap<String, serde_yaml::Value>>>(&content)?
                .unwrap_or_default()
        } else {
            BTreeMap::new()
        };

        Ok(Self {
            data_path,
            config_file,
            values,
        })
    }

    fn save(&self) -> Result<()> {
        fs::create_dir_all(&self.data_path)?;
        let content = serde_yaml::to_string(&self.values)?;
        fs::write(&self.config_file, content)?;
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).and_then(|v| match v {
            serde_yaml::Value::String(s) => Some(s.clone()),
            serde_yaml::Value::Number(n) => Some(n.to_string()),
            serde_yaml::Value::Bool(b) => Some(b.to_string()),
            _ => None,
        })
    }

    /// Set a key, keeping numbers as numbers.
    ///
    /// Known keys are checked by re-parsing the typed settings before saving.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        let parsed = serde_yaml::from_str::<serde_yaml::Value>(value)
            .ok()
            .filter(|v| matches!(v, serde_yaml::Value::Number(_) | serde_yaml::Value::Bool(_)))
            .unwrap_or_else(|| serde_yaml::Value::String(value.to_string()));

        let previous = self.values.insert(key.to_string(), parsed);
        if let Err(e) = self.settings() {
            match previous {
                Some(old) => self.values.insert(key.to_string(), old),
                None => self.values.remove(key),
            };
            return Err(e);
        }
        self.save()
    }

    pub fn entries(&self) -> impl Iterator<Item = (&String, &serde_yaml::Value)> {
        self.values.iter()
    }

    /// Typed settings with defaults for missing keys
    pub fn settings(&self) -> Result<Settings> {
        let mapping = serde_yaml::to_value(&self.values)?;
        let settings: Settings = serde_yaml::from_value(mapping)
            .map_err(|e| Error::Config(format!("{}: {}", self.config_file.display(), e)))?;
        settings.validate()?;
        Ok(settings)
    }
}

/// Find the data directory.
///
/// Searches upward from the current directory for `.recollect`, then
/// `RECOLLECT_PATH`.
pub fn find_data_path() -> Option<PathBuf> {
    if let Ok(mut current) = std::env::current_dir() {
        loop {
            let candidate = current.join(DATA_DIR);
            if candidate.is_dir() {
                return Some(candidate);
            }
            if !current.pop() {
                break;
            }
        }
    }

    if let Ok(path) = std::env::var(PATH_ENV) {
        let path = PathBuf::from(path);
        if path.is_dir() {
            return Some(path);
        }
    }

    None
}

/// Per-user data directory used when no project directory exists
pub fn default_data_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("recollect")
}

/// Intent library override, if the user placed one in the data directory
pub fn intent_library_file(data_path: &Path) -> Option<PathBuf> {
    let path = data_path.join("intents.yaml");
    path.is_file().then_some(path)
}
