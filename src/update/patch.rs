use crate::config::WorkerConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Serializable description of a change to a worker configuration
///
/// Unset fields keep their current value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<PathBuf>,

    /// Environment variables to add or overwrite
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub env_set: HashMap<String, String>,

    /// Environment variables to remove
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env_unset: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_signal: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_timeout_secs: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_file: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub freshness_window_secs: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_rate_threshold: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_memory: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requires: Option<Vec<String>>,
}

impl ConfigPatch {
    pub fn is_empty(&self) -> bool {
        *self == ConfigPatch::default()
    }

    pub fn apply(&self, config: &mut WorkerConfig) {
        if let Some(ref script) = self.script {
            config.script = script.clone();
        }
        if let Some(ref args) = self.args {
            config.args = args.clone();
        }
        if let Some(ref cwd) = self.cwd {
            config.cwd = Some(cwd.clone());
        }
        for key in &self.env_unset {
            config.env.remove(key);
        }
        for (key, value) in &self.env_set {
            config.env.insert(key.clone(), value.clone());
        }
        if let Some(enabled) = self.enabled {
            config.enabled = enabled;
        }
        if let Some(ref stop_signal) = self.stop_signal {
            config.stop_signal = stop_signal.clone();
        }
        if let Some(secs) = self.stop_timeout_secs {
            config.stop_timeout_secs = secs;
        }
        if let Some(ref status_file) = self.status_file {
            config.status_file = Some(status_file.clone());
        }
        if let Some(secs) = self.freshness_window_secs {
            config.freshness_window_secs = secs;
        }
        if let Some(threshold) = self.error_rate_threshold {
            config.error_rate_threshold = threshold;
        }
        if let Some(bytes) = self.max_memory {
            config.max_memory = Some(bytes);
        }
        if let Some(ref requires) = self.requires {
            config.requires = requires.clone();
        }
    }
}
