use std::collections::BTreeMap;
use std::env;

use indexmap::IndexMap;
use thiserror::Error;

use super::value::{ConfigMap, ConfigValue, EffectiveConfig};
use crate::spec::{is_config_key, is_spec_tag};

pub const API_KEY_ENV: &str = "OPENAI_API_KEY";

/// Environment variables that feed a differently named config key.
pub const ENV_KEY_MAP: &[(&str, &str)] = &[
    (API_KEY_ENV, "api_key"),
    ("OPENAI_ORG_ID", "organization"),
    ("OPENAI_PROJECT_ID", "project"),
    ("OAI_API_BASE", "api_base"),
    ("OAI_API_PATH", "api_path"),
    ("OAI_CONTINUE_ON_ERROR", "continue_on_error"),
];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("OPENAI_API_KEY (or --api-key) not provided")]
    MissingCredential,
}

pub fn env_snapshot() -> BTreeMap<String, String> {
    env::vars().collect()
}

/// Keys the environment contributes. Mapped names override same-named tags.
pub fn env_layer(env: &BTreeMap<String, String>) -> ConfigMap {
    let mut out = ConfigMap::new();
    for (name, value) in env {
        let key = name.to_ascii_lowercase();
        if is_spec_tag(&key) && !value.trim().is_empty() {
            out.insert(key, ConfigValue::Text(value.clone()));
        }
    }
    for (name, key) in ENV_KEY_MAP {
        let Some(value) = env.get(*name) else {
            continue;
        };
        if value.trim().is_empty() {
            continue;
        }
        out.insert((*key).to_string(), ConfigValue::Text(value.trim().to_string()));
    }
    out
}

/// Layers spec-file config, environment and caller overrides, later layers
/// winning. Environment and caller keys outside the allow-list are dropped.
pub fn merge_config(
    file: &IndexMap<String, String>,
    env: &BTreeMap<String, String>,
    overrides: &ConfigMap,
) -> EffectiveConfig {
    let mut values = ConfigMap::new();
    for (key, value) in file {
        values.insert(key.clone(), ConfigValue::Text(value.clone()));
    }
    for (key, value) in env_layer(env) {
        values.insert(key, value);
    }
    for (key, value) in overrides {
        if is_config_key(key) {
            values.insert(key.clone(), value.clone());
        }
    }
    EffectiveConfig::new(values)
}

pub fn resolve_api_key(config: &EffectiveConfig) -> Result<String, ConfigError> {
    config
        .text("api_key")
        .map(str::to_string)
        .ok_or(ConfigError::MissingCredential)
}
