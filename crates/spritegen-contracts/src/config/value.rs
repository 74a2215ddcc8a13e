use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ConfigValue {
    Text(String),
    Flag(bool),
}

impl ConfigValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text.as_str()),
            Self::Flag(_) => None,
        }
    }

    /// Reads the value as a boolean: native flags pass through, text accepts
    /// `true/false/yes/no/on/off/1/0` in any case.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Flag(raw) => Some(*raw),
            Self::Text(raw) => {
                let lowered = raw.trim().to_ascii_lowercase();
                if matches!(lowered.as_str(), "1" | "true" | "yes" | "on") {
                    Some(true)
                } else if matches!(lowered.as_str(), "0" | "false" | "no" | "off") {
                    Some(false)
                } else {
                    None
                }
            }
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            Self::Text(text) => Value::String(text.clone()),
            Self::Flag(flag) => Value::Bool(*flag),
        }
    }
}

impl From<&str> for ConfigValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for ConfigValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<bool> for ConfigValue {
    fn from(value: bool) -> Self {
        Self::Flag(value)
    }
}

pub type ConfigMap = IndexMap<String, ConfigValue>;

/// Fully merged configuration used to build and send requests.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(transparent)]
pub struct EffectiveConfig {
    values: ConfigMap,
}

impl EffectiveConfig {
    pub fn new(values: ConfigMap) -> Self {
        Self { values }
    }

    pub fn get(&self, key: &str) -> Option<&ConfigValue> {
        self.values.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Text value with surrounding whitespace removed; empty text reads as absent.
    pub fn text(&self, key: &str) -> Option<&str> {
        self.get(key)
            .and_then(ConfigValue::as_text)
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }

    pub fn flag(&self, key: &str) -> bool {
        self.get(key)
            .and_then(ConfigValue::as_bool)
            .unwrap_or(false)
    }

    pub fn continue_on_error(&self) -> bool {
        self.flag("continue_on_error")
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ConfigValue)> {
        self.values.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::{ConfigMap, ConfigValue, EffectiveConfig};

    #[test]
    fn bool_parsing_accepts_common_spellings() {
        for raw in ["true", "YES", "1", " on "] {
            assert_eq!(ConfigValue::from(raw).as_bool(), Some(true), "{raw}");
        }
        for raw in ["false", "No", "0", "off"] {
            assert_eq!(ConfigValue::from(raw).as_bool(), Some(false), "{raw}");
        }
        assert_eq!(ConfigValue::from("maybe").as_bool(), None);
        assert_eq!(ConfigValue::from(true).as_bool(), Some(true));
    }

    #[test]
    fn continue_on_error_defaults_to_false() {
        let mut values = ConfigMap::new();
        assert!(!EffectiveConfig::new(values.clone()).continue_on_error());
        values.insert("continue_on_error".to_string(), "garbage".into());
        assert!(!EffectiveConfig::new(values.clone()).continue_on_error());
        values.insert("continue_on_error".to_string(), "Yes".into());
        assert!(EffectiveConfig::new(values).continue_on_error());
    }

    #[test]
    fn blank_text_reads_as_absent() {
        let mut values = ConfigMap::new();
        values.insert("api_key".to_string(), "   ".into());
        let config = EffectiveConfig::new(values);
        assert!(config.contains("api_key"));
        assert_eq!(config.text("api_key"), None);
    }
}
