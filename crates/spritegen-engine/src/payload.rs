use std::path::Path;

use serde_json::{json, Map, Value};
use spritegen_contracts::config::{ConfigValue, EffectiveConfig};
use spritegen_contracts::models::{EndpointKind, ModelFamily, DEFAULT_IMAGES_MODEL};
use spritegen_contracts::spec::is_spec_tag;

/// Allow-listed keys that never travel in an Images request body as-is.
pub const INTERNAL_ONLY_KEYS: &[&str] = &[
    "n",
    "response_format",
    "continue_on_error",
    "api_base",
    "api_path",
    "api_key",
    "organization",
    "project",
    "verbose",
];

/// The only config keys copied into the Responses image-generation tool.
pub const RESPONSES_TOOL_KEYS: &[&str] = &["size", "quality", "background", "moderation"];

const EXTENSION_FORMATS: &[(&str, &str)] = &[
    ("png", "png"),
    ("webp", "webp"),
    ("jpg", "jpeg"),
    ("jpeg", "jpeg"),
];

#[derive(Debug, Clone, PartialEq)]
pub enum RequestPayload {
    Images(Map<String, Value>),
    Responses(Map<String, Value>),
}

impl RequestPayload {
    pub fn kind(&self) -> EndpointKind {
        match self {
            Self::Images(_) => EndpointKind::Images,
            Self::Responses(_) => EndpointKind::Responses,
        }
    }

    pub fn fields(&self) -> &Map<String, Value> {
        match self {
            Self::Images(fields) | Self::Responses(fields) => fields,
        }
    }

    pub fn to_json(&self) -> Value {
        Value::Object(self.fields().clone())
    }
}

pub fn build_payload(prompt: &str, filename: &str, config: &EffectiveConfig) -> RequestPayload {
    match EndpointKind::for_model(config.text("model")) {
        EndpointKind::Images => build_images_payload(prompt, filename, config),
        EndpointKind::Responses => build_responses_payload(prompt, config),
    }
}

fn build_images_payload(prompt: &str, filename: &str, config: &EffectiveConfig) -> RequestPayload {
    let model = config.text("model").unwrap_or(DEFAULT_IMAGES_MODEL).to_string();
    let family = ModelFamily::of(&model);

    let mut payload = Map::new();
    for (key, value) in config.iter() {
        if !is_spec_tag(key) || INTERNAL_ONLY_KEYS.contains(&key.as_str()) {
            continue;
        }
        if let Some(normalized) = normalize_option_value(key, value) {
            payload.insert(key.clone(), normalized);
        }
    }
    payload.insert("prompt".to_string(), Value::String(prompt.to_string()));
    payload.insert("model".to_string(), Value::String(model));
    payload.insert("n".to_string(), json!(1));

    if family.forces_base64_response() {
        payload.insert(
            "response_format".to_string(),
            Value::String("b64_json".to_string()),
        );
    }

    if family.accepts_output_format() && config.text("output_format").is_none() {
        if let Some(format) = output_format_for_filename(filename) {
            payload.insert(
                "output_format".to_string(),
                Value::String(format.to_string()),
            );
        }
    }

    RequestPayload::Images(payload)
}

fn build_responses_payload(prompt: &str, config: &EffectiveConfig) -> RequestPayload {
    let mut tool = Map::new();
    tool.insert(
        "type".to_string(),
        Value::String("image_generation".to_string()),
    );
    for key in RESPONSES_TOOL_KEYS {
        if let Some(value) = config.text(key) {
            tool.insert((*key).to_string(), Value::String(value.to_string()));
        }
    }
    if let Some(format) = config.text("output_format") {
        tool.insert("format".to_string(), Value::String(format.to_string()));
    }

    let mut payload = Map::new();
    payload.insert(
        "model".to_string(),
        Value::String(config.text("model").unwrap_or_default().to_string()),
    );
    payload.insert("input".to_string(), Value::String(prompt.to_string()));
    payload.insert("tools".to_string(), Value::Array(vec![Value::Object(tool)]));
    RequestPayload::Responses(payload)
}

fn normalize_option_value(key: &str, value: &ConfigValue) -> Option<Value> {
    let ConfigValue::Text(raw) = value else {
        return Some(value.to_json());
    };
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    if key == "output_compression" {
        if let Ok(level) = trimmed.parse::<i64>() {
            return Some(json!(level));
        }
    }
    Some(Value::String(trimmed.to_string()))
}

pub fn output_format_for_filename(filename: &str) -> Option<&'static str> {
    let ext = Path::new(filename)
        .extension()
        .and_then(|value| value.to_str())
        .map(|value| value.to_ascii_lowercase())?;
    EXTENSION_FORMATS
        .iter()
        .find(|(known, _)| *known == ext)
        .map(|(_, format)| *format)
}
