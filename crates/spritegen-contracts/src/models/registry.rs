use serde::Serialize;

/// Model used on the Images endpoint when the config names none.
pub const DEFAULT_IMAGES_MODEL: &str = "dall-e-2";

/// Closed set of models served by the Images endpoint. Everything else goes
/// through the Responses endpoint's image-generation tool.
pub const IMAGES_ENDPOINT_MODELS: &[&str] = &[
    "dall-e-2",
    "dall-e-3",
    "gpt-image-1",
    "gpt-image-1-mini",
    "gpt-image-1.5",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointKind {
    Images,
    Responses,
}

impl EndpointKind {
    pub fn for_model(model: Option<&str>) -> Self {
        let Some(model) = model.map(str::trim).filter(|value| !value.is_empty()) else {
            return Self::Images;
        };
        let lowered = model.to_ascii_lowercase();
        if IMAGES_ENDPOINT_MODELS
            .iter()
            .any(|known| *known == lowered.as_str())
        {
            Self::Images
        } else {
            Self::Responses
        }
    }

    pub fn default_path(self) -> &'static str {
        match self {
            Self::Images => "/v1/images/generations",
            Self::Responses => "/v1/responses",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelFamily {
    DallE2,
    DallE3,
    GptImage,
    Other,
}

impl ModelFamily {
    pub fn of(model: &str) -> Self {
        let lowered = model.trim().to_ascii_lowercase();
        if lowered.starts_with("gpt-image") {
            Self::GptImage
        } else if lowered.starts_with("dall-e-2") {
            Self::DallE2
        } else if lowered.starts_with("dall-e-3") {
            Self::DallE3
        } else {
            Self::Other
        }
    }

    /// The Images endpoint only returns reliable inline data for this family
    /// when asked for base64 explicitly.
    pub fn forces_base64_response(self) -> bool {
        matches!(self, Self::DallE2)
    }

    pub fn accepts_output_format(self) -> bool {
        matches!(self, Self::GptImage)
    }
}
