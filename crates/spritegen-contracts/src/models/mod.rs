mod registry;

pub use registry::{EndpointKind, ModelFamily, DEFAULT_IMAGES_MODEL, IMAGES_ENDPOINT_MODELS};
