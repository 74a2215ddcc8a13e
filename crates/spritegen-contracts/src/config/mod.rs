mod merge;
mod value;

pub use merge::{
    env_layer, env_snapshot, merge_config, resolve_api_key, ConfigError, API_KEY_ENV,
    ENV_KEY_MAP,
};
pub use value::{ConfigMap, ConfigValue, EffectiveConfig};
