mod parser;
mod tags;

pub use parser::{load_spec, parse_line, parse_spec, Asset, SpecDocument, SpecError, SpecLine};
pub use tags::{
    is_config_key, is_spec_tag, ASSET_KEYWORD, CALLER_ONLY_KEYS, PROMPT_KEYWORD, SPEC_TAGS,
};
