pub const PROMPT_KEYWORD: &str = "PROMPT";
pub const ASSET_KEYWORD: &str = "ASSET";

/// Generation tags accepted as `<KEYWORD> <value>` lines in a spec file.
///
/// The same list gates which environment variables pass through by name.
pub const SPEC_TAGS: &[&str] = &[
    "model",
    "background",
    "moderation",
    "n",
    "output_compression",
    "output_format",
    "quality",
    "response_format",
    "size",
    "style",
    "user",
    "organization",
    "project",
    "continue_on_error",
];

/// Keys only the caller (CLI) or mapped environment variables may set.
pub const CALLER_ONLY_KEYS: &[&str] = &["api_base", "api_path", "api_key", "verbose"];

pub fn is_spec_tag(key: &str) -> bool {
    SPEC_TAGS.iter().any(|tag| *tag == key)
}

pub fn is_config_key(key: &str) -> bool {
    is_spec_tag(key) || CALLER_ONLY_KEYS.iter().any(|item| *item == key)
}

pub(crate) fn is_keyword_shaped(token: &str) -> bool {
    !token.is_empty()
        && token
            .chars()
            .all(|ch| ch.is_ascii_alphabetic() || ch == '_')
}
