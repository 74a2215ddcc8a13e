use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use thiserror::Error;

use super::tags::{is_keyword_shaped, is_spec_tag, ASSET_KEYWORD, PROMPT_KEYWORD};

#[derive(Debug, Error)]
pub enum SpecError {
    #[error("failed to read spec {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("spec error line {line}: malformed line")]
    Malformed { line: usize },
    #[error("spec error line {line}: unknown keyword '{keyword}'")]
    UnknownKeyword { line: usize, keyword: String },
}

impl SpecError {
    pub fn line(&self) -> Option<usize> {
        match self {
            Self::Io { .. } => None,
            Self::Malformed { line } | Self::UnknownKeyword { line, .. } => Some(*line),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Asset {
    pub filename: String,
    pub detail: String,
}

/// One recognised, non-blank spec line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpecLine {
    Prompt(String),
    Asset(Asset),
    Config { key: String, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SpecDocument {
    pub preamble: String,
    pub assets: Vec<Asset>,
    pub config: IndexMap<String, String>,
}

impl SpecDocument {
    pub fn total_assets(&self) -> usize {
        self.assets.len()
    }
}

pub fn load_spec(path: &Path) -> Result<SpecDocument, SpecError> {
    let raw = std::fs::read_to_string(path).map_err(|source| SpecError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_spec(&raw)
}

/// Parses a whole spec document. The first bad line fails the document.
pub fn parse_spec(text: &str) -> Result<SpecDocument, SpecError> {
    let mut preamble_parts: Vec<String> = Vec::new();
    let mut doc = SpecDocument::default();

    for (idx, raw) in text.lines().enumerate() {
        let Some(line) = parse_line(idx + 1, raw)? else {
            continue;
        };
        match line {
            SpecLine::Prompt(text) => preamble_parts.push(text),
            SpecLine::Asset(asset) => doc.assets.push(asset),
            SpecLine::Config { key, value } => {
                doc.config.insert(key, value);
            }
        }
    }

    doc.preamble = preamble_parts.join(" ").trim().to_string();
    Ok(doc)
}

/// Classifies a single line; `Ok(None)` for blank lines.
pub fn parse_line(line_no: usize, raw: &str) -> Result<Option<SpecLine>, SpecError> {
    let line = raw.trim();
    if line.is_empty() {
        return Ok(None);
    }

    let (head, rest) = split_head(line);
    let keyword = head.to_ascii_uppercase();

    if keyword == PROMPT_KEYWORD {
        if rest.is_empty() {
            return Err(SpecError::Malformed { line: line_no });
        }
        return Ok(Some(SpecLine::Prompt(rest.to_string())));
    }

    if keyword == ASSET_KEYWORD {
        let (filename, detail) = split_head(rest);
        if filename.is_empty() || detail.is_empty() {
            return Err(SpecError::Malformed { line: line_no });
        }
        return Ok(Some(SpecLine::Asset(Asset {
            filename: filename.to_string(),
            detail: detail.to_string(),
        })));
    }

    if rest.is_empty() || !is_keyword_shaped(head) {
        return Err(SpecError::Malformed { line: line_no });
    }

    let key = head.to_ascii_lowercase();
    if !is_spec_tag(&key) {
        return Err(SpecError::UnknownKeyword {
            line: line_no,
            keyword: head.to_string(),
        });
    }
    Ok(Some(SpecLine::Config {
        key,
        value: rest.to_string(),
    }))
}

fn split_head(text: &str) -> (&str, &str) {
    match text.split_once(char::is_whitespace) {
        Some((head, tail)) => (head, tail.trim()),
        None => (text, ""),
    }
}
