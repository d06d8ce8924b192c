// src/keywords.rs
//! Keyword index: canonical keyword → alias terms, matched as whole words.
//!
//! - Loads from JSON (`{"Bitcoin": ["BTC", "XBT"]}`) or TOML (same table shape).
//! - Every keyword also matches on its own, aliases or not.
//! - Matching is case-insensitive and word-bounded, where a boundary is any
//!   non-alphanumeric character or the edge of the text ("ai" never matches "said").
//! - Read-only after load.

use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

use crate::error::{Error, Result};

#[derive(Debug)]
struct CompiledKeyword {
    keyword: String,
    aliases: Vec<String>,
    re: Regex,
}

#[derive(Debug, Default)]
pub struct KeywordIndex {
    keywords: Vec<CompiledKeyword>,
}

impl KeywordIndex {
    /// Build an index from an in-memory mapping. Empty keywords and aliases are dropped.
    pub fn from_map(map: BTreeMap<String, Vec<String>>) -> Result<Self> {
        let mut keywords = Vec::with_capacity(map.len());
        for (keyword, aliases) in map {
            let keyword = keyword.trim().to_string();
            if keyword.is_empty() {
                continue;
            }
            let aliases: Vec<String> = aliases
                .into_iter()
                .map(|a| a.trim().to_string())
                .filter(|a| !a.is_empty())
                .collect();
            let re = compile_terms(&keyword, &aliases)?;
            keywords.push(CompiledKeyword {
                keyword,
                aliases,
                re,
            });
        }
        Ok(Self { keywords })
    }

    /// Load from an explicit path. Supports TOML or JSON formats.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        let ext = path
            .extension()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        let map = parse_keywords(&content, &ext).map_err(|reason| Error::Format {
            path: path.to_path_buf(),
            reason,
        })?;
        Self::from_map(map)
    }

    /// Like [`KeywordIndex::load`], but a missing or malformed file is logged and
    /// yields an empty index so feed collection can continue untagged.
    pub fn load_or_empty(path: &Path) -> Self {
        match Self::load(path) {
            Ok(index) => {
                tracing::info!(path = %path.display(), keywords = index.len(), "keywords loaded");
                index
            }
            Err(e) => {
                tracing::error!(error = %e, "keyword config unusable, continuing without tagging");
                Self::default()
            }
        }
    }

    pub fn len(&self) -> usize {
        self.keywords.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keywords.is_empty()
    }

    pub fn keywords(&self) -> impl Iterator<Item = &str> {
        self.keywords.iter().map(|k| k.keyword.as_str())
    }

    pub fn aliases(&self, keyword: &str) -> Option<&[String]> {
        self.keywords
            .iter()
            .find(|k| k.keyword == keyword)
            .map(|k| k.aliases.as_slice())
    }

    /// All keywords whose own name or any alias occurs in `text` as a whole word.
    pub fn match_any(&self, text: &str) -> BTreeSet<String> {
        self.keywords
            .iter()
            .filter(|k| k.re.is_match(text))
            .map(|k| k.keyword.clone())
            .collect()
    }
}

/// One regex per keyword: `(start|non-alnum)(kw|alias...)(non-alnum|end)`.
fn compile_terms(keyword: &str, aliases: &[String]) -> Result<Regex> {
    let alternation = std::iter::once(keyword)
        .chain(aliases.iter().map(String::as_str))
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join("|");
    let pattern = format!(r"(?i)(?:^|[^\p{{L}}\p{{N}}])(?:{alternation})(?:[^\p{{L}}\p{{N}}]|$)");
    Regex::new(&pattern).map_err(|e| Error::Format {
        path: Default::default(),
        reason: format!("keyword '{keyword}': {e}"),
    })
}

fn parse_keywords(
    s: &str,
    hint_ext: &str,
) -> std::result::Result<BTreeMap<String, Vec<String>>, String> {
    let try_toml_first = hint_ext == "toml";
    if try_toml_first {
        if let Ok(v) = toml::from_str::<BTreeMap<String, Vec<String>>>(s) {
            return Ok(v);
        }
    }
    match serde_json::from_str::<BTreeMap<String, Vec<String>>>(s) {
        Ok(v) => Ok(v),
        Err(json_err) => {
            if !try_toml_first {
                if let Ok(v) = toml::from_str::<BTreeMap<String, Vec<String>>>(s) {
                    return Ok(v);
                }
            }
            Err(format!("expected a keyword -> [aliases] mapping: {json_err}"))
        }
    }
}
