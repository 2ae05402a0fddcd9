use std::ffi::OsStr;
use std::path::Path;

use globset::{GlobBuilder, GlobMatcher};
use regex::bytes::Regex;

use crate::spec::{EnumSyncPatternMode, SyncTreeError};

////////////////////////////////////////////////////////////////////////////////
// #region PatternMatching

#[derive(Debug, Clone)]
pub(crate) enum TypeSyncPatternSeq {
    Wildcard(Vec<GlobMatcher>),
    Regex(Vec<Regex>),
}

/// Compiled name filter applied to file and symlink basenames.
///
/// An empty pattern list (or [`EnumSyncPatternMode::None`]) matches every name.
#[derive(Debug, Clone, Default)]
pub(crate) struct SpecNameFilter {
    patterns: Option<TypeSyncPatternSeq>,
}

impl SpecNameFilter {
    pub(crate) fn from_raw(
        patterns: &[String],
        rule_pattern: EnumSyncPatternMode,
    ) -> Result<Self, SyncTreeError> {
        Ok(Self {
            patterns: _compile(patterns, rule_pattern)?,
        })
    }

    /// Match the raw name bytes; names need not be valid UTF-8.
    pub(crate) fn is_match(&self, name: &OsStr) -> bool {
        match &self.patterns {
            None => true,
            Some(TypeSyncPatternSeq::Wildcard(v)) => {
                v.iter().any(|p| p.is_match(Path::new(name)))
            }
            Some(TypeSyncPatternSeq::Regex(v)) => {
                v.iter().any(|p| p.is_match(name.as_encoded_bytes()))
            }
        }
    }
}

/// Keep only `*` and `?` special; every other glob metacharacter is literal.
fn _escape_wildcard(pattern: &str) -> String {
    let mut c_escaped = String::with_capacity(pattern.len());
    for c in pattern.chars() {
        match c {
            '[' | ']' | '{' | '}' => {
                c_escaped.push('[');
                c_escaped.push(c);
                c_escaped.push(']');
            }
            c => c_escaped.push(c),
        }
    }
    c_escaped
}

fn _compile(
    patterns: &[String],
    rule_pattern: EnumSyncPatternMode,
) -> Result<Option<TypeSyncPatternSeq>, SyncTreeError> {
    if patterns.is_empty() {
        return Ok(None);
    }

    match rule_pattern {
        EnumSyncPatternMode::None => Ok(None),
        EnumSyncPatternMode::Wildcard => {
            let mut l_glob = Vec::with_capacity(patterns.len());
            for pattern in patterns {
                let matcher = GlobBuilder::new(&_escape_wildcard(pattern))
                    .backslash_escape(false)
                    .build()
                    .map_err(|e| SyncTreeError::InvalidPattern(format!("`{pattern}`: {e}")))?
                    .compile_matcher();
                l_glob.push(matcher);
            }
            Ok(Some(TypeSyncPatternSeq::Wildcard(l_glob)))
        }
        EnumSyncPatternMode::RegexPartial | EnumSyncPatternMode::RegexFull => {
            let mut l_regex = Vec::with_capacity(patterns.len());
            for pattern in patterns {
                let c_source = if rule_pattern == EnumSyncPatternMode::RegexFull {
                    format!("^(?:{pattern})$")
                } else {
                    pattern.clone()
                };
                let regex = Regex::new(&c_source)
                    .map_err(|e| SyncTreeError::InvalidPattern(format!("`{pattern}`: {e}")))?;
                l_regex.push(regex);
            }
            Ok(Some(TypeSyncPatternSeq::Regex(l_regex)))
        }
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region Formatting

/// Human-scaled byte count: plain below 10,000, then K/M/G in decimal units.
pub fn format_size(n_bytes: u64) -> String {
    let f_bytes = n_bytes as f64;
    if n_bytes < 10_000 {
        format!("{n_bytes} bytes")
    } else if f_bytes < 1e6 {
        format!("{:.1}K", f_bytes / 1e3)
    } else if f_bytes < 1e9 {
        format!("{:.1}M", f_bytes / 1e6)
    } else {
        format!("{:.2}G", f_bytes / 1e9)
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
