//! # Smart Keywords
//!
//! Turns a raw classification string into structured fields. Keywords are
//! embedded in braces:
//!
//! - `{size:N}` declared length of the matched structure
//! - `{jump-to-offset:N}` resume scanning N bytes after the match
//! - `{offset-adjust:N}` the structure starts N bytes from the candidate
//! - `{invalid}` the classifier already knows the match is bogus
//!
//! Numbers are decimal or `0x` hex. Unknown keywords are stripped and
//! ignored. A multi-part string (parts separated by `"\n- "`) takes its
//! keywords from the first part only; the remaining parts only extend the
//! description.

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

use crate::scanner::Classification;
use crate::scanner::magic::PART_SEPARATOR;

static KEYWORD_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{([a-z][a-z-]*)(?::([^{}]*))?\}").expect("keyword regex"));

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TranslateError {
    #[error("malformed value {value:?} for keyword {keyword}")]
    BadValue { keyword: String, value: String },
    #[error("keyword {0} requires a value")]
    MissingValue(String),
}

pub trait ResultTranslator: Send + Sync {
    fn translate(&self, raw: &str) -> Result<Classification, TranslateError>;
}

#[derive(Debug, Clone, Copy)]
pub struct SmartTranslator {
    apply_keywords: bool,
}

impl SmartTranslator {
    pub fn new() -> Self {
        Self {
            apply_keywords: true,
        }
    }

    /// Strip keywords without acting on them.
    pub fn dumb() -> Self {
        Self {
            apply_keywords: false,
        }
    }
}

impl Default for SmartTranslator {
    fn default() -> Self {
        Self::new()
    }
}

impl ResultTranslator for SmartTranslator {
    fn translate(&self, raw: &str) -> Result<Classification, TranslateError> {
        let mut parts = raw.split(PART_SEPARATOR);
        let primary = parts.next().unwrap_or_default();

        let mut cls = Classification::new(String::new());
        if self.apply_keywords {
            for caps in KEYWORD_RE.captures_iter(primary) {
                let keyword = &caps[1];
                let value = caps.get(2).map(|m| m.as_str());
                apply_keyword(&mut cls, keyword, value)?;
            }
        }

        let description = std::iter::once(primary)
            .chain(parts)
            .map(strip_keywords)
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join(", ");
        cls.description = description;
        Ok(cls)
    }
}

fn apply_keyword(
    cls: &mut Classification,
    keyword: &str,
    value: Option<&str>,
) -> Result<(), TranslateError> {
    match keyword {
        "size" => cls.size = Some(parse_unsigned(keyword, value)?),
        "jump-to-offset" => cls.jump = Some(parse_unsigned(keyword, value)?),
        "offset-adjust" => cls.adjust = parse_signed(keyword, value)?,
        "invalid" => cls.valid = false,
        _ => {}
    }
    Ok(())
}

fn strip_keywords(part: &str) -> String {
    let stripped = KEYWORD_RE.replace_all(part, "");
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn parse_signed(keyword: &str, value: Option<&str>) -> Result<i64, TranslateError> {
    let text = value
        .map(str::trim)
        .ok_or_else(|| TranslateError::MissingValue(keyword.to_string()))?;
    let (negative, digits) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text.strip_prefix('+').unwrap_or(text)),
    };
    let magnitude = parse_digits(digits)
        .and_then(|v| i64::try_from(v).ok())
        .ok_or_else(|| bad_value(keyword, text))?;
    Ok(if negative { -magnitude } else { magnitude })
}

fn parse_unsigned(keyword: &str, value: Option<&str>) -> Result<u64, TranslateError> {
    let text = value
        .map(str::trim)
        .ok_or_else(|| TranslateError::MissingValue(keyword.to_string()))?;
    parse_digits(text).ok_or_else(|| bad_value(keyword, text))
}

fn parse_digits(text: &str) -> Option<u64> {
    match text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
    {
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None => text.parse::<u64>().ok(),
    }
}

fn bad_value(keyword: &str, value: &str) -> TranslateError {
    TranslateError::BadValue {
        keyword: keyword.to_string(),
        value: value.to_string(),
    }
}
