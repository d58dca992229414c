use regex::{Regex, RegexBuilder};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FilterError {
    #[error("invalid filter pattern {pattern:?}: {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

/// Cheap accept/reject decision on a raw classification string, taken
/// before any smart parsing.
pub trait ResultFilter: Send + Sync {
    fn accepts(&self, raw: &str) -> bool;
}

/// Include/exclude regex filter. Excludes always win; with no includes
/// every non-excluded result passes.
#[derive(Debug, Default)]
pub struct RegexFilter {
    include: Vec<Regex>,
    exclude: Vec<Regex>,
}

impl RegexFilter {
    pub fn new(include: &[String], exclude: &[String]) -> Result<Self, FilterError> {
        Ok(Self {
            include: compile_all(include)?,
            exclude: compile_all(exclude)?,
        })
    }

    pub fn accept_all() -> Self {
        Self::default()
    }
}

fn compile_all(patterns: &[String]) -> Result<Vec<Regex>, FilterError> {
    patterns
        .iter()
        .map(|p| {
            RegexBuilder::new(p)
                .case_insensitive(true)
                .build()
                .map_err(|source| FilterError::Pattern {
                    pattern: p.clone(),
                    source,
                })
        })
        .collect()
}

impl ResultFilter for RegexFilter {
    fn accepts(&self, raw: &str) -> bool {
        if self.exclude.iter().any(|re| re.is_match(raw)) {
            return false;
        }
        self.include.is_empty() || self.include.iter().any(|re| re.is_match(raw))
    }
}
