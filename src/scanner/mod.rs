pub mod locator;
pub mod magic;

use std::sync::Arc;

use serde::Serialize;

use crate::stream::TargetInfo;

/// Structured fields a translator pulls out of one raw classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub description: String,
    pub size: Option<u64>,
    pub jump: Option<u64>,
    pub adjust: i64,
    pub valid: bool,
}

impl Classification {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            size: None,
            jump: None,
            adjust: 0,
            valid: true,
        }
    }
}

/// One classified candidate, positioned in its target.
#[derive(Debug, Clone, Serialize)]
pub struct Match {
    pub description: String,
    /// Absolute offset in the target: block start + candidate + adjust.
    pub offset: i64,
    pub size: Option<u64>,
    pub jump: Option<u64>,
    pub adjust: i64,
    pub valid: bool,
    #[serde(skip)]
    pub target: Arc<TargetInfo>,
}

impl Match {
    /// `position` is the absolute offset of the candidate that produced `cls`.
    /// An adjust that overflows the offset yields an invalid match pinned
    /// at `position`.
    pub fn new(cls: Classification, position: u64, target: Arc<TargetInfo>) -> Self {
        let base = i64::try_from(position).unwrap_or(i64::MAX);
        let (offset, valid) = match base.checked_add(cls.adjust) {
            Some(offset) => (offset, cls.valid),
            None => (base, false),
        };
        Self {
            description: cls.description,
            offset,
            size: cls.size,
            jump: cls.jump,
            adjust: cls.adjust,
            valid,
            target,
        }
    }

    /// Declared jump length; absent means zero.
    pub fn jump_len(&self) -> u64 {
        self.jump.unwrap_or(0)
    }
}

/// Cheap pre-filter: offsets within `data[..len]` worth classifying.
pub trait CandidateLocator: Send + Sync {
    fn find_candidates(&self, data: &[u8], len: usize) -> Vec<usize>;
}

/// Full classifier run on the window starting at a candidate offset.
pub trait SignatureMatcher: Send + Sync {
    fn classify(&self, window: &[u8]) -> Vec<String>;
}
