use serde::{Deserialize, Serialize};
use std::fmt;

/// A normalized 3-letter language code (`eng`, `spa`, `cat`, ...).
///
/// Construction always lower-cases and validates length so that two codes
/// spelled differently in request input (`Eng`, `ENG`) compare equal once
/// canonicalized.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LangCode(String);

impl LangCode {
    /// Canonicalize a raw language code. Returns `None` if it isn't exactly
    /// 3 ASCII alphabetic characters (variants like `eng_Latn` are rejected
    /// at this layer; mode discovery is responsible for its own dialect
    /// handling before codes reach the pool).
    pub fn parse(raw: &str) -> Option<Self> {
        let lower = raw.trim().to_ascii_lowercase();
        if lower.len() == 3 && lower.chars().all(|c| c.is_ascii_alphabetic()) {
            Some(Self(lower))
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LangCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An ordered source/target language pair identifying an MT direction.
///
/// Equality and hashing use the canonicalized codes, so `PairKey` is safe
/// to use directly as a map key without re-normalizing at each lookup site.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PairKey {
    pub src: LangCode,
    pub tgt: LangCode,
}

impl PairKey {
    pub fn new(src: LangCode, tgt: LangCode) -> Self {
        Self { src, tgt }
    }

    /// Parse `"eng|spa"` or `"eng-spa"` style langpair strings as used by
    /// the HTTP surface.
    pub fn parse(raw: &str) -> Option<Self> {
        let (src, tgt) = raw.split_once(['|', '-']).or_else(|| raw.split_once('_'))?;
        Some(Self::new(LangCode::parse(src)?, LangCode::parse(tgt)?))
    }

    /// Dash-joined form used in mode filenames and log lines (`eng-spa`).
    pub fn dashed(&self) -> String {
        format!("{}-{}", self.src, self.tgt)
    }
}

impl fmt::Display for PairKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.src, self.tgt)
    }
}

/// Classification assigned to a discovered mode file.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModeKind {
    Pair,
    Analyzer,
    Generator,
    Tagger,
}

impl ModeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pair => "pairs",
            Self::Analyzer => "analyzers",
            Self::Generator => "generators",
            Self::Tagger => "taggers",
        }
    }
}

/// Lifecycle state of a running [`crate`]-level pipeline instance.
///
/// The pipeline crate owns the actual process handles; this enum is shared
/// so the pool can reason about state without depending on the pipeline's
/// internals.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PipelineState {
    Ready,
    Draining,
    Dead,
}
