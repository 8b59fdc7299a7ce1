//! Small validated value objects: task ids, stock codes, credibility scores.

use intel_common::{Error, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::LazyLock;

// ============================================================================
// TaskId
// ============================================================================

/// Unique identifier of an investigation task (UUID).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TaskId(uuid::Uuid);

impl TaskId {
    /// Generate a fresh random id.
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    /// Parse an id from its textual form.
    pub fn parse(value: &str) -> Result<Self> {
        uuid::Uuid::parse_str(value.trim())
            .map(Self)
            .map_err(|_| Error::Validation(format!("无效的任务ID格式: {}", value)))
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for TaskId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<TaskId> for String {
    fn from(id: TaskId) -> Self {
        id.to_string()
    }
}

// ============================================================================
// StockCode
// ============================================================================

static STOCK_CODE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{6}\.(SH|SZ)$").expect("stock code pattern is valid"));

/// A-share exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Exchange {
    /// Shanghai Stock Exchange
    SH,
    /// Shenzhen Stock Exchange
    SZ,
}

impl fmt::Display for Exchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SH => write!(f, "SH"),
            Self::SZ => write!(f, "SZ"),
        }
    }
}

/// A-share stock code in `600519.SH` form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StockCode(String);

impl StockCode {
    pub fn parse(value: &str) -> Result<Self> {
        let code = value.trim();
        if !STOCK_CODE_PATTERN.is_match(code) {
            return Err(Error::Validation(format!(
                "无效的股票代码格式: {}，应为 6 位数字加 .SH 或 .SZ",
                value
            )));
        }
        Ok(Self(code.to_string()))
    }

    pub fn code(&self) -> &str {
        &self.0
    }

    /// The six-digit part without exchange suffix.
    pub fn numeric_code(&self) -> &str {
        &self.0[..6]
    }

    pub fn exchange(&self) -> Exchange {
        if self.0.ends_with(".SH") {
            Exchange::SH
        } else {
            Exchange::SZ
        }
    }
}

impl fmt::Display for StockCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for StockCode {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<StockCode> for String {
    fn from(code: StockCode) -> Self {
        code.0
    }
}

// ============================================================================
// CredibilityScore
// ============================================================================

/// Qualitative tier derived from a credibility score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CredibilityLevel {
    High,
    Medium,
    Low,
}

impl CredibilityLevel {
    pub fn label(&self) -> &'static str {
        match self {
            Self::High => "高可信度",
            Self::Medium => "中可信度",
            Self::Low => "低可信度",
        }
    }
}

impl fmt::Display for CredibilityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Integer credibility score in `0..=100`.
///
/// Serialized as `{"score": n, "level": "高可信度"}`. The level is always
/// derived from the score, so a stored level is ignored on read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "ScoreRepr", into = "ScoreRepr")]
pub struct CredibilityScore(u8);

impl CredibilityScore {
    pub const MAX: u8 = 100;

    pub fn new(score: i64) -> Result<Self> {
        if !(0..=Self::MAX as i64).contains(&score) {
            return Err(Error::Validation(format!(
                "可信度评分必须在 0-100 之间，当前值: {}",
                score
            )));
        }
        Ok(Self(score as u8))
    }

    /// Build from a float, rejecting anything that is not a whole number.
    pub fn try_from_f64(score: f64) -> Result<Self> {
        if !score.is_finite() || score.fract() != 0.0 {
            return Err(Error::Validation(format!(
                "可信度评分必须是整数，当前值: {}",
                score
            )));
        }
        Self::new(score as i64)
    }

    /// Saturate an arbitrary integer into range.
    pub fn clamped(score: i64) -> Self {
        Self(score.clamp(0, Self::MAX as i64) as u8)
    }

    pub fn score(&self) -> u8 {
        self.0
    }

    pub fn level(&self) -> CredibilityLevel {
        match self.0 {
            80..=100 => CredibilityLevel::High,
            50..=79 => CredibilityLevel::Medium,
            _ => CredibilityLevel::Low,
        }
    }
}

impl fmt::Display for CredibilityScore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.0, self.level())
    }
}

#[derive(Serialize, Deserialize)]
struct ScoreRepr {
    score: i64,
    #[serde(default, skip_deserializing)]
    level: String,
}

impl TryFrom<ScoreRepr> for CredibilityScore {
    type Error = Error;

    fn try_from(repr: ScoreRepr) -> Result<Self> {
        Self::new(repr.score)
    }
}

impl From<CredibilityScore> for ScoreRepr {
    fn from(score: CredibilityScore) -> Self {
        Self {
            score: score.0 as i64,
            level: score.level().label().to_string(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
