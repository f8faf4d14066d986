//! Emotion selection
//!
//! Maps the student's recent quiz performance to the mood the tutor should
//! speak with. The label travels to the backend, which tunes the synthesized
//! voice accordingly.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Score at or above which the latest attempt is worth celebrating
const CELEBRATE_SCORE: f64 = 90.0;

/// Average considered strong
const STRONG_AVERAGE: f64 = 85.0;

/// Average above which an improving student gets an excited tone
const IMPROVING_EXCITED_AVERAGE: f64 = 70.0;

/// Average below which a declining student gets empathy rather than support
const STRUGGLING_AVERAGE: f64 = 60.0;

/// Average below which a stable student gets a patient tone
const LOW_AVERAGE: f64 = 50.0;

/// Mood label used to color the tutor's spoken replies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Emotion {
    Neutral,
    #[default]
    Encouraging,
    Excited,
    Supportive,
    Empathetic,
    Patient,
    Serious,
    Congratulatory,
}

impl Emotion {
    /// Wire label understood by the backend
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Neutral => "neutral",
            Self::Encouraging => "encouraging",
            Self::Excited => "excited",
            Self::Supportive => "supportive",
            Self::Empathetic => "empathetic",
            Self::Patient => "patient",
            Self::Serious => "serious",
            Self::Congratulatory => "congratulatory",
        }
    }

    /// Parse a wire label, returning `None` for unknown labels
    #[must_use]
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_lowercase().as_str() {
            "neutral" => Some(Self::Neutral),
            "encouraging" => Some(Self::Encouraging),
            "excited" => Some(Self::Excited),
            "supportive" => Some(Self::Supportive),
            "empathetic" => Some(Self::Empathetic),
            "patient" => Some(Self::Patient),
            "serious" => Some(Self::Serious),
            "congratulatory" => Some(Self::Congratulatory),
            _ => None,
        }
    }
}

impl fmt::Display for Emotion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Direction of recent quiz scores
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Improving,
    Declining,
    #[default]
    Stable,
}

impl std::str::FromStr for Trend {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "improving" => Ok(Self::Improving),
            "declining" => Ok(Self::Declining),
            "stable" => Ok(Self::Stable),
            other => Err(format!("unknown trend: {other}")),
        }
    }
}

/// Latest view of the student's quiz performance
///
/// Deserializes from the backend's `/analytics/performance` payload; fields
/// the selector does not use are ignored.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PerformanceSnapshot {
    /// Mean score over all attempts (0-100)
    #[serde(default)]
    pub overall_average: f64,

    /// Number of quiz attempts behind the average
    #[serde(default)]
    pub total_quizzes_taken: u32,

    /// Direction of recent scores
    #[serde(default)]
    pub recent_trend: Trend,

    /// Score of the most recent attempt, if known
    #[serde(default)]
    pub last_score: Option<f64>,
}

impl PerformanceSnapshot {
    /// Whether the snapshot carries any performance data at all
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.total_quizzes_taken == 0 && self.last_score.is_none()
    }
}

/// Select the tutor's emotion from a performance snapshot
///
/// Total and deterministic: a missing or empty snapshot yields
/// [`Emotion::Encouraging`].
#[must_use]
pub fn select_emotion(snapshot: Option<&PerformanceSnapshot>) -> Emotion {
    let Some(snapshot) = snapshot.filter(|s| !s.is_empty()) else {
        return Emotion::default();
    };

    // NaN scores compare false everywhere and fall through to the default
    let average = snapshot.overall_average;

    if snapshot.last_score.is_some_and(|s| s >= CELEBRATE_SCORE) {
        return Emotion::Congratulatory;
    }

    match snapshot.recent_trend {
        Trend::Improving if average >= IMPROVING_EXCITED_AVERAGE => Emotion::Excited,
        Trend::Improving => Emotion::Encouraging,
        Trend::Declining if average < STRUGGLING_AVERAGE => Emotion::Empathetic,
        Trend::Declining => Emotion::Supportive,
        Trend::Stable if average >= STRONG_AVERAGE => Emotion::Excited,
        Trend::Stable if average < LOW_AVERAGE => Emotion::Patient,
        Trend::Stable => Emotion::Encouraging,
    }
}
