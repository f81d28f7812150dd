//! Pure scoring and outcome classification.

use std::fmt;

use crate::model::Session;

/// Count of questions whose selected option is the correct one.
///
/// Unanswered questions count as incorrect. The function only reads the
/// session, so it can be called any number of times.
#[must_use]
pub fn score(session: &Session) -> u32 {
    let correct = session
        .questions()
        .iter()
        .filter(|q| q.is_answered_correctly())
        .count();
    u32::try_from(correct).unwrap_or(u32::MAX)
}

/// `round(100 * score / total)`, with halves rounded up.
///
/// An empty test scores 0%.
#[must_use]
pub fn percent(score: u32, total: u32) -> u32 {
    if total == 0 {
        return 0;
    }
    let score = u64::from(score.min(total));
    let total = u64::from(total);
    let rounded = (200 * score + total) / (2 * total);
    u32::try_from(rounded).unwrap_or(100)
}

/// Qualitative outcome bucket used by result views.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Tier {
    /// Below 60%.
    Fail,
    /// 60% to 70%.
    Fair,
    /// 71% to 89%.
    Good,
    /// 90% and above.
    Excellent,
}

impl Tier {
    #[must_use]
    pub fn from_percent(percent: u32) -> Self {
        match percent {
            0..=59 => Self::Fail,
            60..=70 => Self::Fair,
            71..=89 => Self::Good,
            _ => Self::Excellent,
        }
    }

    #[must_use]
    pub fn classify(score: u32, total: u32) -> Self {
        Self::from_percent(percent(score, total))
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Fail => "fail",
            Self::Fair => "fair",
            Self::Good => "good",
            Self::Excellent => "excellent",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-question outcome for the result view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuestionReview {
    pub prompt: String,
    pub selected: Option<usize>,
    pub correct: usize,
    pub is_correct: bool,
}

/// Per-question breakdown in presentation order.
#[must_use]
pub fn review(session: &Session) -> Vec<QuestionReview> {
    session
        .questions()
        .iter()
        .map(|q| QuestionReview {
            prompt: q.prompt().to_owned(),
            selected: q.user_selected(),
            correct: q.correct_index(),
            is_correct: q.is_answered_correctly(),
        })
        .collect()
}
