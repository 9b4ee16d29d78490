//! Avatar expression hints
//!
//! Maps an externally computed sentiment score onto an avatar expression.
//! The score itself comes from a [`SentimentScorer`]; no analysis happens here.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

/// Words that switch the blush overlay on.
pub const BLUSH_KEYWORDS: [&str; 7] = [
    "awkward",
    "bashful",
    "blush",
    "blushed",
    "embarrassed",
    "flattered",
    "shy",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mood {
    Happy2,
    Happy1,
    Smile2,
    Smile1,
    Neutral,
    Annoyed,
    Angry,
    Sad,
    /// Dark-theme variant of `Annoyed`
    Sleepy,
}

impl Mood {
    pub fn label(self) -> &'static str {
        match self {
            Mood::Happy2 => "happy 2",
            Mood::Happy1 => "happy 1",
            Mood::Smile2 => "smile 2",
            Mood::Smile1 => "smile 1",
            Mood::Neutral => "neutral",
            Mood::Annoyed => "annoyed",
            Mood::Angry => "angry",
            Mood::Sad => "sad",
            Mood::Sleepy => "sleepy",
        }
    }
}

impl fmt::Display for Mood {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Expression to show next to the latest reply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Expression {
    pub mood: Mood,
    pub blushed: bool,
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.blushed {
            write!(f, "{} (blushing)", self.mood)
        } else {
            write!(f, "{}", self.mood)
        }
    }
}

/// UI theme; affects the annoyed expression
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    #[default]
    Light,
    Dark,
}

impl Theme {
    pub fn as_str(self) -> &'static str {
        match self {
            Theme::Light => "light",
            Theme::Dark => "dark",
        }
    }
}

impl FromStr for Theme {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "light" => Ok(Theme::Light),
            "dark" => Ok(Theme::Dark),
            other => Err(format!("unknown theme: {other}")),
        }
    }
}

/// Compound score in `[-1, 1]` to mood. Scores below -0.6 fall back to neutral.
pub fn mood_for_score(score: f64) -> Mood {
    if score >= 0.8 {
        Mood::Happy2
    } else if score >= 0.6 {
        Mood::Happy1
    } else if score >= 0.5 {
        Mood::Smile2
    } else if score >= 0.3 {
        Mood::Smile1
    } else if score >= 0.1 {
        Mood::Neutral
    } else if score >= -0.2 {
        Mood::Annoyed
    } else if score >= -0.4 {
        Mood::Angry
    } else if score >= -0.6 {
        Mood::Sad
    } else {
        Mood::Neutral
    }
}

pub fn is_blushed(text: &str) -> bool {
    let lower = text.to_lowercase();
    BLUSH_KEYWORDS.iter().any(|word| lower.contains(word))
}

#[derive(Error, Debug)]
#[error("Sentiment scoring failed: {0}")]
pub struct ExpressionError(pub String);

/// External sentiment classifier
#[async_trait]
pub trait SentimentScorer: Send + Sync {
    /// Normalized compound score in `[-1, 1]`.
    async fn compound_score(&self, text: &str) -> Result<f64, ExpressionError>;
}

/// Turns finished replies into expressions
pub struct ExpressionClassifier {
    scorer: Arc<dyn SentimentScorer>,
    theme: Theme,
}

impl ExpressionClassifier {
    pub fn new(scorer: Arc<dyn SentimentScorer>, theme: Theme) -> Self {
        Self { scorer, theme }
    }

    pub async fn classify(&self, text: &str) -> Result<Expression, ExpressionError> {
        let content = text.trim();
        let blushed = is_blushed(content);
        let mood = if content.is_empty() {
            Mood::Annoyed
        } else {
            mood_for_score(self.scorer.compound_score(content).await?)
        };
        let mood = match (mood, self.theme) {
            (Mood::Annoyed, Theme::Dark) => Mood::Sleepy,
            (mood, _) => mood,
        };
        Ok(Expression { mood, blushed })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedScore(f64);

    #[async_trait]
    impl SentimentScorer for FixedScore {
        async fn compound_score(&self, _text: &str) -> Result<f64, ExpressionError> {
            Ok(self.0)
        }
    }

    struct Broken;

    #[async_trait]
    impl SentimentScorer for Broken {
        async fn compound_score(&self, _text: &str) -> Result<f64, ExpressionError> {
            Err(ExpressionError("model offline".to_string()))
        }
    }

    #[test]
    fn test_score_thresholds() {
        let cases = [
            (0.95, Mood::Happy2),
            (0.8, Mood::Happy2),
            (0.7, Mood::Happy1),
            (0.55, Mood::Smile2),
            (0.3, Mood::Smile1),
            (0.1, Mood::Neutral),
            (0.0, Mood::Annoyed),
            (-0.2, Mood::Annoyed),
            (-0.3, Mood::Angry),
            (-0.5, Mood::Sad),
            (-0.9, Mood::Neutral),
        ];
        for (score, mood) in cases {
            assert_eq!(mood_for_score(score), mood, "score {score}");
        }
    }

    #[test]
    fn test_blush_keywords_match_substrings() {
        assert!(is_blushed("I'm so EMBARRASSED right now"));
        assert!(is_blushed("*blushes*"));
        assert!(!is_blushed("Good morning!"));
    }

    #[tokio::test]
    async fn test_empty_reply_is_annoyed_or_sleepy() {
        let light = ExpressionClassifier::new(Arc::new(Broken), Theme::Light);
        assert_eq!(light.classify("  ").await.unwrap().mood, Mood::Annoyed);

        let dark = ExpressionClassifier::new(Arc::new(FixedScore(0.0)), Theme::Dark);
        assert_eq!(dark.classify("hmm").await.unwrap().mood, Mood::Sleepy);
    }

    #[tokio::test]
    async fn test_classify_combines_score_and_blush() {
        let classifier = ExpressionClassifier::new(Arc::new(FixedScore(0.85)), Theme::Light);
        let expression = classifier.classify("You flatter me, I'm shy").await.unwrap();
        assert_eq!(
            expression,
            Expression {
                mood: Mood::Happy2,
                blushed: true
            }
        );
        assert_eq!(expression.to_string(), "happy 2 (blushing)");
    }

    #[tokio::test]
    async fn test_scorer_failure_propagates() {
        let classifier = ExpressionClassifier::new(Arc::new(Broken), Theme::Light);
        assert!(classifier.classify("hello").await.is_err());
    }

    #[test]
    fn test_theme_parse() {
        assert_eq!("Dark".parse::<Theme>().unwrap(), Theme::Dark);
        assert!("sepia".parse::<Theme>().is_err());
    }
}
