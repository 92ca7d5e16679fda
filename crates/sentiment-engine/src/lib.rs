use std::collections::HashSet;

use signal_core::{SentimentScore, SocialPost};

pub mod lexicon;

use lexicon::*;

// Ensemble weights: lex1 / lex2 / finance keywords / social.
const W_LEX1: f64 = 0.40;
const W_LEX2: f64 = 0.30;
const W_KEYWORD: f64 = 0.20;
const W_SOCIAL: f64 = 0.10;

/// Weighted ensemble of two lexical polarity engines, a finance keyword
/// model and an optional engagement-weighted social component.
pub struct SentimentEngine {
    lex1_positive: HashSet<&'static str>,
    lex1_negative: HashSet<&'static str>,
    lex2_positive: HashSet<&'static str>,
    lex2_negative: HashSet<&'static str>,
    finance_bullish: HashSet<&'static str>,
    finance_bearish: HashSet<&'static str>,
    negations: HashSet<&'static str>,
}

impl SentimentEngine {
    pub fn new() -> Self {
        Self {
            lex1_positive: LEX1_POSITIVE.iter().copied().collect(),
            lex1_negative: LEX1_NEGATIVE.iter().copied().collect(),
            lex2_positive: LEX2_POSITIVE.iter().copied().collect(),
            lex2_negative: LEX2_NEGATIVE.iter().copied().collect(),
            finance_bullish: FINANCE_BULLISH.iter().copied().collect(),
            finance_bearish: FINANCE_BEARISH.iter().copied().collect(),
            negations: NEGATION_WORDS.iter().copied().collect(),
        }
    }

    /// Score free text (news sentiment: no social component; the remaining
    /// weights are renormalized).
    pub fn score(&self, text: &str) -> SentimentScore {
        self.score_components(text, None)
    }

    /// Score text alongside an engagement-weighted social polarity.
    pub fn score_with_social(&self, text: &str, social: Option<f64>) -> SentimentScore {
        self.score_components(text, social)
    }

    /// Engagement-weighted mean polarity over posts; None when empty.
    pub fn social_polarity(&self, posts: &[SocialPost]) -> Option<f64> {
        if posts.is_empty() {
            return None;
        }

        let mut weighted = 0.0;
        let mut total_weight = 0.0;
        for post in posts {
            let polarity = self.score_components(&post.text, None).polarity;
            let weight = 1.0 + post.engagement.max(0.0).ln_1p();
            weighted += polarity * weight;
            total_weight += weight;
        }
        if total_weight > 0.0 {
            Some((weighted / total_weight).clamp(-1.0, 1.0))
        } else {
            None
        }
    }

    fn score_components(&self, text: &str, social: Option<f64>) -> SentimentScore {
        let words = tokenize(text);

        let lex1 = self.lexicon_polarity(&words, &self.lex1_positive, &self.lex1_negative);
        let lex2 = self.lexicon_polarity(&words, &self.lex2_positive, &self.lex2_negative);
        let keyword = self.keyword_polarity(&words);

        let mut components: Vec<(f64, f64)> =
            vec![(W_LEX1, lex1), (W_LEX2, lex2), (W_KEYWORD, keyword)];
        if let Some(social) = social {
            components.push((W_SOCIAL, social.clamp(-1.0, 1.0)));
        }

        let weight_sum: f64 = components.iter().map(|(w, _)| w).sum();
        let polarity = components
            .iter()
            .map(|(w, p)| w * p)
            .sum::<f64>()
            / weight_sum;

        let polarities: Vec<f64> = components.iter().map(|(_, p)| *p).collect();
        let confidence = (words.len() as f64 / 100.0).min(1.0) * agreement(&polarities);

        SentimentScore::new(polarity, confidence)
    }

    /// Mean of signed hits in a word list, negation-aware. Zero without hits.
    fn lexicon_polarity(
        &self,
        words: &[String],
        positive: &HashSet<&'static str>,
        negative: &HashSet<&'static str>,
    ) -> f64 {
        let negation_positions: Vec<usize> = words
            .iter()
            .enumerate()
            .filter(|(_, w)| self.negations.contains(w.as_str()))
            .map(|(i, _)| i)
            .collect();

        let mut score = 0i32;
        let mut hits = 0u32;

        for (i, word) in words.iter().enumerate() {
            let is_positive = positive.contains(word.as_str());
            let is_negative = negative.contains(word.as_str());
            if !is_positive && !is_negative {
                continue;
            }

            let negated = negation_positions
                .iter()
                .any(|&pos| pos < i && i - pos <= NEGATION_WINDOW);

            hits += 1;
            let sign = if is_positive { 1 } else { -1 };
            score += if negated { -sign } else { sign };
        }

        if hits == 0 {
            0.0
        } else {
            score as f64 / hits as f64
        }
    }

    fn keyword_polarity(&self, words: &[String]) -> f64 {
        let mut score = 0i32;
        let mut hits = 0u32;
        for word in words {
            if self.finance_bullish.contains(word.as_str()) {
                score += 1;
                hits += 1;
            } else if self.finance_bearish.contains(word.as_str()) {
                score -= 1;
                hits += 1;
            }
        }
        if hits == 0 {
            0.0
        } else {
            score as f64 / hits as f64
        }
    }
}

impl Default for SentimentEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| c.is_whitespace() || ",;.!?:()\"".contains(c))
        .filter(|w| !w.is_empty())
        .map(|w| w.to_string())
        .collect()
}

/// Sign agreement across component polarities: 1 when every non-zero
/// component points the same way, 0 when they split evenly or all are zero.
fn agreement(polarities: &[f64]) -> f64 {
    let signs: Vec<f64> = polarities
        .iter()
        .filter(|p| p.abs() > f64::EPSILON)
        .map(|p| p.signum())
        .collect();
    if signs.is_empty() {
        return 0.0;
    }
    (signs.iter().sum::<f64>() / signs.len() as f64).abs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use signal_core::SentimentLabel;

    fn engine() -> SentimentEngine {
        SentimentEngine::new()
    }

    #[test]
    fn test_bullish_text_scores_positive() {
        let score = engine().score(
            "Shares surge after a strong earnings beat; analysts raised guidance \
             and reiterated buy ratings on robust growth and improving momentum",
        );
        assert!(score.polarity > 0.15);
        assert_eq!(score.label, SentimentLabel::Bullish);
        assert!(score.confidence > 0.0);
    }

    #[test]
    fn test_bearish_text_scores_negative() {
        let score = engine().score(
            "Stock plunges on weak results; downgrade follows lawsuit and \
             bankruptcy fears as deteriorating sales worry pessimistic analysts",
        );
        assert!(score.polarity < -0.15);
        assert_eq!(score.label, SentimentLabel::Bearish);
    }

    #[test]
    fn test_no_hits_is_neutral_with_zero_confidence() {
        let score = engine().score("the quick brown fox jumped over the lazy dog");
        assert!(score.polarity.abs() < 1e-9);
        assert_eq!(score.label, SentimentLabel::Neutral);
        assert!(score.confidence < 1e-9);
    }

    #[test]
    fn test_negation_flips_polarity() {
        let plain = engine().score("growth is strong");
        let negated = engine().score("growth is not strong");
        assert!(plain.polarity > 0.0);
        assert!(negated.polarity < plain.polarity);
    }

    #[test]
    fn test_mixed_signals_drop_confidence() {
        let aligned = engine().score("surge rally gain robust upbeat bullish buy");
        let mixed = engine().score("surge rally gain downbeat fragile bearish sell");
        assert!(aligned.confidence > mixed.confidence);
    }

    #[test]
    fn test_social_component_shifts_polarity() {
        let text = "flat session with little to report";
        let base = engine().score(text);
        let boosted = engine().score_with_social(text, Some(1.0));
        assert!(boosted.polarity > base.polarity);
    }

    #[test]
    fn test_social_polarity_is_engagement_weighted() {
        let post = |text: &str, engagement: f64| SocialPost {
            id: text.to_string(),
            symbol: None,
            text: text.to_string(),
            source: "social".to_string(),
            engagement,
            posted_at: Utc::now(),
        };

        let posts = vec![
            post("massive surge incoming, strong momentum, buy", 10_000.0),
            post("weak downgrade sell", 1.0),
        ];
        let polarity = engine().social_polarity(&posts).unwrap();
        assert!(polarity > 0.0);

        assert!(engine().social_polarity(&[]).is_none());
    }
}
