//! Word lists for the lexical polarity engines.
//!
//! The two general lexicons are intentionally independent: different word
//! sets, different registers. The finance dictionary is narrower and only
//! fires on market-specific vocabulary.

/// General lexicon A: market-report vocabulary.
pub const LEX1_POSITIVE: &[&str] = &[
    "rally", "surge", "gain", "profit", "growth", "beat", "upgrade",
    "outperform", "strong", "positive", "rise", "increase", "breakthrough",
    "innovation", "success", "exceed", "momentum", "record", "advance",
    "soar", "jump", "climb", "boom", "win",
];

pub const LEX1_NEGATIVE: &[&str] = &[
    "decline", "loss", "fall", "plunge", "crash", "miss", "downgrade",
    "underperform", "weak", "negative", "drop", "decrease", "concern",
    "risk", "fail", "disappoint", "slump", "warning", "retreat", "fear",
    "trouble", "tumble", "sink", "slide", "worry",
];

/// General lexicon B: analyst/flow vocabulary.
pub const LEX2_POSITIVE: &[&str] = &[
    "optimistic", "upbeat", "robust", "resilient", "accelerating",
    "expansion", "recovery", "rebound", "upside", "tailwind", "overweight",
    "raised", "initiated", "reiterated", "outpacing", "favorable",
    "improving", "solid", "healthy", "promising",
];

pub const LEX2_NEGATIVE: &[&str] = &[
    "pessimistic", "downbeat", "fragile", "deteriorating", "contraction",
    "slowdown", "headwind", "downside", "underweight", "lowered",
    "suspended", "unfavorable", "worsening", "soft", "sluggish",
    "disappointing", "uncertain", "volatile", "stagnant", "bleak",
];

/// Finance-specific dictionary: each hit contributes +1 or -1, averaged.
pub const FINANCE_BULLISH: &[&str] = &[
    "bullish", "buy", "accumulate", "buyback", "repurchase", "dividend",
    "accretive", "guidance", "upgraded", "breakout", "oversold",
    "undervalued", "beat", "outperform",
];

pub const FINANCE_BEARISH: &[&str] = &[
    "bearish", "sell", "short", "dilution", "dilutive", "lawsuit",
    "litigation", "recall", "investigation", "probe", "default",
    "bankruptcy", "restructuring", "layoff", "overbought", "overvalued",
    "bubble", "delisting",
];

/// Negation words flip the polarity of a hit within the following window.
pub const NEGATION_WORDS: &[&str] = &[
    "not", "no", "never", "don't", "doesn't", "didn't", "isn't", "aren't",
    "wasn't", "weren't", "won't", "wouldn't", "couldn't", "shouldn't",
    "hardly", "barely", "neither", "nor", "without",
];

pub const NEGATION_WINDOW: usize = 3;
