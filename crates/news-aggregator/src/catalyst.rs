use signal_core::{CatalystPriority, CatalystTag};

// Keyword groups scanned against the lowercased title+body. A hit tags the
// article and raises its priority to the highest matching group.
const CRITICAL_KEYWORDS: &[&str] = &[
    "bankruptcy",
    "chapter 11",
    "merger",
    "acquisition",
    "buyout",
    "takeover",
    "fda approval",
    "fda clearance",
];

const HIGH_KEYWORDS: &[&str] = &[
    "earnings",
    "quarterly results",
    "q1", "q2", "q3", "q4",
    "guidance",
    "upgrade",
    "downgrade",
    "phase 2",
    "phase 3",
];

const MEDIUM_KEYWORDS: &[&str] = &[
    "dividend",
    "buyback",
    "ceo change",
    "8-k",
    "10-q",
    "10-k",
];

/// Scan title+body for catalyst keywords, one tag per matching keyword.
pub fn tag_catalysts(title: &str, body: &str) -> Vec<CatalystTag> {
    let haystack = format!("{}\n{}", title, body).to_lowercase();
    let mut tags = Vec::new();

    let groups = [
        (CatalystPriority::Critical, CRITICAL_KEYWORDS),
        (CatalystPriority::High, HIGH_KEYWORDS),
        (CatalystPriority::Medium, MEDIUM_KEYWORDS),
    ];
    for (priority, keywords) in groups {
        for keyword in keywords {
            if contains_keyword(&haystack, keyword) {
                tags.push(CatalystTag {
                    keyword: keyword.to_string(),
                    priority,
                });
            }
        }
    }
    tags
}

/// Word-boundary match so "q1" does not fire inside "quote" or "aq123".
fn contains_keyword(haystack: &str, keyword: &str) -> bool {
    let bytes = haystack.as_bytes();
    let mut from = 0;
    while let Some(pos) = haystack[from..].find(keyword) {
        let start = from + pos;
        let end = start + keyword.len();
        let before_ok = start == 0 || !bytes[start - 1].is_ascii_alphanumeric();
        let after_ok = end == bytes.len() || !bytes[end].is_ascii_alphanumeric();
        if before_ok && after_ok {
            return true;
        }
        from = start + 1;
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_critical_keyword_detected() {
        let tags = tag_catalysts("ACME receives FDA approval", "");
        assert_eq!(tags.len(), 1);
        assert_eq!(tags[0].priority, CatalystPriority::Critical);
        assert_eq!(tags[0].keyword, "fda approval");
    }

    #[test]
    fn test_highest_group_wins() {
        let tags = tag_catalysts(
            "Megacorp announces merger and raises dividend",
            "Q3 earnings beat expectations",
        );
        let highest = tags.iter().map(|t| t.priority).max().unwrap();
        assert_eq!(highest, CatalystPriority::Critical);
        assert!(tags.iter().any(|t| t.keyword == "dividend"));
        assert!(tags.iter().any(|t| t.keyword == "earnings"));
    }

    #[test]
    fn test_word_boundaries() {
        assert!(tag_catalysts("Q2 guidance update", "").len() == 2);
        // "q2" inside a longer token must not fire
        assert!(tag_catalysts("see aq2b report", "").is_empty());
    }

    #[test]
    fn test_no_catalyst() {
        assert!(tag_catalysts("Market opens flat", "Quiet session expected").is_empty());
    }
}
