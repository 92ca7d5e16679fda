use std::collections::HashSet;

use regex::Regex;
use signal_core::Symbol;

/// Extracts explicit ticker mentions from article text. Cashtagged mentions
/// (`$TSLA`) win over bare uppercase tokens; bare tokens only count when they
/// are also members of the known-ticker universe.
pub struct SymbolExtractor {
    universe: HashSet<Symbol>,
    token_re: Regex,
}

impl SymbolExtractor {
    pub fn new(universe: impl IntoIterator<Item = Symbol>) -> Self {
        Self {
            universe: universe.into_iter().collect(),
            // Uppercase 1-5 letter token, optionally cashtagged
            token_re: Regex::new(r"\$?\b[A-Z]{1,5}\b").expect("static ticker pattern"),
        }
    }

    pub fn universe(&self) -> &HashSet<Symbol> {
        &self.universe
    }

    /// First resolvable mention wins; cashtags take precedence over bare
    /// tokens anywhere in the text.
    pub fn extract(&self, title: &str, body: &str) -> Option<Symbol> {
        let text = format!("{} {}", title, body);

        let mut first_bare: Option<Symbol> = None;
        for m in self.token_re.find_iter(&text) {
            let raw = m.as_str();
            let is_cashtag = raw.starts_with('$');
            let ticker = raw.trim_start_matches('$');
            let Ok(symbol) = Symbol::new(ticker) else {
                continue;
            };
            if !self.universe.contains(&symbol) {
                continue;
            }
            if is_cashtag {
                return Some(symbol);
            }
            if first_bare.is_none() {
                first_bare = Some(symbol);
            }
        }
        first_bare
    }
}
