//! Symbol classification.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const METAL_PREFIXES: [&str; 4] = ["XAU", "XAG", "XPT", "XPD"];

/// Which family of analysis a symbol belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisKind {
    ForexPair,
    Stock,
}

impl AnalysisKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisKind::ForexPair => "forex_pair",
            AnalysisKind::Stock => "stock",
        }
    }
}

impl fmt::Display for AnalysisKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for AnalysisKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "forex_pair" | "forex" | "fx" => Ok(AnalysisKind::ForexPair),
            "stock" | "equity" => Ok(AnalysisKind::Stock),
            _ => Err(format!("Invalid analysis kind: {}", s)),
        }
    }
}

/// Classification result with the currency legs of a pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolClass {
    pub symbol: String,
    pub kind: AnalysisKind,
    pub base: Option<String>,
    pub quote: Option<String>,
}

/// Classify a symbol as a currency/metal pair or a stock.
///
/// Pairs are 6–7 characters whose first six are letters (an optional broker
/// suffix is tolerated), or anything starting with a precious-metal code.
pub fn classify_symbol(symbol: &str) -> SymbolClass {
    let symbol = symbol.trim().to_uppercase();
    let chars: Vec<char> = symbol.chars().collect();

    let legs = |chars: &[char]| {
        let base: String = chars.iter().take(3).collect();
        let quote: String = chars.iter().skip(3).take(3).collect();
        let quote = (quote.len() == 3 && quote.chars().all(|c| c.is_ascii_alphabetic())).then_some(quote);
        (Some(base), quote)
    };

    let is_metal = METAL_PREFIXES.iter().any(|p| symbol.starts_with(p));
    let is_pair = (6..=7).contains(&chars.len()) && chars[..6].iter().all(|c| c.is_ascii_alphabetic());

    if is_metal || is_pair {
        let (base, quote) = legs(&chars);
        SymbolClass {
            symbol,
            kind: AnalysisKind::ForexPair,
            base,
            quote,
        }
    } else {
        SymbolClass {
            symbol,
            kind: AnalysisKind::Stock,
            base: None,
            quote: None,
        }
    }
}
