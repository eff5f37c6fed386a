use std::collections::HashSet;

use candl_core::NewsItem;

/// Identity key for a headline: trimmed, lowercased, internal whitespace
/// collapsed to single spaces.
pub fn normalize(headline: &str) -> String {
    headline
        .split_whitespace()
        .map(|word| word.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Keep the first item per normalized headline, preserving order.
pub fn dedupe(items: Vec<NewsItem>) -> Vec<NewsItem> {
    let mut seen = HashSet::with_capacity(items.len());
    items
        .into_iter()
        .filter(|item| seen.insert(normalize(&item.headline)))
        .collect()
}
