//! Text rendering for result listeners

use crate::engine::Category;
use std::time::Duration;

/// A label paired with its percentage text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayRow {
    pub label: String,
    pub score: String,
}

/// Score in [0, 1] as a percentage with two decimals, e.g. `92.00%`
pub fn format_score(score: f32) -> String {
    format!("{:.2}%", score * 100.0)
}

pub fn display_rows(categories: &[Category]) -> Vec<DisplayRow> {
    categories
        .iter()
        .map(|c| DisplayRow {
            label: c.label.clone(),
            score: format_score(c.score),
        })
        .collect()
}

/// One `label score%` line per category
pub fn format_categories(categories: &[Category]) -> String {
    display_rows(categories)
        .into_iter()
        .map(|row| format!("{} {}", row.label, row.score))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn format_latency(latency: Duration) -> String {
    format!("{} ms", latency.as_millis())
}
