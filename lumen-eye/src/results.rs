//! Classification results and ranking

use crate::engine::Category;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Ranked labels for one frame or photo
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    /// Sorted by descending score, already thresholded and truncated
    pub categories: Vec<Category>,
    /// Timestamp of the source frame in milliseconds
    pub timestamp_ms: i64,
    pub inference_time: Duration,
    /// Engine generation that produced the result
    pub generation: u64,
}

impl ClassificationResult {
    pub fn top(&self) -> Option<&Category> {
        self.categories.first()
    }

    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }
}

/// Drop labels below `threshold`, sort by descending score and keep at most
/// `max_results`. Non-finite scores are dropped. Equal scores keep their
/// engine order.
pub fn rank_categories(
    categories: Vec<Category>,
    threshold: f32,
    max_results: usize,
) -> Vec<Category> {
    let mut kept: Vec<Category> = categories
        .into_iter()
        .filter(|c| c.score.is_finite() && c.score >= threshold)
        .collect();

    kept.sort_by(|a, b| b.score.total_cmp(&a.score));
    kept.truncate(max_results);
    kept
}
