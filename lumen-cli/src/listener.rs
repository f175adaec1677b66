use lumen_eye::display::{display_rows, format_latency};
use lumen_eye::results::ClassificationResult;
use lumen_eye::sink::ClassifierListener;
use std::time::Duration;
use tracing::{debug, error};

/// Logs errors; results are printed by the caller
pub struct LogListener;

impl ClassifierListener for LogListener {
    fn on_error(&self, message: &str) {
        error!("{}", message);
    }

    fn on_results(&self, result: &ClassificationResult, inference_time: Duration) {
        debug!(
            "{} label(s) in {}",
            result.categories.len(),
            format_latency(inference_time)
        );
    }
}

/// Prints one line per live-stream result
#[cfg_attr(not(feature = "camera"), allow(dead_code))]
pub struct PrintListener;

impl ClassifierListener for PrintListener {
    fn on_error(&self, message: &str) {
        error!("{}", message);
    }

    fn on_results(&self, result: &ClassificationResult, inference_time: Duration) {
        let labels = display_rows(&result.categories)
            .into_iter()
            .map(|row| format!("{} {}", row.label, row.score))
            .collect::<Vec<_>>()
            .join(", ");
        println!(
            "[{}] {} ({})",
            result.timestamp_ms,
            if labels.is_empty() { "-" } else { labels.as_str() },
            format_latency(inference_time)
        );
    }
}
