//! Label table loading

use crate::error::VisionError;
use std::fs;
use std::path::Path;

const MAX_LABEL_FILE_BYTES: u64 = 16 * 1024 * 1024;
const MAX_LABEL_LEN: usize = 256;

/// Parse one label per line. Blank lines are skipped so a trailing newline
/// does not shift indices.
pub fn parse_labels(text: &str) -> Result<Vec<String>, VisionError> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .enumerate()
        .map(|(i, line)| {
            if line.len() > MAX_LABEL_LEN {
                Err(VisionError::Model(format!(
                    "Label {} too long: {} bytes (max {})",
                    i,
                    line.len(),
                    MAX_LABEL_LEN
                )))
            } else {
                Ok(line.to_string())
            }
        })
        .collect()
}

/// Read a label file
pub fn load_labels(path: &Path) -> Result<Vec<String>, VisionError> {
    let size = fs::metadata(path)?.len();
    if size > MAX_LABEL_FILE_BYTES {
        return Err(VisionError::Model(format!(
            "Label file {:?} too large: {} bytes",
            path, size
        )));
    }
    parse_labels(&fs::read_to_string(path)?)
}
